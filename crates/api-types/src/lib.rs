//! Shared type definitions
//!
//! This crate contains the data model shared by the orchestrator and the
//! external collaborators it talks to: instance lifecycle snapshots, CPU
//! priority tiers, the typed events pushed into the controller and the
//! scene/window commands it produces.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Dense, zero-based identifier of one managed instance.
pub type InstanceId = usize;

/// Coarse-grained phase of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Menu,
    Generating,
    Previewing,
    Idle,
    Active,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Menu => "menu",
            Phase::Generating => "generating",
            Phase::Previewing => "previewing",
            Phase::Idle => "idle",
            Phase::Active => "active",
        };
        f.write_str(name)
    }
}

/// Lifecycle snapshot of a single instance.
///
/// `progress` (0-100) is only meaningful while generating or previewing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecycleState {
    pub phase: Phase,
    #[serde(default)]
    pub progress: u8,
}

impl LifecycleState {
    pub fn new(phase: Phase, progress: u8) -> Self {
        Self {
            phase,
            progress: progress.min(100),
        }
    }

    /// State an instance enters right after a reset.
    pub fn generating() -> Self {
        Self::new(Phase::Generating, 0)
    }

    pub fn idle() -> Self {
        Self::new(Phase::Idle, 0)
    }

    pub fn active() -> Self {
        Self::new(Phase::Active, 0)
    }

    /// Whether the instance is in the middle of world generation.
    pub fn is_generating(&self) -> bool {
        self.phase == Phase::Generating
    }
}

/// CPU priority class, ordered from the smallest CPU share to the largest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Idle,
    Low,
    Mid,
    High,
    Active,
}

impl PriorityTier {
    pub const ALL: [PriorityTier; 5] = [
        PriorityTier::Idle,
        PriorityTier::Low,
        PriorityTier::Mid,
        PriorityTier::High,
        PriorityTier::Active,
    ];

    /// Base name of the resource groups backing this tier.
    pub fn name(self) -> &'static str {
        match self {
            PriorityTier::Idle => "idle",
            PriorityTier::Low => "low",
            PriorityTier::Mid => "mid",
            PriorityTier::High => "high",
            PriorityTier::Active => "active",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque handle of a window owned by the window system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowRef(pub u32);

impl fmt::Display for WindowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Inclusive hit test, matching how hitboxes are resolved on the projector.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        let (left, top) = (i64::from(self.x), i64::from(self.y));
        let (right, bottom) = (left + i64::from(self.w), top + i64::from(self.h));
        x >= left && x <= right && y >= top && y <= bottom
    }
}

/// Lifecycle update for one instance, produced by the lifecycle collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: InstanceId,
    pub state: LifecycleState,
}

/// Actions that target a single instance on the overview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WallAction {
    Play,
    Reset,
    Lock,
    ResetOthers,
}

/// Logical action already resolved from a raw key or button by the input
/// collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Targets an instance either by `slot` or, when absent, by pointer
    /// position.
    Wall {
        action: WallAction,
        #[serde(default)]
        slot: Option<usize>,
    },
    ResetAll,
    PlayFirstLocked,
    FocusProjector,
    IngameReset,
    IngameFocus,
}

/// User input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub action: Action,
    /// Whether this is a repeat of a held button (drag).
    #[serde(default)]
    pub held: bool,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

/// Window focus change reported by the window collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusEvent {
    pub window: WindowRef,
}

/// Everything the controller loop consumes from its collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    Lifecycle(LifecycleEvent),
    Input(InputEvent),
    Focus(FocusEvent),
}

/// Execution mode of a scene command batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Executed in order, as fast as possible.
    SerialRealtime,
    /// Executed in order, one command per rendered frame.
    SerialFrame,
    /// Executed in any order.
    Parallel,
}

/// Declarative scene composition command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneCommand {
    SetVisible { target: String, visible: bool },
    SetTransform { target: String, rect: Rect },
    SetScene { name: String },
}

/// Window-system command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowCommand {
    FocusWindow { window: WindowRef },
    GrabPointer { window: WindowRef, confine: bool },
    UngrabPointer,
    GrabKey { binding: String },
    UngrabKey { binding: String },
}

/// Everything the orchestrator emits towards its output collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OutboundCommand {
    Scene {
        mode: BatchMode,
        commands: Vec<SceneCommand>,
    },
    Window(WindowCommand),
    ResetInstance {
        id: InstanceId,
    },
}
