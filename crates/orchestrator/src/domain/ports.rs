//! Boundaries towards the collaborators the orchestrator drives.
//!
//! The scheduler and the controller only talk to the outside world through
//! these traits so the binary can plug in cgroupfs and stdio adapters while
//! tests plug in recording doubles.

use api_types::BatchMode;
use api_types::InstanceId;
use api_types::SceneCommand;
use api_types::WindowRef;
use derive_more::Display;

use crate::domain::topology::CoreId;

#[derive(Debug, Display)]
pub enum ResourceGroupError {
    #[display("failed to write {file} of group {group}: {message}")]
    Write {
        group: String,
        file: &'static str,
        message: String,
    },
    #[display("missing resource groups: {}", groups.join(", "))]
    Missing { groups: Vec<String> },
}

impl std::error::Error for ResourceGroupError {}

#[derive(Debug, Display)]
pub enum WindowError {
    #[display("pointer grab failed: {message}")]
    GrabFailed { message: String },
    #[display("window system disconnected")]
    Disconnected,
}

impl std::error::Error for WindowError {}

#[derive(Debug, Display)]
pub enum ControlError {
    #[display("instance {id} is unknown")]
    UnknownInstance { id: InstanceId },
    #[display("instance control disconnected")]
    Disconnected,
}

impl std::error::Error for ControlError {}

/// OS resource groups that pin processes to core sets.
#[async_trait::async_trait]
pub trait ResourceGroups: Send + Sync {
    /// Moves `pids` into `group`. Rewriting the same membership is a no-op.
    async fn write_members(&self, group: &str, pids: &[u32]) -> Result<(), ResourceGroupError>;

    /// Assigns the core set of `group`.
    async fn write_cpus(&self, group: &str, cpus: &[CoreId]) -> Result<(), ResourceGroupError>;
}

/// Remote scene composition. Submission never waits for the batch to be
/// applied; failures are reported by the sink itself.
pub trait SceneSink: Send + Sync {
    fn submit(&self, mode: BatchMode, commands: Vec<SceneCommand>);
}

#[async_trait::async_trait]
pub trait WindowSystem: Send + Sync {
    async fn focus_window(&self, window: WindowRef) -> Result<(), WindowError>;

    async fn grab_pointer(&self, window: WindowRef, confine: bool) -> Result<(), WindowError>;

    async fn ungrab_pointer(&self) -> Result<(), WindowError>;

    async fn grab_key(&self, binding: &str) -> Result<(), WindowError>;

    async fn ungrab_key(&self, binding: &str) -> Result<(), WindowError>;
}

/// Per-instance control surface (sends the reset key to an instance).
#[async_trait::async_trait]
pub trait InstanceControl: Send + Sync {
    async fn reset(&self, id: InstanceId) -> Result<(), ControlError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum HookKind {
    #[display("reset")]
    Reset,
    #[display("wall_reset")]
    WallReset,
    #[display("lock")]
    Lock,
    #[display("unlock")]
    Unlock,
    #[display("play")]
    Play,
}

/// Launches user hooks. Hooks are never awaited.
pub trait HookRunner: Send + Sync {
    fn run(&self, kind: HookKind);
}
