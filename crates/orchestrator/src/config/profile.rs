//! Orchestration profile.
//!
//! The profile is read once at startup, validated, and then shared read-only
//! (`Arc<Profile>`) by the scheduler and the controller.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use api_types::PriorityTier;
use api_types::Rect;
use api_types::WindowRef;
use derive_more::Display;
use serde::Deserialize;

use crate::domain::ports::HookKind;

#[derive(Debug, Display)]
pub enum ProfileError {
    #[display("failed to read profile {}: {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[display("failed to parse profile: {message}")]
    Parse { message: String },
    #[display("invalid profile: {message}")]
    Invalid { message: String },
}

impl std::error::Error for ProfileError {}

/// Presentation strategy, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Single,
    #[default]
    Wall,
    Moving,
}

/// A managed instance. Its id is its position in the instance list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceConfig {
    pub pid: u32,
    pub window: WindowRef,
}

/// Number of cores given to each tier, per cache group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TierCpus {
    pub idle: usize,
    pub low: usize,
    pub mid: usize,
    pub high: usize,
    pub active: usize,
}

impl Default for TierCpus {
    fn default() -> Self {
        Self {
            idle: 1,
            low: 2,
            mid: 4,
            high: 6,
            active: 8,
        }
    }
}

impl TierCpus {
    pub fn count(&self, tier: PriorityTier) -> usize {
        match tier {
            PriorityTier::Idle => self.idle,
            PriorityTier::Low => self.low,
            PriorityTier::Mid => self.mid,
            PriorityTier::High => self.high,
            PriorityTier::Active => self.active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    pub enabled: bool,
    pub cgroup_root: PathBuf,
    /// Number of cache groups to split instances across. 0 uses every
    /// discovered cache group.
    pub cache_split: usize,
    pub cpus: TierCpus,
    /// Preview progress above which an instance drops to the low tier.
    pub low_threshold: u8,
    /// Grace period in the mid tier after an instance becomes idle.
    pub burst_ms: u64,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cgroup_root: PathBuf::from("/sys/fs/cgroup/orchestrator"),
            cache_split: 0,
            cpus: TierCpus::default(),
            low_threshold: 20,
            burst_ms: 0,
        }
    }
}

impl AffinityConfig {
    pub fn burst(&self) -> Option<Duration> {
        (self.burst_ms > 0).then(|| Duration::from_millis(self.burst_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// The projector window showing the overview.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    pub window: WindowRef,
    /// Child windows that receive focus when the projector is focused.
    pub children: Vec<WindowRef>,
    pub width: u32,
    pub height: u32,
}

/// A block of the moving wall that holds `width * height` instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GroupLayout {
    pub space: Rect,
    pub width: u32,
    pub height: u32,
}

impl GroupLayout {
    pub fn capacity(&self) -> usize {
        (self.width * self.height) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct MovingConfig {
    pub groups: Vec<GroupLayout>,
    pub locks: Option<GroupLayout>,
    /// Keep empty slots where locked instances used to be.
    pub gaps: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    /// Play the first idle locked instance instead of returning to the wall.
    pub goto_locked: bool,
    pub reset_unlock: bool,
    pub confine_pointer: bool,
    pub grid: Size,
    pub canvas: Size,
    pub projector: ProjectorConfig,
    /// Key bindings that are only grabbed while on the wall.
    pub bindings: Vec<String>,
    pub moving: MovingConfig,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            goto_locked: false,
            reset_unlock: false,
            confine_pointer: false,
            grid: Size {
                width: 2,
                height: 2,
            },
            canvas: Size {
                width: 1920,
                height: 1080,
            },
            projector: ProjectorConfig::default(),
            bindings: Vec::new(),
            moving: MovingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub reset: Option<String>,
    pub wall_reset: Option<String>,
    pub lock: Option<String>,
    pub unlock: Option<String>,
    pub play: Option<String>,
}

impl HooksConfig {
    pub fn command(&self, kind: HookKind) -> Option<&str> {
        match kind {
            HookKind::Reset => self.reset.as_deref(),
            HookKind::WallReset => self.wall_reset.as_deref(),
            HookKind::Lock => self.lock.as_deref(),
            HookKind::Unlock => self.unlock.as_deref(),
            HookKind::Play => self.play.as_deref(),
        }
    }
}

/// Upper bound on pointer grab attempts.
pub const MAX_GRAB_ATTEMPTS: u32 = 5;

/// Backoff used when grabbing the pointer races another client's grab.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GrabRetryConfig {
    pub initial_delay_ms: u64,
    pub factor: u32,
    pub attempts: u32,
}

impl Default for GrabRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1,
            factor: 4,
            attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub mode: Mode,
    pub instances: Vec<InstanceConfig>,
    pub affinity: AffinityConfig,
    pub wall: WallConfig,
    pub hooks: HooksConfig,
    pub grab_retry: GrabRetryConfig,
}

impl Profile {
    /// Reads, parses and validates a YAML profile.
    pub async fn load(path: &Path) -> Result<Self, ProfileError> {
        tracing::info!("Loading profile from {:?}", path);
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ProfileError::Read {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ProfileError> {
        let profile: Profile = serde_yaml::from_str(content).map_err(|e| ProfileError::Parse {
            message: e.to_string(),
        })?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |message: String| Err(ProfileError::Invalid { message });

        if self.instances.is_empty() {
            return invalid("no instances configured".to_string());
        }
        if self.affinity.low_threshold > 100 {
            return invalid(format!(
                "low_threshold must be within 0..=100, got {}",
                self.affinity.low_threshold
            ));
        }
        if !(1..=MAX_GRAB_ATTEMPTS).contains(&self.grab_retry.attempts) {
            return invalid(format!(
                "grab_retry.attempts must be within 1..={MAX_GRAB_ATTEMPTS}, got {}",
                self.grab_retry.attempts
            ));
        }
        if self.grab_retry.factor == 0 {
            return invalid("grab_retry.factor must be at least 1".to_string());
        }

        match self.mode {
            Mode::Single => {
                if self.instances.len() != 1 {
                    return invalid(format!(
                        "single mode manages exactly one instance, got {}",
                        self.instances.len()
                    ));
                }
            }
            Mode::Wall => {
                let grid = self.wall.grid;
                if grid.width == 0 || grid.height == 0 {
                    return invalid("wall grid must not be empty".to_string());
                }
                if ((grid.width * grid.height) as usize) < self.instances.len() {
                    return invalid(format!(
                        "wall grid {}x{} cannot hold {} instances",
                        grid.width,
                        grid.height,
                        self.instances.len()
                    ));
                }
            }
            Mode::Moving => {
                let moving = &self.wall.moving;
                if moving.groups.is_empty() {
                    return invalid("moving wall needs at least one group".to_string());
                }
                let empty = moving
                    .groups
                    .iter()
                    .chain(moving.locks.iter())
                    .any(|group| group.capacity() == 0);
                if empty {
                    return invalid("moving wall groups must not be empty".to_string());
                }
            }
        }

        if self.mode != Mode::Single {
            let canvas = self.wall.canvas;
            if canvas.width == 0 || canvas.height == 0 {
                return invalid("canvas size must not be zero".to_string());
            }
        }

        Ok(())
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}
