use api_types::InstanceId;
use api_types::Rect;
use api_types::SceneCommand;

use super::moving::MovingWall;
use super::state::ControllerState;
use super::wall::WallGrid;
use crate::config::Mode;
use crate::config::Profile;

/// Presentation strategy, chosen once from the profile.
#[derive(Debug, Clone)]
pub enum Frontend {
    /// One instance, always played.
    Single,
    Wall(WallGrid),
    Moving(MovingWall),
}

impl Frontend {
    pub fn new(profile: &Profile) -> Self {
        let count = profile.instance_count();
        let wall = &profile.wall;
        match profile.mode {
            Mode::Single => Frontend::Single,
            Mode::Wall => Frontend::Wall(WallGrid::new(wall.grid, wall.canvas, count)),
            Mode::Moving => Frontend::Moving(MovingWall::new(&wall.moving, wall.canvas, count)),
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Frontend::Single)
    }

    /// Instance and hitbox under a canvas position.
    pub fn hit_test(&self, state: &ControllerState, x: i64, y: i64) -> Option<(Rect, InstanceId)> {
        match self {
            Frontend::Single => None,
            Frontend::Wall(wall) => wall.hit_test(x, y),
            Frontend::Moving(moving) => moving.hit_test(state, x, y),
        }
    }

    /// Resolves a positional action: an instance id on the wall, a compacted
    /// queue position on the moving wall.
    pub fn resolve_slot(&self, state: &mut ControllerState, slot: usize) -> Option<InstanceId> {
        match self {
            Frontend::Single => None,
            Frontend::Wall(_) => (slot < state.len()).then_some(slot),
            Frontend::Moving(_) => state.queued_at(slot),
        }
    }

    /// Instances considered by a bulk reset, in reset order.
    pub fn bulk_reset_targets(&self, state: &ControllerState) -> Vec<InstanceId> {
        match self {
            Frontend::Single => Vec::new(),
            Frontend::Wall(_) => (0..state.len()).collect(),
            Frontend::Moving(moving) => moving.first_group(state),
        }
    }

    /// Re-renders the layout after the queue or the locks changed. Only the
    /// moving wall with gaps keeps lock tombstones across a relayout.
    pub fn relayout(&self, state: &mut ControllerState) -> Option<Vec<SceneCommand>> {
        match self {
            Frontend::Moving(moving) => {
                if !moving.keeps_gaps() {
                    state.compact();
                }
                Some(moving.render(state))
            }
            Frontend::Wall(_) => {
                state.compact();
                None
            }
            Frontend::Single => None,
        }
    }

    /// Lock overlay shown on the fixed wall.
    pub fn lock_indicator(&self, id: InstanceId, locked: bool) -> Option<SceneCommand> {
        match self {
            Frontend::Wall(_) => Some(SceneCommand::SetVisible {
                target: super::lock_source(id),
                visible: locked,
            }),
            _ => None,
        }
    }
}
