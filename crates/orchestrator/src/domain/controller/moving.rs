//! Moving wall layout.
//!
//! The queue is poured into the configured groups in order, each group
//! holding `width * height` instances. Locked instances get their own group
//! when one is configured. Anything that does not fit is moved off-screen.

use api_types::InstanceId;
use api_types::Rect;
use api_types::SceneCommand;

use super::state::ControllerState;
use crate::config::GroupLayout;
use crate::config::MovingConfig;
use crate::config::Size;

#[derive(Debug, Clone)]
pub struct MovingWall {
    groups: Vec<GroupLayout>,
    locks: Option<GroupLayout>,
    gaps: bool,
    canvas: Size,
    count: usize,
}

fn slot_rect(group: &GroupLayout, index: usize) -> Rect {
    let columns = group.width.max(1);
    let rows = group.height.max(1);
    let (w, h) = (group.space.w / columns, group.space.h / rows);
    let index = index as u32;
    let (col, row) = (index % columns, index / columns);
    Rect::new(group.space.x + col * w, group.space.y + row * h, w, h)
}

impl MovingWall {
    pub fn new(config: &MovingConfig, canvas: Size, count: usize) -> Self {
        Self {
            groups: config.groups.clone(),
            locks: config.locks,
            gaps: config.gaps,
            canvas,
            count,
        }
    }

    /// Whether emptied queue slots stay in place until the next compaction.
    pub fn keeps_gaps(&self) -> bool {
        self.gaps
    }

    pub fn first_group_capacity(&self) -> usize {
        self.groups.first().map_or(0, GroupLayout::capacity)
    }

    /// Hitbox of every visible instance.
    pub fn layout(&self, state: &ControllerState) -> Vec<(Rect, InstanceId)> {
        let mut hitboxes = Vec::new();
        if let Some(group) = &self.locks {
            for (index, id) in state.locks().iter().take(group.capacity()).enumerate() {
                hitboxes.push((slot_rect(group, index), *id));
            }
        }

        let queue = state.queue_slots();
        let mut start = 0;
        for group in &self.groups {
            let end = (start + group.capacity()).min(queue.len());
            for (index, slot) in queue[start..end].iter().enumerate() {
                if let Some(id) = slot {
                    hitboxes.push((slot_rect(group, index), *id));
                }
            }
            start = end;
        }
        hitboxes
    }

    pub fn hit_test(&self, state: &ControllerState, x: i64, y: i64) -> Option<(Rect, InstanceId)> {
        self.layout(state)
            .into_iter()
            .find(|(rect, _)| rect.contains(x, y))
    }

    /// Transform for every instance source, hidden instances parked just
    /// outside the canvas.
    pub fn render(&self, state: &ControllerState) -> Vec<SceneCommand> {
        let layout = self.layout(state);
        let hidden = Rect::new(self.canvas.width, self.canvas.height, 1, 1);
        (0..self.count)
            .map(|id| {
                let rect = layout
                    .iter()
                    .find(|(_, visible)| *visible == id)
                    .map_or(hidden, |(rect, _)| *rect);
                SceneCommand::SetTransform {
                    target: super::wall_source(id),
                    rect,
                }
            })
            .collect()
    }

    /// Queued instances of the first group, last slot first.
    pub fn first_group(&self, state: &ControllerState) -> Vec<InstanceId> {
        let capacity = self.first_group_capacity();
        let queue = state.queue_slots();
        queue[..capacity.min(queue.len())]
            .iter()
            .rev()
            .flatten()
            .copied()
            .collect()
    }
}
