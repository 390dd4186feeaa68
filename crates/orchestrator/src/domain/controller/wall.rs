use api_types::InstanceId;
use api_types::Rect;

use crate::config::Size;

/// Fixed grid: instance `row * width + col` is always shown in cell
/// `(col, row)` of the canvas.
#[derive(Debug, Clone)]
pub struct WallGrid {
    grid: Size,
    canvas: Size,
    count: usize,
}

impl WallGrid {
    pub fn new(grid: Size, canvas: Size, count: usize) -> Self {
        Self {
            grid,
            canvas,
            count,
        }
    }

    fn cell_size(&self) -> (u32, u32) {
        (
            self.canvas.width / self.grid.width.max(1),
            self.canvas.height / self.grid.height.max(1),
        )
    }

    pub fn cell(&self, id: InstanceId) -> Option<Rect> {
        if id >= self.count {
            return None;
        }
        let columns = self.grid.width.max(1) as usize;
        let (w, h) = self.cell_size();
        let (col, row) = ((id % columns) as u32, (id / columns) as u32);
        Some(Rect::new(col * w, row * h, w, h))
    }

    /// Instance under a canvas position.
    pub fn hit_test(&self, x: i64, y: i64) -> Option<(Rect, InstanceId)> {
        let (w, h) = self.cell_size();
        if x < 0 || y < 0 || w == 0 || h == 0 {
            return None;
        }
        let col = x / i64::from(w);
        let row = y / i64::from(h);
        if col >= i64::from(self.grid.width) || row >= i64::from(self.grid.height) {
            return None;
        }
        let id = (row * i64::from(self.grid.width) + col) as usize;
        Some((self.cell(id)?, id))
    }
}
