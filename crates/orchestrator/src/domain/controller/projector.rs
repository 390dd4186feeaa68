//! The projector window showing the overview.
//!
//! The scene canvas is letterboxed into the projector window, so pointer
//! positions have to be mapped back into canvas coordinates before they can
//! be hit tested.

use std::time::Duration;

use api_types::Rect;
use api_types::WindowRef;

use super::ControllerError;
use crate::config::GrabRetryConfig;
use crate::config::ProjectorConfig;
use crate::config::Size;
use crate::domain::ports::WindowError;
use crate::domain::ports::WindowSystem;

pub struct Projector {
    window: WindowRef,
    children: Vec<WindowRef>,
    width: u32,
    height: u32,
    display: Rect,
    scale: f64,
    confine: bool,
    retry: GrabRetryConfig,
    focused: bool,
    grabbed: bool,
}

/// Largest rectangle with the aspect ratio of `canvas` centered in a
/// `width` x `height` window, and its scale relative to the canvas.
pub fn letterbox(width: u32, height: u32, canvas: Size) -> (Rect, f64) {
    if canvas.width == 0 || canvas.height == 0 {
        return (Rect::new(0, 0, width, height), 1.0);
    }
    let scale_x = f64::from(width) / f64::from(canvas.width);
    let scale_y = f64::from(height) / f64::from(canvas.height);
    let scale = scale_x.min(scale_y);
    let w = (scale * f64::from(canvas.width)) as u32;
    let h = (scale * f64::from(canvas.height)) as u32;
    let x = (width / 2).saturating_sub(w / 2);
    let y = (height / 2).saturating_sub(h / 2);
    (Rect::new(x, y, w, h), scale)
}

impl Projector {
    /// A projector without a configured size is assumed to show the canvas
    /// unscaled.
    pub fn new(
        config: &ProjectorConfig,
        canvas: Size,
        confine: bool,
        retry: GrabRetryConfig,
    ) -> Self {
        let (width, height) = if config.width == 0 || config.height == 0 {
            (canvas.width, canvas.height)
        } else {
            (config.width, config.height)
        };
        let (display, scale) = letterbox(width, height, canvas);
        Self {
            window: config.window,
            children: config.children.clone(),
            width,
            height,
            display,
            scale,
            confine,
            retry,
            focused: false,
            grabbed: false,
        }
    }

    pub fn window(&self) -> WindowRef {
        self.window
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Maps a window position into canvas coordinates.
    pub fn to_video(&self, x: i32, y: i32) -> (i64, i64) {
        if self.scale <= 0.0 {
            return (i64::from(x), i64::from(y));
        }
        let x = (f64::from(x) - f64::from(self.display.x)) / self.scale;
        let y = (f64::from(y) - f64::from(self.display.y)) / self.scale;
        (x as i64, y as i64)
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        let (x, y) = (i64::from(x), i64::from(y));
        x >= 0 && y >= 0 && x <= i64::from(self.width) && y <= i64::from(self.height)
    }

    /// Tracks whether focus moved onto the projector and grabs or releases
    /// the pointer accordingly.
    pub async fn focus_changed(
        &mut self,
        window: WindowRef,
        windows: &dyn WindowSystem,
    ) -> Result<(), ControllerError> {
        self.focused = window == self.window || self.children.contains(&window);
        match (self.focused, self.grabbed) {
            (true, false) => self.grab(windows).await,
            (false, true) => self.release(windows).await,
            _ => Ok(()),
        }
    }

    /// Grabs the pointer, retrying with exponential backoff while another
    /// client holds the grab.
    pub async fn grab(&mut self, windows: &dyn WindowSystem) -> Result<(), ControllerError> {
        let attempts = self.retry.attempts.max(1);
        let mut delay = Duration::from_millis(self.retry.initial_delay_ms);
        for attempt in 1..=attempts {
            match windows.grab_pointer(self.window, self.confine).await {
                Ok(()) => {
                    self.grabbed = true;
                    tracing::debug!(window = %self.window, attempt, "grabbed pointer");
                    return Ok(());
                }
                Err(WindowError::Disconnected) => {
                    return Err(ControllerError::WindowSystem {
                        message: "disconnected while grabbing the pointer".to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("pointer grab attempt {attempt}/{attempts} failed: {e}");
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(self.retry.factor.max(1));
                    }
                }
            }
        }
        Err(ControllerError::PointerGrab { attempts })
    }

    /// Ungrabs the pointer if it is held.
    pub async fn release(&mut self, windows: &dyn WindowSystem) -> Result<(), ControllerError> {
        if !self.grabbed {
            return Ok(());
        }
        self.grabbed = false;
        super::window_result(windows.ungrab_pointer().await)
    }
}
