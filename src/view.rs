use eframe::egui;
use egui::{Pos2, Vec2, pos2};

pub const MIN_ZOOM: f32 = 0.05;
pub const MAX_ZOOM: f32 = 32.0;

/// Camera over the canvas: a screen-space pan plus a uniform zoom.
/// `screen = canvas * zoom + pan`. The shell adds the widget origin itself.
#[derive(Clone, Copy, Debug)]
pub struct Viewport {
    pub pan: Vec2,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { pan: Vec2::ZERO, zoom: 1.0 }
    }
}

impl Viewport {
    pub fn to_canvas(&self, screen: Pos2) -> Pos2 {
        pos2(
            (screen.x - self.pan.x) / self.zoom,
            (screen.y - self.pan.y) / self.zoom,
        )
    }

    pub fn to_screen(&self, canvas: Pos2) -> Pos2 {
        pos2(
            canvas.x * self.zoom + self.pan.x,
            canvas.y * self.zoom + self.pan.y,
        )
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan += delta;
    }

    /// Multiply the zoom by `factor`, keeping the canvas point under
    /// `screen_anchor` stationary on screen.
    pub fn zoom_at(&mut self, screen_anchor: Pos2, factor: f32) {
        let anchor = self.to_canvas(screen_anchor);
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        // Re-solve pan so anchor maps back to screen_anchor
        self.pan = screen_anchor.to_vec2() - anchor.to_vec2() * self.zoom;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }
}
