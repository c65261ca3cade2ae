use crate::log_warn;
use eframe::egui;
use egui::{Pos2, Rect, pos2};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use uuid::Uuid;

// ============================================================================
// BLEND MODES — pure per-channel functions, backend-independent
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    /// Returns all blend modes for UI display
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::ColorDodge => "color-dodge",
            BlendMode::ColorBurn => "color-burn",
            BlendMode::HardLight => "hard-light",
            BlendMode::SoftLight => "soft-light",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// Parse a blend-mode name. Unknown strings fall back to Normal.
    pub fn from_name(name: &str) -> Self {
        match name {
            "multiply" => BlendMode::Multiply,
            "screen" => BlendMode::Screen,
            "overlay" => BlendMode::Overlay,
            "darken" => BlendMode::Darken,
            "lighten" => BlendMode::Lighten,
            "color-dodge" => BlendMode::ColorDodge,
            "color-burn" => BlendMode::ColorBurn,
            "hard-light" => BlendMode::HardLight,
            "soft-light" => BlendMode::SoftLight,
            "difference" => BlendMode::Difference,
            "exclusion" => BlendMode::Exclusion,
            _ => BlendMode::Normal,
        }
    }

    /// Per-channel blend function on normalized [0,1] values.
    fn channel(self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal => top,
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Overlay => overlay_channel(base, top),
            BlendMode::Darken => base.min(top),
            BlendMode::Lighten => base.max(top),
            BlendMode::ColorDodge => {
                if top >= 1.0 { 1.0 } else { (base / (1.0 - top)).min(1.0) }
            }
            BlendMode::ColorBurn => {
                if top <= 0.0 { 0.0 } else { (1.0 - (1.0 - base) / top).max(0.0) }
            }
            BlendMode::HardLight => overlay_channel(top, base),
            BlendMode::SoftLight => soft_light_channel(base, top),
            BlendMode::Difference => (base - top).abs(),
            BlendMode::Exclusion => base + top - 2.0 * base * top,
        }
    }
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

/// Composite `top` over `base` using `mode` and an extra layer `opacity`.
/// Both pixels are straight (unpremultiplied) RGBA8.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    // Fast path: fully transparent top pixel — nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }

    // Fast path: Normal blend, full opacity, fully opaque top pixel — overwrite
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);

    let base_r = base[0] as f32 / 255.0;
    let base_g = base[1] as f32 / 255.0;
    let base_b = base[2] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0;

    let top_r = top[0] as f32 / 255.0;
    let top_g = top[1] as f32 / 255.0;
    let top_b = top[2] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let r = mode.channel(base_r, top_r);
    let g = mode.channel(base_g, top_g);
    let b = mode.channel(base_b, top_b);

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let out_r = (r * top_a + base_r * base_a * (1.0 - top_a)) / out_a;
    let out_g = (g * top_a + base_g * base_a * (1.0 - top_a)) / out_a;
    let out_b = (b * top_a + base_b * base_a * (1.0 - top_a)) / out_a;

    Rgba([
        (out_r * 255.0).clamp(0.0, 255.0) as u8,
        (out_g * 255.0).clamp(0.0, 255.0) as u8,
        (out_b * 255.0).clamp(0.0, 255.0) as u8,
        (out_a * 255.0).clamp(0.0, 255.0) as u8,
    ])
}

// ============================================================================
// LAYER
// ============================================================================

pub struct Layer {
    pub id: Uuid,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub pixels: RgbaImage,
}

impl Layer {
    pub fn new(name: String, width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        let pixels = if fill_color[3] > 0 {
            RgbaImage::from_pixel(width, height, fill_color)
        } else {
            RgbaImage::new(width, height)
        };
        Self {
            id: Uuid::new_v4(),
            name,
            visible: true,
            locked: false,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            pixels,
        }
    }
}

/// Partial property update for `CanvasState::update_layer`.
#[derive(Default, Clone)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub opacity: Option<f32>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
    pub blend_mode: Option<BlendMode>,
}

// ============================================================================
// SELECTION
// ============================================================================

/// Pixels lifted out of the active layer while a selection is being
/// transformed. The buffer's dimensions are the selection rect's size at
/// extraction time; the current rect width/height express the scale.
pub struct ExtractedBuffer {
    pub pixels: RgbaImage,
}

/// Whether the selection's pixels still live in the layer or in a
/// floating buffer pending commit.
pub enum SelectionContent {
    NotExtracted,
    Extracted(ExtractedBuffer),
}

/// A rectangular or polygonal selection in canvas coordinates.
///
/// `rect` is always the authoritative bounds; for polygon selections the
/// vertices are stored unrotated and `rotation` applies to the whole shape
/// about the rect center, as it does for rectangles.
pub struct Selection {
    pub rect: Rect,
    pub polygon: Option<Vec<Pos2>>,
    pub rotation: f32,
    pub content: SelectionContent,
}

impl Selection {
    pub fn rectangle(rect: Rect) -> Self {
        Self {
            rect,
            polygon: None,
            rotation: 0.0,
            content: SelectionContent::NotExtracted,
        }
    }

    /// Build a polygon selection from ≥3 vertices; returns None otherwise.
    pub fn polygon(points: Vec<Pos2>) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let mut min = points[0];
        let mut max = points[0];
        for p in &points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some(Self {
            rect: Rect::from_min_max(min, max),
            polygon: Some(points),
            rotation: 0.0,
            content: SelectionContent::NotExtracted,
        })
    }

    pub fn center(&self) -> Pos2 {
        self.rect.center()
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self.content, SelectionContent::Extracted(_))
    }
}

// ============================================================================
// CANVAS STATE — the layer store
// ============================================================================

/// Change-log entry drained by the shell after each engine call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanvasEvent {
    LayerAdded { index: usize },
    LayerRemoved { index: usize },
    LayersReordered { from: usize, to: usize },
    ActiveChanged { index: usize },
    LayerUpdated { index: usize },
    CanvasResized { width: u32, height: u32 },
}

pub struct CanvasState {
    pub layers: Vec<Layer>,
    pub active_layer_index: usize,
    pub width: u32,
    pub height: u32,
    events: Vec<CanvasEvent>,
}

impl CanvasState {
    /// New canvas with a solid white background layer.
    pub fn new(width: u32, height: u32) -> Self {
        let mut state = Self {
            layers: Vec::new(),
            active_layer_index: 0,
            width,
            height,
            events: Vec::new(),
        };
        state.add_layer("Background".to_string(), Some(Rgba([255, 255, 255, 255])));
        state.events.clear();
        state
    }

    /// Drain pending change notifications.
    pub fn take_events(&mut self) -> Vec<CanvasEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layers.get(self.active_layer_index)
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.active_layer_index)
    }

    // ---- stack operations ---------------------------------------------------

    /// Append a new layer on top of the stack and make it active.
    /// `fill` is only used for the initial background layer; tool-created
    /// layers start fully transparent.
    pub fn add_layer(&mut self, name: String, fill: Option<Rgba<u8>>) -> usize {
        let fill = fill.unwrap_or(Rgba([0, 0, 0, 0]));
        let layer = Layer::new(name, self.width, self.height, fill);
        self.layers.push(layer);
        let index = self.layers.len() - 1;
        self.active_layer_index = index;
        self.events.push(CanvasEvent::LayerAdded { index });
        self.events.push(CanvasEvent::ActiveChanged { index });
        index
    }

    /// Remove a layer. Refuses the last remaining layer (editing guard) and
    /// invalid indices. Snapshot restoration bypasses this via `clear_layers`.
    pub fn remove_layer(&mut self, index: usize) -> bool {
        if index >= self.layers.len() {
            log_warn!("remove_layer: index {} out of range ({})", index, self.layers.len());
            return false;
        }
        if self.layers.len() <= 1 {
            log_warn!("remove_layer: refusing to remove the last layer");
            return false;
        }
        self.layers.remove(index);
        if self.active_layer_index >= self.layers.len() {
            self.active_layer_index = self.layers.len() - 1;
        } else if self.active_layer_index > index {
            self.active_layer_index -= 1;
        }
        self.events.push(CanvasEvent::LayerRemoved { index });
        self.events.push(CanvasEvent::ActiveChanged { index: self.active_layer_index });
        true
    }

    /// Empty the stack entirely. Only used when rebuilding from a snapshot,
    /// where the normal last-layer guard must not apply.
    pub(crate) fn clear_layers(&mut self) {
        self.layers.clear();
        self.active_layer_index = 0;
    }

    /// Reorder a layer. The active index follows whichever layer was active,
    /// not the slot.
    pub fn move_layer(&mut self, from: usize, to: usize) -> bool {
        if from >= self.layers.len() || to >= self.layers.len() {
            log_warn!("move_layer: index out of range ({} -> {})", from, to);
            return false;
        }
        if from == to {
            return true;
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);

        if self.active_layer_index == from {
            self.active_layer_index = to;
        } else if from < self.active_layer_index && to >= self.active_layer_index {
            self.active_layer_index -= 1;
        } else if from > self.active_layer_index && to <= self.active_layer_index {
            self.active_layer_index += 1;
        }
        self.events.push(CanvasEvent::LayersReordered { from, to });
        true
    }

    /// Composite layer `index` onto `index - 1` using the upper layer's
    /// opacity and blend mode, then remove the upper layer.
    pub fn merge_down(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.layers.len() {
            log_warn!("merge_down: invalid index {}", index);
            return false;
        }
        let upper = self.layers.remove(index);
        let lower = &mut self.layers[index - 1];
        for y in 0..self.height {
            for x in 0..self.width {
                let base = *lower.pixels.get_pixel(x, y);
                let top = *upper.pixels.get_pixel(x, y);
                lower
                    .pixels
                    .put_pixel(x, y, blend_pixel(base, top, upper.blend_mode, upper.opacity));
            }
        }
        self.active_layer_index = index - 1;
        self.events.push(CanvasEvent::LayerRemoved { index });
        self.events.push(CanvasEvent::ActiveChanged { index: index - 1 });
        true
    }

    /// Apply a partial property update. Opacity is clamped to [0, 1].
    pub fn update_layer(&mut self, index: usize, patch: LayerPatch) -> bool {
        let Some(layer) = self.layers.get_mut(index) else {
            log_warn!("update_layer: index {} out of range", index);
            return false;
        };
        if let Some(name) = patch.name {
            layer.name = name;
        }
        if let Some(opacity) = patch.opacity {
            layer.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(visible) = patch.visible {
            layer.visible = visible;
        }
        if let Some(locked) = patch.locked {
            layer.locked = locked;
        }
        if let Some(mode) = patch.blend_mode {
            layer.blend_mode = mode;
        }
        self.events.push(CanvasEvent::LayerUpdated { index });
        true
    }

    /// Insert a copy of layer `index` directly above it and make it active.
    pub fn duplicate_layer(&mut self, index: usize) -> Option<usize> {
        let source = self.layers.get(index)?;
        let mut copy = Layer::new(
            format!("{} copy", source.name),
            self.width,
            self.height,
            Rgba([0, 0, 0, 0]),
        );
        copy.pixels = source.pixels.clone();
        copy.visible = source.visible;
        copy.opacity = source.opacity;
        copy.blend_mode = source.blend_mode;

        let new_index = index + 1;
        self.layers.insert(new_index, copy);
        self.active_layer_index = new_index;
        self.events.push(CanvasEvent::LayerAdded { index: new_index });
        self.events.push(CanvasEvent::ActiveChanged { index: new_index });
        Some(new_index)
    }

    // ---- artboard resize ----------------------------------------------------

    /// Resize the artboard. Every layer's surface is reallocated in lockstep;
    /// old content is centered via an integer offset and hard-cropped, new
    /// area is transparent.
    pub fn resize(&mut self, new_w: u32, new_h: u32) -> bool {
        if new_w == 0 || new_h == 0 {
            log_warn!("resize: refusing zero dimension {}x{}", new_w, new_h);
            return false;
        }
        let off_x = (new_w as i64 - self.width as i64).div_euclid(2);
        let off_y = (new_h as i64 - self.height as i64).div_euclid(2);

        for layer in &mut self.layers {
            let mut next = RgbaImage::new(new_w, new_h);
            for y in 0..self.height {
                let dy = y as i64 + off_y;
                if dy < 0 || dy >= new_h as i64 {
                    continue;
                }
                for x in 0..self.width {
                    let dx = x as i64 + off_x;
                    if dx < 0 || dx >= new_w as i64 {
                        continue;
                    }
                    next.put_pixel(dx as u32, dy as u32, *layer.pixels.get_pixel(x, y));
                }
            }
            layer.pixels = next;
        }
        self.width = new_w;
        self.height = new_h;
        self.events.push(CanvasEvent::CanvasResized { width: new_w, height: new_h });
        true
    }

    // ---- compositing --------------------------------------------------------

    /// Flatten the visible stack bottom→top into one surface.
    pub fn composite(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let w = self.width as usize;
        let layers = &self.layers;

        out.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
            let y = y as u32;
            for layer in layers.iter().filter(|l| l.visible) {
                for x in 0..w {
                    let o = x * 4;
                    let base = Rgba([row[o], row[o + 1], row[o + 2], row[o + 3]]);
                    let top = *layer.pixels.get_pixel(x as u32, y);
                    let px = blend_pixel(base, top, layer.blend_mode, layer.opacity);
                    row[o] = px[0];
                    row[o + 1] = px[1];
                    row[o + 2] = px[2];
                    row[o + 3] = px[3];
                }
            }
        });
        out
    }

    /// Composite a single pixel, clamped into canvas bounds. Used by the
    /// color dropper, which samples the flattened image, not the active layer.
    pub fn sample_composite(&self, x: i32, y: i32) -> Rgba<u8> {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        let mut px = Rgba([0, 0, 0, 0]);
        for layer in self.layers.iter().filter(|l| l.visible) {
            px = blend_pixel(px, *layer.pixels.get_pixel(x, y), layer.blend_mode, layer.opacity);
        }
        px
    }

    /// Canvas bounds as a float rect, for clipping and hit tests.
    pub fn bounds(&self) -> Rect {
        Rect::from_min_max(pos2(0.0, 0.0), pos2(self.width as f32, self.height as f32))
    }
}

// ============================================================================
// TESTS
// ============================================================================
