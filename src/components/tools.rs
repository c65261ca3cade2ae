use eframe::egui;
use egui::{Modifiers, Pos2, Rect, pos2, vec2};
use image::{Rgba, RgbaImage};

use crate::canvas::{CanvasState, ExtractedBuffer, Selection, SelectionContent, blend_pixel};
use crate::canvas::BlendMode;
use crate::log_warn;
use crate::ops::transform::{point_in_selection, to_local, to_transformed, transformed_corners};

// ============================================================================
// TOOLS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
    ColorDropper,
    PaintBucket,
    Marquee,
    Lasso,
    Move,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[
            Tool::Brush,
            Tool::Eraser,
            Tool::ColorDropper,
            Tool::PaintBucket,
            Tool::Marquee,
            Tool::Lasso,
            Tool::Move,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
            Tool::ColorDropper => "Dropper",
            Tool::PaintBucket => "Bucket",
            Tool::Marquee => "Marquee",
            Tool::Lasso => "Lasso",
            Tool::Move => "Move",
        }
    }
}

/// Radius and edge softness for the brush and eraser, both in the 0–50
/// range the shell's sliders expose.
#[derive(Clone, Copy, Debug)]
pub struct BrushParams {
    pub size: f32,
    pub feather: f32,
}

impl Default for BrushParams {
    fn default() -> Self {
        Self { size: 10.0, feather: 0.0 }
    }
}

/// Square overlay handle edge length, in screen pixels.
pub const HANDLE_SIZE: f32 = 8.0;
/// Screen-space gap between the top edge midpoint and the rotation handle.
pub const ROTATION_HANDLE_OFFSET: f32 = 24.0;
/// Pointer events this far outside the canvas still drive a stroke; writes
/// are clipped to the surface.
const DRAW_MARGIN: f32 = 200.0;
/// Marquee rects thinner than this on either axis are treated as mis-clicks.
const MIN_MARQUEE_SIZE: f32 = 3.0;
/// Squared distance a lasso pointer must travel before a new vertex lands.
const LASSO_VERTEX_DIST_SQ: f32 = 1.5;
const ROTATION_SNAP: f32 = 15.0 * std::f32::consts::PI / 180.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleHandle {
    TopLeft,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
    Left,
}

impl ScaleHandle {
    pub fn all() -> &'static [ScaleHandle] {
        &[
            ScaleHandle::TopLeft,
            ScaleHandle::Top,
            ScaleHandle::TopRight,
            ScaleHandle::Right,
            ScaleHandle::BottomRight,
            ScaleHandle::Bottom,
            ScaleHandle::BottomLeft,
            ScaleHandle::Left,
        ]
    }

    pub fn is_corner(&self) -> bool {
        matches!(
            self,
            ScaleHandle::TopLeft | ScaleHandle::TopRight | ScaleHandle::BottomRight | ScaleHandle::BottomLeft
        )
    }

    /// Handle anchor on the unrotated rect.
    pub fn local_pos(&self, rect: Rect) -> Pos2 {
        match self {
            ScaleHandle::TopLeft => rect.left_top(),
            ScaleHandle::Top => rect.center_top(),
            ScaleHandle::TopRight => rect.right_top(),
            ScaleHandle::Right => rect.right_center(),
            ScaleHandle::BottomRight => rect.right_bottom(),
            ScaleHandle::Bottom => rect.center_bottom(),
            ScaleHandle::BottomLeft => rect.left_bottom(),
            ScaleHandle::Left => rect.left_center(),
        }
    }
}

/// Overlay positions for all eight scale handles, honoring rotation.
pub fn handle_positions(rect: Rect, rotation: f32) -> [(ScaleHandle, Pos2); 8] {
    let center = rect.center();
    let mut out = [(ScaleHandle::TopLeft, Pos2::ZERO); 8];
    for (slot, &handle) in out.iter_mut().zip(ScaleHandle::all()) {
        *slot = (handle, to_transformed(handle.local_pos(rect), center, rotation));
    }
    out
}

/// Rotation grip position: above the top edge midpoint, rotated with the
/// selection, with the gap held constant on screen via `zoom`.
pub fn rotation_handle_pos(rect: Rect, rotation: f32, zoom: f32) -> Pos2 {
    let local = pos2(rect.center().x, rect.min.y - ROTATION_HANDLE_OFFSET / zoom.max(0.001));
    to_transformed(local, rect.center(), rotation)
}

// ============================================================================
// TOOL STATE MACHINE
// ============================================================================

enum Gesture {
    Idle,
    Paint { last: Pos2 },
    Marquee { anchor: Pos2 },
    Lasso,
    MoveDrag { grab_offset: egui::Vec2 },
    MoveScale { handle: ScaleHandle, start_rect: Rect },
    MoveRotate { press_angle: f32, start_rotation: f32 },
}

/// Owns the current tool, its parameters, and the live selection, and turns
/// pointer/keyboard input into layer mutations. The shell forwards canvas-
/// space positions; after `pointer_released` reports a description, the shell
/// records a history snapshot.
pub struct ToolState {
    pub tool: Tool,
    pub brush: BrushParams,
    pub eraser: BrushParams,
    pub color: Rgba<u8>,
    selection: Option<Selection>,
    lasso_points: Vec<Pos2>,
    gesture: Gesture,
    /// Description of a mutation completed during the current gesture,
    /// handed out by `pointer_released`.
    pending: Option<&'static str>,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            tool: Tool::Brush,
            brush: BrushParams::default(),
            eraser: BrushParams { size: 10.0, feather: 0.0 },
            color: Rgba([0, 0, 0, 255]),
            selection: None,
            lasso_points: Vec::new(),
            gesture: Gesture::Idle,
            pending: None,
        }
    }
}

impl ToolState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn lasso_in_progress(&self) -> &[Pos2] {
        &self.lasso_points
    }

    /// Switch tools. An unfinished lasso outline is discarded; the selection
    /// itself survives so Move can still pick it up.
    pub fn set_tool(&mut self, tool: Tool) {
        if self.tool == Tool::Lasso && tool != Tool::Lasso {
            self.lasso_points.clear();
        }
        self.tool = tool;
        self.gesture = Gesture::Idle;
    }

    /// Install a selection programmatically, committing any previous one.
    /// Returns true when the replacement flushed extracted pixels into the
    /// layer (the caller should snapshot).
    pub fn set_selection(&mut self, canvas: &mut CanvasState, selection: Selection) -> bool {
        let committed = self.clear_selection(canvas);
        self.selection = Some(selection);
        committed
    }

    /// Drop the selection, compositing any floating pixels back into the
    /// active layer first. The single release point for the extracted buffer.
    pub fn clear_selection(&mut self, canvas: &mut CanvasState) -> bool {
        let Some(mut selection) = self.selection.take() else {
            return false;
        };
        let content = std::mem::replace(&mut selection.content, SelectionContent::NotExtracted);
        match content {
            SelectionContent::NotExtracted => false,
            SelectionContent::Extracted(buffer) => {
                commit_buffer(canvas, &selection, &buffer);
                true
            }
        }
    }

    /// Throw away the floating buffer without compositing it. Used before
    /// undo/redo, where an earlier snapshot already holds these pixels.
    pub fn discard_selection(&mut self) {
        self.selection = None;
        self.lasso_points.clear();
        self.gesture = Gesture::Idle;
    }

    // ---- pointer input ------------------------------------------------------

    pub fn pointer_pressed(
        &mut self,
        canvas: &mut CanvasState,
        pos: Pos2,
        _modifiers: Modifiers,
        zoom: f32,
    ) {
        self.pending = None;
        match self.tool {
            Tool::Brush | Tool::Eraser => {
                if !within_draw_margin(canvas, pos) {
                    return;
                }
                let Some(layer) = canvas.active_layer() else { return };
                if layer.locked {
                    log_warn!("stroke refused: layer '{}' is locked", layer.name);
                    return;
                }
                self.stamp(canvas, pos);
                self.gesture = Gesture::Paint { last: pos };
                self.pending = Some(if self.tool == Tool::Brush {
                    "Brush stroke"
                } else {
                    "Eraser stroke"
                });
            }
            Tool::ColorDropper => {
                self.color = canvas.sample_composite(pos.x.floor() as i32, pos.y.floor() as i32);
            }
            Tool::PaintBucket => {
                if !canvas.bounds().contains(pos) {
                    return;
                }
                let Some(layer) = canvas.active_layer() else { return };
                if layer.locked {
                    log_warn!("fill refused: layer '{}' is locked", layer.name);
                    return;
                }
                if flood_fill(canvas, pos.x as u32, pos.y as u32, self.color) {
                    self.pending = Some("Paint bucket fill");
                }
            }
            Tool::Marquee => {
                if self.clear_selection(canvas) {
                    self.pending = Some("Commit selection");
                }
                self.gesture = Gesture::Marquee { anchor: pos };
            }
            Tool::Lasso => {
                if self.lasso_points.is_empty() && self.clear_selection(canvas) {
                    self.pending = Some("Commit selection");
                }
                self.push_lasso_vertex(pos);
                self.gesture = Gesture::Lasso;
            }
            Tool::Move => {
                let Some(selection) = &self.selection else { return };
                let rect = selection.rect;
                let rotation = selection.rotation;
                let center = rect.center();
                let tolerance = (HANDLE_SIZE * 0.5 + 2.0) / zoom.max(0.001);

                if pos.distance(rotation_handle_pos(rect, rotation, zoom)) <= tolerance {
                    if self.ensure_extracted(canvas) {
                        let angle = (pos - center).angle();
                        self.gesture = Gesture::MoveRotate { press_angle: angle, start_rotation: rotation };
                    }
                } else if let Some(handle) = hit_handle(rect, rotation, pos, tolerance) {
                    if self.ensure_extracted(canvas) {
                        self.gesture = Gesture::MoveScale { handle, start_rect: rect };
                    }
                } else if point_in_selection(pos, selection) {
                    if self.ensure_extracted(canvas) {
                        self.gesture = Gesture::MoveDrag { grab_offset: pos - rect.min };
                    }
                } else if self.clear_selection(canvas) {
                    self.pending = Some("Commit selection");
                }
            }
        }
    }

    pub fn pointer_moved(
        &mut self,
        canvas: &mut CanvasState,
        pos: Pos2,
        modifiers: Modifiers,
        _zoom: f32,
    ) {
        match &self.gesture {
            Gesture::Idle => {}
            Gesture::Paint { last } => {
                let last = *last;
                if within_draw_margin(canvas, pos) {
                    self.stroke_segment(canvas, last, pos);
                }
                self.gesture = Gesture::Paint { last: pos };
            }
            Gesture::Marquee { anchor } => {
                let anchor = *anchor;
                let rect = Rect::from_two_pos(anchor, pos);
                match &mut self.selection {
                    Some(sel) if !sel.is_extracted() => sel.rect = rect,
                    _ => self.selection = Some(Selection::rectangle(rect)),
                }
            }
            Gesture::Lasso => {
                self.push_lasso_vertex(pos);
            }
            Gesture::MoveDrag { grab_offset } => {
                let offset = *grab_offset;
                if let Some(sel) = &mut self.selection {
                    let size = sel.rect.size();
                    sel.rect = Rect::from_min_size(pos - offset, size);
                }
            }
            Gesture::MoveScale { handle, start_rect } => {
                let (handle, start_rect) = (*handle, *start_rect);
                if let Some(sel) = &mut self.selection {
                    let local = to_local(pos, start_rect.center(), sel.rotation);
                    sel.rect = scale_rect(start_rect, handle, local, modifiers.shift);
                }
            }
            Gesture::MoveRotate { press_angle, start_rotation } => {
                let (press_angle, start_rotation) = (*press_angle, *start_rotation);
                if let Some(sel) = &mut self.selection {
                    let angle = (pos - sel.rect.center()).angle();
                    let mut rotation = start_rotation + (angle - press_angle);
                    if modifiers.shift {
                        rotation = (rotation / ROTATION_SNAP).round() * ROTATION_SNAP;
                    }
                    sel.rotation = rotation;
                }
            }
        }
    }

    /// End the gesture. Returns the description of any mutation the gesture
    /// applied, for the shell to pass to the history manager.
    pub fn pointer_released(&mut self, canvas: &mut CanvasState, pos: Pos2) -> Option<&'static str> {
        let gesture = std::mem::replace(&mut self.gesture, Gesture::Idle);
        match gesture {
            Gesture::Idle | Gesture::Lasso => {}
            Gesture::Paint { last } => {
                if within_draw_margin(canvas, pos) && pos != last {
                    self.stroke_segment(canvas, last, pos);
                }
            }
            Gesture::Marquee { anchor } => {
                let rect = Rect::from_two_pos(anchor, pos);
                if rect.width() < MIN_MARQUEE_SIZE || rect.height() < MIN_MARQUEE_SIZE {
                    // Mis-click, not a selection
                    self.selection = None;
                } else {
                    self.selection = Some(Selection::rectangle(rect));
                }
            }
            Gesture::MoveDrag { .. } => {
                return self.pending.take().or(Some("Move selection"));
            }
            Gesture::MoveScale { .. } => {
                return self.pending.take().or(Some("Scale selection"));
            }
            Gesture::MoveRotate { .. } => {
                return self.pending.take().or(Some("Rotate selection"));
            }
        }
        self.pending.take()
    }

    // ---- keyboard input -----------------------------------------------------

    /// Finalize an in-progress lasso. With three or more vertices the outline
    /// becomes a polygon selection (any previous selection is committed
    /// first) and the tool switches to Move; with fewer it is discarded.
    /// Returns true when the replacement flushed floating pixels into the
    /// layer, so the caller should snapshot.
    pub fn key_enter(&mut self, canvas: &mut CanvasState) -> bool {
        if self.lasso_points.is_empty() {
            return false;
        }
        let points = std::mem::take(&mut self.lasso_points);
        if let Some(selection) = Selection::polygon(points) {
            let committed = self.set_selection(canvas, selection);
            self.tool = Tool::Move;
            committed
        } else {
            false
        }
    }

    /// Cancel an in-progress lasso outline.
    pub fn key_escape(&mut self) {
        self.lasso_points.clear();
        if matches!(self.gesture, Gesture::Lasso) {
            self.gesture = Gesture::Idle;
        }
    }

    // ---- stroke internals ---------------------------------------------------

    fn params(&self) -> BrushParams {
        if self.tool == Tool::Eraser { self.eraser } else { self.brush }
    }

    fn push_lasso_vertex(&mut self, pos: Pos2) {
        match self.lasso_points.last() {
            Some(last) => {
                let d = *last - pos;
                if d.x * d.x + d.y * d.y > LASSO_VERTEX_DIST_SQ {
                    self.lasso_points.push(pos);
                }
            }
            None => self.lasso_points.push(pos),
        }
    }

    fn stroke_segment(&mut self, canvas: &mut CanvasState, from: Pos2, to: Pos2) {
        let params = self.params();
        let radius = params.size.max(0.5);
        let step = if params.feather > 0.0 { (radius * 0.3).max(1.0) } else { 1.0 };
        let dist = from.distance(to);
        let steps = (dist / step).ceil().max(1.0) as u32;
        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            self.stamp(canvas, from + (to - from) * t);
        }
    }

    fn stamp(&mut self, canvas: &mut CanvasState, center: Pos2) {
        let params = self.params();
        let erase = self.tool == Tool::Eraser;
        let color = self.color;
        let (w, h) = (canvas.width, canvas.height);
        let Some(layer) = canvas.active_layer_mut() else { return };
        if layer.locked {
            return;
        }
        stamp_dab(&mut layer.pixels, w, h, center, params, color, erase);
    }

    // ---- selection extraction & commit --------------------------------------

    /// Lift the selection's pixels out of the active layer. Runs at most once
    /// per selection lifetime, on the first move/scale/rotate press. Returns
    /// false when there is nothing to extract or the layer is locked, in
    /// which case no gesture should engage.
    fn ensure_extracted(&mut self, canvas: &mut CanvasState) -> bool {
        let Some(selection) = &mut self.selection else { return false };
        if selection.is_extracted() {
            return true;
        }
        let rect = selection.rect;
        let polygon = selection.polygon.clone();
        let (canvas_w, canvas_h) = (canvas.width as i32, canvas.height as i32);
        let Some(layer) = canvas.active_layer_mut() else { return false };
        if layer.locked {
            log_warn!("selection extraction refused: layer '{}' is locked", layer.name);
            return false;
        }

        let x0 = rect.min.x.round() as i32;
        let y0 = rect.min.y.round() as i32;
        let bw = rect.width().round().max(1.0) as u32;
        let bh = rect.height().round().max(1.0) as u32;
        let mut pixels = RgbaImage::new(bw, bh);

        for by in 0..bh {
            for bx in 0..bw {
                let cx = x0 + bx as i32;
                let cy = y0 + by as i32;
                if cx < 0 || cy < 0 || cx >= canvas_w || cy >= canvas_h {
                    continue;
                }
                if let Some(poly) = &polygon {
                    let p = pos2(cx as f32 + 0.5, cy as f32 + 0.5);
                    if !crate::ops::transform::point_in_polygon(p, poly) {
                        continue;
                    }
                }
                let (cx, cy) = (cx as u32, cy as u32);
                pixels.put_pixel(bx, by, *layer.pixels.get_pixel(cx, cy));
                layer.pixels.put_pixel(cx, cy, Rgba([0, 0, 0, 0]));
            }
        }
        selection.content = SelectionContent::Extracted(ExtractedBuffer { pixels });
        true
    }
}

/// Composite a floating buffer back onto the active layer at the selection's
/// current rect, rotation, and scale. Nearest-neighbor sampling; destination
/// pixels outside the canvas are dropped.
fn commit_buffer(canvas: &mut CanvasState, selection: &Selection, buffer: &ExtractedBuffer) {
    let rect = selection.rect;
    if rect.width() <= 0.0 || rect.height() <= 0.0 {
        return;
    }
    let center = rect.center();
    let rotation = selection.rotation;
    let (bw, bh) = buffer.pixels.dimensions();
    let (canvas_w, canvas_h) = (canvas.width as i32, canvas.height as i32);
    let Some(layer) = canvas.active_layer_mut() else { return };

    // Canvas-space footprint of the transformed rect
    let corners = transformed_corners(rect, rotation);
    let mut min = corners[0];
    let mut max = corners[0];
    for c in &corners[1..] {
        min.x = min.x.min(c.x);
        min.y = min.y.min(c.y);
        max.x = max.x.max(c.x);
        max.y = max.y.max(c.y);
    }
    let x0 = (min.x.floor() as i32).max(0);
    let y0 = (min.y.floor() as i32).max(0);
    let x1 = (max.x.ceil() as i32).min(canvas_w);
    let y1 = (max.y.ceil() as i32).min(canvas_h);

    for cy in y0..y1 {
        for cx in x0..x1 {
            let p = pos2(cx as f32 + 0.5, cy as f32 + 0.5);
            let local = to_local(p, center, rotation);
            if !rect.contains(local) {
                continue;
            }
            let u = ((local.x - rect.min.x) / rect.width() * bw as f32).floor();
            let v = ((local.y - rect.min.y) / rect.height() * bh as f32).floor();
            let u = (u as i64).clamp(0, bw as i64 - 1) as u32;
            let v = (v as i64).clamp(0, bh as i64 - 1) as u32;
            let src = *buffer.pixels.get_pixel(u, v);
            if src[3] == 0 {
                continue;
            }
            let (cx, cy) = (cx as u32, cy as u32);
            let dst = *layer.pixels.get_pixel(cx, cy);
            layer.pixels.put_pixel(cx, cy, blend_pixel(dst, src, BlendMode::Normal, 1.0));
        }
    }
}

// ============================================================================
// STAMPING
// ============================================================================

fn within_draw_margin(canvas: &CanvasState, pos: Pos2) -> bool {
    canvas.bounds().expand(DRAW_MARGIN).contains(pos)
}

/// Paint (or erase) one dab. Solid dabs are hard-edged disks; feathered dabs
/// fall off radially over the outer 80% of the radius, with overall alpha
/// `0.3 + feather/100 * 0.4` so repeated passes build up gradually.
fn stamp_dab(
    pixels: &mut RgbaImage,
    canvas_w: u32,
    canvas_h: u32,
    center: Pos2,
    params: BrushParams,
    color: Rgba<u8>,
    erase: bool,
) {
    let radius = params.size.max(0.5);
    let feathered = params.feather > 0.0;
    let stamp_alpha = if feathered {
        0.3 + params.feather / 100.0 * 0.4
    } else {
        1.0
    };

    let x0 = ((center.x - radius).floor() as i32).max(0);
    let y0 = ((center.y - radius).floor() as i32).max(0);
    let x1 = ((center.x + radius).ceil() as i32).min(canvas_w as i32);
    let y1 = ((center.y + radius).ceil() as i32).min(canvas_h as i32);

    for py in y0..y1 {
        for px in x0..x1 {
            let dx = px as f32 + 0.5 - center.x;
            let dy = py as f32 + 0.5 - center.y;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > radius {
                continue;
            }
            let falloff = if feathered {
                let t = dist / radius;
                if t <= 0.2 { 1.0 } else { 1.0 - (t - 0.2) / 0.8 }
            } else {
                1.0
            };
            let alpha = stamp_alpha * falloff;
            if alpha <= 0.0 {
                continue;
            }
            let (px, py) = (px as u32, py as u32);
            let dst = *pixels.get_pixel(px, py);
            let out = if erase {
                let a = (dst[3] as f32 * (1.0 - alpha)).round() as u8;
                Rgba([dst[0], dst[1], dst[2], a])
            } else {
                let top = Rgba([color[0], color[1], color[2], (alpha * 255.0).round() as u8]);
                blend_pixel(dst, top, BlendMode::Normal, 1.0)
            };
            pixels.put_pixel(px, py, out);
        }
    }
}

// ============================================================================
// FLOOD FILL
// ============================================================================

/// Iterative 4-connected flood fill on the active layer. The target is the
/// clicked pixel's RGB, alpha ignored, so transparent regions over a colored
/// background fill correctly. Returns false for the no-op case (target RGB
/// already equals the fill RGB).
fn flood_fill(canvas: &mut CanvasState, start_x: u32, start_y: u32, fill: Rgba<u8>) -> bool {
    let w = canvas.width as usize;
    let h = canvas.height as usize;
    let Some(layer) = canvas.active_layer_mut() else { return false };
    if start_x as usize >= w || start_y as usize >= h {
        return false;
    }

    let target = *layer.pixels.get_pixel(start_x, start_y);
    if target[0] == fill[0] && target[1] == fill[1] && target[2] == fill[2] && target[3] == 255 {
        return false;
    }
    let fill = Rgba([fill[0], fill[1], fill[2], 255]);

    let matches = |p: &Rgba<u8>| p[0] == target[0] && p[1] == target[1] && p[2] == target[2];

    // DFS stack of packed flat indices. Matching is RGB-only, so a fill that
    // changes nothing but alpha leaves written pixels still matching; the
    // visited mask is what keeps them from being pushed again.
    let mut visited = vec![false; w * h];
    let seed = start_y as usize * w + start_x as usize;
    let mut stack: Vec<u32> = Vec::with_capacity(4096);
    visited[seed] = true;
    stack.push(seed as u32);

    while let Some(idx) = stack.pop() {
        let x = (idx as usize % w) as u32;
        let y = (idx as usize / w) as u32;
        layer.pixels.put_pixel(x, y, fill);

        let idx = idx as usize;
        if x > 0 {
            let ni = idx - 1;
            if !visited[ni] && matches(layer.pixels.get_pixel(x - 1, y)) {
                visited[ni] = true;
                stack.push(ni as u32);
            }
        }
        if (x as usize) + 1 < w {
            let ni = idx + 1;
            if !visited[ni] && matches(layer.pixels.get_pixel(x + 1, y)) {
                visited[ni] = true;
                stack.push(ni as u32);
            }
        }
        if y > 0 {
            let ni = idx - w;
            if !visited[ni] && matches(layer.pixels.get_pixel(x, y - 1)) {
                visited[ni] = true;
                stack.push(ni as u32);
            }
        }
        if (y as usize) + 1 < h {
            let ni = idx + w;
            if !visited[ni] && matches(layer.pixels.get_pixel(x, y + 1)) {
                visited[ni] = true;
                stack.push(ni as u32);
            }
        }
    }
    true
}

// ============================================================================
// SCALE GEOMETRY
// ============================================================================

/// Hit-test the eight transformed handles.
fn hit_handle(rect: Rect, rotation: f32, pos: Pos2, tolerance: f32) -> Option<ScaleHandle> {
    for (handle, anchor) in handle_positions(rect, rotation) {
        if pos.distance(anchor) <= tolerance {
            return Some(handle);
        }
    }
    None
}

/// Resize `start` so that `handle` lands on `local` (a point already mapped
/// into the unrotated frame). Corner handles with `lock_aspect` keep the
/// original ratio, scaling uniformly from the opposite corner. Dimensions
/// never collapse below 1px.
fn scale_rect(start: Rect, handle: ScaleHandle, local: Pos2, lock_aspect: bool) -> Rect {
    let mut min = start.min;
    let mut max = start.max;
    match handle {
        ScaleHandle::TopLeft => {
            min = local;
        }
        ScaleHandle::Top => min.y = local.y,
        ScaleHandle::TopRight => {
            max.x = local.x;
            min.y = local.y;
        }
        ScaleHandle::Right => max.x = local.x,
        ScaleHandle::BottomRight => {
            max = local;
        }
        ScaleHandle::Bottom => max.y = local.y,
        ScaleHandle::BottomLeft => {
            min.x = local.x;
            max.y = local.y;
        }
        ScaleHandle::Left => min.x = local.x,
    }

    if lock_aspect && handle.is_corner() && start.width() > 0.0 && start.height() > 0.0 {
        let w = (max.x - min.x).max(1.0);
        let h = (max.y - min.y).max(1.0);
        let s = (w / start.width()).max(h / start.height());
        let (w, h) = (start.width() * s, start.height() * s);
        // Re-anchor against the corner opposite the grabbed one
        match handle {
            ScaleHandle::TopLeft => min = max - vec2(w, h),
            ScaleHandle::TopRight => {
                max.x = min.x + w;
                min.y = max.y - h;
            }
            ScaleHandle::BottomRight => max = min + vec2(w, h),
            ScaleHandle::BottomLeft => {
                min.x = max.x - w;
                max.y = min.y + h;
            }
            _ => {}
        }
    }

    // Clamp each axis to a 1px minimum, anchored at the stationary side
    if max.x - min.x < 1.0 {
        match handle {
            ScaleHandle::TopLeft | ScaleHandle::BottomLeft | ScaleHandle::Left => min.x = max.x - 1.0,
            _ => max.x = min.x + 1.0,
        }
    }
    if max.y - min.y < 1.0 {
        match handle {
            ScaleHandle::TopLeft | ScaleHandle::TopRight | ScaleHandle::Top => min.y = max.y - 1.0,
            _ => max.y = min.y + 1.0,
        }
    }
    Rect::from_min_max(min, max)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn press_drag_release(
        tools: &mut ToolState,
        canvas: &mut CanvasState,
        path: &[Pos2],
    ) -> Option<&'static str> {
        let mods = Modifiers::default();
        tools.pointer_pressed(canvas, path[0], mods, 1.0);
        for p in &path[1..] {
            tools.pointer_moved(canvas, *p, mods, 1.0);
        }
        tools.pointer_released(canvas, *path.last().unwrap())
    }

    #[test]
    fn brush_paints_and_reports() {
        let mut canvas = CanvasState::new(32, 32);
        let mut tools = ToolState::new();
        tools.brush = BrushParams { size: 3.0, feather: 0.0 };
        tools.color = Rgba([255, 0, 0, 255]);
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(5.0, 5.0), pos2(20.0, 5.0)]);
        assert_eq!(desc, Some("Brush stroke"));
        assert_eq!(*canvas.layers[0].pixels.get_pixel(5, 5), Rgba([255, 0, 0, 255]));
        assert_eq!(*canvas.layers[0].pixels.get_pixel(12, 5), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn locked_layer_refuses_stroke() {
        let mut canvas = CanvasState::new(16, 16);
        canvas.layers[0].locked = true;
        let mut tools = ToolState::new();
        tools.color = Rgba([255, 0, 0, 255]);
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(5.0, 5.0), pos2(8.0, 5.0)]);
        assert_eq!(desc, None);
        assert_eq!(*canvas.layers[0].pixels.get_pixel(5, 5), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn eraser_clears_alpha() {
        let mut canvas = CanvasState::new(16, 16);
        let mut tools = ToolState::new();
        tools.set_tool(Tool::Eraser);
        tools.eraser = BrushParams { size: 2.0, feather: 0.0 };
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(8.0, 8.0)]);
        assert_eq!(desc, Some("Eraser stroke"));
        assert_eq!(canvas.layers[0].pixels.get_pixel(8, 8)[3], 0);
    }

    #[test]
    fn dropper_samples_composite() {
        let mut canvas = CanvasState::new(16, 16);
        let idx = canvas.add_layer("Ink".to_string(), None);
        canvas.layers[idx].pixels.put_pixel(4, 4, Rgba([0, 200, 0, 255]));
        let mut tools = ToolState::new();
        tools.set_tool(Tool::ColorDropper);
        tools.pointer_pressed(&mut canvas, pos2(4.5, 4.5), Modifiers::default(), 1.0);
        assert_eq!(tools.color, Rgba([0, 200, 0, 255]));
    }

    #[test]
    fn bucket_fills_bounded_region() {
        let mut canvas = CanvasState::new(10, 10);
        // Vertical barrier at x=5 on the background
        for y in 0..10 {
            canvas.layers[0].pixels.put_pixel(5, y, Rgba([0, 0, 0, 255]));
        }
        let mut tools = ToolState::new();
        tools.set_tool(Tool::PaintBucket);
        tools.color = Rgba([0, 0, 255, 255]);
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(2.0, 2.0)]);
        assert_eq!(desc, Some("Paint bucket fill"));
        assert_eq!(*canvas.layers[0].pixels.get_pixel(0, 9), Rgba([0, 0, 255, 255]));
        assert_eq!(*canvas.layers[0].pixels.get_pixel(5, 5), Rgba([0, 0, 0, 255]), "barrier untouched");
        assert_eq!(*canvas.layers[0].pixels.get_pixel(8, 2), Rgba([255, 255, 255, 255]), "far side untouched");
    }

    #[test]
    fn bucket_noop_on_same_color() {
        let mut canvas = CanvasState::new(8, 8);
        let mut tools = ToolState::new();
        tools.set_tool(Tool::PaintBucket);
        tools.color = Rgba([255, 255, 255, 255]);
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(2.0, 2.0)]);
        assert_eq!(desc, None);
    }

    #[test]
    fn bucket_matches_rgb_ignoring_alpha() {
        let mut canvas = CanvasState::new(8, 8);
        canvas.add_layer("Ink".to_string(), None); // fully transparent
        let mut tools = ToolState::new();
        tools.set_tool(Tool::PaintBucket);
        tools.color = Rgba([200, 0, 0, 255]);
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(3.0, 3.0)]);
        assert_eq!(desc, Some("Paint bucket fill"));
        assert_eq!(*canvas.layers[1].pixels.get_pixel(7, 7), Rgba([200, 0, 0, 255]));
    }

    #[test]
    fn marquee_discards_tiny_rect() {
        let mut canvas = CanvasState::new(32, 32);
        let mut tools = ToolState::new();
        tools.set_tool(Tool::Marquee);
        press_drag_release(&mut tools, &mut canvas, &[pos2(5.0, 5.0), pos2(6.0, 20.0)]);
        assert!(tools.selection().is_none(), "2px wide drag is a mis-click");

        press_drag_release(&mut tools, &mut canvas, &[pos2(5.0, 5.0), pos2(20.0, 20.0)]);
        assert!(tools.selection().is_some());
    }

    #[test]
    fn marquee_supports_any_drag_quadrant() {
        let mut canvas = CanvasState::new(32, 32);
        let mut tools = ToolState::new();
        tools.set_tool(Tool::Marquee);
        press_drag_release(&mut tools, &mut canvas, &[pos2(20.0, 20.0), pos2(5.0, 5.0)]);
        let rect = tools.selection().unwrap().rect;
        assert_eq!(rect.min, pos2(5.0, 5.0));
        assert_eq!(rect.max, pos2(20.0, 20.0));
    }

    #[test]
    fn lasso_thresholds_vertices_and_finalizes() {
        let mut canvas = CanvasState::new(32, 32);
        let mut tools = ToolState::new();
        tools.set_tool(Tool::Lasso);
        let mods = Modifiers::default();
        tools.pointer_pressed(&mut canvas, pos2(5.0, 5.0), mods, 1.0);
        tools.pointer_moved(&mut canvas, pos2(5.5, 5.0), mods, 1.0); // dist² 0.25: skipped
        tools.pointer_moved(&mut canvas, pos2(10.0, 5.0), mods, 1.0);
        tools.pointer_moved(&mut canvas, pos2(10.0, 10.0), mods, 1.0);
        tools.pointer_released(&mut canvas, pos2(10.0, 10.0));
        assert_eq!(tools.lasso_in_progress().len(), 3);

        assert!(!tools.key_enter(&mut canvas), "nothing floating, nothing committed");
        assert!(tools.lasso_in_progress().is_empty());
        assert!(tools.selection().is_some());
        assert_eq!(tools.tool, Tool::Move, "finalizing switches to Move");
    }

    #[test]
    fn short_lasso_discards_on_enter_and_escape_cancels() {
        let mut canvas = CanvasState::new(32, 32);
        let mut tools = ToolState::new();
        tools.set_tool(Tool::Lasso);
        let mods = Modifiers::default();
        tools.pointer_pressed(&mut canvas, pos2(5.0, 5.0), mods, 1.0);
        tools.pointer_moved(&mut canvas, pos2(10.0, 5.0), mods, 1.0);
        tools.pointer_released(&mut canvas, pos2(10.0, 5.0));
        tools.key_enter(&mut canvas);
        assert!(tools.selection().is_none(), "two vertices cannot close");

        tools.pointer_pressed(&mut canvas, pos2(5.0, 5.0), mods, 1.0);
        tools.key_escape();
        assert!(tools.lasso_in_progress().is_empty());
    }

    #[test]
    fn drag_extracts_once_and_clears_source() {
        let mut canvas = CanvasState::new(48, 48);
        let mut tools = ToolState::new();
        tools.set_tool(Tool::Marquee);
        press_drag_release(&mut tools, &mut canvas, &[pos2(4.0, 4.0), pos2(24.0, 24.0)]);

        tools.set_tool(Tool::Move);
        // Press well inside the body, clear of the handle tolerance
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(14.0, 14.0), pos2(24.0, 19.0)]);
        assert_eq!(desc, Some("Move selection"));

        let sel = tools.selection().unwrap();
        assert!(sel.is_extracted());
        assert_eq!(sel.rect.min, pos2(14.0, 9.0), "grab offset preserved");
        // Source region is now transparent
        assert_eq!(canvas.layers[0].pixels.get_pixel(6, 6)[3], 0);
    }

    #[test]
    fn commit_restores_dragged_pixels() {
        let mut canvas = CanvasState::new(48, 48);
        canvas.layers[0].pixels.put_pixel(5, 5, Rgba([9, 9, 9, 255]));
        let mut tools = ToolState::new();
        tools.set_tool(Tool::Marquee);
        press_drag_release(&mut tools, &mut canvas, &[pos2(4.0, 4.0), pos2(24.0, 24.0)]);
        tools.set_tool(Tool::Move);
        // Drag the selection 10px right, 5px down
        press_drag_release(&mut tools, &mut canvas, &[pos2(14.0, 14.0), pos2(24.0, 19.0)]);

        assert!(tools.clear_selection(&mut canvas));
        assert_eq!(*canvas.layers[0].pixels.get_pixel(15, 10), Rgba([9, 9, 9, 255]));
        assert!(tools.selection().is_none());
    }

    #[test]
    fn bucket_fill_terminates_when_only_alpha_changes() {
        let mut canvas = CanvasState::new(6, 6);
        let idx = canvas.add_layer("Wash".to_string(), None);
        for y in 0..6 {
            for x in 0..6 {
                canvas.layers[idx].pixels.put_pixel(x, y, Rgba([10, 20, 30, 128]));
            }
        }
        let mut tools = ToolState::new();
        tools.set_tool(Tool::PaintBucket);
        tools.color = Rgba([10, 20, 30, 255]);
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(2.0, 2.0)]);
        assert_eq!(desc, Some("Paint bucket fill"));
        assert_eq!(*canvas.layers[idx].pixels.get_pixel(5, 5), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn locked_layer_refuses_move_gesture() {
        let mut canvas = CanvasState::new(48, 48);
        canvas.layers[0].locked = true;
        let mut tools = ToolState::new();
        tools.set_selection(
            &mut canvas,
            Selection::rectangle(Rect::from_min_max(pos2(4.0, 4.0), pos2(24.0, 24.0))),
        );
        tools.set_tool(Tool::Move);
        let desc = press_drag_release(&mut tools, &mut canvas, &[pos2(14.0, 14.0), pos2(24.0, 19.0)]);
        assert_eq!(desc, None, "no mutation, nothing to snapshot");
        let sel = tools.selection().unwrap();
        assert!(!sel.is_extracted());
        assert_eq!(sel.rect.min, pos2(4.0, 4.0), "selection did not move");
    }

    #[test]
    fn replacing_selection_commits_floating_pixels() {
        let mut canvas = CanvasState::new(48, 48);
        canvas.layers[0].pixels.put_pixel(5, 5, Rgba([9, 9, 9, 255]));
        let mut tools = ToolState::new();
        tools.set_tool(Tool::Marquee);
        press_drag_release(&mut tools, &mut canvas, &[pos2(4.0, 4.0), pos2(24.0, 24.0)]);
        tools.set_tool(Tool::Move);
        // Drag the selection 10px right, 5px down, leaving the buffer floating
        press_drag_release(&mut tools, &mut canvas, &[pos2(14.0, 14.0), pos2(24.0, 19.0)]);

        let committed = tools.set_selection(
            &mut canvas,
            Selection::rectangle(Rect::from_min_max(pos2(30.0, 30.0), pos2(40.0, 40.0))),
        );
        assert!(committed, "installing a new selection flushes the old buffer");
        assert_eq!(*canvas.layers[0].pixels.get_pixel(15, 10), Rgba([9, 9, 9, 255]));
        assert!(!tools.selection().unwrap().is_extracted());
    }

    #[test]
    fn scale_rect_clamps_to_one_pixel() {
        let start = Rect::from_min_max(pos2(0.0, 0.0), pos2(10.0, 10.0));
        let out = scale_rect(start, ScaleHandle::Right, pos2(-20.0, 5.0), false);
        assert!((out.width() - 1.0).abs() < 1e-5);
        assert_eq!(out.min.x, 0.0, "anchored side stays put");
    }

    #[test]
    fn corner_scale_with_lock_keeps_aspect() {
        let start = Rect::from_min_max(pos2(0.0, 0.0), pos2(20.0, 10.0));
        let out = scale_rect(start, ScaleHandle::BottomRight, pos2(40.0, 12.0), true);
        let ratio = out.width() / out.height();
        assert!((ratio - 2.0).abs() < 1e-4);
        assert_eq!(out.min, pos2(0.0, 0.0), "opposite corner anchored");
        assert!((out.width() - 40.0).abs() < 1e-4, "dominant axis wins");
    }

    #[test]
    fn rotation_snaps_with_modifier() {
        let mut canvas = CanvasState::new(64, 64);
        let mut tools = ToolState::new();
        tools.set_selection(&mut canvas, Selection::rectangle(Rect::from_min_max(pos2(20.0, 20.0), pos2(40.0, 40.0))));
        tools.set_tool(Tool::Move);

        let grip = rotation_handle_pos(tools.selection().unwrap().rect, 0.0, 1.0);
        tools.pointer_pressed(&mut canvas, grip, Modifiers::default(), 1.0);
        let mods = Modifiers { shift: true, ..Default::default() };
        // Pull the grip sideways: raw angle ~40°, must land on a 15° step
        tools.pointer_moved(&mut canvas, pos2(50.0, 12.0), mods, 1.0);
        let rotation = tools.selection().unwrap().rotation.to_degrees();
        let nearest = (rotation / 15.0).round() * 15.0;
        assert!((rotation - nearest).abs() < 1e-3, "rotation {rotation} not snapped");
        assert_eq!(tools.pointer_released(&mut canvas, pos2(50.0, 12.0)), Some("Rotate selection"));
    }

    #[test]
    fn polygon_extraction_leaves_outside_pixels() {
        let mut canvas = CanvasState::new(32, 32);
        let mut tools = ToolState::new();
        let sel = Selection::polygon(vec![pos2(2.0, 2.0), pos2(26.0, 2.0), pos2(2.0, 26.0)]).unwrap();
        tools.set_selection(&mut canvas, sel);
        tools.set_tool(Tool::Move);
        press_drag_release(&mut tools, &mut canvas, &[pos2(8.0, 8.0), pos2(9.0, 9.0)]);

        // Inside the triangle: erased. Near the opposite bounding-box corner: intact.
        assert_eq!(canvas.layers[0].pixels.get_pixel(4, 4)[3], 0);
        assert_eq!(canvas.layers[0].pixels.get_pixel(24, 24)[3], 255);
    }
}
