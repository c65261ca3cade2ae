use eframe::egui;
use egui::{
    Color32, ColorImage, Pos2, Rect, Sense, Stroke, TextureHandle, TextureOptions, pos2, vec2,
};
use image::Rgba;

use crate::canvas::{BlendMode, CanvasState, LayerPatch, SelectionContent};
use crate::components::history::HistoryManager;
use crate::components::tools::{
    HANDLE_SIZE, Tool, ToolState, handle_positions, rotation_handle_pos,
};
use crate::log_err;
use crate::ops::transform::transformed_corners;
use crate::view::Viewport;

/// Desktop shell around the engine. Owns the canvas, tool machine, history
/// and camera; everything here is presentation and input routing, the engine
/// modules do the real work.
pub struct ArtboardApp {
    canvas: CanvasState,
    tools: ToolState,
    history: HistoryManager,
    view: Viewport,

    composite_tex: Option<TextureHandle>,
    overlay_tex: Option<TextureHandle>,
    composite_dirty: bool,

    resize_w: String,
    resize_h: String,
    status: String,
}

impl ArtboardApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, width: u32, height: u32, history_capacity: usize) -> Self {
        let canvas = CanvasState::new(width, height);
        let history = HistoryManager::new(history_capacity, &canvas);
        Self {
            canvas,
            tools: ToolState::new(),
            history,
            view: Viewport::default(),
            composite_tex: None,
            overlay_tex: None,
            composite_dirty: true,
            resize_w: width.to_string(),
            resize_h: height.to_string(),
            status: String::new(),
        }
    }

    fn capture(&mut self, description: &str) {
        self.history.capture(description, &self.canvas);
    }

    fn undo(&mut self) {
        // Floating pixels are backed by an earlier snapshot, just drop them
        self.tools.discard_selection();
        if self.history.undo(&mut self.canvas).is_some() {
            self.composite_dirty = true;
        }
    }

    fn redo(&mut self) {
        self.tools.discard_selection();
        if self.history.redo(&mut self.canvas).is_some() {
            self.composite_dirty = true;
        }
    }

    fn export_png(&mut self) {
        // Settle the selection first so the export matches what is on screen
        if self.tools.clear_selection(&mut self.canvas) {
            self.capture("Commit selection");
            self.composite_dirty = true;
        }
        let Some(path) = rfd::FileDialog::new()
            .add_filter("PNG image", &["png"])
            .set_file_name("artboard.png")
            .save_file()
        else {
            return;
        };
        match self.canvas.composite().save(&path) {
            Ok(()) => self.status = format!("Exported {}", path.display()),
            Err(e) => {
                log_err!("export failed for {:?}: {}", path, e);
                self.status = format!("Export failed: {e}");
            }
        }
    }

    fn apply_resize(&mut self) {
        let (Ok(w), Ok(h)) = (self.resize_w.parse::<u32>(), self.resize_h.parse::<u32>()) else {
            self.status = "Invalid canvas size".to_string();
            return;
        };
        if self.tools.clear_selection(&mut self.canvas) {
            self.capture("Commit selection");
        }
        if self.canvas.resize(w, h) {
            self.capture("Resize canvas");
            self.composite_dirty = true;
        } else {
            self.status = "Invalid canvas size".to_string();
        }
    }

    // ---- panels -------------------------------------------------------------

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_wrapped(|ui| {
            for &tool in Tool::all() {
                if ui.selectable_label(self.tools.tool == tool, tool.label()).clicked() {
                    self.tools.set_tool(tool);
                }
            }
            ui.separator();

            let mut color = Color32::from_rgba_unmultiplied(
                self.tools.color[0],
                self.tools.color[1],
                self.tools.color[2],
                self.tools.color[3],
            );
            if ui.color_edit_button_srgba(&mut color).changed() {
                self.tools.color = Rgba([color.r(), color.g(), color.b(), color.a()]);
            }

            match self.tools.tool {
                Tool::Brush => {
                    ui.label("Size");
                    ui.add(egui::Slider::new(&mut self.tools.brush.size, 0.0..=50.0));
                    ui.label("Feather");
                    ui.add(egui::Slider::new(&mut self.tools.brush.feather, 0.0..=50.0));
                }
                Tool::Eraser => {
                    ui.label("Size");
                    ui.add(egui::Slider::new(&mut self.tools.eraser.size, 0.0..=50.0));
                    ui.label("Feather");
                    ui.add(egui::Slider::new(&mut self.tools.eraser.feather, 0.0..=50.0));
                }
                _ => {}
            }
            ui.separator();

            let can_undo = self.history.can_undo();
            if ui.add_enabled(can_undo, egui::Button::new("Undo")).clicked() {
                self.undo();
            }
            let can_redo = self.history.can_redo();
            if ui.add_enabled(can_redo, egui::Button::new("Redo")).clicked() {
                self.redo();
            }
            ui.separator();

            ui.label("Canvas");
            ui.add(egui::TextEdit::singleline(&mut self.resize_w).desired_width(48.0));
            ui.label("×");
            ui.add(egui::TextEdit::singleline(&mut self.resize_h).desired_width(48.0));
            if ui.button("Resize").clicked() {
                self.apply_resize();
            }
            ui.separator();

            if ui.button("Export PNG").clicked() {
                self.export_png();
            }
        });
    }

    fn layers_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Layers");
        ui.horizontal(|ui| {
            if ui.button("Add").clicked() {
                let n = self.canvas.layers.len();
                self.canvas.add_layer(format!("Layer {n}"), None);
                self.capture("Add layer");
            }
            if ui.button("Delete").clicked() {
                let index = self.canvas.active_layer_index;
                self.tools.discard_selection();
                if self.canvas.remove_layer(index) {
                    self.capture("Delete layer");
                    self.composite_dirty = true;
                }
            }
            if ui.button("Duplicate").clicked()
                && self.canvas.duplicate_layer(self.canvas.active_layer_index).is_some()
            {
                self.capture("Duplicate layer");
                self.composite_dirty = true;
            }
            if ui.button("Merge ↓").clicked() {
                if self.tools.clear_selection(&mut self.canvas) {
                    self.capture("Commit selection");
                }
                if self.canvas.merge_down(self.canvas.active_layer_index) {
                    self.capture("Merge down");
                    self.composite_dirty = true;
                }
            }
        });
        ui.separator();

        // Top of stack first
        let mut set_active = None;
        let mut patch: Option<(usize, LayerPatch, &'static str, bool)> = None;
        let mut reorder: Option<(usize, usize)> = None;
        for index in (0..self.canvas.layers.len()).rev() {
            let layer = &self.canvas.layers[index];
            let is_active = index == self.canvas.active_layer_index;
            let mut visible = layer.visible;
            let mut locked = layer.locked;
            let mut opacity = layer.opacity;
            let mut blend_mode = layer.blend_mode;
            let name = layer.name.clone();

            ui.horizontal(|ui| {
                if ui.checkbox(&mut visible, "").changed() {
                    patch = Some((
                        index,
                        LayerPatch { visible: Some(visible), ..Default::default() },
                        "Toggle layer visibility",
                        true,
                    ));
                }
                if ui.selectable_label(is_active, &name).clicked() {
                    set_active = Some(index);
                }
                if ui.selectable_label(locked, "🔒").clicked() {
                    locked = !locked;
                    patch = Some((
                        index,
                        LayerPatch { locked: Some(locked), ..Default::default() },
                        "Toggle layer lock",
                        true,
                    ));
                }
                if ui.small_button("▲").clicked() && index + 1 < self.canvas.layers.len() {
                    reorder = Some((index, index + 1));
                }
                if ui.small_button("▼").clicked() && index > 0 {
                    reorder = Some((index, index - 1));
                }
            });
            ui.horizontal(|ui| {
                let slider = ui.add(egui::Slider::new(&mut opacity, 0.0..=1.0).text("Opacity"));
                if slider.changed() {
                    patch = Some((
                        index,
                        LayerPatch { opacity: Some(opacity), ..Default::default() },
                        "Change layer opacity",
                        slider.drag_released(),
                    ));
                }
                egui::ComboBox::from_id_source(("blend", index))
                    .selected_text(blend_mode.display_name())
                    .show_ui(ui, |ui| {
                        for &mode in BlendMode::all() {
                            if ui
                                .selectable_value(&mut blend_mode, mode, mode.display_name())
                                .clicked()
                            {
                                patch = Some((
                                    index,
                                    LayerPatch { blend_mode: Some(mode), ..Default::default() },
                                    "Change blend mode",
                                    true,
                                ));
                            }
                        }
                    });
            });
            ui.separator();
        }

        if let Some(index) = set_active {
            self.canvas.active_layer_index = index;
        }
        if let Some((index, patch, description, snapshot)) = patch {
            if self.canvas.update_layer(index, patch) {
                if snapshot {
                    self.capture(description);
                }
                self.composite_dirty = true;
            }
        }
        if let Some((from, to)) = reorder {
            if self.canvas.move_layer(from, to) {
                self.capture("Reorder layers");
                self.composite_dirty = true;
            }
        }
    }

    // ---- canvas area --------------------------------------------------------

    fn canvas_area(&mut self, ui: &mut egui::Ui) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let origin = response.rect.min.to_vec2();

        // Wheel zoom anchored at the pointer, middle-drag pan
        if let Some(hover) = response.hover_pos() {
            let scroll = ui.input(|i| i.scroll_delta.y);
            if scroll != 0.0 {
                self.view.zoom_at(hover - origin, (scroll / 200.0).exp());
            }
        }
        if response.dragged_by(egui::PointerButton::Middle) {
            self.view.pan_by(response.drag_delta());
        }

        // Pointer routing to the tool machine, in canvas coordinates
        let modifiers = ui.input(|i| i.modifiers);
        let zoom = self.view.zoom;
        if let Some(pos) = response.interact_pointer_pos() {
            let canvas_pos = self.view.to_canvas(pos - origin);
            if response.drag_started_by(egui::PointerButton::Primary)
                || response.clicked_by(egui::PointerButton::Primary)
            {
                self.tools.pointer_pressed(&mut self.canvas, canvas_pos, modifiers, zoom);
                self.composite_dirty = true;
            } else if response.dragged_by(egui::PointerButton::Primary) {
                self.tools.pointer_moved(&mut self.canvas, canvas_pos, modifiers, zoom);
                if matches!(self.tools.tool, Tool::Brush | Tool::Eraser) {
                    self.composite_dirty = true;
                }
            }
            if response.drag_released_by(egui::PointerButton::Primary)
                || response.clicked_by(egui::PointerButton::Primary)
            {
                if let Some(description) = self.tools.pointer_released(&mut self.canvas, canvas_pos)
                {
                    self.capture(description);
                    self.composite_dirty = true;
                }
            }
        }

        // Upload the composite when pixels changed
        if !self.canvas.take_events().is_empty() {
            self.composite_dirty = true;
        }
        if self.composite_dirty || self.composite_tex.is_none() {
            let flat = self.canvas.composite();
            let img = ColorImage::from_rgba_unmultiplied(
                [flat.width() as usize, flat.height() as usize],
                flat.as_raw(),
            );
            self.composite_tex =
                Some(ui.ctx().load_texture("composite", img, TextureOptions::NEAREST));
            self.composite_dirty = false;
        }

        let view = self.view;
        let to_screen = move |p: Pos2| view.to_screen(p) + origin;

        if let Some(tex) = &self.composite_tex {
            let rect = Rect::from_min_max(
                to_screen(pos2(0.0, 0.0)),
                to_screen(pos2(self.canvas.width as f32, self.canvas.height as f32)),
            );
            painter.image(
                tex.id(),
                rect,
                Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
                Color32::WHITE,
            );
        }

        self.draw_selection_overlay(ui, &painter, to_screen);

        // Keyboard, only while the canvas has focus-ish interaction
        let (enter, escape, undo_key, redo_key, delete) = ui.input(|i| {
            (
                i.key_pressed(egui::Key::Enter),
                i.key_pressed(egui::Key::Escape),
                i.modifiers.command && !i.modifiers.shift && i.key_pressed(egui::Key::Z),
                i.modifiers.command
                    && (i.key_pressed(egui::Key::Y)
                        || (i.modifiers.shift && i.key_pressed(egui::Key::Z))),
                i.key_pressed(egui::Key::Delete),
            )
        });
        if enter && self.tools.key_enter(&mut self.canvas) {
            self.capture("Commit selection");
            self.composite_dirty = true;
        }
        if escape {
            self.tools.key_escape();
        }
        if undo_key {
            self.undo();
        }
        if redo_key {
            self.redo();
        }
        if delete {
            let index = self.canvas.active_layer_index;
            self.tools.discard_selection();
            if self.canvas.remove_layer(index) {
                self.capture("Delete layer");
                self.composite_dirty = true;
            }
        }
    }

    /// Selection outline, handles, rotation grip, in-progress lasso outline
    /// and the floating extracted buffer.
    fn draw_selection_overlay(
        &mut self,
        ui: &mut egui::Ui,
        painter: &egui::Painter,
        to_screen: impl Fn(Pos2) -> Pos2,
    ) {
        let lasso = self.tools.lasso_in_progress();
        if lasso.len() >= 2 {
            let points: Vec<Pos2> = lasso.iter().map(|p| to_screen(*p)).collect();
            painter.add(egui::Shape::line(points, Stroke::new(1.0, Color32::LIGHT_BLUE)));
        }

        let Some(selection) = self.tools.selection() else { return };
        let corners = transformed_corners(selection.rect, selection.rotation);
        let sel_rect = selection.rect;
        let sel_rotation = selection.rotation;

        // Floating pixels are drawn as a rotated textured quad over the canvas
        let mut floating_tex = None;
        if let SelectionContent::Extracted(buffer) = &selection.content {
            let img = ColorImage::from_rgba_unmultiplied(
                [buffer.pixels.width() as usize, buffer.pixels.height() as usize],
                buffer.pixels.as_raw(),
            );
            let tex = ui.ctx().load_texture("floating", img, TextureOptions::NEAREST);
            let mut mesh = egui::Mesh::with_texture(tex.id());
            let uvs = [
                pos2(0.0, 0.0),
                pos2(1.0, 0.0),
                pos2(1.0, 1.0),
                pos2(0.0, 1.0),
            ];
            for (corner, uv) in corners.iter().zip(uvs) {
                mesh.vertices.push(egui::epaint::Vertex {
                    pos: to_screen(*corner),
                    uv,
                    color: Color32::WHITE,
                });
            }
            mesh.add_triangle(0, 1, 2);
            mesh.add_triangle(0, 2, 3);
            painter.add(egui::Shape::mesh(mesh));
            floating_tex = Some(tex);
        }

        let stroke = Stroke::new(1.0, Color32::from_rgb(66, 133, 244));
        let screen_corners: Vec<Pos2> = corners.iter().map(|c| to_screen(*c)).collect();
        painter.add(egui::Shape::closed_line(screen_corners, stroke));

        if self.tools.tool == Tool::Move {
            for (_, pos) in handle_positions(sel_rect, sel_rotation) {
                let center = to_screen(pos);
                painter.rect_filled(
                    Rect::from_center_size(center, vec2(HANDLE_SIZE, HANDLE_SIZE)),
                    0.0,
                    Color32::WHITE,
                );
                painter.rect_stroke(
                    Rect::from_center_size(center, vec2(HANDLE_SIZE, HANDLE_SIZE)),
                    0.0,
                    stroke,
                );
            }
            let grip = to_screen(rotation_handle_pos(sel_rect, sel_rotation, self.view.zoom));
            painter.circle_filled(grip, HANDLE_SIZE * 0.5, Color32::WHITE);
            painter.circle_stroke(grip, HANDLE_SIZE * 0.5, stroke);
        }

        // Keep this frame's floating texture alive until the next upload
        if floating_tex.is_some() {
            self.overlay_tex = floating_tex;
        }
    }
}

impl eframe::App for ArtboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui));
        egui::SidePanel::right("layers")
            .default_width(220.0)
            .show(ctx, |ui| self.layers_panel(ui));
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.status);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(format!("{:.0}%", self.view.zoom * 100.0));
                    ui.separator();
                    ui.label(format!(
                        "history {:.1} MB",
                        self.history.memory_usage() as f32 / (1024.0 * 1024.0)
                    ));
                });
            });
        });
        egui::CentralPanel::default().show(ctx, |ui| self.canvas_area(ui));
    }
}
