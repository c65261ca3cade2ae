use image::RgbaImage;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::canvas::{BlendMode, CanvasState, Layer};
use crate::log_info;

// ============================================================================
// CANVAS SNAPSHOT — full copy of the layer stack for undo/redo
// ============================================================================

/// A complete copy of the canvas state (layers + dimensions).
#[derive(Clone)]
pub struct CanvasSnapshot {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<LayerSnapshot>,
    pub active_layer_index: usize,
}

#[derive(Clone)]
pub struct LayerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub pixels: RgbaImage,
}

impl CanvasSnapshot {
    pub fn capture(state: &CanvasState) -> Self {
        Self {
            width: state.width,
            height: state.height,
            active_layer_index: state.active_layer_index,
            layers: state
                .layers
                .iter()
                .map(|l| LayerSnapshot {
                    id: l.id,
                    name: l.name.clone(),
                    visible: l.visible,
                    locked: l.locked,
                    opacity: l.opacity,
                    blend_mode: l.blend_mode,
                    pixels: l.pixels.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild the canvas from this snapshot. Layer identities (ids) are
    /// restored, not regenerated, so selections keyed by layer id survive
    /// an undo of an unrelated edit.
    pub fn restore_into(&self, state: &mut CanvasState) {
        state.width = self.width;
        state.height = self.height;
        state.clear_layers();
        for snap in &self.layers {
            let mut layer = Layer::new(
                snap.name.clone(),
                self.width,
                self.height,
                image::Rgba([0, 0, 0, 0]),
            );
            layer.id = snap.id;
            layer.pixels = snap.pixels.clone();
            layer.visible = snap.visible;
            layer.locked = snap.locked;
            layer.opacity = snap.opacity;
            layer.blend_mode = snap.blend_mode;
            state.layers.push(layer);
        }
        state.active_layer_index = self.active_layer_index.min(self.layers.len().saturating_sub(1));
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.pixels.as_raw().len() + l.name.len())
            .sum()
    }
}

// ============================================================================
// HISTORY MANAGER — linear snapshot timeline with a cursor
// ============================================================================

struct HistoryEntry {
    description: String,
    snapshot: CanvasSnapshot,
}

/// Undo/redo manager over full-canvas snapshots.
///
/// Entries form a single timeline; `cursor` indexes the entry matching the
/// live canvas. Capturing while the cursor sits mid-timeline discards the
/// redo tail first. The timeline is seeded with the pristine canvas at
/// construction so the very first edit is undoable.
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    capacity: usize,
    /// Set while a snapshot is being restored; capture calls are ignored to
    /// keep undo itself from generating history.
    restoring: bool,
}

impl HistoryManager {
    pub fn new(capacity: usize, state: &CanvasState) -> Self {
        let mut entries = VecDeque::new();
        entries.push_back(HistoryEntry {
            description: "New canvas".to_string(),
            snapshot: CanvasSnapshot::capture(state),
        });
        Self {
            entries,
            cursor: 0,
            capacity: capacity.max(1),
            restoring: false,
        }
    }

    /// Record the canvas AFTER a completed mutation.
    pub fn capture(&mut self, description: &str, state: &CanvasState) {
        if self.restoring {
            return;
        }
        // New edit forks the timeline: drop everything past the cursor
        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(HistoryEntry {
            description: description.to_string(),
            snapshot: CanvasSnapshot::capture(state),
        });
        self.cursor = self.entries.len() - 1;

        // Evict the oldest states past capacity (the seed included)
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.cursor -= 1;
        }
    }

    pub fn undo(&mut self, state: &mut CanvasState) -> Option<String> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        let entry = &self.entries[self.cursor];
        self.restoring = true;
        entry.snapshot.restore_into(state);
        self.restoring = false;
        // The description of the step we just stepped back over
        let undone = self.entries[self.cursor + 1].description.clone();
        log_info!("undo: {}", undone);
        Some(undone)
    }

    pub fn redo(&mut self, state: &mut CanvasState) -> Option<String> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        let entry = &self.entries[self.cursor];
        self.restoring = true;
        entry.snapshot.restore_into(state);
        self.restoring = false;
        log_info!("redo: {}", entry.description);
        Some(entry.description.clone())
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        if self.cursor == 0 {
            None
        } else {
            Some(&self.entries[self.cursor].description)
        }
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.entries.get(self.cursor + 1).map(|e| e.description.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.entries.iter().map(|e| e.snapshot.memory_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn mark(state: &mut CanvasState, x: u32, y: u32) {
        state.layers[0].pixels.put_pixel(x, y, Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn seed_state_is_undiscardable_floor() {
        let state = CanvasState::new(4, 4);
        let mut history = HistoryManager::new(50, &state);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        let mut state = state;
        assert!(history.undo(&mut state).is_none());
    }

    #[test]
    fn undo_redo_restores_pixels_exactly() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::new(50, &state);
        let before = state.layers[0].pixels.clone();

        mark(&mut state, 1, 1);
        history.capture("Brush stroke", &state);
        let after = state.layers[0].pixels.clone();

        assert_eq!(history.undo(&mut state).as_deref(), Some("Brush stroke"));
        assert_eq!(state.layers[0].pixels, before);

        assert_eq!(history.redo(&mut state).as_deref(), Some("Brush stroke"));
        assert_eq!(state.layers[0].pixels, after);
        assert!(history.redo(&mut state).is_none());
    }

    #[test]
    fn capture_discards_redo_tail() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::new(50, &state);

        mark(&mut state, 0, 0);
        history.capture("A", &state);
        mark(&mut state, 1, 0);
        history.capture("B", &state);

        history.undo(&mut state);
        assert!(history.can_redo());

        mark(&mut state, 2, 0);
        history.capture("C", &state);
        assert!(!history.can_redo(), "new edit must drop B");
        assert_eq!(history.undo_description(), Some("C"));
        assert_eq!(history.len(), 3); // seed, A, C
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::new(3, &state);

        for i in 0..5u32 {
            mark(&mut state, i % 4, 0);
            history.capture(&format!("edit {i}"), &state);
        }
        assert_eq!(history.len(), 3);
        // Only two undos remain; the floor is "edit 2", not the seed
        assert!(history.undo(&mut state).is_some());
        assert!(history.undo(&mut state).is_some());
        assert!(history.undo(&mut state).is_none());
    }

    #[test]
    fn memory_usage_sums_snapshot_bytes() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::new(50, &state);
        // One 4x4 RGBA8 layer named "Background" per snapshot
        let per_entry = 4 * 4 * 4 + "Background".len();
        assert_eq!(history.memory_usage(), per_entry);

        mark(&mut state, 0, 0);
        history.capture("Brush stroke", &state);
        assert_eq!(history.memory_usage(), 2 * per_entry);
    }

    #[test]
    fn restore_preserves_layer_ids_and_dimensions() {
        let mut state = CanvasState::new(4, 4);
        let id = state.layers[0].id;
        let mut history = HistoryManager::new(50, &state);

        state.resize(8, 6);
        history.capture("Resize canvas", &state);

        history.undo(&mut state);
        assert_eq!((state.width, state.height), (4, 4));
        assert_eq!(state.layers[0].id, id);

        history.redo(&mut state);
        assert_eq!((state.width, state.height), (8, 6));
        assert_eq!(state.layers[0].pixels.dimensions(), (8, 6));
    }

    #[test]
    fn restore_rebuilds_layer_stack_shape() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::new(50, &state);

        state.add_layer("Ink".to_string(), None);
        state.layers[1].opacity = 0.4;
        state.layers[1].blend_mode = BlendMode::Multiply;
        state.layers[1].locked = true;
        history.capture("Add layer", &state);

        history.undo(&mut state);
        assert_eq!(state.layers.len(), 1);

        history.redo(&mut state);
        assert_eq!(state.layers.len(), 2);
        assert_eq!(state.layers[1].name, "Ink");
        assert_eq!(state.layers[1].opacity, 0.4);
        assert_eq!(state.layers[1].blend_mode, BlendMode::Multiply);
        assert!(state.layers[1].locked);
        assert_eq!(state.active_layer_index, 1);
    }
}
