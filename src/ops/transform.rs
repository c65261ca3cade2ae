// ============================================================================
// TRANSFORM OPERATIONS — selection-frame math for rotated selections
// ============================================================================
//
// A selection lives in canvas coordinates but may carry a rotation about its
// rect center. All hit-testing and pixel mapping goes through a "local frame":
// the axis-aligned space the selection occupied before rotation. These
// functions are pure; the tool state machine and renderer both build on them.

use egui::{Pos2, Rect, pos2};

use crate::canvas::Selection;

/// Map a canvas-space point into the selection's unrotated local frame
/// (rotate by `-rotation` about `center`).
pub fn to_local(point: Pos2, center: Pos2, rotation: f32) -> Pos2 {
    let (s, c) = (-rotation).sin_cos();
    let dx = point.x - center.x;
    let dy = point.y - center.y;
    pos2(center.x + dx * c - dy * s, center.y + dx * s + dy * c)
}

/// Map a local-frame point back into canvas space (rotate by `+rotation`
/// about `center`). Inverse of `to_local`.
pub fn to_transformed(point: Pos2, center: Pos2, rotation: f32) -> Pos2 {
    let (s, c) = rotation.sin_cos();
    let dx = point.x - center.x;
    let dy = point.y - center.y;
    pos2(center.x + dx * c - dy * s, center.y + dx * s + dy * c)
}

/// The four corners of `rect` after rotating about its center, in order
/// top-left, top-right, bottom-right, bottom-left.
pub fn transformed_corners(rect: Rect, rotation: f32) -> [Pos2; 4] {
    let center = rect.center();
    [
        to_transformed(rect.left_top(), center, rotation),
        to_transformed(rect.right_top(), center, rotation),
        to_transformed(rect.right_bottom(), center, rotation),
        to_transformed(rect.left_bottom(), center, rotation),
    ]
}

/// Hit-test a canvas point against a selection, honoring its rotation.
///
/// Rectangles test containment in the local frame. Polygons additionally map
/// the local point from the current rect (which tracks scaling) back into the
/// vertex space, then run an even-odd ray cast.
pub fn point_in_selection(point: Pos2, selection: &Selection) -> bool {
    let local = to_local(point, selection.center(), selection.rotation);
    let Some(polygon) = &selection.polygon else {
        return selection.rect.contains(local);
    };
    if !selection.rect.contains(local) {
        return false;
    }

    // Undo any scaling applied since capture: current rect -> vertex bounds.
    let bounds = polygon_bounds(polygon);
    let rect = selection.rect;
    if rect.width() <= 0.0 || rect.height() <= 0.0 {
        return false;
    }
    let mapped = pos2(
        bounds.min.x + (local.x - rect.min.x) / rect.width() * bounds.width(),
        bounds.min.y + (local.y - rect.min.y) / rect.height() * bounds.height(),
    );
    point_in_polygon(mapped, polygon)
}

/// Axis-aligned bounds of a vertex list. Callers guarantee at least one point.
pub fn polygon_bounds(points: &[Pos2]) -> Rect {
    let mut min = points[0];
    let mut max = points[0];
    for p in &points[1..] {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    Rect::from_min_max(min, max)
}

/// Even-odd ray cast. Horizontal edges (denominator under 1e-6) are skipped;
/// the shared-vertex rule `(a.y > p.y) != (b.y > p.y)` keeps each vertex from
/// being counted twice.
pub fn point_in_polygon(point: Pos2, points: &[Pos2]) -> bool {
    let mut inside = false;
    let n = points.len();
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        if (a.y > point.y) != (b.y > point.y) {
            let denom = b.y - a.y;
            if denom.abs() < 1e-6 {
                continue;
            }
            let x_int = a.x + (point.y - a.y) / denom * (b.x - a.x);
            if point.x < x_int {
                inside = !inside;
            }
        }
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::Rect;

    fn close(a: Pos2, b: Pos2) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    #[test]
    fn local_transformed_round_trip() {
        let center = pos2(50.0, 40.0);
        for angle in [0.0f32, 0.3, 1.2, std::f32::consts::PI, 5.9] {
            let p = pos2(12.5, 77.0);
            let back = to_transformed(to_local(p, center, angle), center, angle);
            assert!(close(p, back), "angle {angle}: {p:?} != {back:?}");
        }
    }

    #[test]
    fn corners_at_quarter_turn() {
        let rect = Rect::from_min_max(pos2(0.0, 0.0), pos2(10.0, 10.0));
        let corners = transformed_corners(rect, std::f32::consts::FRAC_PI_2);
        // 90° CCW in screen coords maps top-left to (10, 0)'s slot
        assert!(close(corners[0], pos2(10.0, 0.0)));
        assert!(close(corners[1], pos2(10.0, 10.0)));
        assert!(close(corners[2], pos2(0.0, 10.0)));
        assert!(close(corners[3], pos2(0.0, 0.0)));
    }

    #[test]
    fn rect_hit_test_unrotated() {
        let sel = Selection::rectangle(Rect::from_min_max(pos2(10.0, 10.0), pos2(30.0, 20.0)));
        assert!(point_in_selection(pos2(20.0, 15.0), &sel));
        assert!(!point_in_selection(pos2(31.0, 15.0), &sel));
        assert!(!point_in_selection(pos2(20.0, 25.0), &sel));
    }

    #[test]
    fn rect_hit_test_rotated() {
        // 20x10 rect rotated 90°: corners now span a 10x20 footprint
        let mut sel = Selection::rectangle(Rect::from_min_max(pos2(10.0, 10.0), pos2(30.0, 20.0)));
        sel.rotation = std::f32::consts::FRAC_PI_2;
        assert!(point_in_selection(pos2(20.0, 15.0), &sel), "center stays inside");
        assert!(point_in_selection(pos2(22.0, 23.0), &sel), "inside rotated footprint");
        assert!(!point_in_selection(pos2(28.0, 14.0), &sel), "old corner area now outside");
    }

    #[test]
    fn rect_hit_test_at_37_degrees() {
        let rect = Rect::from_min_max(pos2(0.0, 0.0), pos2(20.0, 10.0));
        let mut sel = Selection::rectangle(rect);
        sel.rotation = 37.0f32.to_radians();
        // A point just inside each rotated corner must hit; just outside must miss.
        for corner in [rect.left_top(), rect.right_top(), rect.right_bottom(), rect.left_bottom()] {
            let center = rect.center();
            let inward = pos2(
                corner.x + (center.x - corner.x) * 0.05,
                corner.y + (center.y - corner.y) * 0.05,
            );
            let outward = pos2(
                corner.x - (center.x - corner.x) * 0.05,
                corner.y - (center.y - corner.y) * 0.05,
            );
            assert!(point_in_selection(to_transformed(inward, center, sel.rotation), &sel));
            assert!(!point_in_selection(to_transformed(outward, center, sel.rotation), &sel));
        }
    }

    #[test]
    fn rect_hit_test_at_180_degrees() {
        let mut sel = Selection::rectangle(Rect::from_min_max(pos2(0.0, 0.0), pos2(20.0, 10.0)));
        sel.rotation = std::f32::consts::PI;
        // 180° maps the rect onto itself
        assert!(point_in_selection(pos2(1.0, 1.0), &sel));
        assert!(point_in_selection(pos2(19.0, 9.0), &sel));
        assert!(!point_in_selection(pos2(21.0, 5.0), &sel));
    }

    #[test]
    fn polygon_hit_test_triangle() {
        let sel = Selection::polygon(vec![
            pos2(0.0, 0.0),
            pos2(10.0, 0.0),
            pos2(0.0, 10.0),
        ])
        .unwrap();
        assert!(point_in_selection(pos2(2.0, 2.0), &sel));
        assert!(!point_in_selection(pos2(8.0, 8.0), &sel), "outside hypotenuse");
        assert!(!point_in_selection(pos2(-1.0, 5.0), &sel));
    }

    #[test]
    fn polygon_hit_test_concave() {
        // A "U" shape; the notch must be outside.
        let sel = Selection::polygon(vec![
            pos2(0.0, 0.0),
            pos2(30.0, 0.0),
            pos2(30.0, 30.0),
            pos2(20.0, 30.0),
            pos2(20.0, 10.0),
            pos2(10.0, 10.0),
            pos2(10.0, 30.0),
            pos2(0.0, 30.0),
        ])
        .unwrap();
        assert!(point_in_selection(pos2(5.0, 20.0), &sel), "left arm");
        assert!(point_in_selection(pos2(25.0, 20.0), &sel), "right arm");
        assert!(!point_in_selection(pos2(15.0, 20.0), &sel), "notch");
    }

    #[test]
    fn polygon_scaled_hit_test_follows_rect() {
        let mut sel = Selection::polygon(vec![
            pos2(0.0, 0.0),
            pos2(10.0, 0.0),
            pos2(0.0, 10.0),
        ])
        .unwrap();
        // Scale the selection rect 2x; hit tests must scale with it.
        sel.rect = Rect::from_min_max(pos2(0.0, 0.0), pos2(20.0, 20.0));
        assert!(point_in_selection(pos2(4.0, 4.0), &sel));
        assert!(!point_in_selection(pos2(16.0, 16.0), &sel));
    }
}
