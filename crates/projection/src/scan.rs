//! Triangle scan-conversion of a projected quadrilateral onto grid squares.
//!
//! An exposed screen rectangle, mapped through the inverse projection,
//! becomes a quadrilateral in grid space. [`covered_squares`] splits it into
//! two triangles sharing the top-right/bottom-left diagonal and scans each,
//! emitting every integer square the quadrilateral touches, deduplicated
//! across the shared diagonal in first-emission order.

use crate::{TilePoint, TilePointF};
use std::collections::HashSet;

/// Quadrilateral corners in grid space, named for the screen-rect corner
/// each was projected from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridQuad {
    pub top_left: TilePointF,
    pub top_right: TilePointF,
    pub bottom_left: TilePointF,
    pub bottom_right: TilePointF,
}

/// Emits the set of integer squares covered by `quad`, with rows clamped to
/// `y_min..y_max`. Columns are not clamped; callers reject out-of-range
/// squares when resolving them. Output order is deterministic and does not
/// depend on the winding of the input corners.
pub fn covered_squares(quad: &GridQuad, y_min: i32, y_max: i32) -> Vec<TilePoint> {
    let mut out = SquareSet::default();
    scan_triangle(
        quad.top_left,
        quad.top_right,
        quad.bottom_left,
        y_min,
        y_max,
        &mut out,
    );
    scan_triangle(
        quad.top_right,
        quad.bottom_right,
        quad.bottom_left,
        y_min,
        y_max,
        &mut out,
    );
    out.points
}

#[derive(Default)]
struct SquareSet {
    points: Vec<TilePoint>,
    seen: HashSet<TilePoint>,
}

impl SquareSet {
    fn scan_line(&mut self, x0: i32, x1: i32, y: i32) {
        for x in x0..x1 {
            let point = TilePoint::new(x, y);
            if self.seen.insert(point) {
                self.points.push(point);
            }
        }
    }
}

/// An edge oriented so `y0 <= y1`.
#[derive(Debug, Clone, Copy)]
struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    dx: f64,
    dy: f64,
}

impl Edge {
    fn new(a: TilePointF, b: TilePointF) -> Self {
        let (a, b) = if a.y > b.y { (b, a) } else { (a, b) };
        Self {
            x0: a.x,
            y0: a.y,
            x1: b.x,
            y1: b.y,
            dx: b.x - a.x,
            dy: b.y - a.y,
        }
    }
}

fn scan_triangle(
    a: TilePointF,
    b: TilePointF,
    c: TilePointF,
    y_min: i32,
    y_max: i32,
    out: &mut SquareSet,
) {
    let mut ab = Edge::new(a, b);
    let mut bc = Edge::new(b, c);
    let mut ca = Edge::new(c, a);

    // sort so the edge with the greatest vertical span ends up in `ca`
    if ab.dy > bc.dy {
        std::mem::swap(&mut ab, &mut bc);
    }
    if ab.dy > ca.dy {
        std::mem::swap(&mut ab, &mut ca);
    }
    if bc.dy > ca.dy {
        std::mem::swap(&mut bc, &mut ca);
    }

    // a zero-span short edge contributes no scan lines
    if ab.dy > 0.0 {
        scan_span(ca, ab, y_min, y_max, out);
    }
    if bc.dy > 0.0 {
        scan_span(ca, bc, y_min, y_max, out);
    }
}

/// Scans the rows spanned by the shorter edge `e1` against the longer
/// edge `e0`.
fn scan_span(e0: Edge, e1: Edge, y_min: i32, y_max: i32, out: &mut SquareSet) {
    let y0 = e1.y0.floor().max(y_min as f64) as i32;
    let y1 = e1.y1.ceil().min(y_max as f64) as i32;

    // order the edges left/right by comparing slope-projected x; if they
    // share their start point, compare at the shorter edge's end instead
    let (e0, e1) = if e0.x0 == e1.x0 && e0.y0 == e1.y0 {
        if e0.x0 + e1.dy / e0.dy * e0.dx < e1.x1 {
            (e1, e0)
        } else {
            (e0, e1)
        }
    } else if e0.x1 - e1.dy / e0.dy * e0.dx < e1.x0 {
        (e1, e0)
    } else {
        (e0, e1)
    };

    let m0 = e0.dx / e0.dy;
    let m1 = e1.dx / e1.dy;

    // sample each edge on the side facing the triangle interior
    let d0 = if e0.dx > 0.0 { 1.0 } else { 0.0 };
    let d1 = if e1.dx < 0.0 { 1.0 } else { 0.0 };

    for y in y0..y1 {
        let x0 = m0 * (y as f64 + d0 - e0.y0).min(e0.dy).max(0.0) + e0.x0;
        let x1 = m1 * (y as f64 + d1 - e1.y0).min(e1.dy).max(0.0) + e1.x0;
        out.scan_line(x1.floor() as i32, x0.ceil() as i32, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MapGeometry, Projector, ScreenPointF, ScreenRectF};
    use std::collections::HashSet;

    fn grid_quad(projector: &Projector, exposed: &ScreenRectF, level: i32) -> GridQuad {
        GridQuad {
            top_left: projector.screen_to_tile(exposed.top_left(), level),
            top_right: projector.screen_to_tile(exposed.top_right(), level),
            bottom_left: projector.screen_to_tile(exposed.bottom_left(), level),
            bottom_right: projector.screen_to_tile(exposed.bottom_right(), level),
        }
    }

    #[test]
    fn sub_tile_rect_yields_exactly_one_square() {
        let p = Projector::new(MapGeometry::default(), 0, false);
        let center = p.tile_to_screen(crate::TilePointF::new(50.5, 50.5), 0);
        let exposed = ScreenRectF::new(center.x - 1.0, center.y - 1.0, 2.0, 2.0);
        let squares = covered_squares(&grid_quad(&p, &exposed, 0), -300, 600);
        assert_eq!(squares, vec![TilePoint::new(50, 50)]);
    }

    #[test]
    fn one_tile_rect_stays_within_the_immediate_neighborhood() {
        let p = Projector::new(MapGeometry::default(), 0, false);
        let center = p.tile_to_screen(crate::TilePointF::new(50.5, 50.5), 0);
        let exposed = ScreenRectF::new(center.x - 32.0, center.y - 16.0, 64.0, 32.0);
        let squares = covered_squares(&grid_quad(&p, &exposed, 0), -300, 600);

        assert!(squares.contains(&TilePoint::new(50, 50)));
        for s in &squares {
            assert!(
                (s.x - 50).abs() + (s.y - 50).abs() <= 2,
                "square {s:?} outside the influence region"
            );
        }
    }

    #[test]
    fn covers_every_point_sampled_inside_the_exposed_rect() {
        let p = Projector::new(MapGeometry::default(), 1, false);
        let exposed = ScreenRectF::new(9000.0, 400.0, 700.0, 350.0);
        let squares: HashSet<TilePoint> = covered_squares(&grid_quad(&p, &exposed, 1), -300, 600)
            .into_iter()
            .collect();

        // strictly interior samples; the rect boundary itself maps to
        // measure-zero square touches the over-approximation may skip
        for sx in 1..20 {
            for sy in 1..20 {
                let point = ScreenPointF::new(
                    exposed.x + exposed.width * sx as f64 / 20.0,
                    exposed.y + exposed.height * sy as f64 / 20.0,
                );
                let tile = p.screen_to_tile(point, 1).floor();
                assert!(
                    squares.contains(&tile),
                    "square {tile:?} under screen point {point:?} not covered"
                );
            }
        }
    }

    #[test]
    fn output_set_is_independent_of_corner_winding() {
        let p = Projector::new(MapGeometry::default(), 0, false);
        let exposed = ScreenRectF::new(9100.0, 128.0, 512.0, 256.0);
        let quad = grid_quad(&p, &exposed, 0);
        // rotate the rectangle 180 degrees: same region, opposite winding
        let rotated = GridQuad {
            top_left: quad.bottom_right,
            top_right: quad.bottom_left,
            bottom_left: quad.top_right,
            bottom_right: quad.top_left,
        };

        let a: HashSet<TilePoint> = covered_squares(&quad, -300, 600).into_iter().collect();
        let b: HashSet<TilePoint> = covered_squares(&rotated, -300, 600).into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn row_clamp_limits_emission() {
        let p = Projector::new(MapGeometry::default(), 0, false);
        let exposed = ScreenRectF::new(9000.0, 0.0, 1200.0, 600.0);
        let squares = covered_squares(&grid_quad(&p, &exposed, 0), 5, 12);
        assert!(!squares.is_empty());
        for s in squares {
            assert!(s.y >= 5 && s.y < 12, "row clamp violated by {s:?}");
        }
    }

    #[test]
    fn degenerate_quad_emits_nothing() {
        let corner = TilePointF::new(4.0, 4.0);
        let flat = GridQuad {
            top_left: corner,
            top_right: TilePointF::new(9.0, 4.0),
            bottom_left: corner,
            bottom_right: TilePointF::new(9.0, 4.0),
        };
        assert!(covered_squares(&flat, -300, 600).is_empty());
    }

    #[test]
    fn no_duplicate_squares_across_the_shared_diagonal() {
        let p = Projector::new(MapGeometry::default(), 0, false);
        let exposed = ScreenRectF::new(9200.0, 300.0, 900.0, 500.0);
        let squares = covered_squares(&grid_quad(&p, &exposed, 0), -300, 600);
        let unique: HashSet<TilePoint> = squares.iter().copied().collect();
        assert_eq!(unique.len(), squares.len());
    }
}
