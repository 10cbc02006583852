//! Line and polygon simplification using the Ramer-Douglas-Peucker
//! algorithm.
//!
//! Points within `tolerance` of the chord between their kept neighbors
//! are dropped. Rings keep at least three distinct vertices. A polygon
//! whose simplified form would be invalid, or a simple line whose
//! simplified form would cross itself, is retried with a smaller
//! tolerance before falling back to the input.

use geo::line_intersection::{LineIntersection, line_intersection};
use geo::{Coord, Line, LineString, MultiPolygon, Polygon, Validation};

/// How many times a geometry is retried with half the tolerance.
const MAX_VALIDITY_RETRIES: usize = 4;

/// Topology-aware simplification.
///
/// The output never has more vertices than the input.
pub trait TopologySimplify {
    /// Simplify with the given tolerance (CRS units).
    #[must_use = "returns the simplified geometry"]
    fn simplify_topology(&self, tolerance: f64) -> Self;
}

impl TopologySimplify for LineString<f64> {
    fn simplify_topology(&self, tolerance: f64) -> Self {
        if !is_simple(self) {
            return LineString::new(rdp(&self.0, tolerance));
        }
        let mut tolerance = tolerance;
        for _ in 0..=MAX_VALIDITY_RETRIES {
            let candidate = LineString::new(rdp(&self.0, tolerance));
            if is_simple(&candidate) {
                return candidate;
            }
            tolerance /= 2.0;
        }
        log::debug!("line simplification kept input: every result crossed itself");
        self.clone()
    }
}

/// Whether no two segments of `line` touch, apart from consecutive
/// segments meeting at their shared vertex (and the closing vertex of a
/// ring).
fn is_simple(line: &LineString<f64>) -> bool {
    let segments: Vec<Line<f64>> = line.lines().filter(|l| l.start != l.end).collect();
    let closed = line.is_closed() && segments.len() > 2;
    let last = segments.len().saturating_sub(1);
    for (i, a) in segments.iter().enumerate() {
        for (j, b) in segments.iter().enumerate().skip(i + 1) {
            let adjacent = j == i + 1 || (closed && i == 0 && j == last);
            match line_intersection(*a, *b) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(_) => return false,
            }
        }
    }
    true
}

impl TopologySimplify for Polygon<f64> {
    fn simplify_topology(&self, tolerance: f64) -> Self {
        let mut tolerance = tolerance;
        for _ in 0..=MAX_VALIDITY_RETRIES {
            let candidate = simplify_polygon_once(self, tolerance);
            if candidate.is_valid() {
                return candidate;
            }
            tolerance /= 2.0;
        }
        log::debug!("polygon simplification kept input: no valid result");
        self.clone()
    }
}

impl TopologySimplify for MultiPolygon<f64> {
    fn simplify_topology(&self, tolerance: f64) -> Self {
        MultiPolygon::new(
            self.0
                .iter()
                .map(|p| p.simplify_topology(tolerance))
                .collect(),
        )
    }
}

/// Simplify any supported geometry.
#[must_use = "returns the simplified geometry"]
pub fn simplify<G: TopologySimplify>(geometry: &G, tolerance: f64) -> G {
    geometry.simplify_topology(tolerance)
}

fn simplify_polygon_once(polygon: &Polygon<f64>, tolerance: f64) -> Polygon<f64> {
    let exterior = simplify_ring(polygon.exterior(), tolerance);
    let interiors = polygon
        .interiors()
        .iter()
        .map(|ring| simplify_ring(ring, tolerance))
        .collect();
    Polygon::new(exterior, interiors)
}

/// Simplify a closed ring, keeping at least three distinct vertices.
fn simplify_ring(ring: &LineString<f64>, tolerance: f64) -> LineString<f64> {
    let coords = &ring.0;
    // A closed ring with fewer than five coords has at most three distinct
    // vertices already.
    if coords.len() < 5 || !ring.is_closed() {
        return ring.clone();
    }
    let simplified = rdp(coords, tolerance);
    if simplified.len() < 4 {
        return ring.clone();
    }
    LineString::new(simplified)
}

/// Ramer-Douglas-Peucker over a coordinate sequence.
///
/// Endpoints are always kept. Sequences shorter than three points are
/// returned unchanged. A tolerance of 0.0 keeps every point that is not
/// exactly on its chord.
fn rdp(points: &[Coord<f64>], tolerance: f64) -> Vec<Coord<f64>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[points.len() - 1] = true;

    let mut spans = vec![(0, points.len() - 1)];
    while let Some((start, end)) = spans.pop() {
        if end <= start + 1 {
            continue;
        }

        let mut max_dist = 0.0;
        let mut max_idx = start;
        for i in (start + 1)..end {
            let d = perpendicular_distance(points[i], points[start], points[end]);
            if d > max_dist {
                max_dist = d;
                max_idx = i;
            }
        }

        if max_dist > tolerance {
            kept[max_idx] = true;
            spans.push((start, max_idx));
            spans.push((max_idx, end));
        }
    }

    points
        .iter()
        .zip(&kept)
        .filter(|&(_, k)| *k)
        .map(|(&p, _)| p)
        .collect()
}

/// Perpendicular distance from `p` to the line through `a` and `b`.
///
/// When `a` and `b` coincide (the chord of a closed ring), returns the
/// distance from `p` to `a`.
fn perpendicular_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return (p.x - a.x).hypot(p.y - a.y);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}
