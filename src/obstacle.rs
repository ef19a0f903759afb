//! Obstacle avoidance.
//!
//! Obstacles are closed boundary curves in the build region. Avoidance works
//! in the XY projection: each boundary is inflated outward by half the path
//! width (so the path centerline keeps one half-width of clearance), the
//! continuous curve is split at every crossing with the inflated boundary,
//! pieces whose midpoint falls inside the region are discarded, and the
//! survivors are rejoined with straight bridge moves. A curve that never
//! meets an obstacle passes through unchanged.

use crate::curve::Curve;
use crate::geometry::{point_in_polygon_xy, segment_intersection_2d, signed_area_2d, Point3D};
use crate::pattern::ToolpathPattern;
use crate::surface::project_polyline;
use crate::{Error, Result};

/// Everything the avoidance pass produced: the rerouted pattern, the inflated
/// block boundaries pulled onto the pattern surface, and the points where the
/// original curve crossed them.
pub struct AvoidanceOutcome {
    pub pattern: ToolpathPattern,
    pub boundaries: Vec<Curve>,
    pub intersections: Vec<Point3D>,
}

/// Reroute a pattern's continuous curve around the given closed obstacle
/// boundaries. Bundle curves and all other pattern state are rebuilt
/// untouched; only the continuous curve changes.
pub fn avoid_obstacles(
    pattern: &ToolpathPattern,
    obstacles: &[Curve],
) -> Result<AvoidanceOutcome> {
    let clearance = pattern.path_width() / 2.0;
    let surface = pattern.skeleton().surface();
    let mut curve = pattern.continuous_curve().clone();
    let mut boundaries = Vec::with_capacity(obstacles.len());
    let mut intersections = Vec::new();
    for obstacle in obstacles {
        if !obstacle.is_closed() {
            return Err(Error::InvalidParameter(
                "obstacle boundaries must be closed curves".into(),
            ));
        }
        let inflated = offset_polygon_xy(obstacle.points(), clearance);
        boundaries.push(project_polyline(surface.as_ref(), &inflated, true, 2)?);

        let cuts = crossing_lengths(&curve, &inflated);
        for &s in &cuts {
            intersections.push(curve.point_at(s));
        }
        curve = reroute_split(&curve, &inflated, &cuts)?;
    }
    log::debug!(
        "Rerouted around {} obstacle(s), {} crossing(s), curve length {:.3}",
        obstacles.len(),
        intersections.len(),
        curve.length()
    );
    Ok(AvoidanceOutcome {
        pattern: pattern.with_continuous_curve(curve)?,
        boundaries,
        intersections,
    })
}

/// Reroute one open curve around a single closed boundary polygon, keeping
/// `clearance` of distance to it in XY.
pub fn reroute_curve(curve: &Curve, boundary: &[Point3D], clearance: f64) -> Result<Curve> {
    if boundary.len() < 3 {
        return Err(Error::InvalidParameter(
            "obstacle boundary needs at least 3 vertices".into(),
        ));
    }
    let inflated = offset_polygon_xy(boundary, clearance);
    let cuts = crossing_lengths(curve, &inflated);
    reroute_split(curve, &inflated, &cuts)
}

/// Split at the crossing lengths, discard the spans inside the inflated
/// region, and bridge the survivors.
fn reroute_split(curve: &Curve, inflated: &[Point3D], cuts: &[f64]) -> Result<Curve> {
    if cuts.is_empty() {
        // Fully outside (or fully inside, which upstream validation rules out)
        return Ok(curve.clone());
    }

    let pieces = curve.split_at(cuts)?;
    let kept: Vec<&Curve> = pieces
        .iter()
        .filter(|piece| {
            let mid = piece.point_at(piece.length() / 2.0);
            !point_in_polygon_xy(&mid, inflated)
        })
        .collect();
    if kept.is_empty() {
        return Err(Error::DegenerateCurve(
            "obstacle swallows the entire toolpath".into(),
        ));
    }

    // Bridge the gaps left by discarded pieces
    let mut segments: Vec<Curve> = Vec::with_capacity(kept.len() * 2);
    for piece in kept {
        if let Some(prev_end) = segments.last().map(|c: &Curve| c.end()) {
            let gap = (piece.start() - prev_end).norm();
            if gap > 1e-9 {
                segments.push(Curve::line(prev_end, piece.start())?);
            }
        }
        segments.push((*piece).clone());
    }
    Curve::join(&segments, 1e-6)
}

/// Arc lengths at which the curve crosses the polygon's edges (XY).
fn crossing_lengths(curve: &Curve, polygon: &[Point3D]) -> Vec<f64> {
    let pts = curve.points();
    let n = polygon.len();
    let mut cuts = Vec::new();
    let mut arc = 0.0;
    for w in pts.windows(2) {
        let (a, b) = (w[0], w[1]);
        let seg_len = (b - a).norm();
        for e in 0..n {
            let p = polygon[e];
            let q = polygon[(e + 1) % n];
            if let Some((t, u)) =
                segment_intersection_2d((a.x, a.y), (b.x, b.y), (p.x, p.y), (q.x, q.y))
            {
                if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
                    cuts.push(arc + t * seg_len);
                }
            }
        }
        arc += seg_len;
    }
    cuts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    cuts.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    cuts
}

/// Offset a closed polygon outward by `distance` in XY. Vertices move along
/// their mitered corner normal, scaled so every edge line shifts by exactly
/// `distance`.
fn offset_polygon_xy(polygon: &[Point3D], distance: f64) -> Vec<Point3D> {
    let n = polygon.len();
    // Outward is to the right of travel for counter-clockwise boundaries
    let outward_sign = if signed_area_2d(polygon) >= 0.0 { 1.0 } else { -1.0 };

    (0..n)
        .map(|i| {
            let prev = polygon[(i + n - 1) % n];
            let cur = polygon[i];
            let next = polygon[(i + 1) % n];

            let n1 = edge_normal_xy(prev, cur, outward_sign);
            let n2 = edge_normal_xy(cur, next, outward_sign);
            let mut nx = n1.0 + n2.0;
            let mut ny = n1.1 + n2.1;
            let len = (nx * nx + ny * ny).sqrt();
            if len < 1e-12 {
                nx = n2.0;
                ny = n2.1;
            } else {
                nx /= len;
                ny /= len;
            }
            // Miter scale, clamped for near-degenerate spikes
            let cos_half = ((1.0 + (n1.0 * n2.0 + n1.1 * n2.1)) / 2.0).max(0.0).sqrt();
            let scale = distance / cos_half.max(0.1);
            Point3D::new(cur.x + nx * scale, cur.y + ny * scale, cur.z)
        })
        .collect()
}

fn edge_normal_xy(a: Point3D, b: Point3D, outward_sign: f64) -> (f64, f64) {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-12 {
        (0.0, 0.0)
    } else {
        (outward_sign * dy / len, -outward_sign * dx / len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vector3D;
    use crate::grid::{AnchorGrid, AnchorPoint};
    use crate::pattern::PatternKind;
    use crate::skeleton::{Skeleton, SkeletonStrategy};
    use crate::surface::ControlGridSurface;
    use std::rc::Rc;

    fn square_obstacle(cx: f64, cy: f64, half: f64) -> Curve {
        Curve::new(
            vec![
                Point3D::new(cx - half, cy - half, 0.0),
                Point3D::new(cx + half, cy - half, 0.0),
                Point3D::new(cx + half, cy + half, 0.0),
                Point3D::new(cx - half, cy + half, 0.0),
            ],
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_offset_polygon_grows_outward() {
        let sq = square_obstacle(0.0, 0.0, 10.0);
        let grown = offset_polygon_xy(sq.points(), 1.0);
        // Each edge line must move outward by exactly 1: the right-angle
        // corner vertex travels sqrt(2) along the diagonal
        assert!((grown[0].x + 11.0).abs() < 1e-9, "got {}", grown[0].x);
        assert!((grown[0].y + 11.0).abs() < 1e-9, "got {}", grown[0].y);
    }

    #[test]
    fn test_curve_through_square_is_cut() {
        let line = Curve::line(
            Point3D::new(0.0, 30.0, 0.0),
            Point3D::new(60.0, 30.0, 0.0),
        )
        .unwrap();
        let obstacle = square_obstacle(30.0, 30.0, 10.0);
        let out = reroute_curve(&line, obstacle.points(), 0.5).unwrap();

        // Entry and exit vertices at the inflated boundary
        let xs: Vec<f64> = out.points().iter().map(|p| p.x).collect();
        assert!(xs.iter().any(|&x| (x - 19.5).abs() < 1e-6), "xs {:?}", xs);
        assert!(xs.iter().any(|&x| (x - 40.5).abs() < 1e-6), "xs {:?}", xs);
        assert!((out.start() - line.start()).norm() < 1e-9);
        assert!((out.end() - line.end()).norm() < 1e-9);

        // No kept piece midpoint inside the obstacle
        let inflated = offset_polygon_xy(obstacle.points(), 0.5);
        let pieces = out.split_at(&[19.5, 40.5]).unwrap();
        for piece in [&pieces[0], &pieces[2]] {
            let mid = piece.point_at(piece.length() / 2.0);
            assert!(!point_in_polygon_xy(&mid, &inflated));
        }
    }

    #[test]
    fn test_untouched_when_clear() {
        let line = Curve::line(
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(60.0, 0.0, 0.0),
        )
        .unwrap();
        let obstacle = square_obstacle(30.0, 40.0, 5.0);
        let out = reroute_curve(&line, obstacle.points(), 0.5).unwrap();
        assert_eq!(out.points().len(), line.points().len());
        assert!((out.length() - line.length()).abs() < 1e-12);
    }

    #[test]
    fn test_pattern_reroute_keeps_bundles() {
        let surface = Rc::new(ControlGridSurface::planar(80.0, 80.0, 0.0, 3, 3).unwrap());
        let points = vec![(0..5)
            .map(|j| AnchorPoint {
                position: Point3D::new(12.0 * (j as f64 + 1.0), 40.0, 0.0),
                main_dir: Vector3D::x(),
                sub_dir: Vector3D::y(),
            })
            .collect()];
        let grid = AnchorGrid::from_points(points, 12.0).unwrap();
        let skeleton = Rc::new(Skeleton::build(surface, grid, SkeletonStrategy::Spiral).unwrap());
        let pattern = ToolpathPattern::build(
            skeleton,
            PatternKind::Spiral,
            1.0,
            Point3D::origin(),
        )
        .unwrap();

        let obstacle = square_obstacle(36.0, 40.0, 2.0);
        let outcome = avoid_obstacles(&pattern, &[obstacle]).unwrap();
        let rerouted = &outcome.pattern;

        assert_eq!(outcome.boundaries.len(), 1);
        assert!(!outcome.intersections.is_empty());
        assert_eq!(
            rerouted.bundle_curves().len(),
            pattern.bundle_curves().len()
        );
        // Original rings run through the obstacle; the rerouted curve keeps
        // no vertex inside it (test against a slightly smaller inflation so
        // boundary vertices are not misclassified)
        let interior = offset_polygon_xy(
            square_obstacle(36.0, 40.0, 2.0).points(),
            0.4,
        );
        assert!(pattern
            .continuous_curve()
            .points()
            .iter()
            .any(|p| point_in_polygon_xy(p, &interior)));
        assert!(!rerouted
            .continuous_curve()
            .points()
            .iter()
            .any(|p| point_in_polygon_xy(p, &interior)));
    }

    #[test]
    fn test_rejects_open_obstacle() {
        let surface = Rc::new(ControlGridSurface::planar(80.0, 80.0, 0.0, 3, 3).unwrap());
        let grid = AnchorGrid::from_surface(surface.as_ref(), 2, 4, 12.0).unwrap();
        let skeleton = Rc::new(Skeleton::build(surface, grid, SkeletonStrategy::Snake).unwrap());
        let pattern = ToolpathPattern::build(
            skeleton,
            PatternKind::Simple,
            1.0,
            Point3D::origin(),
        )
        .unwrap();

        let open = Curve::line(Point3D::origin(), Point3D::new(10.0, 0.0, 0.0)).unwrap();
        assert!(avoid_obstacles(&pattern, &[open]).is_err());
    }
}
