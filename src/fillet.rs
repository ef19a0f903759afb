//! Corner rounding.
//!
//! Sharp tangent discontinuities in a toolpath force the machine to stop and
//! re-accelerate, and in fiber processes they kink the material. The fillet
//! pass detects vertices where the tangent turns by more than a threshold and
//! replaces them with a three-point blend: a trim-back point on the incoming
//! segment, the quadratic midpoint, and a trim-forward point on the outgoing
//! segment, all pulled back onto the surface so the rounded corner does not
//! lift off it.

use crate::curve::Curve;
use crate::geometry::Point3D;
use crate::stack::ToolpathStack;
use crate::surface::Surface;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Corner rounding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilletConfig {
    /// Target blend radius; the trim distance never exceeds it.
    pub radius: f64,
    /// Fraction of the shorter adjacent segment the trim may consume, keeping
    /// blends of neighboring corners from eating each other.
    pub trim_factor: f64,
    /// Minimum tangent turn for a vertex to count as a corner.
    pub angle_threshold_deg: f64,
}

impl Default for FilletConfig {
    fn default() -> Self {
        Self {
            radius: 2.0,
            trim_factor: 0.4,
            angle_threshold_deg: 30.0,
        }
    }
}

impl FilletConfig {
    fn validate(&self) -> Result<()> {
        if self.radius <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "fillet radius must be positive, got {}",
                self.radius
            )));
        }
        if !(0.0..=0.5).contains(&self.trim_factor) {
            return Err(Error::InvalidParameter(format!(
                "trim factor must lie in [0, 0.5], got {}",
                self.trim_factor
            )));
        }
        Ok(())
    }
}

/// Round the corners of a curve, pulling every blend point onto `surface`.
pub fn fillet_curve<S: Surface>(
    surface: &S,
    curve: &Curve,
    config: &FilletConfig,
) -> Result<Curve> {
    config.validate()?;
    let pts = fillet_points(curve.points(), curve.is_closed(), config, |p| {
        surface.pull_point(p)
    })?;
    Curve::new(pts, curve.is_closed())
}

/// Round an entire stack: each layer curve is smoothed against its own layer
/// surface, then the layers are re-joined and the joint corners rounded in
/// free space (the joints sit between layers where there is no single surface
/// to pull to). Returns the smoothed joined curve plus the per-layer curves.
pub fn fillet_stack(
    stack: &ToolpathStack,
    config: &FilletConfig,
) -> Result<(Curve, Vec<Curve>)> {
    config.validate()?;

    let mut layer_curves = Vec::with_capacity(stack.layer_count());
    for (layer, surface) in stack.layers().iter().zip(stack.layer_surfaces()) {
        layer_curves.push(fillet_curve(surface, &layer.curve, config)?);
    }

    let mut segments: Vec<Curve> = Vec::with_capacity(layer_curves.len() * 2);
    for curve in &layer_curves {
        if let Some(prev_end) = segments.last().map(|c: &Curve| c.end()) {
            segments.push(Curve::line(prev_end, curve.start())?);
        }
        segments.push(curve.clone());
    }
    let joined = Curve::join(&segments, 1e-6)?;

    let pts = fillet_points(joined.points(), false, config, |p| Ok(*p))?;
    let smoothed = Curve::new(pts, false)?;
    log::debug!(
        "Fillet pass: {} layer curve(s), smoothed length {:.3}",
        layer_curves.len(),
        smoothed.length()
    );
    Ok((smoothed, layer_curves))
}

/// Core pass: replace every corner vertex with its three-point blend,
/// mapping each emitted point through `pull`.
fn fillet_points<F>(
    points: &[Point3D],
    closed: bool,
    config: &FilletConfig,
    pull: F,
) -> Result<Vec<Point3D>>
where
    F: Fn(&Point3D) -> Result<Point3D>,
{
    let n = points.len();
    let cos_threshold = config.angle_threshold_deg.to_radians().cos();
    let mut out: Vec<Point3D> = Vec::with_capacity(n * 2);

    let is_corner_range = if closed { 0..n } else { 1..n.saturating_sub(1) };
    if !closed {
        out.push(points[0]);
    }

    for k in is_corner_range {
        let p = points[k];
        let prev = points[(k + n - 1) % n];
        let next = points[(k + 1) % n];
        let din = p - prev;
        let dout = next - p;
        let lin = din.norm();
        let lout = dout.norm();
        if lin < 1e-12 || lout < 1e-12 {
            out.push(p);
            continue;
        }

        let cos = din.dot(&dout) / (lin * lout);
        if cos >= cos_threshold {
            // Tangent continuous enough; keep the vertex
            out.push(p);
            continue;
        }

        let trim = config
            .radius
            .min(config.trim_factor * lin.min(lout));
        let a = p - din * (trim / lin);
        let c = p + dout * (trim / lout);
        // Quadratic midpoint of the blend a -> p -> c
        let mid = Point3D::from((a.coords + c.coords) * 0.25 + p.coords * 0.5);

        out.push(pull(&a)?);
        out.push(pull(&mid)?);
        out.push(pull(&c)?);
    }

    if !closed {
        out.push(points[n - 1]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::ControlGridSurface;

    fn right_angle() -> Curve {
        Curve::new(
            vec![
                Point3D::new(0.0, 0.0, 0.0),
                Point3D::new(10.0, 0.0, 0.0),
                Point3D::new(10.0, 10.0, 0.0),
            ],
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_fillet_rounds_right_angle() {
        let s = ControlGridSurface::planar(20.0, 20.0, 0.0, 3, 3).unwrap();
        let rounded = fillet_curve(&s, &right_angle(), &FilletConfig::default()).unwrap();

        // The corner vertex at (10, 0) is gone, replaced by the blend triple
        assert_eq!(rounded.points().len(), 5);
        for p in rounded.points() {
            assert!((p - Point3D::new(10.0, 0.0, 0.0)).norm() > 0.5);
        }
        // Shortcutting the corner shrinks the curve
        assert!(rounded.length() < right_angle().length());
        // Endpoints are untouched
        assert!((rounded.start() - Point3D::origin()).norm() < 1e-9);
        assert!((rounded.end() - Point3D::new(10.0, 10.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_shallow_bend_untouched() {
        let s = ControlGridSurface::planar(40.0, 40.0, 0.0, 3, 3).unwrap();
        let gentle = Curve::new(
            vec![
                Point3D::new(0.0, 0.0, 0.0),
                Point3D::new(10.0, 0.0, 0.0),
                Point3D::new(20.0, 2.0, 0.0), // ~11 degrees
            ],
            false,
        )
        .unwrap();
        let out = fillet_curve(&s, &gentle, &FilletConfig::default()).unwrap();
        assert_eq!(out.points().len(), 3);
    }

    #[test]
    fn test_closed_square_gets_four_blends() {
        let s = ControlGridSurface::planar(20.0, 20.0, 0.0, 3, 3).unwrap();
        let square = Curve::new(
            vec![
                Point3D::new(2.0, 2.0, 0.0),
                Point3D::new(12.0, 2.0, 0.0),
                Point3D::new(12.0, 12.0, 0.0),
                Point3D::new(2.0, 12.0, 0.0),
            ],
            true,
        )
        .unwrap();
        let out = fillet_curve(&s, &square, &FilletConfig::default()).unwrap();
        // Each corner vertex became three blend points
        assert_eq!(out.points().len(), 12);
        assert!(out.is_closed());
    }

    #[test]
    fn test_blend_points_follow_surface() {
        // Raised center: blends near the bump must land on it, not under it
        let control = (0..5)
            .map(|i| {
                (0..5)
                    .map(|j| {
                        let z = if i == 2 && j == 2 { 3.0 } else { 0.0 };
                        Point3D::new(2.5 * i as f64, 2.5 * j as f64, z)
                    })
                    .collect()
            })
            .collect();
        let s = ControlGridSurface::new(control, (0.0, 10.0), (0.0, 10.0)).unwrap();

        let bent = Curve::new(
            vec![
                Point3D::new(1.0, 5.0, 0.0),
                Point3D::new(5.0, 5.0, 1.5),
                Point3D::new(5.0, 9.0, 0.0),
            ],
            false,
        )
        .unwrap();
        let out = fillet_curve(&s, &bent, &FilletConfig::default()).unwrap();
        for p in out.points() {
            let q = s.pull_point(p).unwrap();
            assert!((p - q).norm() < 1e-6, "blend point off surface: {:?}", p);
        }
    }

    #[test]
    fn test_fillet_stack_smooths_layers() {
        use crate::grid::AnchorGrid;
        use crate::pattern::{PatternKind, ToolpathPattern};
        use crate::skeleton::{Skeleton, SkeletonStrategy};
        use crate::stack::{StackConfig, StackKind, StackPatterns};
        use std::rc::Rc;

        let surface = Rc::new(ControlGridSurface::planar(60.0, 60.0, 0.0, 3, 3).unwrap());
        let grid = AnchorGrid::from_surface(surface.as_ref(), 3, 3, 12.0).unwrap();
        let skeleton = Rc::new(Skeleton::build(surface, grid, SkeletonStrategy::Spiral).unwrap());
        let pattern = Rc::new(
            ToolpathPattern::build(skeleton, PatternKind::Spiral, 1.0, Point3D::origin()).unwrap(),
        );
        let stack = crate::stack::ToolpathStack::build(
            StackPatterns::mains_only(vec![pattern]),
            StackKind::Vertical { total_height: 4.0 },
            StackConfig {
                layer_height: 2.0,
                sample_spacing: 5.0,
                ..StackConfig::default()
            },
        )
        .unwrap();

        let (smoothed, layers) = fillet_stack(&stack, &FilletConfig::default()).unwrap();
        assert_eq!(layers.len(), stack.layer_count());
        // Rounding only ever shortcuts corners
        assert!(smoothed.length() <= stack.joined_curve().length() + 1e-6);
        assert!(smoothed.length() > 0.0);
    }

    #[test]
    fn test_rejects_bad_config() {
        let s = ControlGridSurface::planar(20.0, 20.0, 0.0, 3, 3).unwrap();
        let cfg = FilletConfig {
            radius: -1.0,
            ..FilletConfig::default()
        };
        assert!(fillet_curve(&s, &right_angle(), &cfg).is_err());

        let cfg = FilletConfig {
            trim_factor: 0.9,
            ..FilletConfig::default()
        };
        assert!(fillet_curve(&s, &right_angle(), &cfg).is_err());
    }
}
