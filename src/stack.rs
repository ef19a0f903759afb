//! Layer stacking.
//!
//! A toolpath stack lifts strip patterns into a sequence of layer surfaces and
//! produces, per layer, a remapped continuous curve, tool orientation frames
//! and deposition speed factors, plus one joined curve over the whole stack.
//!
//! Layer surfaces come from the stack kind: `Vertical` offsets the base
//! surface along its normals in layer-height steps, `Between` morphs the base
//! control grid towards a target surface, and `BetweenProjected` uses the same
//! morph but transfers curve points by vertical projection instead of
//! parameter remapping (for stacks whose sides must stay plumb).
//!
//! Layers are independent once their surface and source pattern are fixed, so
//! the per-layer work runs in parallel and is collected back in layer order.

use std::rc::Rc;

use rayon::prelude::*;

use crate::curve::Curve;
use crate::geometry::{OrientationFrame, Point3D, Vector3D};
use crate::pattern::ToolpathPattern;
use crate::surface::{ControlGridSurface, Surface};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Sample count per axis for the average-distance estimate between the base
/// and target surfaces.
const DISTANCE_SAMPLES: usize = 8;

/// How layer surfaces are derived from the base surface.
#[derive(Debug, Clone)]
pub enum StackKind {
    /// Equal normal offsets of the base surface up to `total_height`.
    Vertical { total_height: f64 },
    /// Control-grid morph from the base towards `top`; curve points follow
    /// the surface parametrization.
    Between { top: Rc<ControlGridSurface> },
    /// Same surfaces as `Between`, but curve points transfer by vertical
    /// projection so walls stay plumb.
    BetweenProjected { top: Rc<ControlGridSurface> },
}

/// Tool orientation policy along the layer curves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrientationMode {
    /// Tool up is world Z everywhere.
    Global,
    /// Tool up follows the layer surface normal, tilted about the frame's own
    /// Y axis by `tilt_deg`.
    Local { tilt_deg: f64 },
}

/// Stack sampling and orientation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub layer_height: f64,
    /// Arc-length spacing of the orientation/speed samples.
    pub sample_spacing: f64,
    pub orientation: OrientationMode,
    /// In-plane reference for the frame X direction; defaults to the layer
    /// surface's domain center.
    pub reference: Option<Point3D>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            layer_height: 1.0,
            sample_spacing: 2.0,
            orientation: OrientationMode::Global,
            reference: None,
        }
    }
}

/// The pattern assignment for a stack: dedicated bottom layers, cycled main
/// layers, dedicated top layers.
pub struct StackPatterns {
    pub bottoms: Vec<Rc<ToolpathPattern>>,
    pub mains: Vec<Rc<ToolpathPattern>>,
    pub tops: Vec<Rc<ToolpathPattern>>,
}

impl StackPatterns {
    pub fn mains_only(mains: Vec<Rc<ToolpathPattern>>) -> Self {
        Self {
            bottoms: Vec::new(),
            mains,
            tops: Vec::new(),
        }
    }

    /// Pattern for layer `n` of `count`: bottoms first, tops last, mains
    /// cycled in between.
    fn assigned(&self, n: usize, count: usize) -> &Rc<ToolpathPattern> {
        if n < self.bottoms.len() {
            &self.bottoms[n]
        } else if n >= count - self.tops.len() {
            &self.tops[n - (count - self.tops.len())]
        } else {
            &self.mains[(n - self.bottoms.len()) % self.mains.len()]
        }
    }
}

/// One fabricated layer: the remapped continuous curve plus orientation
/// frames and speed factors sampled along it.
pub struct LayerToolpath {
    pub curve: Curve,
    pub frames: Vec<OrientationFrame>,
    pub speed_factors: Vec<f64>,
}

/// A built stack. Read-only after construction.
pub struct ToolpathStack {
    kind: StackKind,
    config: StackConfig,
    patterns: StackPatterns,
    layer_surfaces: Vec<ControlGridSurface>,
    layers: Vec<LayerToolpath>,
    joined_curve: Curve,
}

impl ToolpathStack {
    /// Build a stack whose first layer sits on the patterns' own surface.
    pub fn build(patterns: StackPatterns, kind: StackKind, config: StackConfig) -> Result<Self> {
        Self::assemble(patterns, kind, config, None)
    }

    /// Build a stack on top of an existing surface (continuing a previous
    /// stack). For `Vertical` kinds the layer coinciding with `on_top` is
    /// dropped, since that material already exists.
    pub fn offset_on_top(
        patterns: StackPatterns,
        kind: StackKind,
        config: StackConfig,
        on_top: Rc<ControlGridSurface>,
    ) -> Result<Self> {
        Self::assemble(patterns, kind, config, Some(on_top))
    }

    fn assemble(
        patterns: StackPatterns,
        kind: StackKind,
        config: StackConfig,
        on_top: Option<Rc<ControlGridSurface>>,
    ) -> Result<Self> {
        if config.layer_height <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "layer height must be positive, got {}",
                config.layer_height
            )));
        }
        if config.sample_spacing <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "sample spacing must be positive, got {}",
                config.sample_spacing
            )));
        }
        if patterns.mains.is_empty() {
            return Err(Error::InvalidParameter(
                "stack needs at least one main pattern".into(),
            ));
        }

        // Layer surfaces derive from the first main pattern's base surface;
        // offsets start from the continuation surface when one is given.
        let base: ControlGridSurface = patterns.mains[0].skeleton().surface().as_ref().clone();
        let offset_base: ControlGridSurface = on_top
            .as_ref()
            .map(|s| s.as_ref().clone())
            .unwrap_or_else(|| base.clone());

        let surfaces = layer_surfaces(&kind, &offset_base, config.layer_height, on_top.is_some())?;
        let count = surfaces.len();
        if patterns.bottoms.len() + patterns.tops.len() > count {
            return Err(Error::InvalidParameter(format!(
                "{} bottom + {} top patterns exceed {} layers",
                patterns.bottoms.len(),
                patterns.tops.len(),
                count
            )));
        }

        log::info!(
            "Stacking {} layer(s), layer height {}, {:?}",
            count,
            config.layer_height,
            config.orientation
        );

        // Pull the source points and each pattern's own base surface out of
        // the shared patterns up front; the parallel section only sees owned
        // geometry. Remapping goes through the assigned pattern's base, not
        // the stack base, so a bottom or top pattern drawn on a different
        // surface keeps its own UV footprint.
        let sources: Vec<(Vec<Point3D>, ControlGridSurface)> = (0..count)
            .map(|n| {
                let pattern = patterns.assigned(n, count);
                (
                    pattern.continuous_curve().points().to_vec(),
                    pattern.skeleton().surface().as_ref().clone(),
                )
            })
            .collect();

        let project_vertically = matches!(kind, StackKind::BetweenProjected { .. });
        let layers: Vec<LayerToolpath> = sources
            .into_par_iter()
            .enumerate()
            .map(|(n, (points, remap_base))| {
                build_layer(
                    &points,
                    n,
                    &surfaces,
                    &remap_base,
                    project_vertically,
                    &config,
                )
            })
            .collect::<Result<_>>()?;

        let joined_curve = join_layers(&layers)?;
        log::debug!("Joined stack curve length {:.3}", joined_curve.length());

        Ok(Self {
            kind,
            config,
            patterns,
            layer_surfaces: surfaces,
            layers,
            joined_curve,
        })
    }

    pub fn kind(&self) -> &StackKind {
        &self.kind
    }

    pub fn config(&self) -> StackConfig {
        self.config
    }

    pub fn patterns(&self) -> &StackPatterns {
        &self.patterns
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_surfaces(&self) -> &[ControlGridSurface] {
        &self.layer_surfaces
    }

    pub fn layers(&self) -> &[LayerToolpath] {
        &self.layers
    }

    /// Topmost layer surface, the base for a follow-up `offset_on_top` stack.
    pub fn top_surface(&self) -> &ControlGridSurface {
        &self.layer_surfaces[self.layer_surfaces.len() - 1]
    }

    /// All layer curves joined with straight inter-layer connectors.
    pub fn joined_curve(&self) -> &Curve {
        &self.joined_curve
    }
}

/// Derive the layer surfaces for a stack kind.
fn layer_surfaces(
    kind: &StackKind,
    base: &ControlGridSurface,
    layer_height: f64,
    skip_first: bool,
) -> Result<Vec<ControlGridSurface>> {
    match kind {
        StackKind::Vertical { total_height } => {
            if *total_height <= 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "total height must be positive, got {}",
                    total_height
                )));
            }
            let layer_num = (total_height / layer_height).floor() as usize;
            if layer_num == 0 {
                return Err(Error::InvalidParameter(format!(
                    "total height {} below one layer height {}",
                    total_height, layer_height
                )));
            }
            // Offsets go with the surface's dominant normal; a downward facing
            // base still stacks upward in world terms
            let sign = if base.mean_normal().z < 0.0 { -1.0 } else { 1.0 };
            let first = if skip_first { 1 } else { 0 };
            (first..layer_num)
                .map(|i| base.offset(sign * i as f64 * layer_height))
                .collect()
        }
        StackKind::Between { top } | StackKind::BetweenProjected { top } => {
            let (nu, nv) = base.dims();
            let top_matched = top.rebuild(nu, nv)?;
            let avg = top_matched.average_distance_to(base, DISTANCE_SAMPLES)?;
            let layer_num = ((avg / layer_height).floor() as usize + 1).max(2);
            (0..layer_num)
                .map(|i| {
                    let t = i as f64 / (layer_num - 1) as f64;
                    ControlGridSurface::lerp(base, &top_matched, t)
                })
                .collect()
        }
    }
}

/// Remap one pattern curve onto its layer surface and sample orientation
/// frames and speed factors along it.
fn build_layer(
    points: &[Point3D],
    n: usize,
    surfaces: &[ControlGridSurface],
    remap_base: &ControlGridSurface,
    project_vertically: bool,
    config: &StackConfig,
) -> Result<LayerToolpath> {
    let surface = &surfaces[n];
    let mapped: Vec<Point3D> = points
        .iter()
        .map(|p| {
            if project_vertically {
                surface.project_z(p)
            } else {
                surface.remap_from(remap_base, p)
            }
        })
        .collect::<Result<_>>()?;
    let curve = Curve::new(mapped, false)?;

    // Frame X points outward from the reference, flattened to world XY
    let reference = config.reference.unwrap_or_else(|| {
        let ((u0, u1), (v0, v1)) = surface.domain();
        surface.point_at((u0 + u1) / 2.0, (v0 + v1) / 2.0)
    });

    let samples = curve.resample(config.sample_spacing);
    let mut frames = Vec::with_capacity(samples.len());
    let mut speed_factors = Vec::with_capacity(samples.len());
    for p in &samples {
        let mut x_hint = p - reference;
        x_hint.z = 0.0;

        let frame = match config.orientation {
            OrientationMode::Global => {
                OrientationFrame::from_up_and_x_hint(*p, Vector3D::z(), x_hint)
            }
            OrientationMode::Local { tilt_deg } => {
                let (u, v) = surface.closest_point(p)?;
                let mut up = surface.normal_at(u, v);
                if up.z < 0.0 {
                    up = -up;
                }
                OrientationFrame::from_up_and_x_hint(*p, up, x_hint)
                    .rotated_about_y(tilt_deg.to_radians())
            }
        };
        frames.push(frame);

        // Speed scales with the local gap to the next layer; the terminal
        // layer has no gap to measure and runs at nominal speed
        let factor = if n + 1 < surfaces.len() {
            let q = surfaces[n + 1].pull_point(p)?;
            (p - q).norm() / config.layer_height
        } else {
            1.0
        };
        speed_factors.push(factor);
    }

    Ok(LayerToolpath {
        curve,
        frames,
        speed_factors,
    })
}

fn join_layers(layers: &[LayerToolpath]) -> Result<Curve> {
    let mut segments: Vec<Curve> = Vec::new();
    for layer in layers {
        if let Some(prev_end) = segments.last().map(|c: &Curve| c.end()) {
            segments.push(Curve::line(prev_end, layer.curve.start())?);
        }
        segments.push(layer.curve.clone());
    }
    Curve::join(&segments, 1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::AnchorGrid;
    use crate::pattern::PatternKind;
    use crate::skeleton::{Skeleton, SkeletonStrategy};

    fn planar_pattern(path_width: f64) -> Rc<ToolpathPattern> {
        let surface = Rc::new(ControlGridSurface::planar(60.0, 60.0, 0.0, 3, 3).unwrap());
        let grid = AnchorGrid::from_surface(surface.as_ref(), 3, 3, 12.0).unwrap();
        let skeleton = Rc::new(Skeleton::build(surface, grid, SkeletonStrategy::Spiral).unwrap());
        Rc::new(
            ToolpathPattern::build(skeleton, PatternKind::Spiral, path_width, Point3D::origin())
                .unwrap(),
        )
    }

    fn config(layer_height: f64) -> StackConfig {
        StackConfig {
            layer_height,
            sample_spacing: 5.0,
            ..StackConfig::default()
        }
    }

    fn pattern_on(surface: Rc<ControlGridSurface>) -> Rc<ToolpathPattern> {
        let grid = AnchorGrid::from_surface(surface.as_ref(), 3, 3, 12.0).unwrap();
        let skeleton = Rc::new(Skeleton::build(surface, grid, SkeletonStrategy::Spiral).unwrap());
        Rc::new(
            ToolpathPattern::build(skeleton, PatternKind::Spiral, 1.0, Point3D::origin()).unwrap(),
        )
    }

    #[test]
    fn test_vertical_layer_count_and_heights() {
        let patterns = StackPatterns::mains_only(vec![planar_pattern(1.0)]);
        let stack = ToolpathStack::build(
            patterns,
            StackKind::Vertical { total_height: 10.0 },
            config(2.0),
        )
        .unwrap();

        assert_eq!(stack.layer_count(), 5);
        for (i, layer) in stack.layers().iter().enumerate() {
            let z = layer.curve.start().z;
            assert!(
                (z - 2.0 * i as f64).abs() < 1e-6,
                "layer {} at z {}",
                i,
                z
            );
        }
    }

    #[test]
    fn test_vertical_speed_factors_uniform() {
        let patterns = StackPatterns::mains_only(vec![planar_pattern(1.0)]);
        let stack = ToolpathStack::build(
            patterns,
            StackKind::Vertical { total_height: 6.0 },
            config(2.0),
        )
        .unwrap();

        // Parallel planar layers: every gap is exactly one layer height
        for layer in stack.layers() {
            for &f in &layer.speed_factors {
                assert!((f - 1.0).abs() < 1e-6, "speed factor {}", f);
            }
            assert_eq!(layer.frames.len(), layer.speed_factors.len());
        }
    }

    #[test]
    fn test_between_layer_count() {
        let top = Rc::new(ControlGridSurface::planar(60.0, 60.0, 6.0, 3, 3).unwrap());
        let patterns = StackPatterns::mains_only(vec![planar_pattern(1.0)]);
        let stack =
            ToolpathStack::build(patterns, StackKind::Between { top }, config(2.0)).unwrap();

        // avg distance 6, layer height 2: floor(3) + 1 = 4 layers spanning
        // the full gap
        assert_eq!(stack.layer_count(), 4);
        let zs: Vec<f64> = stack
            .layers()
            .iter()
            .map(|l| l.curve.start().z)
            .collect();
        assert!((zs[0] - 0.0).abs() < 1e-6);
        assert!((zs[3] - 6.0).abs() < 1e-6);
        assert!((zs[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_between_projected_stays_plumb() {
        let top = Rc::new(ControlGridSurface::planar(60.0, 60.0, 6.0, 3, 3).unwrap());
        let patterns = StackPatterns::mains_only(vec![planar_pattern(1.0)]);
        let stack = ToolpathStack::build(
            patterns,
            StackKind::BetweenProjected { top },
            config(2.0),
        )
        .unwrap();

        // Identical XY footprint on every layer
        let first = stack.layers()[0].curve.start();
        let last = stack.layers().last().unwrap().curve.start();
        assert!((first.x - last.x).abs() < 1e-3);
        assert!((first.y - last.y).abs() < 1e-3);
    }

    #[test]
    fn test_top_pattern_remaps_through_its_own_base() {
        // Base plane tilted in x, flat top: the dedicated top pattern lives on
        // the top surface, so its layer curve must keep that footprint instead
        // of being dragged through the tilted base parametrization.
        let control: Vec<Vec<Point3D>> = (0..3)
            .map(|i| {
                let x = 30.0 * i as f64;
                (0..3)
                    .map(|j| Point3D::new(x, 30.0 * j as f64, x / 4.0))
                    .collect()
            })
            .collect();
        let tilted =
            Rc::new(ControlGridSurface::new(control, (0.0, 60.0), (0.0, 60.0)).unwrap());
        let top = Rc::new(ControlGridSurface::planar(60.0, 60.0, 20.0, 3, 3).unwrap());

        let main = pattern_on(Rc::clone(&tilted));
        let top_pattern = pattern_on(Rc::clone(&top));

        let stack = ToolpathStack::build(
            StackPatterns {
                bottoms: vec![],
                mains: vec![main],
                tops: vec![Rc::clone(&top_pattern)],
            },
            StackKind::Between { top },
            config(5.0),
        )
        .unwrap();

        let last = &stack.layers().last().unwrap().curve;
        let expected = top_pattern.continuous_curve();
        assert_eq!(last.points().len(), expected.points().len());
        for (p, q) in last.points().iter().zip(expected.points()) {
            assert!(
                (p - q).norm() < 1e-3,
                "top layer point {:?} drifted from {:?}",
                p,
                q
            );
        }
    }

    #[test]
    fn test_pattern_sequence_assignment() {
        let bottom = planar_pattern(1.0);
        let main = planar_pattern(1.5);
        let patterns = StackPatterns {
            bottoms: vec![Rc::clone(&bottom)],
            mains: vec![Rc::clone(&main)],
            tops: vec![Rc::clone(&bottom)],
        };
        let stack = ToolpathStack::build(
            patterns,
            StackKind::Vertical { total_height: 10.0 },
            config(2.0),
        )
        .unwrap();

        assert_eq!(stack.layer_count(), 5);
        let bottom_len = bottom.continuous_curve().length();
        let main_len = main.continuous_curve().length();
        let lens: Vec<f64> = stack.layers().iter().map(|l| l.curve.length()).collect();
        assert!((lens[0] - bottom_len).abs() < 1e-6);
        assert!((lens[4] - bottom_len).abs() < 1e-6);
        for &l in &lens[1..4] {
            assert!((l - main_len).abs() < 1e-6);
        }
    }

    #[test]
    fn test_offset_on_top_drops_duplicate_layer() {
        let pattern = planar_pattern(1.0);
        let first = ToolpathStack::build(
            StackPatterns::mains_only(vec![Rc::clone(&pattern)]),
            StackKind::Vertical { total_height: 10.0 },
            config(2.0),
        )
        .unwrap();
        let top = Rc::new(first.top_surface().clone());

        let second = ToolpathStack::offset_on_top(
            StackPatterns::mains_only(vec![pattern]),
            StackKind::Vertical { total_height: 10.0 },
            config(2.0),
            Rc::clone(&top),
        )
        .unwrap();

        assert_eq!(second.layer_count(), 4);
        // First layer sits one height above the continuation surface
        let base_z = top.point_at(30.0, 30.0).z;
        let z0 = second.layers()[0].curve.start().z;
        assert!((z0 - base_z - 2.0).abs() < 1e-6, "got {}", z0);
    }

    #[test]
    fn test_joined_curve_spans_layers() {
        let patterns = StackPatterns::mains_only(vec![planar_pattern(1.0)]);
        let stack = ToolpathStack::build(
            patterns,
            StackKind::Vertical { total_height: 6.0 },
            config(2.0),
        )
        .unwrap();

        let per_layer: f64 = stack.layers().iter().map(|l| l.curve.length()).sum();
        assert!(stack.joined_curve().length() >= per_layer - 1e-6);
    }

    #[test]
    fn test_local_orientation_tilts_frames() {
        let patterns = StackPatterns::mains_only(vec![planar_pattern(1.0)]);
        let stack = ToolpathStack::build(
            patterns,
            StackKind::Vertical { total_height: 4.0 },
            StackConfig {
                layer_height: 2.0,
                sample_spacing: 5.0,
                orientation: OrientationMode::Local { tilt_deg: 20.0 },
                reference: None,
            },
        )
        .unwrap();

        let frame = &stack.layers()[0].frames[0];
        // Planar layers: surface normal is world Z, so the tilt shows up
        // directly against it
        let cos = frame.z_axis.dot(&Vector3D::z());
        assert!((cos - 20f64.to_radians().cos()).abs() < 1e-6, "cos {}", cos);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let patterns = StackPatterns::mains_only(vec![planar_pattern(1.0)]);
        assert!(ToolpathStack::build(
            patterns,
            StackKind::Vertical { total_height: 1.0 },
            config(2.0),
        )
        .is_err());

        let empty = StackPatterns::mains_only(vec![]);
        assert!(ToolpathStack::build(
            empty,
            StackKind::Vertical { total_height: 10.0 },
            config(2.0),
        )
        .is_err());
    }
}
