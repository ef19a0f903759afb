//! Pattern replication and continuization.
//!
//! A toolpath pattern replicates every skeleton node into offset "corner"
//! points forming concentric closed bundle curves at multiples of the path
//! width, then cuts and rejoins those loops near a seam point into one
//! continuous open curve suitable for physical traversal.
//!
//! Corner offsets are normalized by the sine of the angle between the two
//! fabric directions, so offset distances stay metrically correct path widths
//! even where the surface parametrization is skewed. Ring stitching builds
//! each loop double-ended: corners right of the travel direction are appended,
//! corners left of it are front-inserted, so the finished loop reads
//! left-boundary-reversed then right-boundary-forward. At turn nodes the
//! front-inner corner is dropped, and branch fan corners are stitched at the
//! walk position of the branch target they reach; getting any of these
//! choices wrong folds the loop onto itself or across its neighbors.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::curve::Curve;
use crate::geometry::{safe_normalize, sine_between, Point3D, Vector3D};
use crate::grid::GridIndex;
use crate::skeleton::Skeleton;
use crate::surface::{project_polyline, Surface};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Near-tie threshold for the branch towards/side tangent selection.
const SINE_TIE_EPS: f64 = 1e-9;

/// Pattern variants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PatternKind {
    /// Full concentric ring bundle, continuized at the seam. The variant in
    /// active fabrication use.
    Spiral,
    /// Rungs across the strip at the given spacing, zig-zag connected.
    /// `connect_mid` routes the connectors through the spine midpoint
    /// between consecutive rungs instead of hopping end-to-end.
    Snake { spacing: f64, connect_mid: bool },
    /// Single depth-0 ring, continuized directly.
    Simple,
}

/// A replicated strip pattern over one skeleton: the closed bundle curves and
/// the continuous open curve. Immutable after construction.
pub struct ToolpathPattern {
    skeleton: Rc<Skeleton>,
    kind: PatternKind,
    path_width: f64,
    seam: Point3D,
    bundle_curves: Vec<Curve>,
    continuous_curve: Curve,
}

impl ToolpathPattern {
    /// Build a pattern. `strip_width >= 6 * path_width` is a hard
    /// precondition — violating it is an input error, not a degeneracy to
    /// paper over.
    pub fn build(
        skeleton: Rc<Skeleton>,
        kind: PatternKind,
        path_width: f64,
        seam: Point3D,
    ) -> Result<Self> {
        if path_width <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "path width must be positive, got {}",
                path_width
            )));
        }
        let strip_width = skeleton.strip_width();
        if strip_width < 6.0 * path_width {
            return Err(Error::StripTooNarrow {
                strip_width,
                path_width,
            });
        }
        if let PatternKind::Snake { spacing, .. } = kind {
            if spacing <= 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "rung spacing must be positive, got {}",
                    spacing
                )));
            }
        }

        log::info!(
            "Building {:?} pattern, path width {}, strip width {}",
            kind,
            path_width,
            strip_width
        );

        let (bundle_curves, continuous_curve) = match kind {
            PatternKind::Spiral => {
                let depth_num = (strip_width / (2.0 * path_width)).floor() as usize;
                let rings = build_rings(&skeleton, depth_num, path_width)?;
                let continuous = continuize_straight(&rings, &seam, path_width)?;
                (rings, continuous)
            }
            PatternKind::Simple => {
                let rings = build_rings(&skeleton, 1, path_width)?;
                let continuous = continuize_straight(&rings, &seam, path_width)?;
                (rings, continuous)
            }
            PatternKind::Snake {
                spacing,
                connect_mid,
            } => build_snake(&skeleton, spacing, path_width, connect_mid)?,
        };

        log::debug!(
            "Pattern has {} bundle curve(s), continuous length {:.3}",
            bundle_curves.len(),
            continuous_curve.length()
        );

        Ok(Self {
            skeleton,
            kind,
            path_width,
            seam,
            bundle_curves,
            continuous_curve,
        })
    }

    pub fn skeleton(&self) -> &Rc<Skeleton> {
        &self.skeleton
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn path_width(&self) -> f64 {
        self.path_width
    }

    pub fn seam(&self) -> Point3D {
        self.seam
    }

    /// Closed concentric loops (or open rungs for the snake kind), innermost
    /// depth first.
    pub fn bundle_curves(&self) -> &[Curve] {
        &self.bundle_curves
    }

    /// The single open, physically traversable curve.
    pub fn continuous_curve(&self) -> &Curve {
        &self.continuous_curve
    }

    /// Independent pattern with the same logical parameters. Construction is
    /// re-run from scratch so derived curves are fresh, never aliased —
    /// obstacle avoidance mutates the copy's continuous curve.
    pub fn deep_copy(&self) -> Result<Self> {
        Self::build(
            Rc::clone(&self.skeleton),
            self.kind,
            self.path_width,
            self.seam,
        )
    }

    /// Copy of this pattern with its continuous curve replaced (used by the
    /// obstacle post-processor after rerouting).
    pub(crate) fn with_continuous_curve(&self, continuous: Curve) -> Result<Self> {
        let copy = self.deep_copy()?;
        Ok(Self {
            continuous_curve: continuous,
            ..copy
        })
    }
}

/// Per-node stitch frame: travel directions and surface normal resolved from
/// the walk geometry.
struct StitchFrame {
    position: Point3D,
    f_in: Vector3D,
    f_out: Vector3D,
    normal: Vector3D,
    /// Sign of (f_in × f_out)·normal: +1 turn left, -1 turn right, 0 straight.
    turn: i8,
}

fn stitch_frames(skeleton: &Skeleton) -> Vec<StitchFrame> {
    let walk = skeleton.walk();
    let n = walk.len();
    (0..n)
        .map(|k| {
            let node = skeleton.walk_node(k);
            let next = (k + 1 < n).then(|| skeleton.walk_node(k + 1).position);
            let prev = (k > 0).then(|| skeleton.walk_node(k - 1).position);
            let f_out = next
                .map(|p| safe_normalize(p - node.position, Vector3D::x()))
                .or_else(|| prev.map(|p| safe_normalize(node.position - p, Vector3D::x())))
                .unwrap_or_else(Vector3D::x);
            let f_in = prev
                .map(|p| safe_normalize(node.position - p, Vector3D::x()))
                .unwrap_or(f_out);
            let normal = safe_normalize(node.main_dir.cross(&node.sub_dir), Vector3D::z());
            let cross = f_in.cross(&f_out).dot(&normal);
            let turn = if f_in.dot(&f_out) > 0.999 {
                0
            } else if cross > 0.0 {
                1
            } else {
                -1
            };
            StitchFrame {
                position: node.position,
                f_in,
                f_out,
                normal,
                turn,
            }
        })
        .collect()
}

/// Replicate the skeleton into one closed corner loop per depth ring and
/// project each loop onto the surface.
fn build_rings(skeleton: &Skeleton, depth_num: usize, path_width: f64) -> Result<Vec<Curve>> {
    let frames = stitch_frames(skeleton);
    let mut rings = Vec::with_capacity(depth_num);
    for depth in 0..depth_num {
        let polygon = replicate_ring(skeleton, &frames, depth, depth_num, path_width)?;
        let ring = project_polyline(skeleton.surface().as_ref(), &polygon, true, 2)?;
        rings.push(ring);
    }
    Ok(rings)
}

/// Assemble the stitched corner polygon for one depth ring.
fn replicate_ring(
    skeleton: &Skeleton,
    frames: &[StitchFrame],
    depth: usize,
    depth_num: usize,
    path_width: f64,
) -> Result<Vec<Point3D>> {
    let offset = path_width * (depth as f64 + 0.5);

    // A fan corner reaches w*(2*depthNum - k - 0.5) down the branch channel,
    // which is exactly w*(k+0.5) short of the branch target anchor: it lies on
    // the target's own cap for this ring. Attaching fans at the target's walk
    // position keeps the rings nested; slotting them at the branch node would
    // fold a tongue across every deeper ring. A target outside the walk (a
    // detached stub) has no cap, so there the tongue is the coverage and it is
    // stitched at the branch node, ordered out and back along the channel.
    let walk_pos: HashMap<GridIndex, usize> = skeleton
        .walk()
        .iter()
        .enumerate()
        .map(|(k, &idx)| (idx, k))
        .collect();
    let mut fans_at: Vec<Vec<Point3D>> = vec![Vec::new(); frames.len()];
    let mut tongue_at: Vec<Vec<Point3D>> = vec![Vec::new(); frames.len()];
    for (k, frame) in frames.iter().enumerate() {
        let node = skeleton.walk_node(k);
        let Some(branch_idx) = node.branch else {
            continue;
        };
        let branch = skeleton.grid().get(branch_idx).ok_or(Error::EmptyGrid)?;
        // Channels run across the travel direction, so the branch tangents
        // are compared against the walk-relative cross axis, not the node's
        // static sub direction (the two disagree once the walk has turned)
        let cross_travel = frame.normal.cross(&frame.f_out);
        let (towards, side_dir) =
            branch_axes(&cross_travel, &frame.f_out, &frame.normal, branch, &node.position)?;
        let reach = path_width * (2.0 * depth_num as f64 - depth as f64 - 0.5);
        let pair = [
            frame.position + towards * reach - side_dir * offset,
            frame.position + towards * reach + side_dir * offset,
        ];
        match walk_pos.get(&branch_idx) {
            Some(&t) => fans_at[t].extend(pair),
            None => tongue_at[k].extend(pair),
        }
    }

    let mut loop_points: VecDeque<Point3D> = VecDeque::new();

    for (k, frame) in frames.iter().enumerate() {
        let node = skeleton.walk_node(k);

        let sine = sine_between(&node.main_dir, &node.sub_dir);
        if sine < 1e-6 {
            return Err(Error::InvalidParameter(format!(
                "anchor tangent directions are parallel at walk position {}",
                k
            )));
        }
        // Sine normalization keeps the offset metrically one path width even
        // under skewed UV
        let m = safe_normalize(node.main_dir, Vector3D::x()) * (offset / sine);
        let s = safe_normalize(node.sub_dir, Vector3D::y()) * (offset / sine);

        let left_dir = frame.normal.cross(&frame.f_in);

        // The four replicated corners, classified against the travel frame
        let mut left: Vec<(f64, Point3D)> = Vec::with_capacity(4);
        let mut right: Vec<(f64, Point3D)> = Vec::with_capacity(4);
        for &(sm, ss) in &[(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
            let c = m * sm + s * ss;
            let along = c.dot(&frame.f_in);
            let side = c.dot(&left_dir);

            // At a turn, the inner side keeps only its trailing corner; the
            // leading inner corner would fold the loop across the strip
            if frame.turn > 0 && side > 0.0 && along > 0.0 {
                continue;
            }
            if frame.turn < 0 && side < 0.0 && along > 0.0 {
                continue;
            }

            let p = frame.position + c;
            if side > 0.0 {
                left.push((along, p));
            } else {
                right.push((along, p));
            }
        }

        // Fan corners whose branch channel ends at this node. They coincide
        // with this node's own cap corners on an axis-aligned grid; exact
        // twins are dropped, skewed ones slot in beside their neighbor
        for &p in &fans_at[k] {
            if left
                .iter()
                .chain(right.iter())
                .any(|&(_, q)| (p - q).norm() < 1e-6)
            {
                continue;
            }
            let c = p - frame.position;
            let along = c.dot(&frame.f_in);
            if c.dot(&left_dir) > 0.0 {
                left.push((along, p));
            } else {
                right.push((along, p));
            }
        }

        // Stub tongue: both corners sort strictly between the two
        // channel-mouth corners, so the loop runs out along one channel wall
        // and back along the other
        for &p in &tongue_at[k] {
            let c = p - frame.position;
            let along = c.dot(&frame.f_in) * (1.0 - 1e-6);
            if c.dot(&left_dir) > 0.0 {
                left.push((along, p));
            } else {
                right.push((along, p));
            }
        }

        // Right boundary appends forward, left boundary front-inserts so the
        // finished loop reads left-reversed then right-forward
        left.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        right.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        for (_, p) in &left {
            loop_points.push_front(*p);
        }
        for (_, p) in &right {
            loop_points.push_back(*p);
        }
    }

    if loop_points.len() < 3 {
        return Err(Error::DegenerateCurve(
            "ring replication produced fewer than 3 corners".into(),
        ));
    }
    Ok(loop_points.into_iter().collect())
}

/// Choose the branch fan axes from the branch neighbor's tangents: towards is
/// whichever tangent has the smaller sine-angle against the cross-travel
/// direction (near-ties resolve to the neighbor's main direction), sign
/// corrected to point away from the branch root; side is the other tangent,
/// right-handed against the travel direction.
fn branch_axes(
    cross_dir: &Vector3D,
    travel: &Vector3D,
    normal: &Vector3D,
    branch: &crate::grid::AnchorPoint,
    root: &Point3D,
) -> Result<(Vector3D, Vector3D)> {
    let sin_main = sine_between(&branch.main_dir, cross_dir);
    let sin_sub = sine_between(&branch.sub_dir, cross_dir);

    let pick_main = if (sin_main - sin_sub).abs() < SINE_TIE_EPS {
        true
    } else {
        sin_main < sin_sub
    };
    let (towards_raw, side_raw) = if pick_main {
        (branch.main_dir, branch.sub_dir)
    } else {
        (branch.sub_dir, branch.main_dir)
    };

    let mut towards = safe_normalize(towards_raw, *cross_dir);
    let to_branch = branch.position - root;
    if towards.dot(&to_branch) < 0.0 {
        towards = -towards;
    }

    let mut side = safe_normalize(side_raw, *travel);
    if travel.cross(&side).dot(normal) < 0.0 {
        side = -side;
    }
    Ok((towards, side))
}

/// Cut and rejoin closed bundle curves into one continuous open curve.
///
/// Rings must arrive in the depth order the pattern built them; the zig-zag
/// bridge alternates which end of each trimmed ring the connector lands on,
/// and an out-of-order ring list can make the bridges cross. Each ring loses
/// one `path_width` of length at its seam so strip overlaps never produce
/// zero-length moves.
pub fn continuize_straight(bundles: &[Curve], seam: &Point3D, path_width: f64) -> Result<Curve> {
    if bundles.is_empty() {
        return Err(Error::DegenerateCurve("no bundle curves to continuize".into()));
    }

    let mut segments: Vec<Curve> = Vec::new();
    let mut cut = *seam;
    for (i, ring) in bundles.iter().enumerate() {
        let ring_length = ring.length();
        if path_width >= ring_length {
            return Err(Error::PathWiderThanRing {
                path_width,
                ring_length,
            });
        }

        let s = ring.closest_length(&cut);
        let rotated = if ring.is_closed() {
            ring.rotate_seam(s)?
        } else {
            ring.clone()
        };
        let mut trimmed = rotated.trim_start(path_width)?;
        if i % 2 == 1 {
            // Alternate which end the bridge attaches to
            trimmed = trimmed.reversed();
        }

        if let Some(prev_end) = segments.last().map(|c: &Curve| c.end()) {
            // Overlapping rings can attach at the exact cut point; a
            // zero-length bridge would be a degenerate curve
            let gap = (trimmed.start() - prev_end).norm();
            if gap > 1e-9 {
                segments.push(Curve::line(prev_end, trimmed.start())?);
            }
        }
        cut = trimmed.end();
        segments.push(trimmed);
    }

    Curve::join(&segments, 1e-6)
}

/// Snake infill: rungs across the strip at `spacing` along the skeleton's
/// main curve, connected into one open curve.
fn build_snake(
    skeleton: &Skeleton,
    spacing: f64,
    path_width: f64,
    connect_mid: bool,
) -> Result<(Vec<Curve>, Curve)> {
    let surface = skeleton.surface().as_ref();
    let main = skeleton.main_curve();
    let total = main.length();
    let half = skeleton.strip_width() / 2.0 - path_width / 2.0;

    let count = (total / spacing).floor() as usize + 1;
    if count < 2 {
        return Err(Error::DegenerateCurve(
            "snake pattern needs at least two rungs".into(),
        ));
    }

    let mut rungs = Vec::with_capacity(count);
    for r in 0..count {
        let s = (r as f64 * spacing).min(total);
        let p = main.point_at(s);
        let t = main.tangent_at(s);
        let (u, v) = surface.closest_point(&p)?;
        let normal = surface.normal_at(u, v);
        let l = safe_normalize(normal.cross(&t), Vector3D::y());
        let rung = project_polyline(surface, &[p - l * half, p + l * half], false, 3)?;
        rungs.push(rung);
    }

    let mut segments: Vec<Curve> = Vec::new();
    for (r, rung) in rungs.iter().enumerate() {
        let oriented = if r % 2 == 1 { rung.reversed() } else { rung.clone() };
        if let Some(prev_end) = segments.last().map(|c: &Curve| c.end()) {
            if connect_mid {
                let s_mid = ((r as f64 - 0.5) * spacing).clamp(0.0, total);
                let mid = surface.pull_point(&main.point_at(s_mid))?;
                segments.push(Curve::new(vec![prev_end, mid, oriented.start()], false)?);
            } else if (oriented.start() - prev_end).norm() > 1e-9 {
                segments.push(Curve::line(prev_end, oriented.start())?);
            }
        }
        segments.push(oriented);
    }

    let continuous = Curve::join(&segments, 1e-6)?;
    Ok((rungs, continuous))
}
