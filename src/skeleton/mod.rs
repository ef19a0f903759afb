//! Grid-traversal skeletons.
//!
//! A skeleton walks the anchor grid with one of four strategies and fixes the
//! result into an immutable node array plus a precomputed walk order. All
//! downstream consumers (pattern replication, corner stitching, branch
//! lookup) need random access to the full walk, so the order is materialized
//! once here rather than exposed as a lazy iterator.

mod edge;
mod linear;
mod snake;
mod spiral;

use std::rc::Rc;

use crate::curve::Curve;
use crate::geometry::Vector3D;
use crate::grid::{AnchorGrid, GridIndex, TraversalNode};
use crate::surface::{project_polyline, ControlGridSurface};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which part of the grid an edge skeleton covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeSide {
    /// Full boundary walk with four forced turns.
    AllSides,
    /// First row only.
    Bottom,
    /// Last row only.
    Top,
    /// First column only.
    Left,
    /// Last column only.
    Right,
}

/// Traversal strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SkeletonStrategy {
    /// Inward spiral: +row, +col, -row, -col cycling with counter-clockwise
    /// turns; covers every cell of a fully populated grid.
    Spiral,
    /// Boustrophedon: rows traversed alternately forward/backward.
    Snake,
    /// Primary line along row 0 with optional row-1 branch stubs; turning
    /// derived from direction discontinuities above the angle tolerance.
    Linear { angle_tolerance_deg: f64 },
    /// Boundary or single-edge walk.
    Edge(EdgeSide),
}

pub(crate) struct TraversalOutput {
    pub nodes: Vec<Vec<Option<TraversalNode>>>,
    pub start: GridIndex,
}

/// A built skeleton: the node array, the ordered walk, and the derived
/// reference curves. Read-only after construction.
pub struct Skeleton {
    surface: Rc<ControlGridSurface>,
    grid: AnchorGrid,
    strategy: SkeletonStrategy,
    nodes: Vec<Vec<Option<TraversalNode>>>,
    walk: Vec<GridIndex>,
    main_curve: Curve,
    branch_curves: Vec<Curve>,
}

impl Skeleton {
    /// Build a skeleton over `grid` with the given strategy. Every derived
    /// product (walk order, main curve, branch curves) is computed eagerly.
    ///
    /// # Panics
    /// Panics if a strategy emits a `next` link into an unpopulated cell —
    /// that is a programming error in the strategy, not a runtime condition.
    pub fn build(
        surface: Rc<ControlGridSurface>,
        grid: AnchorGrid,
        strategy: SkeletonStrategy,
    ) -> Result<Self> {
        let (rows, cols) = grid.dims();
        log::info!(
            "Building {:?} skeleton over {}x{} anchor grid",
            strategy,
            rows,
            cols
        );

        let out = match strategy {
            SkeletonStrategy::Spiral => spiral::traverse(&grid)?,
            SkeletonStrategy::Snake => snake::traverse(&grid)?,
            SkeletonStrategy::Linear {
                angle_tolerance_deg,
            } => linear::traverse(&grid, angle_tolerance_deg)?,
            SkeletonStrategy::Edge(side) => edge::traverse(&grid, side)?,
        };

        let walk = derive_walk(&out.nodes, out.start);
        log::debug!("Walk order covers {} nodes", walk.len());

        let walk_points: Vec<_> = walk
            .iter()
            .map(|&idx| out.nodes[idx.i][idx.j].as_ref().map(|n| n.position))
            .collect::<Option<_>>()
            .ok_or_else(|| Error::InvalidParameter("walk crosses unpopulated cell".into()))?;
        let main_curve = if walk_points.len() >= 2 {
            project_polyline(surface.as_ref(), &walk_points, false, 3)?
        } else {
            return Err(Error::DegenerateCurve(
                "skeleton walk shorter than 2 nodes".into(),
            ));
        };

        let mut branch_curves = Vec::new();
        for &idx in &walk {
            let node = out.nodes[idx.i][idx.j]
                .as_ref()
                .unwrap_or_else(|| panic!("walk visited unallocated cell ({}, {})", idx.i, idx.j));
            if let Some(branch_idx) = node.branch {
                let target = out.nodes[branch_idx.i][branch_idx.j]
                    .as_ref()
                    .map(|n| n.position)
                    .or_else(|| grid.get(branch_idx).map(|a| a.position))
                    .unwrap_or_else(|| {
                        panic!(
                            "branch link into unallocated cell ({}, {})",
                            branch_idx.i, branch_idx.j
                        )
                    });
                branch_curves.push(project_polyline(
                    surface.as_ref(),
                    &[node.position, target],
                    false,
                    3,
                )?);
            }
        }

        Ok(Self {
            surface,
            grid,
            strategy,
            nodes: out.nodes,
            walk,
            main_curve,
            branch_curves,
        })
    }

    pub fn surface(&self) -> &Rc<ControlGridSurface> {
        &self.surface
    }

    pub fn grid(&self) -> &AnchorGrid {
        &self.grid
    }

    pub fn strategy(&self) -> SkeletonStrategy {
        self.strategy
    }

    pub fn strip_width(&self) -> f64 {
        self.grid.strip_width()
    }

    /// The ordered visiting sequence.
    pub fn walk(&self) -> &[GridIndex] {
        &self.walk
    }

    pub fn node(&self, idx: GridIndex) -> Option<&TraversalNode> {
        self.nodes.get(idx.i).and_then(|r| r.get(idx.j)).and_then(|c| c.as_ref())
    }

    /// Node at walk position `k`.
    pub fn walk_node(&self, k: usize) -> &TraversalNode {
        let idx = self.walk[k];
        self.nodes[idx.i][idx.j]
            .as_ref()
            .unwrap_or_else(|| panic!("walk visited unallocated cell ({}, {})", idx.i, idx.j))
    }

    /// Unit travel direction at walk position `k`: towards the next node, or
    /// from the previous node for the terminal one.
    pub fn travel_direction(&self, k: usize) -> Vector3D {
        let n = self.walk.len();
        let (a, b) = if k + 1 < n {
            (self.walk_node(k).position, self.walk_node(k + 1).position)
        } else {
            (self.walk_node(k - 1).position, self.walk_node(k).position)
        };
        crate::geometry::safe_normalize(b - a, Vector3D::x())
    }

    /// Surface-projected reference curve through the walk order.
    pub fn main_curve(&self) -> &Curve {
        &self.main_curve
    }

    /// One short surface curve per assigned branch link, in walk order.
    pub fn branch_curves(&self) -> &[Curve] {
        &self.branch_curves
    }

    /// Number of nodes carrying an assigned `next` link.
    pub fn linked_count(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .filter_map(|c| c.as_ref())
            .filter(|n| n.next.is_some())
            .count()
    }

    /// Number of allocated traversal nodes.
    pub fn node_count(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .filter(|c| c.is_some())
            .count()
    }
}

/// Follow `next` links from the start until an unassigned link is hit.
///
/// # Panics
/// Panics on a link into an unallocated cell or on a revisit — both are
/// strategy programming errors.
fn derive_walk(nodes: &[Vec<Option<TraversalNode>>], start: GridIndex) -> Vec<GridIndex> {
    let total: usize = nodes.iter().flatten().filter(|c| c.is_some()).count();
    let mut order = Vec::with_capacity(total);
    let mut seen = vec![vec![false; nodes[0].len()]; nodes.len()];
    let mut cur = Some(start);
    while let Some(idx) = cur {
        assert!(
            !seen[idx.i][idx.j],
            "traversal revisits cell ({}, {})",
            idx.i,
            idx.j
        );
        seen[idx.i][idx.j] = true;
        order.push(idx);
        let node = nodes[idx.i][idx.j]
            .as_ref()
            .unwrap_or_else(|| panic!("next link into unallocated cell ({}, {})", idx.i, idx.j));
        cur = node.next;
    }
    order
}
