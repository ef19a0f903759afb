//! Anchor grid model: the organized U×V array of base points pulled from the
//! reference surface, with two local tangent directions per point, and the
//! per-cell traversal node record the skeleton strategies fill in.

use crate::geometry::{Point3D, Vector3D};
use crate::surface::Surface;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Position of a cell in the anchor grid: `i` indexes rows (U direction),
/// `j` indexes columns (V direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridIndex {
    pub i: usize,
    pub j: usize,
}

impl GridIndex {
    pub fn new(i: usize, j: usize) -> Self {
        Self { i, j }
    }

    /// Step by a signed offset, returning None when leaving `rows`×`cols`.
    pub fn step(&self, di: isize, dj: isize, rows: usize, cols: usize) -> Option<Self> {
        let ni = self.i as isize + di;
        let nj = self.j as isize + dj;
        if ni < 0 || nj < 0 || ni >= rows as isize || nj >= cols as isize {
            None
        } else {
            Some(Self::new(ni as usize, nj as usize))
        }
    }
}

/// Turn classification recorded when the walk arrives at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Turning {
    /// The walk turned clockwise (-1).
    Clockwise,
    /// No turn (0).
    Straight,
    /// The walk turned counter-clockwise (+1).
    CounterClockwise,
}

impl Turning {
    pub fn sign(&self) -> i8 {
        match self {
            Turning::Clockwise => -1,
            Turning::Straight => 0,
            Turning::CounterClockwise => 1,
        }
    }
}

/// One anchor: a base position plus the two (generally non-orthogonal)
/// fabric direction vectors from the surface parametrization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnchorPoint {
    pub position: Point3D,
    pub main_dir: Vector3D,
    pub sub_dir: Vector3D,
}

/// Per-anchor traversal record: position, direction vectors, the turn
/// classification, a link to the next cell in the walk and an optional
/// branch link (T-junction geometry). Never mutated once a traversal
/// completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraversalNode {
    pub position: Point3D,
    pub main_dir: Vector3D,
    pub sub_dir: Vector3D,
    pub turning: Turning,
    pub next: Option<GridIndex>,
    pub branch: Option<GridIndex>,
}

impl TraversalNode {
    pub fn from_anchor(anchor: &AnchorPoint) -> Self {
        Self {
            position: anchor.position,
            main_dir: anchor.main_dir,
            sub_dir: anchor.sub_dir,
            turning: Turning::Straight,
            next: None,
            branch: None,
        }
    }
}

/// Rectangular U×V grid of anchor points. Some traversal strategies only
/// populate a 1×N or M×1 sub-slice, so cells are optional; the rectangle
/// itself has no holes inside a populated region by construction upstream.
/// Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorGrid {
    cells: Vec<Vec<Option<AnchorPoint>>>,
    strip_width: f64,
}

impl AnchorGrid {
    pub fn new(cells: Vec<Vec<Option<AnchorPoint>>>, strip_width: f64) -> Result<Self> {
        if strip_width <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "strip width must be positive, got {}",
                strip_width
            )));
        }
        let rows = cells.len();
        let cols = cells.first().map(|r| r.len()).unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err(Error::EmptyGrid);
        }
        if cells.iter().any(|r| r.len() != cols) {
            return Err(Error::InvalidParameter(
                "anchor grid rows have unequal lengths".into(),
            ));
        }
        if cells.iter().flatten().all(|c| c.is_none()) {
            return Err(Error::EmptyGrid);
        }
        Ok(Self { cells, strip_width })
    }

    /// Build a fully populated grid from dense anchor rows.
    pub fn from_points(points: Vec<Vec<AnchorPoint>>, strip_width: f64) -> Result<Self> {
        let cells = points
            .into_iter()
            .map(|row| row.into_iter().map(Some).collect())
            .collect();
        Self::new(cells, strip_width)
    }

    /// Sample an `nu`×`nv` anchor grid from a surface. Tangent directions are
    /// the normalized surface partials at each sample.
    pub fn from_surface<S: Surface>(
        surface: &S,
        nu: usize,
        nv: usize,
        strip_width: f64,
    ) -> Result<Self> {
        if nu < 2 || nv < 2 {
            return Err(Error::InvalidParameter(format!(
                "anchor grid needs at least 2x2 samples, got {}x{}",
                nu, nv
            )));
        }
        let ((u0, u1), (v0, v1)) = surface.domain();
        let points = (0..nu)
            .map(|i| {
                (0..nv)
                    .map(|j| {
                        let u = u0 + (u1 - u0) * i as f64 / (nu - 1) as f64;
                        let v = v0 + (v1 - v0) * j as f64 / (nv - 1) as f64;
                        let (du, dv) = surface.partials_at(u, v);
                        AnchorPoint {
                            position: surface.point_at(u, v),
                            main_dir: crate::geometry::safe_normalize(du, Vector3D::x()),
                            sub_dir: crate::geometry::safe_normalize(dv, Vector3D::y()),
                        }
                    })
                    .collect()
            })
            .collect();
        Self::from_points(points, strip_width)
    }

    /// Grid dimensions (rows, cols).
    pub fn dims(&self) -> (usize, usize) {
        (self.cells.len(), self.cells[0].len())
    }

    pub fn strip_width(&self) -> f64 {
        self.strip_width
    }

    pub fn get(&self, idx: GridIndex) -> Option<&AnchorPoint> {
        self.cells.get(idx.i).and_then(|r| r.get(idx.j)).and_then(|c| c.as_ref())
    }

    pub fn is_populated(&self, idx: GridIndex) -> bool {
        self.get(idx).is_some()
    }

    /// Number of populated cells.
    pub fn populated_count(&self) -> usize {
        self.cells.iter().flatten().filter(|c| c.is_some()).count()
    }
}
