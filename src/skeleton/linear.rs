//! Linear traversal.
//!
//! The grid is 1×V or 2×V: row 0 is the primary line, row 1 (where
//! populated) holds branch stubs. The walk runs straight along row 0;
//! turning is only recorded where the primary line bends by more than the
//! angle tolerance, with the sign taken from the local bending direction
//! against the surface normal. Branch links connect row 0 to the row-1 stub
//! at the same column.

use super::TraversalOutput;
use crate::grid::{AnchorGrid, GridIndex, TraversalNode, Turning};
use crate::{Error, Result};

pub(crate) fn traverse(grid: &AnchorGrid, angle_tolerance_deg: f64) -> Result<TraversalOutput> {
    let (rows, cols) = grid.dims();
    if rows > 2 {
        return Err(Error::InvalidParameter(format!(
            "linear traversal expects a 1xV or 2xV grid, got {} rows",
            rows
        )));
    }
    if angle_tolerance_deg <= 0.0 {
        return Err(Error::InvalidParameter(
            "angle tolerance must be positive".into(),
        ));
    }
    let primary: Vec<GridIndex> = (0..cols).map(|j| GridIndex::new(0, j)).collect();
    if primary.iter().any(|&idx| !grid.is_populated(idx)) {
        return Err(Error::InvalidParameter(
            "linear traversal requires a fully populated primary row".into(),
        ));
    }
    if cols < 2 {
        return Err(Error::InvalidParameter(
            "linear traversal needs at least 2 columns".into(),
        ));
    }

    let tol_cos = angle_tolerance_deg.to_radians().cos();
    let mut nodes: Vec<Vec<Option<TraversalNode>>> = vec![vec![None; cols]; rows];

    for (k, &idx) in primary.iter().enumerate() {
        let anchor = grid.get(idx).ok_or(Error::EmptyGrid)?;
        let mut node = TraversalNode::from_anchor(anchor);

        // Discontinuity test on the primary polyline: compare incoming and
        // outgoing segment directions
        if k > 0 && k + 1 < cols {
            let prev = grid.get(primary[k - 1]).ok_or(Error::EmptyGrid)?.position;
            let next = grid.get(primary[k + 1]).ok_or(Error::EmptyGrid)?.position;
            let d_in = crate::geometry::safe_normalize(
                anchor.position - prev,
                crate::geometry::Vector3D::x(),
            );
            let d_out = crate::geometry::safe_normalize(
                next - anchor.position,
                crate::geometry::Vector3D::x(),
            );
            if d_in.dot(&d_out) < tol_cos {
                let normal = crate::geometry::safe_normalize(
                    anchor.main_dir.cross(&anchor.sub_dir),
                    crate::geometry::Vector3D::z(),
                );
                node.turning = if d_in.cross(&d_out).dot(&normal) >= 0.0 {
                    Turning::CounterClockwise
                } else {
                    Turning::Clockwise
                };
            }
        }

        // Stub branch to row 1 at the same column
        if rows == 2 {
            let stub = GridIndex::new(1, idx.j);
            if grid.is_populated(stub) {
                node.branch = Some(stub);
            }
        }

        node.next = (k + 1 < cols).then(|| primary[k + 1]);
        nodes[idx.i][idx.j] = Some(node);
    }

    // Allocate nodes for populated stubs so branch targets resolve
    if rows == 2 {
        for j in 0..cols {
            let idx = GridIndex::new(1, j);
            if let Some(anchor) = grid.get(idx) {
                nodes[1][j] = Some(TraversalNode::from_anchor(anchor));
            }
        }
    }

    Ok(TraversalOutput {
        nodes,
        start: primary[0],
    })
}
