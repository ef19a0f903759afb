//! Edge traversal.
//!
//! "All sides" walks the grid boundary as a single ring with four forced
//! counter-clockwise turns at the rectangle corners (the outermost spiral
//! ring). The single-side modes reduce the grid to a 1D line along one edge
//! with no turning and no branches.

use super::spiral::turning_from;
use super::{EdgeSide, TraversalOutput};
use crate::grid::{AnchorGrid, GridIndex, TraversalNode, Turning};
use crate::{Error, Result};

pub(crate) fn traverse(grid: &AnchorGrid, side: EdgeSide) -> Result<TraversalOutput> {
    let (rows, cols) = grid.dims();
    let order: Vec<GridIndex> = match side {
        EdgeSide::AllSides => {
            if rows < 2 || cols < 2 {
                return Err(Error::InvalidParameter(
                    "all-sides edge traversal needs at least a 2x2 grid".into(),
                ));
            }
            let mut order = Vec::with_capacity(2 * (rows + cols) - 4);
            for i in 0..rows {
                order.push(GridIndex::new(i, 0));
            }
            for j in 1..cols {
                order.push(GridIndex::new(rows - 1, j));
            }
            for i in (0..rows - 1).rev() {
                order.push(GridIndex::new(i, cols - 1));
            }
            for j in (1..cols - 1).rev() {
                order.push(GridIndex::new(0, j));
            }
            order
        }
        EdgeSide::Bottom => (0..cols).map(|j| GridIndex::new(0, j)).collect(),
        EdgeSide::Top => (0..cols).map(|j| GridIndex::new(rows - 1, j)).collect(),
        EdgeSide::Left => (0..rows).map(|i| GridIndex::new(i, 0)).collect(),
        EdgeSide::Right => (0..rows).map(|i| GridIndex::new(i, cols - 1)).collect(),
    };

    if order.len() < 2 {
        return Err(Error::InvalidParameter(
            "edge traversal covers fewer than 2 cells".into(),
        ));
    }
    if order.iter().any(|&idx| !grid.is_populated(idx)) {
        return Err(Error::InvalidParameter(
            "edge traversal crosses an unpopulated cell".into(),
        ));
    }

    let mut nodes: Vec<Vec<Option<TraversalNode>>> = vec![vec![None; cols]; rows];
    let n = order.len();
    for (k, &idx) in order.iter().enumerate() {
        let anchor = grid.get(idx).ok_or(Error::EmptyGrid)?;
        let mut node = TraversalNode::from_anchor(anchor);

        if side == EdgeSide::AllSides {
            if k == 0 {
                // Closing the ring would turn here; the walk is forced
                node.turning = Turning::CounterClockwise;
            } else if k + 1 < n {
                let inc = delta(order[k - 1], idx);
                let out = delta(idx, order[k + 1]);
                node.turning = turning_from(inc, out);
            }
        }

        node.next = (k + 1 < n).then(|| order[k + 1]);
        nodes[idx.i][idx.j] = Some(node);
    }

    Ok(TraversalOutput {
        nodes,
        start: order[0],
    })
}

fn delta(from: GridIndex, to: GridIndex) -> (isize, isize) {
    (
        to.i as isize - from.i as isize,
        to.j as isize - from.j as isize,
    )
}
