//! Inward spiral traversal.
//!
//! Starts at (0,0) and walks the direction cycle {+row, +col, -row, -col},
//! advancing until the next cell would leave the grid or is already visited,
//! then turning 90° counter-clockwise and continuing. Straight cells that
//! still have an un-walked ring inward get a branch link to the adjacent
//! unvisited cell perpendicular to the travel direction — the "next ring
//! inward" neighbor used later for T-junction corner geometry.

use super::TraversalOutput;
use crate::grid::{AnchorGrid, GridIndex, TraversalNode, Turning};
use crate::{Error, Result};

const DIRS: [(isize, isize); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

pub(crate) fn turning_from(incoming: (isize, isize), outgoing: (isize, isize)) -> Turning {
    let cross = incoming.0 * outgoing.1 - incoming.1 * outgoing.0;
    match cross.signum() {
        1 => Turning::CounterClockwise,
        -1 => Turning::Clockwise,
        _ => Turning::Straight,
    }
}

pub(crate) fn traverse(grid: &AnchorGrid) -> Result<TraversalOutput> {
    let (rows, cols) = grid.dims();
    let total = rows * cols;
    if grid.populated_count() != total {
        return Err(Error::InvalidParameter(
            "spiral traversal requires a fully populated grid".into(),
        ));
    }

    let mut nodes: Vec<Vec<Option<TraversalNode>>> = vec![vec![None; cols]; rows];
    let mut visited = vec![vec![false; cols]; rows];

    let start = GridIndex::new(0, 0);
    let mut cur = start;
    let mut dir_idx = 0usize;
    let mut incoming: Option<(isize, isize)> = None;

    for step in 0..total {
        visited[cur.i][cur.j] = true;
        let anchor = grid.get(cur).ok_or(Error::EmptyGrid)?;
        let mut node = TraversalNode::from_anchor(anchor);

        if step + 1 == total {
            // Terminal cell: next left unassigned (open walk)
            nodes[cur.i][cur.j] = Some(node);
            break;
        }

        // Advance in the current direction, turning ccw while blocked
        let mut d = dir_idx;
        let mut next = None;
        for _ in 0..4 {
            if let Some(c) = cur.step(DIRS[d].0, DIRS[d].1, rows, cols) {
                if !visited[c.i][c.j] {
                    next = Some(c);
                    break;
                }
            }
            d = (d + 1) % 4;
        }
        let next = next.unwrap_or_else(|| {
            panic!("spiral walk stuck at ({}, {}) after {} cells", cur.i, cur.j, step + 1)
        });

        node.turning = match incoming {
            Some(inc) => turning_from(inc, DIRS[d]),
            None => Turning::Straight,
        };

        // Branch at straight cells with an unvisited inward neighbor
        if node.turning == Turning::Straight {
            let perp = DIRS[(d + 1) % 4];
            if let Some(c) = cur.step(perp.0, perp.1, rows, cols) {
                if !visited[c.i][c.j] {
                    node.branch = Some(c);
                }
            }
        }

        node.next = Some(next);
        nodes[cur.i][cur.j] = Some(node);

        incoming = Some(DIRS[d]);
        dir_idx = d;
        cur = next;
    }

    Ok(TraversalOutput { nodes, start })
}
