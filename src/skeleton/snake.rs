//! Boustrophedon (snake) traversal.
//!
//! Each row is walked to its end, then the walk steps to the next row and
//! reverses direction. Turning occurs exactly at the row boundaries, with the
//! sign alternating by direction phase (two clockwise turns at one boundary,
//! two counter-clockwise at the next). Cells whose outgoing step is vertical
//! get a branch link to their row-interior neighbor, marking the rung ends
//! distinct from the boustrophedon spine.

use super::spiral::turning_from;
use super::TraversalOutput;
use crate::grid::{AnchorGrid, GridIndex, TraversalNode};
use crate::{Error, Result};

pub(crate) fn traverse(grid: &AnchorGrid) -> Result<TraversalOutput> {
    let (rows, cols) = grid.dims();
    let total = rows * cols;
    if grid.populated_count() != total {
        return Err(Error::InvalidParameter(
            "snake traversal requires a fully populated grid".into(),
        ));
    }

    // Row-major boustrophedon order
    let mut order = Vec::with_capacity(total);
    for i in 0..rows {
        if i % 2 == 0 {
            for j in 0..cols {
                order.push(GridIndex::new(i, j));
            }
        } else {
            for j in (0..cols).rev() {
                order.push(GridIndex::new(i, j));
            }
        }
    }

    let mut nodes: Vec<Vec<Option<TraversalNode>>> = vec![vec![None; cols]; rows];
    for (k, &idx) in order.iter().enumerate() {
        let anchor = grid.get(idx).ok_or(Error::EmptyGrid)?;
        let mut node = TraversalNode::from_anchor(anchor);

        let incoming = (k > 0).then(|| delta(order[k - 1], idx));
        let outgoing = (k + 1 < total).then(|| delta(idx, order[k + 1]));

        if let (Some(inc), Some(out)) = (incoming, outgoing) {
            node.turning = turning_from(inc, out);
        }

        // Rung branch at vertical steps: link within the same row toward the
        // column the walk just came from
        if let Some(out) = outgoing {
            if out.1 == 0 && out.0 != 0 {
                let interior = incoming.map(|inc| -inc.1).unwrap_or(0);
                if interior != 0 {
                    node.branch = idx.step(0, interior, rows, cols);
                }
            }
        }

        node.next = (k + 1 < total).then(|| order[k + 1]);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point3D, Vector3D};
    use crate::grid::{AnchorPoint, Turning};

    fn planar_grid(rows: usize, cols: usize) -> AnchorGrid {
        let points = (0..rows)
            .map(|i| {
                (0..cols)
                    .map(|j| AnchorPoint {
                        position: Point3D::new(12.0 * i as f64, 12.0 * j as f64, 0.0),
                        main_dir: Vector3D::x(),
                        sub_dir: Vector3D::y(),
                    })
                    .collect()
            })
            .collect();
        AnchorGrid::from_points(points, 12.0).unwrap()
    }

    #[test]
    fn test_snake_order_reverses_rows() {
        let grid = planar_grid(3, 3);
        let out = traverse(&grid).unwrap();
        let mut walk = Vec::new();
        let mut cur = Some(out.start);
        while let Some(idx) = cur {
            walk.push(idx);
            cur = out.nodes[idx.i][idx.j].as_ref().unwrap().next;
        }
        assert_eq!(walk.len(), 9);
        assert_eq!(walk[2], GridIndex::new(0, 2));
        assert_eq!(walk[3], GridIndex::new(1, 2)); // steps down at the boundary
        assert_eq!(walk[4], GridIndex::new(1, 1)); // and reverses
        assert_eq!(walk[8], GridIndex::new(2, 2));
    }

    #[test]
    fn test_snake_turns_alternate_sign() {
        let grid = planar_grid(3, 3);
        let out = traverse(&grid).unwrap();
        // First boundary: both cells turn clockwise
        assert_eq!(out.nodes[0][2].as_ref().unwrap().turning, Turning::Clockwise);
        assert_eq!(out.nodes[1][2].as_ref().unwrap().turning, Turning::Clockwise);
        // Second boundary: both counter-clockwise
        assert_eq!(
            out.nodes[1][0].as_ref().unwrap().turning,
            Turning::CounterClockwise
        );
        assert_eq!(
            out.nodes[2][0].as_ref().unwrap().turning,
            Turning::CounterClockwise
        );
        // Interior cells are straight
        assert_eq!(out.nodes[1][1].as_ref().unwrap().turning, Turning::Straight);
    }

    #[test]
    fn test_snake_rung_branches() {
        let grid = planar_grid(3, 3);
        let out = traverse(&grid).unwrap();
        // (0,2) steps vertically next; rung branch back into the row
        assert_eq!(
            out.nodes[0][2].as_ref().unwrap().branch,
            Some(GridIndex::new(0, 1))
        );
        // Straight interior cells carry no branch
        assert!(out.nodes[0][1].as_ref().unwrap().branch.is_none());
    }

    #[test]
    fn test_snake_single_column() {
        let grid = planar_grid(4, 1);
        let out = traverse(&grid).unwrap();
        for row in &out.nodes {
            let node = row[0].as_ref().unwrap();
            assert_eq!(node.turning, Turning::Straight);
            assert!(node.branch.is_none());
        }
    }
}
