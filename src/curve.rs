//! Discrete arc-length-parametrized curves.
//!
//! Every curve in the core is a polyline-backed value: an ordered vertex list
//! plus a closed flag. All parametrized queries (`point_at`, `tangent_at`,
//! `closest_length`, splitting, trimming) work in arc length, so callers never
//! deal with per-segment parameters. Closed curves treat vertex 0 as the seam;
//! `rotate_seam` re-roots the parametrization without changing the geometry.

use crate::geometry::{Point3D, Vector3D};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A polyline-backed curve, open or closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Curve {
    points: Vec<Point3D>,
    closed: bool,
}

impl Curve {
    /// Build a curve from an ordered vertex list. Consecutive duplicate
    /// vertices are dropped; fewer than 2 distinct vertices is an error.
    pub fn new(points: Vec<Point3D>, closed: bool) -> Result<Self> {
        let mut pts: Vec<Point3D> = Vec::with_capacity(points.len());
        for p in points {
            if pts
                .last()
                .map(|q| (p - q).norm() > 1e-12)
                .unwrap_or(true)
            {
                pts.push(p);
            }
        }
        // A closed curve may arrive with an explicit closing vertex — drop it
        if closed && pts.len() > 2 && (pts[0] - pts[pts.len() - 1]).norm() < 1e-12 {
            pts.pop();
        }
        if pts.len() < 2 || (closed && pts.len() < 3) {
            return Err(Error::DegenerateCurve(format!(
                "curve needs at least {} distinct vertices, got {}",
                if closed { 3 } else { 2 },
                pts.len()
            )));
        }
        Ok(Self { points: pts, closed })
    }

    /// Straight segment between two points.
    pub fn line(a: Point3D, b: Point3D) -> Result<Self> {
        Self::new(vec![a, b], false)
    }

    pub fn points(&self) -> &[Point3D] {
        &self.points
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn start(&self) -> Point3D {
        self.points[0]
    }

    /// End vertex. For a closed curve this is the seam vertex again.
    pub fn end(&self) -> Point3D {
        if self.closed {
            self.points[0]
        } else {
            self.points[self.points.len() - 1]
        }
    }

    /// Number of segments.
    fn num_segments(&self) -> usize {
        if self.closed {
            self.points.len()
        } else {
            self.points.len() - 1
        }
    }

    fn segment(&self, i: usize) -> (Point3D, Point3D) {
        let a = self.points[i];
        let b = self.points[(i + 1) % self.points.len()];
        (a, b)
    }

    /// Cumulative arc lengths: `cum[i]` is the length up to vertex i,
    /// `cum[num_segments]` the total length.
    fn cumulative(&self) -> Vec<f64> {
        let m = self.num_segments();
        let mut cum = vec![0.0; m + 1];
        for i in 0..m {
            let (a, b) = self.segment(i);
            cum[i + 1] = cum[i] + (b - a).norm();
        }
        cum
    }

    /// Total arc length.
    pub fn length(&self) -> f64 {
        let m = self.num_segments();
        (0..m)
            .map(|i| {
                let (a, b) = self.segment(i);
                (b - a).norm()
            })
            .sum()
    }

    /// Point at arc length `s`. Open curves clamp to [0, length]; closed
    /// curves wrap.
    pub fn point_at(&self, s: f64) -> Point3D {
        let cum = self.cumulative();
        let total = cum[cum.len() - 1];
        if total < 1e-12 {
            return self.points[0];
        }
        let s = if self.closed {
            s.rem_euclid(total)
        } else {
            s.clamp(0.0, total)
        };
        let m = self.num_segments();
        let seg = cum
            .partition_point(|&l| l <= s)
            .saturating_sub(1)
            .min(m - 1);
        let seg_len = cum[seg + 1] - cum[seg];
        let t = if seg_len < 1e-12 {
            0.0
        } else {
            (s - cum[seg]) / seg_len
        };
        let (a, b) = self.segment(seg);
        a + t * (b - a)
    }

    /// Unit tangent at arc length `s` (direction of the containing segment).
    pub fn tangent_at(&self, s: f64) -> Vector3D {
        let cum = self.cumulative();
        let total = cum[cum.len() - 1];
        let s = if self.closed {
            s.rem_euclid(total.max(1e-12))
        } else {
            s.clamp(0.0, total)
        };
        let m = self.num_segments();
        let seg = cum
            .partition_point(|&l| l <= s)
            .saturating_sub(1)
            .min(m - 1);
        let (a, b) = self.segment(seg);
        let d = b - a;
        let n = d.norm();
        if n < 1e-12 {
            Vector3D::x()
        } else {
            d / n
        }
    }

    /// Resample into points spaced `spacing` apart by arc length. Always
    /// includes the start; the end vertex is appended if the last emitted
    /// sample does not already coincide with it.
    pub fn resample(&self, spacing: f64) -> Vec<Point3D> {
        let total = self.length();
        if total < 1e-12 || spacing <= 0.0 {
            return self.points.clone();
        }
        let n = (total / spacing).floor() as usize;
        let mut out = Vec::with_capacity(n + 2);
        for k in 0..=n {
            out.push(self.point_at(k as f64 * spacing));
        }
        let end = self.end();
        if out
            .last()
            .map(|p| (end - p).norm() > spacing * 0.25)
            .unwrap_or(true)
        {
            out.push(end);
        }
        out
    }

    /// Resample into exactly `n` points evenly spaced by arc length (closed
    /// curves omit the duplicate seam point).
    pub fn resample_n(&self, n: usize) -> Vec<Point3D> {
        if n == 0 {
            return Vec::new();
        }
        let total = self.length();
        let denom = if self.closed { n as f64 } else { (n - 1).max(1) as f64 };
        (0..n)
            .map(|k| self.point_at(total * k as f64 / denom))
            .collect()
    }

    /// Arc length of the point on the curve closest to `p`.
    pub fn closest_length(&self, p: &Point3D) -> f64 {
        let cum = self.cumulative();
        let m = self.num_segments();
        let mut best = 0.0;
        let mut best_dist_sq = f64::INFINITY;
        for i in 0..m {
            let (a, b) = self.segment(i);
            let d = b - a;
            let len_sq = d.norm_squared();
            let t = if len_sq < 1e-12 {
                0.0
            } else {
                ((p - a).dot(&d) / len_sq).clamp(0.0, 1.0)
            };
            let q = a + t * d;
            let dist_sq = (p - q).norm_squared();
            if dist_sq < best_dist_sq {
                best_dist_sq = dist_sq;
                best = cum[i] + t * (cum[i + 1] - cum[i]);
            }
        }
        best
    }

    /// Closest point on the curve to `p`.
    pub fn closest_point(&self, p: &Point3D) -> Point3D {
        self.point_at(self.closest_length(p))
    }

    /// Re-root a closed curve so its seam (parameter 0) sits at arc length
    /// `s`. Errors for open curves.
    pub fn rotate_seam(&self, s: f64) -> Result<Self> {
        if !self.closed {
            return Err(Error::DegenerateCurve(
                "seam rotation requires a closed curve".into(),
            ));
        }
        let total = self.length();
        let s = s.rem_euclid(total.max(1e-12));
        let seam = self.point_at(s);
        let cum = self.cumulative();
        let m = self.num_segments();
        let seg = cum
            .partition_point(|&l| l <= s)
            .saturating_sub(1)
            .min(m - 1);

        let mut pts = Vec::with_capacity(self.points.len() + 1);
        pts.push(seam);
        for k in 1..=m {
            pts.push(self.points[(seg + k) % self.points.len()]);
        }
        Self::new(pts, true)
    }

    /// Drop `len` of arc length from the start of the curve. A closed curve
    /// is opened at its seam first. Errors when `len` is not strictly less
    /// than the curve length.
    pub fn trim_start(&self, len: f64) -> Result<Self> {
        let total = self.length();
        if len >= total {
            return Err(Error::DegenerateCurve(format!(
                "trim length {} exceeds curve length {}",
                len, total
            )));
        }
        if len <= 0.0 {
            return self.opened();
        }
        let cum = self.cumulative();
        let m = self.num_segments();
        let seg = cum
            .partition_point(|&l| l <= len)
            .saturating_sub(1)
            .min(m - 1);
        let mut pts = vec![self.point_at(len)];
        for k in (seg + 1)..=m {
            pts.push(self.points[k % self.points.len()]);
        }
        if self.closed {
            pts.push(self.points[0]);
        }
        Self::new(pts, false)
    }

    /// The same geometry as an open curve (closed curves gain an explicit
    /// closing vertex).
    pub fn opened(&self) -> Result<Self> {
        if !self.closed {
            return Ok(self.clone());
        }
        let mut pts = self.points.clone();
        pts.push(self.points[0]);
        Self::new(pts, false)
    }

    /// Split an open curve at the given arc lengths. Lengths outside
    /// (0, total) are ignored; returns the pieces in order.
    pub fn split_at(&self, lengths: &[f64]) -> Result<Vec<Self>> {
        let this = self.opened()?;
        let total = this.length();
        let mut cuts: Vec<f64> = lengths
            .iter()
            .copied()
            .filter(|&s| s > 1e-9 && s < total - 1e-9)
            .collect();
        cuts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        cuts.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

        if cuts.is_empty() {
            return Ok(vec![this]);
        }

        let cum = this.cumulative();
        let mut pieces = Vec::with_capacity(cuts.len() + 1);
        let mut prev_cut = 0.0;
        let mut vertex_idx = 0;
        for &cut in cuts.iter().chain(std::iter::once(&total)) {
            let mut pts = vec![this.point_at(prev_cut)];
            while vertex_idx + 1 < this.points.len() && cum[vertex_idx + 1] < cut - 1e-9 {
                vertex_idx += 1;
                pts.push(this.points[vertex_idx]);
            }
            pts.push(this.point_at(cut));
            pieces.push(Self::new(pts, false)?);
            prev_cut = cut;
        }
        Ok(pieces)
    }

    /// Join open segments end-to-start into one open curve. Consecutive
    /// endpoints further apart than `tol` are a degeneracy error.
    pub fn join(segments: &[Self], tol: f64) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::DegenerateCurve("no segments to join".into()));
        }
        let mut pts: Vec<Point3D> = Vec::new();
        for seg in segments {
            let seg = seg.opened()?;
            let seg_pts = seg.points();
            if let Some(last) = pts.last() {
                let gap = (seg_pts[0] - last).norm();
                if gap > tol {
                    return Err(Error::DegenerateCurve(format!(
                        "gap {} between segments exceeds join tolerance {}",
                        gap, tol
                    )));
                }
                pts.extend_from_slice(&seg_pts[1..]);
            } else {
                pts.extend_from_slice(seg_pts);
            }
        }
        Self::new(pts, false)
    }

    /// Reversed copy.
    pub fn reversed(&self) -> Self {
        let mut pts = self.points.clone();
        if self.closed {
            // Keep the seam vertex first, reverse the rest of the loop
            pts[1..].reverse();
        } else {
            pts.reverse();
        }
        Self {
            points: pts,
            closed: self.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Curve {
        Curve::new(
            vec![
                Point3D::new(0.0, 0.0, 0.0),
                Point3D::new(size, 0.0, 0.0),
                Point3D::new(size, size, 0.0),
                Point3D::new(0.0, size, 0.0),
            ],
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_length_open_and_closed() {
        let sq = square(10.0);
        assert!((sq.length() - 40.0).abs() < 1e-10);

        let open = sq.opened().unwrap();
        assert!(!open.is_closed());
        assert!((open.length() - 40.0).abs() < 1e-10);
    }

    #[test]
    fn test_point_at_wraps_on_closed() {
        let sq = square(10.0);
        let p = sq.point_at(45.0); // wraps to 5.0
        assert!((p - Point3D::new(5.0, 0.0, 0.0)).norm() < 1e-10);
    }

    #[test]
    fn test_rotate_seam_preserves_length() {
        let sq = square(10.0);
        let rotated = sq.rotate_seam(15.0).unwrap();
        assert!((rotated.length() - 40.0).abs() < 1e-10);
        // New seam is 15 along: (10, 5)
        assert!((rotated.start() - Point3D::new(10.0, 5.0, 0.0)).norm() < 1e-10);
    }

    #[test]
    fn test_trim_start() {
        let sq = square(10.0);
        let trimmed = sq.trim_start(5.0).unwrap();
        assert!(!trimmed.is_closed());
        assert!((trimmed.length() - 35.0).abs() < 1e-10);
        assert!((trimmed.start() - Point3D::new(5.0, 0.0, 0.0)).norm() < 1e-10);

        assert!(sq.trim_start(40.0).is_err());
    }

    #[test]
    fn test_split_and_join_roundtrip() {
        let line = Curve::new(
            vec![
                Point3D::new(0.0, 0.0, 0.0),
                Point3D::new(10.0, 0.0, 0.0),
                Point3D::new(20.0, 0.0, 0.0),
            ],
            false,
        )
        .unwrap();

        let pieces = line.split_at(&[5.0, 15.0]).unwrap();
        assert_eq!(pieces.len(), 3);
        assert!((pieces[0].length() - 5.0).abs() < 1e-10);
        assert!((pieces[1].length() - 10.0).abs() < 1e-10);
        assert!((pieces[2].length() - 5.0).abs() < 1e-10);

        let joined = Curve::join(&pieces, 1e-6).unwrap();
        assert!((joined.length() - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_join_rejects_gaps() {
        let a = Curve::line(Point3D::new(0.0, 0.0, 0.0), Point3D::new(1.0, 0.0, 0.0)).unwrap();
        let b = Curve::line(Point3D::new(5.0, 0.0, 0.0), Point3D::new(6.0, 0.0, 0.0)).unwrap();
        assert!(Curve::join(&[a, b], 1e-3).is_err());
    }

    #[test]
    fn test_closest_length() {
        let sq = square(10.0);
        // Closest to a point outside the bottom edge midpoint
        let s = sq.closest_length(&Point3D::new(5.0, -3.0, 0.0));
        assert!((s - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_resample_spacing() {
        let line = Curve::line(Point3D::origin(), Point3D::new(10.0, 0.0, 0.0)).unwrap();
        let pts = line.resample(1.0);
        assert_eq!(pts.len(), 11);
        assert!((pts[3] - Point3D::new(3.0, 0.0, 0.0)).norm() < 1e-10);
    }

    #[test]
    fn test_resample_n_closed() {
        let sq = square(10.0);
        let pts = sq.resample_n(8);
        assert_eq!(pts.len(), 8);
        // Evenly spaced every 5 units of perimeter
        assert!((pts[1] - Point3D::new(5.0, 0.0, 0.0)).norm() < 1e-10);
    }

    #[test]
    fn test_reversed() {
        let line = Curve::line(Point3D::origin(), Point3D::new(10.0, 0.0, 0.0)).unwrap();
        let rev = line.reversed();
        assert!((rev.start() - Point3D::new(10.0, 0.0, 0.0)).norm() < 1e-10);
        assert!((rev.end() - Point3D::origin()).norm() < 1e-10);
    }
}
