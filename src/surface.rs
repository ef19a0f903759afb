//! Parametric surface seam and the control-grid implementation.
//!
//! The core only ever talks to surfaces through the `Surface` trait:
//! evaluation, partial derivatives, normals and closest-point projection.
//! `ControlGridSurface` is the production implementation — a tensor grid of
//! control points evaluated bilinearly per cell — and additionally carries the
//! grid-level operations stacking needs (normal offset, rebuild to matching
//! dimensions, control-point morph, vertical projection).

use crate::curve::Curve;
use crate::geometry::{safe_normalize, Point3D, Vector3D};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Parametric surface contract consumed by the core algorithms.
pub trait Surface {
    /// Parameter domain as ((u_min, u_max), (v_min, v_max)).
    fn domain(&self) -> ((f64, f64), (f64, f64));

    /// Evaluate the surface at (u, v).
    fn point_at(&self, u: f64, v: f64) -> Point3D;

    /// Partial derivatives (∂S/∂u, ∂S/∂v), by central differences.
    fn partials_at(&self, u: f64, v: f64) -> (Vector3D, Vector3D) {
        let ((u0, u1), (v0, v1)) = self.domain();
        let hu = (u1 - u0) * 1e-5;
        let hv = (v1 - v0) * 1e-5;
        let du = (self.point_at((u + hu).min(u1), v) - self.point_at((u - hu).max(u0), v))
            / ((u + hu).min(u1) - (u - hu).max(u0));
        let dv = (self.point_at(u, (v + hv).min(v1)) - self.point_at(u, (v - hv).max(v0)))
            / ((v + hv).min(v1) - (v - hv).max(v0));
        (du, dv)
    }

    /// Unit surface normal at (u, v).
    fn normal_at(&self, u: f64, v: f64) -> Vector3D {
        let (du, dv) = self.partials_at(u, v);
        safe_normalize(du.cross(&dv), Vector3D::z())
    }

    /// Closest-point projection of `p`, returned as surface parameters.
    /// Coarse grid scan followed by damped Gauss-Newton refinement.
    fn closest_point(&self, p: &Point3D) -> Result<(f64, f64)> {
        let ((u0, u1), (v0, v1)) = self.domain();
        let n = 16usize;

        // Coarse scan
        let mut best = (u0, v0);
        let mut best_dist_sq = f64::INFINITY;
        for i in 0..=n {
            for j in 0..=n {
                let u = u0 + (u1 - u0) * i as f64 / n as f64;
                let v = v0 + (v1 - v0) * j as f64 / n as f64;
                let d = (self.point_at(u, v) - p).norm_squared();
                if d < best_dist_sq {
                    best_dist_sq = d;
                    best = (u, v);
                }
            }
        }

        // Local refinement
        let (mut u, mut v) = best;
        for _ in 0..25 {
            let s = self.point_at(u, v);
            let (du, dv) = self.partials_at(u, v);
            let r = p - s;
            let a = du.norm_squared();
            let b = du.dot(&dv);
            let c = dv.norm_squared();
            let det = a * c - b * b;
            if det.abs() < 1e-14 {
                break;
            }
            let g0 = du.dot(&r);
            let g1 = dv.dot(&r);
            let step_u = (c * g0 - b * g1) / det;
            let step_v = (a * g1 - b * g0) / det;
            let nu = (u + step_u).clamp(u0, u1);
            let nv = (v + step_v).clamp(v0, v1);
            if (nu - u).abs() < 1e-12 && (nv - v).abs() < 1e-12 {
                break;
            }
            u = nu;
            v = nv;
        }

        if !u.is_finite() || !v.is_finite() {
            return Err(Error::ProjectionFailed(format!(
                "closest-point query diverged for ({}, {}, {})",
                p.x, p.y, p.z
            )));
        }
        Ok((u, v))
    }

    /// Project a point onto the surface (closest point, evaluated).
    fn pull_point(&self, p: &Point3D) -> Result<Point3D> {
        let (u, v) = self.closest_point(p)?;
        Ok(self.point_at(u, v))
    }
}

/// Tensor-grid surface: `control[i][j]` spans the U direction with `i` and
/// the V direction with `j`, evaluated bilinearly per cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlGridSurface {
    control: Vec<Vec<Point3D>>,
    u_domain: (f64, f64),
    v_domain: (f64, f64),
}

impl ControlGridSurface {
    /// Build from a rectangular control grid (at least 2×2).
    pub fn new(
        control: Vec<Vec<Point3D>>,
        u_domain: (f64, f64),
        v_domain: (f64, f64),
    ) -> Result<Self> {
        let nu = control.len();
        let nv = control.first().map(|r| r.len()).unwrap_or(0);
        if nu < 2 || nv < 2 {
            return Err(Error::InvalidParameter(format!(
                "control grid must be at least 2x2, got {}x{}",
                nu, nv
            )));
        }
        if control.iter().any(|r| r.len() != nv) {
            return Err(Error::InvalidParameter(
                "control grid rows have unequal lengths".into(),
            ));
        }
        if u_domain.1 <= u_domain.0 || v_domain.1 <= v_domain.0 {
            return Err(Error::InvalidParameter("empty surface domain".into()));
        }
        Ok(Self {
            control,
            u_domain,
            v_domain,
        })
    }

    /// Flat rectangular patch in the XY plane at `z`, for tests and simple
    /// vertical stacks.
    pub fn planar(width: f64, depth: f64, z: f64, nu: usize, nv: usize) -> Result<Self> {
        if width <= 0.0 || depth <= 0.0 {
            return Err(Error::InvalidParameter(
                "planar patch needs positive extents".into(),
            ));
        }
        let nu = nu.max(2);
        let nv = nv.max(2);
        let control = (0..nu)
            .map(|i| {
                (0..nv)
                    .map(|j| {
                        Point3D::new(
                            width * i as f64 / (nu - 1) as f64,
                            depth * j as f64 / (nv - 1) as f64,
                            z,
                        )
                    })
                    .collect()
            })
            .collect();
        Self::new(control, (0.0, width), (0.0, depth))
    }

    /// Control grid dimensions (nu, nv).
    pub fn dims(&self) -> (usize, usize) {
        (self.control.len(), self.control[0].len())
    }

    pub fn control_points(&self) -> &[Vec<Point3D>] {
        &self.control
    }

    /// Area-weighted mean of the control-vertex normals.
    pub fn mean_normal(&self) -> Vector3D {
        let (nu, nv) = self.dims();
        let mut sum = Vector3D::zeros();
        for i in 0..nu {
            for j in 0..nv {
                let (u, v) = self.param_of_vertex(i, j);
                sum += self.normal_at(u, v);
            }
        }
        safe_normalize(sum, Vector3D::z())
    }

    fn param_of_vertex(&self, i: usize, j: usize) -> (f64, f64) {
        let (nu, nv) = self.dims();
        let u = self.u_domain.0
            + (self.u_domain.1 - self.u_domain.0) * i as f64 / (nu - 1) as f64;
        let v = self.v_domain.0
            + (self.v_domain.1 - self.v_domain.0) * j as f64 / (nv - 1) as f64;
        (u, v)
    }

    /// Offset the surface along its vertex normals by `distance`.
    pub fn offset(&self, distance: f64) -> Result<Self> {
        let (nu, nv) = self.dims();
        let control = (0..nu)
            .map(|i| {
                (0..nv)
                    .map(|j| {
                        let (u, v) = self.param_of_vertex(i, j);
                        self.control[i][j] + self.normal_at(u, v) * distance
                    })
                    .collect()
            })
            .collect();
        Self::new(control, self.u_domain, self.v_domain)
    }

    /// Resample onto a new control grid of the given dimensions. The domain
    /// is preserved.
    pub fn rebuild(&self, nu: usize, nv: usize) -> Result<Self> {
        if nu < 2 || nv < 2 {
            return Err(Error::InvalidParameter(
                "rebuild needs at least a 2x2 grid".into(),
            ));
        }
        let control = (0..nu)
            .map(|i| {
                (0..nv)
                    .map(|j| {
                        let u = self.u_domain.0
                            + (self.u_domain.1 - self.u_domain.0) * i as f64 / (nu - 1) as f64;
                        let v = self.v_domain.0
                            + (self.v_domain.1 - self.v_domain.0) * j as f64 / (nv - 1) as f64;
                        self.point_at(u, v)
                    })
                    .collect()
            })
            .collect();
        Self::new(control, self.u_domain, self.v_domain)
    }

    /// Per-control-point linear morph between two dimension-matched surfaces.
    /// The result keeps `a`'s domain.
    pub fn lerp(a: &Self, b: &Self, t: f64) -> Result<Self> {
        let (au, av) = a.dims();
        let (bu, bv) = b.dims();
        if (au, av) != (bu, bv) {
            return Err(Error::DimensionMismatch {
                a_u: au,
                a_v: av,
                b_u: bu,
                b_v: bv,
            });
        }
        let control = (0..au)
            .map(|i| {
                (0..av)
                    .map(|j| {
                        let pa = a.control[i][j];
                        let pb = b.control[i][j];
                        pa + (pb - pa) * t
                    })
                    .collect()
            })
            .collect();
        Self::new(control, a.u_domain, a.v_domain)
    }

    /// Mean distance from an n×n parameter sample of this surface to the
    /// closest point on `base`.
    pub fn average_distance_to(&self, base: &Self, n: usize) -> Result<f64> {
        let n = n.max(2);
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..n {
            for j in 0..n {
                let u = self.u_domain.0
                    + (self.u_domain.1 - self.u_domain.0) * i as f64 / (n - 1) as f64;
                let v = self.v_domain.0
                    + (self.v_domain.1 - self.v_domain.0) * j as f64 / (n - 1) as f64;
                let p = self.point_at(u, v);
                let q = base.pull_point(&p)?;
                sum += (p - q).norm();
                count += 1;
            }
        }
        Ok(sum / count as f64)
    }

    /// Transfer a point from `base` onto this surface by domain-normalized
    /// parameter remapping: the point's (u, v) on `base` keeps its relative
    /// position inside the domain.
    pub fn remap_from(&self, base: &Self, p: &Point3D) -> Result<Point3D> {
        let (u, v) = base.closest_point(p)?;
        let tu = (u - base.u_domain.0) / (base.u_domain.1 - base.u_domain.0);
        let tv = (v - base.v_domain.0) / (base.v_domain.1 - base.v_domain.0);
        let nu = self.u_domain.0 + tu * (self.u_domain.1 - self.u_domain.0);
        let nv = self.v_domain.0 + tv * (self.v_domain.1 - self.v_domain.0);
        Ok(self.point_at(nu, nv))
    }

    /// Project `p` onto the surface along the world Z axis: the surface point
    /// closest to `p` in XY.
    pub fn project_z(&self, p: &Point3D) -> Result<Point3D> {
        let ((u0, u1), (v0, v1)) = self.domain();
        let n = 24usize;
        let mut best = (u0, v0);
        let mut best_d = f64::INFINITY;
        for i in 0..=n {
            for j in 0..=n {
                let u = u0 + (u1 - u0) * i as f64 / n as f64;
                let v = v0 + (v1 - v0) * j as f64 / n as f64;
                let s = self.point_at(u, v);
                let d = (s.x - p.x).powi(2) + (s.y - p.y).powi(2);
                if d < best_d {
                    best_d = d;
                    best = (u, v);
                }
            }
        }
        // Shrinking-window refinement in XY only
        let (mut u, mut v) = best;
        let mut ru = (u1 - u0) / n as f64;
        let mut rv = (v1 - v0) / n as f64;
        for _ in 0..24 {
            let mut improved = false;
            for &(du, dv) in &[
                (ru, 0.0),
                (-ru, 0.0),
                (0.0, rv),
                (0.0, -rv),
                (ru, rv),
                (ru, -rv),
                (-ru, rv),
                (-ru, -rv),
            ] {
                let cu = (u + du).clamp(u0, u1);
                let cv = (v + dv).clamp(v0, v1);
                let s = self.point_at(cu, cv);
                let d = (s.x - p.x).powi(2) + (s.y - p.y).powi(2);
                if d < best_d {
                    best_d = d;
                    u = cu;
                    v = cv;
                    improved = true;
                }
            }
            if !improved {
                ru *= 0.5;
                rv *= 0.5;
            }
        }
        if best_d.sqrt() > 1e-3 * ((u1 - u0) + (v1 - v0)) + 1e-6 {
            return Err(Error::ProjectionFailed(format!(
                "no surface point above/below ({}, {})",
                p.x, p.y
            )));
        }
        Ok(self.point_at(u, v))
    }
}

impl Surface for ControlGridSurface {
    fn domain(&self) -> ((f64, f64), (f64, f64)) {
        (self.u_domain, self.v_domain)
    }

    fn point_at(&self, u: f64, v: f64) -> Point3D {
        let (nu, nv) = self.dims();
        let tu = ((u - self.u_domain.0) / (self.u_domain.1 - self.u_domain.0)).clamp(0.0, 1.0)
            * (nu - 1) as f64;
        let tv = ((v - self.v_domain.0) / (self.v_domain.1 - self.v_domain.0)).clamp(0.0, 1.0)
            * (nv - 1) as f64;
        let i = (tu.floor() as usize).min(nu - 2);
        let j = (tv.floor() as usize).min(nv - 2);
        let fu = tu - i as f64;
        let fv = tv - j as f64;

        let p00 = self.control[i][j];
        let p10 = self.control[i + 1][j];
        let p01 = self.control[i][j + 1];
        let p11 = self.control[i + 1][j + 1];

        let a = p00 + (p10 - p00) * fu;
        let b = p01 + (p11 - p01) * fu;
        a + (b - a) * fv
    }
}

/// Project a polyline onto a surface, inserting `subdivisions` extra
/// UV-interpolated samples between consecutive vertices so the result follows
/// the surface rather than chord lines.
pub fn project_polyline<S: Surface>(
    surface: &S,
    points: &[Point3D],
    closed: bool,
    subdivisions: usize,
) -> Result<Curve> {
    if points.len() < 2 {
        return Err(Error::DegenerateCurve(
            "polyline projection needs at least 2 points".into(),
        ));
    }
    let uvs: Vec<(f64, f64)> = points
        .iter()
        .map(|p| surface.closest_point(p))
        .collect::<Result<_>>()?;

    let n = uvs.len();
    let span_count = if closed { n } else { n - 1 };
    let mut out: Vec<Point3D> = Vec::with_capacity(n * (subdivisions + 1) + 1);
    for i in 0..span_count {
        let (ua, va) = uvs[i];
        let (ub, vb) = uvs[(i + 1) % n];
        for k in 0..=subdivisions {
            let t = k as f64 / (subdivisions + 1) as f64;
            out.push(surface.point_at(ua + (ub - ua) * t, va + (vb - va) * t));
        }
    }
    if !closed {
        let (ul, vl) = uvs[n - 1];
        out.push(surface.point_at(ul, vl));
    }
    Curve::new(out, closed)
}
