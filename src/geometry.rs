use nalgebra::{Point3, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

/// 3D point type
pub type Point3D = Point3<f64>;

/// 3D vector type
pub type Vector3D = Vector3<f64>;

/// Local coordinate frame at a sampled toolpath point, used to orient the
/// tool/end-effector. Axes are unit length and mutually orthogonal;
/// `z_axis = x_axis × y_axis`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrientationFrame {
    pub origin: Point3D,
    pub x_axis: Vector3D,
    pub y_axis: Vector3D,
    pub z_axis: Vector3D,
}

impl OrientationFrame {
    /// Build a frame from an origin, an up axis and an in-plane X hint.
    /// The X hint is re-orthogonalized against the up axis; degenerate hints
    /// (parallel to up) fall back to world X or world Y.
    pub fn from_up_and_x_hint(origin: Point3D, up: Vector3D, x_hint: Vector3D) -> Self {
        let z = safe_normalize(up, Vector3D::z());
        let mut x = x_hint - z * x_hint.dot(&z);
        if x.norm() < 1e-9 {
            x = Vector3D::x() - z * Vector3D::x().dot(&z);
            if x.norm() < 1e-9 {
                x = Vector3D::y() - z * Vector3D::y().dot(&z);
            }
        }
        let x = x.normalize();
        let y = z.cross(&x);
        Self {
            origin,
            x_axis: x,
            y_axis: y,
            z_axis: z,
        }
    }

    /// Rotate the frame about its own Y axis by `angle_rad` (tool tilt).
    pub fn rotated_about_y(&self, angle_rad: f64) -> Self {
        let rot = Rotation3::from_axis_angle(&Unit::new_normalize(self.y_axis), angle_rad);
        Self {
            origin: self.origin,
            x_axis: rot * self.x_axis,
            y_axis: self.y_axis,
            z_axis: rot * self.z_axis,
        }
    }
}

/// Normalize `v`, falling back to `fallback` for near-zero vectors.
pub fn safe_normalize(v: Vector3D, fallback: Vector3D) -> Vector3D {
    let n = v.norm();
    if n < 1e-12 || !n.is_finite() {
        fallback
    } else {
        v / n
    }
}

/// Sine of the angle between two vectors (always in [0, 1]).
pub fn sine_between(a: &Vector3D, b: &Vector3D) -> f64 {
    let na = a.norm();
    let nb = b.norm();
    if na < 1e-12 || nb < 1e-12 {
        return 0.0;
    }
    (a.cross(b).norm() / (na * nb)).clamp(0.0, 1.0)
}

/// Compute the signed area of a 2D polygon (using only X,Y of points).
/// Positive = counter-clockwise, negative = clockwise.
pub fn signed_area_2d(points: &[Point3D]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y;
        area -= points[j].x * points[i].y;
    }
    area / 2.0
}

/// Compute intersection of two 2D line segments.
/// Returns Some((t, u)) where t is parameter on segment a1->a2, u on b1->b2.
/// Both t and u in [0,1] means the segments actually intersect.
pub fn segment_intersection_2d(
    a1: (f64, f64),
    a2: (f64, f64),
    b1: (f64, f64),
    b2: (f64, f64),
) -> Option<(f64, f64)> {
    let dx_a = a2.0 - a1.0;
    let dy_a = a2.1 - a1.1;
    let dx_b = b2.0 - b1.0;
    let dy_b = b2.1 - b1.1;

    let denom = dx_a * dy_b - dy_a * dx_b;
    if denom.abs() < 1e-12 {
        return None; // Parallel or coincident
    }

    let t = ((b1.0 - a1.0) * dy_b - (b1.1 - a1.1) * dx_b) / denom;
    let u = ((b1.0 - a1.0) * dy_a - (b1.1 - a1.1) * dx_a) / denom;

    Some((t, u))
}

/// Check if a point is inside a closed polygon (XY only) using ray casting.
pub fn point_in_polygon_xy(point: &Point3D, polygon: &[Point3D]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let n = polygon.len();

    for i in 0..n {
        let j = (i + 1) % n;
        let pi = &polygon[i];
        let pj = &polygon[j];

        if ((pi.y > point.y) != (pj.y > point.y))
            && (point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
    }

    inside
}

/// Check whether a closed polygon (XY projection) is simple, i.e. no two
/// non-adjacent edges cross.
pub fn polygon_is_simple_xy(points: &[Point3D]) -> bool {
    let n = points.len();
    if n < 4 {
        return true;
    }
    for i in 0..n {
        let i_next = (i + 1) % n;
        for j in (i + 2)..n {
            if j == n - 1 && i == 0 {
                continue; // Adjacent (last edge wraps to first vertex)
            }
            let j_next = (j + 1) % n;
            if let Some((t, u)) = segment_intersection_2d(
                (points[i].x, points[i].y),
                (points[i_next].x, points[i_next].y),
                (points[j].x, points[j].y),
                (points[j_next].x, points[j_next].y),
            ) {
                if t > 1e-9 && t < 1.0 - 1e-9 && u > 1e-9 && u < 1.0 - 1e-9 {
                    return false;
                }
            }
        }
    }
    true
}
