//! Types, aliases and helper operations for doing math with `ultraviolet`.
//!
//! All world math is `f64`; positions in a continuous-time engine double as
//! coefficients of time polynomials, and `f32` runs out of bits fast there.

pub use ultraviolet as uv;

/// The 2D vector type used throughout the engine.
pub type Vec2 = uv::DVec2;

/// The scalar 2D cross product `a.x * b.y - a.y * b.x`.
///
/// Its sign tells which side of `a` the vector `b` lies on:
/// positive on the counter-clockwise side, negative on the clockwise side.
#[inline]
pub fn cross(a: Vec2, b: Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// `v` rotated 90° counter-clockwise.
#[inline]
pub fn left_normal(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}

/// `v` rotated 90° clockwise.
#[inline]
pub fn right_normal(v: Vec2) -> Vec2 {
    Vec2::new(v.y, -v.x)
}

/// Projection of `v` onto the line spanned by `axis`.
///
/// `axis` does not need to be normalized. A zero axis gives a zero result.
#[inline]
pub fn project(v: Vec2, axis: Vec2) -> Vec2 {
    let len_sq = axis.mag_sq();
    if len_sq == 0.0 {
        Vec2::zero()
    } else {
        axis * (v.dot(axis) / len_sq)
    }
}

/// Linear interpolation between two vectors.
#[inline]
pub fn lerp(a: Vec2, b: Vec2, t: f64) -> Vec2 {
    a + (b - a) * t
}

/// A 2×3 affine transform with linear columns `a`, `b` and translation `p`.
///
/// Point application is `a * v.x + b * v.y + p`. Unlike a pose or matrix
/// type, transforms here also form a vector space (componentwise addition
/// and scalar multiplication over all six entries), which is what lets a
/// trajectory evolve as `base + (t - anchor) * motion`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct Transform {
    pub a: Vec2,
    pub b: Vec2,
    pub p: Vec2,
}

impl Transform {
    #[inline]
    pub fn new(a: Vec2, b: Vec2, p: Vec2) -> Self {
        Self { a, b, p }
    }

    /// The transform that maps every point to itself.
    #[inline]
    pub fn identity() -> Self {
        Self {
            a: Vec2::new(1.0, 0.0),
            b: Vec2::new(0.0, 1.0),
            p: Vec2::zero(),
        }
    }

    /// The transform with all six entries zero.
    ///
    /// As a motion this means "not moving at all".
    #[inline]
    pub fn zero() -> Self {
        Self {
            a: Vec2::zero(),
            b: Vec2::zero(),
            p: Vec2::zero(),
        }
    }

    /// Rotation around the origin by `angle` radians, counter-clockwise.
    pub fn rotation(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            a: Vec2::new(cos, sin),
            b: Vec2::new(-sin, cos),
            p: Vec2::zero(),
        }
    }

    /// Uniform scaling around the origin.
    pub fn scaling(factor: f64) -> Self {
        Self {
            a: Vec2::new(factor, 0.0),
            b: Vec2::new(0.0, factor),
            p: Vec2::zero(),
        }
    }

    /// Pure translation.
    pub fn translation(v: Vec2) -> Self {
        Self {
            a: Vec2::new(1.0, 0.0),
            b: Vec2::new(0.0, 1.0),
            p: v,
        }
    }

    /// Apply to a point, including translation.
    #[inline]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        self.a * v.x + self.b * v.y + self.p
    }

    /// Apply only the linear part, for directions and tangents.
    #[inline]
    pub fn apply_direction(&self, v: Vec2) -> Vec2 {
        self.a * v.x + self.b * v.y
    }

    /// Compose with another transform such that `self` is applied first:
    /// `self.append(other).apply(v) == other.apply(self.apply(v))`.
    pub fn append(&self, other: &Transform) -> Transform {
        Transform {
            a: other.apply_direction(self.a),
            b: other.apply_direction(self.b),
            p: other.apply(self.p),
        }
    }

    /// `self + other * factor` without an intermediate.
    #[inline]
    pub fn add_scaled(&self, other: &Transform, factor: f64) -> Transform {
        Transform {
            a: self.a + other.a * factor,
            b: self.b + other.b * factor,
            p: self.p + other.p * factor,
        }
    }

    /// Componentwise interpolation between two transforms.
    pub fn lerp(&self, other: &Transform, t: f64) -> Transform {
        self.add_scaled(&(*other - *self), t)
    }

    /// Determinant of the linear part.
    #[inline]
    pub fn determinant(&self) -> f64 {
        cross(self.a, self.b)
    }

    /// The inverse transform, or `None` if the linear part is singular.
    pub fn invert(&self) -> Option<Transform> {
        let det = self.determinant();
        if det == 0.0 {
            return None;
        }
        let inv = Transform {
            a: Vec2::new(self.b.y / det, -self.a.y / det),
            b: Vec2::new(-self.b.x / det, self.a.x / det),
            p: Vec2::zero(),
        };
        Some(Transform {
            p: -inv.apply_direction(self.p),
            ..inv
        })
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Add for Transform {
    type Output = Transform;
    fn add(self, other: Transform) -> Transform {
        self.add_scaled(&other, 1.0)
    }
}

impl std::ops::Sub for Transform {
    type Output = Transform;
    fn sub(self, other: Transform) -> Transform {
        self.add_scaled(&other, -1.0)
    }
}

impl std::ops::Mul<f64> for Transform {
    type Output = Transform;
    fn mul(self, factor: f64) -> Transform {
        Transform {
            a: self.a * factor,
            b: self.b * factor,
            p: self.p * factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec2, b: Vec2) -> bool {
        (a - b).mag() < 1e-12
    }

    #[test]
    fn apply_is_column_combination() {
        let tr = Transform::new(
            Vec2::new(1.0, 2.0),
            Vec2::new(3.0, 4.0),
            Vec2::new(5.0, 6.0),
        );
        assert_eq!(tr.apply(Vec2::new(1.0, 1.0)), Vec2::new(9.0, 12.0));
        assert_eq!(tr.apply_direction(Vec2::new(1.0, 1.0)), Vec2::new(4.0, 6.0));
    }

    #[test]
    fn append_applies_self_first() {
        let rot = Transform::rotation(std::f64::consts::FRAC_PI_2);
        let shift = Transform::translation(Vec2::new(1.0, 0.0));
        let v = Vec2::new(1.0, 0.0);
        // rotate then shift: (1,0) -> (0,1) -> (1,1)
        assert!(close(rot.append(&shift).apply(v), Vec2::new(1.0, 1.0)));
        // shift then rotate: (1,0) -> (2,0) -> (0,2)
        assert!(close(shift.append(&rot).apply(v), Vec2::new(0.0, 2.0)));
    }

    #[test]
    fn invert_round_trips() {
        let tr = Transform::rotation(0.3)
            .append(&Transform::scaling(2.0))
            .append(&Transform::translation(Vec2::new(-4.0, 7.0)));
        let inv = tr.invert().unwrap();
        for v in [Vec2::zero(), Vec2::new(3.0, -2.0), Vec2::new(-0.5, 11.0)] {
            assert!(close(inv.apply(tr.apply(v)), v));
        }
    }

    #[test]
    fn singular_transform_has_no_inverse() {
        assert!(Transform::zero().invert().is_none());
        assert!(Transform::scaling(0.0).invert().is_none());
    }

    #[test]
    fn cross_sign_convention() {
        let x = Vec2::new(1.0, 0.0);
        let y = Vec2::new(0.0, 1.0);
        assert_eq!(cross(x, y), 1.0);
        assert_eq!(cross(y, x), -1.0);
        assert_eq!(left_normal(x), y);
        assert_eq!(right_normal(y), x);
    }

    #[test]
    fn project_onto_axis() {
        let v = Vec2::new(3.0, 4.0);
        assert!(close(project(v, Vec2::new(2.0, 0.0)), Vec2::new(3.0, 0.0)));
        assert_eq!(project(v, Vec2::zero()), Vec2::zero());
    }
}
