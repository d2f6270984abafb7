//! 2D vector arithmetic used by the attribute-expression language: the usual
//! component-wise operations plus the norm, perpendiculars and angles needed
//! to derive new shape geometry from matched context.

use derive_more::{Add, AddAssign};

/// A 2D vector, also used as a point in the plane.
#[derive(derive_more::Debug, Clone, Copy, PartialEq, Default, Add, AddAssign)]
#[debug("({x}, {y})")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// The left-hand perpendicular, i.e. `self` rotated by +90 degrees.
    pub fn perp_left(self) -> Vec2 {
        Vec2::new(-self.y, self.x)
    }

    /// The right-hand perpendicular, i.e. `self` rotated by -90 degrees.
    pub fn perp_right(self) -> Vec2 {
        Vec2::new(self.y, -self.x)
    }

    /// The unit vector pointing in the same direction, or `None` for the
    /// zero vector.
    pub fn normalized(self) -> Option<Vec2> {
        let n = self.norm();
        if n == 0.0 { None } else { Some(self / n) }
    }

    pub fn midpoint(self, other: Vec2) -> Vec2 {
        Vec2::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    /// Linear interpolation between `self` (t = 0) and `other` (t = 1).
    pub fn lerp(self, other: Vec2, t: f64) -> Vec2 {
        self + (other - self) * t
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (other - self).norm()
    }

    /// The unsigned angle between two vectors in radians, or `None` if
    /// either vector is zero.
    pub fn angle_between(self, other: Vec2) -> Option<f64> {
        let denom = self.norm() * other.norm();
        if denom == 0.0 {
            return None;
        }
        // Clamp against rounding before acos.
        Some((self.dot(other) / denom).clamp(-1.0, 1.0).acos())
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Vec2;

    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

impl std::ops::Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<f64> for Vec2 {
    type Output = Vec2;

    fn div(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = Vec2::new(1.0, 2.0);
        let b = Vec2::new(3.0, -1.0);
        assert_eq!(a + b, Vec2::new(4.0, 1.0));
        assert_eq!(b - a, Vec2::new(2.0, -3.0));
        assert_eq!(a * 2.0, Vec2::new(2.0, 4.0));
        assert_eq!(a.dot(b), 1.0);
    }

    #[test]
    fn perpendiculars_are_orthogonal() {
        let v = Vec2::new(3.0, 4.0);
        assert_eq!(v.dot(v.perp_left()), 0.0);
        assert_eq!(v.dot(v.perp_right()), 0.0);
        assert_eq!(v.perp_left(), -v.perp_right());
    }

    #[test]
    fn norm_and_normalized() {
        let v = Vec2::new(3.0, 4.0);
        assert_eq!(v.norm(), 5.0);
        let unit = v.normalized().unwrap();
        assert!((unit.norm() - 1.0).abs() < 1e-12);
        assert_eq!(Vec2::ZERO.normalized(), None);
    }

    #[test]
    fn midpoint_and_lerp_agree_at_half() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(10.0, 4.0);
        assert_eq!(a.midpoint(b), a.lerp(b, 0.5));
    }

    #[test]
    fn angle_between_axes() {
        let x = Vec2::new(1.0, 0.0);
        let y = Vec2::new(0.0, 1.0);
        let angle = x.angle_between(y).unwrap();
        assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(x.angle_between(Vec2::ZERO), None);
    }
}
