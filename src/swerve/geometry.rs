// Angle math and module state types
//
// Every angle that leaves the module is wrapped to (-π, π]. The relative
// steering sensor grows without bound across rotations, so reads go through
// `normalize_angle` before they become a `Rotation2d`.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Wrap an angle in radians into (-π, π]
///
/// Values already in range are returned untouched.
pub fn normalize_angle(rad: f64) -> f64 {
    if rad > -PI && rad <= PI {
        return rad;
    }
    let wrapped = rad.rem_euclid(TAU); // [0, 2π)
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

/// A planar rotation, stored normalized to (-π, π]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotation2d {
    radians: f64,
}

impl Rotation2d {
    pub fn from_radians(rad: f64) -> Self {
        Self {
            radians: normalize_angle(rad),
        }
    }

    pub fn from_degrees(deg: f64) -> Self {
        Self::from_radians(deg.to_radians())
    }

    pub fn radians(&self) -> f64 {
        self.radians
    }

    pub fn degrees(&self) -> f64 {
        self.radians.to_degrees()
    }

    pub fn cos(&self) -> f64 {
        self.radians.cos()
    }

    /// Shortest signed rotation from `other` to `self`
    pub fn minus(&self, other: Rotation2d) -> Rotation2d {
        Rotation2d::from_radians(self.radians - other.radians)
    }

    pub fn plus(&self, other: Rotation2d) -> Rotation2d {
        Rotation2d::from_radians(self.radians + other.radians)
    }

    pub fn is_finite(&self) -> bool {
        self.radians.is_finite()
    }
}

/// Wheel velocity (m/s, signed) and steering angle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModuleState {
    pub speed: f64,
    pub angle: Rotation2d,
}

impl ModuleState {
    pub fn new(speed: f64, angle: Rotation2d) -> Self {
        Self { speed, angle }
    }

    /// Flip the target by π and negate speed when the steering error exceeds 90°,
    /// so the wheel never turns more than a quarter revolution for a drive vector.
    pub fn optimize(self, current: Rotation2d) -> Self {
        let delta = self.angle.minus(current);
        if delta.radians().abs() > FRAC_PI_2 {
            Self {
                speed: -self.speed,
                angle: self.angle.plus(Rotation2d::from_radians(PI)),
            }
        } else {
            self
        }
    }

    /// Scale speed by the cosine of the residual steering error
    pub fn scale_by_error(self, current: Rotation2d) -> Self {
        Self {
            speed: self.speed * self.angle.minus(current).cos(),
            angle: self.angle,
        }
    }
}

/// Cumulative drive distance (m, never wrapped) and steering angle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModulePosition {
    pub distance: f64,
    pub angle: Rotation2d,
}

impl ModulePosition {
    pub fn new(distance: f64, angle: Rotation2d) -> Self {
        Self { distance, angle }
    }
}
