//! Vector and euler types for movement samples.

use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

/// Rounds `value` to `decimals` decimal places.
pub fn round_to(value: f32, decimals: u32) -> f32 {
    let factor = 10f32.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Wraps an angle in radians into `(-PI, PI]`.
pub fn normalize_angle(angle: f32) -> f32 {
    let mut wrapped = angle % TAU;
    if wrapped <= -PI {
        wrapped += TAU;
    } else if wrapped > PI {
        wrapped -= TAU;
    }
    wrapped
}

/// Interpolates between two angles along the shorter arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let delta = normalize_angle(to - from);
    normalize_angle(from + delta * t)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn rounded(self, decimals: u32) -> Self {
        Self {
            x: round_to(self.x, decimals),
            y: round_to(self.y, decimals),
            z: round_to(self.z, decimals),
        }
    }

    pub fn lerp(self, target: Vector3, t: f32) -> Self {
        Self {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
            z: self.z + (target.z - self.z) * t,
        }
    }
}

/// Per-axis rotation in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Euler {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Euler {
    pub const IDENTITY: Euler = Euler {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Wraps every axis into `(-PI, PI]`.
    pub fn normalized(self) -> Self {
        Self {
            x: normalize_angle(self.x),
            y: normalize_angle(self.y),
            z: normalize_angle(self.z),
        }
    }

    pub fn rounded(self, decimals: u32) -> Self {
        Self {
            x: round_to(self.x, decimals),
            y: round_to(self.y, decimals),
            z: round_to(self.z, decimals),
        }
    }

    /// Shortest-arc interpolation on each axis.
    pub fn lerp(self, target: Euler, t: f32) -> Self {
        Self {
            x: lerp_angle(self.x, target.x, t),
            y: lerp_angle(self.y, target.y, t),
            z: lerp_angle(self.z, target.z, t),
        }
    }
}
