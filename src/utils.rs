//! Shared utility functions.

use std::f32::consts::PI;

/// Tolerance for float comparisons against sensor and odometry values.
pub const EPSILON: f32 = 0.001;

/// Approximate float equality within [`EPSILON`].
#[inline]
pub fn float_eq(x: f32, v: f32) -> bool {
    (v - EPSILON) < x && x < (v + EPSILON)
}

/// Normalize an angle to (−π, π].
///
/// Values within [`EPSILON`] of −π come back as +π so headings compare
/// consistently at the wrap point.
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle;
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    if float_eq(a, -PI) {
        a = PI;
    }
    a
}

/// Magnitude of the angular difference between two headings, accounting
/// for wraparound (always in [0, π]).
#[inline]
pub fn angular_diff(theta1: f32, theta2: f32) -> f32 {
    let t1 = if theta1 < 0.0 { theta1 + 2.0 * PI } else { theta1 };
    let t2 = if theta2 < 0.0 { theta2 + 2.0 * PI } else { theta2 };
    let mut diff = t1 - t2;
    if diff < 0.0 {
        diff += 2.0 * PI;
    }
    if diff > PI {
        diff = (diff - 2.0 * PI).abs();
    }
    diff
}
