//! Closed-form event time prediction for ballistic trajectories.
//!
//! Between events every dynamic particle moves in a straight line, so the
//! time of any future contact, range crossing, or wall hit is the root of a
//! low-degree polynomial. All predictions here are pure: they never touch
//! particle state, and they answer in time deltas relative to the instant
//! the inputs describe.

use crate::core::particle::DIM;

/// Times closer together than this are treated as simultaneous. Also the
/// tolerance for "streaming backwards" checks.
pub(crate) const EPS_TIME: f64 = 1e-12;

/// Outcome of a contact prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Approach {
    /// The pair never reaches the target separation.
    Never,
    /// Already at (or numerically past) the target separation and closing:
    /// the event fires now.
    Immediate,
    /// Contact after this strictly positive delay.
    After(f64),
}

#[inline]
pub(crate) fn dot(a: &[f64; DIM], b: &[f64; DIM]) -> f64 {
    let mut s = 0.0;
    for k in 0..DIM {
        s += a[k] * b[k];
    }
    s
}

/// Earliest future time at which two ballistic trajectories reach separation
/// `d` from the outside.
///
/// With relative position `dr` and relative velocity `dv`, solves
/// |dr + dv t|^2 = d^2 and keeps the smaller root. A pair that is not
/// approaching (2 dr.dv >= 0) never makes contact. Roots within
/// `immediate_tol` of zero, and overlapping-but-approaching configurations,
/// collapse to [`Approach::Immediate`] so the caller resolves them at the
/// current clock instead of scheduling a past time.
pub fn contact_time(dr: &[f64; DIM], dv: &[f64; DIM], d: f64, immediate_tol: f64) -> Approach {
    let b = 2.0 * dot(dr, dv);
    if b >= 0.0 {
        return Approach::Never;
    }
    let a = dot(dv, dv);
    if a == 0.0 {
        return Approach::Never;
    }
    let c = dot(dr, dr) - d * d;
    if c <= 0.0 {
        // Already overlapping the target sphere while approaching.
        return Approach::Immediate;
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Approach::Never;
    }
    let t = (-b - disc.sqrt()) / (2.0 * a);
    if t <= immediate_tol {
        Approach::Immediate
    } else {
        Approach::After(t)
    }
}

/// Time for a pair inside (or exactly at) separation `d` to reach it from
/// within, the larger root of |dr + dv t|^2 = d^2. `None` if the pair is not
/// moving relative to each other, is strictly outside, or sits on the shell
/// without inward motion. A pair freshly placed on the shell but moving
/// inwards still gets its future escape.
pub fn escape_time(dr: &[f64; DIM], dv: &[f64; DIM], d: f64) -> Option<f64> {
    let a = dot(dv, dv);
    if a == 0.0 {
        return None;
    }
    let b = 2.0 * dot(dr, dv);
    let c = dot(dr, dr) - d * d;
    if c > 0.0 {
        return None;
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b + disc.sqrt()) / (2.0 * a);
    (t > 0.0).then_some(t)
}

/// Time until a sphere of radius `radius` at coordinate `x` with velocity
/// `v` touches a reflecting wall on an axis of length `l`. Returns the
/// delay and whether the max wall (at `l`) is hit; `None` when `v` is zero.
pub fn wall_crossing(x: f64, v: f64, radius: f64, l: f64) -> Option<(f64, bool)> {
    if v > 0.0 {
        Some((((l - radius) - x) / v, true))
    } else if v < 0.0 {
        Some(((radius - x) / v, false))
    } else {
        None
    }
}

/// Time until coordinate `x` with velocity `v` leaves [0, l) on a periodic
/// axis. Returns the delay and whether the max face is crossed; `None` when
/// `v` is zero. Negative delays (already outside by roundoff) clamp to zero.
pub fn wrap_crossing(x: f64, v: f64, l: f64) -> Option<(f64, bool)> {
    if v > 0.0 {
        Some((((l - x) / v).max(0.0), true))
    } else if v < 0.0 {
        Some(((-x / v).max(0.0), false))
    } else {
        None
    }
}
