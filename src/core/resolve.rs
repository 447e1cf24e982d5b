//! Velocity updates applied at realized events.
//!
//! All functions here assume the participants have already been streamed to
//! the event time; they only touch velocities (and, for walls and wraps, the
//! one coordinate being snapped). Momentum bookkeeping goes through a single
//! scalar impulse along the contact normal, so pair updates conserve
//! momentum exactly and conserve or step energy as the law dictates.

use crate::core::boundary::{wall_axis_side, Domain, WallId};
use crate::core::event::WellCrossing;
use crate::core::oracle::dot;
use crate::core::particle::{Particle, DIM};
use crate::error::{Error, Result};

/// Relative geometry of a streamed pair at one instant.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PairGeometry {
    /// Unit normal pointing from `a` to `b` (minimum-imaged).
    pub n: [f64; DIM],
    /// Center distance.
    pub dist: f64,
    /// Normal relative velocity, negative while approaching.
    pub u_n: f64,
}

/// Compute the contact geometry of a pair at absolute time `t`, evaluated
/// ballistically without mutating either particle. A vanishing separation
/// has no contact normal and is reported as a numerical error.
pub(crate) fn pair_geometry(
    pa: &Particle,
    pb: &Particle,
    domain: &Domain,
    t: f64,
) -> Result<PairGeometry> {
    let (ra, rb) = (pa.position_at(t), pb.position_at(t));
    let mut dr = [0.0; DIM];
    for k in 0..DIM {
        dr[k] = rb[k] - ra[k];
    }
    domain.min_image(&mut dr);
    let dist = dot(&dr, &dr).sqrt();
    if !dist.is_finite() || dist < 1e-14 {
        return Err(Error::MathError(format!(
            "degenerate contact normal between particles {} and {}",
            pa.id, pb.id
        )));
    }
    let mut n = dr;
    for c in &mut n {
        *c /= dist;
    }
    let mut dv = [0.0; DIM];
    for k in 0..DIM {
        dv[k] = pb.v[k] - pa.v[k];
    }
    Ok(PairGeometry {
        n,
        dist,
        u_n: dot(&dv, &n),
    })
}

#[inline]
fn inv_mass(p: &Particle) -> f64 {
    if p.is_dynamic() {
        1.0 / p.mass
    } else {
        0.0
    }
}

/// Apply scalar impulse `j` along `n`: `a` recoils, `b` is pushed forward.
/// Static participants have zero inverse mass and stay put.
fn apply_normal_impulse(pa: &mut Particle, pb: &mut Particle, n: &[f64; DIM], j: f64) {
    let (wa, wb) = (inv_mass(pa), inv_mass(pb));
    for k in 0..DIM {
        pa.v[k] -= j * wa * n[k];
        pb.v[k] += j * wb * n[k];
    }
}

/// Combined inverse mass of the pair. Errors if both are static, which the
/// predictor never schedules.
fn pair_inv_mass(pa: &Particle, pb: &Particle) -> Result<f64> {
    let w = inv_mass(pa) + inv_mass(pb);
    if w == 0.0 {
        return Err(Error::MathError(format!(
            "collision between two static particles {} and {}",
            pa.id, pb.id
        )));
    }
    Ok(w)
}

/// Hard-core bounce: the normal relative speed reverses, scaled by the
/// restitution coefficient (1 = elastic).
pub(crate) fn apply_core_bounce(
    pa: &mut Particle,
    pb: &mut Particle,
    geom: &PairGeometry,
    restitution: f64,
) -> Result<()> {
    let w = pair_inv_mass(pa, pb)?;
    let j = -(1.0 + restitution) * geom.u_n / w;
    apply_normal_impulse(pa, pb, &geom.n, j);
    Ok(())
}

/// What a square-well range crossing did to the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WellOutcome {
    /// Fell into the well; kinetic energy stepped up by the depth.
    Entered,
    /// Left the well outward; kinetic energy stepped down by the depth.
    Escaped,
    /// Not enough normal kinetic energy to climb out; reflected off the
    /// inside of the outer range and still captured.
    Reflected,
}

/// Resolve a crossing of the well's outer range.
///
/// The normal kinetic energy of the relative motion is (1/2) mu u_n^2 with
/// mu the reduced mass. Entering converts the depth into extra inward
/// speed; exiting pays it back, or reflects when u_n^2 < 2 depth / mu.
pub(crate) fn apply_well_crossing(
    pa: &mut Particle,
    pb: &mut Particle,
    geom: &PairGeometry,
    depth: f64,
    crossing: WellCrossing,
) -> Result<WellOutcome> {
    let w = pair_inv_mass(pa, pb)?;
    let u = geom.u_n;
    let (target, outcome) = match crossing {
        WellCrossing::Enter => (-(u * u + 2.0 * depth * w).sqrt(), WellOutcome::Entered),
        WellCrossing::Exit => {
            let residual = u * u - 2.0 * depth * w;
            if residual > 0.0 {
                (residual.sqrt(), WellOutcome::Escaped)
            } else {
                (-u, WellOutcome::Reflected)
            }
        }
    };
    let j = (target - u) / w;
    apply_normal_impulse(pa, pb, &geom.n, j);
    Ok(outcome)
}

/// Specular wall bounce: flip the normal velocity component and snap the
/// coordinate exactly onto the wall plane, killing roundoff drift.
pub(crate) fn apply_wall_bounce(p: &mut Particle, wall: WallId, domain: &Domain) {
    let (axis, is_max) = wall_axis_side(wall);
    p.v[axis] = -p.v[axis];
    p.r[axis] = if is_max {
        domain.length(axis) - p.radius
    } else {
        p.radius
    };
}

/// Re-image a particle that crossed a periodic face back into [0, L).
///
/// Roundoff can leave the shifted coordinate a hair outside the cell; it is
/// snapped to the entry face. The min-face snap lands just below L, never at
/// L itself, so an inbound particle cannot re-trigger the same crossing at
/// the same instant.
pub(crate) fn apply_wrap(p: &mut Particle, axis: usize, is_max: bool, domain: &Domain) {
    let l = domain.length(axis);
    if is_max {
        p.r[axis] -= l;
        if p.r[axis] < 0.0 {
            p.r[axis] = 0.0;
        }
    } else {
        p.r[axis] += l;
        if p.r[axis] >= l {
            p.r[axis] = l.next_down();
        }
    }
}

/// Geometric check that a popped core-contact prediction still describes
/// reality: the pair must be approaching and at (or, after perturbation,
/// inside) the contact distance. Overshoot resolves immediately rather
/// than rescheduling, which keeps recovery loop-free.
pub(crate) fn verify_core_contact(geom: &PairGeometry, contact: f64, rtol: f64) -> bool {
    geom.u_n < 0.0 && geom.dist <= contact * (1.0 + rtol)
}

/// Geometric check for a range-crossing prediction, by crossing direction.
pub(crate) fn verify_well_crossing(
    geom: &PairGeometry,
    range: f64,
    crossing: WellCrossing,
    rtol: f64,
) -> bool {
    match crossing {
        WellCrossing::Enter => geom.u_n < 0.0 && geom.dist <= range * (1.0 + rtol),
        WellCrossing::Exit => geom.u_n > 0.0 && geom.dist >= range * (1.0 - rtol),
    }
}
