//! Event-driven molecular dynamics for hard-body particle systems.
//!
//! The engine advances a set of spherical particles from event to event:
//! every collision, potential-step crossing, wall bounce, and periodic wrap
//! happens at an analytically computed time, so trajectories are exact up to
//! floating-point roundoff and there is no integration timestep to tune.
//!
//! Supported physics: hard spheres with optional inelastic restitution,
//! square-well attraction (capture, internal bounce, escape), immobile
//! obstacle particles, and per-axis reflecting or periodic boundaries.
//!
//! Typical use builds a [`Snapshot`] describing the initial condition, loads
//! it into a [`Simulation`], and drives it with [`Simulation::run_until`] or
//! [`Simulation::step`]:
//!
//! ```
//! use edmd::core::{Domain, Interaction, Simulation, Snapshot, SnapshotParticle};
//!
//! # fn main() -> edmd::error::Result<()> {
//! let mut snap = Snapshot::new(
//!     Domain::reflecting([10.0, 10.0, 10.0])?,
//!     Interaction::elastic(),
//! );
//! snap.push(SnapshotParticle::dynamic([2.0, 5.0, 5.0], [1.0, 0.0, 0.0], 0.5, 1.0));
//! snap.push(SnapshotParticle::dynamic([8.0, 5.0, 5.0], [-1.0, 0.0, 0.0], 0.5, 1.0));
//! let mut sim = Simulation::from_snapshot(snap)?;
//! sim.run_until(20.0)?;
//! assert!(sim.stats().pair_collisions > 0);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

#[cfg(feature = "python")]
mod python;

pub use crate::core::{
    Domain, Event, EventKind, Interaction, InteractionMap, Observer, Outcome, Particle,
    ParticleId, RunLimits, SimParams, SimStats, Simulation, Snapshot, SnapshotParticle,
};
pub use crate::error::{Error, Result};
