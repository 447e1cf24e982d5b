//! Event-driven core: particle state, analytic predictions, the per-particle
//! event schedule, and the simulation driver that ties them together.

pub mod boundary;
pub mod event;
pub mod interaction;
pub mod oracle;
pub mod particle;
pub mod queue;
pub mod resolve;
pub mod sim;
pub mod snapshot;

pub use boundary::{BoundaryKind, Domain, WallId};
pub use event::{Event, EventKind, WellCrossing};
pub use interaction::{Interaction, InteractionMap, Topology};
pub use oracle::Approach;
pub use particle::{Particle, ParticleId, ParticleStore, Status, DIM};
pub use sim::{Observer, Outcome, RunLimits, SimParams, SimStats, Simulation};
pub use snapshot::{Snapshot, SnapshotParticle};
