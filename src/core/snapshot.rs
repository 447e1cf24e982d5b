//! Initial-condition input and load-time validation.
//!
//! A [`Snapshot`] is the only way particle state enters the engine. All
//! structural checks happen here, before the first prediction: per-particle
//! invariants, positions inside the domain, core overlaps, and interaction
//! ranges that would break the minimum-image convention.

use crate::core::boundary::Domain;
use crate::core::interaction::{Interaction, InteractionMap};
use crate::core::particle::{Particle, ParticleId, ParticleStore, Status, DIM};
use crate::error::{Error, Result};

/// One particle's initial state. Ids are assigned by load order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotParticle {
    pub r: [f64; DIM],
    pub v: [f64; DIM],
    pub radius: f64,
    pub mass: f64,
    pub status: Status,
}

impl SnapshotParticle {
    /// A moving particle with the given state.
    pub fn dynamic(r: [f64; DIM], v: [f64; DIM], radius: f64, mass: f64) -> Self {
        Self {
            r,
            v,
            radius,
            mass,
            status: Status::Dynamic,
        }
    }

    /// An immobile obstacle at `r`.
    pub fn fixed(r: [f64; DIM], radius: f64, mass: f64) -> Self {
        Self {
            r,
            v: [0.0; DIM],
            radius,
            mass,
            status: Status::Static,
        }
    }
}

/// Complete initial condition: box, particles, interaction laws.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    pub domain: Domain,
    pub particles: Vec<SnapshotParticle>,
    pub interactions: InteractionMap,
}

impl Snapshot {
    /// Empty snapshot over `domain` with a uniform interaction law.
    pub fn new(domain: Domain, default_interaction: Interaction) -> Self {
        Self {
            domain,
            particles: Vec::new(),
            interactions: InteractionMap::uniform(default_interaction),
        }
    }

    /// Append a particle; its id will be the current length.
    pub fn push(&mut self, p: SnapshotParticle) -> ParticleId {
        self.particles.push(p);
        (self.particles.len() - 1) as ParticleId
    }

    /// Validate and convert into the engine's owned state.
    ///
    /// Checks, in order: interaction parameters, per-particle invariants,
    /// containment in the domain, pair ranges against the minimum-image
    /// limit, and hard-core overlaps between interacting pairs.
    pub(crate) fn into_state(self) -> Result<(Domain, ParticleStore, InteractionMap)> {
        self.interactions.validate()?;

        let mut particles = Vec::with_capacity(self.particles.len());
        for (id, rec) in self.particles.iter().enumerate() {
            let p = Particle::new(
                id as ParticleId,
                rec.r,
                rec.v,
                rec.radius,
                rec.mass,
                rec.status,
            )?;
            if !self.domain.admits(&p.r, p.radius) {
                return Err(Error::InvalidParam(format!(
                    "particle {id} at {:?} does not fit inside the domain",
                    p.r
                )));
            }
            particles.push(p);
        }

        let max_range = self.domain.max_pair_range();
        for i in 0..particles.len() {
            for j in (i + 1)..particles.len() {
                let (pi, pj) = (&particles[i], &particles[j]);
                let law = self
                    .interactions
                    .interaction_for(pi.id, pj.id);
                if matches!(law, Interaction::Inert) {
                    continue;
                }
                let contact = pi.radius + pj.radius;
                let range = contact * law.range_factor();
                if range >= max_range {
                    return Err(Error::InvalidParam(format!(
                        "pair ({}, {}) interaction range {range} is ambiguous under \
                         the minimum image (limit {max_range})",
                        pi.id, pj.id
                    )));
                }
                let mut dr = [0.0; DIM];
                for k in 0..DIM {
                    dr[k] = pj.r[k] - pi.r[k];
                }
                self.domain.min_image(&mut dr);
                let sep = dr.iter().map(|c| c * c).sum::<f64>().sqrt();
                if sep < contact {
                    return Err(Error::Overlap {
                        a: pi.id,
                        b: pj.id,
                        separation: sep,
                        contact,
                    });
                }
            }
        }

        Ok((self.domain, ParticleStore::new(particles), self.interactions))
    }
}
