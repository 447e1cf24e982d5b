use crate::core::oracle::EPS_TIME;
use crate::error::{Error, Result};

/// Fixed spatial dimension (3D).
pub const DIM: usize = 3;

/// Stable particle identifier, assigned monotonically at load.
pub type ParticleId = u32;

/// Mobility status of a particle.
///
/// `Static` particles never move: the streaming advancer skips them, they
/// never generate wall or wrap events, and their velocity must be zero. They
/// remain valid collision targets for dynamic particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    Dynamic,
    Static,
}

/// A hard-body particle.
///
/// The stored position is only valid at `local_time`; between events a
/// particle's state is stale-but-valid and is brought current lazily by
/// [`ParticleStore::stream_to`]. `event_count` counts realized events the
/// particle participated in (diagnostics only).
#[derive(Debug, Clone)]
pub struct Particle {
    /// Stable particle identifier.
    pub id: ParticleId,
    /// Position (x, y, z), valid at `local_time`.
    pub r: [f64; DIM],
    /// Velocity (vx, vy, vz).
    pub v: [f64; DIM],
    /// Hard-core radius (> 0).
    pub radius: f64,
    /// Mass (> 0).
    pub mass: f64,
    /// Timestamp to which `r` is currently valid.
    pub local_time: f64,
    /// Mobility status.
    pub status: Status,
    /// Number of realized events this particle participated in.
    pub event_count: u64,
}

impl Particle {
    /// Create a new particle after validating invariants.
    ///
    /// Errors with `Error::InvalidParam` if `radius` or `mass` is
    /// non-positive, any component is NaN/inf, or a static particle carries
    /// a nonzero velocity.
    pub fn new(
        id: ParticleId,
        r: [f64; DIM],
        v: [f64; DIM],
        radius: f64,
        mass: f64,
        status: Status,
    ) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(Error::InvalidParam("radius must be finite and > 0".into()));
        }
        if !mass.is_finite() || mass <= 0.0 {
            return Err(Error::InvalidParam("mass must be finite and > 0".into()));
        }
        if !r.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("position must be finite".into()));
        }
        if !v.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("velocity must be finite".into()));
        }
        if status == Status::Static && v.iter().any(|&x| x != 0.0) {
            return Err(Error::InvalidParam(
                "static particle must have zero velocity".into(),
            ));
        }
        Ok(Self {
            id,
            r,
            v,
            radius,
            mass,
            local_time: 0.0,
            status,
            event_count: 0,
        })
    }

    /// True if the particle moves.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.status == Status::Dynamic
    }

    /// Position at absolute time `t`, computed ballistically from the stored
    /// state without mutating anything. For static particles this is the
    /// stored position regardless of `t`.
    #[inline]
    pub fn position_at(&self, t: f64) -> [f64; DIM] {
        match self.status {
            Status::Static => self.r,
            Status::Dynamic => {
                let dt = t - self.local_time;
                let mut out = self.r;
                for (o, &vk) in out.iter_mut().zip(self.v.iter()) {
                    *o += vk * dt;
                }
                out
            }
        }
    }

    /// Returns the particle's kinetic energy: 1/2 m |v|^2.
    #[inline]
    pub fn kinetic_energy(&self) -> f64 {
        let vsq: f64 = self.v.iter().map(|&c| c * c).sum();
        0.5 * self.mass * vsq
    }

    /// Momentum vector m * v.
    #[inline]
    pub fn momentum(&self) -> [f64; DIM] {
        let mut out = self.v;
        for o in &mut out {
            *o *= self.mass;
        }
        out
    }

    #[inline]
    pub(crate) fn bump_event_count(&mut self) {
        self.event_count = self.event_count.saturating_add(1);
    }
}

/// Exclusive owner of all particle state.
///
/// Populated once at simulation start; particles are never destroyed or
/// reordered afterwards, only mutated in place. Index in the backing vector
/// equals the particle id.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    particles: Vec<Particle>,
}

impl ParticleStore {
    pub fn new(particles: Vec<Particle>) -> Self {
        Self { particles }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    #[inline]
    pub fn get(&self, id: ParticleId) -> &Particle {
        &self.particles[id as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: ParticleId) -> &mut Particle {
        &mut self.particles[id as usize]
    }

    #[inline]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access to all particles. Callers that change positions or
    /// velocities through this must rebuild the simulation's predictions
    /// afterwards; the engine detects missed rebuilds as stale predictions
    /// and recovers, but at the cost of discarded work.
    #[inline]
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Simultaneous mutable access to two distinct particles.
    pub(crate) fn pair_mut(&mut self, a: ParticleId, b: ParticleId) -> (&mut Particle, &mut Particle) {
        let (a, b) = (a as usize, b as usize);
        debug_assert_ne!(a, b);
        if a < b {
            let (lo, hi) = self.particles.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.particles.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    /// Streaming advancer: bring one particle's position up to `target_time`
    /// by free ballistic motion. No-op for static particles. Streaming
    /// backwards in time (beyond tolerance) means the event order broke and
    /// is reported as corruption.
    pub fn stream_to(&mut self, id: ParticleId, target_time: f64) -> Result<()> {
        let p = &mut self.particles[id as usize];
        if p.status == Status::Static {
            return Ok(());
        }
        let dt = target_time - p.local_time;
        if dt < -EPS_TIME {
            return Err(Error::Corrupt {
                clock: p.local_time,
                particles: vec![id],
                detail: format!("streaming backwards to t={target_time}"),
            });
        }
        for (rk, &vk) in p.r.iter_mut().zip(p.v.iter()) {
            *rk += vk * dt;
        }
        p.local_time = target_time;
        Ok(())
    }

    /// Stream every dynamic particle to `target_time`. Idempotent.
    pub fn stream_all_to(&mut self, target_time: f64) -> Result<()> {
        for id in 0..self.particles.len() as ParticleId {
            self.stream_to(id, target_time)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_particle_ok() -> Result<()> {
        let p = Particle::new(
            1,
            [0.0, 1.0, 2.0],
            [2.0, -3.0, 0.5],
            0.5,
            2.0,
            Status::Dynamic,
        )?;
        assert_eq!(p.id, 1);
        assert_eq!(p.r, [0.0, 1.0, 2.0]);
        assert_eq!(p.v, [2.0, -3.0, 0.5]);
        assert_eq!(p.radius, 0.5);
        assert_eq!(p.mass, 2.0);
        assert_eq!(p.local_time, 0.0);
        assert_eq!(p.event_count, 0);
        Ok(())
    }

    #[test]
    fn invalid_radius_rejected() {
        let err = Particle::new(
            0,
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            0.0,
            1.0,
            Status::Dynamic,
        )
        .unwrap_err();
        assert!(err.to_string().contains("radius"));
    }

    #[test]
    fn static_with_velocity_rejected() {
        let err = Particle::new(
            0,
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            1.0,
            1.0,
            Status::Static,
        )
        .unwrap_err();
        assert!(err.to_string().contains("static"));
    }

    #[test]
    fn kinetic_energy_computed() -> Result<()> {
        // v = (3,4,0), |v|^2 = 25; KE = 0.5 * m * 25
        let p = Particle::new(
            7,
            [0.0, 0.0, 0.0],
            [3.0, 4.0, 0.0],
            1.0,
            2.0,
            Status::Dynamic,
        )?;
        assert!((p.kinetic_energy() - 25.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn streaming_applies_ballistic_motion() -> Result<()> {
        let p = Particle::new(
            0,
            [1.0, 1.0, 1.0],
            [2.0, 0.0, 0.0],
            0.1,
            1.0,
            Status::Dynamic,
        )?;
        let mut store = ParticleStore::new(vec![p]);
        store.stream_to(0, 0.75)?;
        let p = store.get(0);
        assert_eq!(p.r, [2.5, 1.0, 1.0]);
        assert_eq!(p.local_time, 0.75);
        // Idempotent at the same target time.
        store.stream_to(0, 0.75)?;
        assert_eq!(store.get(0).r, [2.5, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn streaming_static_is_noop() -> Result<()> {
        let p = Particle::new(
            0,
            [1.0, 1.0, 1.0],
            [0.0, 0.0, 0.0],
            0.1,
            1.0,
            Status::Static,
        )?;
        let mut store = ParticleStore::new(vec![p]);
        store.stream_to(0, 10.0)?;
        let p = store.get(0);
        assert_eq!(p.r, [1.0, 1.0, 1.0]);
        assert_eq!(p.local_time, 0.0);
        Ok(())
    }

    #[test]
    fn streaming_backwards_is_corruption() -> Result<()> {
        let p = Particle::new(
            0,
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            0.1,
            1.0,
            Status::Dynamic,
        )?;
        let mut store = ParticleStore::new(vec![p]);
        store.stream_to(0, 1.0)?;
        let err = store.stream_to(0, 0.5).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
        Ok(())
    }

    #[test]
    fn position_at_is_virtual() -> Result<()> {
        let p = Particle::new(
            0,
            [1.0, 2.0, 3.0],
            [1.0, -1.0, 0.0],
            0.1,
            1.0,
            Status::Dynamic,
        )?;
        assert_eq!(p.position_at(2.0), [3.0, 0.0, 3.0]);
        assert_eq!(p.r, [1.0, 2.0, 3.0], "position_at must not mutate");
        Ok(())
    }
}
