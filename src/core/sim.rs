//! The event-driven simulation driver.
//!
//! A [`Simulation`] owns the particle store, the interaction map, and the
//! per-particle event schedule, and advances the system event to event. The
//! cycle is: pop the earliest scheduled event, confirm geometrically that
//! the prediction still matches reality, stream the participants to the
//! event time, apply the velocity update, then repredict everyone whose
//! best-known event was invalidated. Predictions that fail confirmation are
//! discarded and recomputed; they never corrupt state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::boundary::{wall_axis_side, wall_id, BoundaryKind, Domain, WallId};
use crate::core::event::{Event, EventKind, WellCrossing};
use crate::core::interaction::{Interaction, InteractionMap};
use crate::core::oracle::{
    contact_time, dot, escape_time, wall_crossing, wrap_crossing, Approach, EPS_TIME,
};
use crate::core::particle::{ParticleId, ParticleStore, DIM};
use crate::core::queue::EventQueue;
use crate::core::resolve::{
    apply_core_bounce, apply_wall_bounce, apply_well_crossing, apply_wrap, pair_geometry,
    verify_core_contact, verify_well_crossing, WellOutcome,
};
use crate::core::snapshot::{Snapshot, SnapshotParticle};
use crate::error::{Error, Result};

/// Attempts per particle before random placement gives up.
const PLACEMENT_ATTEMPTS: usize = 10_000;

/// Numerical tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimParams {
    /// Predicted delays at or below this resolve at the current clock
    /// instead of being scheduled, so contact roundoff cannot schedule an
    /// event microscopically in the past.
    pub immediate_tolerance: f64,
    /// Relative tolerance of the geometric checks that confirm a popped
    /// prediction before it is applied.
    pub verify_rtol: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            immediate_tolerance: 1e-9,
            verify_rtol: 1e-9,
        }
    }
}

impl SimParams {
    pub fn validate(&self) -> Result<()> {
        if !self.immediate_tolerance.is_finite() || self.immediate_tolerance < 0.0 {
            return Err(Error::InvalidParam(
                "immediate_tolerance must be finite and >= 0".into(),
            ));
        }
        if !self.verify_rtol.is_finite() || self.verify_rtol < 0.0 {
            return Err(Error::InvalidParam(
                "verify_rtol must be finite and >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Counters kept by the driver. `events` counts realized events only;
/// discarded predictions land in `stale_discarded`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimStats {
    pub events: u64,
    pub pair_collisions: u64,
    pub well_entries: u64,
    pub well_escapes: u64,
    pub well_reflections: u64,
    pub wall_bounces: u64,
    pub wraps: u64,
    pub stale_discarded: u64,
    pub repredictions: u64,
}

/// Stop conditions for [`Simulation::run_with`]. Absent limits never stop
/// the run; the queue draining does. The `stop` flag is checked between
/// cycles only, so a request from another thread lands on the next event
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    pub until_time: Option<f64>,
    pub max_events: Option<u64>,
    pub stop: Option<Arc<AtomicBool>>,
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// The clock reached the requested time; every particle is streamed
    /// to it.
    ReachedTime(f64),
    /// The event budget was spent.
    EventLimit(u64),
    /// The external stop flag was raised.
    Stopped,
    /// No events are scheduled and no target time was given.
    Exhausted,
}

/// Read-only view of a realized event, handed to observers.
pub struct CycleView<'a> {
    pub time: f64,
    pub kind: &'a EventKind,
    pub stats: &'a SimStats,
}

/// Callback invoked after every realized event.
pub trait Observer {
    fn on_event(&mut self, view: CycleView<'_>);
}

struct NoopObserver;

impl Observer for NoopObserver {
    fn on_event(&mut self, _view: CycleView<'_>) {}
}

enum Cycle {
    Applied(Event),
    Stale,
    Idle,
}

#[inline]
fn ordered_pair(a: ParticleId, b: ParticleId) -> (ParticleId, ParticleId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[inline]
fn consider(best: &mut Option<Event>, time: f64, kind: EventKind) {
    if let Some(e) = Event::new(time, kind) {
        if best.map_or(true, |b| e < b) {
            *best = Some(e);
        }
    }
}

/// An event-driven hard-body simulation.
#[derive(Debug, Clone)]
pub struct Simulation {
    domain: Domain,
    store: ParticleStore,
    interactions: InteractionMap,
    queue: EventQueue,
    clock: f64,
    captured: HashSet<(ParticleId, ParticleId)>,
    params: SimParams,
    stats: SimStats,
}

impl Simulation {
    /// Load a validated snapshot with default parameters.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        Self::with_params(snapshot, SimParams::default())
    }

    /// Load a validated snapshot with explicit parameters.
    pub fn with_params(snapshot: Snapshot, params: SimParams) -> Result<Self> {
        params.validate()?;
        let (domain, store, interactions) = snapshot.into_state()?;
        let n = store.len();
        let mut sim = Self {
            domain,
            store,
            interactions,
            queue: EventQueue::new(n),
            clock: 0.0,
            captured: HashSet::new(),
            params,
            stats: SimStats::default(),
        };
        sim.captured = sim.detect_captured();
        for id in 0..n as ParticleId {
            sim.repredict(id);
        }
        tracing::info!(
            particles = n,
            scheduled = sim.queue.scheduled(),
            "simulation initialized"
        );
        Ok(sim)
    }

    /// Build an elastic gas of `n` equal spheres at random non-overlapping
    /// positions with isotropic velocities of magnitude `speed`.
    /// Deterministic for a fixed seed.
    pub fn random_gas(
        domain: Domain,
        n: usize,
        radius: f64,
        mass: f64,
        speed: f64,
        seed: u64,
    ) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(Error::InvalidParam("radius must be finite and > 0".into()));
        }
        if !speed.is_finite() || speed < 0.0 {
            return Err(Error::InvalidParam("speed must be finite and >= 0".into()));
        }
        for axis in 0..DIM {
            if domain.kind(axis) == BoundaryKind::Reflecting
                && 2.0 * radius >= domain.length(axis)
            {
                return Err(Error::InvalidParam(format!(
                    "radius {radius} does not fit between the walls on axis {axis}"
                )));
            }
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut snap = Snapshot::new(domain.clone(), Interaction::elastic());
        for i in 0..n {
            let mut placed = false;
            'attempts: for _ in 0..PLACEMENT_ATTEMPTS {
                let mut r = [0.0; DIM];
                for k in 0..DIM {
                    let l = domain.length(k);
                    r[k] = match domain.kind(k) {
                        BoundaryKind::Reflecting => rng.random_range(radius..(l - radius)),
                        BoundaryKind::Periodic => rng.random_range(0.0..l),
                    };
                }
                for other in &snap.particles {
                    let mut dr = [0.0; DIM];
                    for k in 0..DIM {
                        dr[k] = other.r[k] - r[k];
                    }
                    domain.min_image(&mut dr);
                    if dot(&dr, &dr).sqrt() < 2.0 * radius * (1.0 + 1e-9) {
                        continue 'attempts;
                    }
                }
                let v = random_unit(&mut rng).map(|c| c * speed);
                snap.push(SnapshotParticle::dynamic(r, v, radius, mass));
                placed = true;
                break;
            }
            if !placed {
                return Err(Error::InvalidParam(format!(
                    "failed to place particle {i}: packing too dense"
                )));
            }
        }
        Self::from_snapshot(snap)
    }

    #[inline]
    pub fn clock(&self) -> f64 {
        self.clock
    }

    #[inline]
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    #[inline]
    pub fn params(&self) -> &SimParams {
        &self.params
    }

    #[inline]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    #[inline]
    pub fn interactions(&self) -> &InteractionMap {
        &self.interactions
    }

    #[inline]
    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    /// Mutable particle access for external perturbation. Call
    /// [`Simulation::rebuild`] afterwards; without it the engine still
    /// recovers by discarding predictions as they surface, at the cost of
    /// wasted work.
    #[inline]
    pub fn store_mut(&mut self) -> &mut ParticleStore {
        &mut self.store
    }

    /// True if the pair currently sits inside a square well.
    pub fn is_captured(&self, a: ParticleId, b: ParticleId) -> bool {
        self.captured.contains(&ordered_pair(a, b))
    }

    /// Number of particles with a scheduled event.
    pub fn scheduled_events(&self) -> usize {
        self.queue.scheduled()
    }

    /// Total kinetic energy at the current instant.
    pub fn kinetic_energy(&self) -> f64 {
        self.store
            .particles()
            .iter()
            .map(|p| p.kinetic_energy())
            .sum()
    }

    /// Total momentum vector.
    pub fn momentum(&self) -> [f64; DIM] {
        let mut out = [0.0; DIM];
        for p in self.store.particles() {
            let m = p.momentum();
            for k in 0..DIM {
                out[k] += m[k];
            }
        }
        out
    }

    /// Kinetic temperature of the dynamic particles, 2 KE / (D N), with
    /// the Boltzmann constant set to one. Zero for an all-static system.
    pub fn temperature(&self) -> f64 {
        let n = self
            .store
            .particles()
            .iter()
            .filter(|p| p.is_dynamic())
            .count();
        if n == 0 {
            return 0.0;
        }
        2.0 * self.kinetic_energy() / (DIM as f64 * n as f64)
    }

    /// Export the current state, with every position evaluated at the
    /// clock. The result round-trips through [`Simulation::from_snapshot`].
    pub fn snapshot(&self) -> Snapshot {
        let particles = self
            .store
            .particles()
            .iter()
            .map(|p| SnapshotParticle {
                r: p.position_at(self.clock),
                v: p.v,
                radius: p.radius,
                mass: p.mass,
                status: p.status,
            })
            .collect();
        Snapshot {
            domain: self.domain.clone(),
            particles,
            interactions: self.interactions.clone(),
        }
    }

    /// Advance by exactly one realized event. Stale predictions are
    /// discarded along the way. `None` when nothing is scheduled.
    pub fn step(&mut self) -> Result<Option<Event>> {
        loop {
            match self.cycle()? {
                Cycle::Applied(e) => return Ok(Some(e)),
                Cycle::Stale => continue,
                Cycle::Idle => return Ok(None),
            }
        }
    }

    /// Run until the clock reaches `t_end`, then stream every particle to
    /// it.
    pub fn run_until(&mut self, t_end: f64) -> Result<Outcome> {
        self.run_with(
            RunLimits {
                until_time: Some(t_end),
                ..RunLimits::default()
            },
            &mut NoopObserver,
        )
    }

    /// Run for at most `n` realized events.
    pub fn run_events(&mut self, n: u64) -> Result<Outcome> {
        self.run_with(
            RunLimits {
                max_events: Some(n),
                ..RunLimits::default()
            },
            &mut NoopObserver,
        )
    }

    /// Run under the given stop conditions, reporting every realized event
    /// to `observer`.
    pub fn run_with(&mut self, limits: RunLimits, observer: &mut dyn Observer) -> Result<Outcome> {
        if let Some(t_end) = limits.until_time {
            if !t_end.is_finite() || t_end < self.clock - EPS_TIME {
                return Err(Error::InvalidParam(format!(
                    "target time {t_end} must be finite and not before the clock ({})",
                    self.clock
                )));
            }
        }
        let mut applied: u64 = 0;
        loop {
            if let Some(flag) = &limits.stop {
                if flag.load(Ordering::Relaxed) {
                    return Ok(Outcome::Stopped);
                }
            }
            if let Some(max) = limits.max_events {
                if applied >= max {
                    return Ok(Outcome::EventLimit(applied));
                }
            }
            let next = self.queue.peek_min();
            if let Some(t_end) = limits.until_time {
                let beyond = match next {
                    None => true,
                    Some(e) => e.time() > t_end,
                };
                if beyond {
                    let t = t_end.max(self.clock);
                    self.advance_clock_to(t)?;
                    return Ok(Outcome::ReachedTime(t));
                }
            } else if next.is_none() {
                return Ok(Outcome::Exhausted);
            }
            match self.cycle()? {
                Cycle::Applied(e) => {
                    applied += 1;
                    observer.on_event(CycleView {
                        time: e.time(),
                        kind: &e.kind,
                        stats: &self.stats,
                    });
                }
                Cycle::Stale | Cycle::Idle => {}
            }
        }
    }

    /// Bring every particle to the current clock. Idempotent; never
    /// changes the event schedule.
    pub fn synchronize(&mut self) -> Result<()> {
        self.store.stream_all_to(self.clock)
    }

    /// Re-derive the captured-pair set and every prediction from current
    /// particle state. Required after external edits through
    /// [`Simulation::store_mut`].
    pub fn rebuild(&mut self) -> Result<()> {
        self.synchronize()?;
        self.captured = self.detect_captured();
        self.queue.clear();
        for id in 0..self.store.len() as ParticleId {
            self.repredict(id);
        }
        tracing::debug!(
            clock = self.clock,
            scheduled = self.queue.scheduled(),
            "rebuilt predictions"
        );
        Ok(())
    }

    /// Consistency check over the whole engine: scheduled times never
    /// precede the clock, local times never exceed it, and no interacting
    /// pair overlaps at the current instant.
    pub fn audit(&self) -> Result<()> {
        for (id, e) in self.queue.iter_scheduled() {
            if e.time() < self.clock - EPS_TIME {
                return Err(Error::Corrupt {
                    clock: self.clock,
                    particles: vec![id],
                    detail: format!("scheduled event at t={} is behind the clock", e.time()),
                });
            }
        }
        for p in self.store.particles() {
            if p.local_time > self.clock + EPS_TIME {
                return Err(Error::Corrupt {
                    clock: self.clock,
                    particles: vec![p.id],
                    detail: format!("local time {} is ahead of the clock", p.local_time),
                });
            }
        }
        let ps = self.store.particles();
        for i in 0..ps.len() {
            for j in (i + 1)..ps.len() {
                let (pi, pj) = (&ps[i], &ps[j]);
                if matches!(
                    self.interactions.interaction_for(pi.id, pj.id),
                    Interaction::Inert
                ) {
                    continue;
                }
                let (ri, rj) = (pi.position_at(self.clock), pj.position_at(self.clock));
                let mut dr = [0.0; DIM];
                for k in 0..DIM {
                    dr[k] = rj[k] - ri[k];
                }
                self.domain.min_image(&mut dr);
                let sep = dot(&dr, &dr).sqrt();
                let contact = pi.radius + pj.radius;
                if sep < contact * (1.0 - 1e-9) {
                    return Err(Error::Corrupt {
                        clock: self.clock,
                        particles: vec![pi.id, pj.id],
                        detail: format!("core overlap: separation {sep} < contact {contact}"),
                    });
                }
            }
        }
        Ok(())
    }

    fn advance_clock_to(&mut self, t: f64) -> Result<()> {
        self.clock = t;
        self.store.stream_all_to(t)
    }

    fn detect_captured(&self) -> HashSet<(ParticleId, ParticleId)> {
        let mut captured = HashSet::new();
        let ps = self.store.particles();
        for i in 0..ps.len() {
            for j in (i + 1)..ps.len() {
                let (pi, pj) = (&ps[i], &ps[j]);
                if let Interaction::SquareWell { lambda, .. } =
                    *self.interactions.interaction_for(pi.id, pj.id)
                {
                    let (ri, rj) = (pi.position_at(self.clock), pj.position_at(self.clock));
                    let mut dr = [0.0; DIM];
                    for k in 0..DIM {
                        dr[k] = rj[k] - ri[k];
                    }
                    self.domain.min_image(&mut dr);
                    let range = (pi.radius + pj.radius) * lambda;
                    if dot(&dr, &dr) < range * range {
                        captured.insert((pi.id, pj.id));
                    }
                }
            }
        }
        captured
    }

    /// Compute the particle's earliest possible event from current state.
    /// Scans every interacting partner plus the boundaries on each axis.
    fn best_event_for(&self, id: ParticleId) -> Option<Event> {
        let p = self.store.get(id);
        if !p.is_dynamic() {
            return None;
        }
        let now = self.clock;
        let rp = p.position_at(now);
        let mut best = None;

        for q in self.store.particles() {
            if q.id == id {
                continue;
            }
            let law = *self.interactions.interaction_for(id, q.id);
            if matches!(law, Interaction::Inert) {
                continue;
            }
            let rq = q.position_at(now);
            let mut dr = [0.0; DIM];
            let mut dv = [0.0; DIM];
            for k in 0..DIM {
                dr[k] = rq[k] - rp[k];
                dv[k] = q.v[k] - p.v[k];
            }
            self.domain.min_image(&mut dr);
            let contact = p.radius + q.radius;
            let (a, b) = ordered_pair(id, q.id);
            match law {
                Interaction::HardSphere { .. } => {
                    match contact_time(&dr, &dv, contact, self.params.immediate_tolerance) {
                        Approach::After(dt) => {
                            consider(&mut best, now + dt, EventKind::Pair { a, b });
                        }
                        Approach::Immediate => consider(&mut best, now, EventKind::Pair { a, b }),
                        Approach::Never => {}
                    }
                }
                Interaction::SquareWell { lambda, .. } => {
                    let range = contact * lambda;
                    if self.captured.contains(&(a, b)) {
                        match contact_time(&dr, &dv, contact, self.params.immediate_tolerance) {
                            Approach::After(dt) => {
                                consider(&mut best, now + dt, EventKind::Pair { a, b });
                            }
                            Approach::Immediate => {
                                consider(&mut best, now, EventKind::Pair { a, b });
                            }
                            Approach::Never => {}
                        }
                        if let Some(dt) = escape_time(&dr, &dv, range) {
                            consider(
                                &mut best,
                                now + dt,
                                EventKind::RangeChange {
                                    a,
                                    b,
                                    crossing: WellCrossing::Exit,
                                },
                            );
                        }
                    } else {
                        match contact_time(&dr, &dv, range, self.params.immediate_tolerance) {
                            Approach::After(dt) => consider(
                                &mut best,
                                now + dt,
                                EventKind::RangeChange {
                                    a,
                                    b,
                                    crossing: WellCrossing::Enter,
                                },
                            ),
                            Approach::Immediate => consider(
                                &mut best,
                                now,
                                EventKind::RangeChange {
                                    a,
                                    b,
                                    crossing: WellCrossing::Enter,
                                },
                            ),
                            Approach::Never => {}
                        }
                    }
                }
                Interaction::Inert => {}
            }
        }

        for axis in 0..DIM {
            let l = self.domain.length(axis);
            match self.domain.kind(axis) {
                BoundaryKind::Reflecting => {
                    if let Some((dt, is_max)) = wall_crossing(rp[axis], p.v[axis], p.radius, l) {
                        consider(
                            &mut best,
                            now + dt.max(0.0),
                            EventKind::Wall {
                                id,
                                wall: wall_id(axis, is_max),
                            },
                        );
                    }
                }
                BoundaryKind::Periodic => {
                    if let Some((dt, is_max)) = wrap_crossing(rp[axis], p.v[axis], l) {
                        consider(&mut best, now + dt, EventKind::Wrap { id, axis, is_max });
                    }
                }
            }
        }

        best
    }

    fn repredict(&mut self, id: ParticleId) {
        self.stats.repredictions += 1;
        match self.best_event_for(id) {
            Some(e) => self.queue.assign(id, e),
            None => self.queue.unassign(id),
        }
    }

    /// Invalidate and repredict everyone the resolution touched: the
    /// participants, plus every particle whose scheduled event referenced
    /// them.
    fn after_resolution(&mut self, a: ParticleId, b: Option<ParticleId>) {
        let mut affected = vec![a];
        if let Some(b) = b {
            affected.push(b);
        }
        for (id, e) in self.queue.iter_scheduled() {
            let hit = e.kind.involves(a) || b.is_some_and(|b| e.kind.involves(b));
            if hit && !affected.contains(&id) {
                affected.push(id);
            }
        }
        self.queue.invalidate(a);
        if let Some(b) = b {
            self.queue.invalidate(b);
        }
        for id in affected {
            self.repredict(id);
        }
    }

    fn discard_stale(&mut self, owner: ParticleId, event: &Event) -> Result<Cycle> {
        self.stats.stale_discarded += 1;
        tracing::debug!(
            time = event.time(),
            kind = ?event.kind,
            "discarded stale prediction"
        );
        self.repredict(owner);
        Ok(Cycle::Stale)
    }

    fn cycle(&mut self) -> Result<Cycle> {
        let Some((owner, event)) = self.queue.pop_min() else {
            return Ok(Cycle::Idle);
        };
        let t = event.time();
        if t < self.clock - EPS_TIME {
            let (a, b) = event.kind.participants();
            let mut particles = vec![a];
            if let Some(b) = b {
                particles.push(b);
            }
            tracing::error!(
                clock = self.clock,
                time = t,
                ?particles,
                "event scheduled behind the clock, halting"
            );
            return Err(Error::Corrupt {
                clock: self.clock,
                particles,
                detail: format!("scheduled event at t={t} is earlier than the clock"),
            });
        }
        let out = match event.kind {
            EventKind::Pair { a, b } => self.resolve_pair(owner, event, a, b),
            EventKind::RangeChange { a, b, crossing } => {
                self.resolve_range_change(owner, event, a, b, crossing)
            }
            EventKind::Wall { id, wall } => self.resolve_wall(owner, event, id, wall),
            EventKind::Wrap { id, axis, is_max } => {
                self.resolve_wrap(owner, event, id, axis, is_max)
            }
        }?;
        if let Cycle::Applied(e) = &out {
            tracing::trace!(time = e.time(), kind = ?e.kind, "resolved event");
        }
        Ok(out)
    }

    fn resolve_pair(
        &mut self,
        owner: ParticleId,
        event: Event,
        a: ParticleId,
        b: ParticleId,
    ) -> Result<Cycle> {
        let t = event.time();
        let law = *self.interactions.interaction_for(a, b);
        let (pa, pb) = (self.store.get(a), self.store.get(b));
        let contact = pa.radius + pb.radius;
        let geom = pair_geometry(pa, pb, &self.domain, t)?;
        if !verify_core_contact(&geom, contact, self.params.verify_rtol) {
            return self.discard_stale(owner, &event);
        }
        self.store.stream_to(a, t)?;
        self.store.stream_to(b, t)?;
        let restitution = match law {
            Interaction::HardSphere { restitution } => restitution,
            _ => 1.0,
        };
        let (pa, pb) = self.store.pair_mut(a, b);
        apply_core_bounce(pa, pb, &geom, restitution)?;
        pa.bump_event_count();
        pb.bump_event_count();
        self.clock = t;
        self.stats.events += 1;
        self.stats.pair_collisions += 1;
        self.after_resolution(a, Some(b));
        Ok(Cycle::Applied(event))
    }

    fn resolve_range_change(
        &mut self,
        owner: ParticleId,
        event: Event,
        a: ParticleId,
        b: ParticleId,
        crossing: WellCrossing,
    ) -> Result<Cycle> {
        let t = event.time();
        let Interaction::SquareWell { lambda, depth } = *self.interactions.interaction_for(a, b)
        else {
            return self.discard_stale(owner, &event);
        };
        let key = ordered_pair(a, b);
        let direction_ok = match crossing {
            WellCrossing::Enter => !self.captured.contains(&key),
            WellCrossing::Exit => self.captured.contains(&key),
        };
        let (pa, pb) = (self.store.get(a), self.store.get(b));
        let range = (pa.radius + pb.radius) * lambda;
        let geom = pair_geometry(pa, pb, &self.domain, t)?;
        if !direction_ok || !verify_well_crossing(&geom, range, crossing, self.params.verify_rtol)
        {
            return self.discard_stale(owner, &event);
        }
        self.store.stream_to(a, t)?;
        self.store.stream_to(b, t)?;
        let (pa, pb) = self.store.pair_mut(a, b);
        let outcome = apply_well_crossing(pa, pb, &geom, depth, crossing)?;
        pa.bump_event_count();
        pb.bump_event_count();
        match outcome {
            WellOutcome::Entered => {
                self.captured.insert(key);
                self.stats.well_entries += 1;
            }
            WellOutcome::Escaped => {
                self.captured.remove(&key);
                self.stats.well_escapes += 1;
            }
            WellOutcome::Reflected => {
                self.stats.well_reflections += 1;
            }
        }
        self.clock = t;
        self.stats.events += 1;
        self.after_resolution(a, Some(b));
        Ok(Cycle::Applied(event))
    }

    fn resolve_wall(
        &mut self,
        owner: ParticleId,
        event: Event,
        id: ParticleId,
        wall: WallId,
    ) -> Result<Cycle> {
        let t = event.time();
        let (axis, is_max) = wall_axis_side(wall);
        let l = self.domain.length(axis);
        let p = self.store.get(id);
        let x = p.position_at(t)[axis];
        let tol = l * self.params.verify_rtol;
        let ok = if is_max {
            p.v[axis] > 0.0 && x >= l - p.radius - tol
        } else {
            p.v[axis] < 0.0 && x <= p.radius + tol
        };
        if !ok {
            return self.discard_stale(owner, &event);
        }
        self.store.stream_to(id, t)?;
        apply_wall_bounce(self.store.get_mut(id), wall, &self.domain);
        self.store.get_mut(id).bump_event_count();
        self.clock = t;
        self.stats.events += 1;
        self.stats.wall_bounces += 1;
        self.after_resolution(id, None);
        Ok(Cycle::Applied(event))
    }

    fn resolve_wrap(
        &mut self,
        owner: ParticleId,
        event: Event,
        id: ParticleId,
        axis: usize,
        is_max: bool,
    ) -> Result<Cycle> {
        let t = event.time();
        let l = self.domain.length(axis);
        let p = self.store.get(id);
        let x = p.position_at(t)[axis];
        let tol = l * self.params.verify_rtol;
        let ok = if is_max {
            p.v[axis] > 0.0 && x >= l - tol
        } else {
            p.v[axis] < 0.0 && x <= tol
        };
        if !ok {
            return self.discard_stale(owner, &event);
        }
        self.store.stream_to(id, t)?;
        apply_wrap(self.store.get_mut(id), axis, is_max, &self.domain);
        self.store.get_mut(id).bump_event_count();
        self.clock = t;
        self.stats.events += 1;
        self.stats.wraps += 1;
        self.after_resolution(id, None);
        Ok(Cycle::Applied(event))
    }
}

fn random_unit(rng: &mut StdRng) -> [f64; DIM] {
    // Rejection-sample from the unit ball to stay isotropic.
    loop {
        let mut u = [0.0; DIM];
        for c in &mut u {
            *c = rng.random_range(-1.0..1.0);
        }
        let n2 = dot(&u, &u);
        if n2 > 1e-6 && n2 <= 1.0 {
            let inv = 1.0 / n2.sqrt();
            for c in &mut u {
                *c *= inv;
            }
            return u;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_on() -> Simulation {
        let mut s = Snapshot::new(
            Domain::reflecting([20.0, 20.0, 20.0]).unwrap(),
            Interaction::elastic(),
        );
        s.push(SnapshotParticle::dynamic(
            [5.0, 10.0, 10.0],
            [0.5, 0.0, 0.0],
            0.5,
            1.0,
        ));
        s.push(SnapshotParticle::dynamic(
            [10.0, 10.0, 10.0],
            [-0.5, 0.0, 0.0],
            0.5,
            1.0,
        ));
        Simulation::from_snapshot(s).unwrap()
    }

    #[test]
    fn head_on_pair_collides_at_four() -> Result<()> {
        let mut sim = head_on();
        let e = sim.step()?.unwrap();
        assert!((e.time() - 4.0).abs() < 1e-9, "got t={}", e.time());
        assert!(matches!(e.kind, EventKind::Pair { a: 0, b: 1 }));
        assert!((sim.store().get(0).v[0] - (-0.5)).abs() < 1e-12);
        assert!((sim.store().get(1).v[0] - 0.5).abs() < 1e-12);
        assert_eq!(sim.stats().pair_collisions, 1);
        assert_eq!(sim.store().get(0).event_count, 1);
        Ok(())
    }

    #[test]
    fn run_until_reaches_and_synchronizes() -> Result<()> {
        let mut sim = head_on();
        let out = sim.run_until(10.0)?;
        assert_eq!(out, Outcome::ReachedTime(10.0));
        assert_eq!(sim.clock(), 10.0);
        for p in sim.store().particles() {
            assert_eq!(p.local_time, 10.0);
        }
        // Swapped at t=4, then 6 more units of drift apart.
        assert!((sim.store().get(0).r[0] - 4.0).abs() < 1e-9);
        assert!((sim.store().get(1).r[0] - 11.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn synchronize_is_idempotent() -> Result<()> {
        let mut sim = head_on();
        sim.run_events(1)?;
        sim.synchronize()?;
        let before: Vec<[f64; DIM]> = sim.store().particles().iter().map(|p| p.r).collect();
        sim.synchronize()?;
        let after: Vec<[f64; DIM]> = sim.store().particles().iter().map(|p| p.r).collect();
        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn perturbed_velocity_recovers_via_stale_discard() -> Result<()> {
        let mut sim = head_on();
        // Turn particle 1 around behind the engine's back; the scheduled
        // pair collision no longer happens.
        sim.store_mut().get_mut(1).v = [0.5, 0.0, 0.0];
        let out = sim.run_until(6.0)?;
        assert_eq!(out, Outcome::ReachedTime(6.0));
        assert!(sim.stats().stale_discarded >= 1);
        assert_eq!(sim.stats().pair_collisions, 0);
        sim.audit()?;
        Ok(())
    }

    #[test]
    fn wall_bounce_reflects_and_snaps() -> Result<()> {
        let mut s = Snapshot::new(
            Domain::reflecting([10.0, 10.0, 10.0]).unwrap(),
            Interaction::elastic(),
        );
        s.push(SnapshotParticle::dynamic(
            [1.0, 5.0, 5.0],
            [-1.0, 0.0, 0.0],
            0.5,
            1.0,
        ));
        let mut sim = Simulation::from_snapshot(s)?;
        let ke0 = sim.kinetic_energy();
        let e = sim.step()?.unwrap();
        assert!((e.time() - 0.5).abs() < 1e-12);
        assert!(matches!(e.kind, EventKind::Wall { id: 0, .. }));
        let p = sim.store().get(0);
        assert_eq!(p.v[0], 1.0);
        assert_eq!(p.r[0], 0.5);
        assert!((sim.kinetic_energy() - ke0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn wrap_reimages_and_motion_continues() -> Result<()> {
        let mut s = Snapshot::new(
            Domain::periodic([10.0, 10.0, 10.0]).unwrap(),
            Interaction::elastic(),
        );
        s.push(SnapshotParticle::dynamic(
            [9.0, 5.0, 5.0],
            [1.0, 0.0, 0.0],
            0.5,
            1.0,
        ));
        let mut sim = Simulation::from_snapshot(s)?;
        let e = sim.step()?.unwrap();
        assert!((e.time() - 1.0).abs() < 1e-12);
        assert!(matches!(
            e.kind,
            EventKind::Wrap {
                id: 0,
                axis: 0,
                is_max: true
            }
        ));
        assert_eq!(sim.store().get(0).r[0], 0.0);
        sim.run_until(2.0)?;
        assert!((sim.store().get(0).r[0] - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn dynamic_particle_bounces_off_static_obstacle() -> Result<()> {
        let mut s = Snapshot::new(
            Domain::reflecting([20.0, 20.0, 20.0]).unwrap(),
            Interaction::elastic(),
        );
        s.push(SnapshotParticle::dynamic(
            [5.0, 10.0, 10.0],
            [1.0, 0.0, 0.0],
            0.5,
            1.0,
        ));
        s.push(SnapshotParticle::fixed([10.0, 10.0, 10.0], 0.5, 1.0));
        let mut sim = Simulation::from_snapshot(s)?;
        let e = sim.step()?.unwrap();
        assert!((e.time() - 4.0).abs() < 1e-9);
        assert!((sim.store().get(0).v[0] - (-1.0)).abs() < 1e-12);
        let obstacle = sim.store().get(1);
        assert_eq!(obstacle.v, [0.0, 0.0, 0.0]);
        assert_eq!(obstacle.r, [10.0, 10.0, 10.0]);
        Ok(())
    }

    #[test]
    fn square_well_capture_bounce_and_escape() -> Result<()> {
        let mut s = Snapshot::new(
            Domain::reflecting([20.0, 20.0, 20.0]).unwrap(),
            Interaction::SquareWell {
                lambda: 1.5,
                depth: 0.5,
            },
        );
        s.push(SnapshotParticle::dynamic(
            [8.0, 10.0, 10.0],
            [0.25, 0.0, 0.0],
            0.5,
            1.0,
        ));
        s.push(SnapshotParticle::dynamic(
            [12.0, 10.0, 10.0],
            [-0.25, 0.0, 0.0],
            0.5,
            1.0,
        ));
        let mut sim = Simulation::from_snapshot(s)?;
        let ke0 = sim.kinetic_energy();

        // Separation 4 closes at 0.5; the outer range 1.5 is hit at t=5.
        let e = sim.step()?.unwrap();
        assert!((e.time() - 5.0).abs() < 1e-9);
        assert!(matches!(
            e.kind,
            EventKind::RangeChange {
                crossing: WellCrossing::Enter,
                ..
            }
        ));
        assert!(sim.is_captured(0, 1));
        assert!((sim.kinetic_energy() - (ke0 + 0.5)).abs() < 1e-9);

        let e = sim.step()?.unwrap();
        assert!(matches!(e.kind, EventKind::Pair { .. }));
        assert!((sim.kinetic_energy() - (ke0 + 0.5)).abs() < 1e-9);

        let e = sim.step()?.unwrap();
        assert!(matches!(
            e.kind,
            EventKind::RangeChange {
                crossing: WellCrossing::Exit,
                ..
            }
        ));
        assert!(!sim.is_captured(0, 1));
        assert!((sim.kinetic_energy() - ke0).abs() < 1e-9);
        assert_eq!(sim.stats().well_escapes, 1);
        Ok(())
    }

    #[test]
    fn elastic_gas_conserves_energy_and_momentum() -> Result<()> {
        let mut sim = Simulation::random_gas(
            Domain::periodic([10.0, 10.0, 10.0])?,
            20,
            0.3,
            1.0,
            1.0,
            7,
        )?;
        let ke0 = sim.kinetic_energy();
        let p0 = sim.momentum();
        sim.run_events(300)?;
        let ke1 = sim.kinetic_energy();
        let p1 = sim.momentum();
        assert!(
            ((ke1 - ke0) / ke0).abs() < 1e-9,
            "energy drifted: {ke0} -> {ke1}"
        );
        for k in 0..DIM {
            assert!(
                (p1[k] - p0[k]).abs() < 1e-9,
                "momentum[{k}] drifted: {} -> {}",
                p0[k],
                p1[k]
            );
        }
        Ok(())
    }

    #[test]
    fn audit_passes_during_a_run() -> Result<()> {
        let mut sim = Simulation::random_gas(
            Domain::reflecting([12.0, 12.0, 12.0])?,
            24,
            0.4,
            1.0,
            1.5,
            42,
        )?;
        for _ in 0..50 {
            assert!(sim.step()?.is_some());
            sim.audit()?;
        }
        assert_eq!(sim.stats().events, 50);
        Ok(())
    }

    #[test]
    fn run_until_rejects_past_targets() {
        let mut sim = head_on();
        sim.run_until(5.0).unwrap();
        let err = sim.run_until(1.0).unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));
    }

    #[test]
    fn observer_sees_every_realized_event() -> Result<()> {
        struct Count(u64);
        impl Observer for Count {
            fn on_event(&mut self, view: CycleView<'_>) {
                self.0 += 1;
                assert_eq!(view.stats.events, self.0);
            }
        }
        let mut sim = head_on();
        let mut count = Count(0);
        sim.run_with(
            RunLimits {
                until_time: Some(10.0),
                ..RunLimits::default()
            },
            &mut count,
        )?;
        assert_eq!(count.0, sim.stats().events);
        assert!(count.0 >= 1);
        Ok(())
    }

    #[test]
    fn raised_stop_flag_halts_before_any_event() -> Result<()> {
        let mut sim = head_on();
        let flag = Arc::new(AtomicBool::new(true));
        let out = sim.run_with(
            RunLimits {
                until_time: Some(100.0),
                stop: Some(flag),
                ..RunLimits::default()
            },
            &mut NoopObserver,
        )?;
        assert_eq!(out, Outcome::Stopped);
        assert_eq!(sim.stats().events, 0);
        assert_eq!(sim.clock(), 0.0, "the clock must not move past the flag");
        Ok(())
    }

    #[test]
    fn invalid_params_rejected() {
        let s = Snapshot::new(
            Domain::reflecting([10.0, 10.0, 10.0]).unwrap(),
            Interaction::elastic(),
        );
        let err = Simulation::with_params(
            s,
            SimParams {
                immediate_tolerance: -1.0,
                ..SimParams::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));
    }
}
