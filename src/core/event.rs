use std::cmp::Ordering;

use ordered_float::NotNan;

use crate::core::boundary::WallId;
use crate::core::particle::ParticleId;

/// Which side of a square well's outer range a pair is crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WellCrossing {
    /// The pair falls into the well from outside.
    Enter,
    /// The pair reaches the outer range from inside.
    Exit,
}

/// What happens at an event. Pure description: no validity tokens here,
/// staleness is tracked by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    /// Hard-core contact between two particles.
    Pair { a: ParticleId, b: ParticleId },
    /// A pair crossing a square well's outer range.
    RangeChange {
        a: ParticleId,
        b: ParticleId,
        crossing: WellCrossing,
    },
    /// A particle touching a reflecting wall.
    Wall { id: ParticleId, wall: WallId },
    /// A particle's coordinate leaving [0, L) on a periodic axis.
    Wrap {
        id: ParticleId,
        axis: usize,
        is_max: bool,
    },
}

impl EventKind {
    /// Tie-break rank for simultaneous events. Core contacts first, then
    /// range crossings, then walls, then wraps.
    #[inline]
    fn rank(&self) -> u8 {
        match self {
            EventKind::Pair { .. } => 0,
            EventKind::RangeChange { .. } => 1,
            EventKind::Wall { .. } => 2,
            EventKind::Wrap { .. } => 3,
        }
    }

    /// The particles whose trajectories the event changes.
    #[inline]
    pub fn participants(&self) -> (ParticleId, Option<ParticleId>) {
        match *self {
            EventKind::Pair { a, b } | EventKind::RangeChange { a, b, .. } => (a, Some(b)),
            EventKind::Wall { id, .. } | EventKind::Wrap { id, .. } => (id, None),
        }
    }

    /// True if `id` participates in this event.
    #[inline]
    pub fn involves(&self, id: ParticleId) -> bool {
        let (a, b) = self.participants();
        a == id || b == Some(id)
    }
}

/// A scheduled event: absolute time plus what happens.
///
/// Ordering is total and deterministic: earlier time first, then the kind
/// rank, then participant ids. Ties therefore resolve identically across
/// runs with the same inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub time: NotNan<f64>,
    pub kind: EventKind,
}

impl Event {
    /// Build an event, rejecting NaN times at the boundary.
    pub fn new(time: f64, kind: EventKind) -> Option<Self> {
        NotNan::new(time).ok().map(|time| Event { time, kind })
    }

    #[inline]
    pub fn time(&self) -> f64 {
        self.time.into_inner()
    }

    #[inline]
    fn order_key(&self) -> (NotNan<f64>, u8, ParticleId, ParticleId) {
        let (a, b) = self.kind.participants();
        (self.time, self.kind.rank(), a, b.unwrap_or(ParticleId::MAX))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}
