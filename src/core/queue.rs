use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::core::event::Event;
use crate::core::particle::ParticleId;

/// Per-particle single-entry event schedule.
///
/// Each particle owns at most one best-known next event. The heap only
/// accelerates "earliest first" retrieval; entries left behind by
/// reassignment or invalidation are not searched for, they carry the
/// generation stamps of their participants at push time and are discarded
/// lazily when they surface with a stamp that no longer matches.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    slots: Vec<Option<Event>>,
    gens: Vec<u64>,
    heap: BinaryHeap<Reverse<Entry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    event: Event,
    owner: ParticleId,
    stamp_a: u64,
    stamp_b: u64,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.event, self.owner).cmp(&(other.event, other.owner))
    }
}

impl EventQueue {
    /// Queue for `n` particles, all slots empty.
    pub fn new(n: usize) -> Self {
        Self {
            slots: vec![None; n],
            gens: vec![0; n],
            heap: BinaryHeap::new(),
        }
    }

    /// Number of particles with a scheduled event.
    pub fn scheduled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The owner's current best-known event, if any.
    #[inline]
    pub fn slot(&self, id: ParticleId) -> Option<&Event> {
        self.slots[id as usize].as_ref()
    }

    /// Replace `owner`'s scheduled event. The previous entry goes stale
    /// through the slot check; other particles' entries referencing the
    /// owner stay live, since scheduling is not a trajectory change.
    pub fn assign(&mut self, owner: ParticleId, event: Event) {
        let (a, b) = event.kind.participants();
        let entry = Entry {
            event,
            owner,
            stamp_a: self.gens[a as usize],
            stamp_b: b.map_or(0, |b| self.gens[b as usize]),
        };
        self.slots[owner as usize] = Some(event);
        self.heap.push(Reverse(entry));
    }

    /// Drop `owner`'s scheduled event without replacement.
    pub fn unassign(&mut self, owner: ParticleId) {
        self.slots[owner as usize] = None;
    }

    /// Mark every entry referencing `id` stale. Called when the particle's
    /// trajectory changes.
    pub fn invalidate(&mut self, id: ParticleId) {
        self.gens[id as usize] += 1;
        self.slots[id as usize] = None;
    }

    /// Forget everything. Generations keep counting so entries from before
    /// the clear can never resurface as live.
    pub fn clear(&mut self) {
        self.heap.clear();
        for (slot, gen) in self.slots.iter_mut().zip(self.gens.iter_mut()) {
            *slot = None;
            *gen += 1;
        }
    }

    fn entry_live(&self, entry: &Entry) -> bool {
        let (a, b) = entry.event.kind.participants();
        if self.gens[a as usize] != entry.stamp_a {
            return false;
        }
        if let Some(b) = b {
            if self.gens[b as usize] != entry.stamp_b {
                return false;
            }
        }
        self.slots[entry.owner as usize] == Some(entry.event)
    }

    /// The earliest live event, pruning stale heap entries on the way.
    /// Leaves the live entry in place.
    pub fn peek_min(&mut self) -> Option<Event> {
        loop {
            let live = match self.heap.peek() {
                None => return None,
                Some(Reverse(entry)) => self.entry_live(entry),
            };
            match self.heap.peek() {
                Some(Reverse(entry)) if live => return Some(entry.event),
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    /// Remove and return the earliest live event. The owner's slot empties;
    /// the caller decides what invalidation the resolution implies.
    pub fn pop_min(&mut self) -> Option<(ParticleId, Event)> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            if self.entry_live(&entry) {
                self.slots[entry.owner as usize] = None;
                return Some((entry.owner, entry.event));
            }
        }
        None
    }

    /// Iterate over the live per-particle schedule.
    pub fn iter_scheduled(&self) -> impl Iterator<Item = (ParticleId, &Event)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|e| (id as ParticleId, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::EventKind;

    fn wall(id: ParticleId, t: f64) -> Event {
        Event::new(t, EventKind::Wall { id, wall: 0 }).unwrap()
    }

    fn pair(a: ParticleId, b: ParticleId, t: f64) -> Event {
        Event::new(t, EventKind::Pair { a, b }).unwrap()
    }

    #[test]
    fn assign_then_pop_round_trips() {
        let mut q = EventQueue::new(2);
        q.assign(0, wall(0, 1.0));
        assert_eq!(q.scheduled(), 1);
        let (owner, e) = q.pop_min().unwrap();
        assert_eq!(owner, 0);
        assert_eq!(e, wall(0, 1.0));
        assert_eq!(q.scheduled(), 0);
        assert!(q.pop_min().is_none());
    }

    #[test]
    fn reassignment_supersedes_the_old_entry() {
        let mut q = EventQueue::new(2);
        q.assign(0, wall(0, 1.0));
        q.assign(0, wall(0, 3.0));
        let (_, e) = q.pop_min().unwrap();
        assert_eq!(e.time(), 3.0);
        assert!(q.pop_min().is_none(), "the 1.0 entry must be pruned");
    }

    #[test]
    fn invalidating_a_partner_kills_pair_entries() {
        let mut q = EventQueue::new(3);
        q.assign(0, pair(0, 1, 2.0));
        q.assign(2, wall(2, 5.0));
        q.invalidate(1);
        let (owner, e) = q.pop_min().unwrap();
        assert_eq!(owner, 2);
        assert_eq!(e.time(), 5.0);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut q = EventQueue::new(1);
        q.assign(0, wall(0, 1.5));
        assert_eq!(q.peek_min().unwrap().time(), 1.5);
        assert_eq!(q.peek_min().unwrap().time(), 1.5);
        assert!(q.pop_min().is_some());
        assert!(q.peek_min().is_none());
    }

    #[test]
    fn earliest_live_event_wins() {
        let mut q = EventQueue::new(3);
        q.assign(0, wall(0, 4.0));
        q.assign(1, wall(1, 2.0));
        q.assign(2, wall(2, 3.0));
        let times: Vec<f64> = std::iter::from_fn(|| q.pop_min())
            .map(|(_, e)| e.time())
            .collect();
        assert_eq!(times, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn clear_discards_all_entries() {
        let mut q = EventQueue::new(2);
        q.assign(0, wall(0, 1.0));
        q.assign(1, wall(1, 2.0));
        q.clear();
        assert_eq!(q.scheduled(), 0);
        assert!(q.pop_min().is_none());
        // Still usable afterwards.
        q.assign(0, wall(0, 9.0));
        assert_eq!(q.pop_min().unwrap().1.time(), 9.0);
    }

    #[test]
    fn duplicate_pair_entries_die_after_first_resolution() {
        let mut q = EventQueue::new(2);
        q.assign(0, pair(0, 1, 2.0));
        q.assign(1, pair(0, 1, 2.0));
        let (_, e) = q.pop_min().unwrap();
        assert_eq!(e.time(), 2.0);
        // Resolution invalidates both participants; the mirror entry dies.
        q.invalidate(0);
        q.invalidate(1);
        assert!(q.pop_min().is_none());
    }

    #[test]
    fn scheduling_a_partner_is_not_a_trajectory_change() {
        let mut q = EventQueue::new(2);
        q.assign(0, pair(0, 1, 2.0));
        q.assign(1, wall(1, 5.0));
        // Particle 1 picking up its own (later) event must not destroy
        // particle 0's pair prediction.
        let (owner, e) = q.pop_min().unwrap();
        assert_eq!(owner, 0);
        assert_eq!(e.time(), 2.0);
    }
}
