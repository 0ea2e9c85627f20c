//! The discrete-event clock.
//!
//! Simulation time does not tick; it jumps. The clock holds a min-heap of
//! scheduled events and a list of preprocess callbacks, and a driver loop
//! (see [`World::run_to`][crate::world::World::run_to]) replays them in time
//! order. Cancellation is lazy: a cancelled event leaves a tombstone in the
//! heap that is skipped when popped.
//!
//! The clock is generic over its payload type so that it can be exercised
//! without dragging the rest of the engine in; the world instantiates it
//! with boxed callbacks.

use std::collections::BinaryHeap;
use std::mem;

use slotmap as sm;
use thiserror::Error;

sm::new_key_type! {
    /// Handle to a scheduled event, used to cancel it.
    ///
    /// Keys are versioned, so a handle to an event that already fired or was
    /// cancelled is simply dead; it can never reach a later event that
    /// happens to reuse the slot.
    pub struct EventKey;
}

/// Default number of cycles a single `run_to` may execute before it is
/// assumed to be stuck in an event cascade.
pub const DEFAULT_CYCLE_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ClockError {
    /// Tried to run the clock backwards. Time only moves forward.
    #[error("cannot run to {target}: clock is already at {now}")]
    InvalidTime { now: f64, target: f64 },
    /// A single run executed more cycles than the configured limit.
    ///
    /// This almost always means an event cascade that never settles: a
    /// zero-delay loop, or a contact that keeps firing because its response
    /// never separates the objects.
    #[error("cycle limit {limit} exceeded; event cascade is not settling")]
    CycleLimitExceeded { limit: u32 },
}

struct ScheduledEvent<E> {
    time: f64,
    payload: E,
}

/// Heap entry. Reverse-ordered on time so `BinaryHeap`'s max-heap acts as a
/// min-heap, with the insertion sequence number as a deterministic
/// tie-break: of two events at the same time, the earlier-scheduled pops
/// first.
#[derive(Clone, Copy, Debug, PartialEq)]
struct QueueEntry {
    time: f64,
    seq: u64,
    key: EventKey,
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .time
            .partial_cmp(&self.time)
            .expect("NaN time in event queue")
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Result of asking the clock for its next due event.
pub(crate) enum Pop<E> {
    /// A live event; the clock's time has been advanced to it.
    Event(f64, E),
    /// The next heap entry was a tombstone. Per the cycle protocol the
    /// caller goes back to the preprocess step rather than popping again.
    Cancelled,
    /// Nothing due at or before the limit.
    Idle,
}

/// Event heap, preprocess list and the current instant.
pub struct Clock<E> {
    pub(crate) time: f64,
    pub(crate) cycle: u64,
    pub(crate) cycle_limit: u32,
    events: sm::SlotMap<EventKey, ScheduledEvent<E>>,
    queue: BinaryHeap<QueueEntry>,
    next_seq: u64,
    preprocesses: Vec<E>,
}

impl<E> Clock<E> {
    pub fn new() -> Self {
        Self::with_cycle_limit(DEFAULT_CYCLE_LIMIT)
    }

    pub fn with_cycle_limit(cycle_limit: u32) -> Self {
        Clock {
            time: 0.0,
            cycle: 0,
            cycle_limit,
            events: sm::SlotMap::with_key(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            preprocesses: Vec::new(),
        }
    }

    /// The current simulation instant. Never decreases.
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// The current cycle number, incremented once per preprocess/event
    /// round.
    #[inline]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Schedule a payload to fire at `time`.
    ///
    /// Returns `None` if `time` is already in the past; such events are
    /// discarded silently.
    pub fn schedule(&mut self, time: f64, payload: E) -> Option<EventKey> {
        if time < self.time {
            log::debug!(
                "discarding event scheduled at {time}, clock is already at {}",
                self.time
            );
            return None;
        }
        let key = self.events.insert(ScheduledEvent { time, payload });
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueueEntry { time, seq, key });
        Some(key)
    }

    /// Cancel a scheduled event. Returns whether it was still pending.
    ///
    /// The heap entry stays behind as a tombstone and is skipped when it
    /// reaches the top.
    pub fn cancel(&mut self, key: EventKey) -> bool {
        self.events.remove(key).is_some()
    }

    /// Whether an event handle still refers to a pending event.
    pub fn is_scheduled(&self, key: EventKey) -> bool {
        self.events.contains_key(key)
    }

    /// Number of pending (non-cancelled) events.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Queue a payload to run at the start of the next cycle.
    ///
    /// Preprocesses added while a cycle's preprocesses are being drained
    /// run on the cycle after that, not the current one.
    pub fn add_preprocess(&mut self, payload: E) {
        self.preprocesses.push(payload);
    }

    /// Drain the pending preprocesses for this cycle and bump the cycle
    /// counter. Payloads added after this call land in a fresh list.
    pub(crate) fn begin_cycle(&mut self) -> Vec<E> {
        self.cycle += 1;
        mem::take(&mut self.preprocesses)
    }

    /// Pop the next heap entry due at or before `limit`.
    ///
    /// On a live event the clock's time advances to the event's time. On
    /// [`Pop::Idle`] time is left alone; the driver decides where to settle.
    pub(crate) fn pop_next(&mut self, limit: f64) -> Pop<E> {
        let Some(top) = self.queue.peek() else {
            return Pop::Idle;
        };
        if top.time > limit {
            return Pop::Idle;
        }
        let entry = self.queue.pop().expect("peeked entry vanished");
        match self.events.remove(entry.key) {
            Some(ev) => {
                self.time = ev.time;
                Pop::Event(ev.time, ev.payload)
            }
            None => Pop::Cancelled,
        }
    }

    /// Settle the clock at `target` once nothing more is due before it.
    pub(crate) fn finish_at(&mut self, target: f64) {
        debug_assert!(target >= self.time);
        self.time = target;
    }
}

impl<E> Default for Clock<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(clock: &mut Clock<u32>, limit: f64) -> Vec<(f64, u32)> {
        let mut out = Vec::new();
        loop {
            match clock.pop_next(limit) {
                Pop::Event(t, p) => out.push((t, p)),
                Pop::Cancelled => continue,
                Pop::Idle => return out,
            }
        }
    }

    #[test]
    fn events_pop_in_time_order() {
        let mut clock = Clock::new();
        clock.schedule(3.0, 3);
        clock.schedule(1.0, 1);
        clock.schedule(2.0, 2);
        itertools::assert_equal(drain(&mut clock, 10.0), [(1.0, 1), (2.0, 2), (3.0, 3)]);
        assert_eq!(clock.time(), 3.0);
    }

    #[test]
    fn ties_pop_in_insertion_order() {
        let mut clock = Clock::new();
        for p in 0..5 {
            clock.schedule(1.0, p);
        }
        itertools::assert_equal(drain(&mut clock, 1.0).into_iter().map(|(_, p)| p), 0..5);
    }

    #[test]
    fn cancelled_events_become_tombstones() {
        let mut clock = Clock::new();
        let a = clock.schedule(1.0, 1).unwrap();
        clock.schedule(2.0, 2);
        assert!(clock.is_scheduled(a));
        assert!(clock.cancel(a));
        assert!(!clock.is_scheduled(a));
        // cancelling twice is a no-op
        assert!(!clock.cancel(a));
        assert!(matches!(clock.pop_next(10.0), Pop::Cancelled));
        itertools::assert_equal(drain(&mut clock, 10.0), [(2.0, 2)]);
    }

    #[test]
    fn past_events_are_discarded() {
        let mut clock = Clock::new();
        clock.schedule(5.0, 1);
        let _ = drain(&mut clock, 10.0);
        assert_eq!(clock.time(), 5.0);
        assert!(clock.schedule(4.0, 2).is_none());
        assert_eq!(clock.pending_events(), 0);
        // exactly "now" is still allowed
        assert!(clock.schedule(5.0, 3).is_some());
    }

    #[test]
    fn events_beyond_the_limit_stay_queued() {
        let mut clock = Clock::new();
        clock.schedule(2.0, 2);
        clock.schedule(8.0, 8);
        itertools::assert_equal(drain(&mut clock, 5.0), [(2.0, 2)]);
        clock.finish_at(5.0);
        assert_eq!(clock.time(), 5.0);
        itertools::assert_equal(drain(&mut clock, 8.0), [(8.0, 8)]);
    }

    #[test]
    fn preprocess_drain_defers_new_additions() {
        let mut clock: Clock<u32> = Clock::new();
        clock.add_preprocess(1);
        clock.add_preprocess(2);
        let first = clock.begin_cycle();
        // additions during the drain belong to the next cycle
        clock.add_preprocess(3);
        itertools::assert_equal(first, [1, 2]);
        itertools::assert_equal(clock.begin_cycle(), [3]);
        assert_eq!(clock.cycle(), 2);
    }
}
