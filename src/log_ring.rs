//! Fixed-capacity event ring: ~50 entries, oldest discarded on
//! overflow. Distinct from the crash snapshot
//! ([`crate::storage::CrashSnapshot`]), which is a single persisted
//! record rather than a ring.

use heapless::spsc::Queue;

/// Ring capacity is ~50 entries; `heapless::spsc::Queue` needs one
/// spare slot, so a literal 51 gives exactly 50 usable entries.
pub const RING_CAPACITY: usize = 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SyncAcquired,
    SyncLost,
    RecoveryEscalated,
    ChannelBlacklisted,
    ChannelRecovered,
    Paired,
    Unpaired,
    FusionDegenerate,
    SlotOverrun,
    SlotAbort,
    Sleep,
    Wake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp_ms: u32,
    pub kind: EventKind,
    pub payload: [u8; 8],
    pub payload_len: u8,
}

impl Event {
    pub fn new(timestamp_ms: u32, kind: EventKind) -> Self {
        Self {
            timestamp_ms,
            kind,
            payload: [0; 8],
            payload_len: 0,
        }
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        let n = payload.len().min(8);
        self.payload[..n].copy_from_slice(&payload[..n]);
        self.payload_len = n as u8;
        self
    }
}

/// A fixed-capacity ring of the most recent events. Pushing past
/// capacity drops the oldest entry first.
pub struct EventRing {
    queue: Queue<Event, RING_CAPACITY>,
}

impl Default for EventRing {
    fn default() -> Self {
        Self { queue: Queue::new() }
    }
}

impl EventRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        if self.queue.is_full() {
            let _ = self.queue.dequeue();
        }
        let _ = self.queue.enqueue(event);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Iterates oldest-first without draining, for diagnostics dumps.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overflow_drops_oldest() {
        let mut ring = EventRing::new();
        for i in 0..(RING_CAPACITY as u32 + 10) {
            ring.push(Event::new(i, EventKind::SyncAcquired));
        }
        assert_eq!(ring.len(), RING_CAPACITY - 1);
        let oldest = ring.iter().next().unwrap();
        assert!(oldest.timestamp_ms > 0, "oldest stale entries were evicted");
    }

    #[test]
    fn payload_is_truncated_to_capacity() {
        let e = Event::new(1, EventKind::SlotOverrun).with_payload(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(e.payload_len, 8);
    }
}
