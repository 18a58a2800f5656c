//! Receiver TDMA engine (C7).
//!
//! The superframe timer state machine (`INIT -> IDLE -> RUNNING <->
//! PAIRING -> ERROR`) and the per-tick slot advance, following a
//! coordinator-side beacon/slot dispatch shape.

use log::{debug, info, warn};

use crate::codec::SyncBeacon;
use crate::config::{MAX_TRACKERS, ReceiverConfig, RF_DATA_SLOT_US, RF_GUARD_TIME_US, SUPERFRAME_US};
use crate::hop::next_channels;
use crate::ids::NetworkKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Init,
    Idle,
    Running,
    Pairing,
    Error,
}

/// Superframe state: frame number, superframe start time, current
/// channel, and the precomputed 5-hop lookahead table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperframeState {
    pub frame_number: u16,
    pub superframe_start_us: u32,
    pub current_channel: u8,
    pub hop_map: [u8; 5],
}

impl SuperframeState {
    pub fn new(network_key: NetworkKey) -> Self {
        let mut s = Self {
            frame_number: 0,
            superframe_start_us: 0,
            current_channel: 0,
            hop_map: [0; 5],
        };
        s.hop_map = next_channels(s.frame_number, network_key);
        s.current_channel = crate::hop::hop(s.frame_number, network_key);
        s
    }

    /// Advances to the next superframe: derives `current_channel` and
    /// computes `next_frame_delay = max(SUPERFRAME_US - elapsed, GUARD)`.
    /// Returns the delay to schedule the next tick.
    pub fn advance(&mut self, network_key: NetworkKey, elapsed_us: u32) -> u32 {
        self.frame_number = self.frame_number.wrapping_add(1);
        self.current_channel = crate::hop::hop(self.frame_number, network_key);
        self.hop_map = next_channels(self.frame_number, network_key);
        self.superframe_start_us = self.superframe_start_us.wrapping_add(SUPERFRAME_US);
        SUPERFRAME_US.saturating_sub(elapsed_us).max(RF_GUARD_TIME_US)
    }

    pub fn build_beacon(&self, active_mask: [u8; 2], tx_power_dbm: i8) -> SyncBeacon {
        SyncBeacon {
            frame_number: self.frame_number,
            active_mask,
            next_channels: self.hop_map,
            tx_power: tx_power_dbm,
        }
    }
}

/// Per-slot schedule helper for the superframe layout
/// `[sync slot | tracker 0 | ... | tracker N-1 | guard]`.
pub fn slot_start_us(slot_index: usize) -> u32 {
    // Slot 0 is the sync beacon's own window; tracker i occupies the
    // (i+1)-th slot.
    (slot_index as u32 + 1) * RF_DATA_SLOT_US
}

/// One running instance of the receiver's superframe + pairing state
/// machine.
pub struct ReceiverEngine {
    pub state: ReceiverState,
    pub superframe: SuperframeState,
    pub current_slot: usize,
    pub active_mask: [u8; 2],
    cfg: ReceiverConfig,
    pairing_elapsed_ms: u32,
}

impl ReceiverEngine {
    pub fn new(network_key: NetworkKey, cfg: ReceiverConfig) -> Self {
        Self {
            state: ReceiverState::Init,
            superframe: SuperframeState::new(network_key),
            current_slot: 0,
            active_mask: [0; 2],
            cfg,
            pairing_elapsed_ms: 0,
        }
    }

    pub fn on_init_complete(&mut self, ok: bool) {
        if self.state != ReceiverState::Init {
            return;
        }
        self.state = if ok {
            info!("receiver: init complete, entering IDLE");
            ReceiverState::Idle
        } else {
            warn!("receiver: fatal init failure");
            ReceiverState::Error
        };
    }

    pub fn start_running(&mut self) {
        if self.state == ReceiverState::Idle {
            self.state = ReceiverState::Running;
        }
    }

    pub fn enter_pairing(&mut self) {
        if matches!(self.state, ReceiverState::Running | ReceiverState::Idle) {
            self.pairing_elapsed_ms = 0;
            self.state = ReceiverState::Pairing;
            debug!("receiver: entering PAIRING");
        }
    }

    /// After `PAIRING_TIMEOUT_MS` elapses in PAIRING, returns to
    /// RUNNING.
    pub fn tick_pairing_timeout(&mut self, elapsed_ms: u32) {
        if self.state != ReceiverState::Pairing {
            return;
        }
        self.pairing_elapsed_ms = self.pairing_elapsed_ms.wrapping_add(elapsed_ms);
        if self.pairing_elapsed_ms >= self.cfg.pairing_timeout_ms {
            info!("receiver: pairing window closed, resuming RUNNING");
            self.state = ReceiverState::Running;
        }
    }

    pub fn mark_tracker_active(&mut self, id: usize) {
        if id < 16 {
            self.active_mask[id / 8] |= 1 << (id % 8);
        }
    }

    pub fn mark_tracker_inactive(&mut self, id: usize) {
        if id < 16 {
            self.active_mask[id / 8] &= !(1 << (id % 8));
        }
    }

    /// Superframe tick, slot branch 1: first tick of frame builds the
    /// beacon.
    pub fn tick_beacon(&self, tx_power_dbm: i8) -> SyncBeacon {
        self.superframe.build_beacon(self.active_mask, tx_power_dbm)
    }

    /// Superframe tick, slot branch 2: `current_slot < N`. Advances
    /// the slot under an interrupt-disable discipline — modeled here
    /// as a single non-reentrant method call, the actual critical
    /// section lives in the caller's ISR.
    pub fn advance_slot(&mut self) -> Option<usize> {
        if self.current_slot < MAX_TRACKERS {
            let slot = self.current_slot;
            self.current_slot += 1;
            Some(slot)
        } else {
            None
        }
    }

    /// Superframe tick, slot branch 3: `current_slot == N`. Advances
    /// the frame number and computes the next tick delay.
    pub fn advance_superframe(&mut self, network_key: NetworkKey, elapsed_us: u32) -> u32 {
        self.current_slot = 0;
        self.superframe.advance(network_key, elapsed_us)
    }

    /// Beacon cadence for the current state: PAIRING emits beacons at
    /// a faster cadence (~100 ms) than RUNNING's superframe period.
    pub fn beacon_period_ms(&self) -> u32 {
        if self.state == ReceiverState::Pairing {
            self.cfg.pairing_beacon_period_ms
        } else {
            SUPERFRAME_US / 1000
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn superframes_advance_with_exact_spacing_when_on_time() {
        let mut sf = SuperframeState::new(NetworkKey(1));
        let delay = sf.advance(NetworkKey(1), 0);
        assert_eq!(delay, SUPERFRAME_US);
        assert_eq!(sf.frame_number, 1);
    }

    #[test]
    fn overrun_shortens_next_delay_to_guard_floor() {
        let mut sf = SuperframeState::new(NetworkKey(1));
        let delay = sf.advance(NetworkKey(1), SUPERFRAME_US * 2);
        assert_eq!(delay, RF_GUARD_TIME_US);
    }

    #[test]
    fn frame_number_is_monotone_and_wraps() {
        let mut sf = SuperframeState::new(NetworkKey(1));
        sf.frame_number = u16::MAX;
        sf.advance(NetworkKey(1), 0);
        assert_eq!(sf.frame_number, 0);
    }

    #[test]
    fn init_failure_goes_to_error_not_idle() {
        let mut e = ReceiverEngine::new(NetworkKey(1), ReceiverConfig::default());
        e.on_init_complete(false);
        assert_eq!(e.state, ReceiverState::Error);
    }

    #[test]
    fn pairing_times_out_back_to_running() {
        let cfg = ReceiverConfig { pairing_timeout_ms: 100, ..ReceiverConfig::default() };
        let mut e = ReceiverEngine::new(NetworkKey(1), cfg);
        e.on_init_complete(true);
        e.start_running();
        e.enter_pairing();
        assert_eq!(e.state, ReceiverState::Pairing);
        e.tick_pairing_timeout(150);
        assert_eq!(e.state, ReceiverState::Running);
    }

    #[test]
    fn active_mask_tracks_tracker_membership() {
        let mut e = ReceiverEngine::new(NetworkKey(1), ReceiverConfig::default());
        e.mark_tracker_active(2);
        assert_eq!(e.active_mask, [0b0000_0100, 0]);
        e.mark_tracker_inactive(2);
        assert_eq!(e.active_mask, [0, 0]);
    }

    #[test]
    fn slot_advance_covers_all_trackers_then_stops() {
        let mut e = ReceiverEngine::new(NetworkKey(1), ReceiverConfig::default());
        for expected in 0..MAX_TRACKERS {
            assert_eq!(e.advance_slot(), Some(expected));
        }
        assert_eq!(e.advance_slot(), None);
    }

    #[test]
    fn pairing_cadence_is_faster_than_running() {
        let mut e = ReceiverEngine::new(NetworkKey(1), ReceiverConfig::default());
        e.on_init_complete(true);
        e.start_running();
        let running_period = e.beacon_period_ms();
        e.enter_pairing();
        assert!(e.beacon_period_ms() < running_period);
    }
}
