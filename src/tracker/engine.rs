//! Per-frame tracker TDMA engine (C6).
//!
//! One function per phase of the frame (beacon wait, slot wait,
//! transmit, ack), called in sequence from a top-level `step_frame`
//! that dispatches depending on slot position.

use log::{debug, warn};

use crate::codec::{Ack, AckCommand, DecodeError, FormatPolicy, SyncBeacon, TrackerData};
use crate::config::{RF_ACK_TIME_US, SUPERFRAME_US};
use crate::hop::{hop, next_good_channel};
use crate::ids::{NetworkKey, TrackerId};
use crate::quality::ChannelTable;
use crate::tracker::recovery::{RecoveryAction, RecoveryPolicy};

/// Tracker-side superframe/link state. `(paired, network_key)`
/// persists across sleep; everything else is reset at wake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerContext {
    pub id: TrackerId,
    pub network_key: NetworkKey,
    pub paired: bool,

    pub frame_number: u16,
    pub current_channel: u8,
    pub next_channels: [u8; 5],
    pub sync_time_us: u32,
    pub last_sync_ms: u32,
    pub sequence: u8,
    pub pending_ack: bool,
    pub retry_count: u8,

    pub battery_pct: u8,
    pub consecutive_misses: u32,
    pub consecutive_overruns: u8,
}

impl TrackerContext {
    pub fn new(id: TrackerId, network_key: NetworkKey, paired: bool) -> Self {
        Self {
            id,
            network_key,
            paired,
            frame_number: 0,
            current_channel: 0,
            next_channels: [0; 5],
            sync_time_us: 0,
            last_sync_ms: 0,
            sequence: 0,
            pending_ack: false,
            retry_count: 0,
            battery_pct: 100,
            consecutive_misses: 0,
            consecutive_overruns: 0,
        }
    }

    /// Resets everything that doesn't survive a sleep cycle, keeping
    /// `(paired, network_key)` untouched.
    pub fn reset_for_wake(&mut self) {
        let (id, network_key, paired, battery_pct) =
            (self.id, self.network_key, self.paired, self.battery_pct);
        *self = Self::new(id, network_key, paired);
        self.battery_pct = battery_pct;
    }
}

/// Outcome of processing the sync window for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconOutcome {
    Heard,
    Missed,
}

/// Step 1: apply (or miss) a beacon. On a good beacon, updates
/// `frame_number`/`sync_time_us`/`next_channels` and resets
/// `consecutive_misses`; on a miss, predicts the next sync time and
/// increments the miss counter.
pub fn apply_beacon(
    ctx: &mut TrackerContext,
    beacon: Option<&SyncBeacon>,
    now_ms: u32,
) -> BeaconOutcome {
    match beacon {
        Some(b) => {
            ctx.frame_number = b.frame_number;
            ctx.sync_time_us = ctx.sync_time_us.wrapping_add(SUPERFRAME_US);
            ctx.next_channels = b.next_channels;
            ctx.last_sync_ms = now_ms;
            ctx.consecutive_misses = 0;
            BeaconOutcome::Heard
        }
        None => {
            ctx.sync_time_us = ctx.sync_time_us.wrapping_add(SUPERFRAME_US);
            ctx.consecutive_misses = ctx.consecutive_misses.saturating_add(1);
            BeaconOutcome::Missed
        }
    }
}

/// Checks the active mask: if `id` is no longer set, the caller
/// should flip the tracker to UNPAIRED.
pub fn mask_includes(active_mask: [u8; 2], id: TrackerId) -> bool {
    let idx = id.0 as usize;
    if idx >= 16 {
        return false;
    }
    let byte = active_mask[idx / 8];
    (byte >> (idx % 8)) & 1 != 0
}

/// Channel select: next precomputed hop, with CCA-style blacklist
/// awareness, falling back to the algorithmic hop if the precomputed
/// entry is itself blacklisted and all candidates fail.
pub fn select_channel(ctx: &TrackerContext, quality: &ChannelTable) -> u8 {
    let precomputed = ctx.next_channels[(ctx.frame_number as usize) % ctx.next_channels.len()];
    if !quality.is_blacklisted(precomputed) {
        return precomputed;
    }
    next_good_channel(ctx.frame_number, ctx.network_key, |c| quality.is_blacklisted(c))
}

/// Builds the outgoing data frame for this frame, stamping the
/// current sequence number.
pub fn build_data_frame(ctx: &TrackerContext, quat: [i16; 4], accel_mg: [i16; 3]) -> TrackerData {
    TrackerData {
        tracker_id: ctx.id,
        seq: ctx.sequence,
        quat,
        accel_mg,
        battery_pct: ctx.battery_pct,
        flags: crate::codec::DataFlags::empty(),
    }
}

/// Builds the outgoing data frame and encodes it in whichever wire
/// format `policy` selects for the tracker's current link loss rate —
/// Ultra is selectable per-tracker. `retry_count` stands in for a
/// rolling loss estimate when the caller has nothing finer grained
/// at hand.
pub fn encode_data_frame(
    ctx: &TrackerContext,
    quat: [i16; 4],
    accel_mg: [i16; 3],
    loss_pct: u8,
    policy: &mut dyn FormatPolicy,
    buf: &mut [u8],
) -> Result<usize, DecodeError> {
    let data = build_data_frame(ctx, quat, accel_mg);
    crate::codec::encode_data_frame(policy.select(loss_pct), &data, buf)
}

/// Step 7/8: apply an ACK (or its absence) to the context and quality
/// table, advancing the sequence number on success.
pub fn apply_ack_outcome(
    ctx: &mut TrackerContext,
    quality: &mut ChannelTable,
    ack: Option<&Ack>,
) -> Option<AckCommand> {
    quality.on_tx_outcome(ctx.current_channel, ack.is_some(), false);
    if ack.is_some() {
        ctx.pending_ack = false;
        ctx.retry_count = 0;
        ctx.sequence = ctx.sequence.wrapping_add(1);
    } else {
        ctx.retry_count = ctx.retry_count.saturating_add(1);
    }
    ack.map(|a| a.command)
}

/// Runs the recovery policy off the tracker's current miss count and
/// reports whether the slot overran the allotted `SLOT - GUARD`
/// window.
pub fn run_recovery(ctx: &TrackerContext, policy: &mut dyn RecoveryPolicy) -> RecoveryAction {
    if ctx.consecutive_misses == 0 {
        policy.on_sync();
        return RecoveryAction::None;
    }
    let action = policy.on_miss(ctx.consecutive_misses);
    match action {
        RecoveryAction::SoftResync => debug!("recovery: soft resync"),
        RecoveryAction::ChannelSwitch => warn!("recovery: channel switch"),
        RecoveryAction::FullScan => warn!("recovery: full scan"),
        RecoveryAction::DeepSearch => warn!("recovery: deep search"),
        RecoveryAction::None => {}
    }
    action
}

/// Bound on consecutive ACK-wait time: `2 * RF_ACK_TIME_US`.
pub const ACK_WAIT_TIMEOUT_US: u32 = RF_ACK_TIME_US * 2;

/// Slot-overrun check: returns true if elapsed time in the slot
/// exceeded the `SLOT - GUARD` budget.
pub fn slot_overran(elapsed_us: u32, slot_us: u32, guard_us: u32) -> bool {
    elapsed_us > slot_us.saturating_sub(guard_us)
}

/// Predicted channel used purely for beacon-window RX (before a
/// beacon has arrived this frame), derived from the algorithmic hop
/// so a tracker can still predict hops across a missed beacon.
pub fn predicted_sync_channel(ctx: &TrackerContext) -> u8 {
    hop(ctx.frame_number, ctx.network_key)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::{DataFormat, StandardOnlyPolicy, UltraWhenMarginalPolicy};
    use crate::config::QualityConfig;
    use crate::tracker::recovery::{LadderRecoveryPolicy, NoOpRecoveryPolicy};

    fn beacon(frame_number: u16) -> SyncBeacon {
        SyncBeacon {
            frame_number,
            active_mask: [0x01, 0x00],
            next_channels: [1, 2, 3, 4, 5],
            tx_power: 0,
        }
    }

    #[test]
    fn heard_beacon_updates_context_and_resets_misses() {
        let mut ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        ctx.consecutive_misses = 3;
        let b = beacon(17);
        let outcome = apply_beacon(&mut ctx, Some(&b), 1000);
        assert_eq!(outcome, BeaconOutcome::Heard);
        assert_eq!(ctx.frame_number, 17);
        assert_eq!(ctx.consecutive_misses, 0);
        assert_eq!(ctx.next_channels, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn missed_beacon_predicts_sync_time_and_counts_miss() {
        let mut ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        let before = ctx.sync_time_us;
        let outcome = apply_beacon(&mut ctx, None, 1000);
        assert_eq!(outcome, BeaconOutcome::Missed);
        assert_eq!(ctx.sync_time_us, before.wrapping_add(SUPERFRAME_US));
        assert_eq!(ctx.consecutive_misses, 1);
    }

    #[test]
    fn mask_bit_membership() {
        let mask = [0b0000_0010, 0];
        assert!(mask_includes(mask, TrackerId(1)));
        assert!(!mask_includes(mask, TrackerId(0)));
        assert!(!mask_includes(mask, TrackerId(9)));
    }

    #[test]
    fn select_channel_prefers_precomputed_unless_blacklisted() {
        let cfg = QualityConfig::default();
        let mut quality = ChannelTable::new(cfg);
        let mut ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        ctx.next_channels = [5, 6, 7, 8, 9];
        ctx.frame_number = 0;
        assert_eq!(select_channel(&ctx, &quality), 5);

        quality.set_counts(5, 40, 0);
        quality.periodic_update(&crate::quality::HysteresisBlacklistPolicy, 1000);
        assert!(quality.is_blacklisted(5));
        assert_ne!(select_channel(&ctx, &quality), 5);
    }

    #[test]
    fn ack_outcome_advances_sequence_on_success() {
        let cfg = QualityConfig::default();
        let mut quality = ChannelTable::new(cfg);
        let mut ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        let ack = Ack {
            tracker_id: TrackerId(0),
            ack_seq: 0,
            command: AckCommand::Calibrate,
            param: 0,
        };
        let cmd = apply_ack_outcome(&mut ctx, &mut quality, Some(&ack));
        assert_eq!(cmd, Some(AckCommand::Calibrate));
        assert_eq!(ctx.sequence, 1);
        assert!(!ctx.pending_ack);
    }

    #[test]
    fn ack_outcome_bumps_retry_on_miss() {
        let cfg = QualityConfig::default();
        let mut quality = ChannelTable::new(cfg);
        let mut ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        apply_ack_outcome(&mut ctx, &mut quality, None);
        assert_eq!(ctx.retry_count, 1);
        assert_eq!(ctx.sequence, 0);
    }

    #[test]
    fn recovery_escalates_through_ladder() {
        let levels = crate::config::RecoveryLevels::default();
        let mut policy = LadderRecoveryPolicy::new(levels);
        let mut ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        ctx.consecutive_misses = levels.l3_full_scan;
        assert_eq!(run_recovery(&ctx, &mut policy), RecoveryAction::FullScan);
    }

    #[test]
    fn noop_recovery_never_escalates() {
        let mut ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        ctx.consecutive_misses = 1000;
        let mut policy = NoOpRecoveryPolicy;
        assert_eq!(run_recovery(&ctx, &mut policy), RecoveryAction::None);
    }

    #[test]
    fn slot_overrun_detection() {
        assert!(!slot_overran(300, 400, 150));
        assert!(slot_overran(260, 400, 150));
    }

    #[test]
    fn encode_data_frame_uses_standard_by_default() {
        let ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        let mut policy = StandardOnlyPolicy;
        let mut buf = [0u8; 32];
        let n = encode_data_frame(&ctx, [crate::fixed::ONE, 0, 0, 0], [0, 0, 1000], 90, &mut policy, &mut buf).unwrap();
        // Standard frames carry the non-Ultra Data type byte.
        assert_eq!(buf[0] & crate::codec::ULTRA_BIT, 0);
        assert_eq!(n, crate::codec::TRACKER_DATA_LEN);
    }

    #[test]
    fn encode_data_frame_switches_to_ultra_under_marginal_policy() {
        let ctx = TrackerContext::new(TrackerId(0), NetworkKey(1), true);
        let mut policy = UltraWhenMarginalPolicy::new(20);
        let mut buf = [0u8; 32];
        let n = encode_data_frame(&ctx, [crate::fixed::ONE, 0, 0, 0], [0, 0, 1000], 50, &mut policy, &mut buf).unwrap();
        assert_eq!(buf[0] & crate::codec::ULTRA_BIT, crate::codec::ULTRA_BIT);
        assert_eq!(n, crate::codec::ultra::ULTRA_DATA_LEN);
        let _ = DataFormat::Ultra;
    }

    #[test]
    fn reset_for_wake_preserves_pairing_not_runtime_state() {
        let mut ctx = TrackerContext::new(TrackerId(3), NetworkKey(0xCAFE), true);
        ctx.frame_number = 999;
        ctx.consecutive_misses = 7;
        ctx.reset_for_wake();
        assert_eq!(ctx.id, TrackerId(3));
        assert_eq!(ctx.network_key, NetworkKey(0xCAFE));
        assert!(ctx.paired);
        assert_eq!(ctx.frame_number, 0);
        assert_eq!(ctx.consecutive_misses, 0);
    }
}
