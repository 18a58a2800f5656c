//! Compile-time environmental knobs, collected into small `Config`
//! structs per subsystem rather than loose top-level constants,
//! following `mac_802154::config::Config`'s pattern of a `Default`
//! impl alongside the derived constants that depend on it.
//!
//! Changing any of these must never break the wire format — none of
//! them appear in an encoded frame.

/// Maximum number of trackers a single receiver aggregates.
pub const MAX_TRACKERS: usize = 16;

/// Superframe period in microseconds (200 Hz).
pub const SUPERFRAME_US: u32 = 5_000;

/// Per-tracker data slot duration in microseconds.
pub const RF_DATA_SLOT_US: u32 = 400;

/// Minimum guard time appended after the last slot.
pub const RF_GUARD_TIME_US: u32 = 150;

/// Maximum time to wait for an ACK after a data transmission.
pub const RF_ACK_TIME_US: u32 = 200;

/// RF channel base frequency in MHz (channel 0).
pub const CHANNEL_BASE_MHZ: u32 = 2402;
/// RF channel spacing in MHz.
pub const CHANNEL_STEP_MHZ: u32 = 2;
/// Number of usable RF channels.
pub const CHANNEL_COUNT: u8 = 40;

/// TX power steps available on the radio, in dBm.
pub const TX_POWER_STEPS_DBM: [i8; 8] = [-20, -10, -5, 0, 1, 2, 3, 4];

/// Minimum number of channels that must remain active (non-blacklisted).
pub const MIN_ACTIVE_CHANNELS: usize = 3;

/// Miss-sync recovery ladder thresholds (consecutive missed beacons).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryLevels {
    pub l1_soft_resync: u32,
    pub l2_channel_switch: u32,
    pub l3_full_scan: u32,
    pub l4_deep_search: u32,
}

impl Default for RecoveryLevels {
    fn default() -> Self {
        Self {
            l1_soft_resync: 2,
            l2_channel_switch: 5,
            l3_full_scan: 10,
            l4_deep_search: 20,
        }
    }
}

/// Channel quality monitor timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityConfig {
    /// Period between periodic channel-quality updates, in ms.
    pub update_period_ms: u32,
    /// How long a channel stays blacklisted before recovery is considered, in ms.
    pub recovery_ms: u32,
    /// Loss rate (percent) above which a channel is blacklisted.
    pub blacklist_threshold_pct: u8,
    /// Loss rate (percent) below which a blacklisted channel may recover.
    pub recovery_threshold_pct: u8,
    /// RSSI (dBm) below which a channel is considered clear for CCA.
    pub cca_rssi_threshold: i16,
    /// Maximum CCA retries before falling back.
    pub cca_max_retries: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            update_period_ms: 1000,
            recovery_ms: 30_000,
            blacklist_threshold_pct: 50,
            recovery_threshold_pct: 25,
            cca_rssi_threshold: -65,
            cca_max_retries: 10,
        }
    }
}

/// Tracker power/timeout configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Max consecutive misses before the recovery ladder escalates.
    pub recovery: RecoveryLevels,
    /// How many superframes without a successful TX before entering SLEEP.
    pub sleep_timeout_superframes: u32,
    /// How long SEARCH waits for a beacon before giving up, in ms.
    pub sync_search_timeout_ms: u32,
    /// Rate divider applied when stationary (skip TX unless `frame % divider == 0`).
    pub stationary_rate_divider: u8,
    /// Number of consecutive slot overruns before an ABORT is forced.
    pub max_consecutive_overruns: u8,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            recovery: RecoveryLevels::default(),
            sleep_timeout_superframes: 200 * 30, // ~30s @ 200Hz
            sync_search_timeout_ms: 10_000,
            stationary_rate_divider: 4,
            max_consecutive_overruns: 3,
        }
    }
}

/// Receiver-side pairing/aggregation configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// A tracker not heard from for this long is marked disconnected, in ms.
    pub tracker_timeout_ms: u32,
    /// Pairing window duration before falling back to RUNNING, in ms.
    pub pairing_timeout_ms: u32,
    /// Beacon period while in PAIRING, in ms (faster than the superframe rate).
    pub pairing_beacon_period_ms: u32,
    /// Fixed channel used during pairing.
    pub pairing_channel: u8,
    /// HID bundle report cadence, in ms.
    pub bundle_period_ms: u32,
    /// HID status report cadence, in ms.
    pub status_period_ms: u32,
    /// HID device-info report cadence, in ms.
    pub device_info_period_ms: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            tracker_timeout_ms: 2000,
            pairing_timeout_ms: 60_000,
            pairing_beacon_period_ms: 100,
            pairing_channel: 0,
            bundle_period_ms: 5,
            status_period_ms: 200,
            device_info_period_ms: 1000,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recovery_levels_are_strictly_increasing() {
        let r = RecoveryLevels::default();
        assert!(r.l1_soft_resync < r.l2_channel_switch);
        assert!(r.l2_channel_switch < r.l3_full_scan);
        assert!(r.l3_full_scan < r.l4_deep_search);
    }
}
