//! Channel quality monitor (C4): per-channel TX/ACK/CRC statistics,
//! blacklist hysteresis with timed recovery, and CCA.

use crate::config::{QualityConfig, CHANNEL_COUNT, MIN_ACTIVE_CHANNELS};
use crate::timer::Timer;

/// Per-channel running counters, decayed periodically rather than
/// reset, so recent activity dominates without discarding history
/// entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelStats {
    pub tx_count: u32,
    pub ack_count: u32,
    pub crc_errors: u32,
    pub rssi_sum: i32,
    pub rssi_samples: u32,
    pub blacklisted: bool,
    pub blacklist_time_ms: u32,
    pub recovery_attempts: u32,
}

impl ChannelStats {
    /// `loss_rate% = (tx - ack) / tx`, `0` when no samples yet.
    pub fn loss_rate_pct(&self) -> u8 {
        if self.tx_count == 0 {
            return 0;
        }
        let lost = self.tx_count.saturating_sub(self.ack_count);
        ((lost * 100) / self.tx_count).min(100) as u8
    }

    /// `100 - loss%`, except a blacklisted channel is always reported
    /// below 50 even after `decay()` has zeroed its counters back
    /// toward a clean-looking `loss_rate_pct() == 0` — the blacklist
    /// flag, not the decayed history, is what callers must trust.
    pub fn quality_score(&self) -> u8 {
        let score = 100 - self.loss_rate_pct();
        if self.blacklisted {
            score.min(49)
        } else {
            score
        }
    }

    pub fn mean_rssi(&self) -> i16 {
        if self.rssi_samples == 0 {
            0
        } else {
            (self.rssi_sum / self.rssi_samples as i32) as i16
        }
    }

    fn decay(&mut self) {
        self.tx_count /= 2;
        self.ack_count /= 2;
        self.crc_errors /= 2;
        self.rssi_sum /= 2;
        self.rssi_samples /= 2;
    }
}

/// Blacklist decisions are made by a swappable policy;
/// [`NoOpBlacklistPolicy`] is the bench-test escape hatch that never
/// blacklists anything.
pub trait BlacklistPolicy {
    fn should_blacklist(&self, stats: &ChannelStats, cfg: &QualityConfig) -> bool;
    fn should_unblacklist(&self, stats: &ChannelStats, elapsed_ms: u32, cfg: &QualityConfig)
        -> bool;
}

pub struct HysteresisBlacklistPolicy;

impl BlacklistPolicy for HysteresisBlacklistPolicy {
    fn should_blacklist(&self, stats: &ChannelStats, cfg: &QualityConfig) -> bool {
        stats.loss_rate_pct() > cfg.blacklist_threshold_pct
    }

    fn should_unblacklist(
        &self,
        stats: &ChannelStats,
        elapsed_ms: u32,
        cfg: &QualityConfig,
    ) -> bool {
        elapsed_ms > cfg.recovery_ms && stats.loss_rate_pct() < cfg.recovery_threshold_pct
    }
}

pub struct NoOpBlacklistPolicy;

impl BlacklistPolicy for NoOpBlacklistPolicy {
    fn should_blacklist(&self, _stats: &ChannelStats, _cfg: &QualityConfig) -> bool {
        false
    }

    fn should_unblacklist(&self, _stats: &ChannelStats, _elapsed_ms: u32, _cfg: &QualityConfig) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthReport {
    pub total_loss_pct: u8,
    pub worst_channel: u8,
    pub worst_loss_pct: u8,
}

pub struct ChannelTable {
    stats: [ChannelStats; CHANNEL_COUNT as usize],
    cfg: QualityConfig,
}

impl ChannelTable {
    pub fn new(cfg: QualityConfig) -> Self {
        Self {
            stats: [ChannelStats::default(); CHANNEL_COUNT as usize],
            cfg,
        }
    }

    pub fn stats(&self, channel: u8) -> &ChannelStats {
        &self.stats[channel as usize]
    }

    /// Directly sets a channel's tx/ack counters, for test scenarios
    /// that force a specific loss rate before calling `periodic_update`.
    #[cfg(any(test, feature = "mocks"))]
    pub fn set_counts(&mut self, channel: u8, tx: u32, ack: u32) {
        let s = &mut self.stats[channel as usize];
        s.tx_count = tx;
        s.ack_count = ack;
    }

    pub fn on_tx_outcome(&mut self, channel: u8, acked: bool, crc_error: bool) {
        let s = &mut self.stats[channel as usize];
        s.tx_count += 1;
        if acked {
            s.ack_count += 1;
        }
        if crc_error {
            s.crc_errors += 1;
        }
    }

    pub fn on_rx_rssi(&mut self, channel: u8, rssi: i16) {
        let s = &mut self.stats[channel as usize];
        s.rssi_sum += rssi as i32;
        s.rssi_samples += 1;
    }

    pub fn is_blacklisted(&self, channel: u8) -> bool {
        self.stats[channel as usize].blacklisted
    }

    pub fn active_count(&self) -> usize {
        self.stats.iter().filter(|s| !s.blacklisted).count()
    }

    pub fn quality_score(&self, channel: u8) -> u8 {
        self.stats[channel as usize].quality_score()
    }

    pub fn best_channel(&self) -> u8 {
        self.stats
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.blacklisted)
            .max_by_key(|(_, s)| s.quality_score())
            .map(|(i, _)| i as u8)
            .unwrap_or(0)
    }

    pub fn worst_channel(&self) -> u8 {
        self.stats
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.quality_score())
            .map(|(i, _)| i as u8)
            .unwrap_or(0)
    }

    pub fn health_report(&self) -> HealthReport {
        let worst = self.worst_channel();
        let total_tx: u32 = self.stats.iter().map(|s| s.tx_count).sum();
        let total_ack: u32 = self.stats.iter().map(|s| s.ack_count).sum();
        let total_loss_pct = if total_tx == 0 {
            0
        } else {
            ((total_tx.saturating_sub(total_ack) * 100) / total_tx).min(100) as u8
        };
        HealthReport {
            total_loss_pct,
            worst_channel: worst,
            worst_loss_pct: self.stats[worst as usize].loss_rate_pct(),
        }
    }

    /// Runs the periodic quality pass: blacklist/unblacklist decisions,
    /// then exponential decay. `now_ms` is an absolute timer reading,
    /// used only to stamp freshly blacklisted channels and to compute
    /// elapsed time with wraparound-safe subtraction.
    pub fn periodic_update(&mut self, policy: &dyn BlacklistPolicy, now_ms: u32) {
        // A blacklist is only honored while MIN_ACTIVE_CHANNELS would
        // still hold afterwards; `remaining_active` is decremented as
        // we go so newly-blacklisted channels count against the floor
        // immediately, unlike a static before-the-loop snapshot.
        let mut remaining_active = self.active_count();

        for i in 0..self.stats.len() {
            let (blacklist, unblacklist) = {
                let s = &self.stats[i];
                if s.blacklisted {
                    let elapsed = now_ms.wrapping_sub(s.blacklist_time_ms);
                    (false, policy.should_unblacklist(s, elapsed, &self.cfg))
                } else {
                    let would_blacklist = policy.should_blacklist(s, &self.cfg)
                        && remaining_active > MIN_ACTIVE_CHANNELS;
                    (would_blacklist, false)
                }
            };
            let s = &mut self.stats[i];
            if blacklist {
                s.blacklisted = true;
                s.blacklist_time_ms = now_ms;
                remaining_active -= 1;
            } else if unblacklist {
                s.blacklisted = false;
                s.recovery_attempts += 1;
                remaining_active += 1;
            }
            s.decay();
        }
    }

    /// Clear-channel assessment: parks on `channel`, waits briefly,
    /// reads RSSI via `rssi_fn`, and reports clear iff below the
    /// configured threshold. `rssi_fn` is expected to be backed by a
    /// real radio's `set_channel` + `poll_rssi`; kept generic here so
    /// this module stays radio-agnostic.
    pub fn cca(&self, rssi_fn: impl Fn() -> i16) -> bool {
        rssi_fn() < self.cfg.cca_rssi_threshold as i16
    }

    pub fn cca_max_retries(&self) -> u8 {
        self.cfg.cca_max_retries
    }
}

/// Busy-waits `timer` forward by the CCA settle time before sampling
/// RSSI — kept separate from [`ChannelTable::cca`] so tests can call
/// the pure decision function without a timer.
pub fn cca_settle<T: Timer>(timer: &T, settle_us: u32) {
    let start = timer.time_us();
    while timer.time_us().wrapping_sub(start) < settle_us {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quality_score_bounded_and_blacklist_implies_low_score() {
        let cfg = QualityConfig::default();
        let mut t = ChannelTable::new(cfg);
        t.set_counts(18, 40, 15); // 62% loss
        t.periodic_update(&HysteresisBlacklistPolicy, 1000);
        assert!(t.is_blacklisted(18));
        assert!(t.quality_score(18) < 50);
        for c in 0..CHANNEL_COUNT {
            assert!(t.quality_score(c) <= 100);
        }
    }

    #[test]
    fn quality_score_stays_low_while_blacklisted_through_decay() {
        let cfg = QualityConfig::default();
        let mut t = ChannelTable::new(cfg);
        t.set_counts(18, 40, 15); // 62% loss
        t.periodic_update(&HysteresisBlacklistPolicy, 1000);
        assert!(t.is_blacklisted(18));

        // Keep ticking without a good window; decay alone should
        // never push the score back above the blacklist threshold.
        let mut now = 1000;
        for _ in 0..20 {
            now += 100;
            t.periodic_update(&HysteresisBlacklistPolicy, now);
            assert!(t.is_blacklisted(18));
            assert!(t.quality_score(18) < 50);
        }
    }

    #[test]
    fn blacklist_recovers_after_good_window() {
        let cfg = QualityConfig::default();
        let mut t = ChannelTable::new(cfg);
        t.set_counts(18, 40, 15);
        t.periodic_update(&HysteresisBlacklistPolicy, 1000);
        assert!(t.is_blacklisted(18));

        // decay happened once already; simulate a clean window well past recovery_ms.
        t.set_counts(18, 40, 34); // 15% loss
        t.periodic_update(&HysteresisBlacklistPolicy, 1000 + cfg.recovery_ms + 1);
        assert!(!t.is_blacklisted(18));
    }

    #[test]
    fn min_active_channels_is_preserved() {
        let cfg = QualityConfig::default();
        let mut t = ChannelTable::new(cfg);
        // Force every channel into high loss.
        for c in 0..CHANNEL_COUNT {
            t.set_counts(c, 40, 0);
        }
        t.periodic_update(&HysteresisBlacklistPolicy, 1000);
        assert!(t.active_count() >= MIN_ACTIVE_CHANNELS);
    }

    #[test]
    fn noop_policy_never_blacklists() {
        let cfg = QualityConfig::default();
        let mut t = ChannelTable::new(cfg);
        t.set_counts(5, 100, 0);
        t.periodic_update(&NoOpBlacklistPolicy, 1000);
        assert!(!t.is_blacklisted(5));
    }

    #[test]
    fn cca_reports_clear_below_threshold() {
        let cfg = QualityConfig::default();
        let t = ChannelTable::new(cfg);
        assert!(t.cca(|| -80));
        assert!(!t.cca(|| -40));
    }
}
