//! Receiver aggregator (C9): fans the per-tracker runtime view into
//! HID bundle/status/device-info reports at their respective
//! cadences, and turns inbound OUT reports into commands. Single-
//! threaded cooperative loop. No USB HID descriptor detail leaks past
//! the two callback points — this module only knows report bytes
//! (via [`crate::hid`]), never endpoints.

use heapless::Vec;

use crate::config::{MAX_TRACKERS, ReceiverConfig};
use crate::hid::{self, BundleEntry, DeviceInfoReport, HostCommand, StatusReport};
use crate::ids::TrackerId;

/// Per-tracker runtime view the receiver aggregator exclusively owns.
/// `connected` is a derived flag recomputed by
/// [`TrackerView::recompute_connected`], never written directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerView {
    pub connected: bool,
    pub last_seq: u8,
    pub last_seen_ms: u32,
    pub rssi_dbm: i16,
    pub battery_pct: u8,
    pub flags: u8,
    pub quat: [i16; 4],
    pub accel_mg: [i16; 3],
    /// EWMA packet loss ratio (0..=100); the single source of truth
    /// for loss, derived from sequence-gap accounting.
    pub loss_pct: u8,
    pub mac: [u8; 6],
    pub fw_version: [u8; 2],
    pub paired: bool,
}

impl Default for TrackerView {
    fn default() -> Self {
        Self {
            connected: false,
            last_seq: 0,
            last_seen_ms: 0,
            rssi_dbm: -100,
            battery_pct: 0,
            flags: 0,
            quat: [crate::fixed::ONE, 0, 0, 0],
            accel_mg: [0, 0, 1000],
            loss_pct: 0,
            mac: [0; 6],
            fw_version: [0, 0],
            paired: false,
        }
    }
}

/// EWMA window for sequence-based loss counting.
const LOSS_EWMA_WINDOW: u32 = 8;

impl TrackerView {
    /// Applies a newly-received data packet: sequence-gap loss
    /// accounting (`lost_seq = recv_seq - (last_seq+1)`, wraparound-safe
    /// `u8` subtraction), RSSI/battery/orientation stamping, and the
    /// rising-edge connect flag.
    ///
    /// Returns `true` on a connect rising edge, for the caller to fire
    /// its connect callback.
    pub fn on_data(
        &mut self,
        seq: u8,
        rssi_dbm: i16,
        battery_pct: u8,
        flags: u8,
        quat: [i16; 4],
        accel_mg: [i16; 3],
        now_ms: u32,
    ) -> bool {
        let expected = self.last_seq.wrapping_add(1);
        let lost: u8 = seq.wrapping_sub(expected);
        // `lost` wraps to a large value for a seq that's actually
        // behind (duplicate/reordered); only count forward gaps.
        let lost_count = if lost < 128 { lost as u32 } else { 0 };
        let total = lost_count + 1;
        let sample_pct = (lost_count * 100 / total).min(100);
        self.loss_pct = (((self.loss_pct as u32) * (LOSS_EWMA_WINDOW - 1) + sample_pct)
            / LOSS_EWMA_WINDOW) as u8;

        self.last_seq = seq;
        self.last_seen_ms = now_ms;
        self.rssi_dbm = rssi_dbm;
        self.battery_pct = battery_pct;
        self.flags = flags;
        self.quat = quat;
        self.accel_mg = accel_mg;

        let was_connected = self.connected;
        self.connected = self.paired;
        !was_connected && self.connected
    }

    /// `connected = now - last_seen_ms < TRACKER_TIMEOUT_MS AND
    /// paired_flag`. Returns `true` on a disconnect falling edge.
    pub fn recompute_connected(&mut self, now_ms: u32, timeout_ms: u32) -> bool {
        let was_connected = self.connected;
        self.connected =
            self.paired && now_ms.wrapping_sub(self.last_seen_ms) < timeout_ms;
        was_connected && !self.connected
    }
}

pub struct Aggregator {
    pub views: [TrackerView; MAX_TRACKERS],
    cfg: ReceiverConfig,
    next_bundle_ms: u32,
    next_status_ms: u32,
    next_device_info_ms: u32,
    status_cursor: usize,
    device_info_cursor: usize,
}

impl Aggregator {
    pub fn new(cfg: ReceiverConfig) -> Self {
        Self {
            views: [TrackerView::default(); MAX_TRACKERS],
            cfg,
            next_bundle_ms: 0,
            next_status_ms: 0,
            next_device_info_ms: 0,
            status_cursor: 0,
            device_info_cursor: 0,
        }
    }

    /// Ages out trackers unheard from for `tracker_timeout_ms`,
    /// returning the ids that just transitioned to disconnected.
    pub fn age_out(&mut self, now_ms: u32) -> Vec<TrackerId, MAX_TRACKERS> {
        let mut disconnected = Vec::new();
        for (i, v) in self.views.iter_mut().enumerate() {
            if v.recompute_connected(now_ms, self.cfg.tracker_timeout_ms) {
                let _ = disconnected.push(TrackerId(i as u8));
            }
        }
        disconnected
    }

    /// Emits a bundle report if `bundle_period_ms` has elapsed,
    /// including only entries within the active window — entries
    /// older than the window are omitted.
    pub fn poll_bundle(&mut self, now_ms: u32) -> Option<[u8; hid::REPORT_LEN]> {
        if now_ms.wrapping_sub(self.next_bundle_ms) > u32::MAX / 2 {
            return None;
        }
        self.next_bundle_ms = now_ms.wrapping_add(self.cfg.bundle_period_ms);

        let mut entries: Vec<BundleEntry, { hid::MAX_BUNDLE_ENTRIES }> = Vec::new();
        for (i, v) in self.views.iter().enumerate() {
            if !v.connected {
                continue;
            }
            if now_ms.wrapping_sub(v.last_seen_ms) >= self.cfg.tracker_timeout_ms {
                continue;
            }
            if entries
                .push(BundleEntry {
                    id: TrackerId(i as u8),
                    status: v.flags | 0x01,
                    quat_wxy: [v.quat[0], v.quat[1], v.quat[2]],
                    battery_pct: v.battery_pct,
                    rssi_dbm: v.rssi_dbm,
                })
                .is_err()
            {
                break;
            }
        }
        Some(hid::encode_bundle(&entries))
    }

    /// Round-robins one connected tracker's status report per call,
    /// at `status_period_ms` cadence (~5 Hz).
    pub fn poll_status(&mut self, now_ms: u32) -> Option<[u8; hid::REPORT_LEN]> {
        if now_ms.wrapping_sub(self.next_status_ms) > u32::MAX / 2 {
            return None;
        }
        self.next_status_ms = now_ms.wrapping_add(self.cfg.status_period_ms);

        for _ in 0..MAX_TRACKERS {
            let i = self.status_cursor;
            self.status_cursor = (self.status_cursor + 1) % MAX_TRACKERS;
            let v = &self.views[i];
            if v.connected {
                return Some(hid::encode_status(&StatusReport {
                    id: TrackerId(i as u8),
                    quat: v.quat,
                    accel_mg: v.accel_mg,
                    loss_pct: v.loss_pct,
                    battery_pct: v.battery_pct,
                }));
            }
        }
        None
    }

    /// Round-robins one connected tracker's device-info report per
    /// call, at `device_info_period_ms` cadence (~1 Hz).
    pub fn poll_device_info(&mut self, now_ms: u32) -> Option<[u8; hid::REPORT_LEN]> {
        if now_ms.wrapping_sub(self.next_device_info_ms) > u32::MAX / 2 {
            return None;
        }
        self.next_device_info_ms = now_ms.wrapping_add(self.cfg.device_info_period_ms);

        for _ in 0..MAX_TRACKERS {
            let i = self.device_info_cursor;
            self.device_info_cursor = (self.device_info_cursor + 1) % MAX_TRACKERS;
            let v = &self.views[i];
            if v.connected {
                return Some(hid::encode_device_info(&DeviceInfoReport {
                    id: TrackerId(i as u8),
                    mac: v.mac,
                    fw_version: v.fw_version,
                }));
            }
        }
        None
    }

    /// Decodes an inbound OUT report into a command.
    pub fn decode_inbound(buf: &[u8; hid::REPORT_LEN]) -> Option<HostCommand> {
        hid::decode_command(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn data_packet_flips_connect_edge_once() {
        let mut v = TrackerView::default();
        v.paired = true;
        let edge1 = v.on_data(0, -60, 80, 0, [crate::fixed::ONE, 0, 0, 0], [0, 0, 1000], 10);
        assert!(edge1);
        let edge2 = v.on_data(1, -60, 80, 0, [crate::fixed::ONE, 0, 0, 0], [0, 0, 1000], 15);
        assert!(!edge2);
    }

    #[test]
    fn sequence_gap_counts_as_loss() {
        let mut v = TrackerView::default();
        v.paired = true;
        v.on_data(0, -60, 80, 0, [0, 0, 0, 0], [0, 0, 1000], 10);
        // Jump from seq 0 straight to seq 5: 4 lost in between.
        v.on_data(5, -60, 80, 0, [0, 0, 0, 0], [0, 0, 1000], 15);
        assert!(v.loss_pct > 0);
    }

    #[test]
    fn sequence_wraparound_handled_as_small_gap() {
        let mut v = TrackerView::default();
        v.paired = true;
        v.on_data(255, -60, 80, 0, [0, 0, 0, 0], [0, 0, 1000], 10);
        // 259 mod 256 == 3; expected next is 0, so gap is 3.
        let before = v.loss_pct;
        v.on_data(3, -60, 80, 0, [0, 0, 0, 0], [0, 0, 1000], 15);
        assert!(v.loss_pct >= before);
    }

    #[test]
    fn age_out_fires_disconnect_edge() {
        let cfg = ReceiverConfig::default();
        let mut agg = Aggregator::new(cfg);
        agg.views[0].paired = true;
        agg.views[0].on_data(0, -60, 80, 0, [0, 0, 0, 0], [0, 0, 1000], 0);
        assert!(agg.views[0].connected);

        let disconnected = agg.age_out(cfg.tracker_timeout_ms + 1);
        assert_eq!(disconnected.len(), 1);
        assert_eq!(disconnected[0], TrackerId(0));
        assert!(!agg.views[0].connected);
    }

    #[test]
    fn bundle_omits_stale_entries() {
        let cfg = ReceiverConfig::default();
        let mut agg = Aggregator::new(cfg);
        agg.views[0].paired = true;
        agg.views[0].on_data(0, -60, 80, 0, [0, 0, 0, 0], [0, 0, 1000], 0);
        let buf = agg.poll_bundle(1).unwrap();
        assert_eq!(buf[1], 1); // one entry
    }

    #[test]
    fn status_round_robins_connected_trackers() {
        let cfg = ReceiverConfig::default();
        let mut agg = Aggregator::new(cfg);
        agg.views[0].paired = true;
        agg.views[0].on_data(0, -60, 80, 0, [1, 2, 3, 4], [0, 0, 1000], 0);
        agg.views[2].paired = true;
        agg.views[2].on_data(0, -70, 50, 0, [5, 6, 7, 8], [0, 0, 1000], 0);

        let buf = agg.poll_status(1).unwrap();
        let got = hid::decode_status(&buf).unwrap();
        assert_eq!(got.id, TrackerId(0));
    }

    #[test]
    fn inbound_command_decodes() {
        let buf = hid::encode_command(HostCommand::Ping);
        assert_eq!(Aggregator::decode_inbound(&buf), Some(HostCommand::Ping));
    }
}
