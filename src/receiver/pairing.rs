//! Pairing controller: the receiver-side half of the cold-pair
//! handshake, handling `PAIR_REQUEST`/`PAIR_CONFIRM`. Operates
//! directly on the persisted [`crate::storage::PairingConfig`] table;
//! its invariant (a paired slot is owned by exactly one MAC) is
//! enforced there.

use log::info;

use crate::codec::{PairConfirm, PairRequest, PairResponse};
use crate::ids::{MacAddress, NetworkKey, TrackerId};
use crate::storage::PairingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// A `PAIR_RESPONSE` should be sent back with this assignment.
    Assigned { tracker_id: TrackerId },
    /// No free slot and no matching MAC — request is dropped.
    NoFreeSlot,
}

/// Finds a free slot, or the matching MAC's existing slot — a retried
/// request from an already-assigned MAC gets the same slot back
/// rather than consuming a second one.
pub fn handle_pair_request(
    table: &mut PairingConfig,
    receiver_mac: MacAddress,
    req: &PairRequest,
) -> (PairOutcome, Option<PairResponse>) {
    let slot = table.find_mac(req.mac).or_else(|| table.free_slot());
    match slot {
        Some(id) => {
            info!("pairing: assigning tracker_id={} to {:?}", id.0, req.mac);
            let resp = PairResponse {
                mac: req.mac,
                tracker_id: id,
                receiver_mac,
                network_key: table.network_key,
            };
            (PairOutcome::Assigned { tracker_id: id }, Some(resp))
        }
        None => (PairOutcome::NoFreeSlot, None),
    }
}

/// Activates the slot with the confirmed MAC, resetting its stats.
/// Returns `true` if the confirm matched a slot this controller had
/// just offered (status 0 = success).
pub fn handle_pair_confirm(table: &mut PairingConfig, confirm: &PairConfirm) -> bool {
    if confirm.status != 0 {
        return false;
    }
    table.pair(confirm.tracker_id, confirm.mac);
    info!("pairing: confirmed tracker_id={}", confirm.tracker_id.0);
    true
}

/// Generates a fresh network key for a newly-provisioned receiver.
/// Exposed as a thin wrapper over the RNG source so call sites don't
/// reach into `rand_core` directly.
pub fn generate_network_key(rng: &mut impl rand_core::RngCore) -> NetworkKey {
    NetworkKey(rng.next_u32())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cold_pair_assigns_slot_zero_and_responds() {
        let mut table = PairingConfig::default();
        table.network_key = NetworkKey(0xCAFEBABE);
        let receiver_mac = MacAddress([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let req = PairRequest {
            mac: MacAddress([0x02, 0x00, 0x00, 0x12, 0x34, 0x56]),
            device_type: 1,
            fw_version: [1, 0],
        };
        let (outcome, resp) = handle_pair_request(&mut table, receiver_mac, &req);
        assert_eq!(outcome, PairOutcome::Assigned { tracker_id: TrackerId(0) });
        let resp = resp.unwrap();
        assert_eq!(resp.tracker_id, TrackerId(0));
        assert_eq!(resp.network_key, NetworkKey(0xCAFEBABE));

        let confirm = PairConfirm {
            tracker_id: TrackerId(0),
            mac: req.mac,
            status: 0,
        };
        assert!(handle_pair_confirm(&mut table, &confirm));
        assert_eq!(table.paired_count(), 1);
        assert!(table.entries[0].paired);
    }

    #[test]
    fn retry_from_same_mac_reuses_slot() {
        let mut table = PairingConfig::default();
        let receiver_mac = MacAddress([0x02, 0, 0, 0, 0, 1]);
        let req = PairRequest {
            mac: MacAddress([0x02, 0, 0, 0, 0, 2]),
            device_type: 0,
            fw_version: [0, 0],
        };
        let (o1, _) = handle_pair_request(&mut table, receiver_mac, &req);
        table.pair(TrackerId(0), req.mac);
        let (o2, _) = handle_pair_request(&mut table, receiver_mac, &req);
        assert_eq!(o1, o2);
    }

    #[test]
    fn no_free_slot_is_reported() {
        let mut table = PairingConfig::default();
        for i in 0..crate::config::MAX_TRACKERS {
            table.pair(TrackerId(i as u8), MacAddress([i as u8; 6]));
        }
        let receiver_mac = MacAddress([0x02, 0, 0, 0, 0, 1]);
        let req = PairRequest {
            mac: MacAddress([0xFF; 6]),
            device_type: 0,
            fw_version: [0, 0],
        };
        let (outcome, resp) = handle_pair_request(&mut table, receiver_mac, &req);
        assert_eq!(outcome, PairOutcome::NoFreeSlot);
        assert!(resp.is_none());
    }

    #[test]
    fn failed_confirm_status_does_not_activate() {
        let mut table = PairingConfig::default();
        let confirm = PairConfirm {
            tracker_id: TrackerId(0),
            mac: MacAddress([1; 6]),
            status: 1,
        };
        assert!(!handle_pair_confirm(&mut table, &confirm));
        assert_eq!(table.paired_count(), 0);
    }
}
