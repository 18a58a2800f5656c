//! Non-volatile storage trait and the two fixed persisted records:
//! the pairing blob and the crash snapshot. Both records are
//! magic-prefixed and CRC-suffixed, following the same
//! encode/decode-with-trailing-CRC shape as [`crate::codec`]. The
//! crash snapshot is a separate single-record persisted structure
//! with its own magic word and CRC.

use byteorder::{ByteOrder, LittleEndian};
use core::fmt::Debug;
use heapless::Vec;

use crate::codec::crc::crc16_ccitt;
use crate::config::MAX_TRACKERS;
use crate::ids::{MacAddress, NetworkKey, TrackerId};

/// Page-aligned non-volatile storage contract.
pub trait NvStorage {
    type Error: Debug + Clone;

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn erase(&mut self, offset: u32, len: u32) -> Result<(), Self::Error>;
    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), Self::Error>;
}

/// Magic word for the pairing blob: `0x52584E` / `0x534C494D` (two
/// halves of a single 64-bit magic carried across the blob's first
/// 8 bytes).
pub const PAIRING_MAGIC_LO: u32 = 0x0052_584E;
pub const PAIRING_MAGIC_HI: u32 = 0x534C_494D;

/// Magic word for the crash snapshot record: `0x43525348`.
pub const CRASH_MAGIC: u32 = 0x4352_5348;

/// One pairing table entry: `TrackerId -> {MacAddress, paired_flag}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairingEntry {
    pub mac: [u8; 6],
    pub paired: bool,
}

/// The Receiver's full persisted pairing configuration: network key
/// plus up to `MAX_TRACKERS` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingConfig {
    pub network_key: NetworkKey,
    pub entries: [PairingEntry; MAX_TRACKERS],
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            network_key: NetworkKey(0),
            entries: [PairingEntry::default(); MAX_TRACKERS],
        }
    }
}

/// Wire size of the encoded pairing blob: two magic words (8) +
/// network key (4) + `MAX_TRACKERS * 7` entries (mac[6] + paired flag
/// byte) + crc (2).
pub const PAIRING_BLOB_LEN: usize = 8 + 4 + MAX_TRACKERS * 7 + 2;

impl PairingConfig {
    pub fn encode(&self) -> Vec<u8, PAIRING_BLOB_LEN> {
        let mut buf = [0u8; PAIRING_BLOB_LEN];
        LittleEndian::write_u32(&mut buf[0..4], PAIRING_MAGIC_LO);
        LittleEndian::write_u32(&mut buf[4..8], PAIRING_MAGIC_HI);
        LittleEndian::write_u32(&mut buf[8..12], self.network_key.0);
        for (i, e) in self.entries.iter().enumerate() {
            let off = 12 + i * 7;
            buf[off..off + 6].copy_from_slice(&e.mac);
            buf[off + 6] = e.paired as u8;
        }
        let body_len = PAIRING_BLOB_LEN - 2;
        let crc = crc16_ccitt(&buf[..body_len]);
        LittleEndian::write_u16(&mut buf[body_len..], crc);
        Vec::from_slice(&buf).unwrap()
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < PAIRING_BLOB_LEN {
            return None;
        }
        if LittleEndian::read_u32(&buf[0..4]) != PAIRING_MAGIC_LO
            || LittleEndian::read_u32(&buf[4..8]) != PAIRING_MAGIC_HI
        {
            return None;
        }
        let body_len = PAIRING_BLOB_LEN - 2;
        let expect = crc16_ccitt(&buf[..body_len]);
        let got = LittleEndian::read_u16(&buf[body_len..PAIRING_BLOB_LEN]);
        if expect != got {
            return None;
        }
        let network_key = NetworkKey(LittleEndian::read_u32(&buf[8..12]));
        let mut entries = [PairingEntry::default(); MAX_TRACKERS];
        for (i, e) in entries.iter_mut().enumerate() {
            let off = 12 + i * 7;
            e.mac.copy_from_slice(&buf[off..off + 6]);
            e.paired = buf[off + 6] != 0;
        }
        Some(PairingConfig { network_key, entries })
    }

    /// Finds the tracker id owning `mac`, if paired. A paired slot is
    /// owned by exactly one MAC.
    pub fn find_mac(&self, mac: MacAddress) -> Option<TrackerId> {
        self.entries
            .iter()
            .position(|e| e.paired && e.mac == mac.0)
            .map(|i| TrackerId(i as u8))
    }

    /// Finds the first unpaired slot.
    pub fn free_slot(&self) -> Option<TrackerId> {
        self.entries
            .iter()
            .position(|e| !e.paired)
            .map(|i| TrackerId(i as u8))
    }

    pub fn pair(&mut self, id: TrackerId, mac: MacAddress) {
        if let Some(e) = self.entries.get_mut(id.0 as usize) {
            e.mac = mac.0;
            e.paired = true;
        }
    }

    pub fn unpair(&mut self, id: TrackerId) {
        if let Some(e) = self.entries.get_mut(id.0 as usize) {
            *e = PairingEntry::default();
        }
    }

    pub fn paired_count(&self) -> usize {
        self.entries.iter().filter(|e| e.paired).count()
    }
}

/// Fatal event kinds recorded in a crash snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashKind {
    None,
    RadioInitFailed,
    SensorInitFailed,
    RecoveryExhausted,
    SlotAbort,
}

impl CrashKind {
    fn raw(self) -> u8 {
        match self {
            CrashKind::None => 0,
            CrashKind::RadioInitFailed => 1,
            CrashKind::SensorInitFailed => 2,
            CrashKind::RecoveryExhausted => 3,
            CrashKind::SlotAbort => 4,
        }
    }

    fn from_raw(raw: u8) -> CrashKind {
        match raw {
            1 => CrashKind::RadioInitFailed,
            2 => CrashKind::SensorInitFailed,
            3 => CrashKind::RecoveryExhausted,
            4 => CrashKind::SlotAbort,
            _ => CrashKind::None,
        }
    }
}

/// Crash snapshot record: PC/SP/RA/kind + counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashSnapshot {
    pub pc: u32,
    pub sp: u32,
    pub ra: u32,
    pub kind: CrashKind,
    pub counter: u32,
}

pub const CRASH_SNAPSHOT_LEN: usize = 4 + 4 + 4 + 4 + 1 + 4 + 2;

impl CrashSnapshot {
    pub fn encode(&self) -> [u8; CRASH_SNAPSHOT_LEN] {
        let mut buf = [0u8; CRASH_SNAPSHOT_LEN];
        LittleEndian::write_u32(&mut buf[0..4], CRASH_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.pc);
        LittleEndian::write_u32(&mut buf[8..12], self.sp);
        LittleEndian::write_u32(&mut buf[12..16], self.ra);
        buf[16] = self.kind.raw();
        LittleEndian::write_u32(&mut buf[17..21], self.counter);
        let crc = crc16_ccitt(&buf[..21]);
        LittleEndian::write_u16(&mut buf[21..23], crc);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < CRASH_SNAPSHOT_LEN {
            return None;
        }
        if LittleEndian::read_u32(&buf[0..4]) != CRASH_MAGIC {
            return None;
        }
        let expect = crc16_ccitt(&buf[..21]);
        let got = LittleEndian::read_u16(&buf[21..23]);
        if expect != got {
            return None;
        }
        Some(CrashSnapshot {
            pc: LittleEndian::read_u32(&buf[4..8]),
            sp: LittleEndian::read_u32(&buf[8..12]),
            ra: LittleEndian::read_u32(&buf[12..16]),
            kind: CrashKind::from_raw(buf[16]),
            counter: LittleEndian::read_u32(&buf[17..21]),
        })
    }
}

/// Fixed offsets a real flash layout would use; storage backends are
/// free to remap these, the crate only ever reads/writes at these
/// logical offsets.
pub const PAIRING_OFFSET: u32 = 0;
pub const CRASH_SNAPSHOT_OFFSET: u32 = 4096;

/// Loads the pairing blob, falling back to `UNPAIRED` on any read
/// fault or CRC/magic mismatch.
pub fn load_pairing<S: NvStorage>(storage: &mut S) -> Option<PairingConfig> {
    let mut buf = [0u8; PAIRING_BLOB_LEN];
    storage.read(PAIRING_OFFSET, &mut buf).ok()?;
    PairingConfig::decode(&buf)
}

pub fn save_pairing<S: NvStorage>(storage: &mut S, cfg: &PairingConfig) -> Result<(), S::Error> {
    let blob = cfg.encode();
    storage.write(PAIRING_OFFSET, &blob)
}

/// Loads and clears the crash snapshot.
pub fn take_crash_snapshot<S: NvStorage>(storage: &mut S) -> Option<CrashSnapshot> {
    let mut buf = [0u8; CRASH_SNAPSHOT_LEN];
    storage.read(CRASH_SNAPSHOT_OFFSET, &mut buf).ok()?;
    let snap = CrashSnapshot::decode(&buf)?;
    let zero = [0u8; CRASH_SNAPSHOT_LEN];
    let _ = storage.write(CRASH_SNAPSHOT_OFFSET, &zero);
    Some(snap)
}

pub fn save_crash_snapshot<S: NvStorage>(storage: &mut S, snap: &CrashSnapshot) -> Result<(), S::Error> {
    storage.write(CRASH_SNAPSHOT_OFFSET, &snap.encode())
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::*;
    use heapless::Vec;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockStorageError;

    /// A flat in-memory byte array standing in for flash; large
    /// enough to hold both fixed records with headroom.
    pub struct MockStorage {
        pub bytes: Vec<u8, 8192>,
    }

    impl Default for MockStorage {
        fn default() -> Self {
            let mut bytes = Vec::new();
            bytes.resize(8192, 0xFF).unwrap();
            Self { bytes }
        }
    }

    impl MockStorage {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl NvStorage for MockStorage {
        type Error = MockStorageError;

        fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
            let off = offset as usize;
            if off + buf.len() > self.bytes.len() {
                return Err(MockStorageError);
            }
            buf.copy_from_slice(&self.bytes[off..off + buf.len()]);
            Ok(())
        }

        fn erase(&mut self, offset: u32, len: u32) -> Result<(), Self::Error> {
            let off = offset as usize;
            let end = off + len as usize;
            if end > self.bytes.len() {
                return Err(MockStorageError);
            }
            for b in &mut self.bytes[off..end] {
                *b = 0xFF;
            }
            Ok(())
        }

        fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), Self::Error> {
            let off = offset as usize;
            if off + buf.len() > self.bytes.len() {
                return Err(MockStorageError);
            }
            self.bytes[off..off + buf.len()].copy_from_slice(buf);
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use super::mock::MockStorage;

    #[test]
    fn pairing_round_trips() {
        let mut cfg = PairingConfig::default();
        cfg.network_key = NetworkKey(0xCAFEBABE);
        cfg.pair(TrackerId(0), MacAddress([0x02, 0, 0, 0x12, 0x34, 0x56]));

        let mut storage = MockStorage::new();
        save_pairing(&mut storage, &cfg).unwrap();
        let back = load_pairing(&mut storage).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn invalid_record_falls_back_to_none() {
        let mut storage = MockStorage::new();
        // 0xFF-filled flash never matches the magic.
        assert!(load_pairing(&mut storage).is_none());
    }

    #[test]
    fn bit_flip_invalidates_crc() {
        let cfg = PairingConfig::default();
        let mut storage = MockStorage::new();
        save_pairing(&mut storage, &cfg).unwrap();
        let mut buf = [0u8; PAIRING_BLOB_LEN];
        storage.read(PAIRING_OFFSET, &mut buf).unwrap();
        buf[20] ^= 0xFF;
        storage.write(PAIRING_OFFSET, &buf).unwrap();
        assert!(load_pairing(&mut storage).is_none());
    }

    #[test]
    fn crash_snapshot_round_trips_and_clears_on_read() {
        let snap = CrashSnapshot {
            pc: 0x1000,
            sp: 0x2000,
            ra: 0x1004,
            kind: CrashKind::RecoveryExhausted,
            counter: 7,
        };
        let mut storage = MockStorage::new();
        save_crash_snapshot(&mut storage, &snap).unwrap();
        let back = take_crash_snapshot(&mut storage).unwrap();
        assert_eq!(back, snap);
        assert!(take_crash_snapshot(&mut storage).is_none());
    }

    #[test]
    fn find_mac_respects_paired_flag() {
        let mut cfg = PairingConfig::default();
        let mac = MacAddress([0x02, 0, 0, 0x12, 0x34, 0x56]);
        assert_eq!(cfg.find_mac(mac), None);
        cfg.pair(TrackerId(2), mac);
        assert_eq!(cfg.find_mac(mac), Some(TrackerId(2)));
    }
}
