//! Wire codec for the six frame types: sync beacon, tracker data
//! (standard + Ultra), ACK, pair request/response/confirm.
//!
//! All frames are little-endian with a trailing CRC16-CCITT computed
//! over everything preceding it. `decode` never returns a partially
//! valid frame: any length, magic or CRC mismatch is a hard error, and
//! every `encode` is total (it cannot omit the trailing CRC — the
//! return value is the frame's wire length including it).
//!
//! Standard and Ultra data frames are distinguished by a dedicated
//! format discriminator in the high bit of the type byte (see
//! [`FrameType`]) rather than by length alone, so a future frame that
//! happens to share a length can't be misread as the wrong format.
//! The pairing-request type byte is a concrete `0x20`.

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::crc::crc16_ccitt;
use crate::ids::{MacAddress, NetworkKey, TrackerId};

pub mod crc;
pub mod ultra;

pub use ultra::UltraData;

/// Bit set on the type byte of a [`FrameType::Data`] frame to select
/// the Ultra wire format instead of the 21-byte standard one.
pub const ULTRA_BIT: u8 = 0x80;
const TYPE_MASK: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    SyncBeacon,
    Data,
    Ack,
    PairRequest,
    PairResponse,
    PairConfirm,
}

impl FrameType {
    fn raw(self) -> u8 {
        match self {
            FrameType::SyncBeacon => 0x01,
            FrameType::Data => 0x02,
            FrameType::Ack => 0x03,
            FrameType::PairRequest => 0x20,
            FrameType::PairResponse => 0x21,
            FrameType::PairConfirm => 0x22,
        }
    }

    fn from_raw(raw: u8) -> Option<FrameType> {
        match raw & TYPE_MASK {
            0x01 => Some(FrameType::SyncBeacon),
            0x02 => Some(FrameType::Data),
            0x03 => Some(FrameType::Ack),
            0x20 => Some(FrameType::PairRequest),
            0x21 => Some(FrameType::PairResponse),
            0x22 => Some(FrameType::PairConfirm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer too short to contain even a header.
    Truncated,
    /// Type byte not recognised.
    BadMagic,
    /// `len` field did not match the frame type's expected wire length.
    BadLen,
    /// Trailing CRC did not match.
    BadCrc,
}

fn check_crc(buf: &[u8]) -> Result<(), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::Truncated);
    }
    let (body, trailer) = buf.split_at(buf.len() - 2);
    let expect = crc16_ccitt(body);
    let got = LittleEndian::read_u16(trailer);
    if expect != got {
        return Err(DecodeError::BadCrc);
    }
    Ok(())
}

fn write_crc(buf: &mut [u8], body_len: usize) -> usize {
    let crc = crc16_ccitt(&buf[..body_len]);
    LittleEndian::write_u16(&mut buf[body_len..body_len + 2], crc);
    body_len + 2
}

/// Clamps a Q15-scaled f32-derived or already-scaled `i32` accumulator
/// into the wire's `i16` slot rather than letting it wrap.
pub(crate) fn clamp_i16(v: i32) -> i16 {
    crate::fixed::clamp_i32(v)
}

// ---------------------------------------------------------------- //
// Sync beacon — 16 bytes: type, len, frame_no u16, active_mask[2],
// next_channels[5], tx_power, reserved[2], crc u16.
// ---------------------------------------------------------------- //

pub const SYNC_BEACON_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBeacon {
    pub frame_number: u16,
    pub active_mask: [u8; 2],
    pub next_channels: [u8; 5],
    pub tx_power: i8,
}

impl SyncBeacon {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if buf.len() < SYNC_BEACON_LEN {
            return Err(DecodeError::Truncated);
        }
        buf[0] = FrameType::SyncBeacon.raw();
        buf[1] = SYNC_BEACON_LEN as u8;
        LittleEndian::write_u16(&mut buf[2..4], self.frame_number);
        buf[4..6].copy_from_slice(&self.active_mask);
        buf[6..11].copy_from_slice(&self.next_channels);
        buf[11] = self.tx_power as u8;
        buf[12] = 0;
        buf[13] = 0;
        Ok(write_crc(buf, 14))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < SYNC_BEACON_LEN {
            return Err(DecodeError::Truncated);
        }
        if FrameType::from_raw(buf[0]) != Some(FrameType::SyncBeacon) {
            return Err(DecodeError::BadMagic);
        }
        if buf[1] as usize != SYNC_BEACON_LEN {
            return Err(DecodeError::BadLen);
        }
        check_crc(&buf[..SYNC_BEACON_LEN])?;

        let mut active_mask = [0u8; 2];
        active_mask.copy_from_slice(&buf[4..6]);
        let mut next_channels = [0u8; 5];
        next_channels.copy_from_slice(&buf[6..11]);

        Ok(SyncBeacon {
            frame_number: LittleEndian::read_u16(&buf[2..4]),
            active_mask,
            next_channels,
            tx_power: buf[11] as i8,
        })
    }
}

// ---------------------------------------------------------------- //
// Standard tracker data — 22 bytes: type, len, tracker_id, seq,
// quat_wxyz i16x4 (Q15), accel_xyz i16x3 (mg), batt, flags, crc.
// ---------------------------------------------------------------- //

pub const TRACKER_DATA_LEN: usize = 22;

bitflags::bitflags! {
    #[derive(Default)]
    pub struct DataFlags: u8 {
        const CALIBRATING = 0b0000_0001;
        const RESTING     = 0b0000_0010;
        const LOW_BATTERY = 0b0000_0100;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerData {
    pub tracker_id: TrackerId,
    pub seq: u8,
    /// Q15, order w, x, y, z.
    pub quat: [i16; 4],
    /// Milli-g, order x, y, z.
    pub accel_mg: [i16; 3],
    pub battery_pct: u8,
    pub flags: DataFlags,
}

impl TrackerData {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if buf.len() < TRACKER_DATA_LEN {
            return Err(DecodeError::Truncated);
        }
        buf[0] = FrameType::Data.raw();
        buf[1] = TRACKER_DATA_LEN as u8;
        buf[2] = self.tracker_id.0;
        buf[3] = self.seq;
        for (i, &c) in self.quat.iter().enumerate() {
            LittleEndian::write_i16(&mut buf[4 + i * 2..6 + i * 2], c);
        }
        for (i, &c) in self.accel_mg.iter().enumerate() {
            LittleEndian::write_i16(&mut buf[12 + i * 2..14 + i * 2], c);
        }
        buf[18] = self.battery_pct;
        buf[19] = self.flags.bits();
        Ok(write_crc(buf, 20))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < TRACKER_DATA_LEN {
            return Err(DecodeError::Truncated);
        }
        if FrameType::from_raw(buf[0]) != Some(FrameType::Data) || buf[0] & ULTRA_BIT != 0 {
            return Err(DecodeError::BadMagic);
        }
        if buf[1] as usize != TRACKER_DATA_LEN {
            return Err(DecodeError::BadLen);
        }
        check_crc(&buf[..TRACKER_DATA_LEN])?;

        let mut quat = [0i16; 4];
        for (i, c) in quat.iter_mut().enumerate() {
            *c = LittleEndian::read_i16(&buf[4 + i * 2..6 + i * 2]);
        }
        let mut accel_mg = [0i16; 3];
        for (i, c) in accel_mg.iter_mut().enumerate() {
            *c = LittleEndian::read_i16(&buf[12 + i * 2..14 + i * 2]);
        }

        Ok(TrackerData {
            tracker_id: TrackerId(buf[2]),
            seq: buf[3],
            quat,
            accel_mg,
            battery_pct: buf[18],
            flags: DataFlags::from_bits_truncate(buf[19]),
        })
    }
}

// ---------------------------------------------------------------- //
// ACK — 8 bytes: type, len, tracker_id, ack_seq, command, param, crc.
// ---------------------------------------------------------------- //

pub const ACK_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCommand {
    None,
    Calibrate,
    Tare,
    Sleep,
    Unpair,
}

impl AckCommand {
    fn raw(self) -> u8 {
        match self {
            AckCommand::None => 0,
            AckCommand::Calibrate => 1,
            AckCommand::Tare => 2,
            AckCommand::Sleep => 3,
            AckCommand::Unpair => 4,
        }
    }

    fn from_raw(raw: u8) -> AckCommand {
        match raw {
            1 => AckCommand::Calibrate,
            2 => AckCommand::Tare,
            3 => AckCommand::Sleep,
            4 => AckCommand::Unpair,
            _ => AckCommand::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub tracker_id: TrackerId,
    pub ack_seq: u8,
    pub command: AckCommand,
    pub param: u8,
}

impl Ack {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if buf.len() < ACK_LEN {
            return Err(DecodeError::Truncated);
        }
        buf[0] = FrameType::Ack.raw();
        buf[1] = ACK_LEN as u8;
        buf[2] = self.tracker_id.0;
        buf[3] = self.ack_seq;
        buf[4] = self.command.raw();
        buf[5] = self.param;
        Ok(write_crc(buf, 6))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < ACK_LEN {
            return Err(DecodeError::Truncated);
        }
        if FrameType::from_raw(buf[0]) != Some(FrameType::Ack) {
            return Err(DecodeError::BadMagic);
        }
        if buf[1] as usize != ACK_LEN {
            return Err(DecodeError::BadLen);
        }
        check_crc(&buf[..ACK_LEN])?;

        Ok(Ack {
            tracker_id: TrackerId(buf[2]),
            ack_seq: buf[3],
            command: AckCommand::from_raw(buf[4]),
            param: buf[5],
        })
    }
}

// ---------------------------------------------------------------- //
// Pair request — 13 bytes: type, len, mac[6], device_type, fw[2], crc.
// ---------------------------------------------------------------- //

pub const PAIR_REQUEST_LEN: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairRequest {
    pub mac: MacAddress,
    pub device_type: u8,
    pub fw_version: [u8; 2],
}

impl PairRequest {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if buf.len() < PAIR_REQUEST_LEN {
            return Err(DecodeError::Truncated);
        }
        buf[0] = FrameType::PairRequest.raw();
        buf[1] = PAIR_REQUEST_LEN as u8;
        buf[2..8].copy_from_slice(&self.mac.0);
        buf[8] = self.device_type;
        buf[9..11].copy_from_slice(&self.fw_version);
        Ok(write_crc(buf, 11))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < PAIR_REQUEST_LEN {
            return Err(DecodeError::Truncated);
        }
        if FrameType::from_raw(buf[0]) != Some(FrameType::PairRequest) {
            return Err(DecodeError::BadMagic);
        }
        if buf[1] as usize != PAIR_REQUEST_LEN {
            return Err(DecodeError::BadLen);
        }
        check_crc(&buf[..PAIR_REQUEST_LEN])?;

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&buf[2..8]);
        let mut fw_version = [0u8; 2];
        fw_version.copy_from_slice(&buf[9..11]);

        Ok(PairRequest {
            mac: MacAddress(mac),
            device_type: buf[8],
            fw_version,
        })
    }
}

// ---------------------------------------------------------------- //
// Pair response — 21 bytes: type, len, mac[6], tracker_id,
// receiver_mac[6], network_key u32, crc.
// ---------------------------------------------------------------- //

pub const PAIR_RESPONSE_LEN: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairResponse {
    pub mac: MacAddress,
    pub tracker_id: TrackerId,
    pub receiver_mac: MacAddress,
    pub network_key: NetworkKey,
}

impl PairResponse {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if buf.len() < PAIR_RESPONSE_LEN {
            return Err(DecodeError::Truncated);
        }
        buf[0] = FrameType::PairResponse.raw();
        buf[1] = PAIR_RESPONSE_LEN as u8;
        buf[2..8].copy_from_slice(&self.mac.0);
        buf[8] = self.tracker_id.0;
        buf[9..15].copy_from_slice(&self.receiver_mac.0);
        LittleEndian::write_u32(&mut buf[15..19], self.network_key.0);
        Ok(write_crc(buf, 19))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < PAIR_RESPONSE_LEN {
            return Err(DecodeError::Truncated);
        }
        if FrameType::from_raw(buf[0]) != Some(FrameType::PairResponse) {
            return Err(DecodeError::BadMagic);
        }
        if buf[1] as usize != PAIR_RESPONSE_LEN {
            return Err(DecodeError::BadLen);
        }
        check_crc(&buf[..PAIR_RESPONSE_LEN])?;

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&buf[2..8]);
        let mut receiver_mac = [0u8; 6];
        receiver_mac.copy_from_slice(&buf[9..15]);

        Ok(PairResponse {
            mac: MacAddress(mac),
            tracker_id: TrackerId(buf[8]),
            receiver_mac: MacAddress(receiver_mac),
            network_key: NetworkKey(LittleEndian::read_u32(&buf[15..19])),
        })
    }
}

// ---------------------------------------------------------------- //
// Pair confirm — 12 bytes: type, len, tracker_id, mac[6], status, crc.
// ---------------------------------------------------------------- //

pub const PAIR_CONFIRM_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairConfirm {
    pub tracker_id: TrackerId,
    pub mac: MacAddress,
    pub status: u8,
}

impl PairConfirm {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if buf.len() < PAIR_CONFIRM_LEN {
            return Err(DecodeError::Truncated);
        }
        buf[0] = FrameType::PairConfirm.raw();
        buf[1] = PAIR_CONFIRM_LEN as u8;
        buf[2] = self.tracker_id.0;
        buf[3..9].copy_from_slice(&self.mac.0);
        buf[9] = self.status;
        Ok(write_crc(buf, 10))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < PAIR_CONFIRM_LEN {
            return Err(DecodeError::Truncated);
        }
        if FrameType::from_raw(buf[0]) != Some(FrameType::PairConfirm) {
            return Err(DecodeError::BadMagic);
        }
        if buf[1] as usize != PAIR_CONFIRM_LEN {
            return Err(DecodeError::BadLen);
        }
        check_crc(&buf[..PAIR_CONFIRM_LEN])?;

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&buf[3..9]);

        Ok(PairConfirm {
            tracker_id: TrackerId(buf[2]),
            mac: MacAddress(mac),
            status: buf[9],
        })
    }
}

/// Selects which wire format a tracker's outgoing data frame uses.
/// `decode_frame` always accepts either format via the type byte's
/// Ultra bit regardless of which policy the sender runs — the policy
/// only governs what a tracker chooses to *send*.
pub trait FormatPolicy {
    fn select(&mut self, loss_pct: u8) -> DataFormat;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Standard,
    Ultra,
}

/// Always sends the 21-byte standard frame. Declining Ultra entirely
/// means all parties fall back to the standard frame; this is the
/// default policy.
pub struct StandardOnlyPolicy;

impl FormatPolicy for StandardOnlyPolicy {
    fn select(&mut self, _loss_pct: u8) -> DataFormat {
        DataFormat::Standard
    }
}

/// Drops to the 12-byte Ultra frame once the link's loss rate crosses
/// `threshold_pct` — "links too marginal to carry full precision"
/// (`codec::ultra` module docs) — and returns to Standard once it
/// recovers, with a few points of hysteresis so it doesn't flap at
/// the boundary.
pub struct UltraWhenMarginalPolicy {
    threshold_pct: u8,
    current: DataFormat,
}

impl UltraWhenMarginalPolicy {
    pub fn new(threshold_pct: u8) -> Self {
        Self {
            threshold_pct,
            current: DataFormat::Standard,
        }
    }
}

impl FormatPolicy for UltraWhenMarginalPolicy {
    fn select(&mut self, loss_pct: u8) -> DataFormat {
        const HYSTERESIS_PCT: u8 = 10;
        self.current = match self.current {
            DataFormat::Standard if loss_pct > self.threshold_pct => DataFormat::Ultra,
            DataFormat::Ultra if loss_pct + HYSTERESIS_PCT < self.threshold_pct => {
                DataFormat::Standard
            }
            other => other,
        };
        self.current
    }
}

/// Encodes `data` in the requested format, downsampling to Ultra's
/// precision when selected: sign-normalized quaternion, accel Z
/// only, 4-bit battery.
pub fn encode_data_frame(
    format: DataFormat,
    data: &TrackerData,
    buf: &mut [u8],
) -> Result<usize, DecodeError> {
    match format {
        DataFormat::Standard => data.encode(buf),
        DataFormat::Ultra => {
            let quat = normalize_w_nonneg(data.quat);
            UltraData {
                tracker_id: data.tracker_id,
                seq: data.seq,
                quat_xyz: [quat[1], quat[2], quat[3]],
                accel_z_mg: data.accel_mg[2],
                battery_pct: data.battery_pct,
            }
            .encode(buf)
        }
    }
}

/// Flips a quaternion's sign so `w >= 0`. `q` and `-q` represent the
/// same orientation, so this is lossless — it just commits to one
/// convention on emit.
fn normalize_w_nonneg(q: [i16; 4]) -> [i16; 4] {
    if q[0] < 0 {
        [
            q[0].saturating_neg(),
            q[1].saturating_neg(),
            q[2].saturating_neg(),
            q[3].saturating_neg(),
        ]
    } else {
        q
    }
}

/// Any decoded frame, for callers that dispatch on the air-interface
/// type byte without knowing the expected frame ahead of time (the
/// receiver's RX handler; the tracker mostly knows what it expects).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    SyncBeacon(SyncBeacon),
    Data(TrackerData),
    DataUltra(UltraData),
    Ack(Ack),
    PairRequest(PairRequest),
    PairResponse(PairResponse),
    PairConfirm(PairConfirm),
}

pub fn decode_frame(buf: &[u8]) -> Result<Frame, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::Truncated);
    }
    let ultra = buf[0] & ULTRA_BIT != 0;
    match FrameType::from_raw(buf[0]) {
        Some(FrameType::SyncBeacon) => SyncBeacon::decode(buf).map(Frame::SyncBeacon),
        Some(FrameType::Data) if ultra => UltraData::decode(buf).map(Frame::DataUltra),
        Some(FrameType::Data) => TrackerData::decode(buf).map(Frame::Data),
        Some(FrameType::Ack) => Ack::decode(buf).map(Frame::Ack),
        Some(FrameType::PairRequest) => PairRequest::decode(buf).map(Frame::PairRequest),
        Some(FrameType::PairResponse) => PairResponse::decode(buf).map(Frame::PairResponse),
        Some(FrameType::PairConfirm) => PairConfirm::decode(buf).map(Frame::PairConfirm),
        None => Err(DecodeError::BadMagic),
    }
}
