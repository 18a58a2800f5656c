//! Radio PHY abstraction (C1).
//!
//! A marker trait combining the `radio` crate's component traits —
//! `radio::State + radio::Busy + radio::Transmit + radio::Receive +
//! radio::Rssi` — extended with [`Power`] (software TX-power
//! stepping) and [`Timing`] (the microsecond timer / periodic
//! callback), following the PA-level and channel-setter conventions
//! common to nRF24L01/CC1101-style transceiver drivers.

use core::fmt::Debug;

/// Radio operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Tx,
    Rx,
    Standby,
    Sleep,
}

/// Outcome of a blocking `transmit_with_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// An ACK was received; payload length is reported for callers
    /// that stage a piggybacked command in the ACK payload.
    Acked { payload_len: usize },
    /// No ACK arrived within the bounded wait.
    NoAck,
}

/// Software TX-power control, in whole dBm steps (`{-20,-10,-5,0,
/// 1,2,3,4}`). Kept separate from the base `radio` traits since
/// not every backing silicon exposes a variable PA level.
pub trait Power {
    type Error: Debug + Clone;

    fn set_tx_power(&mut self, dbm: i8) -> Result<(), Self::Error>;
}

/// Microsecond timing services a radio backend must expose so the
/// TDMA engines can bound their waits without a separate peripheral.
pub trait Timing {
    type Error: Debug + Clone;

    fn get_time_us(&self) -> u32;
}

/// Full Radio PHY contract.
///
/// `init`/`set_channel`/`set_sync_word`/`flush_tx`/`flush_rx`/
/// `set_ack_payload` are additions beyond the `radio` crate's generic
/// traits, generalized into one boundary so `tracker::engine`/
/// `receiver::engine` stay radio-agnostic across backing silicon.
pub trait RadioPhy<I: radio::ReceiveInfo, E: Debug + Clone>:
    radio::State<Error = E>
    + radio::Busy<Error = E>
    + radio::Transmit<Error = E>
    + radio::Receive<Info = I, Error = E>
    + radio::Rssi<Error = E>
    + Power<Error = E>
    + Timing<Error = E>
{
    /// Sets the RF channel, `0..CHANNEL_COUNT` (base 2402 MHz, 2 MHz
    /// step).
    fn set_channel(&mut self, channel: u8) -> Result<(), E>;

    /// Sets the 32-bit sync word shared by the network.
    fn set_sync_word(&mut self, sync_word: u32) -> Result<(), E>;

    /// Switches to the requested mode.
    fn set_mode(&mut self, mode: Mode) -> Result<(), E>;

    /// Stages a payload to be auto-clocked out on the next ACK,
    /// staged before re-entering RX.
    fn set_ack_payload(&mut self, payload: &[u8]) -> Result<(), E>;

    /// Drains the TX FIFO, discarding any queued frame.
    fn flush_tx(&mut self) -> Result<(), E>;

    /// Drains the RX FIFO, discarding any buffered frame; must drain
    /// even oversized frames to keep the FIFO consistent.
    fn flush_rx(&mut self) -> Result<(), E>;

    /// Blocking transmit-and-wait-for-ACK, bounded by the caller's
    /// configured timeout.
    fn transmit_with_ack(&mut self, data: &[u8], timeout_us: u32) -> Result<AckResult, E>;
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::*;
    use heapless::Vec;

    /// A deterministic, buffer-backed radio for engine/supervisor
    /// tests — no real air interface, just FIFOs the test can push
    /// frames into and read frames out of.
    #[derive(Debug, Default)]
    pub struct MockRadio {
        pub channel: u8,
        pub tx_power_dbm: i8,
        pub sync_word: u32,
        pub mode: Option<Mode>,
        pub time_us: u32,
        pub rssi: i16,
        pub tx_log: Vec<Vec<u8, 32>, 16>,
        pub rx_queue: Vec<Vec<u8, 32>, 16>,
        pub ack_payload: Vec<u8, 32>,
        /// When set, the next `transmit_with_ack` returns this instead
        /// of the default `Acked { payload_len: 0 }`.
        pub next_ack: Option<AckResult>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockError;

    #[derive(Debug, Clone, Copy, Default)]
    pub struct MockRxInfo {
        pub rssi: i16,
    }

    impl radio::ReceiveInfo for MockRxInfo {
        fn rssi(&self) -> i16 {
            self.rssi
        }
    }

    impl MockRadio {
        pub fn new() -> Self {
            Self {
                tx_power_dbm: -20,
                ..Default::default()
            }
        }

        pub fn push_rx(&mut self, frame: &[u8]) {
            let mut v = Vec::new();
            let _ = v.extend_from_slice(frame);
            let _ = self.rx_queue.push(v);
        }
    }

    impl radio::State for MockRadio {
        type State = ();
        type Error = MockError;
        fn set_state(&mut self, _state: Self::State) -> Result<(), Self::Error> {
            Ok(())
        }
        fn get_state(&mut self) -> Result<Self::State, Self::Error> {
            Ok(())
        }
    }

    impl radio::Busy for MockRadio {
        type Error = MockError;
        fn is_busy(&mut self) -> Result<bool, Self::Error> {
            Ok(false)
        }
    }

    impl radio::Transmit for MockRadio {
        type Error = MockError;
        fn start_transmit(&mut self, data: &[u8]) -> Result<(), Self::Error> {
            let mut v = Vec::new();
            let _ = v.extend_from_slice(data);
            let _ = self.tx_log.push(v);
            Ok(())
        }
        fn check_transmit(&mut self) -> Result<bool, Self::Error> {
            Ok(true)
        }
    }

    impl radio::Receive for MockRadio {
        type Info = MockRxInfo;
        type Error = MockError;
        fn start_receive(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
        fn check_receive(&mut self, _restart: bool) -> Result<bool, Self::Error> {
            Ok(!self.rx_queue.is_empty())
        }
        fn get_received(&mut self, info: &mut Self::Info, buf: &mut [u8]) -> Result<usize, Self::Error> {
            if let Some(frame) = self.rx_queue.pop() {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                info.rssi = self.rssi;
                Ok(n)
            } else {
                Ok(0)
            }
        }
    }

    impl radio::Rssi for MockRadio {
        type Error = MockError;
        fn poll_rssi(&mut self) -> Result<i16, Self::Error> {
            Ok(self.rssi)
        }
    }

    impl Power for MockRadio {
        type Error = MockError;
        fn set_tx_power(&mut self, dbm: i8) -> Result<(), Self::Error> {
            self.tx_power_dbm = dbm;
            Ok(())
        }
    }

    impl Timing for MockRadio {
        type Error = MockError;
        fn get_time_us(&self) -> u32 {
            self.time_us
        }
    }

    impl RadioPhy<MockRxInfo, MockError> for MockRadio {
        fn set_channel(&mut self, channel: u8) -> Result<(), MockError> {
            self.channel = channel;
            Ok(())
        }

        fn set_sync_word(&mut self, sync_word: u32) -> Result<(), MockError> {
            self.sync_word = sync_word;
            Ok(())
        }

        fn set_mode(&mut self, mode: Mode) -> Result<(), MockError> {
            self.mode = Some(mode);
            Ok(())
        }

        fn set_ack_payload(&mut self, payload: &[u8]) -> Result<(), MockError> {
            self.ack_payload.clear();
            let _ = self.ack_payload.extend_from_slice(payload);
            Ok(())
        }

        fn flush_tx(&mut self) -> Result<(), MockError> {
            self.tx_log.clear();
            Ok(())
        }

        fn flush_rx(&mut self) -> Result<(), MockError> {
            self.rx_queue.clear();
            Ok(())
        }

        fn transmit_with_ack(&mut self, data: &[u8], _timeout_us: u32) -> Result<AckResult, MockError> {
            self.start_transmit(data)?;
            Ok(self.next_ack.take().unwrap_or(AckResult::Acked { payload_len: 0 }))
        }
    }

    #[test]
    fn mock_records_tx_and_replies_ack() {
        let mut r = MockRadio::new();
        let res = r.transmit_with_ack(&[1, 2, 3], 400).unwrap();
        assert_eq!(res, AckResult::Acked { payload_len: 0 });
        assert_eq!(r.tx_log.len(), 1);
    }

    #[test]
    fn mock_rx_queue_pops_most_recent_push() {
        let mut r = MockRadio::new();
        r.push_rx(&[1]);
        r.push_rx(&[2]);
        let mut info = MockRxInfo::default();
        let mut buf = [0u8; 8];
        let n = r.get_received(&mut info, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[2]);
    }
}
