
use crate::codec::DecodeError;

/// Top level error type surfaced by the tracker and receiver engines.
///
/// Generic over the radio backend's error type `RE` and the storage
/// backend's error type `SE` — a flat enum of leaf variants plus thin
/// wrapping variants for each external trait, the same shape the
/// original MAC core used for `CoreError<E>`.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkError<RE, SE> {
    /// Pairing record absent from storage.
    PairingNotFound,
    /// Pairing record present but failed its CRC.
    PairingInvalid,

    /// Radio failed to initialize.
    RadioInitFailed,
    /// Sensor failed to initialize.
    SensorInitFailed,
    /// Non-volatile storage reported a fault.
    StorageFault,

    /// Radio FIFO did not drain within the bounded wait.
    FifoStuck,
    /// Transmission did not complete within the bounded wait.
    TxTimeout,
    /// No ACK was seen within the bounded wait.
    AckTimeout,
    /// Frame CRC did not match.
    CrcMismatch,
    /// Frame length did not match its type.
    LenMismatch,
    /// Frame type/magic byte was not recognised.
    BadMagic,

    /// A slot's processing ran past its deadline.
    SlotOverrun,
    /// Superframe synchronization was lost.
    SyncLost,
    /// The miss-sync recovery ladder ran out of rungs.
    RecoveryExhausted,

    /// A fixed-point computation saturated and was clamped.
    Saturation,

    /// Wrapper for codec decode failures.
    Decode(DecodeError),
    /// Wrapper for underlying radio errors.
    Radio(RE),
    /// Wrapper for underlying storage errors.
    Storage(SE),
}

impl<RE, SE> From<DecodeError> for LinkError<RE, SE> {
    fn from(e: DecodeError) -> Self {
        LinkError::Decode(e)
    }
}
