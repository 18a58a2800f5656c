//! Common imports for call sites embedding the tracker or receiver
//! stack: the error type, the wire codec's frame types, and the
//! top-level engines.

pub use crate::error::LinkError;

pub use crate::codec::{Ack, AckCommand, Frame, PairConfirm, PairRequest, PairResponse, SyncBeacon, TrackerData, UltraData};

pub use crate::ids::{MacAddress, NetworkKey, TrackerId};

pub use crate::timer::Timer;

pub use crate::radio_if::RadioPhy;
pub use crate::sensor::ImuSensor;
pub use crate::storage::NvStorage;

pub use crate::tracker::{Supervisor, SupervisorState, TrackerContext};
pub use crate::receiver::{Aggregator, ReceiverEngine, ReceiverState};
