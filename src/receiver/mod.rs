//! Receiver-side stack: superframe/pairing engine (C7), the runtime
//! tracker-view aggregator that drives the HID report stream (C9), and
//! the pairing handshake handlers they both call into.

pub mod aggregator;
pub mod engine;
pub mod pairing;

pub use aggregator::{Aggregator, TrackerView};
pub use engine::{ReceiverEngine, ReceiverState, SuperframeState};
pub use pairing::{generate_network_key, handle_pair_confirm, handle_pair_request, PairOutcome};
