//! Tracker-side stack: per-frame TDMA engine (C6), top-level
//! supervisor state machine (C8), and the power/recovery policies
//! that plug into them.

pub mod engine;
pub mod power;
pub mod recovery;
pub mod supervisor;

pub use engine::TrackerContext;
pub use power::PowerPolicy;
pub use recovery::RecoveryPolicy;
pub use supervisor::{Supervisor, SupervisorState};
