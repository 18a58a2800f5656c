//! Tracker top-level state machine (C8).
//!
//! An enum-driven transition style: each state is a plain enum
//! variant, transitions are explicit match arms, no hidden states.

use log::{debug, info, warn};

use crate::log_ring::{Event, EventKind, EventRing};
use crate::tracker::recovery::RecoveryAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Init,
    Pairing,
    Search,
    Synced,
    Running,
    Sleep,
    Wake,
    Error,
}

/// LED indication mirroring supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    FastBlink,
    SlowBlink,
    DoubleBlink,
    Steady,
    Off,
    Sos,
}

impl SupervisorState {
    pub fn led_pattern(&self) -> LedPattern {
        match self {
            SupervisorState::Init => LedPattern::Off,
            SupervisorState::Pairing => LedPattern::FastBlink,
            SupervisorState::Search => LedPattern::SlowBlink,
            SupervisorState::Synced => LedPattern::DoubleBlink,
            SupervisorState::Running => LedPattern::Steady,
            SupervisorState::Sleep => LedPattern::Off,
            SupervisorState::Wake => LedPattern::DoubleBlink,
            SupervisorState::Error => LedPattern::Sos,
        }
    }
}

/// Button press classification: `<50ms` ignored, `50ms..1s`
/// short-press (calibrate), `1..5s` sleep, `>=5s` pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Ignored,
    Calibrate,
    Sleep,
    EnterPairing,
}

pub fn classify_press(duration_ms: u32) -> ButtonAction {
    if duration_ms < 50 {
        ButtonAction::Ignored
    } else if duration_ms < 1_000 {
        ButtonAction::Calibrate
    } else if duration_ms < 5_000 {
        ButtonAction::Sleep
    } else {
        ButtonAction::EnterPairing
    }
}

/// Top-level tracker supervisor. Owns only the state enum and the
/// bookkeeping needed to decide transitions; the engine/power/fusion
/// pieces it drives live in sibling modules and are not borrowed here.
/// The supervisor exclusively owns the tracker context, which is
/// `tracker::engine::TrackerContext`.
pub struct Supervisor {
    state: SupervisorState,
    paired: bool,
    search_elapsed_ms: u32,
    sync_search_timeout_ms: u32,
    inactivity_superframes: u32,
    sleep_timeout_superframes: u32,
}

impl Supervisor {
    pub fn new(paired: bool, sync_search_timeout_ms: u32, sleep_timeout_superframes: u32) -> Self {
        Self {
            state: SupervisorState::Init,
            paired,
            search_elapsed_ms: 0,
            sync_search_timeout_ms,
            inactivity_superframes: 0,
            sleep_timeout_superframes,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn transition(&mut self, to: SupervisorState, ring: &mut EventRing, now_ms: u32) {
        debug!("supervisor: {:?} -> {:?}", self.state, to);
        let kind = match to {
            SupervisorState::Sleep => Some(EventKind::Sleep),
            SupervisorState::Wake => Some(EventKind::Wake),
            _ => None,
        };
        if let Some(k) = kind {
            ring.push(Event::new(now_ms, k));
        }
        self.state = to;
    }

    /// `INIT`: radio+sensor init outcome decides the next state —
    /// OK goes to SEARCH if paired else PAIRING; fatal init goes to
    /// ERROR.
    pub fn on_init_result(&mut self, ok: bool, ring: &mut EventRing, now_ms: u32) {
        if self.state != SupervisorState::Init {
            return;
        }
        if !ok {
            warn!("supervisor: fatal init failure");
            self.transition(SupervisorState::Error, ring, now_ms);
        } else if self.paired {
            self.transition(SupervisorState::Search, ring, now_ms);
        } else {
            self.transition(SupervisorState::Pairing, ring, now_ms);
        }
    }

    /// Button press, classified by [`classify_press`].
    pub fn on_button_press(&mut self, duration_ms: u32, ring: &mut EventRing, now_ms: u32) {
        match classify_press(duration_ms) {
            ButtonAction::Ignored => {}
            ButtonAction::Calibrate => info!("supervisor: calibrate requested"),
            ButtonAction::Sleep => self.transition(SupervisorState::Sleep, ring, now_ms),
            ButtonAction::EnterPairing => {
                if self.state == SupervisorState::Error {
                    // long-press resets out of ERROR instead of entering PAIRING.
                    self.transition(SupervisorState::Init, ring, now_ms);
                } else {
                    self.transition(SupervisorState::Pairing, ring, now_ms);
                }
            }
        }
    }

    /// `PAIRING`: confirm received -> `SEARCH`; the caller is
    /// responsible for the `PAIRING_TIMEOUT_MS` deadline.
    pub fn on_pair_confirmed(&mut self, ring: &mut EventRing, now_ms: u32) {
        if self.state == SupervisorState::Pairing {
            self.paired = true;
            self.transition(SupervisorState::Search, ring, now_ms);
        }
    }

    pub fn on_pairing_timeout(&mut self, ring: &mut EventRing, now_ms: u32) {
        if self.state == SupervisorState::Pairing {
            self.transition(SupervisorState::Error, ring, now_ms);
        }
    }

    /// `SEARCH`: a heard beacon moves to `SYNCED`; elapsed time past
    /// the search timeout moves to `SLEEP`.
    pub fn on_search_tick(&mut self, beacon_heard: bool, elapsed_ms: u32, ring: &mut EventRing, now_ms: u32) {
        if self.state != SupervisorState::Search {
            return;
        }
        if beacon_heard {
            self.search_elapsed_ms = 0;
            self.transition(SupervisorState::Synced, ring, now_ms);
            return;
        }
        self.search_elapsed_ms = self.search_elapsed_ms.wrapping_add(elapsed_ms);
        if self.search_elapsed_ms >= self.sync_search_timeout_ms {
            self.transition(SupervisorState::Sleep, ring, now_ms);
        }
    }

    /// `SYNCED`: first successful TX moves to `RUNNING`.
    pub fn on_tx_success(&mut self, ring: &mut EventRing, now_ms: u32) {
        if self.state == SupervisorState::Synced {
            self.inactivity_superframes = 0;
            self.transition(SupervisorState::Running, ring, now_ms);
        } else if self.state == SupervisorState::Running {
            self.inactivity_superframes = 0;
        }
    }

    /// `RUNNING`: recovery-ladder escalation past `FullScan`/
    /// `DeepSearch`, or an inactivity timeout, drops back to `SLEEP`.
    pub fn on_recovery_action(&mut self, action: RecoveryAction, ring: &mut EventRing, now_ms: u32) {
        if self.state != SupervisorState::Running {
            return;
        }
        if action == RecoveryAction::DeepSearch {
            warn!("supervisor: recovery ladder exhausted, sleeping");
            self.transition(SupervisorState::Sleep, ring, now_ms);
        }
    }

    /// `RUNNING`: one superframe elapsed without a successful TX.
    pub fn on_superframe_without_tx(&mut self, ring: &mut EventRing, now_ms: u32) {
        if self.state != SupervisorState::Running {
            return;
        }
        self.inactivity_superframes = self.inactivity_superframes.saturating_add(1);
        if self.inactivity_superframes >= self.sleep_timeout_superframes {
            self.transition(SupervisorState::Sleep, ring, now_ms);
        }
    }

    /// `SLEEP -> WAKE`, set by the WoM ISR via
    /// [`crate::context::SystemContext::set_wakeup_pending`].
    pub fn on_wakeup_source(&mut self, ring: &mut EventRing, now_ms: u32) {
        if self.state == SupervisorState::Sleep {
            self.transition(SupervisorState::Wake, ring, now_ms);
        }
    }

    /// `WAKE`: re-init complete, flag cleared, move to `SEARCH`.
    pub fn on_wake_complete(&mut self, ring: &mut EventRing, now_ms: u32) {
        if self.state == SupervisorState::Wake {
            self.transition(SupervisorState::Search, ring, now_ms);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ring() -> EventRing {
        EventRing::new()
    }

    #[test]
    fn init_ok_paired_goes_to_search() {
        let mut s = Supervisor::new(true, 10_000, 6000);
        let mut r = ring();
        s.on_init_result(true, &mut r, 0);
        assert_eq!(s.state(), SupervisorState::Search);
    }

    #[test]
    fn init_ok_unpaired_goes_to_pairing() {
        let mut s = Supervisor::new(false, 10_000, 6000);
        let mut r = ring();
        s.on_init_result(true, &mut r, 0);
        assert_eq!(s.state(), SupervisorState::Pairing);
    }

    #[test]
    fn init_failure_goes_to_error() {
        let mut s = Supervisor::new(true, 10_000, 6000);
        let mut r = ring();
        s.on_init_result(false, &mut r, 0);
        assert_eq!(s.state(), SupervisorState::Error);
    }

    #[test]
    fn long_press_in_error_resets_to_init_not_pairing() {
        let mut s = Supervisor::new(true, 10_000, 6000);
        let mut r = ring();
        s.on_init_result(false, &mut r, 0);
        assert_eq!(s.state(), SupervisorState::Error);
        s.on_button_press(5_000, &mut r, 1);
        assert_eq!(s.state(), SupervisorState::Init);
    }

    #[test]
    fn full_happy_path_to_running() {
        let mut s = Supervisor::new(true, 10_000, 6000);
        let mut r = ring();
        s.on_init_result(true, &mut r, 0);
        s.on_search_tick(true, 5, &mut r, 5);
        assert_eq!(s.state(), SupervisorState::Synced);
        s.on_tx_success(&mut r, 10);
        assert_eq!(s.state(), SupervisorState::Running);
    }

    #[test]
    fn search_timeout_sleeps() {
        let mut s = Supervisor::new(true, 100, 6000);
        let mut r = ring();
        s.on_init_result(true, &mut r, 0);
        s.on_search_tick(false, 50, &mut r, 50);
        assert_eq!(s.state(), SupervisorState::Search);
        s.on_search_tick(false, 60, &mut r, 110);
        assert_eq!(s.state(), SupervisorState::Sleep);
    }

    #[test]
    fn wake_cycle_returns_to_search() {
        let mut s = Supervisor::new(true, 10_000, 6000);
        let mut r = ring();
        s.on_init_result(true, &mut r, 0);
        s.on_search_tick(false, 20_000, &mut r, 20_000);
        assert_eq!(s.state(), SupervisorState::Sleep);
        s.on_wakeup_source(&mut r, 21_000);
        assert_eq!(s.state(), SupervisorState::Wake);
        s.on_wake_complete(&mut r, 21_010);
        assert_eq!(s.state(), SupervisorState::Search);
    }

    #[test]
    fn deep_search_recovery_sleeps_running_tracker() {
        let mut s = Supervisor::new(true, 10_000, 6000);
        let mut r = ring();
        s.on_init_result(true, &mut r, 0);
        s.on_search_tick(true, 5, &mut r, 5);
        s.on_tx_success(&mut r, 10);
        assert_eq!(s.state(), SupervisorState::Running);
        s.on_recovery_action(RecoveryAction::DeepSearch, &mut r, 100);
        assert_eq!(s.state(), SupervisorState::Sleep);
    }

    #[test]
    fn button_classification_matches_duration_bounds() {
        assert_eq!(classify_press(10), ButtonAction::Ignored);
        assert_eq!(classify_press(49), ButtonAction::Ignored);
        assert_eq!(classify_press(50), ButtonAction::Calibrate);
        assert_eq!(classify_press(999), ButtonAction::Calibrate);
        assert_eq!(classify_press(1_000), ButtonAction::Sleep);
        assert_eq!(classify_press(4_999), ButtonAction::Sleep);
        assert_eq!(classify_press(5_000), ButtonAction::EnterPairing);
    }

    #[test]
    fn led_pattern_maps_every_state() {
        assert_eq!(SupervisorState::Running.led_pattern(), LedPattern::Steady);
        assert_eq!(SupervisorState::Error.led_pattern(), LedPattern::Sos);
    }
}
