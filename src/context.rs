//! The single "system context" object: every datum an ISR and the main
//! loop both touch lives here, behind `critical_section::Mutex<RefCell<_>>`
//! cells, the usual way embedded Rust arbitrates ISR-shared state.
//! There is exactly one context per node.
//!
//! The double RX buffer follows the ISR handoff contract: the ISR
//! writes to the inactive half, flips `active`, and sets `pending`;
//! the main loop reads under a short critical section and clears
//! `pending`.

use core::cell::RefCell;
use critical_section::Mutex;
use heapless::Vec;

/// Max raw frame size on the air interface (standard data frame, 22B,
/// is the largest defined frame; rounded up for headroom).
pub const MAX_FRAME_LEN: usize = 32;

#[derive(Default)]
struct RxSlot {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
    rssi: i16,
}

/// Double-buffered RX handoff between an ISR producer and a main-loop consumer.
pub struct RxDoubleBuffer {
    slots: [RxSlot; 2],
    active: usize,
    pending: bool,
}

impl Default for RxDoubleBuffer {
    fn default() -> Self {
        Self {
            slots: [RxSlot::default(), RxSlot::default()],
            active: 0,
            pending: false,
        }
    }
}

impl RxDoubleBuffer {
    /// ISR-side write: fills the inactive slot, then flips `active`
    /// and sets `pending` — the only two writes visible to the main
    /// loop, both single-word.
    pub fn isr_publish(&mut self, frame: &[u8], rssi: i16) {
        let inactive = 1 - self.active;
        let n = frame.len().min(MAX_FRAME_LEN);
        self.slots[inactive].buf[..n].copy_from_slice(&frame[..n]);
        self.slots[inactive].len = n;
        self.slots[inactive].rssi = rssi;
        self.active = inactive;
        self.pending = true;
    }

    /// Main-loop-side read: takes the active slot's contents if
    /// `pending`, then clears it.
    pub fn take(&mut self) -> Option<(Vec<u8, MAX_FRAME_LEN>, i16)> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        let slot = &self.slots[self.active];
        let v = Vec::from_slice(&slot.buf[..slot.len]).unwrap();
        Some((v, slot.rssi))
    }
}

/// Single-struct command handoff for the Receiver->Tracker ACK
/// piggyback: mutated by main, consumed by the slot-ISR once, then
/// cleared.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingCommand {
    pub command: u8,
    pub param: u8,
    pub armed: bool,
}

impl PendingCommand {
    pub fn set(&mut self, command: u8, param: u8) {
        self.command = command;
        self.param = param;
        self.armed = true;
    }

    /// Consumes the command if armed, clearing it so it fires once.
    pub fn take(&mut self) -> Option<(u8, u8)> {
        if self.armed {
            self.armed = false;
            Some((self.command, self.param))
        } else {
            None
        }
    }
}

/// The node-wide volatile state shared between ISRs and the main
/// loop. Held behind one `critical_section::Mutex<RefCell<_>>>` per
/// field rather than one big lock, so a pointer-swap in one field
/// never blocks an unrelated read in another; the longest-held
/// critical section is a pointer swap.
pub struct SystemContext {
    pub rx: Mutex<RefCell<RxDoubleBuffer>>,
    pub wakeup_pending: Mutex<RefCell<bool>>,
    pub rf_synced: Mutex<RefCell<bool>>,
    pub pending_cmd: Mutex<RefCell<PendingCommand>>,
}

impl Default for SystemContext {
    fn default() -> Self {
        Self {
            rx: Mutex::new(RefCell::new(RxDoubleBuffer::default())),
            wakeup_pending: Mutex::new(RefCell::new(false)),
            rf_synced: Mutex::new(RefCell::new(false)),
            pending_cmd: Mutex::new(RefCell::new(PendingCommand::default())),
        }
    }
}

impl SystemContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// ISR-side: publish a received frame.
    pub fn isr_publish_rx(&self, frame: &[u8], rssi: i16) {
        critical_section::with(|cs| {
            self.rx.borrow(cs).borrow_mut().isr_publish(frame, rssi);
        });
    }

    /// Main-loop-side: take a pending received frame, if any.
    pub fn take_rx(&self) -> Option<(Vec<u8, MAX_FRAME_LEN>, i16)> {
        critical_section::with(|cs| self.rx.borrow(cs).borrow_mut().take())
    }

    /// ISR-side (WoM/button GPIO): request a wake.
    pub fn set_wakeup_pending(&self) {
        critical_section::with(|cs| *self.wakeup_pending.borrow(cs).borrow_mut() = true);
    }

    /// Main-loop-side: observe and clear the wake request.
    pub fn take_wakeup_pending(&self) -> bool {
        critical_section::with(|cs| {
            let mut cell = self.wakeup_pending.borrow(cs).borrow_mut();
            let was = *cell;
            *cell = false;
            was
        })
    }

    pub fn set_rf_synced(&self, synced: bool) {
        critical_section::with(|cs| *self.rf_synced.borrow(cs).borrow_mut() = synced);
    }

    pub fn is_rf_synced(&self) -> bool {
        critical_section::with(|cs| *self.rf_synced.borrow(cs).borrow())
    }

    /// Main-side: arm a command for the slot-ISR to consume once.
    pub fn arm_command(&self, command: u8, param: u8) {
        critical_section::with(|cs| self.pending_cmd.borrow(cs).borrow_mut().set(command, param));
    }

    /// ISR-side: consume the armed command, if any.
    pub fn take_command(&self) -> Option<(u8, u8)> {
        critical_section::with(|cs| self.pending_cmd.borrow(cs).borrow_mut().take())
    }
}
