
/// Timer trait provides mechanisms for accessing monotonic times
/// to assist with protocol implementations.
///
/// All methods are monotonic and relative to the same unknown epoch.
/// Elapsed-time comparisons must use unsigned subtraction
/// (`now.wrapping_sub(last)`) so that wraparound of the underlying
/// counter is handled implicitly.
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoch.
    fn ticks_ms(&self) -> u32;

    /// Returns the microsecond ticks since some unknown epoch.
    fn time_us(&self) -> u32;
}

/// Computes `now - last` with unsigned wraparound semantics, in milliseconds.
pub fn elapsed_ms(now: u32, last: u32) -> u32 {
    now.wrapping_sub(last)
}

/// Computes `now - last` with unsigned wraparound semantics, in microseconds.
pub fn elapsed_us(now: u32, last: u32) -> u32 {
    now.wrapping_sub(last)
}

#[cfg(all(feature = "std", any(test, feature = "mocks")))]
pub mod mock {
    use std::cell::Cell;
    use std::rc::Rc;

    /// Settable timer for tests.
    ///
    /// Cloning a `MockTimer` shares the same underlying counter, so a
    /// test can clone the timer into the component under test and
    /// keep driving time forward from the original handle.
    #[derive(Clone, Default)]
    pub struct MockTimer(Rc<Cell<u32>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Rc::new(Cell::new(0)))
        }

        /// Sets the mock clock to `ms` milliseconds.
        pub fn set_ms(&mut self, ms: u32) {
            self.0.set(ms.saturating_mul(1000));
        }

        /// Sets the mock clock to `us` microseconds.
        pub fn set_us(&mut self, us: u32) {
            self.0.set(us);
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_ms(&self) -> u32 {
            self.0.get() / 1000
        }

        fn time_us(&self) -> u32 {
            self.0.get()
        }
    }
}
