

/// Timer trait provides mechanisms for accessing monotonic times
/// to assist with procotol implementations.
///
/// All methods are monotonic and relative to the same unknown epoc
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn ticks_ms(&self) -> u32;

    /// Returns the microsecond ticks since some unknown epoc
    fn time_us(&self) -> u32;
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use core::cell::Cell;
    use std::rc::Rc;

    /// A manually-advanceable `Timer` for unit tests.
    ///
    /// The underlying tick counter lives behind an `Rc<Cell<_>>`, so a
    /// test can hold a handle (`MockTimer::new()`) and a MAC under test
    /// a `.clone()` of it, and both observe the same advancing clock
    /// when the test drives time forward with `inc()`/`set_ms()`.
    #[derive(Clone)]
    pub struct MockTimer(Rc<Cell<u64>>);

    impl MockTimer {
        /// A timer starting at tick 0.
        pub fn new() -> Self {
            Self(Rc::new(Cell::new(0)))
        }

        /// A timer fixed at `ms` milliseconds.
        pub fn at_ms(ms: u64) -> Self {
            Self(Rc::new(Cell::new(ms)))
        }

        /// Advance by one millisecond.
        pub fn inc(&mut self) {
            self.0.set(self.0.get() + 1);
        }

        /// Set the absolute time, in milliseconds.
        pub fn set_ms(&mut self, ms: u32) {
            self.0.set(ms as u64);
        }

        /// Current time, in milliseconds.
        pub fn val(&self) -> u32 {
            self.0.get() as u32
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_ms(&self) -> u32 {
            self.0.get() as u32
        }

        fn time_us(&self) -> u32 {
            (self.0.get() * 1000) as u32
        }
    }
}
