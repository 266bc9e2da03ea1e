use embedded_hal::blocking::delay::DelayMs;

/// Inter-attempt delay used by the engine's bounded poll loops.
pub trait Delay: DelayMs<u8> {}

impl<T: DelayMs<u8>> Delay for T {}

#[cfg(any(test, feature = "std"))]
pub mod std {
    pub struct Delay;

    impl embedded_hal::blocking::delay::DelayMs<u8> for Delay {
        fn delay_ms(&mut self, ms: u8) {
            std::thread::sleep(std::time::Duration::from_millis(ms as u64));
        }
    }
}
