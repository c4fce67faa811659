/// Ultrasonic ranging: trigger pulse, echo pulse-width count.
///
/// The count is microseconds of echo-high time. `count / 35` gives a rough
/// distance in centimetres, but the raw count is what travels over the air.
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Width of the trigger pulse.
pub const TRIGGER_PULSE_US: u32 = 10;

/// Upper bound on both the wait for the echo edge and the echo width.
pub const DEFAULT_TIMEOUT_US: u32 = 50_000;

/// Count-to-centimetre divisor.
pub const COUNT_DIVISOR: u16 = 35;

/// Anything that can hand back a fresh pulse-width count.
pub trait RangeSource {
    fn acquire(&mut self) -> Result<u16>;
}

impl<R: RangeSource + ?Sized> RangeSource for &mut R {
    fn acquire(&mut self) -> Result<u16> {
        (**self).acquire()
    }
}

/// Placeholder source for nodes without a sensor.
pub struct NoRange;

impl RangeSource for NoRange {
    fn acquire(&mut self) -> Result<u16> {
        Err(Error::SensorTimeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RangingConfig {
    #[serde(default = "default_timeout_us")]
    pub timeout_us: u32,
    #[serde(default = "default_divisor")]
    pub divisor: u16,
}

fn default_timeout_us() -> u32 {
    DEFAULT_TIMEOUT_US
}
fn default_divisor() -> u16 {
    COUNT_DIVISOR
}

impl RangingConfig {
    pub const fn new() -> Self {
        Self {
            timeout_us: DEFAULT_TIMEOUT_US,
            divisor: COUNT_DIVISOR,
        }
    }
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Rough distance in centimetres for a raw count.
pub fn count_to_distance(count: u16, divisor: u16) -> u16 {
    count / divisor.max(1)
}

/// HC-SR04 style sensor: one trigger output, one echo input.
///
/// Counting is done by polling with 1 µs delays, so the caller must not be
/// preempted for the duration of a measurement or the count inflates.
pub struct Ultrasonic<T, E, D> {
    trigger: T,
    echo: E,
    delay: D,
    timeout_us: u32,
}

impl<T: OutputPin, E: InputPin, D: DelayNs> Ultrasonic<T, E, D> {
    pub fn new(mut trigger: T, echo: E, delay: D, config: &RangingConfig) -> Result<Self> {
        trigger.set_low().map_err(|_| Error::Sensor)?;
        Ok(Self {
            trigger,
            echo,
            delay,
            timeout_us: config.timeout_us,
        })
    }

    /// Fire the trigger and count echo-high microseconds.
    ///
    /// Both the wait for the rising edge and the count itself are bounded by
    /// the timeout; exceeding either yields `SensorTimeout`.
    pub fn measure(&mut self) -> Result<u16> {
        self.trigger.set_high().map_err(|_| Error::Sensor)?;
        self.delay.delay_us(TRIGGER_PULSE_US);
        self.trigger.set_low().map_err(|_| Error::Sensor)?;

        let mut waited: u32 = 0;
        while !self.echo.is_high().map_err(|_| Error::Sensor)? {
            if waited >= self.timeout_us {
                return Err(Error::SensorTimeout);
            }
            waited += 1;
            self.delay.delay_us(1);
        }

        let mut count: u32 = 0;
        while self.echo.is_high().map_err(|_| Error::Sensor)? {
            if count >= self.timeout_us {
                return Err(Error::SensorTimeout);
            }
            count += 1;
            self.delay.delay_us(1);
        }

        Ok(count.min(u16::MAX as u32) as u16)
    }
}

impl<T: OutputPin, E: InputPin, D: DelayNs> RangeSource for Ultrasonic<T, E, D> {
    fn acquire(&mut self) -> Result<u16> {
        self.measure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::vec::Vec;

    /// Simulated microsecond clock shared by pins and delay.
    type Clock = Rc<Cell<u32>>;

    struct ClockDelay(Clock);

    impl DelayNs for ClockDelay {
        fn delay_ns(&mut self, ns: u32) {
            let us = (ns / 1_000).max(1);
            self.0.set(self.0.get() + us);
        }
        fn delay_us(&mut self, us: u32) {
            self.0.set(self.0.get() + us);
        }
    }

    struct Trigger {
        clock: Clock,
        edges: Rc<RefCell<Vec<(bool, u32)>>>,
    }

    impl ErrorType for Trigger {
        type Error = Infallible;
    }

    impl OutputPin for Trigger {
        fn set_low(&mut self) -> core::result::Result<(), Infallible> {
            self.edges.borrow_mut().push((false, self.clock.get()));
            Ok(())
        }
        fn set_high(&mut self) -> core::result::Result<(), Infallible> {
            self.edges.borrow_mut().push((true, self.clock.get()));
            Ok(())
        }
    }

    /// Echo is high for `[rise, fall)` on the shared clock.
    struct Echo {
        clock: Clock,
        rise: u32,
        fall: u32,
    }

    impl ErrorType for Echo {
        type Error = Infallible;
    }

    impl InputPin for Echo {
        fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
            let now = self.clock.get();
            Ok(now >= self.rise && now < self.fall)
        }
        fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
            self.is_high().map(|h| !h)
        }
    }

    fn sensor(rise: u32, fall: u32, timeout_us: u32) -> (Ultrasonic<Trigger, Echo, ClockDelay>, Rc<RefCell<Vec<(bool, u32)>>>) {
        let clock: Clock = Rc::new(Cell::new(0));
        let edges = Rc::new(RefCell::new(Vec::new()));
        let trigger = Trigger {
            clock: clock.clone(),
            edges: edges.clone(),
        };
        let echo = Echo {
            clock: clock.clone(),
            rise,
            fall,
        };
        let config = RangingConfig {
            timeout_us,
            ..RangingConfig::new()
        };
        (Ultrasonic::new(trigger, echo, ClockDelay(clock), &config).unwrap(), edges)
    }

    #[test]
    fn counts_echo_width() {
        let (mut s, _) = sensor(100, 600, DEFAULT_TIMEOUT_US);
        assert_eq!(s.measure(), Ok(500));
    }

    #[test]
    fn trigger_pulse_is_ten_microseconds() {
        let (mut s, edges) = sensor(100, 200, DEFAULT_TIMEOUT_US);
        s.measure().unwrap();
        let edges = edges.borrow();
        // Initial low from new(), then high/low pulse
        assert_eq!(edges[0], (false, 0));
        assert_eq!(edges[1], (true, 0));
        assert_eq!(edges[2], (false, TRIGGER_PULSE_US));
    }

    #[test]
    fn missing_echo_times_out() {
        let (mut s, _) = sensor(u32::MAX, u32::MAX, 1_000);
        assert_eq!(s.measure(), Err(Error::SensorTimeout));
    }

    #[test]
    fn stuck_echo_times_out() {
        let (mut s, _) = sensor(20, u32::MAX, 1_000);
        assert_eq!(s.measure(), Err(Error::SensorTimeout));
    }

    #[test]
    fn range_source_delegates_to_measure() {
        let (mut s, _) = sensor(50, 85, DEFAULT_TIMEOUT_US);
        assert_eq!(s.acquire(), Ok(35));
    }

    #[test]
    fn distance_divides_count() {
        assert_eq!(count_to_distance(350, COUNT_DIVISOR), 10);
        assert_eq!(count_to_distance(34, COUNT_DIVISOR), 0);
        // Zero divisor is clamped rather than panicking
        assert_eq!(count_to_distance(7, 0), 7);
    }

    #[test]
    fn no_range_never_yields_a_value() {
        assert!(NoRange.acquire().is_err());
    }
}
