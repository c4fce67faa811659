/// Proximity evaluation: decides whether the wearer is too close to a
/// non-household peer, and drives the alert indicator from that decision.
///
/// Evaluation runs inside the radio callback, so it is a handful of address
/// compares and an atomic store. The alert loop only ever reads the flag.
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use heapless::Vec;
use serde::Deserialize;

use crate::error::{Error, Result};

/// RSSI at or below this is far enough away.
pub const DEFAULT_THRESHOLD: i8 = -60;

pub const MAX_HOUSEHOLDS: usize = 4;
pub const MAX_RESIDENTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Household {
    pub id: u16,
    pub members: Vec<[u8; 6], MAX_RESIDENTS>,
}

impl Household {
    /// Residents beyond capacity are dropped.
    pub fn new(id: u16, residents: &[[u8; 6]]) -> Self {
        Self {
            id,
            members: residents.iter().copied().take(MAX_RESIDENTS).collect(),
        }
    }

    pub fn contains(&self, address: &[u8; 6]) -> bool {
        self.members.iter().any(|m| m == address)
    }
}

/// True if some household lists both addresses.
pub fn share_household(households: &[Household], a: &[u8; 6], b: &[u8; 6]) -> bool {
    households.iter().any(|h| h.contains(a) && h.contains(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProximityConfig {
    #[serde(default = "default_threshold")]
    pub threshold: i8,
    /// Consecutive agreeing evaluations needed to change the flag.
    #[serde(default = "default_debounce")]
    pub debounce: u8,
}

fn default_threshold() -> i8 {
    DEFAULT_THRESHOLD
}
fn default_debounce() -> u8 {
    1
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            debounce: 1,
        }
    }
}

/// Instantaneous decision for one peer sighting.
pub fn is_violation(
    config: &ProximityConfig,
    households: &[Household],
    own: Option<&[u8; 6]>,
    peer: &[u8; 6],
    rssi: i8,
) -> bool {
    let housemate = own.is_some_and(|own| share_household(households, own, peer));
    !(housemate || rssi <= config.threshold)
}

#[derive(Debug, Clone, Copy, Default)]
struct Streak {
    candidate: bool,
    count: u8,
}

/// Owns the violation flag.
pub struct ProximityEvaluator<M: RawMutex> {
    config: ProximityConfig,
    violating: AtomicBool,
    streak: Mutex<M, Cell<Streak>>,
}

impl<M: RawMutex> ProximityEvaluator<M> {
    pub fn new(config: ProximityConfig) -> Self {
        Self {
            config,
            violating: AtomicBool::new(false),
            streak: Mutex::new(Cell::new(Streak::default())),
        }
    }

    /// Evaluate one peer sighting and update the flag. Returns the flag.
    pub fn evaluate(&self, households: &[Household], own: Option<&[u8; 6]>, peer: &[u8; 6], rssi: i8) -> bool {
        let decision = is_violation(&self.config, households, own, peer, rssi);
        let needed = self.config.debounce.max(1);

        self.streak.lock(|cell| {
            let current = self.violating.load(Ordering::Relaxed);
            let mut streak = cell.get();

            if decision == current {
                streak = Streak::default();
            } else {
                if streak.candidate == decision {
                    streak.count = streak.count.saturating_add(1);
                } else {
                    streak = Streak {
                        candidate: decision,
                        count: 1,
                    };
                }
                if streak.count >= needed {
                    self.violating.store(decision, Ordering::Relaxed);
                    streak = Streak::default();
                }
            }

            cell.set(streak);
            self.violating.load(Ordering::Relaxed)
        })
    }

    pub fn is_violating(&self) -> bool {
        self.violating.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &ProximityConfig {
        &self.config
    }
}

// ── Alert indicator ───────────────────────────────────────────────────

/// Alert output driven once per tick.
///
/// Violating: on for one tick, then off for one tick. Clear: held off for
/// the tick.
pub struct AlertIndicator<P, D> {
    pin: P,
    delay: D,
    tick_ms: u32,
    active_low: bool,
}

impl<P: OutputPin, D: DelayNs> AlertIndicator<P, D> {
    pub fn new(pin: P, delay: D, tick_ms: u32, active_low: bool) -> Result<Self> {
        let mut indicator = Self {
            pin,
            delay,
            tick_ms,
            active_low,
        };
        indicator.set(false)?;
        Ok(indicator)
    }

    pub fn tick(&mut self, violating: bool) -> Result<()> {
        if violating {
            self.set(true)?;
            self.delay.delay_ms(self.tick_ms);
            self.set(false)?;
            self.delay.delay_ms(self.tick_ms);
            Ok(())
        } else {
            self.set(false)?;
            self.delay.delay_ms(self.tick_ms);
            Ok(())
        }
    }

    fn set(&mut self, on: bool) -> Result<()> {
        let high = on != self.active_low;
        let r = if high { self.pin.set_high() } else { self.pin.set_low() };
        r.map_err(|_| Error::Sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embedded_hal::digital::ErrorType;
    use std::cell::RefCell;
    use std::rc::Rc;

    const OWN: [u8; 6] = [1, 1, 1, 1, 1, 1];
    const PARTNER: [u8; 6] = [2, 2, 2, 2, 2, 2];
    const STRANGER: [u8; 6] = [3, 3, 3, 3, 3, 3];

    fn households() -> [Household; 1] {
        [Household::new(0, &[OWN, PARTNER])]
    }

    fn evaluator(debounce: u8) -> ProximityEvaluator<CriticalSectionRawMutex> {
        ProximityEvaluator::new(ProximityConfig {
            debounce,
            ..ProximityConfig::default()
        })
    }

    #[test]
    fn far_stranger_clears() {
        let e = evaluator(1);
        assert!(!e.evaluate(&households(), Some(&OWN), &STRANGER, -70));
    }

    #[test]
    fn near_stranger_sets() {
        let e = evaluator(1);
        assert!(e.evaluate(&households(), Some(&OWN), &STRANGER, -40));
        assert!(e.is_violating());
    }

    #[test]
    fn near_housemate_clears() {
        let e = evaluator(1);
        e.evaluate(&households(), Some(&OWN), &STRANGER, -40);
        assert!(!e.evaluate(&households(), Some(&OWN), &PARTNER, -40));
        assert!(!e.is_violating());
    }

    #[test]
    fn threshold_is_inclusive() {
        let cfg = ProximityConfig::default();
        assert!(!is_violation(&cfg, &[], Some(&OWN), &STRANGER, -60));
        assert!(is_violation(&cfg, &[], Some(&OWN), &STRANGER, -59));
    }

    #[test]
    fn decision_depends_only_on_latest_sighting() {
        let e = evaluator(1);
        for rssi in [-40, -70, -30, -90] {
            let expected = rssi > DEFAULT_THRESHOLD;
            assert_eq!(e.evaluate(&households(), Some(&OWN), &STRANGER, rssi), expected);
        }
    }

    #[test]
    fn residency_requires_both_in_same_household() {
        let split = [Household::new(0, &[OWN]), Household::new(1, &[PARTNER])];
        assert!(!share_household(&split, &OWN, &PARTNER));
        assert!(share_household(&households(), &OWN, &PARTNER));
        assert!(!share_household(&households(), &OWN, &STRANGER));
        // Unknown own address: no one is a housemate
        assert!(is_violation(&ProximityConfig::default(), &households(), None, &PARTNER, -40));
    }

    #[test]
    fn debounce_requires_consecutive_agreement() {
        let e = evaluator(3);
        let h = households();
        assert!(!e.evaluate(&h, Some(&OWN), &STRANGER, -40));
        assert!(!e.evaluate(&h, Some(&OWN), &STRANGER, -40));
        // Interrupted streak restarts
        assert!(!e.evaluate(&h, Some(&OWN), &STRANGER, -80));
        assert!(!e.evaluate(&h, Some(&OWN), &STRANGER, -40));
        assert!(!e.evaluate(&h, Some(&OWN), &STRANGER, -40));
        assert!(e.evaluate(&h, Some(&OWN), &STRANGER, -40));

        // Clearing needs the same agreement
        assert!(e.evaluate(&h, Some(&OWN), &STRANGER, -80));
        assert!(e.evaluate(&h, Some(&OWN), &STRANGER, -80));
        assert!(!e.evaluate(&h, Some(&OWN), &STRANGER, -80));
    }

    #[test]
    fn zero_debounce_behaves_like_one() {
        let e = evaluator(0);
        assert!(e.evaluate(&households(), Some(&OWN), &STRANGER, -40));
    }

    #[test]
    fn household_capacity_truncates() {
        let many = [[9u8; 6]; MAX_RESIDENTS + 3];
        assert_eq!(Household::new(0, &many).members.len(), MAX_RESIDENTS);
    }

    // ── Indicator ───────────────────────────────────────────────────

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Ev {
        High,
        Low,
        Wait(u32),
    }

    type Log = Rc<RefCell<std::vec::Vec<Ev>>>;

    struct Pin(Log);

    impl ErrorType for Pin {
        type Error = Infallible;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> core::result::Result<(), Infallible> {
            self.0.borrow_mut().push(Ev::Low);
            Ok(())
        }
        fn set_high(&mut self) -> core::result::Result<(), Infallible> {
            self.0.borrow_mut().push(Ev::High);
            Ok(())
        }
    }

    struct Wait(Log);

    impl DelayNs for Wait {
        fn delay_ns(&mut self, _ns: u32) {}
        fn delay_ms(&mut self, ms: u32) {
            self.0.borrow_mut().push(Ev::Wait(ms));
        }
    }

    fn indicator(active_low: bool) -> (AlertIndicator<Pin, Wait>, Log) {
        let log: Log = Rc::new(RefCell::new(std::vec::Vec::new()));
        let ind = AlertIndicator::new(Pin(log.clone()), Wait(log.clone()), 100, active_low).unwrap();
        log.borrow_mut().clear();
        (ind, log)
    }

    #[test]
    fn violating_tick_pulses() {
        let (mut ind, log) = indicator(false);
        ind.tick(true).unwrap();
        assert_eq!(*log.borrow(), vec![Ev::High, Ev::Wait(100), Ev::Low, Ev::Wait(100)]);
    }

    #[test]
    fn consecutive_violating_ticks_stay_off_between_pulses() {
        let (mut ind, log) = indicator(false);
        ind.tick(true).unwrap();
        ind.tick(true).unwrap();

        let events = log.borrow();
        let second_high = events.iter().rposition(|e| *e == Ev::High).unwrap();
        let first_low = events.iter().position(|e| *e == Ev::Low).unwrap();
        assert!(first_low < second_high);
        assert!(events[first_low..second_high].contains(&Ev::Wait(100)));
    }

    #[test]
    fn clear_tick_holds_off() {
        let (mut ind, log) = indicator(false);
        ind.tick(false).unwrap();
        assert_eq!(*log.borrow(), vec![Ev::Low, Ev::Wait(100)]);
    }

    #[test]
    fn active_low_inverts_levels() {
        let (mut ind, log) = indicator(true);
        ind.tick(true).unwrap();
        assert_eq!(*log.borrow(), vec![Ev::Low, Ev::Wait(100), Ev::High, Ev::Wait(100)]);
    }
}
