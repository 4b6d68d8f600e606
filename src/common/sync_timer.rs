//! time keeping for the session, in 100 microsecond ticks
//!
//! The whole AppleMIDI timing model runs on a monotonic counter in units of
//! 100 microseconds: sync round timestamps, the feedback cadence, and the
//! 60 second liveness window.  [`TickClock`] is the production tick source,
//! [`TickTimer`] tells components when a periodic interval has elapsed.
use std::time::Instant;

/// Monotonic session clock.  One tick is 100 microseconds.
pub trait SyncClock {
    fn now_100us(&self) -> u64;
}

/// Production clock.  Counts from the moment it was built so values start near zero.
pub struct TickClock {
    start: Instant,
}

impl TickClock {
    pub fn new() -> TickClock {
        TickClock {
            start: Instant::now(),
        }
    }
}

impl SyncClock for TickClock {
    fn now_100us(&self) -> u64 {
        (self.start.elapsed().as_micros() / 100) as u64
    }
}

/// Timer to let things know when a certain number of ticks (or more) passed
#[derive(Debug)]
pub struct TickTimer {
    last_time: u64,
    interval: u64,
}

impl TickTimer {
    /// create a new timer with the current tick value and the interval (in ticks)
    pub fn new(now: u64, interval: u64) -> TickTimer {
        TickTimer {
            last_time: now,
            interval: interval,
        }
    }
    /// reconfigure the interval
    pub fn set_interval(&mut self, interval: u64) -> () {
        self.interval = interval;
    }
    /// check if the timer is expired
    pub fn expired(&self, now: u64) -> bool {
        (self.last_time + self.interval) < now
    }
    /// reset the timer to the value of now
    pub fn reset(&mut self, now: u64) {
        self.last_time = now;
    }
    /// Ask how long since the last time you were reset
    pub fn since(&self, now: u64) -> u64 {
        now - self.last_time
    }
}

#[cfg(test)]
mod test_tick_timer {
    use super::*;

    #[test]
    fn test_expiration() {
        let mut now = 1000;
        let mut timer = TickTimer::new(now, 100);
        assert!(!timer.expired(now));
        now += 99;
        assert!(!timer.expired(now));
        now += 2;
        assert!(timer.expired(now));
        timer.reset(now);
        assert!(!timer.expired(now));
        assert_eq!(timer.since(now + 10), 10);
        timer.set_interval(9);
        now += 10;
        assert!(timer.expired(now));
    }
}

#[cfg(test)]
mod test_tick_clock {
    use super::*;

    #[test]
    fn starts_near_zero() {
        let clock = TickClock::new();
        // freshly built clocks should read well under a second
        assert!(clock.now_100us() < 10_000);
    }

    #[test]
    fn monotonic() {
        let clock = TickClock::new();
        let first = clock.now_100us();
        let second = clock.now_100us();
        assert!(second >= first);
    }
}
