//! Simulator clock estimation.
//!
//! The simulator reports its clock on request only; between reports the
//! local wall clock advances at the same rate (the sim runs in real time).
//! `SimClock` stores the offset between the two at the last report and
//! extrapolates from it, so one `simzeit` round trip per session is enough.

use chrono::{Local, NaiveTime, TimeDelta, Timelike};

use stellwerk_proto::SimTime;

const DAY_MILLIS: u64 = 24 * 60 * 60 * 1000;

#[derive(Clone, Copy, Debug)]
pub struct SimClock {
    offset: TimeDelta,
    synchronized: bool,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            offset: TimeDelta::zero(),
            synchronized: false,
        }
    }

    /// Whether a simulator report has been folded in yet. Before the first
    /// one, [`SimClock::sim_now`] is just the local wall clock.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Fold in a fresh simulator report, captured against the local clock at
    /// the moment of the call. Transmission latency is below the protocol's
    /// resolution and is ignored.
    pub fn update(&mut self, reported: &SimTime) {
        let sim = time_of_day(reported.millis);
        let local = Local::now().time();
        self.offset = sim.signed_duration_since(local);
        self.synchronized = true;
    }

    /// Current simulator time of day, extrapolated from the last report.
    pub fn sim_now(&self) -> NaiveTime {
        Local::now().time().overflowing_add_signed(self.offset).0
    }

    /// Current simulator time as minutes since midnight, the unit the
    /// timetable uses.
    pub fn sim_minutes(&self) -> i32 {
        let now = self.sim_now();
        (now.hour() * 60 + now.minute()) as i32
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

fn time_of_day(millis: u64) -> NaiveTime {
    let millis = millis % DAY_MILLIS;
    let secs = (millis / 1000) as u32;
    let nanos = ((millis % 1000) * 1_000_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsynchronized_tracks_local_time() {
        let clock = SimClock::new();
        assert!(!clock.is_synchronized());
        let local = Local::now().time();
        let sim = clock.sim_now();
        assert!(sim.signed_duration_since(local).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_update_pins_sim_time_of_day() {
        let mut clock = SimClock::new();
        clock.update(&SimTime {
            millis: 10 * 3_600_000 + 30 * 60_000,
        });
        assert!(clock.is_synchronized());
        assert_eq!(clock.sim_minutes(), 10 * 60 + 30);
    }

    #[test]
    fn test_report_wraps_past_midnight() {
        let mut clock = SimClock::new();
        clock.update(&SimTime {
            millis: DAY_MILLIS + 61_000,
        });
        assert_eq!(clock.sim_minutes(), 1);
    }
}
