//! Simulation clock: maps integer steps onto absolute simulation time.
//!
//! `current_time` is never accumulated. Every advance recomputes it from
//! the reference time and the current step, so repeated advances cannot
//! drift.

use crate::error::CoreError;
use chrono::{Duration, NaiveDateTime};

/// Format the scheduler uses for `reference_time`.
pub const REFERENCE_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Human readable clock format used in logs and by domain agents.
pub const DISPLAY_TIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationClock {
    reference_time: NaiveDateTime,
    step_interval_seconds: f64,
    prev_step: i64,
    current_step: i64,
    elapsed_steps: i64,
    current_time: NaiveDateTime,
}

impl SimulationClock {
    /// Creates a clock at step 0.
    pub fn new(reference_time: NaiveDateTime, step_interval_seconds: f64) -> Self {
        Self {
            reference_time,
            step_interval_seconds,
            prev_step: 0,
            current_step: 0,
            elapsed_steps: 0,
            current_time: reference_time,
        }
    }

    /// Moves the clock to `step`.
    ///
    /// Rewinds are accepted; ordering is the scheduler's decision.
    pub fn advance(&mut self, step: i64) {
        self.prev_step = self.current_step;
        self.current_step = step;
        self.elapsed_steps = self.current_step.saturating_sub(self.prev_step);
        self.current_time = self.time_at(step);
    }

    /// Absolute time of an arbitrary step.
    ///
    /// Saturates at `NaiveDateTime::MIN` / `MAX` for steps outside the
    /// representable range.
    pub fn time_at(&self, step: i64) -> NaiveDateTime {
        let millis = (step as f64 * self.step_interval_seconds * 1000.0).round() as i64;
        let saturated = if millis >= 0 {
            NaiveDateTime::MAX
        } else {
            NaiveDateTime::MIN
        };
        Duration::try_milliseconds(millis)
            .and_then(|offset| self.reference_time.checked_add_signed(offset))
            .unwrap_or(saturated)
    }

    pub fn reference_time(&self) -> NaiveDateTime {
        self.reference_time
    }

    pub fn step_interval_seconds(&self) -> f64 {
        self.step_interval_seconds
    }

    pub fn prev_step(&self) -> i64 {
        self.prev_step
    }

    pub fn current_step(&self) -> i64 {
        self.current_step
    }

    pub fn elapsed_steps(&self) -> i64 {
        self.elapsed_steps
    }

    pub fn current_time(&self) -> NaiveDateTime {
        self.current_time
    }

    /// `current_time` rendered as `"Mon, 01 Jan 2024 00:05:00 GMT"`.
    pub fn current_time_str(&self) -> String {
        time_to_str(self.current_time)
    }
}

/// Parses a `YYYYMMDDHHMMSS` reference time.
pub fn parse_reference_time(value: &str) -> Result<NaiveDateTime, CoreError> {
    NaiveDateTime::parse_from_str(value, REFERENCE_TIME_FORMAT).map_err(|e| {
        CoreError::ReferenceTime {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}

pub fn time_to_str(time: NaiveDateTime) -> String {
    time.format(DISPLAY_TIME_FORMAT).to_string()
}

pub fn str_to_time(value: &str) -> Result<NaiveDateTime, CoreError> {
    NaiveDateTime::parse_from_str(value, DISPLAY_TIME_FORMAT).map_err(|e| {
        CoreError::ReferenceTime {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t0() -> NaiveDateTime {
        parse_reference_time("20240101000000").unwrap()
    }

    #[test]
    fn test_advance_tracks_steps_and_time() {
        let mut clock = SimulationClock::new(t0(), 60.0);

        clock.advance(5);
        assert_eq!(clock.prev_step(), 0);
        assert_eq!(clock.elapsed_steps(), 5);
        assert_eq!(clock.current_time(), t0() + Duration::seconds(300));

        clock.advance(7);
        assert_eq!(clock.prev_step(), 5);
        assert_eq!(clock.elapsed_steps(), 2);
        assert_eq!(clock.current_time(), t0() + Duration::seconds(420));
    }

    #[test]
    fn test_rewind_is_accepted() {
        let mut clock = SimulationClock::new(t0(), 30.0);
        clock.advance(10);
        clock.advance(4);
        assert_eq!(clock.elapsed_steps(), -6);
        assert_eq!(clock.current_time(), t0() + Duration::seconds(120));
    }

    #[test]
    fn test_fractional_interval() {
        let mut clock = SimulationClock::new(t0(), 0.5);
        clock.advance(3);
        assert_eq!(clock.current_time(), t0() + Duration::milliseconds(1500));
    }

    #[test]
    fn test_time_string_round_trip() {
        let mut clock = SimulationClock::new(t0(), 60.0);
        clock.advance(5);
        assert_eq!(clock.current_time_str(), "Mon, 01 Jan 2024 00:05:00 GMT");
        assert_eq!(str_to_time(&clock.current_time_str()).unwrap(), clock.current_time());
    }

    #[test]
    fn test_out_of_range_steps_saturate() {
        let mut clock = SimulationClock::new(t0(), 60.0);

        clock.advance(-200_000_000_000_000);
        assert_eq!(clock.current_time(), NaiveDateTime::MIN);

        clock.advance(i64::MAX);
        assert_eq!(clock.current_time(), NaiveDateTime::MAX);
        assert_eq!(clock.elapsed_steps(), i64::MAX);

        clock.advance(i64::MIN);
        assert_eq!(clock.current_time(), NaiveDateTime::MIN);
        assert_eq!(clock.elapsed_steps(), i64::MIN);
    }

    #[test]
    fn test_bad_reference_time() {
        let err = parse_reference_time("2024-01-01").unwrap_err();
        assert!(matches!(err, CoreError::ReferenceTime { .. }));
    }

    proptest! {
        #[test]
        fn prop_no_drift_across_advances(steps in proptest::collection::vec(0i64..100_000, 1..50)) {
            let mut clock = SimulationClock::new(t0(), 60.0);
            let mut prev = 0i64;
            for step in steps {
                clock.advance(step);
                prop_assert_eq!(clock.elapsed_steps(), step - prev);
                prop_assert_eq!(clock.current_time(), t0() + Duration::seconds(step * 60));
                prev = step;
            }
        }
    }
}
