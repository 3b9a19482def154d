//! Report initiation cadence.
//!
//! The interval is an ISO-8601 duration (default `P7D`); an optional
//! first-execution clock time pins the first run to a time of day, rolling
//! to the next day when that time has already passed.

use regex::Regex;
use std::sync::LazyLock;
use time::{Duration, OffsetDateTime, Time};

use reportex_core::error::{ExchangeError, Result};

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$")
        .expect("valid pattern")
});

/// Parse an ISO-8601 duration such as `P7D`, `P1M`, or `PT12H`.
///
/// Calendar components use fixed lengths: a year is 365 days, a month 30.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let captures = ISO_DURATION
        .captures(value)
        .ok_or_else(|| ExchangeError::configuration(format!("Not an ISO-8601 duration: {value}")))?;

    let component = |index: usize| -> i64 {
        captures
            .get(index)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    if (1..=7).all(|index| captures.get(index).is_none()) {
        return Err(ExchangeError::configuration(format!(
            "Empty ISO-8601 duration: {value}"
        )));
    }

    let days = component(1) * 365 + component(2) * 30 + component(3) * 7 + component(4);
    let seconds = component(5) * 3600 + component(6) * 60 + component(7);

    Ok(Duration::days(days) + Duration::seconds(seconds))
}

/// Resolved timer settings of a send cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSettings {
    pub interval: Duration,
    pub first_execution: Option<Time>,
}

impl TimerSettings {
    pub fn from_config(timer: &reportex_config::TimerConfig) -> Result<Self> {
        Self::resolve(&timer.interval, timer.first_execution.as_deref())
    }

    /// Build from configuration strings; `interval` falls back to the
    /// protocol default when empty.
    pub fn resolve(interval: &str, first_execution: Option<&str>) -> Result<Self> {
        let interval = if interval.is_empty() {
            parse_duration(crate::constants::REPORT_TIMER_INTERVAL_DEFAULT)?
        } else {
            parse_duration(interval)?
        };

        let time_format = time::macros::format_description!("[hour]:[minute]:[second]");
        let first_execution = first_execution
            .map(|raw| {
                Time::parse(raw, &time_format).map_err(|e| {
                    ExchangeError::configuration(format!("Bad first-execution time '{raw}': {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            interval,
            first_execution,
        })
    }

    /// The instant of the first execution relative to `now`: today at the
    /// configured time, or tomorrow when that time already passed. `None`
    /// when no first-execution time is configured (execute immediately).
    pub fn next_first_execution(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        let time = self.first_execution?;
        let candidate = now.replace_time(time);
        if candidate < now {
            Some(candidate + Duration::days(1))
        } else {
            Some(candidate)
        }
    }
}
