//! Sleep window evaluation.
//!
//! Whether the frame is blanked is a pure function of the current settings and
//! the local time of day; nothing is carried between evaluations.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::Settings;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Parse `"HH:MM"` (or `"HH:MM:SS"`) into minutes since midnight.
pub fn parse_clock_minutes(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let time = NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()?;
    Some(minutes_of(time))
}

fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Blank window in minutes since midnight. `start >= end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepWindow {
    pub start: u32,
    pub end: u32,
}

impl SleepWindow {
    /// Window configured by `settings`, or `None` when sleep is disabled or
    /// either bound is missing or malformed.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        if !settings.sleep_enabled {
            return None;
        }
        let start = parse_clock_minutes(settings.sleep_start.as_deref()?)?;
        let end = parse_clock_minutes(settings.sleep_end.as_deref()?)?;
        Some(Self { start, end })
    }

    pub fn crosses_midnight(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, minute: u32) -> bool {
        let minute = minute % MINUTES_PER_DAY;
        if self.crosses_midnight() {
            minute >= self.start || minute < self.end
        } else {
            self.start <= minute && minute < self.end
        }
    }
}

impl fmt::Display for SleepWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

/// `true` when the display must be blanked at `now`.
pub fn is_sleeping(settings: Option<&Settings>, now: NaiveTime) -> bool {
    settings
        .and_then(SleepWindow::from_settings)
        .is_some_and(|window| window.contains(minutes_of(now)))
}

/// Source of the local time of day.
pub trait Clock: Send + Sync {
    fn local_time(&self) -> NaiveTime;
}

/// Wall clock in the configured zone, or the host zone when none is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    timezone: Option<Tz>,
}

impl SystemClock {
    pub fn new(timezone: Option<Tz>) -> Self {
        Self { timezone }
    }
}

impl Clock for SystemClock {
    fn local_time(&self) -> NaiveTime {
        match self.timezone {
            Some(tz) => Utc::now().with_timezone(&tz).time(),
            None => Local::now().time(),
        }
    }
}

/// Clock pinned to a time of day. Can be moved with [`FixedClock::set`].
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: Arc<Mutex<NaiveTime>>,
}

impl FixedClock {
    pub fn new(time: NaiveTime) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    pub fn set(&self, time: NaiveTime) {
        if let Ok(mut guard) = self.time.lock() {
            *guard = time;
        }
    }
}

impl Clock for FixedClock {
    fn local_time(&self) -> NaiveTime {
        self.time
            .lock()
            .map(|guard| *guard)
            .unwrap_or(NaiveTime::MIN)
    }
}
