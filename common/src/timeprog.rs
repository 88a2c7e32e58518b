use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

pub const DAYS_PER_WEEK: usize = 7;
pub const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn index(self) -> usize {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index % 7 {
            0 => Self::Mon,
            1 => Self::Tue,
            2 => Self::Wed,
            3 => Self::Thu,
            4 => Self::Fri,
            5 => Self::Sat,
            _ => Self::Sun,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }
}

/// Minute-resolution time of day in `[00:00, 24:00]`. The device uses
/// `"24:00"` to mean end-of-day; it is a valid range end but never a start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    minutes: u16,
}

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay { minutes: 0 };
    pub const END_OF_DAY: TimeOfDay = TimeOfDay {
        minutes: MINUTES_PER_DAY,
    };

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(Self { minutes })
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Self::from_minutes((hour * 60 + minute) as u16)
    }

    pub fn minutes(self) -> u16 {
        self.minutes
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTime(value.to_string());

        let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
        let hours: u16 = hours.parse().map_err(|_| invalid())?;
        let minutes: u16 = minutes.parse().map_err(|_| invalid())?;
        if minutes > 59 {
            return Err(invalid());
        }

        Self::from_minutes(hours * 60 + minutes).ok_or_else(invalid)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// One switching window of a day schedule. `state` is the device's on/off
/// flag (1 = circuit active). An entry with `start == end` is the device's
/// marker for an unused slot and never matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub state: u8,
}

impl TimeRange {
    pub fn is_unused(&self) -> bool {
        self.start == self.end
    }

    /// Half-open containment: start inclusive, end exclusive. A range whose
    /// end precedes its start crosses midnight and matches both the late
    /// evening and the early morning side.
    pub fn contains(&self, point: TimeOfDay) -> bool {
        if self.is_unused() {
            return false;
        }
        if self.start > self.end {
            point >= self.start || point < self.end
        } else {
            point >= self.start && point < self.end
        }
    }
}

/// Entries for a single weekday, kept in device insertion order. Matching
/// scans in order; the first covering entry wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaySchedule {
    pub entries: Vec<TimeRange>,
}

impl DaySchedule {
    pub fn covering_entry(&self, point: TimeOfDay) -> Option<&TimeRange> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_unused())
            .find(|entry| entry.contains(point))
    }
}

/// A device weekly time program. `entries` holds one `DaySchedule` per
/// weekday, Monday-first in memory; translation to the device's own weekday
/// numbering happens at the gateway boundary. Unrecognized device fields are
/// kept in `extra` so a read/patch/write cycle never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekProgram {
    pub index: u32,
    pub name: String,
    pub entries: Vec<DaySchedule>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WeekProgram {
    pub fn day_schedule(&self, day: DayOfWeek) -> Result<&DaySchedule, ScheduleError> {
        self.entries
            .get(day.index())
            .ok_or(ScheduleError::DayNotFound(day))
    }

    /// Returns a copy of this program in which `hour:00` on `day` falls into
    /// an active range. An existing covering range with state 0 is switched
    /// on in place; a covering range that is already active leaves the
    /// program untouched; otherwise a one-hour range is appended to the end
    /// of that day's list. The receiver is never mutated, so a snapshot taken
    /// before patching stays pristine.
    pub fn force_active(&self, day: DayOfWeek, hour: u32) -> Result<WeekProgram, ScheduleError> {
        let point = TimeOfDay::from_hm(hour, 0)
            .ok_or_else(|| ScheduleError::InvalidTime(format!("{hour}:00")))?;

        let mut patched = self.clone();
        let schedule = patched
            .entries
            .get_mut(day.index())
            .ok_or(ScheduleError::DayNotFound(day))?;

        for entry in schedule.entries.iter_mut() {
            if entry.is_unused() {
                continue;
            }
            if entry.contains(point) {
                if entry.state == 0 {
                    entry.state = 1;
                }
                return Ok(patched);
            }
        }

        let end = TimeOfDay::from_hm((hour + 1) % 24, 0)
            .unwrap_or(TimeOfDay::MIDNIGHT);
        schedule.entries.push(TimeRange {
            start: point,
            end,
            state: 1,
        });
        Ok(patched)
    }
}
