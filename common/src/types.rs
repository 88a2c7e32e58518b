use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeprog::{DayOfWeek, WeekProgram};

/// One entry of the device's time program listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramInfo {
    pub index: u32,
    pub name: String,
}

/// Everything needed to undo an override: the untouched program as read from
/// the device plus where and when it was captured. Held only while an
/// override is active and dropped on successful restore.
#[derive(Debug, Clone)]
pub struct ProgramSnapshot {
    pub program_id: u32,
    pub program: WeekProgram,
    pub captured_day: DayOfWeek,
    pub captured_at: DateTime<Utc>,
}

/// Status view consumed by the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideStatus {
    pub active: bool,
    #[serde(rename = "targetTemp")]
    pub target_temp: Option<f64>,
    pub hysteresis: Option<f64>,
    #[serde(rename = "liveTemp")]
    pub live_temp: Option<f64>,
    #[serde(rename = "startedAtEpoch")]
    pub started_at_epoch: Option<i64>,
    #[serde(rename = "schedulePatched")]
    pub schedule_patched: bool,
    #[serde(rename = "externallyForced")]
    pub externally_forced: bool,
}
