pub mod config;
pub mod error;
pub mod timeprog;
pub mod types;

pub use config::{DeviceConfig, HotWaterConfig, RuntimeConfig};
pub use error::{GatewayError, OverrideError, ScheduleError};
pub use timeprog::{DayOfWeek, DaySchedule, TimeOfDay, TimeRange, WeekProgram, DAYS_PER_WEEK};
pub use types::{OverrideStatus, ProgramInfo, ProgramSnapshot};
