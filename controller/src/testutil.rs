use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use heatpump_common::{
    DaySchedule, GatewayError, ProgramInfo, TimeOfDay, TimeRange, WeekProgram, DAYS_PER_WEEK,
};

use crate::gateway::HeatPumpGateway;

/// In-memory device double. Records every gateway call in order and can be
/// told to fail specific call families, which is all the override tests need.
pub struct RecordingGateway {
    program: Mutex<WeekProgram>,
    params: Mutex<HashMap<String, f64>>,
    live_temp: Mutex<Option<f64>>,
    calls: Mutex<Vec<String>>,
    fail_program_reads: AtomicBool,
    fail_program_writes: AtomicBool,
    fail_parameter_writes: AtomicBool,
    fail_live_reads: AtomicBool,
}

impl RecordingGateway {
    /// Device with the hot water program at index 2 and normal calibration
    /// (setpoint 46, hysteresis 7) live.
    pub fn with_defaults() -> Self {
        let mut params = HashMap::new();
        params.insert("WW Normaltemp.".to_string(), 46.0);
        params.insert("WW Hysterese Normaltemp.".to_string(), 7.0);

        Self {
            program: Mutex::new(Self::default_program()),
            params: Mutex::new(params),
            live_temp: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            fail_program_reads: AtomicBool::new(false),
            fail_program_writes: AtomicBool::new(false),
            fail_parameter_writes: AtomicBool::new(false),
            fail_live_reads: AtomicBool::new(false),
        }
    }

    /// Every day carries one inactive full-day range, so a patch at any wall
    /// clock hour flips exactly one state flag and stays deterministic.
    pub fn default_program() -> WeekProgram {
        let full_day = DaySchedule {
            entries: vec![TimeRange {
                start: TimeOfDay::MIDNIGHT,
                end: TimeOfDay::END_OF_DAY,
                state: 0,
            }],
        };
        WeekProgram {
            index: 2,
            name: "Warmwasser".to_string(),
            entries: vec![full_day; DAYS_PER_WEEK],
            extra: serde_json::Map::new(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn program(&self) -> WeekProgram {
        self.program.lock().unwrap().clone()
    }

    pub fn program_mut(&self, edit: impl FnOnce(&mut WeekProgram)) {
        edit(&mut self.program.lock().unwrap());
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.params.lock().unwrap().get(name).copied()
    }

    pub fn set_parameter_value(&self, name: &str, value: f64) {
        self.params.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn set_live_temperature(&self, value: Option<f64>) {
        *self.live_temp.lock().unwrap() = value;
    }

    pub fn fail_program_reads(&self, fail: bool) {
        self.fail_program_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_program_writes(&self, fail: bool) {
        self.fail_program_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_parameter_writes(&self, fail: bool) {
        self.fail_parameter_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_live_reads(&self, fail: bool) {
        self.fail_live_reads.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl HeatPumpGateway for RecordingGateway {
    async fn get_week_program(&self, id: u32) -> Result<WeekProgram, GatewayError> {
        self.record(format!("get_program:{id}"));
        if self.fail_program_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated outage".to_string()));
        }
        Ok(self.program.lock().unwrap().clone())
    }

    async fn put_week_program(&self, id: u32, program: &WeekProgram) -> Result<(), GatewayError> {
        self.record(format!("put_program:{id}"));
        if self.fail_program_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("simulated rejection".to_string()));
        }
        *self.program.lock().unwrap() = program.clone();
        Ok(())
    }

    async fn list_programs(&self) -> Result<Vec<ProgramInfo>, GatewayError> {
        self.record("list_programs".to_string());
        Ok(vec![
            ProgramInfo {
                index: 0,
                name: "Heizkreis".to_string(),
            },
            ProgramInfo {
                index: 2,
                name: "Warmwasser".to_string(),
            },
        ])
    }

    async fn get_parameter(&self, name: &str) -> Result<f64, GatewayError> {
        self.record(format!("get_param:{name}"));
        self.params
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| GatewayError::NotFound(format!("parameter '{name}'")))
    }

    async fn set_parameter(&self, name: &str, value: f64) -> Result<(), GatewayError> {
        self.record(format!("set_param:{name}"));
        if self.fail_parameter_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("simulated rejection".to_string()));
        }
        self.params.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    async fn get_live_temperature(&self, sensor: &str) -> Result<Option<f64>, GatewayError> {
        self.record(format!("get_live:{sensor}"));
        if self.fail_live_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated outage".to_string()));
        }
        Ok(*self.live_temp.lock().unwrap())
    }
}
