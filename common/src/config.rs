use serde::{Deserialize, Serialize};

/// Calibration and naming of the hot water override. The force/normal values
/// default to the device calibration this dashboard was written against; the
/// detection heuristic in the controller compares against these same fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotWaterConfig {
    pub force_temp_c: f64,
    pub force_hysteresis_k: f64,
    pub normal_temp_c: f64,
    pub normal_hysteresis_k: f64,
    pub min_target_c: f64,
    pub max_target_c: f64,
    pub setpoint_param: String,
    pub hysteresis_param: String,
    pub live_sensor: String,
    pub program_name: String,
    pub fallback_program_index: u32,
}

impl Default for HotWaterConfig {
    fn default() -> Self {
        Self {
            force_temp_c: 48.0,
            force_hysteresis_k: 2.0,
            normal_temp_c: 46.0,
            normal_hysteresis_k: 7.0,
            min_target_c: 25.0,
            max_target_c: 60.0,
            setpoint_param: "WW Normaltemp.".to_string(),
            hysteresis_param: "WW Hysterese Normaltemp.".to_string(),
            live_sensor: "Temp. Brauchwasser".to_string(),
            program_name: "Warmwasser".to_string(),
            fallback_program_index: 1,
        }
    }
}

impl HotWaterConfig {
    pub fn sanitize(&mut self) {
        self.min_target_c = self.min_target_c.clamp(20.0, 60.0);
        self.max_target_c = self.max_target_c.clamp(self.min_target_c, 65.0);
        self.force_temp_c = self.force_temp_c.clamp(self.min_target_c, self.max_target_c);
        self.force_hysteresis_k = self.force_hysteresis_k.clamp(0.5, 15.0);
        self.normal_hysteresis_k = self.normal_hysteresis_k.clamp(0.5, 15.0);
        self.normal_temp_c = self.normal_temp_c.clamp(self.min_target_c, self.max_target_c);
    }
}

/// Where the heat pump's REST interface lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// The controller numbers weekdays Monday-first; set this when the
    /// device's time program entries start on Sunday instead.
    pub week_starts_sunday: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.1.50/api/v1".to_string(),
            timeout_ms: 20_000,
            week_starts_sunday: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub device: DeviceConfig,
    pub hotwater: HotWaterConfig,
    pub timezone: String,
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            hotwater: HotWaterConfig::default(),
            timezone: "Europe/Vienna".to_string(),
            poll_interval_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.hotwater.sanitize();
        if self.poll_interval_ms < 1_000 {
            self.poll_interval_ms = 1_000;
        }
        if self.device.timeout_ms < 500 {
            self.device.timeout_ms = 500;
        }
    }
}
