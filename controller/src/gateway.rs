use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use heatpump_common::{DaySchedule, DeviceConfig, GatewayError, ProgramInfo, WeekProgram};

/// Read/write access to the heat pump's parameters and weekly time programs.
/// Everything above this trait works in controller-local weekday order
/// (Monday = 0) and plain numbers; transport and device quirks stay behind it.
#[async_trait]
pub trait HeatPumpGateway: Send + Sync {
    async fn get_week_program(&self, id: u32) -> Result<WeekProgram, GatewayError>;

    /// Full overwrite of the stored program, not a diff.
    async fn put_week_program(&self, id: u32, program: &WeekProgram) -> Result<(), GatewayError>;

    async fn list_programs(&self) -> Result<Vec<ProgramInfo>, GatewayError>;

    async fn get_parameter(&self, name: &str) -> Result<f64, GatewayError>;

    async fn set_parameter(&self, name: &str, value: f64) -> Result<(), GatewayError>;

    /// `Ok(None)` when the device answered but the sensor value is missing;
    /// callers must treat that the same as unavailable.
    async fn get_live_temperature(&self, sensor: &str) -> Result<Option<f64>, GatewayError>;
}

/// Gateway implementation for the device's htrest-style REST interface
/// (`/param/{name}`, `/timeprog/{id}`, `/fastquery`).
pub struct HtRestGateway {
    http: reqwest::Client,
    base: Url,
    week_starts_sunday: bool,
}

impl HtRestGateway {
    pub fn new(config: &DeviceConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.base_url)?;
        if base.cannot_be_a_base() {
            anyhow::bail!("device base url '{}' cannot hold a path", config.base_url);
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base,
            week_starts_sunday: config.week_starts_sunday,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Parameter names carry spaces and dots; segment extension encodes them.
        url.path_segments_mut()
            .expect("base url validated at construction")
            .pop_if_empty()
            .extend(segments);
        url
    }
}

#[async_trait]
impl HeatPumpGateway for HtRestGateway {
    async fn get_week_program(&self, id: u32) -> Result<WeekProgram, GatewayError> {
        let url = self.endpoint(&["timeprog", &id.to_string()]);
        let response = self.http.get(url).send().await.map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(GatewayError::NotFound(format!("time program {id}")))
            }
            status if !status.is_success() => {
                return Err(GatewayError::Unavailable(format!(
                    "GET timeprog/{id} returned {status}"
                )))
            }
            _ => {}
        }

        let mut program: WeekProgram = response.json().await.map_err(transport)?;
        program.entries = to_local_order(&program.entries, self.week_starts_sunday);
        Ok(program)
    }

    async fn put_week_program(&self, id: u32, program: &WeekProgram) -> Result<(), GatewayError> {
        let mut wire = program.clone();
        wire.entries = to_device_order(&wire.entries, self.week_starts_sunday);

        let url = self.endpoint(&["timeprog", &id.to_string()]);
        let response = self
            .http
            .put(url)
            .json(&wire)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(GatewayError::Rejected(format!(
                "PUT timeprog/{id} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn list_programs(&self) -> Result<Vec<ProgramInfo>, GatewayError> {
        let url = self.endpoint(&["timeprog", ""]);
        let response = self.http.get(url).send().await.map_err(transport)?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "GET timeprog/ returned {}",
                response.status()
            )));
        }

        response.json().await.map_err(transport)
    }

    async fn get_parameter(&self, name: &str) -> Result<f64, GatewayError> {
        let url = self.endpoint(&["param", name]);
        let response = self.http.get(url).send().await.map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(GatewayError::NotFound(format!("parameter '{name}'")))
            }
            status if !status.is_success() => {
                return Err(GatewayError::Unavailable(format!(
                    "GET param/{name} returned {status}"
                )))
            }
            _ => {}
        }

        let body: Value = response.json().await.map_err(transport)?;
        parse_param_value(&body)
            .ok_or_else(|| GatewayError::Unavailable(format!("parameter '{name}' has no value")))
    }

    async fn set_parameter(&self, name: &str, value: f64) -> Result<(), GatewayError> {
        let url = self.endpoint(&["param", name]);
        let response = self
            .http
            .put(url)
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(GatewayError::Rejected(format!(
                "PUT param/{name} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn get_live_temperature(&self, sensor: &str) -> Result<Option<f64>, GatewayError> {
        let url = self.endpoint(&["fastquery"]);
        let response = self.http.get(url).send().await.map_err(transport)?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "GET fastquery returned {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(transport)?;
        let value = extract_sensor_value(&body, sensor);
        if value.is_none() {
            debug!(sensor, "fastquery response carries no reading for sensor");
        }
        Ok(value)
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable(err.to_string())
}

fn parse_param_value(body: &Value) -> Option<f64> {
    body.as_f64()
        .or_else(|| body.get("value").and_then(Value::as_f64))
}

fn extract_sensor_value(body: &Value, sensor: &str) -> Option<f64> {
    let entry = body
        .get(sensor)
        .or_else(|| body.get("values").and_then(|values| values.get(sensor)))?;
    parse_param_value(entry)
}

/// The controller keeps week programs Monday-first; some devices store them
/// Sunday-first. These two rotations are each other's inverse and are the
/// only place weekday numbering is translated.
pub(crate) fn to_device_order(days: &[DaySchedule], week_starts_sunday: bool) -> Vec<DaySchedule> {
    let mut days = days.to_vec();
    if week_starts_sunday && days.len() == heatpump_common::DAYS_PER_WEEK {
        days.rotate_right(1);
    }
    days
}

pub(crate) fn to_local_order(days: &[DaySchedule], week_starts_sunday: bool) -> Vec<DaySchedule> {
    let mut days = days.to_vec();
    if week_starts_sunday && days.len() == heatpump_common::DAYS_PER_WEEK {
        days.rotate_left(1);
    }
    days
}
