use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::gateway::HeatPumpGateway;
use crate::hotwater::HotWaterOverride;

/// Ends a running override once the water is hot enough. Polled from the
/// control loop; it owns no state of its own and does nothing while the
/// controller is idle, so an idle system causes no device traffic.
pub struct AutoStopMonitor {
    controller: Arc<HotWaterOverride>,
    gateway: Arc<dyn HeatPumpGateway>,
    sensor: String,
}

impl AutoStopMonitor {
    pub fn new(
        controller: Arc<HotWaterOverride>,
        gateway: Arc<dyn HeatPumpGateway>,
        sensor: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            gateway,
            sensor: sensor.into(),
        }
    }

    /// One cooperative check. A missing or unreadable measurement never
    /// triggers anything; `stop` itself is an idempotent no-op when another
    /// path already ended the override.
    pub async fn poll(&self) {
        let Some(target) = self.controller.active_target().await else {
            return;
        };

        let live = match self.gateway.get_live_temperature(&self.sensor).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!(sensor = %self.sensor, "no live reading, auto-stop check skipped");
                return;
            }
            Err(err) => {
                warn!("live temperature read failed, auto-stop check skipped: {err}");
                return;
            }
        };

        if live >= target {
            info!(live, target, "hot water target reached, stopping override");
            if let Err(err) = self.controller.stop().await {
                warn!("auto-stop could not end the override: {err}");
            }
        }
    }
}
