use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use heatpump_common::{
    DayOfWeek, GatewayError, HotWaterConfig, OverrideError, OverrideStatus, ProgramSnapshot,
};

use crate::gateway::HeatPumpGateway;

/// The override lifecycle for the hot water circuit: push the setpoint up and
/// the hysteresis band down, mark the current hour active in the device's
/// weekly program, and undo all of it later from a saved snapshot.
///
/// One instance owns all override state. The state mutex is held across the
/// entire start/stop transition because the snapshot/patch/write sequence is
/// order dependent; serializing here is what makes two racing `start` calls
/// resolve to exactly one snapshot.
pub struct HotWaterOverride {
    gateway: Arc<dyn HeatPumpGateway>,
    config: HotWaterConfig,
    timezone: Tz,
    state: Mutex<OverrideState>,
}

/// A snapshot exists if and only if the state is `Forcing`, enforced by
/// construction: `Idle` has nowhere to put one.
enum OverrideState {
    Idle,
    Forcing(ActiveOverride),
}

struct ActiveOverride {
    target_temp: f64,
    hysteresis: f64,
    restore_temp: f64,
    restore_hysteresis: f64,
    started_at: DateTime<Utc>,
    schedule_patched: bool,
    snapshot: Option<ProgramSnapshot>,
}

impl HotWaterOverride {
    pub fn new(gateway: Arc<dyn HeatPumpGateway>, config: HotWaterConfig, timezone: Tz) -> Self {
        Self {
            gateway,
            config,
            timezone,
            state: Mutex::new(OverrideState::Idle),
        }
    }

    pub fn config(&self) -> &HotWaterConfig {
        &self.config
    }

    /// Begins an override. The temperature-side writes are the user-visible
    /// contract: hysteresis lands before the setpoint so the device cannot
    /// transiently re-latch off, and a failure of either aborts the start.
    /// Everything touching the weekly program is best effort.
    pub async fn start(&self, target_temp: f64, hysteresis: f64) -> Result<(), OverrideError> {
        if !(self.config.min_target_c..=self.config.max_target_c).contains(&target_temp) {
            return Err(OverrideError::InvalidInput(format!(
                "target {target_temp} outside allowed band {}..={}",
                self.config.min_target_c, self.config.max_target_c
            )));
        }
        if !hysteresis.is_finite() || hysteresis <= 0.0 {
            return Err(OverrideError::InvalidInput(format!(
                "hysteresis {hysteresis} must be positive"
            )));
        }

        let mut state = self.state.lock().await;
        if matches!(*state, OverrideState::Forcing(_)) {
            return Err(OverrideError::AlreadyActive);
        }

        let restore_temp = match self.gateway.get_parameter(&self.config.setpoint_param).await {
            Ok(value) => value,
            Err(err) => {
                warn!("current setpoint unreadable, will restore configured normal value: {err}");
                self.config.normal_temp_c
            }
        };
        let restore_hysteresis = match self
            .gateway
            .get_parameter(&self.config.hysteresis_param)
            .await
        {
            Ok(value) => value,
            Err(err) => {
                warn!("current hysteresis unreadable, will restore configured normal value: {err}");
                self.config.normal_hysteresis_k
            }
        };

        let now = Utc::now().with_timezone(&self.timezone);
        let day = DayOfWeek::from_chrono(now.weekday());

        let snapshot = match self.capture_snapshot(day).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!("hot water program snapshot failed, continuing without schedule edit: {err}");
                None
            }
        };

        self.gateway
            .set_parameter(&self.config.hysteresis_param, hysteresis)
            .await?;
        self.gateway
            .set_parameter(&self.config.setpoint_param, target_temp)
            .await?;

        let mut schedule_patched = false;
        if let Some(snapshot) = &snapshot {
            match snapshot.program.force_active(day, now.hour()) {
                Ok(patched) => match self
                    .gateway
                    .put_week_program(snapshot.program_id, &patched)
                    .await
                {
                    Ok(()) => {
                        schedule_patched = true;
                        info!(
                            program = snapshot.program_id,
                            day = ?day,
                            hour = now.hour(),
                            "hot water program patched for override"
                        );
                    }
                    // Snapshot stays in place: restore can still write it back later.
                    Err(err) => warn!("patched hot water program write failed: {err}"),
                },
                Err(err) => warn!("hot water program could not be patched: {err}"),
            }
        }

        info!(target_temp, hysteresis, "hot water override started");
        *state = OverrideState::Forcing(ActiveOverride {
            target_temp,
            hysteresis,
            restore_temp,
            restore_hysteresis,
            started_at: Utc::now(),
            schedule_patched,
            snapshot,
        });
        Ok(())
    }

    /// Ends the override. A no-op when idle, so auto-stop and user action can
    /// race without harm. The temperature reset is the primary guarantee: it
    /// goes first, and its failure keeps the override active so the caller
    /// can retry with the snapshot intact. A failed schedule restore is only
    /// logged.
    pub async fn stop(&self) -> Result<(), OverrideError> {
        let mut state = self.state.lock().await;
        let OverrideState::Forcing(active) = &*state else {
            return Ok(());
        };

        self.gateway
            .set_parameter(&self.config.hysteresis_param, active.restore_hysteresis)
            .await?;
        self.gateway
            .set_parameter(&self.config.setpoint_param, active.restore_temp)
            .await?;

        if let Some(snapshot) = &active.snapshot {
            match self
                .gateway
                .put_week_program(snapshot.program_id, &snapshot.program)
                .await
            {
                Ok(()) => info!(
                    program = snapshot.program_id,
                    captured_day = ?snapshot.captured_day,
                    captured_at = %snapshot.captured_at,
                    "hot water program restored from snapshot"
                ),
                Err(err) => warn!("hot water program restore failed: {err}"),
            }
        }

        info!("hot water override stopped");
        *state = OverrideState::Idle;
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        matches!(*self.state.lock().await, OverrideState::Forcing(_))
    }

    /// Target of the running override, `None` when idle. The auto-stop
    /// monitor keys on this so that an idle controller causes no device
    /// traffic at all.
    pub async fn active_target(&self) -> Option<f64> {
        match &*self.state.lock().await {
            OverrideState::Forcing(active) => Some(active.target_temp),
            OverrideState::Idle => None,
        }
    }

    /// Heuristic classifier for device state this controller did not set
    /// itself: either the exact force calibration is live, or the setpoint
    /// sits above the normal ceiling. Pure; no state transition.
    pub fn detect_externally_forced(&self, setpoint: f64, hysteresis: f64) -> bool {
        let exact_force = approx_eq(setpoint, self.config.force_temp_c)
            && approx_eq(hysteresis, self.config.force_hysteresis_k);
        exact_force || setpoint > self.config.normal_temp_c
    }

    /// Startup reconciliation. Override state does not survive a restart, so
    /// if the device still reports a forced setpoint from a previous run this
    /// adopts it as a snapshot-less override; the auto-stop monitor then
    /// terminates it the ordinary way, restoring the configured normal
    /// values.
    pub async fn reconcile_with_device(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if matches!(*state, OverrideState::Forcing(_)) {
            return Ok(());
        }

        let setpoint = self.gateway.get_parameter(&self.config.setpoint_param).await?;
        let hysteresis = self
            .gateway
            .get_parameter(&self.config.hysteresis_param)
            .await?;

        if !self.detect_externally_forced(setpoint, hysteresis) {
            debug!(setpoint, hysteresis, "device hot water state looks normal");
            return Ok(());
        }

        warn!(
            setpoint,
            hysteresis, "device reports a forced hot water setpoint, adopting it as active override"
        );
        *state = OverrideState::Forcing(ActiveOverride {
            target_temp: setpoint,
            hysteresis,
            restore_temp: self.config.normal_temp_c,
            restore_hysteresis: self.config.normal_hysteresis_k,
            started_at: Utc::now(),
            schedule_patched: false,
            snapshot: None,
        });
        Ok(())
    }

    /// Dashboard status view. Live readings and the forced-state heuristic
    /// are best effort; a dead device still yields a usable view.
    pub async fn status(&self) -> OverrideStatus {
        let live_temp = match self
            .gateway
            .get_live_temperature(&self.config.live_sensor)
            .await
        {
            Ok(value) => value,
            Err(err) => {
                debug!("live temperature unavailable for status view: {err}");
                None
            }
        };

        let device_setpoint = self.gateway.get_parameter(&self.config.setpoint_param).await;
        let device_hysteresis = self
            .gateway
            .get_parameter(&self.config.hysteresis_param)
            .await;
        let externally_forced = match (device_setpoint, device_hysteresis) {
            (Ok(setpoint), Ok(hysteresis)) => self.detect_externally_forced(setpoint, hysteresis),
            _ => false,
        };

        match &*self.state.lock().await {
            OverrideState::Forcing(active) => OverrideStatus {
                active: true,
                target_temp: Some(active.target_temp),
                hysteresis: Some(active.hysteresis),
                live_temp,
                started_at_epoch: Some(active.started_at.timestamp()),
                schedule_patched: active.schedule_patched,
                externally_forced,
            },
            OverrideState::Idle => OverrideStatus {
                active: false,
                target_temp: None,
                hysteresis: None,
                live_temp,
                started_at_epoch: None,
                schedule_patched: false,
                externally_forced,
            },
        }
    }

    /// Resolves the hot water program by display name, falling back to the
    /// configured well-known index, then reads it whole.
    async fn capture_snapshot(&self, day: DayOfWeek) -> Result<ProgramSnapshot, GatewayError> {
        let program_id = match self.gateway.list_programs().await {
            Ok(programs) => programs
                .iter()
                .find(|info| info.name.eq_ignore_ascii_case(&self.config.program_name))
                .map(|info| info.index)
                .unwrap_or_else(|| {
                    debug!(
                        name = %self.config.program_name,
                        fallback = self.config.fallback_program_index,
                        "program name not listed, using fallback index"
                    );
                    self.config.fallback_program_index
                }),
            Err(err) => {
                debug!("program listing failed, using fallback index: {err}");
                self.config.fallback_program_index
            }
        };

        let program = self.gateway.get_week_program(program_id).await?;
        Ok(ProgramSnapshot {
            program_id,
            program,
            captured_day: day,
            captured_at: Utc::now(),
        })
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use heatpump_common::HotWaterConfig;

    use super::*;
    use crate::testutil::RecordingGateway;

    fn controller(gateway: Arc<RecordingGateway>) -> HotWaterOverride {
        HotWaterOverride::new(gateway, HotWaterConfig::default(), chrono_tz::UTC)
    }

    #[tokio::test]
    async fn start_snapshots_writes_and_patches() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway.clone());

        hotwater.start(48.0, 2.0).await.unwrap();

        assert!(hotwater.is_active().await);
        assert_eq!(hotwater.active_target().await, Some(48.0));
        assert_eq!(gateway.parameter("WW Hysterese Normaltemp."), Some(2.0));
        assert_eq!(gateway.parameter("WW Normaltemp."), Some(48.0));
        // The device program now differs from the snapshot by the patch.
        assert_ne!(gateway.program(), RecordingGateway::default_program());

        let calls = gateway.calls();
        let hysteresis_write = calls
            .iter()
            .position(|call| call == "set_param:WW Hysterese Normaltemp.")
            .unwrap();
        let setpoint_write = calls
            .iter()
            .position(|call| call == "set_param:WW Normaltemp.")
            .unwrap();
        assert!(hysteresis_write < setpoint_write);
    }

    #[tokio::test]
    async fn round_trip_restores_program_and_parameters() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway.clone());

        hotwater.start(48.0, 2.0).await.unwrap();
        hotwater.stop().await.unwrap();

        assert!(!hotwater.is_active().await);
        assert_eq!(gateway.program(), RecordingGateway::default_program());
        assert_eq!(gateway.parameter("WW Normaltemp."), Some(46.0));
        assert_eq!(gateway.parameter("WW Hysterese Normaltemp."), Some(7.0));
    }

    #[tokio::test]
    async fn second_start_fails_while_forcing() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway.clone());

        hotwater.start(48.0, 2.0).await.unwrap();
        let second = hotwater.start(50.0, 2.0).await;

        assert!(matches!(second, Err(OverrideError::AlreadyActive)));
        assert_eq!(hotwater.active_target().await, Some(48.0));
    }

    #[tokio::test]
    async fn racing_starts_take_exactly_one_snapshot() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway.clone());

        let (first, second) = tokio::join!(hotwater.start(48.0, 2.0), hotwater.start(48.0, 2.0));

        assert!(first.is_ok() != second.is_ok());
        let snapshot_reads = gateway
            .calls()
            .iter()
            .filter(|call| call.starts_with("get_program:"))
            .count();
        assert_eq!(snapshot_reads, 1);
        assert!(hotwater.is_active().await);
    }

    #[tokio::test]
    async fn stop_when_idle_touches_nothing() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway.clone());

        hotwater.stop().await.unwrap();

        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn unreachable_schedule_does_not_block_the_temperature_override() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        gateway.fail_program_reads(true);
        let hotwater = controller(gateway.clone());

        hotwater.start(48.0, 2.0).await.unwrap();

        assert!(hotwater.is_active().await);
        assert_eq!(gateway.parameter("WW Normaltemp."), Some(48.0));
        assert!(gateway
            .calls()
            .iter()
            .all(|call| !call.starts_with("put_program:")));

        // And stop still resets the temperatures.
        hotwater.stop().await.unwrap();
        assert_eq!(gateway.parameter("WW Normaltemp."), Some(46.0));
    }

    #[tokio::test]
    async fn failed_setpoint_write_aborts_the_start() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        gateway.fail_parameter_writes(true);
        let hotwater = controller(gateway.clone());

        let result = hotwater.start(48.0, 2.0).await;

        assert!(matches!(
            result,
            Err(OverrideError::Gateway(GatewayError::Rejected(_)))
        ));
        assert!(!hotwater.is_active().await);
        // No schedule write may happen after the aborted temperature write.
        assert!(gateway
            .calls()
            .iter()
            .all(|call| !call.starts_with("put_program:")));
    }

    #[tokio::test]
    async fn failed_schedule_patch_still_forces_and_keeps_the_snapshot() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        gateway.fail_program_writes(true);
        let hotwater = controller(gateway.clone());

        hotwater.start(48.0, 2.0).await.unwrap();
        assert!(hotwater.is_active().await);
        assert_eq!(gateway.program(), RecordingGateway::default_program());

        // Restore can still write the snapshot back once the device recovers.
        gateway.fail_program_writes(false);
        gateway.program_mut(|program| {
            program.entries[0].entries.clear();
        });
        hotwater.stop().await.unwrap();
        assert_eq!(gateway.program(), RecordingGateway::default_program());
    }

    #[tokio::test]
    async fn failed_temperature_reset_keeps_the_override_retryable() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway.clone());

        hotwater.start(48.0, 2.0).await.unwrap();

        gateway.fail_parameter_writes(true);
        assert!(hotwater.stop().await.is_err());
        assert!(hotwater.is_active().await);

        gateway.fail_parameter_writes(false);
        hotwater.stop().await.unwrap();
        assert!(!hotwater.is_active().await);
        assert_eq!(gateway.program(), RecordingGateway::default_program());
        assert_eq!(gateway.parameter("WW Normaltemp."), Some(46.0));
    }

    #[tokio::test]
    async fn out_of_band_target_is_rejected_without_device_traffic() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway.clone());

        let result = hotwater.start(80.0, 2.0).await;

        assert!(matches!(result, Err(OverrideError::InvalidInput(_))));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn detection_matches_force_calibration_or_raised_setpoint() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway);

        assert!(hotwater.detect_externally_forced(48.0, 2.0));
        assert!(hotwater.detect_externally_forced(47.0, 7.0));
        assert!(hotwater.detect_externally_forced(48.0, 7.0));
        assert!(!hotwater.detect_externally_forced(46.0, 7.0));
        assert!(!hotwater.detect_externally_forced(44.0, 2.0));
    }

    #[tokio::test]
    async fn reconciliation_adopts_a_forced_device_state() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        gateway.set_parameter_value("WW Normaltemp.", 48.0);
        gateway.set_parameter_value("WW Hysterese Normaltemp.", 2.0);
        let hotwater = controller(gateway.clone());

        hotwater.reconcile_with_device().await.unwrap();

        assert!(hotwater.is_active().await);
        assert_eq!(hotwater.active_target().await, Some(48.0));

        // Stopping the adopted override falls back to configured normals.
        hotwater.stop().await.unwrap();
        assert_eq!(gateway.parameter("WW Normaltemp."), Some(46.0));
        assert_eq!(gateway.parameter("WW Hysterese Normaltemp."), Some(7.0));
    }

    #[tokio::test]
    async fn reconciliation_leaves_a_normal_device_idle() {
        let gateway = Arc::new(RecordingGateway::with_defaults());
        let hotwater = controller(gateway);

        hotwater.reconcile_with_device().await.unwrap();

        assert!(!hotwater.is_active().await);
    }
}
