use std::{collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use heatpump_common::{GatewayError, OverrideError, RuntimeConfig};

use crate::gateway::{HeatPumpGateway, HtRestGateway};
use crate::hotwater::HotWaterOverride;
use crate::monitor::AutoStopMonitor;

#[derive(Clone)]
struct AppState {
    hotwater: Arc<HotWaterOverride>,
    gateway: Arc<dyn HeatPumpGateway>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    config.sanitize();

    if let Ok(base_url) = std::env::var("HTREST_BASE_URL") {
        config.device.base_url = base_url;
    }

    let timezone: Tz = config
        .timezone
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid timezone '{}': {err}", config.timezone))?;

    let gateway: Arc<dyn HeatPumpGateway> = Arc::new(
        HtRestGateway::new(&config.device).context("failed to build device gateway")?,
    );

    let hotwater = Arc::new(HotWaterOverride::new(
        gateway.clone(),
        config.hotwater.clone(),
        timezone,
    ));

    // No override state survives a restart; adopt whatever the device still
    // reports before the monitor starts watching.
    if let Err(err) = hotwater.reconcile_with_device().await {
        warn!("device state reconciliation failed: {err}");
    }

    let monitor = AutoStopMonitor::new(
        hotwater.clone(),
        gateway.clone(),
        config.hotwater.live_sensor.clone(),
    );
    spawn_monitor_loop(monitor, config.poll_interval_ms);

    let app_state = AppState { hotwater, gateway };

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/hotwater/start", post(handle_start_override))
        .route("/api/hotwater/stop", post(handle_stop_override))
        .route("/api/programs", get(handle_list_programs))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_monitor_loop(monitor: AutoStopMonitor, poll_interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(poll_interval_ms));
        loop {
            interval.tick().await;
            monitor.poll().await;
        }
    });
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("HEATPUMP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./heatpump.json"));

    match tokio::fs::read(&path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hotwater.status().await)
}

async fn handle_start_override(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let config = state.hotwater.config();

    let target = match optional_number(&params, "target") {
        Ok(value) => value.unwrap_or(config.force_temp_c),
        Err(response) => return response,
    };
    let hysteresis = match optional_number(&params, "hysteresis") {
        Ok(value) => value.unwrap_or(config.force_hysteresis_k),
        Err(response) => return response,
    };

    if let Err(err) = state.hotwater.start(target, hysteresis).await {
        return override_error_response(err);
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_stop_override(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(err) = state.hotwater.stop().await {
        return override_error_response(err);
    }
    handle_get_status(State(state)).await.into_response()
}

async fn handle_list_programs(State(state): State<AppState>) -> impl IntoResponse {
    match state.gateway.list_programs().await {
        Ok(programs) => Json(programs).into_response(),
        Err(err) => {
            warn!("program listing failed: {err}");
            let status = gateway_status(&err);
            error_response(status, &err.to_string())
        }
    }
}

fn optional_number(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<f64>, axum::response::Response> {
    match params.get(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
            error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid '{name}' parameter"),
            )
        }),
    }
}

fn override_error_response(err: OverrideError) -> axum::response::Response {
    let status = match &err {
        OverrideError::AlreadyActive | OverrideError::NotActive => StatusCode::CONFLICT,
        OverrideError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OverrideError::Gateway(gateway) => gateway_status(gateway),
    };
    error_response(status, &err.to_string())
}

fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        GatewayError::Unavailable(_) | GatewayError::Rejected(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
