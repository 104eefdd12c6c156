use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dotenvy::dotenv;
use kelvin_core::{load_devices_file, DispatchError, Registry, RouteOutcome};
use kelvin_mqtt::{load_credentials, MqttConfig, MqttEvent, MqttService};
use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, TextEncoder};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod models;
mod services;

use config::BridgeConfig;
use models::*;
use services::BridgeService;

#[derive(Clone)]
struct AppState {
    mqtt: MqttService,
    bridge: BridgeService,
    metrics: Arc<Metrics>,
}

struct Metrics {
    mqtt_connected: IntGauge,
    mqtt_rx_total: IntCounter,
    mqtt_tx_total: IntCounter,
    decode_errors_total: IntCounter,
    ws_clients: IntGauge,
    telemetry_last_seen: IntGaugeVec, // label: device_id
}

impl Metrics {
    fn new(registry: &prometheus::Registry) -> anyhow::Result<Arc<Self>> {
        let mqtt_connected = IntGauge::new("kelvin_mqtt_connected", "MQTT connection status (1 connected, 0 otherwise)")?;
        let mqtt_rx_total = IntCounter::new("kelvin_mqtt_messages_received_total", "Total MQTT messages received")?;
        let mqtt_tx_total = IntCounter::new("kelvin_mqtt_messages_published_total", "Total command batches published")?;
        let decode_errors_total = IntCounter::new("kelvin_telemetry_decode_errors_total", "Telemetry payloads rejected by the decoder")?;
        let ws_clients = IntGauge::new("kelvin_ws_clients", "Number of connected WebSocket clients")?;
        let telemetry_last_seen = IntGaugeVec::new(
            prometheus::Opts::new("kelvin_device_telemetry_last_seen", "Last seen telemetry epoch seconds"),
            &["device_id"],
        )?;

        registry.register(Box::new(mqtt_connected.clone()))?;
        registry.register(Box::new(mqtt_rx_total.clone()))?;
        registry.register(Box::new(mqtt_tx_total.clone()))?;
        registry.register(Box::new(decode_errors_total.clone()))?;
        registry.register(Box::new(ws_clients.clone()))?;
        registry.register(Box::new(telemetry_last_seen.clone()))?;

        Ok(Arc::new(Self {
            mqtt_connected,
            mqtt_rx_total,
            mqtt_tx_total,
            decode_errors_total,
            ws_clients,
            telemetry_last_seen,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing()?;

    let cfg = BridgeConfig::from_env()?;

    let devices = load_devices_file(&cfg.devices_file)
        .with_context(|| format!("loading devices from {}", cfg.devices_file.display()))?;
    let registry = Arc::new(Registry::load(devices).context("invalid device configuration")?);
    if registry.is_empty() {
        tracing::warn!("No devices configured; command batches will be empty");
    }
    info!(devices = registry.len(), "Device registry loaded");

    let mut mqtt_cfg = MqttConfig::from_env();
    if let Some(path) = &cfg.credentials_file {
        let creds = load_credentials(path)?;
        mqtt_cfg = mqtt_cfg.with_credentials(creds);
    }
    info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, "Configuring MQTT client");
    let mqtt = MqttService::connect(mqtt_cfg);

    let bridge = BridgeService::new(
        registry,
        &cfg.telemetry_topic,
        Arc::new(mqtt.clone()),
        &cfg.control_topic,
    )
    .context("invalid telemetry topic pattern")?;

    for pattern in bridge.subscriptions() {
        if let Err(e) = mqtt.subscribe(&pattern, rumqttc::QoS::AtMostOnce).await {
            tracing::warn!(?e, pattern, "Failed to subscribe to telemetry wildcard");
        }
    }

    let metrics = Metrics::new(prometheus::default_registry())?;
    let state = AppState {
        mqtt: mqtt.clone(),
        bridge: bridge.clone(),
        metrics: metrics.clone(),
    };

    let router = app(state);

    tokio::spawn(mqtt_consumer_loop(mqtt.clone(), bridge, metrics));

    info!(addr = %cfg.http_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(cfg.http_addr)
        .await
        .with_context(|| format!("binding {}", cfg.http_addr))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = mqtt.disconnect().await {
        tracing::warn!(?e, "MQTT disconnect on shutdown failed");
    }
    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        .route("/api/devices", get(api_get_devices))
        .route("/api/devices/:device_id", get(api_get_device))
        .route("/api/apply", post(api_apply))
        .route("/ws/telemetry", get(ws_telemetry))
        .with_state(state)
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,axum=info,hyper=info,rumqttc=warn"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(?e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn healthz() -> &'static str { "ok" }

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.mqtt.is_ready() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        tracing::error!(?e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response()
}

// ----- Operator API -----

async fn api_get_devices(State(state): State<AppState>) -> Json<DevicesResponse> {
    Json(DevicesResponse { devices: state.bridge.devices() })
}

async fn api_get_device(Path(device_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.bridge.device(&device_id) {
        Some(view) => Json(view).into_response(),
        None => (StatusCode::NOT_FOUND, Json(ErrorBody { error: format!("unknown device '{}'", device_id) })).into_response(),
    }
}

async fn api_apply(State(state): State<AppState>, Json(req): Json<ApplyRequest>) -> Response {
    match state.bridge.apply(&req) {
        Ok(batch) => {
            state.metrics.mqtt_tx_total.inc();
            info!(devices = batch.len(), topic = state.bridge.control_topic(), "Command batch published");
            Json(ApplyResponse { topic: state.bridge.control_topic().to_string(), batch }).into_response()
        }
        Err(e) => dispatch_error_response(e),
    }
}

fn dispatch_error_response(err: DispatchError) -> Response {
    match err {
        DispatchError::Validation(e) => {
            info!(device_id = e.device_id(), reason = e.reason(), "Rejected command batch");
            (StatusCode::BAD_REQUEST, Json(ValidationErrorBody::from(&e))).into_response()
        }
        DispatchError::Publish(e) => {
            tracing::warn!(?e, "MQTT publish failed");
            (StatusCode::BAD_GATEWAY, Json(ErrorBody { error: e.to_string() })).into_response()
        }
        e @ DispatchError::Encode(_) => {
            tracing::error!(?e, "Failed to encode command batch");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: e.to_string() })).into_response()
        }
    }
}

// ----- WebSocket telemetry -----

async fn ws_telemetry(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| telemetry_ws_loop(state, socket))
}

async fn telemetry_ws_loop(state: AppState, mut socket: WebSocket) {
    state.metrics.ws_clients.inc();
    tracing::debug!("WebSocket telemetry client connected");

    let mut rx = state.bridge.telemetry_updates();
    loop {
        let sample = match rx.recv().await {
            Ok(sample) => sample,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "WebSocket client lagging; skipping samples");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let text = match serde_json::to_string(&sample) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(?e, "Failed to serialize telemetry sample");
                continue;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    let _ = socket.close().await;
    state.metrics.ws_clients.dec();
    tracing::debug!("WebSocket telemetry client disconnected");
}

// ----- Background MQTT consumer: route telemetry into the registry -----

async fn mqtt_consumer_loop(mqtt: MqttService, bridge: BridgeService, metrics: Arc<Metrics>) {
    let mut rx = mqtt.events();
    loop {
        match rx.recv().await {
            Ok(MqttEvent::Connected) => metrics.mqtt_connected.set(1),
            Ok(MqttEvent::Disconnected) => metrics.mqtt_connected.set(0),
            Ok(MqttEvent::Publish { topic, payload }) => {
                metrics.mqtt_rx_total.inc();
                match bridge.handle_publish(&topic, &payload) {
                    Ok(RouteOutcome::Updated(sample)) => {
                        metrics
                            .telemetry_last_seen
                            .with_label_values(&[sample.device_id.as_str()])
                            .set(epoch_secs());
                    }
                    Ok(RouteOutcome::UnknownDevice(_)) | Ok(RouteOutcome::Unmatched) => {}
                    Err(e) => {
                        metrics.decode_errors_total.inc();
                        tracing::warn!(topic, error = %e, "Discarding malformed telemetry");
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "MQTT consumer lagged; messages dropped");
            }
            Err(RecvError::Closed) => {
                tracing::warn!("MQTT event channel closed; consumer exiting");
                break;
            }
        }
    }
}

fn epoch_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
