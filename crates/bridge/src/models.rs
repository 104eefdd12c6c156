use std::collections::HashMap;

use kelvin_core::{CommandField, CommandInput, DeviceConfig, OutboundCommandBatch, TelemetrySample, ValidationError};
use serde::Serialize;

/// `POST /api/apply` body: operator text per device id.
pub type ApplyRequest = HashMap<String, CommandInput>;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub display_name: String,
    pub max_temperature: f64,
    pub max_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySample>,
}

impl From<(DeviceConfig, Option<TelemetrySample>)> for DeviceView {
    fn from((cfg, telemetry): (DeviceConfig, Option<TelemetrySample>)) -> Self {
        Self {
            id: cfg.id,
            display_name: cfg.display_name,
            max_temperature: cfg.max_temperature,
            max_rate: cfg.max_rate,
            telemetry,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceView>,
}

#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    pub topic: String,
    pub batch: OutboundCommandBatch,
}

#[derive(Debug, Serialize)]
pub struct ValidationErrorBody {
    pub error: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<CommandField>,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound: Option<f64>,
}

impl From<&ValidationError> for ValidationErrorBody {
    fn from(err: &ValidationError) -> Self {
        Self {
            error: err.to_string(),
            device_id: err.device_id().to_string(),
            field: err.field(),
            reason: err.reason(),
            bound: err.bound(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
