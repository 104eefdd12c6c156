use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::commands::{self, CommandEntry, CommandField, CommandInput, OutboundCommandBatch};
use crate::error::{DispatchError, PublishError, ValidationError};
use crate::registry::{DeviceConfig, Registry};

/// Outbound side of the transport. Publishing is fire-and-forget: an `Ok`
/// means the message was handed to the client, not that a broker acked it.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Validates operator input against the registry and publishes one batch.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    publisher: Arc<dyn Publisher>,
    control_topic: String,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, publisher: Arc<dyn Publisher>, control_topic: impl Into<String>) -> Self {
        Self {
            registry,
            publisher,
            control_topic: control_topic.into(),
        }
    }

    pub fn control_topic(&self) -> &str {
        &self.control_topic
    }

    /// Builds the batch without publishing. Requires an input for every
    /// configured device; stops at the first invalid field.
    pub fn build_batch(&self, inputs: &HashMap<String, CommandInput>) -> Result<OutboundCommandBatch, ValidationError> {
        for id in inputs.keys() {
            if !self.registry.contains(id) {
                warn!(device_id = %id, "Ignoring input for unconfigured device");
            }
        }

        let mut batch = OutboundCommandBatch::default();
        for cfg in self.registry.all_configs() {
            let input = inputs.get(&cfg.id).ok_or_else(|| ValidationError::MissingDevice {
                device_id: cfg.id.clone(),
            })?;
            let temperature = parse_bounded(cfg, CommandField::Temperature, &input.temperature, cfg.max_temperature)?;
            let rate = parse_bounded(cfg, CommandField::Rate, &input.rate, cfg.max_rate)?;
            batch.push(cfg.id.clone(), CommandEntry { temperature, rate });
        }
        Ok(batch)
    }

    /// Validates, encodes and publishes once to the control topic. Nothing is
    /// sent unless every device's input is valid.
    pub fn apply(&self, inputs: &HashMap<String, CommandInput>) -> Result<OutboundCommandBatch, DispatchError> {
        let batch = self.build_batch(inputs)?;
        let payload = commands::encode(&batch)?;
        debug!(topic = %self.control_topic, devices = batch.len(), "Publishing command batch");
        self.publisher.publish(&self.control_topic, payload)?;
        Ok(batch)
    }
}

fn parse_bounded(cfg: &DeviceConfig, field: CommandField, text: &str, max: f64) -> Result<f64, ValidationError> {
    let trimmed = text.trim();
    let not_numeric = || ValidationError::NotNumeric {
        device_id: cfg.id.clone(),
        field,
        input: text.to_string(),
    };

    let value = trimmed.parse::<f64>().map_err(|_| not_numeric())?;
    // "inf"/"nan" spelled out are not numbers; "1e400" is, it just overflows.
    if value.is_nan() || (value.is_infinite() && spells_infinity(trimmed)) {
        return Err(not_numeric());
    }

    let bound = if value < 0.0 {
        0.0
    } else if value > max {
        max
    } else {
        // -0.0 + 0.0 == +0.0; keeps "-0" from reaching the payload as -0.0
        return Ok(value + 0.0);
    };
    Err(ValidationError::OutOfBounds {
        device_id: cfg.id.clone(),
        field,
        value,
        bound,
    })
}

fn spells_infinity(text: &str) -> bool {
    text.trim_start_matches(['+', '-']).to_ascii_lowercase().starts_with("inf")
}
