use std::path::PathBuf;

use thiserror::Error;

use crate::commands::CommandField;

/// Fatal startup errors raised while building the device registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate device id '{0}'")]
    DuplicateId(String),

    #[error("device '{device_id}': {field} must be a finite value > 0 (got {value})")]
    NonPositiveBound {
        device_id: String,
        field: &'static str,
        value: f64,
    },

    #[error("invalid device id '{0}': must be a single non-empty topic segment")]
    InvalidId(String),

    #[error("reading device file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing device configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-message telemetry failures. The registry is never touched when one of these is returned.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' is not numeric")]
    NotNumeric(&'static str),

    #[error("field '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Operator input rejected during `apply`. Any one of these voids the whole batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{device_id}: {field} '{input}' is not numeric")]
    NotNumeric {
        device_id: String,
        field: CommandField,
        input: String,
    },

    #[error("{device_id}: {field} {value} is out of bounds (limit {bound})")]
    OutOfBounds {
        device_id: String,
        field: CommandField,
        value: f64,
        bound: f64,
    },

    #[error("{device_id}: no input supplied (incomplete batch)")]
    MissingDevice { device_id: String },
}

impl ValidationError {
    pub fn device_id(&self) -> &str {
        match self {
            ValidationError::NotNumeric { device_id, .. }
            | ValidationError::OutOfBounds { device_id, .. }
            | ValidationError::MissingDevice { device_id } => device_id,
        }
    }

    /// `None` when the whole device entry is missing rather than one field.
    pub fn field(&self) -> Option<CommandField> {
        match self {
            ValidationError::NotNumeric { field, .. } | ValidationError::OutOfBounds { field, .. } => {
                Some(*field)
            }
            ValidationError::MissingDevice { .. } => None,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::NotNumeric { .. } => "not numeric",
            ValidationError::OutOfBounds { .. } => "out of bounds",
            ValidationError::MissingDevice { .. } => "incomplete batch",
        }
    }

    pub fn bound(&self) -> Option<f64> {
        match self {
            ValidationError::OutOfBounds { bound, .. } => Some(*bound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("transport not connected")]
    NotConnected,

    #[error("publish to {topic} failed: {reason}")]
    Transport { topic: String, reason: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("encoding command batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern '{0}' must end with a single-level wildcard segment '+'")]
    MissingWildcard(String),

    #[error("pattern '{0}' may only use '+' as its last segment and must not use '#'")]
    UnsupportedWildcard(String),

    #[error("pattern '{0}' contains an empty segment")]
    EmptySegment(String),
}
