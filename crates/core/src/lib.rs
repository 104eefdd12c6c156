//! kelvin-core: device registry, telemetry routing and set-point dispatch for
//! the temperature-controller bridge. Transport-agnostic; the MQTT client
//! lives in `kelvin-mqtt`.

pub mod commands;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod router;
pub mod telemetry;
pub mod topics;

pub use commands::{encode, CommandEntry, CommandField, CommandInput, OutboundCommandBatch};
pub use dispatch::{Dispatcher, Publisher};
pub use error::{ConfigError, DecodeError, DispatchError, PatternError, PublishError, ValidationError};
pub use registry::{load_devices_file, parse_devices, DeviceConfig, Registry};
pub use router::{RouteOutcome, TopicRouter};
pub use telemetry::{decode, TelemetrySample};
pub use topics::{telemetry_topic, TopicPattern, CONTROL_TOPIC, ROOT, TELEMETRY_WILDCARD};
