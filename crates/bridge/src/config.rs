use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use kelvin_core::{CONTROL_TOPIC, TELEMETRY_WILDCARD};

const DEFAULT_DEVICES_FILE: &str = "temperature.config.json";
const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub devices_file: PathBuf,
    /// `None` when neither the variable nor the default file exists; the
    /// broker settings then come from the `MQTT_*` variables alone.
    pub credentials_file: Option<PathBuf>,
    pub http_addr: SocketAddr,
    pub telemetry_topic: String,
    pub control_topic: String,
}

impl BridgeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let devices_file = env::var("KELVIN_DEVICES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DEVICES_FILE));

        let credentials_file = match env::var("KELVIN_CREDENTIALS_FILE") {
            Ok(v) if !v.is_empty() => Some(PathBuf::from(v)),
            _ => Some(PathBuf::from(DEFAULT_CREDENTIALS_FILE)).filter(|p| p.exists()),
        };

        let http_addr = env::var("KELVIN_HTTP_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("Invalid KELVIN_HTTP_ADDR")?;

        let telemetry_topic = non_empty_var("KELVIN_TELEMETRY_TOPIC").unwrap_or_else(|| TELEMETRY_WILDCARD.to_string());
        let control_topic = non_empty_var("KELVIN_CONTROL_TOPIC").unwrap_or_else(|| CONTROL_TOPIC.to_string());

        Ok(Self {
            devices_file,
            credentials_file,
            http_addr,
            telemetry_topic,
            control_topic,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}
