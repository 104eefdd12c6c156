use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::telemetry::TelemetrySample;

/// Static description of one controller, as found in the device file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "short_name")]
    pub id: String,
    #[serde(rename = "long_name")]
    pub display_name: String,
    /// Kelvin
    #[serde(rename = "maximum_temperature")]
    pub max_temperature: f64,
    /// Kelvin per minute
    #[serde(rename = "maximum_rate")]
    pub max_rate: f64,
}

impl DeviceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() || self.id.contains(['/', '+', '#']) {
            return Err(ConfigError::InvalidId(self.id.clone()));
        }
        for (field, value) in [("maximum_temperature", self.max_temperature), ("maximum_rate", self.max_rate)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositiveBound {
                    device_id: self.id.clone(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Parses the JSON device list supplied by the configuration file.
pub fn parse_devices(json: &str) -> Result<Vec<DeviceConfig>, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_devices_file(path: impl AsRef<Path>) -> Result<Vec<DeviceConfig>, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_devices(&raw)
}

/// Configured devices plus the latest telemetry seen for each of them.
///
/// Configs are immutable after [`Registry::load`]; only the telemetry map is
/// behind a lock, since it is written from the transport's task while
/// operator reads and applies happen elsewhere.
#[derive(Debug)]
pub struct Registry {
    configs: Vec<DeviceConfig>,
    index: HashMap<String, usize>,
    telemetry: RwLock<HashMap<String, TelemetrySample>>,
}

impl Registry {
    pub fn load(configs: Vec<DeviceConfig>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::with_capacity(configs.len());
        for cfg in &configs {
            cfg.validate()?;
            if !seen.insert(cfg.id.as_str()) {
                return Err(ConfigError::DuplicateId(cfg.id.clone()));
            }
        }

        let index = configs
            .iter()
            .enumerate()
            .map(|(i, cfg)| (cfg.id.clone(), i))
            .collect();

        Ok(Self {
            configs,
            index,
            telemetry: RwLock::new(HashMap::new()),
        })
    }

    pub fn get_config(&self, id: &str) -> Option<&DeviceConfig> {
        self.index.get(id).map(|&i| &self.configs[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Configuration-file order.
    pub fn all_configs(&self) -> &[DeviceConfig] {
        &self.configs
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Inserts or replaces the sample for its device. Samples for devices
    /// that are not configured are dropped; returns whether it was stored.
    pub fn update_telemetry(&self, sample: TelemetrySample) -> bool {
        if !self.contains(&sample.device_id) {
            debug!(device_id = %sample.device_id, "Dropping telemetry for unconfigured device");
            return false;
        }
        let mut map = self.telemetry.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(sample.device_id.clone(), sample);
        true
    }

    pub fn latest(&self, id: &str) -> Option<TelemetrySample> {
        let map = self.telemetry.read().unwrap_or_else(PoisonError::into_inner);
        map.get(id).cloned()
    }

    /// Every device with its latest sample, taken under a single read lock.
    pub fn snapshot(&self) -> Vec<(DeviceConfig, Option<TelemetrySample>)> {
        let map = self.telemetry.read().unwrap_or_else(PoisonError::into_inner);
        self.configs
            .iter()
            .map(|cfg| (cfg.clone(), map.get(&cfg.id).cloned()))
            .collect()
    }
}
