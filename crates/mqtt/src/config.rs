use hostname::get as get_hostname;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            clean_session: true,
        }
    }
}

/// Broker credentials file: `{"user", "password", "host", "port"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MqttCredentials {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("reading credentials {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing credentials {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn load_credentials(path: impl AsRef<Path>) -> Result<MqttCredentials, CredentialsError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| CredentialsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CredentialsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl MqttConfig {
    pub fn from_env() -> Self {
        let mut cfg = MqttConfig::default();

        if let Ok(v) = env::var("MQTT_BROKER_HOST") {
            if !v.is_empty() {
                cfg.host = v;
            }
        }
        if let Ok(v) = env::var("MQTT_BROKER_PORT") {
            if let Ok(p) = v.parse::<u16>() {
                cfg.port = p;
            }
        }
        if let Ok(v) = env::var("MQTT_CLIENT_ID") {
            if !v.is_empty() {
                cfg.client_id = v;
            }
        }
        if let Ok(v) = env::var("MQTT_USERNAME") {
            if !v.is_empty() {
                cfg.username = Some(v);
            }
        }
        if let Ok(v) = env::var("MQTT_PASSWORD") {
            if !v.is_empty() {
                cfg.password = Some(v);
            }
        }
        if let Ok(v) = env::var("MQTT_KEEP_ALIVE_SECS") {
            if let Ok(s) = v.parse::<u16>() {
                cfg.keep_alive_secs = s;
            }
        }

        cfg
    }

    /// Broker address and login from a credentials file take precedence over the environment.
    pub fn with_credentials(mut self, creds: MqttCredentials) -> Self {
        self.host = creds.host;
        self.port = creds.port;
        self.username = Some(creds.user);
        self.password = Some(creds.password);
        self
    }
}

fn default_client_id() -> String {
    let host = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let pid = std::process::id();
    format!("kelvin-{}-{}", host, pid)
}
