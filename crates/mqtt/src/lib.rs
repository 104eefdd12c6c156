pub mod config;
pub mod client;

pub use config::{load_credentials, CredentialsError, MqttConfig, MqttCredentials};
pub use client::{MqttEvent, MqttService};
