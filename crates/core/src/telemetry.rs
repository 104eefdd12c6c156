use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::DecodeError;

/// Latest status reported by one controller. Replaced wholesale on every message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub device_id: String,
    #[serde(rename = "tsp")]
    pub setpoint_temperature: f64,
    #[serde(rename = "wsp")]
    pub working_setpoint: f64,
    #[serde(rename = "power")]
    pub power_percent: f64,
    #[serde(rename = "temperature")]
    pub measured_temperature: f64,
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "T:{:.1} °C W:{:.1} °C {:.1} % C:{:.1} °C",
            self.setpoint_temperature, self.working_setpoint, self.power_percent, self.measured_temperature
        )
    }
}

/// Decodes a `{"tsp", "wsp", "power", "temperature"}` payload published under
/// `device_id`'s telemetry topic. Unknown keys are ignored.
pub fn decode(device_id: &str, payload: &[u8]) -> Result<TelemetrySample, DecodeError> {
    let value: Value = serde_json::from_slice(payload).map_err(DecodeError::Malformed)?;
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let field = |name: &'static str| -> Result<f64, DecodeError> {
        let v = obj.get(name).ok_or(DecodeError::MissingField(name))?;
        v.as_f64().ok_or(DecodeError::NotNumeric(name))
    };

    let setpoint_temperature = field("tsp")?;
    let working_setpoint = field("wsp")?;
    let power_percent = field("power")?;
    let measured_temperature = field("temperature")?;

    if !(0.0..=100.0).contains(&power_percent) {
        return Err(DecodeError::OutOfRange { field: "power", value: power_percent });
    }

    Ok(TelemetrySample {
        device_id: device_id.to_string(),
        setpoint_temperature,
        working_setpoint,
        power_percent,
        measured_temperature,
    })
}
