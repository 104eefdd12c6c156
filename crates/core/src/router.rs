use std::sync::Arc;

use tracing::debug;

use crate::error::{DecodeError, PatternError};
use crate::registry::Registry;
use crate::telemetry::{self, TelemetrySample};
use crate::topics::TopicPattern;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Decoded and stored for a configured device.
    Updated(TelemetrySample),
    /// Matched a pattern but names a device that is not configured.
    UnknownDevice(String),
    /// No subscribed pattern matches the topic.
    Unmatched,
}

/// Turns `(topic, payload)` pairs from the transport into registry updates.
///
/// This is the body of the transport's message callback: it runs on whatever
/// task delivers messages and never blocks beyond the registry lock.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    registry: Arc<Registry>,
    patterns: Vec<TopicPattern>,
}

impl TopicRouter {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry, patterns: Vec::new() }
    }

    pub fn subscribe(&mut self, pattern: &str) -> Result<(), PatternError> {
        let parsed = TopicPattern::parse(pattern)?;
        if !self.patterns.contains(&parsed) {
            self.patterns.push(parsed);
        }
        Ok(())
    }

    /// Pattern strings, for mirroring the subscriptions on the transport.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(TopicPattern::as_str)
    }

    /// Routes one message. Decoding happens before any mutation, so an `Err`
    /// always leaves the previous sample in place.
    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<RouteOutcome, DecodeError> {
        let Some(device_id) = self.patterns.iter().find_map(|p| p.device_id(topic)) else {
            debug!(topic, "Ignoring message on unmatched topic");
            return Ok(RouteOutcome::Unmatched);
        };

        if !self.registry.contains(device_id) {
            debug!(topic, device_id, "Ignoring telemetry from unconfigured device");
            return Ok(RouteOutcome::UnknownDevice(device_id.to_string()));
        }

        let sample = telemetry::decode(device_id, payload)?;
        self.registry.update_telemetry(sample.clone());
        Ok(RouteOutcome::Updated(sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceConfig;
    use crate::topics::{CONTROL_TOPIC, TELEMETRY_WILDCARD};

    fn router() -> TopicRouter {
        let registry = Registry::load(vec![DeviceConfig {
            id: "pump1".into(),
            display_name: "Pump 1".into(),
            max_temperature: 30.0,
            max_rate: 5.0,
        }])
        .unwrap();
        let mut r = TopicRouter::new(Arc::new(registry));
        r.subscribe(TELEMETRY_WILDCARD).unwrap();
        r
    }

    const PAYLOAD: &[u8] = br#"{"tsp":20.0,"wsp":20.0,"power":5.0,"temperature":19.8}"#;

    #[test]
    fn routes_to_configured_device() {
        let r = router();
        let out = r.route("ald/temperature/pump1", PAYLOAD).unwrap();
        assert!(matches!(out, RouteOutcome::Updated(ref s) if s.device_id == "pump1"));
        assert_eq!(r.registry.latest("pump1").unwrap().measured_temperature, 19.8);
    }

    #[test]
    fn unknown_device_is_inert_even_with_garbage_payload() {
        let r = router();
        assert_eq!(
            r.route("ald/temperature/ghost", b"garbage").unwrap(),
            RouteOutcome::UnknownDevice("ghost".into())
        );
        assert!(r.registry.latest("ghost").is_none());
    }

    #[test]
    fn unmatched_topics_are_inert() {
        let r = router();
        for topic in ["other/topic/pump1", "ald/temperature", CONTROL_TOPIC, "ald/temperature/pump1/extra"] {
            assert_eq!(r.route(topic, PAYLOAD).unwrap(), RouteOutcome::Unmatched, "{topic}");
        }
        assert!(r.registry.latest("pump1").is_none());
    }

    #[test]
    fn no_patterns_means_nothing_matches() {
        let registry = Arc::new(Registry::load(Vec::new()).unwrap());
        let r = TopicRouter::new(registry);
        assert_eq!(r.route("ald/temperature/pump1", PAYLOAD).unwrap(), RouteOutcome::Unmatched);
    }

    #[test]
    fn duplicate_subscriptions_collapse() {
        let mut r = router();
        r.subscribe(TELEMETRY_WILDCARD).unwrap();
        r.subscribe("lab/+").unwrap();
        assert_eq!(r.patterns().collect::<Vec<_>>(), [TELEMETRY_WILDCARD, "lab/+"]);
        assert!(r.subscribe("lab/#").is_err());
    }
}
