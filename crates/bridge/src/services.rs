use std::sync::Arc;

use kelvin_core::{
    DecodeError, DispatchError, Dispatcher, OutboundCommandBatch, PatternError, Publisher, Registry, RouteOutcome,
    TelemetrySample, TopicRouter,
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{ApplyRequest, DeviceView};

/// Glue between the transport, the core and the HTTP handlers.
#[derive(Clone)]
pub struct BridgeService {
    registry: Arc<Registry>,
    router: TopicRouter,
    dispatcher: Dispatcher,
    updates: broadcast::Sender<TelemetrySample>,
}

impl BridgeService {
    pub fn new(
        registry: Arc<Registry>,
        telemetry_pattern: &str,
        publisher: Arc<dyn Publisher>,
        control_topic: &str,
    ) -> Result<Self, PatternError> {
        let mut router = TopicRouter::new(registry.clone());
        router.subscribe(telemetry_pattern)?;
        let dispatcher = Dispatcher::new(registry.clone(), publisher, control_topic);
        let (updates, _) = broadcast::channel(256);
        Ok(Self { registry, router, dispatcher, updates })
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.router.patterns().map(str::to_string).collect()
    }

    pub fn control_topic(&self) -> &str {
        self.dispatcher.control_topic()
    }

    /// Feeds one inbound publish through the router and fans out stored samples.
    pub fn handle_publish(&self, topic: &str, payload: &[u8]) -> Result<RouteOutcome, DecodeError> {
        let outcome = self.router.route(topic, payload)?;
        if let RouteOutcome::Updated(sample) = &outcome {
            debug!(device_id = %sample.device_id, "{}", sample);
            // no receivers is fine
            let _ = self.updates.send(sample.clone());
        }
        Ok(outcome)
    }

    pub fn telemetry_updates(&self) -> broadcast::Receiver<TelemetrySample> {
        self.updates.subscribe()
    }

    pub fn devices(&self) -> Vec<DeviceView> {
        self.registry.snapshot().into_iter().map(DeviceView::from).collect()
    }

    pub fn device(&self, id: &str) -> Option<DeviceView> {
        let cfg = self.registry.get_config(id)?.clone();
        Some(DeviceView::from((cfg, self.registry.latest(id))))
    }

    pub fn apply(&self, req: &ApplyRequest) -> Result<OutboundCommandBatch, DispatchError> {
        self.dispatcher.apply(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kelvin_core::{CommandInput, DeviceConfig, PublishError, CONTROL_TOPIC, TELEMETRY_WILDCARD};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(String, Vec<u8>)>>);

    impl Publisher for Outbox {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            self.0.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn service() -> (BridgeService, Arc<Outbox>) {
        let registry = Registry::load(vec![
            DeviceConfig { id: "oven".into(), display_name: "Oven".into(), max_temperature: 400.0, max_rate: 10.0 },
            DeviceConfig { id: "stage".into(), display_name: "Stage".into(), max_temperature: 300.0, max_rate: 5.0 },
        ])
        .unwrap();
        let outbox = Arc::new(Outbox::default());
        let svc = BridgeService::new(Arc::new(registry), TELEMETRY_WILDCARD, outbox.clone(), CONTROL_TOPIC).unwrap();
        (svc, outbox)
    }

    #[test]
    fn routed_samples_reach_subscribers_and_views() {
        let (svc, _) = service();
        let mut rx = svc.telemetry_updates();
        svc.handle_publish("ald/temperature/stage", br#"{"tsp":100,"wsp":80,"power":42,"temperature":79.5}"#)
            .unwrap();

        let sample = rx.try_recv().unwrap();
        assert_eq!(sample.device_id, "stage");

        let views = svc.devices();
        assert_eq!(views.len(), 2);
        assert!(views[0].telemetry.is_none());
        assert_eq!(views[1].telemetry.as_ref().map(|t| t.power_percent), Some(42.0));
        assert_eq!(svc.device("stage").unwrap().display_name, "Stage");
        assert!(svc.device("ghost").is_none());
    }

    #[test]
    fn decode_failures_do_not_broadcast() {
        let (svc, _) = service();
        let mut rx = svc.telemetry_updates();
        assert!(svc.handle_publish("ald/temperature/oven", b"{}").is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn apply_goes_to_control_topic() {
        let (svc, outbox) = service();
        let req: ApplyRequest = [
            ("oven".to_string(), CommandInput::new("250", "5")),
            ("stage".to_string(), CommandInput::new("20.0", "2.0")),
        ]
        .into_iter()
        .collect();
        svc.apply(&req).unwrap();

        let sent = outbox.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, svc.control_topic());
        assert_eq!(sent[0].1, br#"{"oven":{"T":250.0,"rate":5.0},"stage":{"T":20.0,"rate":2.0}}"#);
    }

    #[test]
    fn subscriptions_mirror_router() {
        let (svc, _) = service();
        assert_eq!(svc.subscriptions(), [TELEMETRY_WILDCARD.to_string()]);
    }
}
