use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock, atomic::{AtomicBool, Ordering}};
use std::time::Duration;

use kelvin_core::{PublishError, Publisher};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    Publish { topic: String, payload: Vec<u8> },
}

/// Connected broker session. Owns the event loop task, which reconnects with
/// backoff and restores tracked subscriptions after every ConnAck.
#[derive(Clone)]
pub struct MqttService {
    // Swapped out when the event loop rebuilds the client; clone before awaiting.
    client: Arc<StdRwLock<AsyncClient>>,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    _loop_handle: Arc<JoinHandle<()>>,
}

impl MqttService {
    /// Must be called from within a tokio runtime; the event loop is spawned onto it.
    pub fn connect(config: MqttConfig) -> Self {
        let (client, eventloop) = build_client(&config);
        let ready = Arc::new(AtomicBool::new(false));
        let (tx, _) = broadcast::channel(256);
        let subscriptions = Arc::new(RwLock::new(HashMap::new()));

        let client_shared = Arc::new(StdRwLock::new(client));
        let loop_handle = tokio::spawn(run_eventloop(
            eventloop,
            client_shared.clone(),
            ready.clone(),
            tx.clone(),
            subscriptions.clone(),
            config,
        ));

        Self {
            client: client_shared,
            ready,
            events_tx: tx,
            subscriptions,
            _loop_handle: Arc::new(loop_handle),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> broadcast::Receiver<MqttEvent> {
        self.events_tx.subscribe()
    }

    fn client(&self) -> AsyncClient {
        self.client.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Subscribes now and remembers the topic so it is restored on reconnect.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        self.subscriptions.write().await.insert(topic.to_string(), qos);
        self.client().subscribe(topic, qos).await
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.ready.store(false, Ordering::Relaxed);
        self.client().disconnect().await
    }
}

impl Publisher for MqttService {
    /// Queues a QoS 0 publish without waiting for the network.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.is_ready() {
            return Err(PublishError::NotConnected);
        }
        self.client()
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| PublishError::Transport {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

fn build_client(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&config.client_id, &config.host, config.port);
    opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
    opts.set_clean_session(config.clean_session);
    if let (Some(u), Some(p)) = (&config.username, &config.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    opts.set_request_channel_capacity(64);
    AsyncClient::new(opts, 64)
}

async fn run_eventloop(
    mut eventloop: EventLoop,
    client_shared: Arc<StdRwLock<AsyncClient>>,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    config: MqttConfig,
) {
    let mut backoff_secs = 1u64;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!(host = %config.host, port = config.port, "MQTT connected");
                ready.store(true, Ordering::Relaxed);
                let _ = events_tx.send(MqttEvent::Connected);

                let client = client_shared.read().unwrap_or_else(PoisonError::into_inner).clone();
                let subs = subscriptions.read().await.clone();
                for (topic, qos) in subs {
                    debug!("Restoring subscription to {}", topic);
                    if let Err(err) = client.subscribe(&topic, qos).await {
                        warn!(?err, "Failed to restore subscription to {}", topic);
                    }
                }

                backoff_secs = 1;
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                let topic = p.topic.to_string();
                let payload = p.payload.to_vec();
                let _ = events_tx.send(MqttEvent::Publish { topic, payload });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                warn!("MQTT disconnect requested");
                ready.store(false, Ordering::Relaxed);
                let _ = events_tx.send(MqttEvent::Disconnected);
                return;
            }
            Ok(other) => {
                debug!(?other, "MQTT event");
            }
            Err(e) => {
                error!(error = ?e, "MQTT error; will attempt reconnect");
                ready.store(false, Ordering::Relaxed);
                let _ = events_tx.send(MqttEvent::Disconnected);

                sleep(Duration::from_secs(backoff_secs.min(30))).await;
                backoff_secs = (backoff_secs * 2).min(60);

                let (new_client, new_eventloop) = build_client(&config);
                eventloop = new_eventloop;
                *client_shared.write().unwrap_or_else(PoisonError::into_inner) = new_client;
                info!("MQTT client and eventloop rebuilt, attempting reconnection");
            }
        }
    }
}
