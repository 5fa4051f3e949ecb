//! Broker client wrapper.
//!
//! Connects in the background and never blocks startup: publishing is a
//! no-op until the broker is reachable, and the event loop reconnects on
//! its own. All publishing goes through the client's bounded request
//! queue; when it is full the message is dropped rather than stalling the
//! pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Capacity of the outbound request queue.
const OUTBOUND_QUEUE: usize = 64;

pub struct MqttPublisher {
    client: Option<AsyncClient>,
    prefix: String,
    default_qos: QoS,
    pub retain_state: bool,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// A publisher with no broker; every publish is a no-op.
    pub fn disabled() -> Self {
        Self {
            client: None,
            prefix: "rds".to_string(),
            default_qos: QoS::AtLeastOnce,
            retain_state: true,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the client and its event-loop task.
    pub fn connect(cfg: &Config) -> Self {
        if !cfg.mqtt_enabled || cfg.mqtt_host.is_empty() {
            if cfg.mqtt_enabled {
                warn!("MQTT enabled but MQTT_HOST is empty, continuing without MQTT");
            }
            return Self::disabled();
        }

        let mut options = MqttOptions::new(&cfg.mqtt_client_id, &cfg.mqtt_host, cfg.mqtt_port);
        options.set_keep_alive(Duration::from_secs(60));
        if !cfg.mqtt_user.is_empty() {
            options.set_credentials(&cfg.mqtt_user, &cfg.mqtt_password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, OUTBOUND_QUEUE);
        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();
        let host = cfg.mqtt_host.clone();
        let port = cfg.mqtt_port;
        info!("MQTT connecting to {host}:{port} ...");

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected to {host}:{port}");
                        flag.store(true, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if flag.swap(false, Ordering::SeqCst) {
                            warn!("MQTT lost connection ({e}), reconnecting...");
                        }
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self {
            client: Some(client),
            prefix: cfg.mqtt_topic_prefix.clone(),
            default_qos: qos_from(cfg),
            retain_state: cfg.mqtt_retain_state,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publish a JSON payload under the configured topic prefix.
    pub fn publish<T: Serialize>(&self, topic_suffix: &str, payload: &T, qos: u8, retain: bool) {
        let Some(client) = &self.client else {
            return;
        };
        let topic = format!("{}/{}", self.prefix, topic_suffix);
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!("MQTT: cannot serialize payload for {topic}: {e}");
                return;
            }
        };
        let qos = match qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        };
        if let Err(e) = client.try_publish(&topic, qos, retain, body) {
            // Queue full or client down: the pipeline must not stall on
            // the broker.
            debug!("MQTT: dropped message for {topic}: {e}");
        }
    }

    /// Publish with the configured default QoS.
    pub fn publish_default<T: Serialize>(&self, topic_suffix: &str, payload: &T, retain: bool) {
        let qos = match self.default_qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        };
        self.publish(topic_suffix, payload, qos, retain);
    }
}

fn qos_from(cfg: &Config) -> QoS {
    match cfg.mqtt_qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}
