//! MQTT transport implementation using rumqttc.
//!
//! [`RumqttcConnector`] opens one rumqttc client per call and runs its event
//! loop on a tokio task that forwards:
//! - CONNACK as `Connected`
//! - PUBLISH as `Message`
//! - DISCONNECT and loop errors as `Closed` / `Error`
//!
//! The loop stops at the first error. Retrying is left to the caller.

use crate::config::{ConnOptions, ConnectConfig, Scheme};
use crate::error::{Error, Result};
use crate::transport::{Connector, EventReceiver, EventSender, TransportEvent, TransportHandle};
use crate::types::QoS;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Transport};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long `end()` lets the event loop flush the DISCONNECT packet.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Connector backed by rumqttc. Must be used inside a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttcConnector;

impl RumqttcConnector {
    /// Create a new connector.
    pub fn new() -> Self {
        Self
    }

    fn mqtt_options(config: &ConnectConfig, options: &ConnOptions) -> Result<MqttOptions> {
        let scheme = config.scheme()?;
        let port = config.port_or_default()?;
        let id = options
            .client_id
            .clone()
            .unwrap_or_else(|| format!("reactor-{}", Uuid::new_v4()));

        // rumqttc takes the full URL as the host for WebSocket transports.
        let host = match scheme {
            Scheme::Tcp | Scheme::Tls => config.host.clone(),
            Scheme::Ws | Scheme::Wss => config.url(),
        };

        let mut mqtt_options = MqttOptions::new(id, host, port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(options.clean_session);

        if let Some(ref credentials) = config.credentials {
            mqtt_options.set_credentials(&credentials.username, &credentials.password);
        }

        match scheme {
            Scheme::Tcp => {}
            Scheme::Tls => {
                mqtt_options.set_transport(Transport::tls_with_default_config());
            }
            Scheme::Ws => {
                mqtt_options.set_transport(Transport::Ws);
            }
            Scheme::Wss => {
                mqtt_options.set_transport(Transport::wss_with_default_config());
            }
        }

        Ok(mqtt_options)
    }
}

impl Connector for RumqttcConnector {
    fn connect(
        &self,
        config: &ConnectConfig,
        options: &ConnOptions,
    ) -> Result<(Box<dyn TransportHandle>, EventReceiver)> {
        let mqtt_options = Self::mqtt_options(config, options)?;
        info!(url = %config.url(), "connecting to MQTT broker");

        let (client, event_loop) = AsyncClient::new(mqtt_options, options.request_capacity);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_event_loop(event_loop, tx, cancel.clone()));

        Ok((Box::new(RumqttcHandle { client, cancel }), rx))
    }
}

async fn run_event_loop(mut event_loop: EventLoop, tx: EventSender, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("transport shutdown requested");
                let _ = tokio::time::timeout(DISCONNECT_GRACE, flush_disconnect(&mut event_loop)).await;
                break;
            }
            event = event_loop.poll() => {
                let forwarded = match event {
                    Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                        info!("connected to MQTT broker, session_present={}", connack.session_present);
                        tx.send(TransportEvent::Connected)
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!("received message on topic: {}", publish.topic);
                        tx.send(TransportEvent::Message(publish.into()))
                    }
                    Ok(Event::Incoming(Packet::SubAck(suback))) => {
                        debug!("subscription acknowledged: {:?}", suback);
                        Ok(())
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("disconnected by broker");
                        let _ = tx.send(TransportEvent::Closed);
                        break;
                    }
                    Ok(_) => Ok(()),
                    Err(e) => {
                        warn!("event loop error: {}", e);
                        let _ = tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                };

                if forwarded.is_err() {
                    debug!("event receiver dropped, stopping transport");
                    break;
                }
            }
        }
    }
}

/// Poll until the queued DISCONNECT has been written or the loop fails.
async fn flush_disconnect(event_loop: &mut EventLoop) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

struct RumqttcHandle {
    client: AsyncClient,
    cancel: CancellationToken,
}

impl TransportHandle for RumqttcHandle {
    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<()> {
        self.client
            .try_subscribe(pattern, qos.into())
            .map_err(|e| Error::Subscribe(e.to_string()))
    }

    fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.client
            .try_unsubscribe(pattern)
            .map_err(|e| Error::Subscribe(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, qos.into(), retain, payload.to_vec())
            .map_err(|e| Error::Publish(e.to_string()))
    }

    fn end(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("disconnect request not queued: {}", e);
        }
        self.cancel.cancel();
    }
}
