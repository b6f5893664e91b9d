//! Publish/subscribe session with the platform's MQTT broker.
//!
//! [`Broker`] is what the cloud side of the bridge talks to; [`MqttBroker`]
//! implements it on top of `rumqttc`. Every [`Broker::connect`] builds a
//! fresh client and event loop, so reconnecting is just connecting again.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::error::Error;

/// Capacity of the request queue between [`AsyncClient`] and its event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 100;

// ── Broker capability ────────────────────────────────────────────────

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl From<rumqttc::Publish> for BrokerMessage {
    fn from(publish: rumqttc::Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }
    }
}

/// Broker session operations used by the cloud side of the bridge.
pub trait Broker: Send + Sync + 'static {
    /// Open a new session, replacing any previous one.
    fn connect(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Subscribe and wait for the broker to acknowledge.
    fn subscribe(&self, filter: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Queue a message for publishing.
    fn publish(&self, topic: &str, payload: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Wait for the next message on a subscribed topic.
    ///
    /// An error means the session is gone and must be reconnected.
    fn recv(&self) -> impl Future<Output = Result<BrokerMessage, Error>> + Send;
}

// ── MqttConfig ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub client_id: String,
    pub username: String,
    pub password: SecretString,
    pub keep_alive: Duration,
    /// Bound on waiting for CONNACK and SUBACK.
    pub ack_timeout: Duration,
}

// ── MqttBroker ───────────────────────────────────────────────────────

struct Session {
    /// The client feeding this event loop.
    client: Arc<AsyncClient>,
    event_loop: EventLoop,
    /// Publishes that arrived while waiting for an acknowledgement.
    pending: VecDeque<BrokerMessage>,
}

/// `rumqttc`-backed [`Broker`].
pub struct MqttBroker {
    config: MqttConfig,
    client: ArcSwapOption<AsyncClient>,
    session: Mutex<Option<Session>>,
}

impl MqttBroker {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            client: ArcSwapOption::empty(),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        options.set_credentials(&self.config.username, self.config.password.expose_secret());
        if self.config.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }

    fn ack_timeout_error(&self, what: &'static str) -> Error {
        Error::AckTimeout {
            what,
            timeout_secs: self.config.ack_timeout.as_secs(),
        }
    }

    /// Forget a session whose event loop has failed.
    ///
    /// Publishes fail with [`Error::NotConnected`] until the next
    /// [`Broker::connect`]. A client installed by a concurrent connect is
    /// left in place.
    fn end_session(&self, slot: &mut Option<Session>) {
        if let Some(session) = slot.take() {
            let dead = Some(session.client);
            self.client.compare_and_swap(&dead, None);
            tracing::debug!(host = %self.config.host, "MQTT session ended");
        }
    }
}

impl Broker for MqttBroker {
    async fn connect(&self) -> Result<(), Error> {
        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            tls = self.config.use_tls,
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );

        let (client, mut event_loop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);

        tokio::time::timeout(self.config.ack_timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| self.ack_timeout_error("CONNACK"))??;

        let client = Arc::new(client);
        if let Some(previous) = self.client.swap(Some(Arc::clone(&client))) {
            // The old event loop is about to be dropped; a failed disconnect changes nothing.
            let _ = previous.try_disconnect();
        }
        *self.session.lock().await = Some(Session {
            client,
            event_loop,
            pending: VecDeque::new(),
        });

        tracing::info!(host = %self.config.host, port = self.config.port, "MQTT session established");
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), Error> {
        let client = self.client.load_full().ok_or(Error::NotConnected)?;
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NotConnected)?;

        client.subscribe(filter, QoS::AtMostOnce).await?;

        let wait_for_suback = async {
            loop {
                match session.event_loop.poll().await? {
                    Event::Incoming(Packet::SubAck(ack)) => {
                        let rejected = ack
                            .return_codes
                            .iter()
                            .any(|code| matches!(code, SubscribeReasonCode::Failure));
                        return if rejected {
                            Err(Error::SubscriptionRejected {
                                filter: filter.to_owned(),
                            })
                        } else {
                            Ok(())
                        };
                    }
                    Event::Incoming(Packet::Publish(publish)) => {
                        session.pending.push_back(publish.into());
                    }
                    _ => {}
                }
            }
        };

        let result = tokio::time::timeout(self.config.ack_timeout, wait_for_suback)
            .await
            .map_err(|_| self.ack_timeout_error("SUBACK"))
            .and_then(|acked| acked);
        if matches!(result, Err(Error::Mqtt(_))) {
            self.end_session(&mut guard);
        }
        result
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        let client = self.client.load_full().ok_or(Error::NotConnected)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await?;
        Ok(())
    }

    async fn recv(&self) -> Result<BrokerMessage, Error> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NotConnected)?;

        if let Some(message) = session.pending.pop_front() {
            return Ok(message);
        }

        let received = loop {
            match session.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => break Ok(publish.into()),
                Ok(Event::Incoming(Packet::Disconnect)) => break Err(Error::Disconnected),
                Ok(event) => tracing::trace!(?event, "MQTT event"),
                Err(e) => break Err(Error::Mqtt(e)),
            }
        };
        if received.is_err() {
            self.end_session(&mut guard);
        }
        received
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), Error> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            return match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(Error::ConnectionRefused(format!("{code:?}"))),
            };
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
