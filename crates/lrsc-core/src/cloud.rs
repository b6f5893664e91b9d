//! Platform side of the bridge: publishes device events, registers devices
//! on first sight, and turns subscribed command messages into [`Command`]s.

use std::collections::HashSet;

use lrsc_api::{Broker, Registrar, Registration, topic};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::model::Command;
use crate::status::{OK, StatusReporter, keys};
use crate::supervisor::Supervised;

pub struct CloudBridge<B: Broker, R: Registrar> {
    broker: B,
    registrar: R,
    device_type: String,
    status: StatusReporter,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    registered: Mutex<HashSet<String>>,
}

impl<B: Broker, R: Registrar> CloudBridge<B, R> {
    pub fn new(
        broker: B,
        registrar: R,
        device_type: impl Into<String>,
        commands: mpsc::Sender<Command>,
        status: StatusReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            broker,
            registrar,
            device_type: device_type.into(),
            status,
            commands,
            cancel,
            registered: Mutex::new(HashSet::new()),
        }
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Open the broker session and subscribe to commands.
    pub async fn connect(&self) -> Result<(), CoreError> {
        if let Err(e) = self.broker.connect().await {
            tracing::error!(error = %e, "Could not connect to broker");
            self.status.report(keys::CONNECTION, e.to_string());
            return Err(e.into());
        }
        self.status.report(keys::CONNECTION, OK);
        tracing::info!("Connected to broker");

        let filter = topic::command_filter(&self.device_type);
        if let Err(e) = self.broker.subscribe(&filter).await {
            tracing::error!(%filter, error = %e, "Could not subscribe to commands");
            self.status.report(keys::SUBSCRIPTION, e.to_string());
            return Err(e.into());
        }
        self.status.report(keys::SUBSCRIPTION, OK);
        tracing::info!(%filter, "Subscribed to commands");
        Ok(())
    }

    /// Publish a device event, registering the device first if unseen.
    pub async fn publish(&self, device_id: &str, payload: &str) -> Result<(), CoreError> {
        self.ensure_registered(device_id).await;

        let event_topic = topic::event_topic(&self.device_type, device_id);
        tracing::debug!(device_id, topic = %event_topic, "Publishing event");

        match self.broker.publish(&event_topic, payload.as_bytes()).await {
            Ok(()) => {
                self.status.report(keys::LAST_PUBLISH, OK);
                Ok(())
            }
            Err(e) => {
                self.status.report(keys::LAST_PUBLISH, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Registers at most once per device. The set lock is held across the
    /// call so concurrent first events for one device register it once.
    async fn ensure_registered(&self, device_id: &str) {
        let mut registered = self.registered.lock().await;
        if registered.contains(device_id) {
            return;
        }

        match self.registrar.register(device_id).await {
            Ok(outcome) => {
                if outcome == Registration::AlreadyExists {
                    tracing::warn!(device_id, "Device was already registered with the platform");
                } else {
                    tracing::info!(device_id, "Registered new device");
                }
                registered.insert(device_id.to_owned());
                self.status
                    .report(keys::DEVICES_SEEN, registered.len().to_string());
                self.status.report(keys::LAST_REGISTRATION, OK);
            }
            Err(e) => {
                tracing::error!(device_id, error = %e, "Could not register device");
                self.status.report(keys::LAST_REGISTRATION, e.to_string());
            }
        }
    }

    pub async fn is_registered(&self, device_id: &str) -> bool {
        self.registered.lock().await.contains(device_id)
    }

    pub async fn devices_seen(&self) -> usize {
        self.registered.lock().await.len()
    }

    /// Forward command messages until the session fails or the token fires.
    pub async fn run(&self) -> Result<(), CoreError> {
        let result = self.receive_loop().await;
        if let Err(ref e) = result {
            tracing::warn!(error = %e, "Broker receive loop ended");
            self.status.report(keys::CONNECTION, e.to_string());
        }
        result
    }

    async fn receive_loop(&self) -> Result<(), CoreError> {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                message = self.broker.recv() => message?,
            };

            let device_id = match topic::device_from_command_topic(&message.topic) {
                Ok(device_id) => device_id,
                Err(e) => {
                    tracing::warn!(topic = %message.topic, "Dropping command with malformed topic");
                    self.status.report(keys::LAST_COMMAND, e.to_string());
                    continue;
                }
            };

            let command = Command::new(device_id, String::from_utf8_lossy(&message.payload));
            tracing::debug!(device_id = %command.device_id, "Received command");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                sent = self.commands.send(command) => sent.map_err(|_| CoreError::ChannelClosed)?,
            }
        }
    }
}

impl<B: Broker, R: Registrar> Supervised for CloudBridge<B, R> {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn connect(&self) -> Result<(), CoreError> {
        CloudBridge::connect(self).await
    }

    async fn run(&self) -> Result<(), CoreError> {
        CloudBridge::run(self).await
    }
}
