//! The pump between the two connections.
//!
//! Events flow device → platform and commands flow platform → device. The
//! two directions run concurrently and never block each other; a failed
//! forward is logged and the message dropped.

use lrsc_api::{Broker, Dialer, Registrar};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cloud::CloudBridge;
use crate::device::DeviceConnection;
use crate::model::{Command, Event};

/// Run both directions until cancelled or both channels close.
pub async fn run_bridge<D, B, R>(
    device: &DeviceConnection<D>,
    cloud: &CloudBridge<B, R>,
    events: mpsc::Receiver<Event>,
    commands: mpsc::Receiver<Command>,
    cancel: &CancellationToken,
) where
    D: Dialer,
    B: Broker,
    R: Registrar,
{
    tracing::info!("Bridge started");
    tokio::join!(
        forward_events(cloud, events, cancel),
        forward_commands(device, commands, cancel),
    );
    tracing::info!("Bridge stopped");
}

/// Device events → platform.
pub async fn forward_events<B: Broker, R: Registrar>(
    cloud: &CloudBridge<B, R>,
    mut events: mpsc::Receiver<Event>,
    cancel: &CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if let Err(e) = cloud.publish(&event.device_id, &event.payload).await {
            tracing::warn!(device_id = %event.device_id, error = %e, "Dropping event, publish failed");
        }
    }
    tracing::debug!("Event forwarding stopped");
}

/// Platform commands → device.
pub async fn forward_commands<D: Dialer>(
    device: &DeviceConnection<D>,
    mut commands: mpsc::Receiver<Command>,
    cancel: &CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match device.send_command(&command).await {
            Ok(sequence_no) => {
                tracing::debug!(device_id = %command.device_id, sequence_no, "Delivered command");
            }
            Err(e) => {
                tracing::warn!(device_id = %command.device_id, error = %e, "Dropping command, delivery failed");
            }
        }
    }
    tracing::debug!("Command forwarding stopped");
}
