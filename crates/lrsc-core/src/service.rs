// ── Bridge service ──
//
// Wires the two connections, their supervisors, and the pump together and
// owns the resulting tasks. The binary builds one from a `BridgeConfig`;
// tests build one from doubles through `start_with`.

use std::sync::Arc;

use lrsc_api::{Broker, Dialer, HttpRegistrar, MqttBroker, Registrar, TlsDialer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::run_bridge;
use crate::cloud::CloudBridge;
use crate::config::BridgeConfig;
use crate::device::DeviceConnection;
use crate::error::CoreError;
use crate::status::StatusReporter;
use crate::supervisor::Supervisor;

/// A running bridge.
pub struct BridgeService<D: Dialer = TlsDialer, B: Broker = MqttBroker, R: Registrar = HttpRegistrar>
{
    device: Arc<DeviceConnection<D>>,
    cloud: Arc<CloudBridge<B, R>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeService {
    /// Build the production capabilities and start.
    ///
    /// Fails before spawning anything if the TLS material or the
    /// registration URL is unusable.
    pub fn start(config: &BridgeConfig, cancel: CancellationToken) -> Result<Self, CoreError> {
        let dialer = TlsDialer::new(&config.device.dialer_config())?;
        let broker = MqttBroker::new(config.mqtt_config());
        let credentials = &config.credentials;
        let registrar = HttpRegistrar::new(
            &credentials.base_uri,
            &credentials.org,
            credentials.user.clone(),
            credentials.password.clone(),
            config.cloud.device_type.clone(),
            &config.transport_config(),
        )?;

        tracing::info!(
            concentrator = dialer.endpoint(),
            broker = %broker.config().host,
            registration = %registrar.devices_url(),
            "Starting bridge"
        );
        Ok(Self::start_with(dialer, broker, registrar, config, cancel))
    }
}

impl<D: Dialer, B: Broker, R: Registrar> BridgeService<D, B, R> {
    /// Start with the given capabilities. Must be called inside a runtime.
    pub fn start_with(
        dialer: D,
        broker: B,
        registrar: R,
        config: &BridgeConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);

        let device = Arc::new(
            DeviceConnection::new(dialer, event_tx, StatusReporter::new(), cancel.clone())
                .with_handshake_timeout(config.device.handshake_timeout),
        );
        let cloud = Arc::new(CloudBridge::new(
            broker,
            registrar,
            config.cloud.device_type.clone(),
            command_tx,
            StatusReporter::new(),
            cancel.clone(),
        ));

        let mut tasks = Vec::with_capacity(3);
        tasks.push(
            Supervisor::new(Arc::clone(&device), config.backoff.clone(), cancel.clone()).spawn(),
        );
        tasks.push(
            Supervisor::new(Arc::clone(&cloud), config.backoff.clone(), cancel.clone()).spawn(),
        );

        let pump_device = Arc::clone(&device);
        let pump_cloud = Arc::clone(&cloud);
        let pump_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            run_bridge(&pump_device, &pump_cloud, event_rx, command_rx, &pump_cancel).await;
        }));

        Self {
            device,
            cloud,
            cancel,
            tasks,
        }
    }

    pub fn device(&self) -> &Arc<DeviceConnection<D>> {
        &self.device
    }

    pub fn cloud(&self) -> &Arc<CloudBridge<B, R>> {
        &self.cloud
    }

    pub fn device_status(&self) -> StatusReporter {
        self.device.status().clone()
    }

    pub fn cloud_status(&self) -> StatusReporter {
        self.cloud.status().clone()
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every task to finish.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Bridge task ended abnormally");
            }
        }
        tracing::info!("Bridge service stopped");
    }
}
