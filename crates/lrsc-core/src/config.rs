// ── Runtime bridge configuration ──
//
// These types describe *how* to reach the concentrator and the platform.
// They carry credential data and connection tuning, but never touch disk.
// The binary builds a `BridgeConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use lrsc_api::{MqttConfig, ServerVerification, TlsDialerConfig, TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

use crate::device::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::supervisor::BackoffConfig;

/// Platform credentials from the service binding.
#[derive(Debug, Clone)]
pub struct CloudCredentials {
    /// API key, used as MQTT and HTTP username.
    pub user: String,
    /// API token.
    pub password: SecretString,
    pub org: String,
    /// Root of the REST API, e.g. `https://internetofthings.ibmcloud.com/api/v0001`.
    pub base_uri: Url,
    pub mqtt_host: String,
    pub mqtt_secure_port: u16,
    pub mqtt_insecure_port: u16,
}

/// Concentrator endpoint and TLS material.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub verification: ServerVerification,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl DeviceConfig {
    pub fn dialer_config(&self) -> TlsDialerConfig {
        TlsDialerConfig {
            host: self.host.clone(),
            port: self.port,
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            verification: self.verification.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Platform-side tuning.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Device type devices are registered and published under.
    pub device_type: String,
    /// Use the TLS port of the broker.
    pub use_tls: bool,
    pub keep_alive: Duration,
    /// Bound on waiting for CONNACK/SUBACK.
    pub ack_timeout: Duration,
    /// Timeout for registration requests.
    pub request_timeout: Duration,
    /// Extra CA for the registration endpoint, on top of the web PKI roots.
    pub ca_cert: Option<PathBuf>,
}

/// Everything the running bridge needs.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device: DeviceConfig,
    pub cloud: CloudConfig,
    pub credentials: CloudCredentials,
    pub backoff: BackoffConfig,
    /// Capacity of the event and command channels.
    pub channel_capacity: usize,
}

impl BridgeConfig {
    /// Broker session settings with a fresh `a:{org}:{uuid}` client id.
    pub fn mqtt_config(&self) -> MqttConfig {
        let credentials = &self.credentials;
        let port = if self.cloud.use_tls {
            credentials.mqtt_secure_port
        } else {
            credentials.mqtt_insecure_port
        };

        MqttConfig {
            host: credentials.mqtt_host.clone(),
            port,
            use_tls: self.cloud.use_tls,
            client_id: format!("a:{}:{}", credentials.org, uuid::Uuid::new_v4()),
            username: credentials.user.clone(),
            password: credentials.password.clone(),
            keep_alive: self.cloud.keep_alive,
            ack_timeout: self.cloud.ack_timeout,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            tls: self
                .cloud
                .ca_cert
                .clone()
                .map_or(TlsMode::System, TlsMode::CustomCa),
            timeout: self.cloud.request_timeout,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                host: "dev.lrsc.ch".into(),
                port: 55055,
                client_cert: PathBuf::from("client.crt"),
                client_key: PathBuf::from("client.key"),
                verification: ServerVerification::AcceptAny,
                connect_timeout: Duration::from_secs(10),
                handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            },
            cloud: CloudConfig {
                device_type: "LRSC".into(),
                use_tls: true,
                keep_alive: Duration::from_secs(30),
                ack_timeout: Duration::from_secs(10),
                request_timeout: Duration::from_secs(30),
                ca_cert: None,
            },
            credentials: CloudCredentials {
                user: String::new(),
                password: SecretString::from(String::new()),
                org: String::new(),
                base_uri: "https://internetofthings.ibmcloud.com/api/v0001"
                    .parse()
                    .expect("static URL is valid"),
                mqtt_host: String::new(),
                mqtt_secure_port: 8883,
                mqtt_insecure_port: 1883,
            },
            backoff: BackoffConfig::default(),
            channel_capacity: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use secrecy::ExposeSecret;

    use super::*;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.credentials.user = "a-testorg-key".into();
        config.credentials.password = SecretString::from("token");
        config.credentials.org = "testorg".into();
        config.credentials.mqtt_host = "testorg.messaging.internetofthings.ibmcloud.com".into();
        config
    }

    #[test]
    fn mqtt_config_uses_secure_port_and_org_client_id() {
        let mqtt = config().mqtt_config();

        assert_eq!(mqtt.port, 8883);
        assert!(mqtt.use_tls);
        assert_eq!(mqtt.username, "a-testorg-key");
        assert_eq!(mqtt.password.expose_secret(), "token");

        let uuid = mqtt.client_id.strip_prefix("a:testorg:").unwrap();
        assert!(uuid::Uuid::parse_str(uuid).is_ok(), "{}", mqtt.client_id);
    }

    #[test]
    fn mqtt_config_uses_insecure_port_without_tls() {
        let mut config = config();
        config.cloud.use_tls = false;

        let mqtt = config.mqtt_config();
        assert_eq!(mqtt.port, 1883);
        assert!(!mqtt.use_tls);
    }

    #[test]
    fn transport_uses_custom_ca_when_configured() {
        let mut config = config();
        assert!(matches!(config.transport_config().tls, TlsMode::System));

        config.cloud.ca_cert = Some(PathBuf::from("/etc/ssl/platform.pem"));
        let transport = config.transport_config();
        assert!(matches!(transport.tls, TlsMode::CustomCa(ref p) if p == Path::new("/etc/ssl/platform.pem")));
        assert_eq!(transport.timeout, Duration::from_secs(30));
    }

    #[test]
    fn client_ids_are_unique_per_session() {
        let config = config();
        assert_ne!(config.mqtt_config().client_id, config.mqtt_config().client_id);
    }
}
