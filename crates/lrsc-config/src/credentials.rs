// ── Service-binding credentials ──
//
// The platform credentials arrive as the `VCAP_SERVICES` JSON blob of the
// hosting environment. Only the first `iotf-service` binding is used.

use std::path::Path;

use lrsc_core::CloudCredentials;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::ConfigError;

/// Environment variable holding the service bindings.
pub const SERVICES_ENV: &str = "VCAP_SERVICES";

#[derive(Debug, Deserialize)]
struct Services {
    #[serde(rename = "iotf-service", default)]
    iotf_service: Vec<Binding>,
}

#[derive(Debug, Deserialize)]
struct Binding {
    credentials: RawCredentials,
}

#[derive(Debug, Deserialize)]
struct RawCredentials {
    #[serde(rename = "apiKey")]
    api_key: String,
    #[serde(rename = "apiToken")]
    api_token: String,
    org: String,
    base_uri: String,
    mqtt_host: String,
    #[serde(default = "default_secure_port")]
    mqtt_s_port: u16,
    #[serde(default = "default_insecure_port")]
    mqtt_u_port: u16,
}

fn default_secure_port() -> u16 {
    8883
}
fn default_insecure_port() -> u16 {
    1883
}

/// Parse a service-binding blob into platform credentials.
///
/// ```
/// let blob = r#"{"iotf-service":[{"credentials":{
///     "apiKey":"a-org-key","apiToken":"token","org":"org",
///     "base_uri":"https://internetofthings.ibmcloud.com/api/v0001",
///     "mqtt_host":"org.messaging.internetofthings.ibmcloud.com",
///     "mqtt_s_port":8883,"mqtt_u_port":1883}}]}"#;
///
/// let credentials = lrsc_config::extract_credentials(blob).unwrap();
/// assert_eq!(credentials.org, "org");
/// ```
pub fn extract_credentials(services: &str) -> Result<CloudCredentials, ConfigError> {
    let services: Services = serde_json::from_str(services).map_err(ConfigError::Services)?;
    let binding = services
        .iotf_service
        .into_iter()
        .next()
        .ok_or(ConfigError::NoBinding)?;
    let raw = binding.credentials;

    let base_uri = Url::parse(&raw.base_uri).map_err(|e| ConfigError::Validation {
        field: "base_uri".into(),
        reason: e.to_string(),
    })?;
    if raw.mqtt_host.is_empty() {
        return Err(ConfigError::Validation {
            field: "mqtt_host".into(),
            reason: "empty".into(),
        });
    }

    Ok(CloudCredentials {
        user: raw.api_key,
        password: SecretString::from(raw.api_token),
        org: raw.org,
        base_uri,
        mqtt_host: raw.mqtt_host,
        mqtt_secure_port: raw.mqtt_s_port,
        mqtt_insecure_port: raw.mqtt_u_port,
    })
}

/// Read the bindings from `services_file`, or from `VCAP_SERVICES` when no
/// file is given.
pub fn load_credentials(services_file: Option<&Path>) -> Result<CloudCredentials, ConfigError> {
    let raw = match services_file {
        Some(path) => std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?,
        None => std::env::var(SERVICES_ENV).map_err(|_| ConfigError::NoCredentials {
            var: SERVICES_ENV.into(),
        })?,
    };

    let credentials = extract_credentials(&raw)?;
    tracing::debug!(
        org = %credentials.org,
        mqtt_host = %credentials.mqtt_host,
        "Loaded service credentials"
    );
    Ok(credentials)
}
