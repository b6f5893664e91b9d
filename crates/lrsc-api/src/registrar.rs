//! Device registration against the platform's REST API.

use std::future::Future;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Outcome of a successful registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The platform created the device.
    Created,
    /// The platform already knew the device.
    AlreadyExists,
}

/// Registers devices with the platform before their first event.
pub trait Registrar: Send + Sync + 'static {
    fn register(&self, device_id: &str) -> impl Future<Output = Result<Registration, Error>> + Send;
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    device_type: &'a str,
}

#[derive(Deserialize)]
struct PlatformError {
    message: String,
}

/// HTTP [`Registrar`] for `POST {base_uri}/organizations/{org}/devices`.
pub struct HttpRegistrar {
    http: reqwest::Client,
    devices_url: Url,
    username: String,
    password: SecretString,
    device_type: String,
}

impl HttpRegistrar {
    pub fn new(
        base_uri: &Url,
        org: &str,
        username: impl Into<String>,
        password: SecretString,
        device_type: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Self::with_client(
            transport.build_client()?,
            base_uri,
            org,
            username,
            password,
            device_type,
        )
    }

    /// Build on an existing `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_uri: &Url,
        org: &str,
        username: impl Into<String>,
        password: SecretString,
        device_type: impl Into<String>,
    ) -> Result<Self, Error> {
        let base = base_uri.as_str().trim_end_matches('/');
        let devices_url = Url::parse(&format!("{base}/organizations/{org}/devices"))?;

        Ok(Self {
            http,
            devices_url,
            username: username.into(),
            password,
            device_type: device_type.into(),
        })
    }

    pub fn devices_url(&self) -> &Url {
        &self.devices_url
    }
}

impl Registrar for HttpRegistrar {
    async fn register(&self, device_id: &str) -> Result<Registration, Error> {
        tracing::debug!(device_id, url = %self.devices_url, "Registering device");

        let body = RegistrationRequest {
            id: device_id,
            device_type: &self.device_type,
        };

        let resp = self
            .http
            .post(self.devices_url.clone())
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::CREATED {
            return Ok(Registration::Created);
        }

        let message = error_message(resp).await;
        match status {
            StatusCode::CONFLICT => {
                tracing::debug!(device_id, %message, "Device already registered");
                Ok(Registration::AlreadyExists)
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                Err(Error::Authentication { message })
            }
            _ => Err(Error::Registration {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

/// Pull the platform's `message` field out of an error body, falling back
/// to a truncated raw body.
async fn error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<PlatformError>(&body) {
        return parsed.message;
    }
    if body.trim().is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_owned();
    }
    body.chars().take(200).collect()
}
