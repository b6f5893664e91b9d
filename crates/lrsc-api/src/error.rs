use thiserror::Error;

/// Top-level error type for the `lrsc-api` crate.
///
/// Covers every failure mode of the wire-level clients: the concentrator
/// socket, the MQTT session, and the device registration API.
/// `lrsc-core` maps these into supervisor-facing errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Device socket ───────────────────────────────────────────────
    /// TCP connect or TLS handshake with the concentrator failed.
    #[error("Could not connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The protocol handshake could not be completed.
    #[error("Handshake with {endpoint} failed: {reason}")]
    Handshake { endpoint: String, reason: String },

    /// No handshake response arrived in time.
    #[error("No handshake response within {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    /// The peer closed the socket.
    #[error("Connection closed by peer")]
    Disconnected,

    /// An operation needed a live session but none is established.
    #[error("Not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate, key, or TLS configuration problem.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// A device line was not a valid message, with the raw line for debugging.
    #[error("Malformed device message: {message}")]
    Parse { message: String, line: String },

    /// The concentrator sent more than `limit` bytes without a line ending.
    #[error("Device line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("Could not encode device message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A command topic did not carry a device id.
    #[error("Invalid command topic: {0}")]
    InvalidTopic(String),

    // ── MQTT ────────────────────────────────────────────────────────
    /// The MQTT event loop failed; the session is gone.
    #[error("MQTT connection error: {0}")]
    Mqtt(#[from] rumqttc::ConnectionError),

    /// The MQTT request queue rejected a request.
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    /// The broker did not accept the session.
    #[error("Broker refused connection: {0}")]
    ConnectionRefused(String),

    /// The broker did not acknowledge in time.
    #[error("No {what} from broker within {timeout_secs}s")]
    AckTimeout {
        what: &'static str,
        timeout_secs: u64,
    },

    #[error("Subscription to {filter} rejected by broker")]
    SubscriptionRejected { filter: String },

    // ── Registration API ────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The platform rejected the API key or token.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Any other non-success answer from the registration endpoint.
    #[error("Device registration failed (HTTP {status}): {message}")]
    Registration { status: u16, message: String },
}
