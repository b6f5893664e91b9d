// ── Core error types ──
//
// Errors surfaced by the bridge components and their supervisors.
// The `From<lrsc_api::Error>` impl folds wire-level failures into the
// handful of cases the supervisor and status reporting care about.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Not connected")]
    NotConnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed device message: {message}")]
    MalformedMessage { message: String },

    #[error("Invalid command topic: {topic}")]
    InvalidTopic { topic: String },

    // ── Cloud errors ─────────────────────────────────────────────────
    #[error("Broker error: {message}")]
    Broker { message: String },

    #[error("Subscription failed: {message}")]
    SubscriptionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Device registration failed: {message}")]
    RegistrationFailed {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors the supervisor should keep retrying through.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::HandshakeFailed { .. }
                | Self::ConnectionLost { .. }
                | Self::Broker { .. }
                | Self::SubscriptionFailed { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<lrsc_api::Error> for CoreError {
    fn from(err: lrsc_api::Error) -> Self {
        use lrsc_api::Error as Api;

        match err {
            Api::Connect { endpoint, source } => CoreError::ConnectionFailed {
                endpoint,
                reason: source.to_string(),
            },
            Api::Handshake { reason, .. } => CoreError::HandshakeFailed { reason },
            e @ Api::HandshakeTimeout { .. } => CoreError::HandshakeFailed {
                reason: e.to_string(),
            },
            e @ (Api::Disconnected | Api::Io(_)) => CoreError::ConnectionLost {
                reason: e.to_string(),
            },
            Api::NotConnected => CoreError::NotConnected,
            Api::Tls(message) => CoreError::Tls { message },
            Api::Parse { message, line } => {
                tracing::debug!(%line, "Rejected device line");
                CoreError::MalformedMessage { message }
            }
            e @ Api::LineTooLong { .. } => CoreError::MalformedMessage {
                message: e.to_string(),
            },
            e @ Api::Encode(_) => CoreError::Internal(e.to_string()),
            Api::InvalidTopic(topic) => CoreError::InvalidTopic { topic },
            e @ (Api::Mqtt(_)
            | Api::MqttClient(_)
            | Api::ConnectionRefused(_)
            | Api::AckTimeout { .. }) => {
                CoreError::Broker {
                    message: e.to_string(),
                }
            }
            e @ Api::SubscriptionRejected { .. } => CoreError::SubscriptionFailed {
                message: e.to_string(),
            },
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::Registration { status, message } => CoreError::RegistrationFailed {
                message,
                status: Some(status),
            },
            Api::Transport(e) => CoreError::RegistrationFailed {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_errors_become_connection_errors() {
        let err: CoreError = lrsc_api::Error::Connect {
            endpoint: "dev.lrsc.ch:55055".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        }
        .into();

        assert!(matches!(
            err,
            CoreError::ConnectionFailed { ref endpoint, .. } if endpoint == "dev.lrsc.ch:55055"
        ));
        assert!(err.is_transient());

        let err: CoreError = lrsc_api::Error::Disconnected.into();
        assert!(matches!(err, CoreError::ConnectionLost { .. }));
    }

    #[test]
    fn parse_errors_keep_the_decoder_message() {
        let err: CoreError = lrsc_api::Error::Parse {
            message: "expected value at line 1 column 1".into(),
            line: "garbage".into(),
        }
        .into();

        match err {
            CoreError::MalformedMessage { message } => {
                assert_eq!(message, "expected value at line 1 column 1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn registration_errors_keep_status() {
        let err: CoreError = lrsc_api::Error::Registration {
            status: 500,
            message: "boom".into(),
        }
        .into();

        assert!(matches!(
            err,
            CoreError::RegistrationFailed { status: Some(500), .. }
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn broker_ack_timeouts_are_retried() {
        let err: CoreError = lrsc_api::Error::AckTimeout {
            what: "SUBACK",
            timeout_secs: 10,
        }
        .into();

        assert!(matches!(err, CoreError::Broker { .. }));
        assert!(err.is_transient());
    }
}
