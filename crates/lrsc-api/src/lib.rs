// lrsc-api: Wire-level clients for the LRSC concentrator socket and the IoT platform

pub mod broker;
pub mod codec;
pub mod dialer;
pub mod error;
pub mod registrar;
pub mod topic;
pub mod transport;

pub use broker::{Broker, BrokerMessage, MqttBroker, MqttConfig};
pub use codec::{DeviceMessage, MessageMode, MessageType};
pub use dialer::{Dialer, ServerVerification, TlsDialer, TlsDialerConfig};
pub use error::Error;
pub use registrar::{HttpRegistrar, Registrar, Registration};
pub use transport::{TlsMode, TransportConfig};
