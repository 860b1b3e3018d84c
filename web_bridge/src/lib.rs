//! Device-scoped bridge between browser sessions and chassis MQTT topics.

pub mod broker;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod multiplexer;
pub mod security;
pub mod session;
pub mod state;
pub mod translator;

#[cfg(test)]
mod testing;

pub use broker::{BrokerLink, InboundMessage, MqttLink};
pub use connection::{ClientConnection, ConnectionState};
pub use error::{
    ApiError, AuthError, BrokerError, ConnectError, ControlError, MultiplexerError, SessionError,
    TranslateError,
};
pub use multiplexer::{ConnectionId, MultiplexerHandle, MultiplexerStats, StatusFrame};
pub use session::{Session, SessionHandle, SessionRegistry};
pub use state::AppState;
pub use translator::{Action, CommandTranslator, ControlParams};
