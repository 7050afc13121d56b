//! Client-side core of a two-party chat room: history bootstrap, one live
//! STOMP connection, echo-driven sends and room-wide read receipts.

pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod profile;
pub mod publisher;
pub mod receipts;
pub mod rest;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod transport;

pub use config::{load_settings, load_settings_from, ChatSettings};
pub use connection::{
    ConnectionManager, ConnectionState, Connector, FrameTransport, ReconnectPolicy,
};
pub use error::{ChatError, SendRejection};
pub use session::{ChatSession, Counterpart, ExitReason, SessionDeps, SessionEvent};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
