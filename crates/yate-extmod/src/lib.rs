//! yate-extmod: client for the Yate external module protocol.
//!
//! # Architecture
//!
//! - **escape**: byte escaping shared by every field
//! - **message**: typed messages (`Install`, `Event`, `Unclassified`) and line framing
//! - **dispatch**: marker/token classification of received lines
//! - **connection**: blocking socket and standard-stream transports

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod escape;
pub mod logging;
pub mod message;

pub use config::{Endpoint, ServerConfig};
pub use connection::{
    Connection, ConnectionState, SocketConnection, StdioConnection, StdioHandles,
};
pub use dispatch::{Classified, Kind, Marker, classify, parse_line};
pub use error::{ConfigError, ConnectionError, Error, ProtocolError, Result};
pub use message::{
    Direction, Event, EventStage, Field, FieldList, Filter, Install, InstallRole, Message,
    Unclassified,
};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
