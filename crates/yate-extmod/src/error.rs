use std::io;
use std::num::ParseIntError;

use thiserror::Error;

/// A received line could not be classified or parsed.
///
/// Scoped to a single receive: the connection stays usable.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty line")]
    EmptyLine,

    #[error("line does not start with a %%> or %%< marker: {line:?}")]
    MissingMarker { line: String },

    #[error("missing type token after marker")]
    MissingTypeToken,

    #[error("escape introducer '%' at end of input")]
    TrailingEscape,

    #[error("invalid escape sequence '%' followed by byte 0x{byte:02x}")]
    InvalidEscape { byte: u8 },

    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("invalid value for field '{field}': {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
}

/// Transport-level failure. Fatal to the current connection until `reconnect()`.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,

    #[error("failed to open {endpoint}: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read from engine: {source}")]
    Read {
        #[source]
        source: io::Error,
    },

    #[error("failed to write to engine after {written} of {total} bytes: {source}")]
    Write {
        written: usize,
        total: usize,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port {value:?}: {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
