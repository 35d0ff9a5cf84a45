//! Blocking duplex connection to the engine.
//!
//! - **socket**: TCP when a port is configured, Unix domain socket otherwise
//! - **stdio**: the standard stream triple inherited from the engine
//!
//! Both share [`LineChannel`] for the actual line I/O, so they differ only in how
//! handles are acquired.

mod socket;
mod stdio;

use std::io::{self, BufRead, BufReader, Read, Write};

use serde::{Deserialize, Serialize};

use crate::dispatch;
use crate::error::{ConnectionError, Result};
use crate::message::Message;

pub use socket::SocketConnection;
pub use stdio::{StdioConnection, StdioHandles};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Contract shared by every transport.
///
/// A transport error (`ConnectionError`) releases the handles and leaves the
/// connection `Disconnected`; call [`reconnect`](Connection::reconnect) before
/// further use. A `ProtocolError` on receive leaves it connected.
pub trait Connection {
    /// Open the handles. No-op when already connected.
    fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Close whatever is open. Always succeeds.
    fn disconnect(&mut self);

    fn state(&self) -> ConnectionState;

    /// Serialize `message` and write the whole line.
    fn send_message(&mut self, message: &Message) -> Result<(), ConnectionError>;

    /// Read one line and parse it. `Ok(None)` on clean end of input.
    fn receive_message(&mut self) -> Result<Option<Message>>;

    fn reconnect(&mut self) -> Result<(), ConnectionError> {
        self.disconnect();
        self.connect()
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Buffered reader and writer halves of one open stream.
pub(crate) struct LineChannel<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R: Read, W: Write> LineChannel<R, W> {
    pub(crate) fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub(crate) fn send(&mut self, message: &Message) -> Result<(), ConnectionError> {
        let line = message.to_line();
        write_full(&mut self.writer, line.as_bytes())?;
        tracing::trace!(
            token = message.token(),
            request = message.is_request(),
            bytes = line.len(),
            "Sent line"
        );
        Ok(())
    }

    pub(crate) fn receive(&mut self) -> Result<Option<Message>> {
        let Some(line) = read_line(&mut self.reader)? else {
            tracing::debug!("Engine closed the stream");
            return Ok(None);
        };
        tracing::trace!(bytes = line.len(), "Received line");
        Ok(Some(dispatch::parse_line(&line)?))
    }

    pub(crate) fn into_streams(self) -> (R, W) {
        (self.reader.into_inner(), self.writer)
    }
}

/// Write all of `bytes`, issuing further writes for whatever a short write left over.
///
/// Fails only when the writer reports an error (or accepts nothing at all).
pub(crate) fn write_full<W: Write + ?Sized>(
    writer: &mut W,
    bytes: &[u8],
) -> Result<(), ConnectionError> {
    let total = bytes.len();
    let mut written = 0;
    while written < total {
        match writer.write(&bytes[written..]) {
            Ok(0) => {
                return Err(ConnectionError::Write {
                    written,
                    total,
                    source: io::Error::from(io::ErrorKind::WriteZero),
                });
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ConnectionError::Write {
                    written,
                    total,
                    source,
                });
            }
        }
    }
    writer.flush().map_err(|source| ConnectionError::Write {
        written,
        total,
        source,
    })
}

/// Read up to and including the next `\n`. `None` when nothing is left.
///
/// A final line without a newline is still returned.
pub(crate) fn read_line<R: BufRead + ?Sized>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, ConnectionError> {
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(buf)),
        Err(source) => Err(ConnectionError::Read { source }),
    }
}
