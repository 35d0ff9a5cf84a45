//! Socket transport: TCP or Unix domain socket, chosen by port.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use super::{Connection, ConnectionState, LineChannel};
use crate::config::{Endpoint, ServerConfig};
use crate::error::{ConnectionError, Error, Result};
use crate::message::Message;

/// One connected socket, either flavour.
#[derive(Debug)]
enum SocketStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl SocketStream {
    fn open(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))?;
                stream.set_nodelay(true)?;
                Ok(Self::Tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix { path } => Ok(Self::Unix(UnixStream::connect(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix domain sockets are not available on this platform",
            )),
        }
    }

    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(s) => s.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(s) => s.try_clone().map(Self::Unix),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for SocketStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

/// Connection to an engine listening on a TCP port or a Unix socket path.
///
/// Port 0 selects the Unix socket at `host`.
pub struct SocketConnection {
    config: ServerConfig,
    channel: Option<LineChannel<SocketStream, SocketStream>>,
}

impl SocketConnection {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            channel: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Point at a different engine. Takes effect on the next `connect`/`reconnect`.
    pub fn set_server(&mut self, host: impl Into<String>, port: u16) {
        self.config = ServerConfig::new(host, port);
    }

    fn fail(&mut self, err: &ConnectionError) {
        tracing::warn!(
            endpoint = %self.config.endpoint(),
            error = %err,
            "Socket failed, closing"
        );
        self.disconnect();
    }
}

impl Default for SocketConnection {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl Connection for SocketConnection {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.channel.is_some() {
            return Ok(());
        }

        let endpoint = self.config.endpoint();
        tracing::debug!(%endpoint, "Connecting to engine");

        let open_err = |source| ConnectionError::Open {
            endpoint: endpoint.to_string(),
            source,
        };
        let reader = SocketStream::open(&endpoint).map_err(open_err)?;
        let writer = reader.try_clone().map_err(open_err)?;
        self.channel = Some(LineChannel::new(reader, writer));

        tracing::debug!(%endpoint, "Connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(channel) = self.channel.take() else {
            return;
        };
        let (reader, _writer) = channel.into_streams();
        // Both halves share one socket; shut it down so the peer sees EOF even before
        // the handles drop. The peer may already be gone.
        let _ = reader.shutdown();
        tracing::debug!(endpoint = %self.config.endpoint(), "Disconnected");
    }

    fn state(&self) -> ConnectionState {
        if self.channel.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn send_message(&mut self, message: &Message) -> Result<(), ConnectionError> {
        let channel = self.channel.as_mut().ok_or(ConnectionError::NotConnected)?;
        let result = channel.send(message);
        if let Err(err) = &result {
            self.fail(err);
        }
        result
    }

    fn receive_message(&mut self) -> Result<Option<Message>> {
        let channel = self.channel.as_mut().ok_or(ConnectionError::NotConnected)?;
        let result = channel.receive();
        if let Err(Error::Connection(err)) = &result {
            self.fail(err);
        }
        result
    }
}

impl Drop for SocketConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
