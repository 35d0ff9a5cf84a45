//! Standard stream transport.
//!
//! The engine launches the module with the protocol on stdin/stdout. `connect`
//! duplicates those descriptors so that `disconnect` closes our copies and never
//! the process's own fds 0, 1 and 2.

use std::io::{self, Read, Write};

use super::{Connection, ConnectionState, LineChannel};
use crate::error::{ConnectionError, Error, Result};
use crate::message::Message;

type Input = Box<dyn Read + Send>;
type Output = Box<dyn Write + Send>;
type Opener = Box<dyn FnMut() -> io::Result<StdioHandles> + Send>;

/// The input/output/error handle triple.
pub struct StdioHandles {
    pub input: Input,
    pub output: Output,
    /// Opened and closed with the others; never read or written here.
    pub error: Output,
}

impl StdioHandles {
    /// Fresh duplicates of this process's standard streams.
    #[cfg(unix)]
    pub fn process() -> io::Result<Self> {
        use std::fs::File;
        use std::os::fd::{AsFd, OwnedFd};

        use nix::unistd::dup;

        fn dup_fd(fd: impl AsFd, name: &str) -> io::Result<OwnedFd> {
            dup(fd).map_err(|e| io::Error::other(format!("dup({name}) failed: {e}")))
        }

        let input = dup_fd(io::stdin().as_fd(), "stdin")?;
        let output = dup_fd(io::stdout().as_fd(), "stdout")?;
        let error = dup_fd(io::stderr().as_fd(), "stderr")?;

        Ok(Self {
            input: Box::new(File::from(input)),
            output: Box::new(File::from(output)),
            error: Box::new(File::from(error)),
        })
    }

    #[cfg(not(unix))]
    pub fn process() -> io::Result<Self> {
        Ok(Self {
            input: Box::new(io::stdin()),
            output: Box::new(io::stdout()),
            error: Box::new(io::stderr()),
        })
    }
}

/// Connection over the standard streams handed to the module by the engine.
pub struct StdioConnection {
    opener: Opener,
    channel: Option<LineChannel<Input, Output>>,
    error: Option<Output>,
}

impl StdioConnection {
    /// Connect over this process's own stdin/stdout/stderr.
    pub fn new() -> Self {
        Self::with_opener(StdioHandles::process)
    }

    /// Connect over handles produced by `opener`, called once per `connect`.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: FnMut() -> io::Result<StdioHandles> + Send + 'static,
    {
        Self {
            opener: Box::new(opener),
            channel: None,
            error: None,
        }
    }

    fn fail(&mut self, err: &ConnectionError) {
        tracing::warn!(error = %err, "Standard streams failed, closing");
        self.disconnect();
    }
}

impl Default for StdioConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for StdioConnection {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.channel.is_some() {
            return Ok(());
        }

        let handles = (self.opener)().map_err(|source| ConnectionError::Open {
            endpoint: "stdio".to_string(),
            source,
        })?;
        self.channel = Some(LineChannel::new(handles.input, handles.output));
        self.error = Some(handles.error);

        tracing::debug!("Connected over standard streams");
        Ok(())
    }

    fn disconnect(&mut self) {
        let was_open = self.channel.is_some() || self.error.is_some();
        self.channel = None;
        self.error = None;
        if was_open {
            tracing::debug!("Closed standard streams");
        }
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

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::ProtocolError;
    use crate::message::{Event, Install};

    /// Write side shared with the test so output survives `disconnect`.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Shared {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // Short writes on purpose.
            let n = buf.len().min(5);
            self.0.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Reset;

    impl Read for Reset {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::ConnectionReset))
        }
    }

    fn scripted(input: &'static [u8], output: Shared) -> StdioConnection {
        StdioConnection::with_opener(move || {
            Ok(StdioHandles {
                input: Box::new(Cursor::new(input)),
                output: Box::new(output.clone()),
                error: Box::new(io::sink()),
            })
        })
    }

    #[test]
    fn starts_disconnected() {
        let mut conn = scripted(b"", Shared::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(
            conn.send_message(&Message::from(Install::request(1, "x"))),
            Err(ConnectionError::NotConnected)
        ));
    }

    #[test]
    fn connect_and_disconnect_are_idempotent() {
        let mut conn = scripted(b"", Shared::default());
        conn.connect().unwrap();
        conn.connect().unwrap();
        assert!(conn.is_connected());
        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn exchanges_lines() {
        let output = Shared::default();
        let mut conn = scripted(
            b"%%<install:100:call.route:true\n%%>message:abc:1700000000:call.route:::called=100\n",
            output.clone(),
        );
        conn.connect().unwrap();
        conn.send_message(&Message::from(Install::request(100, "call.route")))
            .unwrap();

        let Some(Message::Install(ack)) = conn.receive_message().unwrap() else {
            panic!("expected install response");
        };
        assert_eq!(ack.success(), Some(true));

        let Some(Message::Event(request)) = conn.receive_message().unwrap() else {
            panic!("expected message request");
        };
        let answer = Event::response_to(&request, false);
        conn.send_message(&Message::from(answer)).unwrap();

        assert!(conn.receive_message().unwrap().is_none());
        assert_eq!(
            output.contents(),
            "%%>install:100:call.route\n%%<message:abc:false:call.route::called=100\n"
        );
    }

    #[test]
    fn protocol_error_keeps_connection() {
        let mut conn = scripted(b"%%>install:soon:x\n", Shared::default());
        conn.connect().unwrap();
        let err = conn.receive_message().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::InvalidField {
                field: "priority",
                ..
            })
        ));
        assert!(conn.is_connected());
    }

    #[test]
    fn write_failure_disconnects() {
        let mut conn = StdioConnection::with_opener(|| {
            Ok(StdioHandles {
                input: Box::new(io::empty()),
                output: Box::new(Broken),
                error: Box::new(io::sink()),
            })
        });
        conn.connect().unwrap();
        let err = conn
            .send_message(&Message::from(Install::request(1, "x")))
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Write { written: 0, .. }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.reconnect().unwrap();
        assert!(conn.is_connected());
    }

    #[test]
    fn read_failure_disconnects() {
        let mut opened = 0;
        let mut conn = StdioConnection::with_opener(move || {
            opened += 1;
            let input: Input = if opened == 1 {
                Box::new(Reset)
            } else {
                Box::new(Cursor::new(&b"%%<install:1:x:true\n"[..]))
            };
            Ok(StdioHandles {
                input,
                output: Box::new(io::sink()),
                error: Box::new(io::sink()),
            })
        });
        conn.connect().unwrap();
        let err = conn.receive_message().unwrap_err();
        assert!(matches!(err, Error::Connection(ConnectionError::Read { .. })));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(
            conn.receive_message(),
            Err(Error::Connection(ConnectionError::NotConnected))
        ));

        conn.reconnect().unwrap();
        let Some(Message::Install(ack)) = conn.receive_message().unwrap() else {
            panic!("expected install response");
        };
        assert_eq!(ack.success(), Some(true));
    }

    #[test]
    fn open_failure_leaves_disconnected() {
        let mut conn = StdioConnection::with_opener(|| Err(io::Error::other("no tty")));
        let err = conn.connect().unwrap_err();
        assert!(matches!(err, ConnectionError::Open { .. }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
