//! End-to-end exchanges against a fake engine on a real socket.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;

use yate_extmod::{
    Connection, ConnectionError, ConnectionState, Event, Install, Message, ServerConfig,
    SocketConnection,
};

/// Read `expect` lines from the module, then write `reply` and close.
fn fake_engine<S: std::io::Read + Write>(stream: S, expect: usize, reply: &[u8]) -> Vec<String> {
    let mut reader = BufReader::new(stream);
    let mut received = Vec::new();
    for _ in 0..expect {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        received.push(line);
    }
    let stream = reader.get_mut();
    // Split the reply so the module sees it arrive in pieces.
    let (head, tail) = reply.split_at(reply.len() / 2);
    stream.write_all(head).unwrap();
    stream.flush().unwrap();
    stream.write_all(tail).unwrap();
    received
}

#[cfg(unix)]
#[test]
fn unix_socket_exchange() {
    use std::os::unix::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extmod.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let engine = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        fake_engine(
            stream,
            1,
            b"%%<install:100:call.route:true\n%%>message:abc123:1000000:dial:::number=5551234\n",
        )
    });

    let mut conn = SocketConnection::new(ServerConfig::new(path.to_str().unwrap(), 0));
    conn.connect().unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    conn.send_message(&Message::from(Install::request(100, "call.route")))
        .unwrap();

    let Some(Message::Install(ack)) = conn.receive_message().unwrap() else {
        panic!("expected install response");
    };
    assert_eq!(ack.success(), Some(true));

    let Some(Message::Event(event)) = conn.receive_message().unwrap() else {
        panic!("expected message");
    };
    assert_eq!(event.id, "abc123");
    assert_eq!(event.timestamp(), Some(1000000));
    assert_eq!(event.name, "dial");
    assert_eq!(event.get("number"), Some("5551234"));

    // Engine hung up after replying: clean end of input, not an error.
    assert!(conn.receive_message().unwrap().is_none());
    assert!(conn.receive_message().unwrap().is_none());

    let received = engine.join().unwrap();
    assert_eq!(received, vec!["%%>install:100:call.route\n"]);
}

#[test]
fn tcp_exchange() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let engine = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        fake_engine(stream, 2, b"%%<message:42:true:call.route:sip/100\n")
    });

    let mut conn = SocketConnection::new(ServerConfig::new("127.0.0.1", port));
    conn.connect().unwrap();

    let request = Event::request("42", "call.route")
        .with_timestamp(1000)
        .with_field("caller", "1234")
        .with_field("called", "100");
    conn.send_message(&Message::from(Install::request(50, "call.route")))
        .unwrap();
    conn.send_message(&Message::from(request.clone())).unwrap();

    let Some(Message::Event(answer)) = conn.receive_message().unwrap() else {
        panic!("expected message response");
    };
    assert!(answer.is_response_to(&request));
    assert_eq!(answer.processed(), Some(true));
    assert_eq!(answer.return_value, "sip/100");

    let received = engine.join().unwrap();
    assert_eq!(
        received,
        vec![
            "%%>install:50:call.route\n",
            "%%>message:42:1000:call.route::caller=1234:called=100\n",
        ]
    );
}

#[cfg(unix)]
#[test]
fn connect_failure_stays_disconnected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.sock");

    let mut conn = SocketConnection::new(ServerConfig::new(path.to_str().unwrap(), 0));
    let err = conn.connect().unwrap_err();
    assert!(matches!(err, ConnectionError::Open { .. }));
    assert!(err.to_string().contains("missing.sock"));
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    let err = conn
        .send_message(&Message::from(Install::request(1, "x")))
        .unwrap_err();
    assert!(matches!(err, ConnectionError::NotConnected));
}

#[test]
fn reconnect_after_set_server() {
    let first = TcpListener::bind("127.0.0.1:0").unwrap();
    let second = TcpListener::bind("127.0.0.1:0").unwrap();
    let first_port = first.local_addr().unwrap().port();
    let second_port = second.local_addr().unwrap().port();

    let engine = thread::spawn(move || {
        let (s1, _) = first.accept().unwrap();
        drop(s1);
        let (s2, _) = second.accept().unwrap();
        fake_engine(s2, 1, b"")
    });

    let mut conn = SocketConnection::new(ServerConfig::new("127.0.0.1", first_port));
    conn.connect().unwrap();

    conn.set_server("127.0.0.1", second_port);
    // Still on the first socket until reconnect.
    assert!(conn.is_connected());
    conn.reconnect().unwrap();
    assert_eq!(conn.config().port, second_port);

    conn.send_message(&Message::from(Install::request(10, "engine.timer")))
        .unwrap();
    conn.disconnect();
    conn.disconnect();
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    let received = engine.join().unwrap();
    assert_eq!(received, vec!["%%>install:10:engine.timer\n"]);
}

#[test]
fn config_deserializes_from_json() {
    let config: ServerConfig =
        serde_json::from_str(r#"{"host": "/run/yate/ext.sock", "port": 0}"#).unwrap();
    assert_eq!(config.endpoint().to_string(), "unix:/run/yate/ext.sock");
}
