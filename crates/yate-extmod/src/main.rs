//! Minimal external module: installs handlers, logs what the engine dispatches and
//! answers every message request as unprocessed so routing carries on.
//!
//! Runs over the standard streams unless `YATE_HOST` or `YATE_PORT` is set.
//!
//! - `YATE_INSTALL`: comma-separated message names [default: call.route]
//! - `YATE_PRIORITY`: handler priority [default: 100]

use std::process;

use anyhow::Context;
use tracing::{debug, info, warn};

use yate_extmod::logging::init_tracing;
use yate_extmod::{
    Connection, Error, Event, Install, Message, ServerConfig, SocketConnection, StdioConnection,
    Unclassified,
};

const DEFAULT_HANDLER: &str = "call.route";
const DEFAULT_PRIORITY: i64 = 100;

fn main() {
    init_tracing();

    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    info!("yate-extmod-watch {}", yate_extmod::VERSION);

    let handlers = parse_handlers(std::env::var("YATE_INSTALL").ok().as_deref());
    let priority = match std::env::var("YATE_PRIORITY") {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .with_context(|| format!("invalid YATE_PRIORITY {raw:?}"))?,
        Err(_) => DEFAULT_PRIORITY,
    };

    let use_socket =
        std::env::var_os("YATE_HOST").is_some() || std::env::var_os("YATE_PORT").is_some();
    let mut conn: Box<dyn Connection> = if use_socket {
        let config = ServerConfig::from_env()?;
        Box::new(SocketConnection::new(config))
    } else {
        Box::new(StdioConnection::new())
    };

    conn.connect().context("connecting to engine")?;
    if use_socket {
        // Socket modules must announce their role before anything else.
        let connect = Unclassified::request("connect", &["global"])?;
        conn.send_message(&Message::from(connect))?;
    }

    for name in &handlers {
        conn.send_message(&Message::from(Install::request(priority, name.as_str())))?;
    }

    loop {
        match conn.receive_message() {
            Ok(None) => break,
            Ok(Some(Message::Install(install))) => match install.success() {
                Some(false) => warn!(name = %install.name, "Engine refused install"),
                _ => info!(name = %install.name, priority = install.priority, "Installed"),
            },
            Ok(Some(Message::Event(event))) if event.is_request() => {
                info!(
                    id = %event.id,
                    name = %event.name,
                    fields = event.fields.len(),
                    "Message"
                );
                conn.send_message(&Message::from(Event::response_to(&event, false)))?;
            }
            Ok(Some(other)) => debug!(token = other.token(), "Ignoring"),
            Err(Error::Protocol(e)) => warn!(error = %e, "Skipping malformed line"),
            Err(e) => return Err(e.into()),
        }
    }

    info!("Engine closed the connection");
    conn.disconnect();
    Ok(())
}

fn parse_handlers(raw: Option<&str>) -> Vec<String> {
    let handlers: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if handlers.is_empty() {
        vec![DEFAULT_HANDLER.to_string()]
    } else {
        handlers
    }
}
