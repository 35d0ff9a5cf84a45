//! Classify an incoming line by its marker and type token.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::{Direction, Event, Install, Message, Unclassified};

/// The three-byte prefix of every line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    /// `%%>`
    Request,
    /// `%%<`
    Response,
}

impl Marker {
    pub const LEN: usize = 3;

    pub fn from_request(request: bool) -> Self {
        if request { Self::Request } else { Self::Response }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "%%>",
            Self::Response => "%%<",
        }
    }

    pub fn is_request(self) -> bool {
        self == Self::Request
    }

    fn parse(line: &str) -> Option<Self> {
        match line.get(..Self::LEN)? {
            "%%>" => Some(Self::Request),
            "%%<" => Some(Self::Response),
            _ => None,
        }
    }

    /// Direction implied by this marker on a line of the given kind.
    ///
    /// Installs are requested by the module, so `%%>install` travels towards the
    /// engine. Messages are mostly dispatched by the engine, so `%%>message` is
    /// read as inbound and `%%<message` as the module's answer.
    pub fn direction_for(self, kind: Kind) -> Direction {
        match (kind, self) {
            (Kind::Event, Self::Request) => Direction::Inbound,
            (Kind::Event, Self::Response) => Direction::Outbound,
            (_, Self::Request) => Direction::Outbound,
            (_, Self::Response) => Direction::Inbound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Install,
    Event,
    Unclassified,
}

/// Tokens the protocol defines but this crate does not model.
pub const UNMODELED_TOKENS: &[&str] = &[
    "uninstall",
    "watch",
    "unwatch",
    "setlocal",
    "output",
    "connect",
    "quit",
];

impl Kind {
    pub fn from_token(token: &str) -> Self {
        match token {
            "install" => Self::Install,
            "message" => Self::Event,
            _ => Self::Unclassified,
        }
    }
}

/// Result of [`classify`]: the line split at its first `:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified<'a> {
    pub marker: Marker,
    pub kind: Kind,
    pub token: &'a str,
    /// Everything after the first `:`; empty when the line has no fields.
    pub remainder: &'a str,
    /// The line without its trailing newline.
    pub line: &'a str,
}

impl Classified<'_> {
    pub fn is_request(&self) -> bool {
        self.marker.is_request()
    }
}

/// Split a line into marker, kind and the undecoded remainder.
///
/// Unknown tokens are not errors: they classify as [`Kind::Unclassified`].
pub fn classify(line: &str) -> Result<Classified<'_>, ProtocolError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let marker = Marker::parse(line).ok_or_else(|| ProtocolError::MissingMarker {
        line: line.to_string(),
    })?;

    let rest = &line[Marker::LEN..];
    let (token, remainder) = rest.split_once(':').unwrap_or((rest, ""));
    if token.is_empty() {
        return Err(ProtocolError::MissingTypeToken);
    }

    let kind = Kind::from_token(token);
    if kind == Kind::Unclassified && !UNMODELED_TOKENS.contains(&token) {
        tracing::debug!(token, "Unrecognized type token");
    }

    Ok(Classified {
        marker,
        kind,
        token,
        remainder,
        line,
    })
}

/// Classify one received line and parse it into a typed message.
pub fn parse_line(line: &[u8]) -> Result<Message, ProtocolError> {
    let line =
        std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8 { field: "line" })?;
    let classified = classify(line)?;

    let message = match classified.kind {
        Kind::Install => {
            Message::Install(Install::parse(classified.marker, classified.remainder)?)
        }
        Kind::Event => Message::Event(Event::parse(classified.marker, classified.remainder)?),
        Kind::Unclassified => Message::Unclassified(Unclassified {
            direction: classified.marker.direction_for(Kind::Unclassified),
            request: classified.is_request(),
            token: classified.token.to_string(),
            line: classified.line.to_string(),
        }),
    };
    Ok(message)
}
