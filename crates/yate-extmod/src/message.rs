//! Typed protocol messages and their line framing.
//!
//! One message is one line:
//!
//! ```text
//! <marker><type-token>:field_1:field_2:...:field_n\n
//! ```
//!
//! `%%>` marks a request and `%%<` a response. Each field is escaped on its own
//! (see [`crate::escape`]), so a value can carry `:` or newlines without breaking framing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dispatch::{self, Marker};
use crate::error::ProtocolError;
use crate::escape::{decode_str, encode_str};

/// Which way a message travels relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Produced here, destined for the engine.
    Outbound,
    /// Received from the engine.
    Inbound,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Outbound => Self::Inbound,
            Self::Inbound => Self::Outbound,
        }
    }
}

/// One entry of an event's field list: positional, or `key=value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Pair { key: String, value: String },
    Value(String),
}

impl Field {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Pair { key, .. } => Some(key),
            Self::Value(_) => None,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Pair { value, .. } | Self::Value(value) => value,
        }
    }

    fn write(&self, out: &mut String) {
        match self {
            Self::Pair { key, value } => {
                out.push_str(&encode_str(key));
                out.push('=');
                out.push_str(&encode_str(value));
            }
            Self::Value(value) => out.push_str(&encode_str(value)),
        }
    }

    /// Parse one wire field. The field is decoded first, then split on the first `=`.
    fn parse(wire: &str) -> Result<Self, ProtocolError> {
        let raw = decode_str(wire, "fields")?;
        Ok(match raw.split_once('=') {
            Some((key, value)) => Self::Pair {
                key: key.to_string(),
                value: value.to_string(),
            },
            None => Self::Value(raw),
        })
    }
}

/// Ordered field list. Keys are unique; order is kept end to end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldList(Vec<Field>);

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|f| f.key() == Some(key))
            .map(Field::value)
    }

    /// Replace the value of `key` in place, or append it.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|f| f.key() == Some(key.as_str())) {
            Some(Field::Pair { value: existing, .. }) => *existing = value,
            _ => self.0.push(Field::Pair { key, value }),
        }
    }

    pub fn push_value(&mut self, value: impl Into<String>) {
        self.0.push(Field::Value(value.into()));
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|f| f.key() == Some(key))?;
        Some(self.0.remove(idx).value().to_string())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = Self::new();
        for (k, v) in iter {
            list.set(k, v);
        }
        list
    }
}

/// Optional narrowing of an install to events whose `name` field equals `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum InstallRole {
    Request {
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<Filter>,
    },
    Response {
        success: bool,
    },
}

/// Registers (or reports on registering) a handler for a named event category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Install {
    pub direction: Direction,
    /// Lower runs earlier when the engine dispatches.
    pub priority: i64,
    pub name: String,
    #[serde(flatten)]
    pub role: InstallRole,
}

impl Install {
    pub fn request(priority: i64, name: impl Into<String>) -> Self {
        Self {
            direction: Direction::Outbound,
            priority,
            name: name.into(),
            role: InstallRole::Request { filter: None },
        }
    }

    pub fn response(priority: i64, name: impl Into<String>, success: bool) -> Self {
        Self {
            direction: Direction::Inbound,
            priority,
            name: name.into(),
            role: InstallRole::Response { success },
        }
    }

    /// Narrow a request to events whose `name` field is `value`. No-op on responses.
    pub fn with_filter(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        if let InstallRole::Request { filter } = &mut self.role {
            *filter = Some(Filter {
                name: name.into(),
                value,
            });
        }
        self
    }

    pub fn is_request(&self) -> bool {
        matches!(self.role, InstallRole::Request { .. })
    }

    pub fn success(&self) -> Option<bool> {
        match self.role {
            InstallRole::Response { success } => Some(success),
            InstallRole::Request { .. } => None,
        }
    }

    pub fn filter(&self) -> Option<&Filter> {
        match &self.role {
            InstallRole::Request { filter } => filter.as_ref(),
            InstallRole::Response { .. } => None,
        }
    }

    fn write_fields(&self, out: &mut String) {
        out.push(':');
        out.push_str(&self.priority.to_string());
        out.push(':');
        out.push_str(&encode_str(&self.name));
        match &self.role {
            InstallRole::Request { filter: None } => {}
            InstallRole::Request {
                filter: Some(filter),
            } => {
                out.push(':');
                out.push_str(&encode_str(&filter.name));
                if let Some(value) = &filter.value {
                    out.push(':');
                    out.push_str(&encode_str(value));
                }
            }
            InstallRole::Response { success } => {
                out.push(':');
                out.push_str(bool_token(*success));
            }
        }
    }

    /// Parse the part of an `install` line after the type token.
    pub fn parse(marker: Marker, remainder: &str) -> Result<Self, ProtocolError> {
        let parts = split_fields(remainder);

        let priority_raw = required(&parts, 0, "priority")?;
        let priority = priority_raw
            .parse::<i64>()
            .map_err(|_| ProtocolError::InvalidField {
                field: "priority",
                value: priority_raw.to_string(),
            })?;

        let name = decode_str(required(&parts, 1, "name")?, "name")?;
        if name.is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "name",
                value: name,
            });
        }

        let role = if marker.is_request() {
            let filter = match parts.get(2) {
                Some(wire) => Some(Filter {
                    name: decode_str(wire, "filterName")?,
                    value: parts
                        .get(3)
                        .map(|wire| decode_str(wire, "filterValue"))
                        .transpose()?,
                }),
                None => None,
            };
            InstallRole::Request { filter }
        } else {
            InstallRole::Response {
                success: parse_bool(required(&parts, 2, "success")?, "success")?,
            }
        };

        Ok(Self {
            direction: marker.direction_for(dispatch::Kind::Install),
            priority,
            name,
            role,
        })
    }
}

/// Request/response-specific slot of an event line (position 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum EventStage {
    Request { timestamp: i64 },
    Response { processed: bool },
}

/// A routed or notified occurrence (wire token `message`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub direction: Direction,
    /// Correlation token; a response carries the id of its request.
    pub id: String,
    #[serde(flatten)]
    pub stage: EventStage,
    pub name: String,
    pub return_value: String,
    pub fields: FieldList,
}

impl Event {
    /// A new outbound request with timestamp 0 and no fields.
    pub fn request(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            direction: Direction::Outbound,
            id: id.into(),
            stage: EventStage::Request { timestamp: 0 },
            name: name.into(),
            return_value: String::new(),
            fields: FieldList::new(),
        }
    }

    /// Answer `request`, echoing its id, name, return value and fields.
    pub fn response_to(request: &Event, processed: bool) -> Self {
        Self {
            direction: request.direction.reverse(),
            id: request.id.clone(),
            stage: EventStage::Response { processed },
            name: request.name.clone(),
            return_value: request.return_value.clone(),
            fields: request.fields.clone(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        if let EventStage::Request { timestamp: t } = &mut self.stage {
            *t = timestamp;
        }
        self
    }

    pub fn with_return_value(mut self, value: impl Into<String>) -> Self {
        self.return_value = value.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.set(key, value);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.fields.push_value(value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.set(key, value);
    }

    pub fn is_request(&self) -> bool {
        matches!(self.stage, EventStage::Request { .. })
    }

    pub fn timestamp(&self) -> Option<i64> {
        match self.stage {
            EventStage::Request { timestamp } => Some(timestamp),
            EventStage::Response { .. } => None,
        }
    }

    pub fn processed(&self) -> Option<bool> {
        match self.stage {
            EventStage::Response { processed } => Some(processed),
            EventStage::Request { .. } => None,
        }
    }

    /// True if `self` is a response carrying the id of `request`.
    pub fn is_response_to(&self, request: &Event) -> bool {
        !self.is_request() && request.is_request() && self.id == request.id
    }

    fn write_fields(&self, out: &mut String) {
        out.push(':');
        out.push_str(&encode_str(&self.id));
        out.push(':');
        match self.stage {
            EventStage::Request { timestamp } => out.push_str(&timestamp.to_string()),
            EventStage::Response { processed } => out.push_str(bool_token(processed)),
        }
        out.push(':');
        out.push_str(&encode_str(&self.name));
        out.push(':');
        out.push_str(&encode_str(&self.return_value));
        for field in &self.fields {
            out.push(':');
            field.write(out);
        }
    }

    /// Parse the part of a `message` line after the type token.
    ///
    /// Empty fields past the return value carry nothing and are skipped.
    pub fn parse(marker: Marker, remainder: &str) -> Result<Self, ProtocolError> {
        let parts = split_fields(remainder);

        let id = decode_str(required(&parts, 0, "id")?, "id")?;

        let stage_field = if marker.is_request() {
            "timestamp"
        } else {
            "processed"
        };
        let stage_raw = required(&parts, 1, stage_field)?;
        let stage = if marker.is_request() {
            let timestamp = stage_raw
                .parse::<i64>()
                .map_err(|_| ProtocolError::InvalidField {
                    field: "timestamp",
                    value: stage_raw.to_string(),
                })?;
            EventStage::Request { timestamp }
        } else {
            EventStage::Response {
                processed: parse_bool(stage_raw, "processed")?,
            }
        };

        let name = decode_str(required(&parts, 2, "name")?, "name")?;
        let return_value = decode_str(required(&parts, 3, "returnValue")?, "returnValue")?;

        let mut fields = FieldList::new();
        for wire in parts.iter().skip(4).filter(|p| !p.is_empty()) {
            fields.0.push(Field::parse(wire)?);
        }

        Ok(Self {
            direction: marker.direction_for(dispatch::Kind::Event),
            id,
            stage,
            name,
            return_value,
            fields,
        })
    }
}

/// A line whose type token is not modelled here. Kept verbatim so it can be relayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unclassified {
    pub direction: Direction,
    pub request: bool,
    pub token: String,
    /// The full line without its trailing newline.
    pub line: String,
}

impl Unclassified {
    /// Build an outbound request such as `%%>connect:global` from raw field values.
    ///
    /// Field values are escaped; the token is not, so it must be a bare ASCII
    /// identifier (letters, digits, `_`).
    pub fn request<S: AsRef<str>>(token: &str, fields: &[S]) -> Result<Self, ProtocolError> {
        if !is_bare_token(token) {
            return Err(ProtocolError::InvalidField {
                field: "token",
                value: token.to_string(),
            });
        }
        let mut line = String::from(Marker::Request.as_str());
        line.push_str(token);
        for field in fields {
            line.push(':');
            line.push_str(&encode_str(field.as_ref()));
        }
        Ok(Self {
            direction: Direction::Outbound,
            request: true,
            token: token.to_string(),
            line,
        })
    }
}

/// A protocol message of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Install(Install),
    Event(Event),
    Unclassified(Unclassified),
}

impl Message {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Install(m) => m.direction,
            Self::Event(m) => m.direction,
            Self::Unclassified(m) => m.direction,
        }
    }

    pub fn is_request(&self) -> bool {
        match self {
            Self::Install(m) => m.is_request(),
            Self::Event(m) => m.is_request(),
            Self::Unclassified(m) => m.request,
        }
    }

    /// True when this message is headed for the engine.
    pub fn is_for_engine(&self) -> bool {
        self.direction() == Direction::Outbound
    }

    /// Type token written after the marker.
    pub fn token(&self) -> &str {
        match self {
            Self::Install(_) => "install",
            Self::Event(_) => "message",
            Self::Unclassified(m) => &m.token,
        }
    }

    pub fn marker(&self) -> Marker {
        Marker::from_request(self.is_request())
    }

    /// Serialize to one newline-terminated line.
    pub fn to_line(&self) -> String {
        let mut line = self.to_string();
        line.push('\n');
        line
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Self::Unclassified(m) = self {
            return f.write_str(&m.line);
        }
        let mut out = String::from(self.marker().as_str());
        out.push_str(self.token());
        match self {
            Self::Install(m) => m.write_fields(&mut out),
            Self::Event(m) => m.write_fields(&mut out),
            Self::Unclassified(_) => {}
        }
        f.write_str(&out)
    }
}

impl std::str::FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        dispatch::parse_line(s.as_bytes())
    }
}

impl From<Install> for Message {
    fn from(m: Install) -> Self {
        Self::Install(m)
    }
}

impl From<Event> for Message {
    fn from(m: Event) -> Self {
        Self::Event(m)
    }
}

impl From<Unclassified> for Message {
    fn from(m: Unclassified) -> Self {
        Self::Unclassified(m)
    }
}

fn split_fields(remainder: &str) -> Vec<&str> {
    if remainder.is_empty() {
        Vec::new()
    } else {
        remainder.split(':').collect()
    }
}

fn required<'a>(
    parts: &[&'a str],
    idx: usize,
    field: &'static str,
) -> Result<&'a str, ProtocolError> {
    parts
        .get(idx)
        .copied()
        .ok_or(ProtocolError::MissingField { field })
}

fn is_bare_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn bool_token(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

fn parse_bool(raw: &str, field: &'static str) -> Result<bool, ProtocolError> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ProtocolError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}
