//! Frame decoding for `/query-stream` response bodies.
//!
//! The body is a sequence of newline-delimited JSON values. The first value is
//! an object describing the result columns; every later value is an array
//! holding one row. There is no explicit type tag, so frames are told apart by
//! their JSON shape.

use bytes::{Buf, BytesMut};
use serde_json::{Map, Value};

/// Metadata frame sent before any row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryHeader {
    /// Server-assigned id, present for push queries.
    pub query_id: Option<String>,
    /// Result column names, in row order.
    pub column_names: Vec<String>,
    /// Result column SQL types, in row order.
    pub column_types: Vec<String>,
    /// The complete header object as sent by the server.
    pub raw: Map<String, Value>,
}

impl QueryHeader {
    fn from_object(raw: Map<String, Value>) -> Self {
        Self {
            query_id: raw
                .get("queryId")
                .and_then(Value::as_str)
                .map(str::to_string),
            column_names: string_list(raw.get("columnNames")),
            column_types: string_list(raw.get("columnTypes")),
            raw,
        }
    }
}

/// One decoded line of a query response.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Column metadata.
    Header(QueryHeader),
    /// Row values, positionally matching the header columns.
    Row(Vec<Value>),
    /// Error object emitted by the engine after the stream started.
    Error {
        /// HTTP-equivalent status derived from the error code.
        status: Option<u16>,
    },
    /// Line that is not JSON, or a JSON scalar.
    Malformed,
}

/// Classifies a single non-empty line.
pub fn parse_frame(line: &str) -> Frame {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Array(values)) => Frame::Row(values),
        Ok(Value::Object(object)) if is_error_object(&object) => Frame::Error {
            status: error_status(&object),
        },
        Ok(Value::Object(object)) => Frame::Header(QueryHeader::from_object(object)),
        Ok(_) | Err(_) => Frame::Malformed,
    }
}

fn is_error_object(object: &Map<String, Value>) -> bool {
    let tagged_error = object
        .get("@type")
        .and_then(Value::as_str)
        .is_some_and(|tag| tag.ends_with("error"));
    tagged_error || object.contains_key("error_code")
}

/// ksqlDB error codes are the HTTP status followed by two digits
/// (`50000` is a 500). Shorter codes are taken as the status itself.
fn error_status(object: &Map<String, Value>) -> Option<u16> {
    let code = object.get("error_code").and_then(Value::as_u64)?;
    let status = if code >= 10_000 { code / 100 } else { code };
    u16::try_from(status).ok()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Reassembles lines from arbitrarily split body chunks.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters split
/// across chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
    /// Prefix of `pending` already known to hold no `\n`.
    scanned: usize,
}

/// A complete line taken from a [`LineBuffer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Line bytes that are not valid UTF-8.
    Invalid(Vec<u8>),
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a body chunk.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Returns the next complete, non-blank line.
    pub fn next_line(&mut self) -> Option<Line> {
        while let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let raw = self.pending.split_to(self.scanned + offset);
            self.pending.advance(1);
            self.scanned = 0;
            if let Some(line) = decode_line(&raw) {
                return Some(line);
            }
        }
        self.scanned = self.pending.len();
        None
    }

    /// Drains the unterminated tail once the body has ended.
    pub fn finish(&mut self) -> Option<Line> {
        let raw = self.pending.split();
        self.scanned = 0;
        decode_line(&raw)
    }
}

fn decode_line(raw: &[u8]) -> Option<Line> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => Some(Line::Text(text.trim().to_string())),
        Err(_) => Some(Line::Invalid(raw.to_vec())),
    }
}
