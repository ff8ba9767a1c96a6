//! Metadata records returned by the ksqlDB control endpoints.
//!
//! Records are decoded in two phases: the response body is parsed into a
//! generic [`serde_json::Value`] first, then each record projects the keys it
//! knows about. Missing or mistyped fields fall back to empty values, so a
//! record never fails to build from a well-formed JSON object.

use std::{fmt, io};

use serde::{ser, Serialize};
use serde_json::ser::Formatter;
use serde_json::Value;

/// Information reported by the `/info` endpoint.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ServerInfo {
    /// Kafka cluster id backing the engine.
    pub id: String,
    /// Base URL of the server that produced this record.
    pub server: String,
    /// ksqlDB service id.
    pub service_id: String,
    /// Reported server status, e.g. `RUNNING`.
    pub status: String,
    /// Engine version string.
    pub version: String,
}

impl ServerInfo {
    /// Builds server info from an `/info` payload.
    ///
    /// Accepts both the wrapped `{"KsqlServerInfo": {...}}` shape and a flat
    /// object carrying the fields directly.
    pub fn from_json(payload: &Value, server: &str) -> Self {
        let fields = payload.get("KsqlServerInfo").unwrap_or(payload);
        Self {
            id: str_field(fields, "kafkaClusterId"),
            server: server.to_string(),
            service_id: str_field(fields, "ksqlServiceId"),
            status: str_field(fields, "serverStatus"),
            version: str_field(fields, "version"),
        }
    }
}

/// A stream declared in the engine.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    /// Backing Kafka topic.
    pub topic: String,
    pub key_format: String,
    pub value_format: String,
}

impl StreamInfo {
    pub fn from_json(value: &Value) -> Self {
        Self {
            name: str_field(value, "name"),
            topic: str_field(value, "topic"),
            key_format: str_field(value, "keyFormat"),
            value_format: str_field(value, "valueFormat"),
        }
    }
}

/// A table declared in the engine.
///
/// Same fields as [`StreamInfo`]; kept separate so the two kinds of relation
/// cannot be mixed up by callers.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    /// Backing Kafka topic.
    pub topic: String,
    pub key_format: String,
    pub value_format: String,
}

impl TableInfo {
    pub fn from_json(value: &Value) -> Self {
        Self {
            name: str_field(value, "name"),
            topic: str_field(value, "topic"),
            key_format: str_field(value, "keyFormat"),
            value_format: str_field(value, "valueFormat"),
        }
    }
}

/// A Kafka topic visible to the engine.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TopicInfo {
    pub name: String,
}

impl TopicInfo {
    pub fn from_json(value: &Value) -> Self {
        Self {
            name: str_field(value, "name"),
        }
    }
}

/// A persistent query registered in the engine.
///
/// This is metadata only; rows of a live query are read through
/// [`crate::query`].
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct QueryInfo {
    pub id: String,
    /// Topics the query writes to.
    pub topics: Vec<String>,
    /// `PERSISTENT`, `PUSH` or `PULL`.
    pub query_type: String,
    pub state: String,
}

impl QueryInfo {
    pub fn from_json(value: &Value) -> Self {
        let topics = match value.get("sinkKafkaTopics") {
            Some(Value::Array(_)) => str_list_field(value, "sinkKafkaTopics"),
            _ => str_list_field(value, "sinks"),
        };
        Self {
            id: str_field(value, "id"),
            topics,
            query_type: str_field(value, "queryType"),
            state: str_field(value, "state"),
        }
    }
}

macro_rules! display_as_json {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    let text = to_spaced_json(self).map_err(|_| fmt::Error)?;
                    f.write_str(&text)
                }
            }
        )+
    };
}

display_as_json!(ServerInfo, StreamInfo, TableInfo, TopicInfo, QueryInfo);

/// Single-line JSON with a space after every `,` and `:`.
pub(crate) fn to_spaced_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(out).map_err(<serde_json::Error as ser::Error>::custom)
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Extracts `statement_response[0][key]` from a `/ksql` response and projects
/// each element with `decode`.
///
/// A missing key or non-array value yields an empty list.
pub(crate) fn decode_statement_list<T>(
    response: &[Value],
    key: &str,
    decode: impl Fn(&Value) -> T,
) -> Vec<T> {
    response
        .first()
        .and_then(|first| first.get(key))
        .and_then(Value::as_array)
        .map(|items| items.iter().map(decode).collect())
        .unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn str_list_field(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
