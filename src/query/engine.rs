//! Streaming query execution over `/query-stream`.
//!
//! A query holds one HTTP connection open for as long as the server keeps
//! sending rows. The body is decoded line by line as chunks arrive; each line
//! is classified by [`parse_frame`] and handed to a [`FrameSink`]. The loop
//! stops when the body ends, when the server reports an error, or when the
//! surrounding task is dropped.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures_util::{pin_mut, Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::{KsqlClient, KsqlError};
use crate::query::frame::{parse_frame, Frame, Line, LineBuffer, QueryHeader};

/// Accept type that selects newline-delimited framing on `/query-stream`.
pub const DELIMITED_MEDIA_TYPE: &str = "application/vnd.ksqlapi.delimited.v1";

const OFFSET_RESET_PROPERTY: &str = "auto.offset.reset";

/// Body of a `/query-stream` request.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub properties: BTreeMap<String, Value>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Reads from the start of the backing topic when `earliest`, otherwise
    /// from its current end.
    pub fn with_offset_reset(self, earliest: bool) -> Self {
        let reset = if earliest { "earliest" } else { "latest" };
        self.with_property(OFFSET_RESET_PROPERTY, reset)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Receiver for decoded frames.
pub(crate) trait FrameSink {
    fn header(&mut self, header: QueryHeader);
    fn row(&mut self, row: Vec<Value>);
    fn error(&mut self, status: u16, body: &str);
}

enum Step {
    Continue,
    Stop,
}

struct DecodeLoop<'a, K> {
    status: StatusCode,
    seen_header: bool,
    reported_error: bool,
    sink: &'a mut K,
}

impl<K: FrameSink> DecodeLoop<'_, K> {
    fn on_line(&mut self, line: Line) -> Step {
        let text = match line {
            Line::Text(text) => text,
            Line::Invalid(bytes) if self.status != StatusCode::OK => {
                String::from_utf8_lossy(&bytes).into_owned()
            }
            Line::Invalid(bytes) => {
                warn!(event = "query_frame_not_utf8", len = bytes.len());
                return Step::Continue;
            }
        };

        if self.status != StatusCode::OK {
            return self.fail(self.status.as_u16(), &text);
        }

        match parse_frame(&text) {
            Frame::Header(header) => {
                self.seen_header = true;
                self.sink.header(header);
            }
            Frame::Row(_) if !self.seen_header => {
                warn!(event = "query_row_before_header", line = %text);
                return self.fail(self.status.as_u16(), &text);
            }
            Frame::Row(row) => self.sink.row(row),
            Frame::Error { status } => {
                let status = status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
                return self.fail(status, &text);
            }
            Frame::Malformed => warn!(event = "query_frame_malformed", line = %text),
        }
        Step::Continue
    }

    fn fail(&mut self, status: u16, body: &str) -> Step {
        self.reported_error = true;
        self.sink.error(status, body);
        Step::Stop
    }
}

/// Decodes a response body into `sink` until it ends or an error frame stops
/// it.
///
/// Only transport failures are returned as errors; protocol problems go to
/// [`FrameSink::error`].
pub(crate) async fn drive<S, E, K>(status: StatusCode, body: S, sink: &mut K) -> Result<(), E>
where
    S: Stream<Item = Result<Bytes, E>>,
    K: FrameSink,
{
    pin_mut!(body);
    let mut lines = LineBuffer::new();
    let mut decode = DecodeLoop {
        status,
        seen_header: false,
        reported_error: false,
        sink,
    };

    'body: while let Some(chunk) = body.next().await {
        lines.extend(&chunk?);
        while let Some(line) = lines.next_line() {
            if let Step::Stop = decode.on_line(line) {
                break 'body;
            }
        }
    }

    if !decode.reported_error {
        if let Some(line) = lines.finish() {
            decode.on_line(line);
        }
    }
    if status != StatusCode::OK && !decode.reported_error {
        decode.fail(status.as_u16(), "");
    }
    Ok(())
}

type InitCallback<'a> = Box<dyn FnMut(&QueryHeader) + Send + 'a>;
type RowCallback<'a> = Box<dyn FnMut(Vec<Value>) + Send + 'a>;
type CloseCallback<'a> = Box<dyn FnOnce() + Send + 'a>;
type ErrorCallback<'a> = Box<dyn FnMut(u16, &str) + Send + 'a>;

/// Optional handlers for [`KsqlClient::run_query`].
///
/// Unset handlers are skipped.
#[derive(Default)]
pub struct QueryCallbacks<'a> {
    on_init: Option<InitCallback<'a>>,
    on_row: Option<RowCallback<'a>>,
    on_close: Option<CloseCallback<'a>>,
    on_error: Option<ErrorCallback<'a>>,
}

impl<'a> QueryCallbacks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every header frame.
    pub fn on_init(mut self, callback: impl FnMut(&QueryHeader) + Send + 'a) -> Self {
        self.on_init = Some(Box::new(callback));
        self
    }

    /// Called for every row, in arrival order.
    pub fn on_row(mut self, callback: impl FnMut(Vec<Value>) + Send + 'a) -> Self {
        self.on_row = Some(Box::new(callback));
        self
    }

    /// Called once after the stream ends, however it ended.
    pub fn on_close(mut self, callback: impl FnOnce() + Send + 'a) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Called with the status and raw line of an in-band error. No further
    /// frames are delivered afterwards.
    pub fn on_error(mut self, callback: impl FnMut(u16, &str) + Send + 'a) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub(crate) async fn consume<S, E>(mut self, status: StatusCode, body: S) -> Result<(), E>
    where
        S: Stream<Item = Result<Bytes, E>>,
    {
        let result = drive(status, body, &mut self).await;
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
        result
    }
}

impl FrameSink for QueryCallbacks<'_> {
    fn header(&mut self, header: QueryHeader) {
        if let Some(on_init) = self.on_init.as_mut() {
            on_init(&header);
        }
    }

    fn row(&mut self, row: Vec<Value>) {
        if let Some(on_row) = self.on_row.as_mut() {
            on_row(row);
        }
    }

    fn error(&mut self, status: u16, body: &str) {
        if let Some(on_error) = self.on_error.as_mut() {
            on_error(status, body);
        }
    }
}

/// Rows of a query gathered in arrival order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl QueryTable {
    /// Column names from the last header frame seen.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, `Null` where a row is shorter than the header.
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let index = self.columns.iter().position(|column| column == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// Rows as JSON objects keyed by column name.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

impl FrameSink for QueryTable {
    fn header(&mut self, header: QueryHeader) {
        self.columns = header.column_names;
    }

    fn row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    fn error(&mut self, status: u16, body: &str) {
        warn!(
            event = "query_stream_error",
            status,
            body,
            rows = self.rows.len()
        );
    }
}

impl KsqlClient {
    /// Runs a query and feeds its frames to `callbacks`.
    ///
    /// `earliest` selects whether the query starts at the beginning of the
    /// backing topic or at its end. Returns once the server ends the stream
    /// or reports an error; push queries keep running until closed.
    pub async fn run_query(
        &self,
        sql: &str,
        earliest: bool,
        callbacks: QueryCallbacks<'_>,
    ) -> Result<(), KsqlError> {
        let request = QueryRequest::new(sql).with_offset_reset(earliest);
        self.run_query_request(&request, callbacks).await
    }

    pub async fn run_query_request(
        &self,
        request: &QueryRequest,
        callbacks: QueryCallbacks<'_>,
    ) -> Result<(), KsqlError> {
        let response = self.open_query(request).await?;
        let status = response.status();
        callbacks
            .consume(status, response.bytes_stream())
            .await
            .map_err(KsqlError::Transport)
    }

    /// Runs a query and collects its rows.
    ///
    /// In-band errors end collection early and are logged; the rows received
    /// up to that point are still returned.
    pub async fn run_query_to_table(
        &self,
        sql: &str,
        earliest: bool,
    ) -> Result<QueryTable, KsqlError> {
        let mut request = QueryRequest::new(sql);
        if earliest {
            request = request.with_offset_reset(true);
        }
        self.query_request_to_table(&request).await
    }

    pub async fn query_request_to_table(
        &self,
        request: &QueryRequest,
    ) -> Result<QueryTable, KsqlError> {
        let response = self.open_query(request).await?;
        let mut table = QueryTable::default();
        drive(response.status(), response.bytes_stream(), &mut table)
            .await
            .map_err(KsqlError::Transport)?;
        Ok(table)
    }

    /// Sends the query and returns the response once headers arrive.
    ///
    /// No request timeout is set; the body may stay open indefinitely.
    pub(crate) async fn open_query(&self, request: &QueryRequest) -> Result<Response, KsqlError> {
        let builder = self
            .streaming_http()
            .post(self.endpoint("/query-stream")?)
            .header(ACCEPT, DELIMITED_MEDIA_TYPE)
            .json(request);
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(KsqlError::Transport)?;
        debug!(
            event = "query_stream_opened",
            status = response.status().as_u16(),
            sql = %request.sql
        );
        Ok(response)
    }
}
