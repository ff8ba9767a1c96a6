//! Channel-based consumption of a running query.
//!
//! [`KsqlClient::subscribe`] opens the query, then moves the response into a
//! background task that decodes frames and forwards them as [`QueryEvent`]s.
//! The task owns the connection; aborting it drops the response and closes the
//! socket.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::{KsqlClient, KsqlError};
use crate::query::engine::{drive, FrameSink, QueryRequest};
use crate::query::frame::QueryHeader;

/// Frame delivered by a [`QuerySubscription`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryEvent {
    Header(QueryHeader),
    Row(Vec<Value>),
    /// In-band error; it is always the last event.
    Error {
        status: u16,
        body: String,
    },
}

/// Handle to a query decoded on a background task.
///
/// Dropping the handle cancels the query locally. Use
/// [`KsqlClient::close_query`] as well to release it on the server.
#[derive(Debug)]
pub struct QuerySubscription {
    events: mpsc::UnboundedReceiver<QueryEvent>,
    task: Option<JoinHandle<Result<(), KsqlError>>>,
}

impl QuerySubscription {
    /// Receives the next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<QueryEvent> {
        self.events.recv().await
    }

    /// Stops decoding and drops the connection.
    pub fn cancel(&self) {
        if let Some(task) = self.task.as_ref() {
            task.abort();
        }
    }

    /// Waits for the decode task and returns its transport result.
    ///
    /// A cancelled subscription finishes with `Ok(())`.
    pub async fn join(mut self) -> Result<(), KsqlError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(KsqlError::Task(err)),
        }
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct ChannelSink {
    events: mpsc::UnboundedSender<QueryEvent>,
}

impl FrameSink for ChannelSink {
    fn header(&mut self, header: QueryHeader) {
        let _ = self.events.send(QueryEvent::Header(header));
    }

    fn row(&mut self, row: Vec<Value>) {
        let _ = self.events.send(QueryEvent::Row(row));
    }

    fn error(&mut self, status: u16, body: &str) {
        let _ = self.events.send(QueryEvent::Error {
            status,
            body: body.to_string(),
        });
    }
}

impl KsqlClient {
    /// Starts a query on a background task.
    ///
    /// Connection and request errors are returned here; everything after the
    /// response headers arrives through the subscription.
    pub async fn subscribe(&self, request: &QueryRequest) -> Result<QuerySubscription, KsqlError> {
        let response = self.open_query(request).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let status = response.status();
            let mut sink = ChannelSink { events: events_tx };
            let result = drive(status, response.bytes_stream(), &mut sink)
                .await
                .map_err(KsqlError::Transport);
            debug!(event = "query_stream_closed", ok = result.is_ok());
            result
        });

        Ok(QuerySubscription {
            events: events_rx,
            task: Some(task),
        })
    }
}
