//! HTTP client for the ksqlDB REST API.
//!
//! Request/response calls (`/info`, `/ksql`, `/inserts-stream`,
//! `/close-query`) live here. Streaming queries are implemented in
//! [`crate::query`] on top of the same [`KsqlClient`].

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::{
    decode_statement_list, to_spaced_json, QueryInfo, ServerInfo, StreamInfo, TableInfo,
    TopicInfo,
};

/// Media type used by the ksqlDB REST API.
pub const KSQL_MEDIA_TYPE: &str = "application/vnd.ksql.v1+json";
/// Default listener address of a local ksqlDB server.
pub const LOCAL_KSQL_SERVER: &str = "http://localhost:8088";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KsqlDefaults;

impl KsqlDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

#[derive(Clone, Debug)]
pub struct KsqlClientOptions {
    /// Applies to every connection, including streaming queries.
    pub connect_timeout: Duration,
    /// Applies to request/response calls only. Streaming queries never time
    /// out on the client side.
    pub request_timeout: Duration,
}

impl Default for KsqlClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: KsqlDefaults::CONNECT_TIMEOUT,
            request_timeout: KsqlDefaults::REQUEST_TIMEOUT,
        }
    }
}

#[derive(Clone)]
struct BasicAuth {
    user: String,
    password: SecretString,
}

/// Client bound to one ksqlDB server.
///
/// Holds no per-call state; clones share the underlying connection pools and
/// may be used from many tasks at once.
#[derive(Clone)]
pub struct KsqlClient {
    http: Client,
    inserts_http: Client,
    base_url: Url,
    server: String,
    request_timeout: Duration,
    auth: Option<BasicAuth>,
}

impl KsqlClient {
    pub fn new(server: impl AsRef<str>) -> Result<Self, KsqlError> {
        Self::with_options(server, KsqlClientOptions::default())
    }

    pub fn with_options(
        server: impl AsRef<str>,
        options: KsqlClientOptions,
    ) -> Result<Self, KsqlError> {
        let server = server.as_ref().trim().to_string();
        let base_url = Url::parse(&server)
            .map_err(|err| KsqlError::InvalidBaseUrl(format!("{server}: {err}")))?;

        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(KsqlError::Transport)?;
        // `/inserts-stream` only accepts HTTP/2.
        let inserts_http = Client::builder()
            .http2_prior_knowledge()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(KsqlError::Transport)?;

        Ok(Self {
            http,
            inserts_http,
            base_url,
            server,
            request_timeout: options.request_timeout,
            auth: None,
        })
    }

    /// Sends HTTP basic credentials with every request.
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: SecretString) -> Self {
        self.auth = Some(BasicAuth {
            user: user.into(),
            password,
        });
        self
    }

    /// Server address this client was built with.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Returns server, cluster and version information.
    pub async fn info(&self) -> Result<ServerInfo, KsqlError> {
        let request = self
            .http
            .get(self.endpoint("/info")?)
            .header(ACCEPT, KSQL_MEDIA_TYPE)
            .timeout(self.request_timeout);
        let body = self.send_checked(request).await?;
        let payload: Value = serde_json::from_str(&body)?;
        Ok(ServerInfo::from_json(&payload, &self.server))
    }

    /// Runs a statement against `/ksql` and returns the decoded response
    /// entities.
    pub async fn execute_statement(&self, statement: &str) -> Result<Vec<Value>, KsqlError> {
        let request = self
            .http
            .post(self.endpoint("/ksql")?)
            .header(ACCEPT, KSQL_MEDIA_TYPE)
            .timeout(self.request_timeout)
            .json(&json!({
                "ksql": statement,
                "streamsProperties": {},
            }));
        let body = self.send_checked(request).await?;
        match serde_json::from_str(&body)? {
            Value::Array(entities) => Ok(entities),
            other => Err(KsqlError::Parse(format!(
                "expected statement response array, got {other}"
            ))),
        }
    }

    pub async fn list_streams(&self) -> Result<Vec<StreamInfo>, KsqlError> {
        let response = self.execute_statement("LIST STREAMS;").await?;
        Ok(decode_statement_list(&response, "streams", StreamInfo::from_json))
    }

    pub async fn list_tables(&self) -> Result<Vec<TableInfo>, KsqlError> {
        let response = self.execute_statement("LIST TABLES;").await?;
        Ok(decode_statement_list(&response, "tables", TableInfo::from_json))
    }

    pub async fn list_topics(&self) -> Result<Vec<TopicInfo>, KsqlError> {
        let response = self.execute_statement("LIST TOPICS;").await?;
        Ok(decode_statement_list(&response, "topics", TopicInfo::from_json))
    }

    pub async fn list_queries(&self) -> Result<Vec<QueryInfo>, KsqlError> {
        let response = self.execute_statement("LIST QUERIES;").await?;
        Ok(decode_statement_list(&response, "queries", QueryInfo::from_json))
    }

    /// Inserts rows into `stream` with a single `/inserts-stream` request.
    ///
    /// Returns one acknowledgement per row, in row order. Fails if the server
    /// rejects any row.
    pub async fn insert_into_stream<T: Serialize>(
        &self,
        stream: &str,
        rows: &[T],
    ) -> Result<Vec<Value>, KsqlError> {
        let body = insert_body(stream, rows)?;
        let request = self
            .inserts_http
            .post(self.endpoint("/inserts-stream")?)
            .header(CONTENT_TYPE, KSQL_MEDIA_TYPE)
            .timeout(self.request_timeout)
            .body(body);
        let response = self.send_checked(request).await?;

        let acks = response
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(rejected) = acks.iter().find(|ack| is_rejected(ack)) {
            return Err(KsqlError::InsertRejected {
                seq: rejected.get("seq").and_then(Value::as_u64),
                error_code: rejected.get("error_code").and_then(Value::as_u64),
                message: rejected
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(acks)
    }

    /// Asks the server to terminate a push query.
    ///
    /// Best effort: failures are logged and otherwise ignored. This does not
    /// stop a local decode loop reading the same query.
    pub async fn close_query(&self, query_id: &str) {
        let endpoint = match self.endpoint("/close-query") {
            Ok(endpoint) => endpoint,
            Err(err) => {
                debug!(event = "close_query_failed", query_id, error = %err);
                return;
            }
        };
        let request = self
            .http
            .post(endpoint)
            .header(ACCEPT, KSQL_MEDIA_TYPE)
            .timeout(self.request_timeout)
            .json(&json!({ "queryId": query_id }));

        match self.authorize(request).send().await {
            Ok(response) if !response.status().is_success() => {
                debug!(
                    event = "close_query_rejected",
                    query_id,
                    status = response.status().as_u16()
                );
            }
            Ok(_) => debug!(event = "close_query_sent", query_id),
            Err(err) => debug!(event = "close_query_failed", query_id, error = %err),
        }
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, KsqlError> {
        self.base_url
            .join(path)
            .map_err(|err| KsqlError::InvalidBaseUrl(format!("{}{path}: {err}", self.server)))
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth.as_ref() {
            Some(auth) => request.basic_auth(&auth.user, Some(auth.password.expose_secret())),
            None => request,
        }
    }

    pub(crate) fn streaming_http(&self) -> &Client {
        &self.http
    }

    async fn send_checked(&self, request: RequestBuilder) -> Result<String, KsqlError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(KsqlError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(KsqlError::Transport)?;

        if !status.is_success() {
            return Err(KsqlError::HttpStatus { status, body });
        }
        Ok(body)
    }
}

/// Builds the newline-delimited `/inserts-stream` body: a target line followed
/// by one line per row.
pub(crate) fn insert_body<T: Serialize>(stream: &str, rows: &[T]) -> Result<String, KsqlError> {
    let mut body = to_spaced_json(&json!({ "target": stream }))?;
    body.push('\n');
    for row in rows {
        body.push_str(&to_spaced_json(row)?);
        body.push('\n');
    }
    Ok(body)
}

fn is_rejected(ack: &Value) -> bool {
    ack.get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| status.eq_ignore_ascii_case("error"))
}

#[derive(Debug, Error)]
pub enum KsqlError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("insert rejected at seq {seq:?} (code {error_code:?}): {message}")]
    InsertRejected {
        seq: Option<u64>,
        error_code: Option<u64>,
        message: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("invalid server url {0}")]
    InvalidBaseUrl(String),

    #[error("query task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl KsqlError {
    /// HTTP status of a rejected request, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{insert_body, is_rejected, KsqlClient, KsqlError};

    #[test]
    fn insert_body_is_newline_delimited() {
        let body = insert_body("s", &[json!({"a": 1}), json!({"a": 2})]).expect("body");
        assert_eq!(body, "{\"target\": \"s\"}\n{\"a\": 1}\n{\"a\": 2}\n");
    }

    #[test]
    fn insert_body_without_rows_only_names_target() {
        let rows: [serde_json::Value; 0] = [];
        assert_eq!(
            insert_body("PAGEVIEWS", &rows).expect("body"),
            "{\"target\": \"PAGEVIEWS\"}\n"
        );
    }

    #[test]
    fn insert_body_spaces_nested_rows() {
        let rows = [json!({"id": "u1", "tags": ["a", "b"], "geo": {"lat": 1.5}})];
        assert_eq!(
            insert_body("USERS", &rows).expect("body"),
            "{\"target\": \"USERS\"}\n{\"geo\": {\"lat\": 1.5}, \"id\": \"u1\", \"tags\": [\"a\", \"b\"]}\n"
        );
    }

    #[test]
    fn error_acks_are_detected() {
        assert!(is_rejected(&json!({"status": "error", "seq": 1})));
        assert!(!is_rejected(&json!({"status": "ok", "seq": 0})));
        assert!(!is_rejected(&json!({"seq": 0})));
    }

    #[test]
    fn endpoints_replace_base_path() {
        let client = KsqlClient::new(" http://localhost:8088/ignored \n").expect("client");
        assert_eq!(client.server(), "http://localhost:8088/ignored");
        assert_eq!(
            client.endpoint("/ksql").expect("endpoint").as_str(),
            "http://localhost:8088/ksql"
        );
    }

    #[test]
    fn invalid_server_url_is_rejected() {
        let error = KsqlClient::new("not a url").err().expect("should fail");
        assert!(matches!(error, KsqlError::InvalidBaseUrl(_)));
    }
}
