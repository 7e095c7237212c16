mod command;
mod retry;

pub use command::Command;
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    adapters::{HttpRequest, Method, Transport, http::HttpTransport},
    auth::Auth,
    config::ConnectionConfig,
    error::{Error, HttpError, HttpErrorKind},
    query::{Params, Query, RequestBuilder, RequestDescriptor},
    response::RestResponse,
};

/// Handle on one REST backend: configuration, credentials, transport and
/// retry policy.
///
/// Every request returns its own [`RestResponse`]. The connection also keeps
/// the most recent one in a single slot for callers that want to inspect it
/// afterwards; with several requests in flight that slot holds whichever
/// finished last.
pub struct Connection {
    config: ConnectionConfig,
    auth: Auth,
    transport: Arc<dyn Transport>,
    last_response: Mutex<Option<RestResponse>>,
    cancellation: CancellationToken,
}

impl Connection {
    pub fn new(config: ConnectionConfig, transport: impl Transport) -> Result<Self, Error> {
        Ok(Self {
            config: config.validate()?,
            auth: Auth::None,
            transport: Arc::new(transport),
            last_response: Mutex::new(None),
            cancellation: CancellationToken::new(),
        })
    }

    /// Connection over HTTP using the configured timeout.
    pub fn http(config: ConnectionConfig) -> Result<Self, Error> {
        let transport = HttpTransport::new(config.timeout());
        Self::new(config, transport)
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Token whose cancellation aborts pending retry waits.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn query_builder(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(&self.config, &self.auth)
    }

    pub fn last_response(&self) -> Option<RestResponse> {
        self.last_response.lock().clone()
    }

    /// Compiles `query` and wraps the result in a [`Command`].
    pub fn create_command(&self, query: &Query, params: &Params) -> Result<Command<'_>, Error> {
        let descriptor = self.query_builder().build(query, params)?;
        Ok(Command::new(self, descriptor, query.schema()))
    }

    pub fn command(&self, descriptor: RequestDescriptor) -> Command<'_> {
        Command::new(self, descriptor, None)
    }

    pub async fn get(&self, path: &str, query: Vec<(String, String)>) -> Result<RestResponse, Error> {
        self.execute(HttpRequest::new(Method::Get, path).with_query(query))
            .await
    }

    pub async fn head(&self, path: &str, query: Vec<(String, String)>) -> Result<RestResponse, Error> {
        self.execute(HttpRequest::new(Method::Head, path).with_query(query))
            .await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<RestResponse, Error> {
        self.execute(HttpRequest::new(Method::Post, path).with_body(body))
            .await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<RestResponse, Error> {
        self.execute(HttpRequest::new(Method::Put, path).with_body(body))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<RestResponse, Error> {
        self.execute(HttpRequest::new(Method::Delete, path)).await
    }

    /// Sends `request`, retrying retryable HTTP failures as the policy allows.
    /// Credentials are attached here unless the request already carries an
    /// `Authorization` header.
    pub async fn execute(&self, request: HttpRequest) -> Result<RestResponse, Error> {
        let mut request = request;
        if request.header("authorization").is_none() {
            request = request.with_headers(self.query_builder().build_headers());
        }

        let start = Instant::now();
        let mut retries = 0;
        let mut waited = Duration::ZERO;
        *self.last_response.lock() = None;

        loop {
            if self.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let outcome = self
                .transport
                .send(&self.config.base_url, &request)
                .await
                .and_then(check_status);

            match outcome {
                Ok(response) => {
                    histogram!("restar.request.duration_ms",
                        "method" => request.method.as_str()
                    )
                    .record(start.elapsed().as_millis() as f64);
                    debug!(
                        method = %request.method,
                        path = %request.path,
                        status = response.status,
                        retries = retries,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "REST request completed"
                    );
                    *self.last_response.lock() = Some(response.clone());
                    return Ok(response);
                }
                Err(error) => {
                    if let Some(http) = error.as_http() {
                        *self.last_response.lock() = Some(http.response.clone());
                    }
                    let Some(wait) = self.config.retry.next_wait(&error, retries, waited) else {
                        debug!(
                            method = %request.method,
                            path = %request.path,
                            retries = retries,
                            error = %error,
                            "REST request failed"
                        );
                        return Err(error);
                    };

                    retries += 1;
                    waited += wait;
                    let kind = error.as_http().map(|http| http.kind.as_str()).unwrap_or("other");
                    counter!("restar.request.retries", "kind" => kind).increment(1);
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        attempt = retries,
                        error = %error,
                        retry_in_ms = wait.as_millis() as u64,
                        "REST request failed, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.cancellation.cancelled() => return Err(Error::Cancelled),
                    }
                }
            }
        }
    }
}

fn check_status(response: RestResponse) -> Result<RestResponse, Error> {
    match HttpErrorKind::from_status(response.status) {
        None => Ok(response),
        Some(kind) => Err(HttpError::new(kind, response).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryTransport;
    use serde_json::json;

    fn connection(transport: &MemoryTransport) -> Connection {
        Connection::new(ConnectionConfig::new("https://api.example.com/"), transport.clone()).unwrap()
    }

    #[test]
    fn test_rejects_empty_base_url() {
        let result = Connection::new(ConnectionConfig::default(), MemoryTransport::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_status_is_classified() {
        let transport = MemoryTransport::new();
        transport.enqueue(RestResponse::new(422).with_body(json!([{"field": "name"}])));
        let conn = connection(&transport);

        let err = conn.get("posts", vec![]).await.unwrap_err();
        let http = err.as_http().unwrap();
        assert_eq!(http.kind, HttpErrorKind::DataValidation);
        assert_eq!(http.response.body, json!([{"field": "name"}]));
        assert_eq!(conn.last_response().map(|r| r.status), Some(422));
    }

    #[tokio::test]
    async fn test_auth_header_is_attached() {
        let transport = MemoryTransport::new();
        transport.serve("posts", vec![]);
        let conn = connection(&transport).with_auth(Auth::bearer("secret"));

        conn.get("posts", vec![]).await.unwrap();
        assert_eq!(
            transport.requests()[0].header("Authorization"),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn test_retries_are_off_by_default() {
        let transport = MemoryTransport::new();
        transport.serve("posts", vec![]);
        transport.enqueue(RestResponse::new(503));
        let conn = connection(&transport);

        assert!(conn.get("posts", vec![]).await.is_err());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_retry_wait() {
        let transport = MemoryTransport::new();
        transport.enqueue(RestResponse::new(503));
        let token = CancellationToken::new();
        let conn = Connection::new(
            ConnectionConfig::new("https://api.example.com")
                .with_retry(RetryPolicy::enabled().with_max_retries(3)),
            transport.clone(),
        )
        .unwrap()
        .with_cancellation(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let err = conn.get("posts", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(transport.request_count(), 1);

        // a cancelled connection refuses further requests
        assert!(matches!(conn.get("posts", vec![]).await, Err(Error::Cancelled)));
        assert_eq!(transport.request_count(), 1);
    }
}
