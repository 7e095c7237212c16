use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;

use super::{HttpRequest, Method, Transport};
use crate::{error::Error, response::RestResponse};

/// [`Transport`] backed by a `reqwest` client built on first use.
pub struct HttpTransport {
    timeout: Duration,
    client: OnceCell<reqwest::Client>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::Client, Error> {
        self.client.get_or_try_init(|| {
            reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, base_url: &str, request: &HttpRequest) -> Result<RestResponse, Error> {
        let url = format!("{}/{}", base_url, request.path.trim_start_matches('/'));
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client()?
            .request(method, &url)
            .header(reqwest::header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} {} failed: {}", request.method, url, e)))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response: {}", e)))?;

        Ok(RestResponse {
            status,
            headers,
            body: decode_body(&text),
        })
    }
}

/// Empty bodies decode to `null`; bodies that are not JSON are kept as a string.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(""), Value::Null);
        assert_eq!(decode_body("[1,2]"), json!([1, 2]));
        assert_eq!(decode_body("<html>"), json!("<html>"));
    }
}
