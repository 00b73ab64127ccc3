//! HTTP transport abstraction
//!
//! The fetch client only needs authenticated GETs, so the transport
//! seam is a single-method trait. Production uses reqwest; tests script
//! responses without a network.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Transport-level errors, before any HTTP status interpretation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether retrying the same request could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }
}

/// A decoded HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value matching `name`, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Authenticated GET capability used by the fetch client
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` with the given query parameters
    async fn get(&self, url: &str, params: &[(&str, String)])
        -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by reqwest.
///
/// The API key rides on every request as an `x-api-key` header.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut key_value = reqwest::header::HeaderValue::from_str(api_key)
            .map_err(|e| TransportError::Other(format!("Invalid API key header: {}", e)))?;
        key_value.set_sensitive(true);
        headers.insert("x-api-key", key_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("logcache/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Other(format!("Client build failed: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(test)]
pub mod script {
    //! Scripted transport for tests: canned responses in order, with
    //! every request recorded for assertion.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub url: String,
        pub params: Vec<(String, String)>,
    }

    pub enum Scripted {
        Respond(HttpResponse),
        Fail(TransportError),
    }

    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_response(&self, response: HttpResponse) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Scripted::Respond(response));
        }

        pub fn push_error(&self, err: TransportError) {
            self.responses.lock().unwrap().push_back(Scripted::Fail(err));
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    /// 200 response with a JSON body and no headers
    pub fn ok_json(body: serde_json::Value) -> HttpResponse {
        with_status(200, body)
    }

    pub fn with_status(status: u16, body: serde_json::Value) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn with_headers(
        status: u16,
        headers: &[(&str, &str)],
        body: serde_json::Value,
    ) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(
            &self,
            url: &str,
            params: &[(&str, String)],
        ) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                url: url.to_string(),
                params: params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            });

            match self.responses.lock().unwrap().pop_front() {
                Some(Scripted::Respond(response)) => Ok(response),
                Some(Scripted::Fail(err)) => Err(err),
                None => Err(TransportError::Other(format!(
                    "Scripted transport exhausted at {}",
                    url
                ))),
            }
        }
    }
}
