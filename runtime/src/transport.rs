//! Production HTTP transport backed by reqwest
//!
//! Maps reqwest's failure modes into the runtime's error taxonomy so the
//! client's classifier sees uniform [`FaultError`] variants regardless of
//! where the failure originated. Status codes are never errors here; the
//! response is returned as-is and the client decides.

use async_trait::async_trait;
use sisu_core::{FaultError, HttpTransport, Method, TransportRequest, TransportResponse};
use tracing::debug;

/// [`HttpTransport`] implementation over a shared [`reqwest::Client`]
///
/// The underlying client pools connections; construct one transport and
/// share it. Per-request timeouts come from the [`TransportRequest`], not
/// the client builder, so different targets can carry different budgets.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with a fresh connection pool
    pub fn new() -> Result<Self, FaultError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FaultError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client, keeping its pool and middleware
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn map_error(e: reqwest::Error) -> FaultError {
    if e.is_timeout() {
        FaultError::Timeout
    } else if e.is_connect() {
        FaultError::Network(format!("connection failed: {e}"))
    } else {
        FaultError::Network(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, FaultError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url.as_str())
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(map_error)?;

        debug!(
            method = %request.method,
            url = %request.url,
            status,
            body_len = body.len(),
            "http exchange complete"
        );
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
