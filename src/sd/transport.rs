//! Endpoint-agnostic HTTP primitive.
//!
//! A `Transport` sends one request and reports success (status + body) or a
//! `TransportError`. It knows nothing about fallback paths; the resolver and
//! the orchestrator decide what to retry.
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::ServerConfig;
use crate::error::{excerpt, AppError, AppResult, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        HttpRequest { method: Method::Get, url: url.into(), headers: Vec::new(), body: None }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        HttpRequest { method: Method::Post, url: url.into(), headers: Vec::new(), body: Some(body) }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// Structural check that the body looks like a JSON array or object,
    /// done before any full decode.
    pub fn looks_like_json(&self) -> bool {
        matches!(self.body.trim_start().chars().next(), Some('[') | Some('{'))
    }

    /// Sniff, then decode the body into `T`. Both failures are `InvalidResponse`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> AppResult<T> {
        if !self.looks_like_json() {
            return Err(AppError::InvalidResponse(format!(
                "expected a JSON document, got: {}",
                excerpt(&self.body)
            )));
        }
        serde_json::from_str(&self.body).map_err(|e| {
            AppError::InvalidResponse(format!("{} (body: {})", e, excerpt(&self.body)))
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub type SharedTransport = Arc<dyn Transport>;

/// reqwest-backed transport. Adds the Basic-Auth header to every request
/// when the server config enables auth.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    credentials: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(server: &ServerConfig) -> AppResult<Self> {
        let client = Client::builder().timeout(server.timeout).build()?;
        Self::with_client(client, server)
    }

    /// Use a custom `reqwest::Client` (pooling, TLS, proxies).
    pub fn with_client(client: Client, server: &ServerConfig) -> AppResult<Self> {
        let credentials = server
            .credentials()?
            .map(|(user, pass)| (user.to_string(), pass.to_string()));
        Ok(HttpTransport { client, credentials })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if let Some((user, pass)) = &self.credentials {
            builder = builder.basic_auth(user, Some(pass));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = ?request.method, url = %request.url, "sending request");
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        if status.is_success() {
            Ok(HttpResponse { status: status.as_u16(), body })
        } else {
            tracing::warn!(url = %request.url, status = status.as_u16(), "request failed");
            Err(TransportError::Protocol { status: status.as_u16(), body: excerpt(&body) })
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}
