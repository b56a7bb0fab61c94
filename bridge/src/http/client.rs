//! HTTP transport

use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use reqwest::{header, Client};
use tracing::debug;

use crate::errors::BridgeError;

/// Request body encodings used by the cloud
#[derive(Debug, Clone)]
pub enum Body {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// An outbound request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub body: Option<Body>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            bearer: None,
            body: None,
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    pub fn query(mut self, query: &[(&str, &str)]) -> Self {
        self.query
            .extend(query.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub fn form(mut self, form: &[(&str, &str)]) -> Self {
        self.body = Some(Body::Form(
            form.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        self
    }
}

/// A raw response; the status is not interpreted here
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport trait for testability
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request. Only failures to get any response are errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BridgeError>;
}

/// reqwest-backed transport
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client with connect and total timeouts
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(concat!("stbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BridgeError> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(header::ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::Form(form)) => builder.form(&form),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            let endpoint = endpoint_of(&request.url);
            if e.is_timeout() {
                BridgeError::transient(&endpoint, None, "request timed out")
            } else {
                BridgeError::transient(&endpoint, None, e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::transient(&endpoint_of(&request.url), Some(status), e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

/// Path of a URL for error context, the URL itself if unparsable
pub fn endpoint_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}
