use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod http;
pub mod stub;

pub use http::HttpTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A fully resolved request: everything that goes on the wire except the base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::Get, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self { method: Method::Post, path: path.into(), query: Vec::new(), body: Some(body) }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Path plus the form-encoded query string, in declared order.
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, qs)
    }

    /// The exact body bytes that would be sent.
    pub fn body_text(&self) -> Option<String> {
        self.body.as_ref().map(|b| b.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FetchError {
    #[error("transport failure on {path}: {message}")]
    Transport { path: String, message: String },
    #[error("API Error: {status} on {path}")]
    Request { status: u16, path: String },
    #[error("malformed JSON from {path}: {message}")]
    Parse { path: String, message: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FetchError::Transport { path, .. }
            | FetchError::Request { path, .. }
            | FetchError::Parse { path, .. } => path,
        }
    }
}

/// One network call per invocation. No retry, no caching.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: &ApiRequest) -> Result<Value, FetchError>;
}
