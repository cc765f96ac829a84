use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::{ApiRequest, FetchError, Method, Transport};
use crate::logging::{log_fetch_error, v_str, ProfileScope};

/// Origin used for relative paths when no API base is configured.
/// The backend serves the dashboard from here in development.
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000";

pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(api_base: &str) -> Result<Self> {
        let base = if api_base.is_empty() {
            Url::parse(DEFAULT_ORIGIN)?
        } else {
            Url::parse(api_base)?
        };
        Ok(Self {
            client: Client::builder().build()?,
            base,
        })
    }

    fn resolve(&self, target: &str) -> Result<Url, url::ParseError> {
        let mut prefix = self.base.path().trim_end_matches('/').to_string();
        prefix.push_str(target);
        self.base.join(&prefix)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: &ApiRequest) -> Result<Value, FetchError> {
        let target = req.target();
        let _scope = ProfileScope::with_context(
            "http_send",
            &[("endpoint", v_str(&target)), ("method", v_str(req.method.as_str()))],
        );
        let transport_err =
            |message: String| FetchError::Transport { path: target.clone(), message };

        let url = self.resolve(&target).map_err(|e| transport_err(e.to_string()))?;
        let builder = match req.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        let builder = builder.header(CONTENT_TYPE, "application/json");
        let builder = match req.body_text() {
            Some(body) => builder.body(body),
            None => builder,
        };

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                log_fetch_error(&target, &e.to_string());
                return Err(transport_err(e.to_string()));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let err = FetchError::Request { status: status.as_u16(), path: target.clone() };
            log_fetch_error(&target, &err.to_string());
            return Err(err);
        }

        let body = resp.text().await.map_err(|e| transport_err(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| {
            log_fetch_error(&target, &e.to_string());
            FetchError::Parse { path: target.clone(), message: e.to_string() }
        })
    }
}
