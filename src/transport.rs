use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use thiserror::Error;

use crate::config::ServerConfig;
use crate::messages::LinkStatus;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct SubmitRequest<'a> {
    pub url: &'a str,
    pub api_key: &'a str,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

/// Carries a serialized export to the collector and reports the HTTP status.
#[async_trait]
pub trait Transport: Send + Sync {
    fn link_status(&self) -> LinkStatus;

    async fn submit(&self, request: SubmitRequest<'_>) -> Result<u16, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &ServerConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("beacon-reporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HttpTransport {
            client,
            endpoint: endpoint_label(&config.url),
        })
    }
}

fn endpoint_label(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "collector".to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    fn link_status(&self) -> LinkStatus {
        LinkStatus::Up(self.endpoint.clone())
    }

    async fn submit(&self, request: SubmitRequest<'_>) -> Result<u16, TransportError> {
        debug!("POST {} ({} bytes)", request.url, request.body.len());

        let response = self
            .client
            .post(request.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", request.api_key))
            .timeout(request.timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout(request.timeout)
                } else if err.is_connect() {
                    TransportError::Connect(err.to_string())
                } else {
                    TransportError::Request(err)
                }
            })?;

        Ok(response.status().as_u16())
    }
}
