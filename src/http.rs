use crate::error::SinkError;
use crate::remote::{LogServiceClient, RemoteConfig, RemoteLogRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// [`LogServiceClient`] speaking JSON over HTTP to `{base}/v1/logs`.
///
/// `connect` opens the first connection into the `reqwest` pool, which
/// keeps it alive between calls; a failed request does not drop it.
#[derive(Clone)]
pub struct HttpLogServiceClient {
    client: Client,
    base: Url,
    endpoint: Url,
    token: Option<String>,
}

impl HttpLogServiceClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, SinkError> {
        let mut base = Url::parse(&config.url)
            .map_err(|e| SinkError::Transport(format!("invalid logging service url `{}`: {e}", config.url)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("v1/logs")
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let client = Client::builder()
            .connect_timeout(config.backoff.min_connect_timeout)
            .timeout(config.call_timeout)
            .pool_idle_timeout(None::<Duration>)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        Ok(HttpLogServiceClient {
            client,
            base,
            endpoint,
            token: config.token.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl LogServiceClient for HttpLogServiceClient {
    /// Open a pooled connection with a `HEAD` on the base URL. Any HTTP
    /// response counts as reachable.
    async fn connect(&self, timeout: Duration) -> Result<(), SinkError> {
        let mut req = self.client.head(self.base.clone()).timeout(timeout);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req.send().await.map(|_| ()).map_err(|e| classify(e, timeout))
    }

    async fn write_log(&self, request: &RemoteLogRequest, timeout: Duration) -> Result<(), SinkError> {
        let mut req = self.client.post(self.endpoint.clone()).timeout(timeout).json(request);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| classify(e, timeout))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SinkError::Unauthenticated);
        }
        let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> SinkError {
    if e.is_timeout() {
        SinkError::Timeout(timeout)
    } else if e.is_connect() {
        SinkError::Unavailable(e.to_string())
    } else {
        SinkError::Transport(e.to_string())
    }
}
