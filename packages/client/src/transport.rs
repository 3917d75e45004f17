//! HTTP access to the search endpoint.

use std::time::Duration;

use async_trait::async_trait;
use sensor_map_config::ClientConfig;
use sensor_map_search_models::ResultEnvelope;

use crate::ClientError;

/// Issues search requests for a query string.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Fetches the JSON result envelope.
    async fn fetch_features(&self, query: &str) -> Result<ResultEnvelope, ClientError>;

    /// Fetches the CSV export body.
    async fn fetch_csv(&self, query: &str) -> Result<String, ClientError>;
}

/// [`SearchTransport`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Creates a transport for the configured endpoint and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the HTTP client cannot be
    /// built.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.search_endpoint.clone(),
        })
    }

    fn url(&self, query: &str) -> String {
        format!("{}?{query}", self.endpoint)
    }

    async fn get(&self, query: &str, accept: &str) -> Result<String, ClientError> {
        let resp = self
            .client
            .get(self.url(query))
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            // Error responses carry an envelope; fall back to the raw body.
            let message = serde_json::from_str::<ResultEnvelope>(&body)
                .map(|envelope| envelope.msg)
                .unwrap_or(body);
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SearchTransport for HttpTransport {
    async fn fetch_features(&self, query: &str) -> Result<ResultEnvelope, ClientError> {
        let body = self.get(query, "application/json").await?;
        parse_envelope(&body)
    }

    async fn fetch_csv(&self, query: &str) -> Result<String, ClientError> {
        self.get(query, "text/csv").await
    }
}

/// Parses and checks a result envelope.
///
/// # Errors
///
/// Returns [`ClientError::Parse`] for malformed bodies and
/// [`ClientError::Status`] for envelopes reporting a failure.
pub fn parse_envelope(body: &str) -> Result<ResultEnvelope, ClientError> {
    let envelope: ResultEnvelope = serde_json::from_str(body)?;
    if envelope.status >= 400 {
        return Err(ClientError::Status {
            status: envelope.status,
            message: envelope.msg,
        });
    }
    Ok(envelope)
}
