//! HTTP client implementation

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use crate::errors::ActionError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for webhook delivery
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self, ActionError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("sc-action/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// POST a JSON body, discarding the response body on success
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(), ActionError> {
        // webhook URLs embed credentials, log the host only
        debug!("POST {}", host_of(url));

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ActionError::NotificationError(e.without_url().to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST to {} failed: {} - {}", host_of(url), status, body);
            return Err(ActionError::NotificationError(format!("{}: {}", status, body)));
        }

        Ok(())
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "<invalid url>".to_string())
}
