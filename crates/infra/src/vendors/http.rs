//! HTTP vendor clients (`POST {base_url}/fetch-data`).

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use fulfill_core::Document;

use super::{AsyncSubmission, AsyncVendor, SyncResponse, SyncVendor, VendorError};

/// Shared reqwest client bound to one vendor base URL.
#[derive(Debug, Clone)]
pub struct HttpVendorClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpVendorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, timeout)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/fetch-data", self.base_url)
    }

    async fn post_fetch_data<T: DeserializeOwned>(&self, payload: &Document) -> Result<T, VendorError> {
        let url = self.endpoint();
        debug!(%url, "calling vendor");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VendorError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| match self.map_reqwest_error(e) {
                VendorError::Transport(msg) => VendorError::Decode(msg),
                other => other,
            })
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> VendorError {
        if err.is_timeout() {
            VendorError::Timeout(self.timeout.as_millis() as u64)
        } else {
            VendorError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSyncVendor {
    client: HttpVendorClient,
}

impl HttpSyncVendor {
    pub fn new(client: HttpVendorClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SyncVendor for HttpSyncVendor {
    async fn fetch(&self, payload: &Document) -> Result<SyncResponse, VendorError> {
        self.client.post_fetch_data(payload).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpAsyncVendor {
    client: HttpVendorClient,
}

impl HttpAsyncVendor {
    pub fn new(client: HttpVendorClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AsyncVendor for HttpAsyncVendor {
    async fn submit(&self, payload: &Document) -> Result<AsyncSubmission, VendorError> {
        self.client.post_fetch_data(payload).await
    }
}
