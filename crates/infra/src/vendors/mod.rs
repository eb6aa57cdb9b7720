//! Backend ("vendor") capabilities.
//!
//! Two completion models sit behind these traits:
//! - [`SyncVendor`]: answers the request within a single call
//! - [`AsyncVendor`]: only acknowledges acceptance and hands back a correlation
//!   id; the outcome arrives later through the vendor webhook

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fulfill_core::Document;

pub use http::{HttpAsyncVendor, HttpSyncVendor, HttpVendorClient};

/// Text recorded when the synchronous vendor fails without saying why.
pub const SYNC_FAILURE_DEFAULT: &str = "Sync vendor returned unsuccessful response";
/// Text recorded when the asynchronous vendor refuses a submission.
pub const ASYNC_SUBMISSION_FAILURE: &str = "Failed to submit job to async vendor";

/// Transport-level failure talking to a vendor. Always retry-eligible.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VendorError {
    #[error("vendor call timed out after {0} ms")]
    Timeout(u64),
    #[error("vendor transport error: {0}")]
    Transport(String),
    #[error("vendor responded with status {status}")]
    Status { status: u16 },
    #[error("vendor response could not be decoded: {0}")]
    Decode(String),
}

/// Business answer of the synchronous vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Document>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Acknowledgement of an asynchronous submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncSubmission {
    pub success: bool,
    #[serde(default, alias = "job_id")]
    pub job_id: Option<String>,
    #[serde(default, alias = "estimated_completion_time")]
    pub estimated_completion_time: Option<String>,
}

#[async_trait]
pub trait SyncVendor: Send + Sync {
    async fn fetch(&self, payload: &Document) -> Result<SyncResponse, VendorError>;
}

#[async_trait]
pub trait AsyncVendor: Send + Sync {
    async fn submit(&self, payload: &Document) -> Result<AsyncSubmission, VendorError>;
}
