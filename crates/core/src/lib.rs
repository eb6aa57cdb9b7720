//! `fulfill-core`: domain foundation for fulfillment jobs.
//!
//! This crate contains **pure domain** logic: identifiers, the job lifecycle
//! state machine and the document sanitizer. No IO, no async, no storage.

pub mod document;
pub mod error;
pub mod id;
pub mod job;
pub mod sanitize;
pub mod vendor;

pub use document::Document;
pub use error::{DomainError, DomainResult};
pub use id::{RequestId, VendorJobId};
pub use job::{Job, JobStatus};
pub use sanitize::sanitize;
pub use vendor::Vendor;
