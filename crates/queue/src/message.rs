//! Messages and deliveries.

use serde::{Deserialize, Serialize};

use fulfill_core::{Document, RequestId, Vendor};

/// Work item placed on the dispatch queue at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub request_id: RequestId,
    pub vendor: Vendor,
    pub payload: Document,
}

impl DispatchMessage {
    pub fn new(request_id: RequestId, vendor: Vendor, payload: Document) -> Self {
        Self {
            request_id,
            vendor,
            payload,
        }
    }
}

/// Identifies one delivery (attempt) handed to a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub u64);

impl core::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One attempt at processing a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: DeliveryId,
    pub message: DispatchMessage,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl Delivery {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
