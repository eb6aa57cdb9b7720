//! Backend kinds a request can be routed to.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Fulfillment backend.
///
/// `Sync` answers within a single call; `Async` acknowledges and resolves later
/// through a callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Sync,
    Async,
}

impl Vendor {
    pub const ALL: [Vendor; 2] = [Vendor::Sync, Vendor::Async];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Sync => "sync",
            Vendor::Async => "async",
        }
    }
}

impl core::fmt::Display for Vendor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Vendor::Sync),
            "async" => Ok(Vendor::Async),
            other => Err(DomainError::validation(format!(
                "unknown vendor `{other}` (expected sync or async)"
            ))),
        }
    }
}
