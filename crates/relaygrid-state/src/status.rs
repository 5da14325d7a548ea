//! Status reports pushed by relays over the agent channel.
//!
//! Wire shape (JSON, camelCase):
//!
//! ```text
//! {
//!   "version": 1,                       // optional, defaults to 1
//!   "activeConnections": [              // required
//!     { "tag": "<workload id>", "clientAddress": "...", "createdAt": 0, "lastUsedAt": 0 }
//!   ],
//!   "expiredTags": ["<workload id>"]    // optional
//! }
//! ```
//!
//! Unknown fields are ignored so relays can add diagnostics without a
//! version bump. A missing `activeConnections` or an unsupported `version`
//! is a [`StatusParseError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest report version this build understands.
pub const STATUS_REPORT_VERSION: u32 = 1;

/// A malformed or unsupported status report.
#[derive(Debug, Error)]
pub enum StatusParseError {
    #[error("malformed status report: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported status report version {found} (max {STATUS_REPORT_VERSION})")]
    UnsupportedVersion { found: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(default = "default_version")]
    pub version: u32,
    pub active_connections: Vec<ConnectionInfo>,
    #[serde(default)]
    pub expired_tags: Vec<String>,
}

/// One live client connection on a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Workload the connection belongs to.
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<u64>,
}

fn default_version() -> u32 {
    1
}

impl StatusReport {
    pub fn parse(raw: &str) -> Result<Self, StatusParseError> {
        let report: StatusReport = serde_json::from_str(raw)?;
        if report.version == 0 || report.version > STATUS_REPORT_VERSION {
            return Err(StatusParseError::UnsupportedVersion {
                found: report.version,
            });
        }
        Ok(report)
    }

    pub fn connection_count(&self) -> u32 {
        self.active_connections.len() as u32
    }

    pub fn has_connection_for(&self, workload_id: &str) -> bool {
        self.active_connections.iter().any(|c| c.tag == workload_id)
    }
}
