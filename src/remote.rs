//! Address of the remote collection belonging to a caller identity.

use serde::{Deserialize, Serialize};

/// Caller identity plus the base URL of the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub identity: String,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            identity: identity.into(),
        }
    }

    /// Name of the remote collection: `user/<identity>`.
    pub fn database_name(&self) -> String {
        format!("user/{}", self.identity)
    }

    /// `<base_url>/<urlencoded database name>`.
    pub fn remote_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.database_name())
        )
    }
}
