use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use super::Protocol;

/// An upstream provider endpoint.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// `anthropic`, or anything else for an OpenAI-compatible endpoint.
    pub provider: String,
    pub is_active: bool,
    /// Higher is tried first.
    pub priority: i64,
    /// Stored for the admin layer; not enforced by the proxy.
    pub max_retries: i64,
    /// Per-attempt timeout in seconds. `<= 0` means the gateway default.
    pub timeout: i64,
    /// Stored for the admin layer; not enforced by the proxy.
    pub rate_limit: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn protocol(&self) -> Protocol {
        Protocol::from_flavor(&self.provider)
    }

    pub fn timeout(&self) -> Option<Duration> {
        u64::try_from(self.timeout)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ModelMapping {
    pub id: i64,
    pub channel_id: i64,
    pub upstream_model: String,
    pub display_model: String,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a channel.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub provider: String,
    pub is_active: bool,
    pub priority: i64,
    pub timeout: i64,
}

/// Insert payload for a mapping.
#[derive(Debug, Clone)]
pub struct NewMapping {
    pub channel_id: i64,
    pub upstream_model: String,
    pub display_model: String,
    pub is_enabled: bool,
}
