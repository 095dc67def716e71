//! Display model → ordered upstream candidates.

use std::time::Duration;

use super::upstream::UpstreamTarget;
use crate::models::channel::Channel;
use crate::models::Protocol;
use crate::store::MappingStore;

/// Endpoint used when no mapping matches the requested model.
#[derive(Debug, Clone)]
pub struct FallbackTarget {
    pub base_url: String,
    pub timeout: Duration,
}

/// One upstream the orchestrator may try.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// `None` for the synthetic fallback.
    pub channel: Option<Channel>,
    pub upstream_model: String,
    pub target: UpstreamTarget,
}

impl Candidate {
    fn from_channel(channel: Channel, upstream_model: String, default_timeout: Duration) -> Self {
        let target = UpstreamTarget {
            base_url: channel.base_url.clone(),
            api_key: channel.api_key.clone(),
            protocol: channel.protocol(),
            timeout: channel.timeout().unwrap_or(default_timeout),
        };
        Self {
            channel: Some(channel),
            upstream_model,
            target,
        }
    }

    /// Raw display name, default Anthropic endpoint, caller's own credential.
    pub fn fallback(display_model: &str, caller_key: Option<&str>, fallback: &FallbackTarget) -> Self {
        Self {
            channel: None,
            upstream_model: display_model.to_string(),
            target: UpstreamTarget {
                base_url: fallback.base_url.clone(),
                api_key: caller_key.unwrap_or_default().to_string(),
                protocol: Protocol::Anthropic,
                timeout: fallback.timeout,
            },
        }
    }

    /// Channel id for the audit record; 0 for the fallback.
    pub fn channel_id(&self) -> i64 {
        self.channel.as_ref().map_or(0, |c| c.id)
    }
}

/// Resolve `display_model` to candidates in the order they should be tried.
///
/// Never empty: a model with no usable mapping yields the single fallback
/// candidate. A store failure is treated the same way after logging it.
pub async fn resolve(
    store: &dyn MappingStore,
    display_model: &str,
    caller_key: Option<&str>,
    fallback: &FallbackTarget,
) -> Vec<Candidate> {
    let mut mapped = match store.find_enabled_by_display_model(display_model).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(model = %display_model, "mapping lookup failed, using fallback: {}", e);
            Vec::new()
        }
    };

    mapped.retain(|(channel, _)| channel.is_active);
    // stable: equal priorities keep the store's order
    mapped.sort_by(|(a, _), (b, _)| b.priority.cmp(&a.priority));

    if mapped.is_empty() {
        tracing::debug!(model = %display_model, "no mapping, using fallback candidate");
        return vec![Candidate::fallback(display_model, caller_key, fallback)];
    }

    mapped
        .into_iter()
        .map(|(channel, upstream_model)| Candidate::from_channel(channel, upstream_model, fallback.timeout))
        .collect()
}
