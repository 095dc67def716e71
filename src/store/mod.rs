pub mod sqlite;

use async_trait::async_trait;

use crate::models::audit::RequestLog;
use crate::models::channel::Channel;

/// Read access to configured upstream channels.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get_channel(&self, id: i64) -> anyhow::Result<Option<Channel>>;

    /// Active channels, priority descending.
    async fn list_active_channels(&self) -> anyhow::Result<Vec<Channel>>;
}

/// Display-model lookups.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// `(channel, upstream model)` for every enabled mapping of `display_model`
    /// whose channel is active, channel priority descending.
    async fn find_enabled_by_display_model(&self, display_model: &str) -> anyhow::Result<Vec<(Channel, String)>>;
}

/// Destination for audit records.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, record: &RequestLog) -> anyhow::Result<()>;
}
