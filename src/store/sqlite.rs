use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use super::{ChannelStore, LogSink, MappingStore};
use crate::models::audit::RequestLog;
use crate::models::channel::{Channel, ModelMapping, NewChannel, NewMapping};

const CHANNEL_COLUMNS: &str = "c.id, c.name, c.base_url, c.api_key, c.provider, c.is_active, c.priority, \
     c.max_retries, c.timeout, c.rate_limit, c.created_at, c.updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MappedChannelRow {
    #[sqlx(flatten)]
    channel: Channel,
    upstream_model: String,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database with the schema applied. A single
    /// connection that never expires, so the data outlives idle periods.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Channel Operations --

    pub async fn insert_channel(&self, channel: &NewChannel) -> anyhow::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO channels (name, base_url, api_key, provider, is_active, priority, timeout) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&channel.name)
        .bind(&channel.base_url)
        .bind(&channel.api_key)
        .bind(&channel.provider)
        .bind(channel.is_active)
        .bind(channel.priority)
        .bind(channel.timeout)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_channels(&self) -> anyhow::Result<Vec<Channel>> {
        let rows = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {} FROM channels c ORDER BY c.priority DESC, c.id ASC",
            CHANNEL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Mapping Operations --

    pub async fn insert_mapping(&self, mapping: &NewMapping) -> anyhow::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO model_mappings (channel_id, upstream_model, display_model, is_enabled) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(mapping.channel_id)
        .bind(&mapping.upstream_model)
        .bind(&mapping.display_model)
        .bind(mapping.is_enabled)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_mappings(&self) -> anyhow::Result<Vec<ModelMapping>> {
        let rows = sqlx::query_as::<_, ModelMapping>(
            "SELECT id, channel_id, upstream_model, display_model, is_enabled, created_at, updated_at \
             FROM model_mappings ORDER BY display_model ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn get_channel(&self, id: i64) -> anyhow::Result<Option<Channel>> {
        let row = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {} FROM channels c WHERE c.id = ?",
            CHANNEL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_active_channels(&self) -> anyhow::Result<Vec<Channel>> {
        let rows = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {} FROM channels c WHERE c.is_active = 1 ORDER BY c.priority DESC, c.id ASC",
            CHANNEL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl MappingStore for SqliteStore {
    async fn find_enabled_by_display_model(&self, display_model: &str) -> anyhow::Result<Vec<(Channel, String)>> {
        let rows = sqlx::query_as::<_, MappedChannelRow>(&format!(
            "SELECT {}, m.upstream_model \
             FROM model_mappings m \
             JOIN channels c ON c.id = m.channel_id \
             WHERE m.display_model = ? AND m.is_enabled = 1 AND c.is_active = 1 \
             ORDER BY c.priority DESC, m.id ASC",
            CHANNEL_COLUMNS
        ))
        .bind(display_model)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.channel, r.upstream_model)).collect())
    }
}

#[async_trait]
impl LogSink for SqliteStore {
    async fn append(&self, record: &RequestLog) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO request_logs (
                channel_id, request_id, model_name, upstream_model,
                input_tokens, output_tokens, total_tokens,
                request_time, response_time, latency_ms,
                status, error_code, error_message, ip_address, is_streaming
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.channel_id)
        .bind(&record.request_id)
        .bind(&record.model_name)
        .bind(&record.upstream_model)
        .bind(i64::from(record.input_tokens))
        .bind(i64::from(record.output_tokens))
        .bind(i64::from(record.total_tokens))
        .bind(record.request_time)
        .bind(record.response_time)
        .bind(i64::try_from(record.latency_ms).unwrap_or(i64::MAX))
        .bind(record.status.as_str())
        .bind(&record.error_code)
        .bind(&record.error_message)
        .bind(&record.ip_address)
        .bind(record.is_streaming)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit::RequestStatus;
    use chrono::Utc;

    fn channel(name: &str, priority: i64, is_active: bool) -> NewChannel {
        NewChannel {
            name: name.to_string(),
            base_url: format!("https://{}.example.com", name),
            api_key: format!("sk-{}", name),
            provider: "anthropic".to_string(),
            is_active,
            priority,
            timeout: 30,
        }
    }

    fn mapping(channel_id: i64, upstream: &str, display: &str, is_enabled: bool) -> NewMapping {
        NewMapping {
            channel_id,
            upstream_model: upstream.to_string(),
            display_model: display.to_string(),
            is_enabled,
        }
    }

    #[tokio::test]
    async fn test_channel_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.insert_channel(&channel("alpha", 5, true)).await.unwrap();

        let ch = store.get_channel(id).await.unwrap().unwrap();
        assert_eq!(ch.name, "alpha");
        assert_eq!(ch.api_key, "sk-alpha");
        assert_eq!(ch.priority, 5);
        assert_eq!(ch.timeout, 30);
        assert!(ch.is_active);
        assert_eq!(ch.max_retries, 3);

        assert!(store.get_channel(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_ordered_by_priority() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_channel(&channel("low", 1, true)).await.unwrap();
        store.insert_channel(&channel("off", 100, false)).await.unwrap();
        store.insert_channel(&channel("high", 10, true)).await.unwrap();

        let names: Vec<String> = store
            .list_active_channels()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["high", "low"]);
        assert_eq!(store.list_channels().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_find_enabled_filters_and_orders() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.insert_channel(&channel("a", 1, true)).await.unwrap();
        let b = store.insert_channel(&channel("b", 9, true)).await.unwrap();
        let off = store.insert_channel(&channel("off", 50, false)).await.unwrap();

        store.insert_mapping(&mapping(a, "up-a", "claude", true)).await.unwrap();
        store.insert_mapping(&mapping(b, "up-b", "claude", true)).await.unwrap();
        store.insert_mapping(&mapping(b, "up-b-disabled", "claude", false)).await.unwrap();
        store.insert_mapping(&mapping(off, "up-off", "claude", true)).await.unwrap();
        store.insert_mapping(&mapping(a, "other", "gpt", true)).await.unwrap();

        let found = store.find_enabled_by_display_model("claude").await.unwrap();
        let got: Vec<(&str, &str)> = found
            .iter()
            .map(|(c, m)| (c.name.as_str(), m.as_str()))
            .collect();
        assert_eq!(got, vec![("b", "up-b"), ("a", "up-a")]);

        assert!(store.find_enabled_by_display_model("missing").await.unwrap().is_empty());
        assert_eq!(store.list_mappings().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_append_request_log() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        let record = RequestLog {
            channel_id: 0,
            request_id: "r-1".into(),
            model_name: "claude".into(),
            upstream_model: "claude".into(),
            input_tokens: 10,
            output_tokens: 3,
            total_tokens: 13,
            request_time: now,
            response_time: now,
            latency_ms: 42,
            status: RequestStatus::Error,
            error_code: Some("502:api_error".into()),
            error_message: Some("bad gateway".into()),
            ip_address: "127.0.0.1".into(),
            is_streaming: true,
        };
        store.append(&record).await.unwrap();

        let (status, code, tokens) = sqlx::query_as::<_, (String, Option<String>, i64)>(
            "SELECT status, error_code, total_tokens FROM request_logs WHERE request_id = 'r-1'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(status, "error");
        assert_eq!(code.as_deref(), Some("502:api_error"));
        assert_eq!(tokens, 13);
    }
}
