use std::time::Duration;

use crate::proxy::resolver::FallbackTarget;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory holding the SQLite database file.
    pub data_dir: String,
    pub database_url: String,
    /// Shared secret callers must present. Unset or empty means open access.
    pub api_key: Option<String>,
    pub debug: bool,
    pub enable_cors: bool,
    /// Allowed CORS origins; `*` allows any.
    pub allowed_origins: Vec<String>,
    /// Endpoint of the fallback candidate (Anthropic flavor).
    pub default_upstream_url: String,
    /// Per-attempt timeout for channels without their own, and for the fallback.
    pub upstream_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = "./data".to_string();
        Self {
            port: 8080,
            database_url: default_database_url(&data_dir),
            data_dir,
            api_key: None,
            debug: false,
            enable_cors: true,
            allowed_origins: vec!["*".to_string()],
            default_upstream_url: "https://api.anthropic.com".to_string(),
            upstream_timeout_secs: 120,
        }
    }
}

impl Config {
    /// The configured secret, if it gates access at all.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn fallback_target(&self) -> FallbackTarget {
        FallbackTarget {
            base_url: self.default_upstream_url.clone(),
            timeout: self.upstream_timeout(),
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Build from a variable lookup; unparsable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Config {
        let defaults = Config::default();
        let data_dir = get("DATA_DIR").unwrap_or(defaults.data_dir);

        Config {
            port: get("SERVER_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            database_url: get("DATABASE_URL").unwrap_or_else(|| default_database_url(&data_dir)),
            data_dir,
            api_key: get("API_KEY").filter(|k| !k.is_empty()),
            debug: get("DEBUG").map(|v| parse_bool(&v)).unwrap_or(defaults.debug),
            enable_cors: get("ENABLE_CORS")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.enable_cors),
            allowed_origins: get("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect::<Vec<_>>()
                })
                .filter(|origins| !origins.is_empty())
                .unwrap_or(defaults.allowed_origins),
            default_upstream_url: get("DEFAULT_UPSTREAM_URL").unwrap_or(defaults.default_upstream_url),
            upstream_timeout_secs: get("UPSTREAM_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.upstream_timeout_secs),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Ok(Config::from_lookup(|key| std::env::var(key).ok()))
}

fn default_database_url(data_dir: &str) -> String {
    format!("sqlite://{}/gateway.db?mode=rwc", data_dir.trim_end_matches('/'))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
