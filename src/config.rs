//! Application configuration
//!
//! Every knob is read from the environment (after loading `.env`) and falls
//! back to a default when missing or unparseable.

use std::time::Duration;

/// Which `GuessStore`/`LockStore` implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Some(StoreBackend::Sqlite),
            "memory" | "mem" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub database_path: String,
    pub jwt_secret: String,
    /// Shared secret the task dispatcher presents on the resolve callback.
    pub task_token: Option<String>,
    pub lock_ttl_ms: i64,
    pub guess_resolution_delay_secs: i64,
    pub leaderboard_limit: usize,
    pub history_page_size: usize,
    pub price_feed_enabled: bool,
    pub price_api_url: String,
    pub price_symbol: String,
    pub price_poll_ms: u64,
    pub task_max_attempts: u32,
    pub task_retry_base_ms: u64,
}

pub const DEFAULT_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            store_backend: StoreBackend::Sqlite,
            database_path: "bitpredict.db".to_string(),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            task_token: None,
            lock_ttl_ms: 10_000,
            guess_resolution_delay_secs: 15,
            leaderboard_limit: 10,
            history_page_size: 10,
            price_feed_enabled: true,
            price_api_url: "https://api.binance.com/api/v3/ticker/price".to_string(),
            price_symbol: "BTCUSDT".to_string(),
            price_poll_ms: 1_000,
            task_max_attempts: 5,
            task_retry_base_ms: 1_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(get("PORT"), defaults.port);
        let store_backend = get("STORE_BACKEND")
            .and_then(|v| StoreBackend::parse(&v))
            .unwrap_or(defaults.store_backend);
        let database_path = get("DB_PATH")
            .or_else(|| get("DATABASE_PATH"))
            .unwrap_or(defaults.database_path);
        let jwt_secret = get("JWT_SECRET").unwrap_or(defaults.jwt_secret);
        let task_token = get("TASK_TOKEN");

        let lock_ttl_ms = parse_or(get("LOCK_TTL_MS"), defaults.lock_ttl_ms).max(1);
        let guess_resolution_delay_secs = parse_or(
            get("GUESS_RESOLUTION_DELAY_SECS"),
            defaults.guess_resolution_delay_secs,
        )
        .max(0);
        let leaderboard_limit =
            parse_or(get("LEADERBOARD_LIMIT"), defaults.leaderboard_limit).clamp(1, 100);
        let history_page_size =
            parse_or(get("HISTORY_PAGE_SIZE"), defaults.history_page_size).max(1);

        let price_feed_enabled = get("PRICE_FEED_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(defaults.price_feed_enabled);
        let price_api_url = get("PRICE_API_URL").unwrap_or(defaults.price_api_url);
        let price_symbol = get("PRICE_SYMBOL")
            .map(|s| s.to_uppercase())
            .unwrap_or(defaults.price_symbol);
        let price_poll_ms = parse_or(get("PRICE_POLL_MS"), defaults.price_poll_ms).max(100);

        let task_max_attempts =
            parse_or(get("TASK_MAX_ATTEMPTS"), defaults.task_max_attempts).max(1);
        let task_retry_base_ms = parse_or(get("TASK_RETRY_BASE_MS"), defaults.task_retry_base_ms);

        Self {
            port,
            store_backend,
            database_path,
            jwt_secret,
            task_token,
            lock_ttl_ms,
            guess_resolution_delay_secs,
            leaderboard_limit,
            history_page_size,
            price_feed_enabled,
            price_api_url,
            price_symbol,
            price_poll_ms,
            task_max_attempts,
            task_retry_base_ms,
        }
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms as u64)
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = config_from(&[]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
        assert_eq!(config.lock_ttl_ms, 10_000);
        assert_eq!(config.guess_resolution_delay_secs, 15);
        assert_eq!(config.leaderboard_limit, 10);
        assert_eq!(config.history_page_size, 10);
        assert!(config.task_token.is_none());
        assert!(config.uses_default_secret());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("STORE_BACKEND", "memory"),
            ("LOCK_TTL_MS", "not-a-number"),
            ("GUESS_RESOLUTION_DELAY_SECS", "60"),
            ("LEADERBOARD_LIMIT", "500"),
            ("PRICE_FEED_ENABLED", "false"),
            ("PRICE_SYMBOL", "ethusdt"),
            ("TASK_TOKEN", "s3cret"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.lock_ttl_ms, 10_000);
        assert_eq!(config.guess_resolution_delay_secs, 60);
        assert_eq!(config.leaderboard_limit, 100);
        assert!(!config.price_feed_enabled);
        assert_eq!(config.price_symbol, "ETHUSDT");
        assert_eq!(config.task_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config_from(&[("JWT_SECRET", "   "), ("DB_PATH", "")]);
        assert!(config.uses_default_secret());
        assert_eq!(config.database_path, "bitpredict.db");
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!(StoreBackend::parse(" SQLite "), Some(StoreBackend::Sqlite));
        assert_eq!(StoreBackend::parse("mem"), Some(StoreBackend::Memory));
        assert_eq!(StoreBackend::parse("postgres"), None);

        let config = config_from(&[("STORE_BACKEND", "postgres")]);
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
    }
}
