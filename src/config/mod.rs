use std::env;
use std::time::Duration;

/// 位置存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Some(StoreBackend::Postgres),
            "memory" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub db_max_connections: u32,
    pub feed_reconnect_initial_ms: u64,
    pub feed_reconnect_max_ms: u64,
    pub store_backend: StoreBackend,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let backend = optional("STORE_BACKEND", "postgres");
        let store_backend = StoreBackend::parse(&backend).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown STORE_BACKEND {:?}, expected postgres or memory; using postgres",
                backend
            );
            StoreBackend::Postgres
        });

        // memory 模式下不需要数据库和 Redis
        let (database_url, redis_url) = match store_backend {
            StoreBackend::Postgres => (env::var("DATABASE_URL")?, env::var("REDIS_URL")?),
            StoreBackend::Memory => (
                env::var("DATABASE_URL").unwrap_or_default(),
                env::var("REDIS_URL").unwrap_or_default(),
            ),
        };

        Ok(Config {
            database_url,
            redis_url,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: optional("SERVER_HOST", "::"),
            server_port: optional("SERVER_PORT", "3000").parse().unwrap_or(3000),
            api_base_uri: optional("API_BASE_URI", "/api"),
            db_max_connections: optional("DB_MAX_CONNECTIONS", "10").parse().unwrap_or(10),
            feed_reconnect_initial_ms: optional("FEED_RECONNECT_INITIAL_MS", "500")
                .parse()
                .unwrap_or(500),
            feed_reconnect_max_ms: optional("FEED_RECONNECT_MAX_MS", "30000")
                .parse()
                .unwrap_or(30_000),
            store_backend,
        })
    }

    pub fn feed_reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.feed_reconnect_initial_ms)
    }

    pub fn feed_reconnect_max(&self) -> Duration {
        Duration::from_millis(self.feed_reconnect_max_ms)
    }
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        tracing::debug!("{} not set, using default: {}", key, default);
        default.to_string()
    })
}
