use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PostgreSQL connection and storage settings for the device store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
    pub connect_timeout_ms: u64,
    /// Table holding device documents
    pub table: String,
}

impl PostgresConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "devices".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_pool_size: 5,
            connect_timeout_ms: 3000,
            table: "device_aggregate".to_string(),
        }
    }
}
