//! Core types for the tile cache server

use serde::Serialize;
use tile_cache::{CacheConfig, MetricsSnapshot};

/// Configuration for the server process
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cache: CacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3002,
            cache: CacheConfig::default(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub entries: Option<u64>,
    pub cache: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3002);
        assert_eq!(config.cache.name, "tile-cache");
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            uptime_secs: 3600,
            entries: Some(42),
            cache: MetricsSnapshot {
                hits: 30,
                misses: 10,
                hit_rate: 0.75,
                last_error: None,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"entries\":42"));
        assert!(json.contains("\"hitRate\":0.75"));
    }
}
