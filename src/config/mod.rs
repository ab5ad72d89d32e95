//! Configuration management

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Timeout for TCP connects to players, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for individual socket reads, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Capacity of the status-update queue feeding the consumer; overflow
    /// is shed, not blocked on.
    #[serde(default = "default_status_queue_capacity")]
    pub status_queue_capacity: usize,

    /// Consecutive track-id misses tolerated during a bulk slot scan
    /// before giving up. Policy, not protocol; 128 matches the hardware's
    /// observed id sparsity.
    #[serde(default = "default_max_id_gap")]
    pub max_id_gap: u32,

    /// Well-known port answering db-service port queries. Only simulated
    /// players listen anywhere else.
    #[serde(default = "default_port_query_port")]
    pub port_query_port: u16,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    3000
}

fn default_status_queue_capacity() -> usize {
    100
}

fn default_max_id_gap() -> u32 {
    128
}

fn default_port_query_port() -> u16 {
    crate::dbserver::DB_SERVER_QUERY_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            status_queue_capacity: default_status_queue_capacity(),
            max_id_gap: default_max_id_gap(),
            port_query_port: default_port_query_port(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Get config directory (PROLINK_CONFIG_DIR, else XDG-style default)
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("PROLINK_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        return std::path::PathBuf::from(home).join(".config/prolink-metadata");
    }
    // Fallback to ./data
    std::path::PathBuf::from("./data")
}

/// Load configuration: defaults, then an optional config file in the config
/// directory, then PROLINK_-prefixed environment overrides
/// (e.g. PROLINK_READ_TIMEOUT_MS=1000).
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let builder = ::config::Config::builder()
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        .add_source(
            ::config::Environment::with_prefix("PROLINK")
                .separator("__")
                .try_parsing(true),
        );

    Ok(builder.build()?.try_deserialize()?)
}
