//! Configuration module for hookscope
//!
//! Supports configuration via file and environment variables.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind the server to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest request body the capture endpoint will read
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Per-channel history retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Number of captured requests kept per channel
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
}

fn default_max_requests() -> usize {
    100
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
        }
    }
}

/// Live subscriber fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Outbound queue depth per connected observer
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

fn default_subscriber_queue() -> usize {
    64
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

/// Forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Timeout for a single forward attempt in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl ForwardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Retention configuration
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Broadcast configuration
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// Forwarding configuration
    #[serde(default)]
    pub forward: ForwardConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> anyhow::Result<Self> {
        // Try to load .env file (ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        if std::path::Path::new("config.toml").exists() {
            config = config.add_source(config::File::with_name("config").required(false));
        }

        // HOOKSCOPE_SERVER__PORT=8080, HOOKSCOPE_RETENTION__MAX_REQUESTS=50
        config = config.add_source(
            config::Environment::with_prefix("HOOKSCOPE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).or_else(|_| serde_json::from_str(&contents))?;
        Ok(config)
    }
}

/// Runtime configuration shared between the server and its handlers
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<AppConfig>>,
}

impl SharedConfig {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Get a read-only copy of the configuration
    pub fn get(&self) -> AppConfig {
        self.inner.read().clone()
    }

    pub fn server(&self) -> ServerConfig {
        self.inner.read().server.clone()
    }

    pub fn forward(&self) -> ForwardConfig {
        self.inner.read().forward.clone()
    }

    /// Replace the entire configuration
    pub fn update(&self, config: AppConfig) {
        *self.inner.write() = config;
    }
}
