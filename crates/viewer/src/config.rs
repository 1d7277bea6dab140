use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::search::SearchOptions;
use crate::stream::StreamOptions;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewerConfig {
    pub server: ServerConfig,
    pub buffer: BufferConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Backend base URL, e.g. "http://localhost:8080"
    pub base_url: String,
    /// Timeout for upload and close_session (streams are not bounded)
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Maximum lines kept in memory; oldest are evicted first
    pub max_lines: usize,
    pub flush_interval_ms: u64,
}

/// Reconnect policy for stream errors. `max_retries = 0` means a failed
/// stream stays down until the caller subscribes again.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    pub debounce_ms: u64,
    /// Queries shorter than this (in characters) clear the results
    pub min_query_len: usize,
    /// Entries scanned between cooperative yields
    pub chunk_size: usize,
    pub max_results: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Show the time difference to the previous line
    pub show_delta: bool,
    pub viewport_height: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_delta: false,
            viewport_height: 40,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl ViewerConfig {
    /// Load configuration from logview.toml and environment variables
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Same as [`load`](Self::load), with an extra explicit file layered on
    /// top of the default locations. Unlike those, it must exist.
    pub fn load_with(explicit: Option<&Path>) -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Start with compile-time defaults so missing keys fall back cleanly
        let defaults = config::Config::try_from(&ViewerConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        // Layer config files (overrides defaults)
        let mut config_paths = vec!["config/logview".to_string()];
        if let Some(home) = std::env::var_os("HOME") {
            let user = Path::new(&home).join(".config/logview/logview");
            config_paths.push(user.to_string_lossy().into_owned());
        }
        for path in config_paths {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        // Layer environment variables (overrides everything)
        // Use double underscore for nested keys: LOGVIEW_SERVER__BASE_URL
        builder = builder.add_source(
            config::Environment::with_prefix("LOGVIEW")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.server.base_url)
            .with_context(|| format!("Invalid server.base_url: {}", self.server.base_url))?;

        if self.buffer.max_lines == 0 {
            anyhow::bail!("buffer.max_lines must be > 0");
        }
        if self.buffer.flush_interval_ms == 0 {
            anyhow::bail!("buffer.flush_interval_ms must be > 0");
        }
        if self.search.chunk_size == 0 {
            anyhow::bail!("search.chunk_size must be > 0");
        }
        if self.search.max_results == 0 {
            anyhow::bail!("search.max_results must be > 0");
        }
        if self.display.viewport_height == 0 {
            anyhow::bail!("display.viewport_height must be > 0");
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            max_lines: self.buffer.max_lines,
            flush_interval: Duration::from_millis(self.buffer.flush_interval_ms),
            max_retries: self.stream.max_retries,
            retry_backoff: Duration::from_millis(self.stream.retry_backoff_ms),
        }
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            debounce: Duration::from_millis(self.search.debounce_ms),
            min_query_len: self.search.min_query_len,
            chunk_size: self.search.chunk_size,
            max_results: self.search.max_results,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://localhost:8080".to_string(),
                request_timeout_secs: 300,
                connect_timeout_secs: 10,
            },
            buffer: BufferConfig {
                max_lines: 2000,
                flush_interval_ms: 50,
            },
            stream: StreamConfig::default(),
            search: SearchConfig {
                debounce_ms: 150,
                min_query_len: 2,
                chunk_size: 500,
                max_results: 1000,
            },
            display: DisplayConfig::default(),
            logging: LoggingConfig {
                level: "warn,viewer=info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}
