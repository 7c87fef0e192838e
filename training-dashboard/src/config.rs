//! Dashboard configuration.
//!
//! Endpoints are never hardcoded into the ingest or client logic. They come
//! from [`DashboardConfig`], which is built from defaults, then environment
//! variables, then command-line flags (applied by the binary via the `with_*`
//! setters).
//!
//! # Environment
//!
//! - `TRAIN_DASHBOARD_WS_URL` - WebSocket endpoint streaming training updates
//! - `TRAIN_DASHBOARD_API_BASE` - HTTP base URL of the training API

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attention_viz::DEFAULT_MAX_DIM;
use crate::error::{DashboardError, DashboardResult};

/// Environment variable overriding the WebSocket endpoint.
pub const WS_URL_ENV: &str = "TRAIN_DASHBOARD_WS_URL";
/// Environment variable overriding the HTTP API base.
pub const API_BASE_ENV: &str = "TRAIN_DASHBOARD_API_BASE";

const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws/metrics";
const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// Runtime configuration for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// WebSocket endpoint streaming `{step, loss, attention_weights}` frames.
    pub ws_url: String,
    /// Base URL of the training API (`POST {api_base}/train`).
    pub api_base: String,
    /// Largest heatmap dimension before striding kicks in.
    pub max_heatmap_dim: usize,
    /// UI refresh / event poll interval in milliseconds.
    pub refresh_ms: u64,
    /// Start with log-scaled heatmap colours.
    pub log_scale: bool,
    /// Where tracing output goes while the TUI owns the terminal.
    pub log_file: Option<PathBuf>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            max_heatmap_dim: DEFAULT_MAX_DIM,
            refresh_ms: 100,
            log_scale: false,
            log_file: Some(PathBuf::from("train-dashboard.log")),
        }
    }
}

impl DashboardConfig {
    /// Build config from defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(WS_URL_ENV) {
            if !url.trim().is_empty() {
                config.ws_url = url.trim().to_string();
            }
        }
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            if !base.trim().is_empty() {
                config.api_base = base.trim().to_string();
            }
        }
        config
    }

    /// Set the WebSocket endpoint.
    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Set the HTTP API base.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Set the heatmap downsampling cap.
    #[must_use]
    pub const fn with_max_heatmap_dim(mut self, max_dim: usize) -> Self {
        self.max_heatmap_dim = max_dim;
        self
    }

    /// Set the refresh interval.
    #[must_use]
    pub const fn with_refresh_ms(mut self, refresh_ms: u64) -> Self {
        self.refresh_ms = refresh_ms;
        self
    }

    /// Enable or disable log-scaled heatmaps at startup.
    #[must_use]
    pub const fn with_log_scale(mut self, log_scale: bool) -> Self {
        self.log_scale = log_scale;
        self
    }

    /// Set the log file (None disables file logging).
    #[must_use]
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Refresh interval as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }

    /// Check that endpoints use the expected schemes and sizes are positive.
    pub fn validate(&self) -> DashboardResult<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(DashboardError::invalid_config(format!(
                "'{}' - WebSocket URL must start with ws:// or wss://",
                self.ws_url
            )));
        }
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(DashboardError::invalid_config(format!(
                "'{}' - API base must start with http:// or https://",
                self.api_base
            )));
        }
        if self.max_heatmap_dim == 0 {
            return Err(DashboardError::invalid_config(
                "max heatmap dimension must be at least 1",
            ));
        }
        if self.refresh_ms == 0 {
            return Err(DashboardError::invalid_config(
                "refresh interval must be at least 1ms",
            ));
        }
        Ok(())
    }

    /// Open the configured log file for appending, creating parent directories.
    ///
    /// Returns `Ok(None)` when file logging is disabled.
    pub fn open_log_file(&self) -> DashboardResult<Option<File>> {
        let Some(path) = self.log_file.as_ref() else {
            return Ok(None);
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Some(file))
    }
}
