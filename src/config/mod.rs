//! Configuration module for camnode
//!
//! This module handles daemon configuration including:
//! - Control server settings (client id, command queue depth)
//! - Logging (level filter, optional rolling log file)
//! - Pipeline timing and storage settings
//! - The node graph to build at startup
//!
//! # Config Location
//!
//! Configuration is read from the platform config directory unless a path
//! is given on the command line:
//! - **Linux**: `~/.config/camnode/camnode.toml`
//! - **macOS**: `~/Library/Application Support/camnode/camnode.toml`
//!
//! Files ending in `.json` are parsed as JSON, everything else as TOML.
//!
//! # Example
//!
//! ```ignore
//! use camnode::config::AppConfig;
//!
//! let config = AppConfig::load_or_default();
//! for node in &config.nodes {
//!     println!("{} ({})", node.id, node.node_type);
//! }
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{CamNodeError, Result, ResultExt};
use crate::pipeline::bridge::NodeRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "camnode";

/// Default config filename
pub const CONFIG_FILE: &str = "camnode.toml";

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,camnode=debug";

// ==================== Config Directory ====================

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Sections ====================

/// Control server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identifier announced on the control plane
    pub client_id: String,

    /// Depth of the command queue
    pub command_depth: usize,

    /// Depth of the reply/event queue
    pub message_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_id: "recamera".to_string(),
            command_depth: 256,
            message_depth: 4096,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    /// Directory for a daily rolling log file, if any
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
        }
    }
}

/// Whether the binary drives the in-process mock backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Emit synthetic frames from the mock video subsystem
    pub generator: bool,

    /// Generator frame rate
    pub fps: u32,

    /// Frames per H.264 group of pictures
    pub gop: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            generator: true,
            fps: 15,
            gop: 30,
        }
    }
}

// ==================== App Config ====================

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineSettings,
    pub demo: DemoConfig,
    /// Nodes to create at startup, in order
    pub nodes: Vec<NodeRequest>,
}

impl AppConfig {
    /// Load from `path`, choosing the format by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CamNodeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let parsed = if is_json(path) {
            serde_json::from_str(&text).map_err(CamNodeError::from)
        } else {
            toml::from_str(&text).map_err(CamNodeError::from)
        };
        let config = parsed.with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults
    pub fn load_or_default() -> Self {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring config {}: {}", path.display(), e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Save to `path`, choosing the format by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        std::fs::write(path, text)
            .map_err(CamNodeError::from)
            .context(format!("Failed to write {}", path.display()))
    }

    /// A camera feeding a detector, a recorder and a streamer
    pub fn sample() -> Self {
        Self {
            nodes: vec![
                NodeRequest::new("camera0", "camera")
                    .with_config(json!({ "option": "720p", "fps": 15, "preview": false })),
                NodeRequest::new("model0", "model")
                    .with_config(json!({
                        "uri": "/userdata/MODEL/yolo11n_detection.cvimodel",
                        "tscore": 0.45,
                        "tiou": 0.35,
                        "debug": false,
                        "trace": true,
                        "counting": true,
                    }))
                    .depends_on("camera0"),
                NodeRequest::new("save0", "save")
                    .with_config(json!({ "storage": "local", "slice": 300 }))
                    .depends_on("camera0"),
                NodeRequest::new("stream0", "stream")
                    .with_config(json!({ "port": 554, "session": "live" }))
                    .depends_on("camera0"),
            ],
            ..Self::default()
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
