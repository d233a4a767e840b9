//! Configuration management for CrabCall
//!
//! Provides configuration loading, saving, and validation for the ICE server
//! list, capture preferences and the call view layout.

use crate::errors::CallError;
use crate::types::Facing;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// STUN server used when no configuration overrides it
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    pub ice: IceConfig,
    pub media: MediaConfig,
    pub layout: LayoutConfig,
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceConfig {
    pub servers: Vec<IceServer>,
}

/// Capture preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Scheme of the URLs handed to rendering surfaces
    pub url_scheme: String,
    /// Prefer a camera facing this way; otherwise the first video source wins
    pub preferred_facing: Option<Facing>,
}

/// Relative heights of the two stacked surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub remote_flex: f32,
    pub local_flex: f32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig {
                servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            },
            media: MediaConfig {
                url_scheme: "mediastream".to_string(),
                preferred_facing: None,
            },
            layout: LayoutConfig {
                remote_flex: 0.5,
                local_flex: 0.5,
            },
        }
    }
}

impl CallConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CallError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;

        let config: CallConfig = toml::from_str(&contents)
            .map_err(|e| CallError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(CallError::Config)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CallError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CallError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcall.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.ice.servers.is_empty() {
            return Err("At least one ICE server is required".to_string());
        }
        for server in &self.ice.servers {
            if server.urls.is_empty() {
                return Err("ICE server entry has no URLs".to_string());
            }
            for url in &server.urls {
                let known = ["stun:", "stuns:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme));
                if !known {
                    return Err(format!("Unsupported ICE server URL: {}", url));
                }
                if url.starts_with("turn") && server.username.is_none() {
                    return Err(format!("TURN server {} requires a username", url));
                }
            }
        }

        let scheme = &self.media.url_scheme;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(format!("Invalid stream URL scheme: {:?}", scheme));
        }

        for (name, flex) in [
            ("remote_flex", self.layout.remote_flex),
            ("local_flex", self.layout.local_flex),
        ] {
            if !(flex > 0.0 && flex <= 1.0) {
                return Err(format!("{} must be in (0.0, 1.0]", name));
            }
        }

        Ok(())
    }
}
