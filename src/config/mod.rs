//! Configuration management for zsurface
//!
//! Session settings are loaded from TOML files and validated before a
//! display connection is made. Every field has a default, so an empty file
//! or no file at all is a valid configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable that overrides [`SessionConfig::socket`]
pub const SOCKET_ENV: &str = "ZSURFACE_SOCKET";

/// Settings shared by a display session and every toplevel/view it creates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Compositor socket name (resolved in `$XDG_RUNTIME_DIR`) or absolute path
    pub socket: String,

    /// Pixels per metre used when asking the compositor for a window size
    pub pixel_scale: f32,

    /// Margin between a toplevel's view and its window bounds (metres)
    pub cuboid_padding: f32,

    /// Half depth of a toplevel window (metres)
    pub surface_thickness: f32,

    /// Depth offset applied per nesting level so children render in front of parents
    pub z_layer_offset: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            socket: "zigen-0".to_string(),
            pixel_scale: 1000.0,      // 1000px = 1m
            cuboid_padding: 0.05,     // 5cm
            surface_thickness: 0.001, // 1mm
            z_layer_offset: 0.0001,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME")
                .map_err(|_| Error::Config("HOME is not set, cannot expand ~".into()))?;
            let rest = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(rest)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file {}: {}",
                expanded_path.display(),
                e
            ))
        })?;

        let config: SessionConfig = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!(
                "failed to parse config file {}: {}",
                expanded_path.display(),
                e
            ))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(socket) = std::env::var(SOCKET_ENV) {
            if !socket.is_empty() {
                self.socket = socket;
            }
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.socket.trim().is_empty() {
            return Err(Error::Config("socket must not be empty".into()));
        }

        if !(self.pixel_scale.is_finite() && self.pixel_scale > 0.0) {
            return Err(Error::Config(format!(
                "invalid pixel_scale {}: must be positive",
                self.pixel_scale
            )));
        }

        if !(self.cuboid_padding.is_finite() && self.cuboid_padding >= 0.0) {
            return Err(Error::Config(format!(
                "invalid cuboid_padding {}: must not be negative",
                self.cuboid_padding
            )));
        }

        if !(self.surface_thickness.is_finite() && self.surface_thickness > 0.0) {
            return Err(Error::Config(format!(
                "invalid surface_thickness {}: must be positive",
                self.surface_thickness
            )));
        }

        if !(self.z_layer_offset.is_finite() && self.z_layer_offset >= 0.0) {
            return Err(Error::Config(format!(
                "invalid z_layer_offset {}: must not be negative",
                self.z_layer_offset
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize configuration: {}", e)))?;
        let path = path.as_ref();
        fs::write(path, contents).map_err(|e| {
            Error::Config(format!(
                "failed to write config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
