// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry server configuration.

use crate::server::connection::ConnectionOptions;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Registry server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port for registration channels (default: 7410)
    #[serde(default = "default_registration_port")]
    pub registration_port: u16,

    /// TCP port for interest (discovery) channels (default: 7411)
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// Lease duration granted to registrations, in seconds
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,

    /// Interval between expiry sweeps, in seconds
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// How long a submitted message may wait for the peer's acknowledgement
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Maximum message size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Registry change feed capacity per subscriber
    #[serde(default = "default_change_feed_capacity")]
    pub change_feed_capacity: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_registration_port() -> u16 {
    7410
}

fn default_discovery_port() -> u16 {
    7411
}

fn default_lease_duration() -> u64 {
    90
}

fn default_eviction_interval() -> u64 {
    30
}

fn default_ack_timeout() -> u64 {
    10_000
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_change_feed_capacity() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            registration_port: default_registration_port(),
            discovery_port: default_discovery_port(),
            lease_duration_secs: default_lease_duration(),
            eviction_interval_secs: default_eviction_interval(),
            ack_timeout_ms: default_ack_timeout(),
            max_message_size: default_max_message_size(),
            change_feed_capacity: default_change_feed_capacity(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get lease duration as Duration.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    /// Get expiry sweep interval as Duration.
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    /// Get acknowledgement timeout as Duration.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Connection options derived from this configuration.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_message_size: self.max_message_size,
            ack_timeout: self.ack_timeout(),
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registration_port == 0 || self.discovery_port == 0 {
            return Err(ConfigError::InvalidValue("ports cannot be 0".into()));
        }
        if self.registration_port == self.discovery_port {
            return Err(ConfigError::InvalidValue(
                "registration_port and discovery_port must differ".into(),
            ));
        }
        if self.lease_duration_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "lease_duration_secs cannot be 0".into(),
            ));
        }
        if self.eviction_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "eviction_interval_secs cannot be 0".into(),
            ));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("ack_timeout_ms cannot be 0".into()));
        }
        if self.change_feed_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "change_feed_capacity cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
