//! Configuration file for the Mote CLI.

use std::fs;
use std::path::Path;

use mote_crypto::{AeadAlgorithm, KeyAgreementAlgorithm};
use mote_transport::ChannelConfig;
use serde::{Deserialize, Serialize};

/// Mote CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Datagram channel configuration
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Security-context parameters
    #[serde(default)]
    pub security: SecurityConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Security-context parameters, byte strings hex-encoded
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Master secret (hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_secret: Option<String>,
    /// Sender identifier (hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Recipient identifier (hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    /// Master salt (hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    /// AEAD algorithm
    #[serde(default)]
    pub aead: AeadAlgorithm,
    /// Key-agreement algorithm selecting the HKDF hash
    #[serde(default)]
    pub key_agreement: KeyAgreementAlgorithm,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.channel.validate()?;

        let hex_fields = [
            ("master_secret", &self.security.master_secret),
            ("sender_id", &self.security.sender_id),
            ("recipient_id", &self.security.recipient_id),
            ("salt", &self.security.salt),
        ];
        for (name, value) in hex_fields {
            if let Some(value) = value {
                hex::decode(value)
                    .map_err(|e| anyhow::anyhow!("security.{name} is not valid hex: {e}"))?;
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
