//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is built in three layers, later layers winning:
//!
//! 1. [`BridgeConfig::default`]
//! 2. an optional TOML file, parsed into a [`FileConfig`]
//! 3. command-line flags and `SOCKRPC_*` environment variables (see `main.rs`)
//!
//! # TOML example
//!
//! ```toml
//! bind_addr = "127.0.0.1:24810"
//! namespace = "/rpc"
//! connection_message_timeout_secs = 5
//! auth_token = "s3cret"
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default time a new socket has to send its connection message.
pub const DEFAULT_CONNECTION_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default namespace the WebSocket transport is mounted under.
pub const DEFAULT_NAMESPACE: &str = "/rpc";

/// Error type for configuration parsing and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed correctly but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use sockrpc_bridge::domain::BridgeConfig;
/// use std::time::Duration;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.connection_message_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Address the WebSocket transport listens on.
    pub bind_addr: SocketAddr,

    /// Mount path the transport accepts upgrades under.  Normalized by the
    /// transport, so `"rpc/"` and `"/rpc"` are equivalent.
    pub namespace: String,

    /// How long a newly accepted socket may take to send its connection
    /// message before it is closed.
    pub connection_message_timeout: Duration,

    /// Token the demo backend expects as `authorization: Bearer <token>`.
    /// `None` admits every connection.
    pub auth_token: Option<String>,
}

impl Default for BridgeConfig {
    /// | Field                        | Default          |
    /// |------------------------------|------------------|
    /// | bind_addr                    | `0.0.0.0:24810`  |
    /// | namespace                    | `/rpc`           |
    /// | connection_message_timeout   | 10 seconds       |
    /// | auth_token                   | none             |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 24810)),
            namespace: DEFAULT_NAMESPACE.to_string(),
            connection_message_timeout: DEFAULT_CONNECTION_MESSAGE_TIMEOUT,
            auth_token: None,
        }
    }
}

impl BridgeConfig {
    /// Overlays every value present in `file` onto `self`.
    pub fn with_file(mut self, file: FileConfig) -> Self {
        if let Some(addr) = file.bind_addr {
            self.bind_addr = addr;
        }
        if let Some(namespace) = file.namespace {
            self.namespace = namespace;
        }
        if let Some(secs) = file.connection_message_timeout_secs {
            self.connection_message_timeout = Duration::from_secs(secs);
        }
        if file.auth_token.is_some() {
            self.auth_token = file.auth_token;
        }
        self
    }

    /// Checks values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero connection-message timeout
    /// or an empty auth token.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_message_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connection message timeout must be greater than zero".to_string(),
            ));
        }
        if matches!(self.auth_token.as_deref(), Some("")) {
            return Err(ConfigError::Invalid(
                "auth token must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// The on-disk form of [`BridgeConfig`]; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<SocketAddr>,
    pub namespace: Option<String>,
    pub connection_message_timeout_secs: Option<u64>,
    pub auth_token: Option<String>,
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML, unknown keys, or
    /// values of the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_connection_message_timeout_is_10s() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.connection_message_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_default_bind_port_is_24810() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.bind_addr.port(), 24810);
    }

    #[test]
    fn test_default_namespace_and_no_token() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.namespace, "/rpc");
        assert!(cfg.auth_token.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_file_config_full() {
        // Arrange
        let text = r#"
            bind_addr = "127.0.0.1:9000"
            namespace = "api/socket"
            connection_message_timeout_secs = 3
            auth_token = "s3cret"
        "#;

        // Act
        let file = FileConfig::from_toml_str(text).unwrap();
        let cfg = BridgeConfig::default().with_file(file);

        // Assert
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(cfg.namespace, "api/socket");
        assert_eq!(cfg.connection_message_timeout, Duration::from_secs(3));
        assert_eq!(cfg.auth_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_file_config_partial_keeps_defaults() {
        let file = FileConfig::from_toml_str("connection_message_timeout_secs = 30").unwrap();
        let cfg = BridgeConfig::default().with_file(file);
        assert_eq!(cfg.connection_message_timeout, Duration::from_secs(30));
        assert_eq!(cfg.bind_addr.port(), 24810);
        assert_eq!(cfg.namespace, "/rpc");
    }

    #[test]
    fn test_empty_file_config_changes_nothing() {
        let file = FileConfig::from_toml_str("").unwrap();
        assert_eq!(BridgeConfig::default().with_file(file), BridgeConfig::default());
    }

    #[test]
    fn test_file_config_rejects_unknown_keys() {
        let err = FileConfig::from_toml_str("ping_interval = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_file_config_rejects_bad_address() {
        assert!(FileConfig::from_toml_str(r#"bind_addr = "not-an-addr""#).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let cfg = BridgeConfig {
            connection_message_timeout: Duration::ZERO,
            ..BridgeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_token() {
        let cfg = BridgeConfig {
            auth_token: Some(String::new()),
            ..BridgeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
