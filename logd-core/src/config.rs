//! Broker configuration.
//!
//! Every tunable is an explicit field with a builder, and every field can be
//! supplied through a `LOGD_*` environment variable. Timeouts are expressed
//! in milliseconds in the environment and as [`Duration`]s in code.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a logd broker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the server listens on (`LOGD_HOSTPORT`).
    pub hostport: String,
    /// Data directory holding one subdirectory per topic (`LOGD_LOG_FILE`).
    pub log_file: PathBuf,
    /// Maximum size of a partition file in bytes (`LOGD_PARTITION_SIZE`).
    /// A batch that would cross this boundary starts a new partition.
    pub partition_size: u64,
    /// Number of partitions retained per topic (`LOGD_MAX_PARTITIONS`).
    pub max_partitions: u32,
    /// Batches between sparse index entries (`LOGD_INDEX_CURSOR_SIZE`).
    pub index_cursor_size: u64,
    /// Per-request deadline (`LOGD_SERVER_TIMEOUT`, milliseconds).
    pub server_timeout: Duration,
    /// How long to wait for connections to drain on shutdown
    /// (`LOGD_GRACEFUL_SHUTDOWN_TIMEOUT`, milliseconds).
    pub graceful_shutdown_timeout: Duration,
    /// Whether to fsync a partition before rotating to the next one.
    pub sync_on_rotate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostport: "127.0.0.1:1774".to_string(),
            log_file: PathBuf::from("data"),
            partition_size: 1024 * 1024,
            max_partitions: 8,
            index_cursor_size: 100,
            server_timeout: Duration::from_millis(1_000),
            graceful_shutdown_timeout: Duration::from_millis(3_000),
            sync_on_rotate: true,
        }
    }
}

impl Config {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from the `LOGD_*` environment variables,
    /// starting from the defaults for anything unset.
    ///
    /// # Errors
    /// Returns an error if a set variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut conf = Self::default();

        if let Ok(v) = env::var("LOGD_HOSTPORT") {
            conf.hostport = v;
        }
        if let Ok(v) = env::var("LOGD_LOG_FILE") {
            conf.log_file = PathBuf::from(v);
        }
        if let Ok(v) = env::var("LOGD_PARTITION_SIZE") {
            conf.partition_size = parse_var("LOGD_PARTITION_SIZE", &v)?;
        }
        if let Ok(v) = env::var("LOGD_MAX_PARTITIONS") {
            conf.max_partitions = parse_var("LOGD_MAX_PARTITIONS", &v)?;
        }
        if let Ok(v) = env::var("LOGD_INDEX_CURSOR_SIZE") {
            conf.index_cursor_size = parse_var("LOGD_INDEX_CURSOR_SIZE", &v)?;
        }
        if let Ok(v) = env::var("LOGD_SERVER_TIMEOUT") {
            conf.server_timeout = Duration::from_millis(parse_var("LOGD_SERVER_TIMEOUT", &v)?);
        }
        if let Ok(v) = env::var("LOGD_GRACEFUL_SHUTDOWN_TIMEOUT") {
            conf.graceful_shutdown_timeout =
                Duration::from_millis(parse_var("LOGD_GRACEFUL_SHUTDOWN_TIMEOUT", &v)?);
        }

        conf.validate()?;
        Ok(conf)
    }

    /// Sets the listen address.
    #[must_use]
    pub fn with_hostport(mut self, hostport: impl Into<String>) -> Self {
        self.hostport = hostport.into();
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_log_file(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_file = dir.into();
        self
    }

    /// Sets the partition size in bytes.
    #[must_use]
    pub const fn with_partition_size(mut self, size: u64) -> Self {
        self.partition_size = size;
        self
    }

    /// Sets the number of retained partitions.
    #[must_use]
    pub const fn with_max_partitions(mut self, n: u32) -> Self {
        self.max_partitions = n;
        self
    }

    /// Sets the sparse index interval in batches.
    #[must_use]
    pub const fn with_index_cursor_size(mut self, n: u64) -> Self {
        self.index_cursor_size = n;
        self
    }

    /// Sets the per-request deadline.
    #[must_use]
    pub const fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if a bound is zero or otherwise unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "partition_size",
                reason: "must be positive",
            });
        }
        if self.max_partitions == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_partitions",
                reason: "must be positive",
            });
        }
        if self.index_cursor_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "index_cursor_size",
                reason: "must be positive",
            });
        }
        if self.hostport.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "hostport",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    /// Returns the directory holding a topic's partitions.
    #[must_use]
    pub fn topic_dir(&self, topic: &str) -> PathBuf {
        self.log_file.join(topic)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidVar {
        name,
        value: value.to_string(),
    })
}

/// Errors produced while building or validating a [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    InvalidVar {
        /// The variable name.
        name: &'static str,
        /// The raw value.
        value: String,
    },
    /// A field failed validation.
    InvalidValue {
        /// The field name.
        name: &'static str,
        /// Why the value is unusable.
        reason: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVar { name, value } => {
                write!(f, "invalid value for {name}: {value:?}")
            }
            Self::InvalidValue { name, reason } => {
                write!(f, "invalid config field {name}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
