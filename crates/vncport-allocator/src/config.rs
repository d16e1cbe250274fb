//! Allocator configuration
//!
//! Supplied once at construction and immutable afterward.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default first port of the range
pub const DEFAULT_PORT_RANGE_START: u16 = 8080;
/// Default last port of the range (inclusive)
pub const DEFAULT_PORT_RANGE_END: u16 = 8180;
/// Default lifetime of an allocation record
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);
/// Longest accepted allocation lifetime (ten years)
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 86_400);
/// Default store key prefix; keys look like "vnc_port:8080"
pub const DEFAULT_KEY_PREFIX: &str = "vnc_port:";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid port range: {0}")]
    InvalidRange(String),

    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    #[error("Invalid key prefix: {0}")]
    InvalidPrefix(String),
}

/// Inclusive port range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Create a range, rejecting port 0 and reversed bounds
    pub fn new(start: u16, end: u16) -> Result<Self, ConfigError> {
        if start == 0 {
            return Err(ConfigError::InvalidRange(
                "port 0 cannot be allocated".to_string(),
            ));
        }
        if start > end {
            return Err(ConfigError::InvalidRange(format!(
                "start {} is greater than end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Check if port is within this range
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Number of allocatable ports, `end - start + 1`
    pub fn capacity(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Ports in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_RANGE_START,
            end: DEFAULT_PORT_RANGE_END,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Parses the "start-end" form used on the command line, e.g. "8080-8180"
impl FromStr for PortRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| ConfigError::InvalidRange(format!("expected START-END, got '{}'", s)))?;

        let start = start
            .trim()
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidRange(format!("bad start port '{}': {}", start, e)))?;
        let end = end
            .trim()
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidRange(format!("bad end port '{}': {}", end, e)))?;

        Self::new(start, end)
    }
}

/// Allocator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub range: PortRange,
    pub ttl: Duration,
    pub key_prefix: String,
}

impl AllocatorConfig {
    /// Default TTL and prefix over the given range
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Check settings that `PortRange::new` cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidTtl(
                "allocations must have a non-zero lifetime".to_string(),
            ));
        }
        if self.ttl > MAX_TTL {
            return Err(ConfigError::InvalidTtl(format!(
                "{}s exceeds the maximum of {}s",
                self.ttl.as_secs(),
                MAX_TTL.as_secs()
            )));
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::InvalidPrefix(
                "key prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Store key for a port
    pub fn key_for(&self, port: u16) -> String {
        format!("{}{}", self.key_prefix, port)
    }

    /// Inverse of [`key_for`](Self::key_for); `None` for foreign or malformed keys
    pub fn port_from_key(&self, key: &str) -> Option<u16> {
        key.strip_prefix(&self.key_prefix)?.parse().ok()
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            range: PortRange::default(),
            ttl: DEFAULT_TTL,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}
