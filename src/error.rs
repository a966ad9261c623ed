//! Error types for selector-router
//!
//! This module defines the error hierarchy for outbound selection and
//! provider synchronization. Errors are grouped by subsystem and carry
//! a recoverability hint.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for selector-router
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Outbound connection errors
    #[error("Outbound error: {0}")]
    Outbound(#[from] OutboundError),

    /// Provider construction and reload errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Selector construction and resolution errors
    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    /// Persisted selection store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Connection handling errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RouterError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Outbound(e) => e.is_recoverable(),
            Self::Provider(e) => e.is_recoverable(),
            Self::Selector(e) => e.is_recoverable(),
            Self::Store(e) => e.is_recoverable(),
            Self::Connection(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Outbound connection errors
#[derive(Debug, Error)]
pub enum OutboundError {
    /// Connection failed
    #[error("Failed to connect to {addr}: {reason}")]
    ConnectionFailed { addr: SocketAddr, reason: String },

    /// Connection timeout
    #[error("Connection to {addr} timed out after {timeout_ms}ms")]
    Timeout { addr: SocketAddr, timeout_ms: u64 },

    /// Outbound not found
    #[error("Outbound not found: {tag}")]
    NotFound { tag: String },

    /// Outbound refuses the request (blocked, nothing selected, no UDP)
    #[error("Outbound {tag} is unavailable: {reason}")]
    Unavailable { tag: String, reason: String },

    /// Failed to set socket option (SO_MARK, bind)
    #[error("Failed to set outbound socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Unsupported outbound type in a configuration record
    #[error("Unsupported outbound type: {0}")]
    UnsupportedType(String),

    /// I/O error during connection
    #[error("Outbound I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl OutboundError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::NotFound { .. } => false,
            Self::Unavailable { .. } => true,
            Self::SocketOption { .. } => false,
            Self::UnsupportedType(_) => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(tag: impl Into<String>) -> Self {
        Self::NotFound { tag: tag.into() }
    }

    /// Create an unavailable error
    pub fn unavailable(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider tag is empty
    #[error("provider tag is required")]
    MissingTag,

    /// Local provider path is empty
    #[error("provider path is required")]
    MissingPath,

    /// No factory registered for the type name
    #[error("Unknown provider type: {0}")]
    UnknownType(String),

    /// Options could not be decoded into the typed options struct
    #[error("Invalid options for {provider_type} provider {tag}: {reason}")]
    InvalidOptions {
        provider_type: String,
        tag: String,
        reason: String,
    },

    /// Provider source could not be read
    #[error("Failed to read provider source {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Subscription content could not be parsed
    #[error("Failed to parse subscription: {0}")]
    Parse(String),

    /// Filesystem watcher error
    #[error("Watch error: {0}")]
    Watch(String),

    /// Provider not registered
    #[error("Provider not found: {0}")]
    NotFound(String),

    /// No latency probe configured
    #[error("Health check is not available for provider {0}")]
    HealthCheckUnavailable(String),

    /// Outbound construction failed
    #[error("Provider outbound error: {0}")]
    Outbound(#[from] OutboundError),
}

impl ProviderError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::MissingTag
            | Self::MissingPath
            | Self::UnknownType(_)
            | Self::InvalidOptions { .. }
            | Self::HealthCheckUnavailable(_) => false,
            Self::Read { .. } | Self::Parse(_) | Self::Watch(_) => true,
            Self::NotFound(_) => false,
            Self::Outbound(e) => e.is_recoverable(),
        }
    }

    /// Create a read error
    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

/// Selector errors
#[derive(Debug, Error)]
pub enum SelectorError {
    /// Include/exclude pattern failed to compile
    #[error("Invalid {kind} pattern {pattern:?}: {reason}")]
    InvalidPattern {
        kind: &'static str,
        pattern: String,
        reason: String,
    },

    /// Neither static outbounds nor providers configured
    #[error("missing outbound and provider tags")]
    MissingTags,

    /// Static outbound tag did not resolve
    #[error("outbound {index} not found: {tag}")]
    OutboundNotFound { index: usize, tag: String },

    /// Default outbound is not among the candidates
    #[error("default outbound not found: {0}")]
    DefaultNotFound(String),

    /// Provider is not bound to this selector
    #[error("outbound provider not found: {0}")]
    ProviderNotBound(String),

    /// Candidate set is empty and the fallback outbound is not registered
    #[error("no candidates and fallback outbound {0} is not registered")]
    FallbackMissing(String),

    /// Selector has not been started
    #[error("selector {0} has not been started")]
    NotStarted(String),

    /// No selector registered under the tag
    #[error("selector not found: {0}")]
    NotFound(String),

    /// Selectors depend on each other in a loop
    #[error("dependency cycle among selectors: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}

impl SelectorError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ProviderNotBound(_) | Self::NotStarted(_))
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(kind: &'static str, pattern: &str, err: &regex::Error) -> Self {
        Self::InvalidPattern {
            kind,
            pattern: pattern.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Persisted selection store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error reading or writing the store
    #[error("Store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Store content could not be (de)serialized
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            Self::Serialization(_) => false,
        }
    }

    /// Create an I/O error
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Connection handling errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection was closed
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// Upstream dial failed
    #[error("Upstream dial failed: {0}")]
    Dial(#[from] OutboundError),

    /// Data transfer error
    #[error("Data transfer error: {0}")]
    TransferError(String),

    /// Connection was torn down by a selection change
    #[error("Connection interrupted by outbound switch")]
    Interrupted,

    /// I/O error
    #[error("Connection I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ConnectionError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Closed { .. } => false,
            Self::Dial(e) => e.is_recoverable(),
            Self::TransferError(_) => false,
            Self::Interrupted => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a closed error
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    /// Create a transfer error
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::TransferError(msg.into())
    }
}

/// Type alias for Result with `RouterError`
pub type Result<T> = std::result::Result<T, RouterError>;
