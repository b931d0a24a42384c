//! Logging setup for the worker process.
//!
//! The library crates only emit `tracing` events; this module installs the
//! subscriber that renders them.
//!
//! # Environment Variables
//!
//! - `OFFLOAD_DEBUG=1` - Enable debug logging
//! - `OFFLOAD_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `OFFLOAD_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `OFFLOAD_LOG_COLOR=1|0` - Enable/disable colors
//! - `RUST_LOG` - Full filter directive, overrides the level

use tracing_subscriber::util::TryInitError;

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Get level from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Filter directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_directive())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line, human oriented
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Format {
    /// Get format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false, // JSON output doesn't use colors
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config using an arbitrary variable lookup.
    ///
    /// Unrecognized values fall back to the defaults rather than failing,
    /// so a typo never keeps the worker from starting.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| {
            lookup(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let debug = flag("OFFLOAD_DEBUG").unwrap_or(false);

        let level = lookup("OFFLOAD_LOG_LEVEL")
            .and_then(|s| Level::from_str(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("OFFLOAD_LOG_FORMAT")
            .and_then(|s| Format::from_str(&s))
            .unwrap_or(Format::Json);

        let color = flag("OFFLOAD_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        Self {
            debug,
            level,
            format,
            color,
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG`, when set, takes precedence over the configured level. Fails
/// if a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<(), TryInitError> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        Format::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        Format::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        Format::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}

// ============================================================================
// Tests
// ============================================================================
