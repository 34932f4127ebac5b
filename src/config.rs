//! Server and parser configuration
//!
//! # Defaults
//!
//! | Field                       | Default   |
//! |-----------------------------|-----------|
//! | [`ServerConfig::name`]      | `Basic`   |
//! | [`ServerConfig::port`]      | `5000`    |
//! | [`ServerConfig::threads`]   | `0` (one worker per hardware thread) |
//! | [`ServerConfig::capacity`]  | `1024` tasks per worker |
//! | [`ParserLimits::max_body_size`] | `4096` bytes |
//! | [`ParserLimits::max_line_size`] | `8192` bytes |
//!
//! # Examples
//!
//! ```
//! use trio_http::{ServerConfig, ServerKind};
//!
//! let config = ServerConfig {
//!     name: "mayhem".parse().unwrap(),
//!     port: 8080,
//!     ..ServerConfig::default()
//! }
//! .normalized();
//!
//! assert_eq!(config.name, ServerKind::Mayhem);
//! assert!(config.threads > 0);
//! assert!(config.capacity.is_power_of_two());
//! ```

use crate::errors::ServerError;
use std::{fmt, str::FromStr, thread};

/// Largest request body accepted by default.
pub const MAX_BODY_SIZE: usize = 4096;

pub(crate) const DEFAULT_PORT: u16 = 5000;
pub(crate) const DEFAULT_CAPACITY: usize = 1024;

/// Which connection engine a [`ServerConfig`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerKind {
    /// One thread accepts, parses and dispatches every connection in turn.
    #[default]
    Basic,
    /// One thread accepts; parsing and dispatch run on the worker pool.
    Threaded,
    /// Readiness-driven accept and incremental parsing; dispatch on the worker pool.
    Mayhem,
}

impl ServerKind {
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServerKind::Basic => "Basic",
            ServerKind::Threaded => "Threaded",
            ServerKind::Mayhem => "Mayhem",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            b if b.eq_ignore_ascii_case(b"basic") => Ok(ServerKind::Basic),
            b if b.eq_ignore_ascii_case(b"threaded") => Ok(ServerKind::Threaded),
            b if b.eq_ignore_ascii_case(b"mayhem") => Ok(ServerKind::Mayhem),
            _ => Err(ServerError::UnknownKind(s.to_owned())),
        }
    }
}

/// Settings a connection engine is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Engine variant.
    pub name: ServerKind,
    /// Listen port; `0` lets the OS pick one.
    pub port: u16,
    /// Worker threads; `0` means [`thread::available_parallelism`].
    pub threads: usize,
    /// Per-worker queue capacity, rounded up to a power of two.
    pub capacity: usize,
}

impl Default for ServerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            name: ServerKind::Basic,
            port: DEFAULT_PORT,
            threads: 0,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Resolves `threads == 0` and rounds `capacity` to a power of two.
    pub fn normalized(mut self) -> Self {
        if self.threads == 0 {
            self.threads = thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
        }
        self.capacity = match self.capacity {
            0 => DEFAULT_CAPACITY,
            n => make_power_of_two(n),
        };
        self
    }
}

/// Size ceilings applied while parsing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    /// Requests declaring a larger `Content-Length` are rejected before
    /// any body byte is read.
    pub max_body_size: usize,
    /// Longest start line or header line accepted, not counting its CRLF.
    pub max_line_size: usize,
}

impl Default for ParserLimits {
    #[inline]
    fn default() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
            max_line_size: 8192,
        }
    }
}

/// Smallest power of two that is `>= n`; `0` maps to `1`.
#[inline]
pub const fn make_power_of_two(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    match n.checked_next_power_of_two() {
        Some(p) => p,
        None => 1 << (usize::BITS - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two() {
        #[rustfmt::skip]
        let cases = [
            (0, 1), (1, 1), (2, 2), (3, 4),
            (5, 8), (1000, 1024), (1024, 1024), (1025, 2048),
        ];

        for (n, expected) in cases {
            assert_eq!(make_power_of_two(n), expected, "n = {n}");
        }
    }

    #[test]
    fn kind_from_str() {
        #[rustfmt::skip]
        let cases = [
            ("Basic",    Some(ServerKind::Basic)),
            ("threaded", Some(ServerKind::Threaded)),
            ("MAYHEM",   Some(ServerKind::Mayhem)),
            ("epoll",    None),
            ("",         None),
        ];

        for (name, expected) in cases {
            assert_eq!(name.parse::<ServerKind>().ok(), expected, "{name:?}");
        }
    }

    #[test]
    fn normalized() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.name, ServerKind::Basic);

        let config = ServerConfig { capacity: 0, ..config }.normalized();
        assert!(config.threads >= 1);
        assert_eq!(config.capacity, 1024);

        let config = ServerConfig { threads: 3, capacity: 100, ..config }.normalized();
        assert_eq!(config.threads, 3);
        assert_eq!(config.capacity, 128);
    }
}
