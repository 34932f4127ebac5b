//! Leveled logging sink shared by the engines, the dispatcher and the host.
//!
//! Components never call `tracing` directly; they hold an
//! `Arc<dyn Logger>` so embedders can redirect or silence them.
//! [`TracingLogger`] is the default and forwards to `tracing`.

use std::{fmt, sync::Arc};
pub use tracing::Level;

pub trait Logger: Send + Sync {
    fn log(&self, level: Level, args: fmt::Arguments<'_>);

    #[inline]
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, args)
    }

    #[inline]
    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::INFO, args)
    }

    #[inline]
    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::WARN, args)
    }

    #[inline]
    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::ERROR, args)
    }
}

/// Forwards every record to `tracing`, tagged with a `component` field.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    component: &'static str,
}

impl TracingLogger {
    pub const fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn shared(component: &'static str) -> Arc<dyn Logger> {
        Arc::new(Self::new(component))
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("trio_http")
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let component = self.component;
        match level {
            Level::ERROR => tracing::error!(component, "{}", args),
            Level::WARN => tracing::warn!(component, "{}", args),
            Level::INFO => tracing::info!(component, "{}", args),
            Level::DEBUG => tracing::debug!(component, "{}", args),
            _ => tracing::trace!(component, "{}", args),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    #[inline]
    fn log(&self, _: Level, _: fmt::Arguments<'_>) {}
}

/// Installs a `tracing-subscriber` formatter filtered by `RUST_LOG`
/// (default `info`). Does nothing if a global subscriber already exists.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Collects records so tests can assert on what was logged.
    #[derive(Default)]
    pub(crate) struct MemoryLogger {
        pub(crate) records: Mutex<Vec<(Level, String)>>,
    }

    impl MemoryLogger {
        pub(crate) fn contains(&self, level: Level, needle: &str) -> bool {
            self.records
                .lock()
                .unwrap()
                .iter()
                .any(|(l, msg)| *l == level && msg.contains(needle))
        }
    }

    impl Logger for MemoryLogger {
        fn log(&self, level: Level, args: fmt::Arguments<'_>) {
            self.records.lock().unwrap().push((level, args.to_string()));
        }
    }

    #[test]
    fn helpers_route_levels() {
        let logger = MemoryLogger::default();
        logger.debug(format_args!("d {}", 1));
        logger.info(format_args!("i"));
        logger.warn(format_args!("w"));
        logger.error(format_args!("e"));

        #[rustfmt::skip]
        let expected = [
            (Level::DEBUG, "d 1"),
            (Level::INFO,  "i"),
            (Level::WARN,  "w"),
            (Level::ERROR, "e"),
        ];
        for (level, msg) in expected {
            assert!(logger.contains(level, msg), "{level} {msg}");
        }
    }

    #[test]
    fn tracing_logger_does_not_panic_without_subscriber() {
        let logger = TracingLogger::new("test");
        logger.info(format_args!("hello"));
        NullLogger.error(format_args!("ignored"));
    }
}
