//! Log redirection for the engine (`SPEC_FULL.md` §4.13).
//!
//! The engine instruments itself with the `log` facade internally (`debug!`,
//! `trace!`, `warn!`), but the library surface also exposes an explicit
//! `LogSink` so a caller can capture engine diagnostics into its own file
//! descriptor without this crate ever opening syslog itself.

use log::{Level, LevelFilter};

/// A sink for engine-internal diagnostics, set via `Engine::set_log_sink`.
pub trait LogSink: Send {
    /// Called for every message at or above the engine's configured level.
    fn write(&mut self, level: Level, message: &str);
}

/// Default sink: discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&mut self, _level: Level, _message: &str) {}
}

/// Engine-side log configuration: a sink plus the minimum level to forward.
pub struct LogConfig {
    sink: Box<dyn LogSink>,
    level: LevelFilter,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            sink: Box::new(NullSink),
            level: LevelFilter::Warn,
        }
    }
}

impl LogConfig {
    /// Replaces the sink.
    pub fn set_sink(&mut self, sink: impl LogSink + 'static) {
        self.sink = Box::new(sink);
    }

    /// Replaces the minimum forwarded level.
    pub fn set_level(&mut self, level: LevelFilter) {
        self.level = level;
    }

    /// Forwards `message` to the sink if `level` passes the configured filter.
    ///
    /// Also emits through the `log` facade unconditionally, so a process
    /// that installs a global logger sees the same diagnostics regardless
    /// of whether a sink was configured.
    pub fn emit(&mut self, level: Level, message: &str) {
        log::log!(level, "{message}");
        if self.level >= level {
            self.sink.write(level, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct VecSink(Arc<Mutex<Vec<String>>>);
    impl LogSink for VecSink {
        fn write(&mut self, _level: Level, message: &str) {
            self.0.lock().unwrap().push(message.to_owned());
        }
    }

    #[test]
    fn respects_level_filter() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut cfg = LogConfig::default();
        cfg.set_sink(VecSink(captured.clone()));
        cfg.set_level(LevelFilter::Warn);

        cfg.emit(Level::Debug, "should be filtered");
        cfg.emit(Level::Warn, "should pass");

        let lines = captured.lock().unwrap();
        assert_eq!(lines.as_slice(), ["should pass"]);
    }
}
