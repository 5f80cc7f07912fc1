//! The process-wide logger

use crate::{Entry, Level};
use once_cell::sync::Lazy;
use parking_lot::{const_reentrant_mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::sync::Arc;

/// Receives log entries
pub trait Logger: Send + Sync {
    fn emit(&self, entry: &Entry);
}

/// Forwards entries to `tracing` under the `tether` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn emit(&self, entry: &Entry) {
        let params = entry
            .parameters
            .iter()
            .map(|kv| kv.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        match entry.level {
            Level::Debug => tracing::debug!(target: "tether", params = %params, "{}", entry.message),
            Level::Info => tracing::info!(target: "tether", params = %params, "{}", entry.message),
            Level::Warn => tracing::warn!(target: "tether", params = %params, "{}", entry.message),
            Level::Error => tracing::error!(target: "tether", params = %params, "{}", entry.message),
        }
    }
}

static LOGGER: Lazy<RwLock<Arc<dyn Logger>>> = Lazy::new(|| RwLock::new(Arc::new(TracingLogger)));
static TESTING_LOCK: ReentrantMutex<()> = const_reentrant_mutex(());

/// The installed logger
pub fn logger() -> Arc<dyn Logger> {
    LOGGER.read().clone()
}

/// Replace the process-wide logger
pub fn set_logger(logger: Arc<dyn Logger>) {
    *LOGGER.write() = logger;
}

/// Install a logger for the current test scope, restored on drop
pub fn set_logger_for_testing(logger: Arc<dyn Logger>) -> LoggerGuard {
    let lock = TESTING_LOCK.lock();
    let previous = std::mem::replace(&mut *LOGGER.write(), logger);
    LoggerGuard {
        previous: Some(previous),
        _lock: lock,
    }
}

/// Restores the previous logger on drop
#[must_use = "the logger is restored as soon as the guard drops"]
pub struct LoggerGuard {
    previous: Option<Arc<dyn Logger>>,
    _lock: ReentrantMutexGuard<'static, ()>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *LOGGER.write() = previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tether_error::Error;

    #[derive(Default)]
    struct Recorder {
        entries: Mutex<Vec<Entry>>,
    }

    impl Logger for Recorder {
        fn emit(&self, entry: &Entry) {
            self.entries.lock().push(entry.clone());
        }
    }

    fn to_str(entry: &Entry) -> String {
        let mut s = format!("{},{},", entry.message, entry.level);
        for kv in &entry.parameters {
            s.push_str(&format!("{},{},", kv.key, kv.value));
        }
        s
    }

    #[test]
    fn test_add_logger() {
        let recorder = Arc::new(Recorder::default());
        let _guard = set_logger_for_testing(recorder.clone());

        crate::info("message", [("some", "param")]);
        crate::error(&Error::new("errMsg"));

        let entries = recorder.entries.lock();
        assert_eq!(to_str(&entries[0]), "message,info,some,param,");
        assert_eq!(to_str(&entries[1]), "errMsg,error,");
    }

    #[test]
    fn test_error_with_extra_key_values() {
        let recorder = Arc::new(Recorder::default());
        let _guard = set_logger_for_testing(recorder.clone());

        let err = Error::new("errMsg").with_kv("own", "1");
        crate::error_with(&err, [("09%-_MANYproblems", "hello")]);

        let entries = recorder.entries.lock();
        assert_eq!(to_str(&entries[0]), "errMsg,error,own,1,09%-_MANYproblems,hello,");
    }

    #[test]
    fn test_tracing_logger() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        tracing::subscriber::with_default(subscriber, || {
            TracingLogger.emit(&Entry::new(Level::Warn, "careful").with_parameter("k", "v"));
        });
    }
}
