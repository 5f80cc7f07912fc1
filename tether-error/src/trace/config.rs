//! Process-wide trace configuration
//!
//! The configuration is written once at startup (or overridden inside a test
//! scope) and read by every capture afterwards. Frame formatting has to stay
//! stable for the lifetime of the process, so the first capture freezes it.

use crate::trace::Frame;
use once_cell::sync::Lazy;
use parking_lot::{const_reentrant_mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::fmt;
use std::sync::Arc;

/// Custom per-frame renderer
pub type FrameFormatter = Arc<dyn Fn(&Frame) -> String + Send + Sync>;

/// Environment variable holding a comma separated package allow-list
pub const ENV_PACKAGES: &str = "TETHER_TRACE_PACKAGES";
/// Environment variable toggling `remove_lambdas`
pub const ENV_REMOVE_LAMBDAS: &str = "TETHER_TRACE_REMOVE_LAMBDAS";
/// Environment variable toggling `trim_runtime`
pub const ENV_TRIM_RUNTIME: &str = "TETHER_TRACE_TRIM_RUNTIME";

/// Package prefixes treated as runtime/framework internals
const RUNTIME_PACKAGES: &[&str] = &[
    "std",
    "core",
    "alloc",
    "backtrace",
    "test",
    "tokio",
    "futures_util",
    "futures_core",
    "futures_executor",
    "async_stream",
];

/// Filters and formatting applied to every captured stack trace.
#[derive(Clone)]
pub struct TraceConfig {
    /// Drop closure and async-body frames
    pub remove_lambdas: bool,
    /// When non-empty, only frames in these packages (or nested ones) are kept
    pub packages_shown: Vec<String>,
    /// Drop std, runtime and test-harness frames
    pub trim_runtime: bool,
    /// Custom renderer; `Frame`'s `Display` is used when unset
    pub format: Option<FrameFormatter>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            remove_lambdas: false,
            packages_shown: Vec::new(),
            trim_runtime: true,
            format: None,
        }
    }
}

impl TraceConfig {
    /// Same as `TraceConfig::default()`
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic configuration for golden-output tests.
    ///
    /// Frames render as `"<file> <function>"` without line numbers.
    pub fn testing() -> Self {
        Self {
            remove_lambdas: true,
            packages_shown: Vec::new(),
            trim_runtime: true,
            format: Some(Arc::new(|frame: &Frame| {
                format!("{} {}", frame.file, frame.function)
            })),
        }
    }

    /// Default configuration overridden by `TETHER_TRACE_*` variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(packages) = std::env::var(ENV_PACKAGES) {
            config.packages_shown = packages
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(flag) = env_flag(ENV_REMOVE_LAMBDAS) {
            config.remove_lambdas = flag;
        }
        if let Some(flag) = env_flag(ENV_TRIM_RUNTIME) {
            config.trim_runtime = flag;
        }
        config
    }

    /// Drop closure and async-body frames
    pub fn with_remove_lambdas(mut self, remove: bool) -> Self {
        self.remove_lambdas = remove;
        self
    }

    /// Keep only frames in these packages or below them; empty keeps all
    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages_shown = packages.into_iter().map(Into::into).collect();
        self
    }

    /// Drop std, runtime and test-harness frames
    pub fn with_trim_runtime(mut self, trim: bool) -> Self {
        self.trim_runtime = trim;
        self
    }

    /// Render frames with `format` instead of the default layout
    pub fn with_format<F>(mut self, format: F) -> Self
    where
        F: Fn(&Frame) -> String + Send + Sync + 'static,
    {
        self.format = Some(Arc::new(format));
        self
    }

    /// Render one frame
    pub fn format_frame(&self, frame: &Frame) -> String {
        match &self.format {
            Some(format) => format(frame),
            None => frame.to_string(),
        }
    }

    /// Whether a captured frame survives the filters
    pub fn keeps(&self, frame: &Frame) -> bool {
        if self.remove_lambdas && frame.is_lambda() {
            return false;
        }
        if self.trim_runtime && is_runtime(frame) {
            return false;
        }
        if !self.packages_shown.is_empty() {
            return self
                .packages_shown
                .iter()
                .any(|p| in_package(&frame.package, p));
        }
        true
    }
}

impl fmt::Debug for TraceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceConfig")
            .field("remove_lambdas", &self.remove_lambdas)
            .field("packages_shown", &self.packages_shown)
            .field("trim_runtime", &self.trim_runtime)
            .field("format", &self.format.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn in_package(package: &str, prefix: &str) -> bool {
    package == prefix
        || (package.starts_with(prefix) && package[prefix.len()..].starts_with("::"))
}

fn is_runtime(frame: &Frame) -> bool {
    if frame.function.starts_with("__rust") || frame.function.starts_with("rust_") {
        return true;
    }
    RUNTIME_PACKAGES.iter().any(|p| in_package(&frame.package, p))
}

// =============================================================================
// Process-wide state
// =============================================================================

/// Misuse of the trace configuration surface.
///
/// These are programmer errors: the configuration is meant to be set once,
/// before the first error is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceConfigError {
    #[error("trace config already set")]
    AlreadySet,
    #[error("trace config set after stack traces were already captured")]
    AlreadyCaptured,
}

#[derive(Clone)]
struct State {
    config: Arc<TraceConfig>,
    set: bool,
    frozen: bool,
}

static STATE: Lazy<RwLock<State>> = Lazy::new(|| {
    RwLock::new(State {
        config: Arc::new(TraceConfig::default()),
        set: false,
        frozen: false,
    })
});

static TESTING_LOCK: ReentrantMutex<()> = const_reentrant_mutex(());

/// Install the process-wide configuration.
///
/// Fails if a configuration was already installed, or if a stack trace has
/// already been captured with the defaults.
pub fn set_trace_config(config: TraceConfig) -> Result<(), TraceConfigError> {
    let mut state = STATE.write();
    if state.set {
        return Err(TraceConfigError::AlreadySet);
    }
    if state.frozen {
        return Err(TraceConfigError::AlreadyCaptured);
    }
    state.config = Arc::new(config);
    state.set = true;
    Ok(())
}

/// Override the configuration for the current test scope.
///
/// The previous configuration is restored when the guard drops. Concurrent
/// overrides from other threads block until the guard is released.
pub fn set_trace_config_testing(config: TraceConfig) -> TraceConfigGuard {
    let lock = TESTING_LOCK.lock();
    let mut state = STATE.write();
    let previous = state.clone();
    state.config = Arc::new(config);
    TraceConfigGuard {
        previous: Some(previous),
        _lock: lock,
    }
}

/// Restores the previous trace configuration on drop
#[must_use = "the configuration is restored as soon as the guard drops"]
pub struct TraceConfigGuard {
    previous: Option<State>,
    _lock: ReentrantMutexGuard<'static, ()>,
}

impl Drop for TraceConfigGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let mut state = STATE.write();
            let frozen = state.frozen;
            *state = previous;
            state.frozen |= frozen;
        }
    }
}

/// Snapshot of the active configuration; freezes it for the process.
pub fn current() -> Arc<TraceConfig> {
    {
        let state = STATE.read();
        if state.frozen {
            return state.config.clone();
        }
    }
    let mut state = STATE.write();
    state.frozen = true;
    state.config.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(package: &str, function: &str) -> Frame {
        Frame::new(package, function, "lib.rs", 1)
    }

    #[test]
    fn test_default_trims_runtime() {
        let config = TraceConfig::default();
        assert!(!config.keeps(&frame("std::rt", "lang_start")));
        assert!(!config.keeps(&frame("core::ops::function", "FnOnce::call_once")));
        assert!(!config.keeps(&frame("tokio::runtime", "block_on")));
        assert!(config.keeps(&frame("my_app", "main")));
        assert!(config.keeps(&frame("my_app", "run::{{closure}}")));
    }

    #[test]
    fn test_packages_shown() {
        let config = TraceConfig::new().with_packages(["my_app"]);
        assert!(config.keeps(&frame("my_app", "main")));
        assert!(config.keeps(&frame("my_app::store", "get")));
        assert!(!config.keeps(&frame("my_application", "main")));
        assert!(!config.keeps(&frame("other", "main")));
    }

    #[test]
    fn test_remove_lambdas() {
        let config = TraceConfig::new().with_remove_lambdas(true);
        assert!(!config.keeps(&frame("my_app", "run::{{closure}}")));
        assert!(config.keeps(&frame("my_app", "run")));
    }

    #[test]
    fn test_format_frame() {
        let f = frame("my_app::store", "Store::get");
        assert_eq!(TraceConfig::default().format_frame(&f), "lib.rs:1 my_app::store::Store::get");
        assert_eq!(TraceConfig::testing().format_frame(&f), "lib.rs Store::get");

        let custom = TraceConfig::new().with_format(|f| f.function.to_uppercase());
        assert_eq!(custom.format_frame(&f), "STORE::GET");
    }

    #[test]
    fn test_testing_override_restores() {
        let _outer = set_trace_config_testing(TraceConfig::default());
        let before = current();
        {
            let _guard = set_trace_config_testing(TraceConfig::testing().with_packages(["x"]));
            assert_eq!(current().packages_shown, vec!["x".to_string()]);
            {
                let _nested = set_trace_config_testing(TraceConfig::testing().with_packages(["y"]));
                assert_eq!(current().packages_shown, vec!["y".to_string()]);
            }
            assert_eq!(current().packages_shown, vec!["x".to_string()]);
        }
        assert_eq!(current().packages_shown, before.packages_shown);
    }

    #[test]
    fn test_env_flag_parsing() {
        std::env::set_var("TETHER_TEST_FLAG_ON", "Yes");
        std::env::set_var("TETHER_TEST_FLAG_OFF", "0");
        std::env::set_var("TETHER_TEST_FLAG_BAD", "maybe");
        assert_eq!(env_flag("TETHER_TEST_FLAG_ON"), Some(true));
        assert_eq!(env_flag("TETHER_TEST_FLAG_OFF"), Some(false));
        assert_eq!(env_flag("TETHER_TEST_FLAG_BAD"), None);
        assert_eq!(env_flag("TETHER_TEST_FLAG_MISSING"), None);
    }
}
