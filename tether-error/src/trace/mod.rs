//! Stack trace capture
//!
//! Every `Error::new` / `Error::wrap` records where it happened. Frames are
//! stored innermost first: the call site that built the error, then its
//! callers. Frames belonging to this crate are never recorded.

mod config;
mod frame;

pub use config::{
    current, set_trace_config, set_trace_config_testing, FrameFormatter, TraceConfig,
    TraceConfigError, TraceConfigGuard, ENV_PACKAGES, ENV_REMOVE_LAMBDAS, ENV_TRIM_RUNTIME,
};
pub use frame::Frame;

/// Symbol prefix of this crate's own frames
const INTERNAL_PREFIX: &str = concat!(env!("CARGO_CRATE_NAME"), "::");

/// Produces frame descriptors for the current call stack.
pub trait StackCapturer: Send + Sync {
    /// Capture the caller's stack, dropping this crate's frames and then
    /// `skip` more, filtered through `config`.
    fn capture(&self, skip: usize, config: &TraceConfig) -> Vec<Frame>;
}

/// `StackCapturer` backed by the `backtrace` crate's symbol resolution
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceCapturer;

impl StackCapturer for BacktraceCapturer {
    #[inline(never)]
    fn capture(&self, skip: usize, config: &TraceConfig) -> Vec<Frame> {
        let bt = backtrace::Backtrace::new();

        let mut frames = Vec::new();
        let mut seen_internal = false;
        let mut passed_internal = false;
        let mut skip = skip;

        for symbol in bt.frames().iter().flat_map(|f| f.symbols()) {
            let Some(name) = symbol.name() else {
                continue;
            };
            let name = format!("{:#}", name);

            if !passed_internal {
                if is_internal(&name) {
                    seen_internal = true;
                    continue;
                }
                // frames of the backtrace machinery itself
                if !seen_internal {
                    continue;
                }
                passed_internal = true;
            }

            if skip > 0 {
                skip -= 1;
                continue;
            }

            let frame = Frame::from_symbol(&name, symbol.filename(), symbol.lineno());
            if config.keeps(&frame) {
                frames.push(frame);
            }
        }

        frames
    }
}

fn is_internal(symbol: &str) -> bool {
    let symbol = symbol.strip_prefix('<').unwrap_or(symbol);
    symbol.starts_with(INTERNAL_PREFIX) && !symbol.contains("::tests::")
}

/// Capture the caller's stack with the process-wide configuration.
///
/// `skip` counts frames above the first frame outside this crate, so a
/// helper that builds errors on behalf of its caller passes `1`.
#[inline(never)]
pub fn capture(skip: usize) -> Vec<Frame> {
    let config = current();
    BacktraceCapturer.capture(skip, &config)
}

/// Render frames with the process-wide configuration
pub fn format_frames(frames: &[Frame]) -> Vec<String> {
    let config = current();
    frames.iter().map(|f| config.format_frame(f)).collect()
}
