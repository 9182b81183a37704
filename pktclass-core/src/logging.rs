//! Structured logging: a terminal decorator feeding a full formatter,
//! filtered by `RUST_LOG`, drained asynchronously.
//!
//! There is no process-wide global logger: callers build one with
//! [`root_logger`] and pass it down explicitly.

use slog::{o, Drain};

/// Build a root logger whose verbosity is controlled by `RUST_LOG`
/// (`slog_envlogger`'s filter syntax), formatted for a terminal, and
/// dispatched off the calling thread (`slog_async`) so logging never blocks
/// the build/search hot path.
pub fn root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let term = slog_term::FullFormat::new(decorator).build().fuse();
    let filtered = slog_envlogger::new(term);
    let async_drain = slog_async::Async::new(filtered).build().fuse();
    slog::Logger::root(async_drain, o!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::info;

    #[test]
    fn root_logger_accepts_log_calls() {
        let log = root_logger();
        info!(log, "smoke test"; "phase" => "logging");
    }
}
