//! Process-wide log sink for the connection supervisor.
//!
//! This is the always-compiled-in mechanism the crate uses to surface
//! connection lifecycle events (connect attempts, disconnects, reconnect
//! scheduling, heartbeat timeouts, close timeouts) to whatever an
//! application already logs to. It is deliberately independent of the
//! optional `tracing` feature (see [`crate::ws`] call sites gated on
//! `#[cfg(feature = "tracing")]`): the sink below is the one mechanism every
//! consumer gets regardless of which instrumentation crates they use.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, OnceLock};

/// A process-wide log adapter: receives one pre-formatted line per call.
pub type LogAdapter = Box<dyn Fn(&str) + Send + Sync + 'static>;

struct Sink {
    enabled: bool,
    adapter: Option<LogAdapter>,
}

static SINK: OnceLock<Mutex<Sink>> = OnceLock::new();

fn sink() -> &'static Mutex<Sink> {
    SINK.get_or_init(|| {
        Mutex::new(Sink {
            enabled: false,
            adapter: None,
        })
    })
}

/// Initialize the process-wide log sink.
///
/// Safe to call multiple times from anywhere in the process; the most
/// recent call wins. When `log_adapter` is `None` and logging is enabled,
/// emitted lines go to stdout.
pub fn init(enable_logging: bool, log_adapter: Option<LogAdapter>) {
    let mut guard = match sink().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.enabled = enable_logging;
    guard.adapter = log_adapter;
}

/// Emit one line through the configured sink, composing the crate's tag and
/// a timestamp. Never panics and never blocks the caller on a misbehaving
/// adapter: a poisoned lock or a panicking adapter are both swallowed,
/// because a logging misconfiguration must never corrupt Supervisor state.
pub fn emit(message: impl fmt::Display) {
    let guard = match sink().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if !guard.enabled {
        return;
    }

    let line = format!(
        "[ws-supervisor] {} {message}",
        chrono::Utc::now().to_rfc3339()
    );

    let result = match &guard.adapter {
        Some(adapter) => panic::catch_unwind(AssertUnwindSafe(|| adapter(&line))),
        None => panic::catch_unwind(AssertUnwindSafe(|| println!("{line}"))),
    };
    drop(result);
}
