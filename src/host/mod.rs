//! Contracts the bridge consumes from the embedding host.
//!
//! The host owns every real resource. The bridge only talks to it through
//! [`HostBridge`], and the host answers asynchronous calls by settling the
//! [`Completion`] it was handed.

mod loopback;
mod recording;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostError;

pub use loopback::LoopbackHost;
pub use recording::{InvokeRecord, RecordingHost, HOST_PROXY_MARKER};

pub type HostResult = Result<Value, HostError>;

/// Severity attached to `print`; ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse the optional level string of `print`. Unknown values map to `Log`.
    pub fn parse(level: Option<&str>) -> Self {
        match level.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("debug") => LogLevel::Debug,
            Some("info") => LogLevel::Info,
            Some("warn") | Some("warning") => LogLevel::Warn,
            Some("error") => LogLevel::Error,
            _ => LogLevel::Log,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Log
    }
}

/// The native side of the bridge.
///
/// All methods are called on the single bridge thread. Implementations must
/// not call back into the bridge from inside these methods; replies travel
/// through [`Completion`] or later host-initiated deliveries.
pub trait HostBridge {
    /// Invoke `module.method`. A synchronous answer is returned directly.
    /// Asynchronous answers, and every failure, go through `completion`,
    /// which must be settled exactly once for every accepted call.
    fn invoke(
        &self,
        module: &str,
        method: &str,
        params: Option<Value>,
        completion: Option<Completion>,
    ) -> Option<Value>;

    /// Forward a named event raised by the bridge's dispatcher.
    fn dispatch_to_host(&self, event_name: &str, data: Vec<Value>) -> Option<Value>;

    fn print(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "mercury", message = %message),
            LogLevel::Log | LogLevel::Info => tracing::info!(target: "mercury", message = %message),
            LogLevel::Warn => tracing::warn!(target: "mercury", message = %message),
            LogLevel::Error => tracing::error!(target: "mercury", message = %message),
        }
    }

    fn reload(&self) {
        tracing::info!(target: "mercury", "reload requested; host does not support reloading");
    }

    fn is_host_proxy(&self, _value: &Value) -> bool {
        false
    }

    /// An uncaught error escaped a listener or completion callback.
    fn on_js_error(&self, message: &str) {
        tracing::error!(target: "mercury", error = %message, "uncaught error in bridge callback");
    }
}

type Settle = Box<dyn FnOnce(HostResult)>;

enum CompletionState {
    Pending(Settle),
    Settled,
}

struct CompletionInner {
    module: String,
    method: String,
    state: RefCell<CompletionState>,
}

/// Single-settlement continuation for one host call.
///
/// Clones share the same state; whichever clone settles first wins and every
/// later attempt is ignored.
#[derive(Clone)]
pub struct Completion {
    inner: Rc<CompletionInner>,
}

impl Completion {
    pub fn new(
        module: impl Into<String>,
        method: impl Into<String>,
        settle: impl FnOnce(HostResult) + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(CompletionInner {
                module: module.into(),
                method: method.into(),
                state: RefCell::new(CompletionState::Pending(Box::new(settle))),
            }),
        }
    }

    pub fn module(&self) -> &str {
        &self.inner.module
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.inner.state.borrow(), CompletionState::Settled)
    }

    /// Settle the call. Returns `false` if it was already settled.
    pub fn complete(&self, result: HostResult) -> bool {
        let previous =
            std::mem::replace(&mut *self.inner.state.borrow_mut(), CompletionState::Settled);
        match previous {
            CompletionState::Pending(settle) => {
                settle(result);
                true
            }
            CompletionState::Settled => {
                tracing::warn!(
                    target: "mercury",
                    module = %self.inner.module,
                    method = %self.inner.method,
                    "ignoring repeated completion"
                );
                false
            }
        }
    }

    pub fn resolve(&self, data: Value) -> bool {
        self.complete(Ok(data))
    }

    pub fn reject(&self, error: HostError) -> bool {
        self.complete(Err(error))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("module", &self.inner.module)
            .field("method", &self.inner.method)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;

    #[test]
    fn first_settlement_wins() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let completion = Completion::new("MethodChannel", "invokeMethod", move |result| {
            sink.borrow_mut().push(result);
        });
        let duplicate = completion.clone();

        assert!(completion.resolve(json!(1)));
        assert!(!duplicate.reject(HostError::new("late")));
        assert!(!completion.resolve(json!(2)));

        assert_eq!(*seen.borrow(), vec![Ok(json!(1))]);
        assert!(duplicate.is_settled());
    }

    #[test]
    fn dropping_unsettled_completion_never_fires() {
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let completion = Completion::new("Timer", "wait", move |_| flag.set(true));
        drop(completion);
        assert!(!fired.get());
    }

    #[test]
    fn parses_levels() {
        assert_eq!(LogLevel::parse(None), LogLevel::Log);
        assert_eq!(LogLevel::parse(Some("WARN")), LogLevel::Warn);
        assert_eq!(LogLevel::parse(Some("verbose")), LogLevel::Log);
        assert!(LogLevel::Debug < LogLevel::Error);
    }
}
