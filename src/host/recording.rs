use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use serde_json::Value;

use super::{Completion, HostBridge, HostResult, LogLevel};

/// Key that marks a JSON object as standing in for a host-side object.
pub const HOST_PROXY_MARKER: &str = "__host_proxy__";

/// One call observed by [`RecordingHost::invoke`].
#[derive(Debug, Clone)]
pub struct InvokeRecord {
    pub module: String,
    pub method: String,
    pub params: Option<Value>,
    pub completion: Option<Completion>,
}

/// Host that records every call and leaves completions for the caller to
/// settle, in whatever order it likes.
#[derive(Default)]
pub struct RecordingHost {
    invocations: RefCell<Vec<InvokeRecord>>,
    sync_results: RefCell<HashMap<(String, String), Value>>,
    dispatched: RefCell<Vec<(String, Vec<Value>)>>,
    dispatch_reply: RefCell<Option<Value>>,
    prints: RefCell<Vec<(LogLevel, String)>>,
    errors: RefCell<Vec<String>>,
    reloads: Cell<usize>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `module.method` synchronously with `value` from now on.
    pub fn set_sync_result(&self, module: &str, method: &str, value: Value) {
        self.sync_results
            .borrow_mut()
            .insert((module.to_string(), method.to_string()), value);
    }

    pub fn set_dispatch_reply(&self, value: Option<Value>) {
        *self.dispatch_reply.borrow_mut() = value;
    }

    pub fn invocations(&self) -> Vec<InvokeRecord> {
        self.invocations.borrow().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.borrow().len()
    }

    pub fn completion(&self, index: usize) -> Option<Completion> {
        self.invocations
            .borrow()
            .get(index)
            .and_then(|record| record.completion.clone())
    }

    /// Settle the completion of the `index`th recorded call.
    pub fn complete(&self, index: usize, result: HostResult) -> bool {
        match self.completion(index) {
            Some(completion) => completion.complete(result),
            None => false,
        }
    }

    /// Forget every recorded completion without settling it.
    pub fn drop_completions(&self) {
        for record in self.invocations.borrow_mut().iter_mut() {
            record.completion = None;
        }
    }

    pub fn dispatched(&self) -> Vec<(String, Vec<Value>)> {
        self.dispatched.borrow().clone()
    }

    pub fn prints(&self) -> Vec<(LogLevel, String)> {
        self.prints.borrow().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.get()
    }
}

impl HostBridge for RecordingHost {
    fn invoke(
        &self,
        module: &str,
        method: &str,
        params: Option<Value>,
        completion: Option<Completion>,
    ) -> Option<Value> {
        self.invocations.borrow_mut().push(InvokeRecord {
            module: module.to_string(),
            method: method.to_string(),
            params,
            completion,
        });
        self.sync_results
            .borrow()
            .get(&(module.to_string(), method.to_string()))
            .cloned()
    }

    fn dispatch_to_host(&self, event_name: &str, data: Vec<Value>) -> Option<Value> {
        self.dispatched
            .borrow_mut()
            .push((event_name.to_string(), data));
        self.dispatch_reply.borrow().clone()
    }

    fn print(&self, message: &str, level: LogLevel) {
        self.prints.borrow_mut().push((level, message.to_string()));
    }

    fn reload(&self) {
        self.reloads.set(self.reloads.get() + 1);
    }

    fn is_host_proxy(&self, value: &Value) -> bool {
        value
            .get(HOST_PROXY_MARKER)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn on_js_error(&self, message: &str) {
        self.errors.borrow_mut().push(message.to_string());
    }
}
