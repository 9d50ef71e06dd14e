use std::cell::RefCell;
use std::collections::VecDeque;

use serde_json::{json, Value};

use super::{Completion, HostBridge, HostResult};
use crate::error::HostError;
use crate::method_channel::{INVOKE_METHOD, METHOD_CHANNEL_MODULE};

/// In-process host that echoes method-channel calls back to the caller.
///
/// Replies are queued and only settled by [`LoopbackHost::flush`], so callers
/// observe the same asynchronous shape a real host produces.
#[derive(Default)]
pub struct LoopbackHost {
    queued: RefCell<VecDeque<(Completion, HostResult)>>,
}

impl LoopbackHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        !self.queued.borrow().is_empty()
    }

    /// Settle every queued reply. Returns how many were settled.
    pub fn flush(&self) -> usize {
        let drained: Vec<_> = self.queued.borrow_mut().drain(..).collect();
        let count = drained.len();
        for (completion, result) in drained {
            completion.complete(result);
        }
        count
    }

    fn reply(module: &str, method: &str, params: Option<Value>) -> HostResult {
        if module != METHOD_CHANNEL_MODULE || method != INVOKE_METHOD {
            return Err(HostError::new(format!("no host module handles {module}.{method}"))
                .with_code("ENOMODULE"));
        }
        match params {
            Some(Value::Array(mut payload)) if payload.len() == 2 => {
                let args = payload.pop().unwrap_or(Value::Null);
                let name = payload.pop().unwrap_or(Value::Null);
                Ok(json!({ "method": name, "args": args }))
            }
            other => Err(HostError::new(format!(
                "malformed method channel payload: {}",
                other.unwrap_or(Value::Null)
            ))
            .with_code("EINVAL")),
        }
    }
}

impl HostBridge for LoopbackHost {
    fn invoke(
        &self,
        module: &str,
        method: &str,
        params: Option<Value>,
        completion: Option<Completion>,
    ) -> Option<Value> {
        tracing::debug!(target: "mercury", module, method, "loopback invoke");
        if let Some(completion) = completion {
            let result = Self::reply(module, method, params);
            self.queued.borrow_mut().push_back((completion, result));
        }
        None
    }

    fn dispatch_to_host(&self, event_name: &str, data: Vec<Value>) -> Option<Value> {
        let data = Value::Array(data);
        tracing::info!(target: "mercury", event = event_name, data = %data, "dispatch to host");
        None
    }
}
