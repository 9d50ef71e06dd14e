//! Request/response channel keyed by method name, layered over the host
//! invocation primitive and the module listener registry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::BridgeError;
use crate::host::{Completion, HostBridge, HostResult};

/// Module name reserved for the method channel.
pub const METHOD_CHANNEL_MODULE: &str = "MethodChannel";
/// Host method that receives `[method, args]` payloads.
pub const INVOKE_METHOD: &str = "invokeMethod";

/// Answers a host-originated call. The return value travels back to the host.
pub type MethodCallHandler = Rc<dyn Fn(&[Value]) -> Value>;

/// Handler table shared between the channel and its module listener.
#[derive(Clone, Default)]
pub(crate) struct MethodCallHandlers {
    handlers: Rc<RefCell<HashMap<String, MethodCallHandler>>>,
}

impl MethodCallHandlers {
    fn insert(&self, method: String, handler: MethodCallHandler) {
        self.handlers.borrow_mut().insert(method, handler);
    }

    fn remove(&self, method: &str) -> bool {
        self.handlers.borrow_mut().remove(method).is_some()
    }

    fn clear(&self) {
        self.handlers.borrow_mut().clear();
    }

    fn contains(&self, method: &str) -> bool {
        self.handlers.borrow().contains_key(method)
    }

    /// Run the handler for `method`, or return the `Null` sentinel when none
    /// is registered.
    pub(crate) fn trigger(&self, method: &str, args: &[Value]) -> Value {
        let handler = self.handlers.borrow().get(method).cloned();
        match handler {
            Some(handler) => handler(args),
            None => {
                tracing::debug!(target: "mercury", method, "no method call handler registered");
                Value::Null
            }
        }
    }

    /// Decode a `[method, args]` payload delivered to the `MethodChannel`
    /// module and trigger the matching handler.
    pub(crate) fn trigger_payload(&self, payload: &Value) -> Value {
        let Some((method, args)) = split_payload(payload) else {
            tracing::warn!(target: "mercury", payload = %payload, "malformed method channel payload");
            return Value::Null;
        };
        self.trigger(method, args)
    }
}

fn split_payload(payload: &Value) -> Option<(&str, &[Value])> {
    let items = payload.as_array()?;
    let method = items.first()?.as_str()?;
    let args = match items.get(1) {
        Some(Value::Array(args)) => args.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => return None,
    };
    Some((method, args))
}

pub struct MethodChannel {
    host: Rc<dyn HostBridge>,
    handlers: MethodCallHandlers,
}

impl MethodChannel {
    pub(crate) fn new(host: Rc<dyn HostBridge>) -> Self {
        Self {
            host,
            handlers: MethodCallHandlers::default(),
        }
    }

    pub(crate) fn handlers(&self) -> MethodCallHandlers {
        self.handlers.clone()
    }

    /// Call `method` on the host.
    ///
    /// Every call gets its own completion, so concurrent calls settle
    /// independently and in whatever order the host answers them.
    pub fn invoke_method(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<InvokeMethodFuture, BridgeError> {
        if method.is_empty() {
            return Err(BridgeError::InvalidMethodName);
        }

        let (sender, receiver) = oneshot::channel::<HostResult>();
        let completion = Completion::new(METHOD_CHANNEL_MODULE, INVOKE_METHOD, move |result| {
            // The caller may have dropped the future already.
            let _ = sender.send(result);
        });
        let payload = Value::Array(vec![Value::String(method.to_string()), Value::Array(args)]);

        tracing::debug!(target: "mercury", method, "invokeMethod");
        self.host.invoke(
            METHOD_CHANNEL_MODULE,
            INVOKE_METHOD,
            Some(payload),
            Some(completion),
        );

        Ok(InvokeMethodFuture {
            method: method.to_string(),
            receiver,
        })
    }

    /// Register `handler` for host-originated calls to `method`, replacing
    /// any previous handler.
    pub fn add_method_call_handler(
        &self,
        method: &str,
        handler: impl Fn(&[Value]) -> Value + 'static,
    ) -> Result<(), BridgeError> {
        if method.is_empty() {
            return Err(BridgeError::InvalidMethodName);
        }
        self.handlers.insert(method.to_string(), Rc::new(handler));
        Ok(())
    }

    pub fn remove_method_call_handler(&self, method: &str) -> bool {
        self.handlers.remove(method)
    }

    pub fn clear_method_call_handler(&self) {
        self.handlers.clear();
    }

    pub fn has_method_call_handler(&self, method: &str) -> bool {
        self.handlers.contains(method)
    }

    pub fn trigger_method_call_handler(&self, method: &str, args: &[Value]) -> Value {
        self.handlers.trigger(method, args)
    }
}

/// Result of one [`MethodChannel::invoke_method`] call.
///
/// Resolves exactly once. There is no timeout; race it against a timer if
/// one is needed.
#[must_use = "futures do nothing unless polled"]
pub struct InvokeMethodFuture {
    method: String,
    receiver: oneshot::Receiver<HostResult>,
}

impl InvokeMethodFuture {
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for InvokeMethodFuture {
    type Output = Result<Value, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(data))) => Poll::Ready(Ok(data)),
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(BridgeError::Host(error))),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::CompletionDropped {
                module: METHOD_CHANNEL_MODULE.to_string(),
                method: self.method.clone(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::error::HostError;
    use crate::host::RecordingHost;

    fn channel() -> (Rc<RecordingHost>, MethodChannel) {
        let host = Rc::new(RecordingHost::new());
        let channel = MethodChannel::new(host.clone());
        (host, channel)
    }

    #[test]
    fn sends_method_and_args_as_payload() {
        let (host, channel) = channel();
        let _pending = channel
            .invoke_method("share", vec![json!("text"), json!({ "n": 1 })])
            .unwrap();

        let calls = host.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].module, METHOD_CHANNEL_MODULE);
        assert_eq!(calls[0].method, INVOKE_METHOD);
        assert_eq!(calls[0].params, Some(json!(["share", ["text", { "n": 1 }]])));
        assert!(calls[0].completion.is_some());
    }

    #[test]
    fn empty_method_name_is_rejected_before_reaching_host() {
        let (host, channel) = channel();
        assert!(matches!(
            channel.invoke_method("", vec![]),
            Err(BridgeError::InvalidMethodName)
        ));
        assert_eq!(host.invocation_count(), 0);
    }

    #[test]
    fn stays_pending_until_host_completes() {
        let (host, channel) = channel();
        let mut call = channel.invoke_method("slow", vec![]).unwrap();
        assert!((&mut call).now_or_never().is_none());

        host.complete(0, Ok(json!("done")));
        assert_eq!(call.now_or_never().unwrap().unwrap(), json!("done"));
    }

    #[test]
    fn second_completion_does_not_change_outcome() {
        let (host, channel) = channel();
        let call = channel.invoke_method("once", vec![]).unwrap();
        assert!(host.complete(0, Ok(json!(1))));
        assert!(!host.complete(0, Err(HostError::new("again"))));
        assert_eq!(call.now_or_never().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn dropped_completion_reports_error() {
        let (host, channel) = channel();
        let call = channel.invoke_method("lost", vec![]).unwrap();
        host.drop_completions();
        let err = call.now_or_never().unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::CompletionDropped { ref method, .. } if method == "lost"));
    }

    #[test]
    fn unknown_inbound_method_returns_null() {
        let (_host, channel) = channel();
        assert_eq!(
            channel.trigger_method_call_handler("ghost", &[json!(1), json!(2)]),
            Value::Null
        );
    }

    #[test]
    fn handler_replacement_keeps_latest() {
        let (_host, channel) = channel();
        channel
            .add_method_call_handler("echo", |_| json!("first"))
            .unwrap();
        channel
            .add_method_call_handler("echo", |args| json!({ "second": args }))
            .unwrap();

        assert_eq!(
            channel.trigger_method_call_handler("echo", &[json!(7)]),
            json!({ "second": [7] })
        );
    }

    #[test]
    fn remove_and_clear_handlers() {
        let (_host, channel) = channel();
        channel.add_method_call_handler("a", |_| json!(1)).unwrap();
        channel.add_method_call_handler("b", |_| json!(2)).unwrap();

        assert!(channel.remove_method_call_handler("a"));
        assert!(!channel.remove_method_call_handler("a"));
        assert!(channel.has_method_call_handler("b"));

        channel.clear_method_call_handler();
        assert!(!channel.has_method_call_handler("b"));
        assert_eq!(channel.trigger_method_call_handler("b", &[]), Value::Null);
    }

    #[test]
    fn payload_decoding() {
        let handlers = MethodCallHandlers::default();
        handlers.insert(
            "sum".to_string(),
            Rc::new(|args: &[Value]| json!(args.iter().filter_map(Value::as_i64).sum::<i64>())),
        );

        assert_eq!(handlers.trigger_payload(&json!(["sum", [1, 2, 3]])), json!(6));
        assert_eq!(handlers.trigger_payload(&json!(["sum"])), json!(0));
        assert_eq!(handlers.trigger_payload(&json!(["sum", 5])), Value::Null);
        assert_eq!(handlers.trigger_payload(&json!({ "method": "sum" })), Value::Null);
    }
}
