use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::event_target::Event;
use crate::host::{Completion, HostBridge, HostResult, LogLevel};
use crate::method_channel::{MethodCallHandlers, MethodChannel, METHOD_CHANNEL_MODULE};
use crate::registry::{ModuleListener, ModuleListenerRegistry};

/// Rust-side bridge export: the invocation primitive, the module listener
/// registry, the method channel and the singleton dispatcher, all sharing one
/// host.
pub struct MercuryBridge {
    host: Rc<dyn HostBridge>,
    listeners: RefCell<ModuleListenerRegistry>,
    method_channel: MethodChannel,
    dispatcher: Dispatcher,
}

impl MercuryBridge {
    pub fn new(host: Rc<dyn HostBridge>) -> Self {
        let method_channel = MethodChannel::new(Rc::clone(&host));
        let dispatcher = Dispatcher::new(Rc::clone(&host));
        let bridge = Self {
            host,
            listeners: RefCell::new(ModuleListenerRegistry::new()),
            method_channel,
            dispatcher,
        };
        bridge.install_method_channel_listener();
        bridge
    }

    fn install_method_channel_listener(&self) {
        let handlers: MethodCallHandlers = self.method_channel.handlers();
        let listener: ModuleListener =
            Rc::new(move |_event: Option<&Event>, extra: &Value| handlers.trigger_payload(extra));
        self.listeners
            .borrow_mut()
            .add(METHOD_CHANNEL_MODULE, listener);
    }

    pub fn method_channel(&self) -> &MethodChannel {
        &self.method_channel
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Raw invocation primitive. `callback` receives the host's answer once;
    /// without it the call is fire-and-forget.
    pub fn invoke_module(
        &self,
        module: &str,
        method: &str,
        params: Option<Value>,
        callback: Option<Box<dyn FnOnce(HostResult)>>,
    ) -> Result<Option<Value>, BridgeError> {
        if module.is_empty() {
            return Err(BridgeError::InvalidModuleName);
        }
        if method.is_empty() {
            return Err(BridgeError::InvalidMethodName);
        }
        let completion = callback.map(|callback| Completion::new(module, method, callback));
        tracing::debug!(target: "mercury", module, method, "invokeModule");
        Ok(self.host.invoke(module, method, params, completion))
    }

    /// Register `listener` as the only listener for `module`.
    pub fn add_module_listener(
        &self,
        module: &str,
        listener: impl Fn(Option<&Event>, &Value) -> Value + 'static,
    ) -> Result<(), BridgeError> {
        if module.is_empty() {
            return Err(BridgeError::InvalidModuleName);
        }
        if module == METHOD_CHANNEL_MODULE {
            return Err(BridgeError::ReservedModule(module.to_string()));
        }
        self.listeners
            .borrow_mut()
            .add(module, Rc::new(listener) as ModuleListener);
        Ok(())
    }

    pub fn remove_module_listener(&self, module: &str) {
        self.listeners.borrow_mut().remove(module);
    }

    /// Drop every module listener, the method channel's included.
    pub fn clear_module_listeners(&self) {
        self.listeners.borrow_mut().clear();
    }

    pub fn has_module_listener(&self, module: &str) -> bool {
        self.listeners.borrow().contains(module)
    }

    /// Host entry point for module data. Returns the listener's reply, or
    /// `Null` when no listener is registered.
    pub fn handle_module_event(&self, module: &str, event: Option<&Event>, extra: &Value) -> Value {
        let listener = self.listeners.borrow().get(module);
        match listener {
            Some(listener) => listener(event, extra),
            None => {
                tracing::trace!(target: "mercury", module, "no listener for module event");
                Value::Null
            }
        }
    }

    /// Host entry point for named dispatcher events.
    pub fn handle_host_event(&self, event: &Event) -> bool {
        self.dispatcher.dispatch_event(event)
    }

    /// Return to the freshly constructed state: no module listeners except the
    /// method channel's, and no method call handlers.
    pub fn reset(&self) {
        self.listeners.borrow_mut().clear();
        self.method_channel.clear_method_call_handler();
        self.install_method_channel_listener();
    }

    pub fn reload(&self) {
        self.host.reload();
    }

    pub fn print(&self, message: &str, level: LogLevel) {
        self.host.print(message, level);
    }

    pub fn is_proxy(&self, value: &Value) -> bool {
        self.host.is_host_proxy(value)
    }
}
