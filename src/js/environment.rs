use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use anyhow::{anyhow, Context as AnyhowContext, Result};
use rquickjs::function::Opt;
use rquickjs::{Ctx, Exception, Function, Object, Persistent};
use serde_json::Value;

use super::bootstrap::BRIDGE_BOOTSTRAP;
use super::runtime::QuickJsEngine;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, HostError};
use crate::event_target::Event;
use crate::host::{Completion, HostBridge, HostResult, LogLevel};
use crate::method_channel::METHOD_CHANNEL_MODULE;
use crate::registry::ModuleListenerRegistry;

type JsFunction = Persistent<Function<'static>>;

/// Functions returned by the bootstrap script.
#[derive(Clone)]
struct BootstrapHooks {
    method_channel_listener: JsFunction,
    invoke_listener: JsFunction,
    deliver_event: JsFunction,
}

/// Error code handed to JS when the host drops a completion unsettled.
pub const COMPLETION_DROPPED_CODE: &str = "ECOMPLETIONDROPPED";

struct SettledCall {
    id: u64,
    result: HostResult,
}

/// Moves one call's result into the settled queue. Dropped without a result,
/// it queues a `CompletionDropped` failure so the JS callback is released.
struct CallSettler {
    id: u64,
    module: String,
    method: String,
    state: Weak<BridgeState>,
    settled: bool,
}

impl CallSettler {
    fn settle(mut self, result: HostResult) {
        self.settled = true;
        self.push(result);
    }

    fn push(&self, result: HostResult) {
        if let Some(state) = self.state.upgrade() {
            state.settled.borrow_mut().push_back(SettledCall {
                id: self.id,
                result,
            });
        }
    }
}

impl Drop for CallSettler {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let error = BridgeError::CompletionDropped {
            module: std::mem::take(&mut self.module),
            method: std::mem::take(&mut self.method),
        };
        tracing::warn!(target: "mercury", id = self.id, "{error}");
        self.push(Err(
            HostError::new(error.to_string()).with_code(COMPLETION_DROPPED_CODE)
        ));
    }
}

/// State shared between the environment and the native functions installed
/// in the context. Completions only hold a weak reference to it.
#[derive(Default)]
struct BridgeState {
    listeners: RefCell<ModuleListenerRegistry<JsFunction>>,
    callbacks: RefCell<HashMap<u64, JsFunction>>,
    settled: RefCell<VecDeque<SettledCall>>,
    next_call_id: Cell<u64>,
    hooks: RefCell<Option<BootstrapHooks>>,
}

impl BridgeState {
    fn track_callback<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        module: &str,
        method: &str,
        callback: Function<'js>,
    ) -> Completion {
        let id = self.next_call_id.get();
        self.next_call_id.set(id + 1);
        self.callbacks
            .borrow_mut()
            .insert(id, Persistent::save(ctx, callback));

        let settler = CallSettler {
            id,
            module: module.to_string(),
            method: method.to_string(),
            state: Rc::downgrade(self),
            settled: false,
        };
        Completion::new(module, method, move |result| settler.settle(result))
    }

    fn install_method_channel(&self) {
        let listener = self
            .hooks
            .borrow()
            .as_ref()
            .map(|hooks| hooks.method_channel_listener.clone());
        if let Some(listener) = listener {
            self.listeners
                .borrow_mut()
                .add(METHOD_CHANNEL_MODULE, listener);
        }
    }

    /// Drop every persistent JS handle. Must run before the runtime is freed.
    fn release(&self) {
        self.listeners.borrow_mut().clear();
        self.callbacks.borrow_mut().clear();
        self.settled.borrow_mut().clear();
        self.hooks.borrow_mut().take();
    }
}

/// A QuickJS context with the bridge primitives and the `mercury` global
/// installed.
///
/// Host answers are queued when the host settles a completion and delivered
/// to JS on [`JsBridgeEnvironment::pump`], so JS never runs inside a host call.
/// `eval`, `eval_with` and the host delivery methods pump before returning.
/// Unhandled promise rejections are reported to the host after each pump.
pub struct JsBridgeEnvironment {
    state: Rc<BridgeState>,
    host: Rc<dyn HostBridge>,
    config: BridgeConfig,
    engine: QuickJsEngine,
}

impl JsBridgeEnvironment {
    pub fn new(host: Rc<dyn HostBridge>, config: BridgeConfig) -> Result<Self> {
        let engine = QuickJsEngine::new(config.max_pending_jobs)?;
        let state = Rc::new(BridgeState::default());

        engine
            .with_context(|ctx| {
                install_natives(&ctx, &state, &host, &config)?;
                run_bootstrap(&ctx, &state, &config)
            })
            .context("failed to install mercury bridge into QuickJS")?;
        state.install_method_channel();

        tracing::debug!(
            target: "mercury",
            expose_dispatcher = config.expose_dispatcher,
            "bridge environment ready"
        );

        Ok(Self {
            state,
            host,
            config,
            engine,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.engine.eval(source, filename)?;
        self.pump()?;
        Ok(())
    }

    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let value = self.engine.eval_with(source, filename)?;
        self.pump()?;
        Ok(value)
    }

    /// Deliver settled host answers to their JS callbacks and drain promise
    /// jobs until neither produces more work. Returns whether anything ran.
    pub fn pump(&self) -> Result<bool> {
        let mut did_work = false;
        loop {
            let settled = self.settle_completions()?;
            let jobs = self.engine.drain_jobs()?;
            if settled > 0 || jobs > 0 {
                did_work = true;
            }
            if settled == 0 {
                break;
            }
        }
        for message in self.engine.take_unhandled_rejections() {
            tracing::error!(target: "quickjs", error = %message, "unhandled promise rejection");
            self.host.on_js_error(&message);
        }
        Ok(did_work)
    }

    /// Calls whose completion the host has not settled yet.
    pub fn pending_invocations(&self) -> usize {
        self.state.callbacks.borrow().len()
    }

    pub fn has_module_listener(&self, module: &str) -> bool {
        self.state.listeners.borrow().contains(module)
    }

    /// Host entry point for module data. Runs the JS listener for `module`
    /// synchronously and returns its reply, or `Null` when nobody listens.
    pub fn deliver_module_event(
        &self,
        module: &str,
        event: Option<&Event>,
        extra: &Value,
    ) -> Result<Value> {
        let listener = self.state.listeners.borrow().get(module);
        let Some(listener) = listener else {
            tracing::trace!(target: "mercury", module, "no listener for module event");
            return Ok(Value::Null);
        };
        let hooks = self.hooks()?;

        let event_type = event.map(|event| event.event_type().to_string());
        let detail_json = event
            .map(|event| serde_json::to_string(event.detail()))
            .transpose()?;
        let extra_json = serde_json::to_string(extra)?;

        let reply = self.engine.with_context(move |ctx| {
            let invoke: Function = hooks.invoke_listener.restore(&ctx)?;
            let listener: Function = listener.restore(&ctx)?;
            invoke.call::<_, Option<String>>((listener, event_type, detail_json, extra_json))
        });
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                self.report_js_error(&err);
                return Err(err.context(format!("listener for module `{module}` threw")));
            }
        };

        self.pump()?;

        match reply {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Value::Null),
        }
    }

    /// Host entry point for named events on `mercury.dispatcher`. Returns
    /// `false` if a JS listener prevented the default action.
    pub fn deliver_host_event(&self, event: &Event) -> Result<bool> {
        let hooks = self.hooks()?;
        let event_type = event.event_type().to_string();
        let detail_json = serde_json::to_string(event.detail())?;
        let cancelable = event.is_cancelable();

        let outcome = self.engine.with_context(move |ctx| {
            let deliver: Function = hooks.deliver_event.restore(&ctx)?;
            deliver.call::<_, bool>((event_type, detail_json, cancelable))
        });
        let not_prevented = match outcome {
            Ok(value) => value,
            Err(err) => {
                self.report_js_error(&err);
                return Err(err.context(format!(
                    "dispatcher listener for `{}` threw",
                    event.event_type()
                )));
            }
        };
        if !not_prevented {
            event.prevent_default();
        }

        self.pump()?;
        Ok(not_prevented)
    }

    /// Drop every module listener and re-register the method channel, as on
    /// a reload.
    pub fn reset_listeners(&self) {
        self.state.listeners.borrow_mut().clear();
        self.state.install_method_channel();
    }

    fn hooks(&self) -> Result<BootstrapHooks> {
        self.state
            .hooks
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("mercury bridge bootstrap is not installed"))
    }

    fn settle_completions(&self) -> Result<usize> {
        let mut count = 0;
        loop {
            let next = self.state.settled.borrow_mut().pop_front();
            let Some(SettledCall { id, result }) = next else {
                break;
            };
            let callback = self.state.callbacks.borrow_mut().remove(&id);
            let Some(callback) = callback else {
                continue;
            };

            let (message, code, data) = match result {
                Ok(data) => (None, None, Some(serde_json::to_string(&data)?)),
                Err(error) => (Some(error.message), error.code, None),
            };
            count += 1;

            let outcome = self.engine.with_context(move |ctx| {
                let callback: Function = callback.restore(&ctx)?;
                callback.call::<_, rquickjs::Value>((message, code, data))?;
                Ok(())
            });
            if let Err(err) = outcome {
                self.report_js_error(&err);
            }
        }
        Ok(count)
    }

    fn report_js_error(&self, err: &anyhow::Error) {
        tracing::error!(target: "quickjs", error = %err, "uncaught error in bridge callback");
        self.host.on_js_error(&err.to_string());
    }
}

impl Drop for JsBridgeEnvironment {
    fn drop(&mut self) {
        self.state.release();
    }
}

fn install_natives<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<BridgeState>,
    host: &Rc<dyn HostBridge>,
    config: &BridgeConfig,
) -> rquickjs::Result<()> {
    let global = ctx.globals();

    {
        let state_ref = Rc::clone(state);
        let host_ref = Rc::clone(host);
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>,
                  module: String,
                  method: String,
                  params: Option<String>,
                  callback: Option<Function<'js>>|
                  -> rquickjs::Result<Option<String>> {
                if module.is_empty() || method.is_empty() {
                    return bridge_error(&ctx, "module and method names must be non-empty strings");
                }
                let params = match params {
                    Some(json) => match serde_json::from_str::<Value>(&json) {
                        Ok(value) => Some(value),
                        Err(err) => return bridge_error(&ctx, format!("invalid params: {err}")),
                    },
                    None => None,
                };
                let completion = callback
                    .map(|callback| state_ref.track_callback(&ctx, &module, &method, callback));

                tracing::debug!(target: "mercury", module = %module, method = %method, "invokeModule");
                match host_ref.invoke(&module, &method, params, completion) {
                    Some(value) => match serde_json::to_string(&value) {
                        Ok(json) => Ok(Some(json)),
                        Err(err) => bridge_error(&ctx, format!("invalid host result: {err}")),
                    },
                    None => Ok(None),
                }
            },
        )?
        .with_name("__mercury_invoke_module__")?;
        global.set("__mercury_invoke_module__", func)?;
    }

    {
        let state_ref = Rc::clone(state);
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, module: String, listener: Function<'js>| -> rquickjs::Result<()> {
                if module.is_empty() {
                    return bridge_error(&ctx, "module name must be a non-empty string");
                }
                if module == METHOD_CHANNEL_MODULE {
                    return bridge_error(
                        &ctx,
                        format!("module `{module}` is reserved for the method channel"),
                    );
                }
                let listener = Persistent::save(&ctx, listener);
                state_ref.listeners.borrow_mut().add(module, listener);
                Ok(())
            },
        )?
        .with_name("__mercury_add_module_listener__")?;
        global.set("__mercury_add_module_listener__", func)?;
    }

    {
        let state_ref = Rc::clone(state);
        let func = Function::new(ctx.clone(), move |module: String| -> rquickjs::Result<()> {
            state_ref.listeners.borrow_mut().remove(&module);
            Ok(())
        })?
        .with_name("__mercury_remove_module_listener__")?;
        global.set("__mercury_remove_module_listener__", func)?;
    }

    {
        let state_ref = Rc::clone(state);
        let func = Function::new(ctx.clone(), move || -> rquickjs::Result<()> {
            state_ref.listeners.borrow_mut().clear();
            Ok(())
        })?
        .with_name("__mercury_clear_module_listener__")?;
        global.set("__mercury_clear_module_listener__", func)?;
    }

    {
        let host_ref = Rc::clone(host);
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, event_name: String, data: String| -> rquickjs::Result<Option<String>> {
                let data = match serde_json::from_str::<Value>(&data) {
                    Ok(Value::Array(items)) => items,
                    Ok(other) => vec![other],
                    Err(err) => return bridge_error(&ctx, format!("invalid event data: {err}")),
                };
                match host_ref.dispatch_to_host(&event_name, data) {
                    Some(value) => match serde_json::to_string(&value) {
                        Ok(json) => Ok(Some(json)),
                        Err(err) => bridge_error(&ctx, format!("invalid host result: {err}")),
                    },
                    None => Ok(None),
                }
            },
        )?
        .with_name("__mercury_dispatch_to_host__")?;
        global.set("__mercury_dispatch_to_host__", func)?;
    }

    {
        let host_ref = Rc::clone(host);
        let threshold = config.console_level;
        let func = Function::new(
            ctx.clone(),
            move |log: String, level: Opt<Option<String>>| -> rquickjs::Result<()> {
                let level = LogLevel::parse(level.0.flatten().as_deref());
                if level >= threshold {
                    host_ref.print(&log, level);
                }
                Ok(())
            },
        )?
        .with_name("__mercury_print__")?;
        global.set("__mercury_print__", func)?;
    }

    {
        let host_ref = Rc::clone(host);
        let func = Function::new(ctx.clone(), move || -> rquickjs::Result<()> {
            host_ref.reload();
            Ok(())
        })?
        .with_name("__mercury_location_reload__")?;
        global.set("__mercury_location_reload__", func)?;
    }

    {
        let host_ref = Rc::clone(host);
        let func = Function::new(ctx.clone(), move |json: Option<String>| -> rquickjs::Result<bool> {
            let value = json
                .and_then(|json| serde_json::from_str::<Value>(&json).ok())
                .unwrap_or(Value::Null);
            Ok(host_ref.is_host_proxy(&value))
        })?
        .with_name("__mercury_is_proxy__")?;
        global.set("__mercury_is_proxy__", func)?;
    }

    Ok(())
}

fn run_bootstrap<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<BridgeState>,
    config: &BridgeConfig,
) -> rquickjs::Result<()> {
    let init: Function = ctx.eval(BRIDGE_BOOTSTRAP.as_bytes())?;
    let options = Object::new(ctx.clone())?;
    options.set("exposeDispatcher", config.expose_dispatcher)?;
    let hooks: Object = init.call((options,))?;

    let method_channel_listener: Function = hooks.get("methodChannelListener")?;
    let invoke_listener: Function = hooks.get("invokeListener")?;
    let deliver_event: Function = hooks.get("deliverEvent")?;

    *state.hooks.borrow_mut() = Some(BootstrapHooks {
        method_channel_listener: Persistent::save(ctx, method_channel_listener),
        invoke_listener: Persistent::save(ctx, invoke_listener),
        deliver_event: Persistent::save(ctx, deliver_event),
    });
    Ok(())
}

fn bridge_error<T>(ctx: &Ctx<'_>, message: impl std::fmt::Display) -> rquickjs::Result<T> {
    let message = message.to_string();
    tracing::warn!(target: "quickjs", "bridge call rejected: {message}");
    Err(Exception::throw_type(ctx, &message))
}
