use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::event_target::Event;

/// Listener for host-originated data addressed to one module.
///
/// The return value is handed back to the host; listeners with nothing to
/// say return `Value::Null`.
pub type ModuleListener = Rc<dyn Fn(Option<&Event>, &Value) -> Value>;

/// Module name to listener map. At most one listener per module; a second
/// registration replaces the first.
pub struct ModuleListenerRegistry<L = ModuleListener> {
    listeners: HashMap<String, L>,
}

impl<L> Default for ModuleListenerRegistry<L> {
    fn default() -> Self {
        Self {
            listeners: HashMap::new(),
        }
    }
}

impl<L: Clone> ModuleListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `module`, returning the listener it replaced.
    pub fn add(&mut self, module: impl Into<String>, listener: L) -> Option<L> {
        let module = module.into();
        let replaced = self.listeners.insert(module.clone(), listener);
        if replaced.is_some() {
            tracing::debug!(target: "mercury", module = %module, "replaced module listener");
        }
        replaced
    }

    pub fn remove(&mut self, module: &str) -> Option<L> {
        self.listeners.remove(module)
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Clone of the listener for `module`, so callers can release any borrow
    /// of the registry before invoking it.
    pub fn get(&self, module: &str) -> Option<L> {
        self.listeners.get(module).cloned()
    }

    pub fn contains(&self, module: &str) -> bool {
        self.listeners.contains_key(module)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;

    fn constant(value: Value) -> ModuleListener {
        Rc::new(move |_, _| value.clone())
    }

    fn deliver(
        registry: &ModuleListenerRegistry,
        module: &str,
        event: Option<&Event>,
        extra: &Value,
    ) -> Option<Value> {
        registry.get(module).map(|listener| listener(event, extra))
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = ModuleListenerRegistry::new();
        assert!(registry.add("Geo", constant(json!("first"))).is_none());
        assert!(registry.add("Geo", constant(json!("second"))).is_some());

        assert_eq!(registry.len(), 1);
        assert_eq!(deliver(&registry, "Geo", None, &Value::Null), Some(json!("second")));
    }

    #[test]
    fn removing_unknown_module_is_a_no_op() {
        let mut registry = ModuleListenerRegistry::new();
        registry.add("Geo", constant(json!(1)));
        assert!(registry.remove("Battery").is_none());
        assert!(registry.contains("Geo"));
    }

    #[test]
    fn clear_drops_every_listener() {
        let calls = Rc::new(Cell::new(0));
        let mut registry: ModuleListenerRegistry = ModuleListenerRegistry::new();
        for module in ["A", "B", "C"] {
            let counter = Rc::clone(&calls);
            registry.add(
                module,
                Rc::new(move |_: Option<&Event>, _: &Value| {
                    counter.set(counter.get() + 1);
                    Value::Null
                }) as ModuleListener,
            );
        }
        registry.clear();

        for module in ["A", "B", "C"] {
            assert!(deliver(&registry, module, None, &json!({})).is_none());
        }
        assert_eq!(calls.get(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn listener_receives_event_and_extra_data() {
        let mut registry = ModuleListenerRegistry::new();
        registry.add(
            "Clipboard",
            Rc::new(|event: Option<&Event>, extra: &Value| {
                json!({
                    "type": event.map(|e| e.event_type().to_string()),
                    "extra": extra.clone(),
                })
            }) as ModuleListener,
        );
        let event = Event::new("change");
        let reply = deliver(&registry, "Clipboard", Some(&event), &json!("hello"));
        assert_eq!(reply, Some(json!({ "type": "change", "extra": "hello" })));
    }
}
