use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

/// A named event with an optional JSON payload.
#[derive(Debug, Clone)]
pub struct Event {
    event_type: String,
    detail: Value,
    cancelable: bool,
    default_prevented: Cell<bool>,
    immediate_propagation_stopped: Cell<bool>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            detail: Value::Null,
            cancelable: false,
            default_prevented: Cell::new(false),
            immediate_propagation_stopped: Cell::new(false),
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn detail(&self) -> &Value {
        &self.detail
    }

    pub fn is_cancelable(&self) -> bool {
        self.cancelable
    }

    /// No effect unless the event is cancelable.
    pub fn prevent_default(&self) {
        if self.cancelable {
            self.default_prevented.set(true);
        }
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    pub fn stop_immediate_propagation(&self) {
        self.immediate_propagation_stopped.set(true);
    }
}

pub type EventListener = Rc<dyn Fn(&Event)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOptions {
    /// Remove the listener right before its first invocation.
    pub once: bool,
}

struct ListenerEntry {
    id: ListenerId,
    listener: EventListener,
    once: bool,
}

/// Local listener list keyed by event type.
#[derive(Default)]
pub struct EventTarget {
    next_id: Cell<u64>,
    listeners: RefCell<HashMap<String, Vec<ListenerEntry>>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event_listener(
        &self,
        event_type: &str,
        listener: impl Fn(&Event) + 'static,
        options: ListenerOptions,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.listeners
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push(ListenerEntry {
                id,
                listener: Rc::new(listener),
                once: options.once,
            });
        id
    }

    /// Returns whether a listener was removed.
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(bucket) = listeners.get_mut(event_type) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|entry| entry.id != id);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            listeners.remove(event_type);
        }
        removed
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .borrow()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn is_registered(&self, event_type: &str, id: ListenerId) -> bool {
        self.listeners
            .borrow()
            .get(event_type)
            .map(|bucket| bucket.iter().any(|entry| entry.id == id))
            .unwrap_or(false)
    }

    /// Run local listeners in registration order. Listeners removed during
    /// dispatch are skipped; listeners added during dispatch wait for the next
    /// event. Returns `false` if a listener prevented the default action.
    pub fn dispatch_event(&self, event: &Event) -> bool {
        let snapshot: Vec<(ListenerId, EventListener, bool)> = self
            .listeners
            .borrow()
            .get(event.event_type())
            .map(|bucket| {
                bucket
                    .iter()
                    .map(|entry| (entry.id, Rc::clone(&entry.listener), entry.once))
                    .collect()
            })
            .unwrap_or_default();

        for (id, listener, once) in snapshot {
            if !self.is_registered(event.event_type(), id) {
                continue;
            }
            if once {
                self.remove_event_listener(event.event_type(), id);
            }
            listener(event);
            if event.immediate_propagation_stopped.get() {
                break;
            }
        }

        !event.default_prevented()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Event)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |tag: &str| -> Box<dyn Fn(&Event)> {
            let sink = Rc::clone(&sink);
            let tag = tag.to_string();
            Box::new(move |event: &Event| {
                sink.borrow_mut().push(format!("{tag}:{}", event.event_type()))
            })
        };
        (log, make)
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let target = EventTarget::new();
        let (log, make) = recorder();
        target.add_event_listener("ready", make("a"), ListenerOptions::default());
        target.add_event_listener("ready", make("b"), ListenerOptions::default());
        target.add_event_listener("other", make("c"), ListenerOptions::default());

        assert!(target.dispatch_event(&Event::new("ready")));
        assert_eq!(*log.borrow(), vec!["a:ready", "b:ready"]);
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let target = EventTarget::new();
        let (log, make) = recorder();
        target.add_event_listener("tick", make("once"), ListenerOptions { once: true });

        target.dispatch_event(&Event::new("tick"));
        target.dispatch_event(&Event::new("tick"));
        assert_eq!(*log.borrow(), vec!["once:tick"]);
        assert_eq!(target.listener_count("tick"), 0);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let target = EventTarget::new();
        let (log, make) = recorder();
        let id = target.add_event_listener("tick", make("x"), ListenerOptions::default());
        assert!(target.remove_event_listener("tick", id));
        assert!(!target.remove_event_listener("tick", id));

        target.dispatch_event(&Event::new("tick"));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn prevent_default_requires_cancelable() {
        let target = EventTarget::new();
        target.add_event_listener("close", |event: &Event| event.prevent_default(), ListenerOptions::default());

        assert!(target.dispatch_event(&Event::new("close")));
        assert!(!target.dispatch_event(&Event::new("close").cancelable(true)));
    }

    #[test]
    fn stop_immediate_propagation_skips_remaining_listeners() {
        let target = EventTarget::new();
        let (log, make) = recorder();
        target.add_event_listener(
            "tick",
            |event: &Event| event.stop_immediate_propagation(),
            ListenerOptions::default(),
        );
        target.add_event_listener("tick", make("late"), ListenerOptions::default());

        target.dispatch_event(&Event::new("tick"));
        assert!(log.borrow().is_empty());
    }
}
