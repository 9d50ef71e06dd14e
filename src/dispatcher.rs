use std::rc::Rc;

use serde_json::Value;

use crate::event_target::{Event, EventTarget, ListenerId, ListenerOptions};
use crate::host::HostBridge;

/// Named-event relay between the application and the host.
///
/// Inbound host events reach local listeners through the embedded
/// [`EventTarget`]; outbound events go straight to the host. One instance
/// exists per bridge.
pub struct Dispatcher {
    target: EventTarget,
    host: Rc<dyn HostBridge>,
}

impl Dispatcher {
    pub(crate) fn new(host: Rc<dyn HostBridge>) -> Self {
        Self {
            target: EventTarget::new(),
            host,
        }
    }

    /// Forward `event_name` and its data to the host unconditionally.
    pub fn dispatch(&self, event_name: &str, data: Vec<Value>) -> Option<Value> {
        tracing::debug!(target: "mercury", event = event_name, "dispatch to host");
        self.host.dispatch_to_host(event_name, data)
    }

    pub fn add_event_listener(
        &self,
        event_type: &str,
        listener: impl Fn(&Event) + 'static,
        options: ListenerOptions,
    ) -> ListenerId {
        self.target.add_event_listener(event_type, listener, options)
    }

    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        self.target.remove_event_listener(event_type, id)
    }

    /// Deliver an event to local listeners only.
    pub fn dispatch_event(&self, event: &Event) -> bool {
        self.target.dispatch_event(event)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;
    use crate::host::RecordingHost;

    #[test]
    fn outbound_dispatch_reaches_host_with_data() {
        let host = Rc::new(RecordingHost::new());
        host.set_dispatch_reply(Some(json!("ack")));
        let dispatcher = Dispatcher::new(host.clone());

        let reply = dispatcher.dispatch("resize", vec![json!(800), json!(600)]);

        assert_eq!(reply, Some(json!("ack")));
        assert_eq!(
            host.dispatched(),
            vec![("resize".to_string(), vec![json!(800), json!(600)])]
        );
    }

    #[test]
    fn inbound_events_stay_local() {
        let host = Rc::new(RecordingHost::new());
        let dispatcher = Dispatcher::new(host.clone());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        dispatcher.add_event_listener(
            "theme",
            move |event: &Event| sink.borrow_mut().push(event.detail().clone()),
            ListenerOptions::default(),
        );

        dispatcher.dispatch_event(&Event::new("theme").with_detail(json!("dark")));

        assert_eq!(*seen.borrow(), vec![json!("dark")]);
        assert!(host.dispatched().is_empty());
    }
}
