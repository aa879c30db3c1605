//! Progress events and the dual handler/listener dispatch shared by
//! `XMLHttpRequest` and `XMLHttpRequest.upload`.

use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// A guest function registered as a handler or listener.
///
/// Listeners live on the guest thread and are never sent across threads.
pub type Listener = Rc<dyn Fn(&ProgressEvent)>;

/// Event names understood by request objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Load,
    ReadyStateChange,
    Progress,
    Abort,
    Error,
    Timeout,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Load => "load",
            EventType::ReadyStateChange => "readystatechange",
            EventType::Progress => "progress",
            EventType::Abort => "abort",
            EventType::Error => "error",
            EventType::Timeout => "timeout",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "load" => Ok(EventType::Load),
            "readystatechange" => Ok(EventType::ReadyStateChange),
            "progress" => Ok(EventType::Progress),
            "abort" => Ok(EventType::Abort),
            "error" => Ok(EventType::Error),
            "timeout" => Ok(EventType::Timeout),
            other => Err(format!("Unknown event type: {}", other)),
        }
    }
}

/// Event record handed to guest handlers.
///
/// One instance is built per firing and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub length_computable: bool,
    pub loaded: i64,
    pub total: i64,
}

impl ProgressEvent {
    /// `new ProgressEvent(type)` as exposed to the guest
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            length_computable: false,
            loaded: 0,
            total: 0,
        }
    }

    pub fn progress(loaded: i64, total: i64) -> Self {
        Self {
            event_type: EventType::Progress,
            length_computable: true,
            loaded,
            total,
        }
    }

    /// JSON form used when marshaling the record into the guest
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Single assignable handler field
pub(crate) type Slot = RefCell<Option<Listener>>;

/// Event-capable entity: one listener per event type plus a dedicated
/// handler field for each fixed event type.
///
/// Both slots fire independently, handler first.
#[derive(Default)]
pub struct EventTarget {
    listeners: RefCell<HashMap<EventType, Listener>>,
    onload: Slot,
    onprogress: Slot,
    onabort: Slot,
    onerror: Slot,
    ontimeout: Slot,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event_type`, replacing any previous one
    pub fn add_event_listener(&self, event_type: EventType, listener: Listener) {
        self.listeners.borrow_mut().insert(event_type, listener);
    }

    pub fn remove_event_listener(&self, event_type: EventType) {
        self.listeners.borrow_mut().remove(&event_type);
    }

    pub fn set_onload(&self, handler: Option<Listener>) {
        *self.onload.borrow_mut() = handler;
    }

    pub fn set_onprogress(&self, handler: Option<Listener>) {
        *self.onprogress.borrow_mut() = handler;
    }

    pub fn set_onabort(&self, handler: Option<Listener>) {
        *self.onabort.borrow_mut() = handler;
    }

    pub fn set_onerror(&self, handler: Option<Listener>) {
        *self.onerror.borrow_mut() = handler;
    }

    pub fn set_ontimeout(&self, handler: Option<Listener>) {
        *self.ontimeout.borrow_mut() = handler;
    }

    pub fn fire_load(&self) {
        self.dispatch(&self.onload, ProgressEvent::new(EventType::Load));
    }

    pub fn fire_progress(&self, loaded: i64, total: i64) {
        self.dispatch(&self.onprogress, ProgressEvent::progress(loaded, total));
    }

    pub fn fire_abort(&self) {
        self.dispatch(&self.onabort, ProgressEvent::new(EventType::Abort));
    }

    pub fn fire_error(&self) {
        self.dispatch(&self.onerror, ProgressEvent::new(EventType::Error));
    }

    pub fn fire_timeout(&self) {
        self.dispatch(&self.ontimeout, ProgressEvent::new(EventType::Timeout));
    }

    /// Invoke `handler` (if set) then the listener registered for the event's
    /// type (if any).
    ///
    /// Both are cloned out of their cells before the call so a guest function
    /// may re-register, remove, or fire on this target while it runs.
    pub(crate) fn dispatch(&self, handler: &Slot, event: ProgressEvent) {
        let handler = handler.borrow().clone();
        let listener = self.listeners.borrow().get(&event.event_type).cloned();

        log::debug!(
            "dispatch {} (handler: {}, listener: {})",
            event.event_type,
            handler.is_some(),
            listener.is_some()
        );

        if let Some(handler) = handler {
            handler(&event);
        }

        if let Some(listener) = listener {
            listener(&event);
        }
    }
}
