//! `XMLHttpRequest` request object.
//!
//! The object lives on the guest thread. `send` validates and encodes the
//! request, then hands it to the event loop; native progress comes back as
//! [`XhrUpdate`]s applied by [`Runtime::process_callbacks`]. Guest handlers
//! are always called with no internal borrow held, so they may call back
//! into the object (`abort()` from `onprogress`, `open()` and `send()` from
//! any handler). Once that happens the rest of the update is dropped.
//!
//! [`Runtime::process_callbacks`]: super::Runtime::process_callbacks

use super::body::{self, RequestBody};
use super::event::{EventTarget, EventType, Listener, ProgressEvent, Slot};
use super::{Host, SchedulerMessage};
use crate::config::TransportConfig;
use crate::error::XhrError;
use crate::task::{HttpRequest, RequestId, XhrUpdate};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// `XMLHttpRequest.upload`
pub type XmlHttpRequestUpload = EventTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Methods normalized to upper case when opened, as browsers do
const NORMALIZED_METHODS: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT", "PATCH"];

fn normalize_method(method: &str) -> String {
    NORMALIZED_METHODS
        .iter()
        .find(|m| m.eq_ignore_ascii_case(method))
        .map(|m| m.to_string())
        .unwrap_or_else(|| method.to_string())
}

struct XhrState {
    method: String,
    url: String,
    request_headers: Vec<(String, String)>,
    response_headers: BTreeMap<String, String>,
    ready_state: ReadyState,
    aborted: bool,
    timeout_ms: u64,
    status: u16,
    status_text: String,
    response: Bytes,
    response_text: String,
    /// Content-Length of the body being uploaded by the current send
    upload_total: i64,
    /// Send whose updates are still accepted
    current: Option<RequestId>,
    /// Bumped by every `open`; work started under an older value is stale
    generation: u64,
}

impl XhrState {
    fn new() -> Self {
        Self {
            method: String::new(),
            url: String::new(),
            request_headers: Vec::new(),
            response_headers: BTreeMap::new(),
            ready_state: ReadyState::Unsent,
            aborted: false,
            timeout_ms: 0,
            status: 0,
            status_text: String::new(),
            response: Bytes::new(),
            response_text: String::new(),
            upload_total: 0,
            current: None,
            generation: 0,
        }
    }
}

struct XhrInner {
    state: RefCell<XhrState>,
    events: EventTarget,
    onreadystatechange: Slot,
    upload: XmlHttpRequestUpload,
    host: Weak<Host>,
    transport: TransportConfig,
}

/// Handle to a request object; clones share the same object
#[derive(Clone)]
pub struct XmlHttpRequest {
    inner: Rc<XhrInner>,
}

impl XmlHttpRequest {
    pub(crate) fn new(host: Weak<Host>, transport: TransportConfig) -> Self {
        Self {
            inner: Rc::new(XhrInner {
                state: RefCell::new(XhrState::new()),
                events: EventTarget::new(),
                onreadystatechange: Slot::default(),
                upload: EventTarget::new(),
                host,
                transport,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Guest API
    // ------------------------------------------------------------------

    /// Reinitialize the object for a new request and move to Opened.
    ///
    /// A send still in flight is forgotten: its results are discarded.
    pub fn open(&self, method: &str, url: &str) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.method = normalize_method(method);
            state.url = url.to_string();
            state.request_headers.clear();
            state.response_headers.clear();
            state.status = 0;
            state.status_text.clear();
            state.response = Bytes::new();
            state.response_text.clear();
            state.upload_total = 0;
            state.generation += 1;

            if let Some(id) = state.current.take() {
                log::debug!("xhr {}: reopened while in flight, result will be discarded", id);
            }
        }

        self.ready_state_change(ReadyState::Opened);
    }

    /// Set a request header, replacing any earlier value for the same name
    pub fn set_request_header(&self, key: &str, value: &str) {
        let mut state = self.inner.state.borrow_mut();

        if state.ready_state != ReadyState::Opened || state.current.is_some() {
            log::warn!("setRequestHeader({}) ignored: request not opened or already sent", key);
            return;
        }

        match state
            .request_headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => state
                .request_headers
                .push((key.to_string(), value.to_string())),
        }
    }

    /// Encode `body` and issue the request.
    ///
    /// Never fails synchronously: problems are reported as events.
    pub fn send(&self, body: impl Into<RequestBody>) {
        let body = body.into();

        let (method, url, headers, timeout_ms) = {
            let state = self.inner.state.borrow();

            if state.aborted {
                log::debug!("send() on aborted request ignored");
                return;
            }

            if let Some(id) = state.current {
                log::warn!("xhr {}: send() while already in flight ignored", id);
                return;
            }

            if state.ready_state != ReadyState::Opened {
                drop(state);
                self.fail(XhrError::Construction("send() called before open()".into()));
                return;
            }

            (
                state.method.clone(),
                state.url.clone(),
                state.request_headers.clone(),
                state.timeout_ms,
            )
        };

        let request = body::encode(&method, body).and_then(|encoded| {
            HttpRequest::build(
                &method,
                &url,
                &headers,
                encoded,
                timeout_ms,
                self.inner.transport.clone(),
            )
        });

        let request = match request {
            Ok(request) => request,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        let Some(host) = self.inner.host.upgrade() else {
            self.fail(XhrError::Transport("runtime has been shut down".into()));
            return;
        };

        let id = host.next_id();
        {
            let mut state = self.inner.state.borrow_mut();
            state.current = Some(id);
            state.upload_total = request.body.content_length as i64;
        }

        log::debug!("xhr {}: send {} {}", id, method, url);

        host.in_flight.borrow_mut().insert(id, self.clone());

        if host
            .scheduler_tx
            .send(SchedulerMessage::Xhr(id, request))
            .is_err()
        {
            host.in_flight.borrow_mut().remove(&id);
            self.inner.state.borrow_mut().current = None;
            self.fail(XhrError::Transport("event loop is not running".into()));
        }
    }

    /// Cancel the request.
    ///
    /// The first call resets readyState to Unsent; every call fires `abort` on
    /// upload then main. The native call keeps running and its result is
    /// discarded.
    pub fn abort(&self) {
        let (already_aborted, reset) = {
            let state = self.inner.state.borrow();
            (state.aborted, state.ready_state != ReadyState::Unsent)
        };

        if !already_aborted && reset {
            self.ready_state_change(ReadyState::Unsent);
        }

        {
            let mut state = self.inner.state.borrow_mut();
            state.aborted = true;
            if let Some(id) = state.current.take() {
                log::debug!("xhr {}: aborted", id);
            }
        }

        self.inner.upload.fire_abort();
        self.inner.events.fire_abort();
    }

    /// Case-insensitive lookup; `None` maps to `null` in the guest
    pub fn get_response_header(&self, key: &str) -> Option<String> {
        self.inner
            .state
            .borrow()
            .response_headers
            .get(&key.to_ascii_lowercase())
            .cloned()
    }

    /// `name: value\r\n` lines, names lowercased and sorted
    pub fn get_all_response_headers(&self) -> String {
        let state = self.inner.state.borrow();
        let mut out = String::new();

        for (key, value) in &state.response_headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }

        out
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.borrow().ready_state
    }

    pub fn status(&self) -> u16 {
        self.inner.state.borrow().status
    }

    pub fn status_text(&self) -> String {
        self.inner.state.borrow().status_text.clone()
    }

    /// Raw response body
    pub fn response(&self) -> Bytes {
        self.inner.state.borrow().response.clone()
    }

    pub fn response_text(&self) -> String {
        self.inner.state.borrow().response_text.clone()
    }

    /// Timeout in milliseconds, 0 for none
    pub fn timeout(&self) -> u64 {
        self.inner.state.borrow().timeout_ms
    }

    /// Applies to the next `send`
    pub fn set_timeout(&self, timeout_ms: u64) {
        self.inner.state.borrow_mut().timeout_ms = timeout_ms;
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.state.borrow().aborted
    }

    pub fn upload(&self) -> &XmlHttpRequestUpload {
        &self.inner.upload
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn add_event_listener(&self, event_type: EventType, listener: Listener) {
        self.inner.events.add_event_listener(event_type, listener);
    }

    pub fn remove_event_listener(&self, event_type: EventType) {
        self.inner.events.remove_event_listener(event_type);
    }

    pub fn set_onreadystatechange(&self, handler: Option<Listener>) {
        *self.inner.onreadystatechange.borrow_mut() = handler;
    }

    pub fn set_onload(&self, handler: Option<Listener>) {
        self.inner.events.set_onload(handler);
    }

    pub fn set_onprogress(&self, handler: Option<Listener>) {
        self.inner.events.set_onprogress(handler);
    }

    pub fn set_onabort(&self, handler: Option<Listener>) {
        self.inner.events.set_onabort(handler);
    }

    pub fn set_onerror(&self, handler: Option<Listener>) {
        self.inner.events.set_onerror(handler);
    }

    pub fn set_ontimeout(&self, handler: Option<Listener>) {
        self.inner.events.set_ontimeout(handler);
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    fn aborted(&self) -> bool {
        self.inner.state.borrow().aborted
    }

    fn generation(&self) -> u64 {
        self.inner.state.borrow().generation
    }

    /// True once a guest handler has aborted or reopened the object since
    /// `generation` was read
    fn superseded(&self, generation: u64) -> bool {
        let state = self.inner.state.borrow();
        state.aborted || state.generation != generation
    }

    /// Move to `ready_state` and fire `readystatechange`, unless aborted
    fn ready_state_change(&self, ready_state: ReadyState) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.aborted {
                return;
            }
            state.ready_state = ready_state;
        }

        self.inner.events.dispatch(
            &self.inner.onreadystatechange,
            ProgressEvent::new(EventType::ReadyStateChange),
        );
    }

    /// Report a failed send through events
    fn fail(&self, error: XhrError) {
        if self.aborted() {
            log::debug!("suppressing '{}' after abort", error);
            return;
        }
        let generation = self.generation();

        log::debug!("xhr failed: {}", error);

        match error {
            XhrError::DeadlineExceeded => {
                self.inner.upload.fire_timeout();
                if !self.superseded(generation) {
                    self.inner.events.fire_timeout();
                }
            }
            XhrError::Transport(_) => {
                self.inner.upload.fire_error();
                if !self.superseded(generation) {
                    self.inner.events.fire_error();
                }
            }
            XhrError::Construction(_) | XhrError::Read(_) => {
                self.inner.events.fire_error();
            }
        }
    }

    /// Apply a native update for send `id`
    pub(crate) fn apply(&self, id: RequestId, update: XhrUpdate) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.current != Some(id) {
                log::debug!("xhr {}: stale update discarded", id);
                return;
            }
            if update.is_terminal() {
                state.current = None;
            }
        }

        match update {
            XhrUpdate::HeadersReceived {
                status,
                status_text,
                headers,
            } => self.headers_received(status, status_text, headers),
            XhrUpdate::BodyReceived(body) => self.body_received(body),
            XhrUpdate::Failed(error) => self.fail(error),
        }
    }

    fn headers_received(&self, status: u16, status_text: String, headers: Vec<(String, String)>) {
        let (total, generation) = {
            let state = self.inner.state.borrow();
            (state.upload_total, state.generation)
        };

        if self.superseded(generation) {
            return;
        }
        self.inner.upload.fire_progress(total, total);

        if self.superseded(generation) {
            return;
        }
        self.inner.upload.fire_load();

        if self.superseded(generation) {
            return;
        }

        {
            let mut state = self.inner.state.borrow_mut();
            for (key, value) in headers {
                state
                    .response_headers
                    .entry(key.to_ascii_lowercase())
                    .and_modify(|existing| {
                        existing.push_str(", ");
                        existing.push_str(&value);
                    })
                    .or_insert(value);
            }
            state.status = status;
            state.status_text = status_text;
        }

        self.ready_state_change(ReadyState::HeadersReceived);
    }

    fn body_received(&self, body: Bytes) {
        let generation = self.generation();
        if self.superseded(generation) {
            return;
        }

        self.ready_state_change(ReadyState::Loading);

        if self.superseded(generation) {
            return;
        }

        let len = body.len() as i64;
        {
            let mut state = self.inner.state.borrow_mut();
            state.response_text = String::from_utf8_lossy(&body).into_owned();
            state.response = body;
        }

        self.ready_state_change(ReadyState::Done);

        if self.superseded(generation) {
            return;
        }
        self.inner.events.fire_progress(len, len);

        if self.superseded(generation) {
            return;
        }
        self.inner.events.fire_load();
    }
}
