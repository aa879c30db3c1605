pub mod body;
pub mod event;
pub mod multipart;
pub mod pipe;
pub mod transport;
pub mod xhr;

use crate::config::TransportConfig;
use crate::task::{HttpRequest, RequestId, XhrUpdate};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tokio::sync::mpsc;
use xhr::XmlHttpRequest;

/// Message sent from the guest thread to the event loop
pub enum SchedulerMessage {
    /// Issue the native call for one `send`
    Xhr(RequestId, HttpRequest),
    /// Shutdown the event loop
    Shutdown,
}

/// Message sent from native tasks back to the guest thread
#[derive(Debug)]
pub enum CallbackMessage {
    Xhr(RequestId, XhrUpdate),
}

/// Guest-thread state shared by every request object of a runtime
pub(crate) struct Host {
    pub(crate) scheduler_tx: mpsc::UnboundedSender<SchedulerMessage>,
    pub(crate) in_flight: RefCell<HashMap<RequestId, XmlHttpRequest>>,
    next_id: Cell<RequestId>,
}

impl Host {
    pub(crate) fn next_id(&self) -> RequestId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

/// Guest side of the bridge.
///
/// Lives on the guest's single thread: it constructs request objects and
/// applies native updates to them in `process_callbacks`, which is the only
/// place native results reach guest handlers.
pub struct Runtime {
    host: Rc<Host>,
    transport: TransportConfig,
    callback_rx: mpsc::UnboundedReceiver<CallbackMessage>,
}

impl Runtime {
    /// Create a runtime plus the channel ends to hand to [`run_event_loop`]
    pub fn new(
        transport: TransportConfig,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<SchedulerMessage>,
        mpsc::UnboundedSender<CallbackMessage>,
    ) {
        let (scheduler_tx, scheduler_rx) = mpsc::unbounded_channel();
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();

        let host = Rc::new(Host {
            scheduler_tx,
            in_flight: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        });

        (
            Self {
                host,
                transport,
                callback_rx,
            },
            scheduler_rx,
            callback_tx,
        )
    }

    /// `new XMLHttpRequest()`
    pub fn xml_http_request(&self) -> XmlHttpRequest {
        XmlHttpRequest::new(Rc::downgrade(&self.host), self.transport.clone())
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// Number of sends whose native call has not reported a final result
    pub fn in_flight(&self) -> usize {
        self.host.in_flight.borrow().len()
    }

    /// Apply every update already delivered by the event loop.
    ///
    /// Returns how many updates were applied.
    pub fn process_callbacks(&mut self) -> usize {
        let mut processed = 0;

        while let Ok(message) = self.callback_rx.try_recv() {
            self.dispatch(message);
            processed += 1;
        }

        processed
    }

    /// Wait for and apply updates until no request is in flight
    pub async fn run_until_idle(&mut self) {
        self.process_callbacks();

        while self.in_flight() > 0 {
            match self.callback_rx.recv().await {
                Some(message) => self.dispatch(message),
                None => {
                    log::warn!("Event loop gone with {} requests in flight", self.in_flight());
                    break;
                }
            }
        }
    }

    fn dispatch(&self, message: CallbackMessage) {
        match message {
            CallbackMessage::Xhr(id, update) => {
                let xhr = if update.is_terminal() {
                    self.host.in_flight.borrow_mut().remove(&id)
                } else {
                    self.host.in_flight.borrow().get(&id).cloned()
                };

                match xhr {
                    Some(xhr) => xhr.apply(id, update),
                    None => log::debug!("xhr {}: no request object, dropping update", id),
                }
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _ = self.host.scheduler_tx.send(SchedulerMessage::Shutdown);
    }
}

/// Event loop: issues native calls for scheduled sends until shutdown.
///
/// Each send runs as its own tokio task so a slow request never holds up
/// another.
pub async fn run_event_loop(
    mut scheduler_rx: mpsc::UnboundedReceiver<SchedulerMessage>,
    callback_tx: mpsc::UnboundedSender<CallbackMessage>,
) {
    while let Some(message) = scheduler_rx.recv().await {
        match message {
            SchedulerMessage::Xhr(id, request) => {
                let callback_tx = callback_tx.clone();
                tokio::spawn(async move {
                    transport::execute_xhr(id, request, callback_tx).await;
                });
            }
            SchedulerMessage::Shutdown => {
                log::info!("Shutting down event loop");
                break;
            }
        }
    }
}
