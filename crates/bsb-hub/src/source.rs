//! Event sources
//!
//! A [`Source`] owns one blocking resource (a serial device, a timer, a
//! scheduler queue) and runs in its own task, pushing [`Event`]s into the hub
//! through an [`Emitter`]. Every source observes the same cooperative
//! [`StopSignal`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::event::Event;

/// Something that produces events from its own task
pub trait Source: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether the source honours the stop signal
    ///
    /// Non-stoppable sources (e.g. a blocking console reader) are aborted
    /// instead of joined when the hub stops.
    fn stoppable(&self) -> bool {
        true
    }

    /// Run until the stop signal is raised or the resource is exhausted
    fn run(self, emitter: Emitter, stop: StopSignal) -> impl Future<Output = ()> + Send;
}

/// Handle for pushing events into the hub
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::Sender<Event>,
}

impl Emitter {
    pub(crate) fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Push an event, waiting for room in the hub's queue
    ///
    /// Returns `false` once the hub has stopped consuming events.
    pub async fn emit(&self, event: Event) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Whether the hub has stopped consuming events
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Cooperative stop flag observed by sources
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once stop has been requested
    pub async fn stopped(&mut self) {
        // A dropped sender means nobody can ever un-stop us
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Requests the hub and all of its sources to stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Raise the stop flag
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether stop has been requested
    pub fn is_stop_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// A fresh signal observing this handle
    pub fn signal(&self) -> StopSignal {
        StopSignal::new(self.tx.subscribe())
    }
}
