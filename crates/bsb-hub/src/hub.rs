//! Event hub
//!
//! Merges the events of all running sources into one queue and hands them to
//! a single [`Dispatch`] implementation, strictly one at a time.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::event::Event;
use crate::source::{Emitter, Source, StopHandle, StopSignal};

/// Default depth of the merged event queue
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Consumer of the merged event stream
pub trait Dispatch: Send + 'static {
    /// Handle one event to completion
    ///
    /// Errors are logged by the hub; they never stop the loop. Neither does a
    /// panic, which the hub catches and logs the same way.
    fn dispatch(&mut self, event: Event) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

struct RunningSource {
    name: String,
    stoppable: bool,
    task: JoinHandle<()>,
}

/// Owns every source and the merged queue
pub struct EventHub {
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
    sources: Vec<RunningSource>,
}

impl EventHub {
    /// Create a hub with the default queue depth
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_DEPTH)
    }

    /// Create a hub with a custom queue depth
    pub fn with_capacity(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth);
        let (stop, stop_rx) = StopHandle::new();
        Self {
            tx,
            rx,
            stop,
            stop_rx,
            sources: Vec::new(),
        }
    }

    /// Emitter for pushing events from outside any source
    pub fn emitter(&self) -> Emitter {
        Emitter::new(self.tx.clone())
    }

    /// Handle that stops the hub and all sources
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Register a source and spawn its task
    pub fn add_and_start_source<S: Source>(&mut self, source: S) {
        let name = source.name().to_string();
        let stoppable = source.stoppable();
        let emitter = self.emitter();
        let signal = StopSignal::new(self.stop_rx.clone());
        let stop = self.stop.clone();

        let task_name = name.clone();
        let task = tokio::spawn(async move {
            source.run(emitter, signal).await;
            if stop.is_stop_requested() {
                debug!("Source {} finished", task_name);
            } else {
                warn!("Source {} ended unexpectedly; not restarted", task_name);
            }
        });

        debug!("Started source {}", name);
        self.sources.push(RunningSource {
            name,
            stoppable,
            task,
        });
    }

    /// Names of the registered sources, in start order
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }

    /// Consume events until stopped, then shut every source down
    ///
    /// Returns the dispatcher so its final state can be inspected.
    pub async fn run<D: Dispatch>(self, mut dispatcher: D) -> D {
        let EventHub {
            tx,
            mut rx,
            stop,
            stop_rx,
            sources,
        } = self;
        drop(tx);
        let mut signal = StopSignal::new(stop_rx);

        info!("Event hub running with {} sources", sources.len());

        loop {
            tokio::select! {
                biased;

                _ = signal.stopped() => break,

                event = rx.recv() => {
                    let Some(event) = event else {
                        debug!("All emitters gone");
                        break;
                    };
                    let kind = event.kind();
                    let summary = format!("{event:?}");
                    let outcome = AssertUnwindSafe(dispatcher.dispatch(event))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(DispatchError::Panicked(panic_message(&*panic))));
                    if let Err(e) = outcome {
                        error!("Error handling {} event {}: {}", kind, summary, e);
                    }
                }
            }
        }

        info!("Event hub stopping");
        stop.stop();
        // Unblocks sources waiting for queue room; queued events are discarded
        rx.close();

        for source in sources {
            if source.stoppable {
                if let Err(e) = source.task.await {
                    warn!("Source {} panicked: {}", source.name, e);
                }
            } else {
                source.task.abort();
                debug!("Aborted source {}", source.name);
            }
        }
        drop(rx);

        info!("Event hub stopped");
        dispatcher
    }

    /// Run the hub in a background task
    pub fn start<D: Dispatch>(self, dispatcher: D) -> HubHandle<D> {
        let stop = self.stop.clone();
        let task = tokio::spawn(self.run(dispatcher));
        HubHandle { stop, task }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a hub running in the background
pub struct HubHandle<D> {
    stop: StopHandle,
    task: JoinHandle<D>,
}

impl<D> HubHandle<D> {
    /// Handle that stops the hub
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the hub and wait until no further events will be dispatched
    pub async fn stop(self) -> Result<D, JoinError> {
        self.stop.stop();
        self.task.await
    }

    /// Wait for the hub to stop on its own
    pub async fn join(self) -> Result<D, JoinError> {
        self.task.await
    }
}
