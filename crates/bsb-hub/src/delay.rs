//! Delay scheduler source
//!
//! [`DelayScheduler::delay`] queues a [`Deferred`] action and returns at once;
//! the [`DelaySource`] task emits it as [`Event::Delay`] when it falls due.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::event::{Deferred, Event};
use crate::source::{Emitter, Source, StopSignal};

type DelayId = u64;

enum DelayCommand {
    Schedule {
        id: DelayId,
        due: Instant,
        action: Deferred,
    },
    Cancel(DelayId),
}

/// Handle to one scheduled action
///
/// Dropping the handle does not cancel the action.
#[derive(Debug, Clone)]
pub struct DelayHandle {
    id: DelayId,
    tx: mpsc::UnboundedSender<DelayCommand>,
}

impl DelayHandle {
    /// Retire the action if it has not fired yet
    pub fn cancel(&self) {
        let _ = self.tx.send(DelayCommand::Cancel(self.id));
    }
}

impl std::fmt::Debug for DelayCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelayCommand::Schedule { id, action, .. } => f
                .debug_struct("Schedule")
                .field("id", id)
                .field("action", action)
                .finish(),
            DelayCommand::Cancel(id) => f.debug_tuple("Cancel").field(id).finish(),
        }
    }
}

/// Schedules actions on a [`DelaySource`]
#[derive(Debug, Clone)]
pub struct DelayScheduler {
    tx: mpsc::UnboundedSender<DelayCommand>,
    next_id: Arc<AtomicU64>,
}

impl DelayScheduler {
    /// Emit `action` once `after` has elapsed
    pub fn delay(&self, action: Deferred, after: Duration) -> DelayHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let due = Instant::now() + after;
        if self
            .tx
            .send(DelayCommand::Schedule { id, due, action })
            .is_err()
        {
            debug!("Delay source gone; action {} dropped", id);
        }
        DelayHandle {
            id,
            tx: self.tx.clone(),
        }
    }
}

/// Source that fires scheduled actions
pub struct DelaySource {
    name: String,
    rx: mpsc::UnboundedReceiver<DelayCommand>,
}

impl DelaySource {
    /// Create the source and its scheduler
    pub fn new(name: impl Into<String>) -> (Self, DelayScheduler) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = DelayScheduler {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
        };
        (
            Self {
                name: name.into(),
                rx,
            },
            scheduler,
        )
    }
}

impl Source for DelaySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(mut self, emitter: Emitter, mut stop: StopSignal) {
        let mut queue: BTreeMap<(Instant, DelayId), Deferred> = BTreeMap::new();
        let mut due_by_id: HashMap<DelayId, Instant> = HashMap::new();
        let mut commands_open = true;

        loop {
            if stop.is_stopped() {
                break;
            }
            let next_due = queue.keys().next().map(|(due, _)| *due);

            tokio::select! {
                _ = stop.stopped() => break,

                cmd = self.rx.recv(), if commands_open => match cmd {
                    Some(DelayCommand::Schedule { id, due, action }) => {
                        trace!("Scheduled delay {}", id);
                        queue.insert((due, id), action);
                        due_by_id.insert(id, due);
                    }
                    Some(DelayCommand::Cancel(id)) => {
                        if let Some(due) = due_by_id.remove(&id) {
                            queue.remove(&(due, id));
                            trace!("Cancelled delay {}", id);
                        }
                    }
                    None => commands_open = false,
                },

                _ = sleep_until(next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))),
                    if next_due.is_some() =>
                {
                    let now = Instant::now();
                    while let Some(entry) = queue.first_entry() {
                        if entry.key().0 > now {
                            break;
                        }
                        let ((_, id), action) = entry.remove_entry();
                        due_by_id.remove(&id);
                        if !emitter.emit(Event::Delay(action)).await {
                            return;
                        }
                    }
                }

                else => break,
            }
        }

        debug!("{} stopped with {} actions unfired", self.name, queue.len());
    }
}
