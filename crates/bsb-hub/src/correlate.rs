//! Reply correlation
//!
//! Remote requests wait in [`PendingRequests`] under the [`CorrelationKey`] of
//! the reply that completes them. A matching reply fulfills every waiter with
//! that key at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bsb_protocol::{PacketType, Telegram};
use tokio::sync::oneshot;

use crate::delay::DelayHandle;
use crate::error::RequestError;

/// Reply shape plus field id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey {
    /// `Ret` for reads, `Ack` for writes
    pub packet_type: PacketType,
    /// Field the reply refers to
    pub field_id: u32,
}

impl CorrelationKey {
    /// Key completing a `get`
    pub fn for_get(field_id: u32) -> Self {
        Self {
            packet_type: PacketType::Ret,
            field_id,
        }
    }

    /// Key completing a `set`
    pub fn for_set(field_id: u32) -> Self {
        Self {
            packet_type: PacketType::Ack,
            field_id,
        }
    }

    /// Key of an inbound telegram, if it is a correlatable reply
    pub fn of_reply(telegram: &Telegram) -> Option<Self> {
        match telegram.packet_type {
            PacketType::Ret | PacketType::Ack => Some(Self {
                packet_type: telegram.packet_type,
                field_id: telegram.field_id,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.packet_type.name(), self.field_id)
    }
}

/// Identifies one pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a remote caller eventually receives
pub type RequestOutcome = Result<Telegram, RequestError>;

/// Create a single-use result channel
pub fn result_channel() -> (ResultSender, ResultReceiver) {
    let (tx, rx) = oneshot::channel();
    let sender = ResultSender {
        slot: Arc::new(Mutex::new(Some(tx))),
        attempts: Arc::new(AtomicUsize::new(0)),
    };
    (sender, ResultReceiver { rx })
}

/// Sending half of a result channel
///
/// Clones share the same slot: the first [`fulfill`](Self::fulfill) wins and
/// every later attempt is rejected (but still counted).
#[derive(Debug, Clone)]
pub struct ResultSender {
    slot: Arc<Mutex<Option<oneshot::Sender<RequestOutcome>>>>,
    attempts: Arc<AtomicUsize>,
}

impl ResultSender {
    /// Deliver an outcome; returns `false` if one was already delivered
    pub fn fulfill(&self, outcome: RequestOutcome) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.take() {
            Some(tx) => {
                // The caller may have given up already; the slot is spent either way
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Whether an outcome has been delivered
    pub fn is_fulfilled(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    /// Number of fulfill calls so far, accepted or not
    pub fn fulfillment_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Receiving half of a result channel
#[derive(Debug)]
pub struct ResultReceiver {
    rx: oneshot::Receiver<RequestOutcome>,
}

impl ResultReceiver {
    /// Wait for the outcome
    pub async fn recv(self) -> RequestOutcome {
        self.rx.await.unwrap_or(Err(RequestError::Abandoned))
    }

    /// Wait for the outcome, giving up after `wait`
    pub async fn recv_timeout(self, wait: Duration) -> RequestOutcome {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RequestError::NoResponse(wait)),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    id: RequestId,
    result: ResultSender,
    timeout: Option<DelayHandle>,
}

/// Table of remote requests awaiting their reply
///
/// Owned by the dispatcher; never shared.
#[derive(Debug)]
pub struct PendingRequests {
    next_id: u64,
    cancel_stale_timeouts: bool,
    waiters: HashMap<CorrelationKey, Vec<Waiter>>,
    keys_by_id: HashMap<RequestId, CorrelationKey>,
}

impl PendingRequests {
    /// Create an empty table
    ///
    /// With `cancel_stale_timeouts`, resolving a request also cancels its
    /// armed timeout.
    pub fn new(cancel_stale_timeouts: bool) -> Self {
        Self {
            next_id: 0,
            cancel_stale_timeouts,
            waiters: HashMap::new(),
            keys_by_id: HashMap::new(),
        }
    }

    /// Add a waiter for `key`
    pub fn register(&mut self, key: CorrelationKey, result: ResultSender) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.waiters.entry(key).or_default().push(Waiter {
            id,
            result,
            timeout: None,
        });
        self.keys_by_id.insert(id, key);
        id
    }

    /// Remember the timeout armed for `id`; returns `false` if it is no longer pending
    pub fn attach_timeout(&mut self, id: RequestId, handle: DelayHandle) -> bool {
        let Some(key) = self.keys_by_id.get(&id) else {
            return false;
        };
        match self
            .waiters
            .get_mut(key)
            .and_then(|list| list.iter_mut().find(|w| w.id == id))
        {
            Some(waiter) => {
                waiter.timeout = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Fulfill and remove every waiter for `key`; returns how many there were
    pub fn resolve(&mut self, key: &CorrelationKey, telegram: &Telegram) -> usize {
        let Some(list) = self.waiters.remove(key) else {
            return 0;
        };
        let count = list.len();
        for waiter in list {
            self.keys_by_id.remove(&waiter.id);
            if self.cancel_stale_timeouts {
                if let Some(timeout) = &waiter.timeout {
                    timeout.cancel();
                }
            }
            waiter.result.fulfill(Ok(telegram.clone()));
        }
        count
    }

    /// Remove one waiter without fulfilling it
    pub fn remove(&mut self, id: RequestId) -> Option<ResultSender> {
        let key = self.keys_by_id.remove(&id)?;
        let list = self.waiters.get_mut(&key)?;
        let pos = list.iter().position(|w| w.id == id)?;
        let waiter = list.remove(pos);
        if list.is_empty() {
            self.waiters.remove(&key);
        }
        Some(waiter.result)
    }

    /// Whether `id` is still waiting
    pub fn contains(&self, id: RequestId) -> bool {
        self.keys_by_id.contains_key(&id)
    }

    /// Number of waiters for `key`
    pub fn pending_for(&self, key: &CorrelationKey) -> usize {
        self.waiters.get(key).map_or(0, Vec::len)
    }

    /// Total number of waiters
    pub fn len(&self) -> usize {
        self.keys_by_id.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.keys_by_id.is_empty()
    }
}
