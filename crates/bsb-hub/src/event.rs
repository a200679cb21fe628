//! Event types consumed by the dispatcher
//!
//! Every source emits one variant of [`Event`]; the dispatcher matches on it.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bsb_protocol::{FieldValue, Telegram};

use crate::comm::AddressSlot;
use crate::correlate::{CorrelationKey, RequestId, ResultSender};

/// Wall-clock tick from the timer source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Whole seconds since the Unix epoch
    pub unix_secs: u64,
}

impl Tick {
    /// Tick for a wall-clock instant, rounded to the nearest second
    pub fn at(time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self {
            unix_secs: (since.as_millis() as u64 + 500) / 1000,
        }
    }

    /// Tick for an explicit second count
    pub fn from_unix_secs(unix_secs: u64) -> Self {
        Self { unix_secs }
    }
}

/// An action delivered by the delay source once its delay elapsed
pub enum Deferred {
    /// Fail a remote request that got no reply in time
    ExpireRequest {
        /// Pending request to retire
        id: RequestId,
        /// Channel to fulfill with the timeout failure
        result: ResultSender,
    },
    /// Arbitrary callback run on the dispatcher
    Callback(Box<dyn FnOnce() + Send>),
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::ExpireRequest { id, .. } => {
                f.debug_struct("ExpireRequest").field("id", id).finish()
            }
            Deferred::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Transaction requested by a remote caller
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteAction {
    /// Read a field
    Get {
        /// Field to read
        field_id: u32,
    },
    /// Write a field
    Set {
        /// Field to write
        field_id: u32,
        /// Value to write
        value: FieldValue,
    },
}

impl RemoteAction {
    /// Key of the reply that completes this action
    pub fn correlation_key(&self) -> CorrelationKey {
        match self {
            RemoteAction::Get { field_id } => CorrelationKey::for_get(*field_id),
            RemoteAction::Set { field_id, .. } => CorrelationKey::for_set(*field_id),
        }
    }
}

/// A remote request together with the channel awaiting its outcome
#[derive(Debug)]
pub struct RemoteRequest {
    /// What to do on the bus
    pub action: RemoteAction,
    /// Where to deliver the outcome
    pub result: ResultSender,
}

/// Command from the local operator surface
#[derive(Debug, Clone, PartialEq)]
pub enum LocalCommand {
    /// Read a field with the operator address
    Get {
        /// Field to read
        field_id: u32,
    },
    /// Write a field with the operator address
    Set {
        /// Field to write
        field_id: u32,
        /// Value to write
        value: FieldValue,
        /// Whether to check the value against the field rules first
        validate: bool,
    },
    /// Toggle mirroring of all bus traffic
    Sniff(bool),
    /// Shut the gateway down
    Quit,
}

impl fmt::Display for LocalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalCommand::Get { field_id } => write!(f, "get {field_id}"),
            LocalCommand::Set {
                field_id, value, ..
            } => write!(f, "set {field_id} {value}"),
            LocalCommand::Sniff(on) => write!(f, "sniff {}", if *on { "on" } else { "off" }),
            LocalCommand::Quit => f.write_str("quit"),
        }
    }
}

/// Which source produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Second timer
    Timer,
    /// Delay scheduler
    Delay,
    /// Decoded bus traffic
    Bus,
    /// Remote request surface
    Remote,
    /// Local command surface
    Local,
}

impl EventKind {
    /// Source name used in logs
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Timer => "timer",
            EventKind::Delay => "delay",
            EventKind::Bus => "bsb",
            EventKind::Remote => "web",
            EventKind::Local => "cmd",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One unit of work for the dispatcher
#[derive(Debug)]
pub enum Event {
    /// Timer tick
    Tick(Tick),
    /// Due deferred action
    Delay(Deferred),
    /// Telegrams decoded from one transport chunk, in line order
    Bus(Vec<(Option<AddressSlot>, Telegram)>),
    /// Remote get/set request
    Remote(RemoteRequest),
    /// Local operator command
    Local(LocalCommand),
}

impl Event {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Tick(_) => EventKind::Timer,
            Event::Delay(_) => EventKind::Delay,
            Event::Bus(_) => EventKind::Bus,
            Event::Remote(_) => EventKind::Remote,
            Event::Local(_) => EventKind::Local,
        }
    }
}
