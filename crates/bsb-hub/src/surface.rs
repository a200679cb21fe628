//! Request surfaces
//!
//! Thin handles that turn caller intent into hub events. A [`RemoteClient`]
//! waits for exactly one outcome per request; a [`CommandSender`] is
//! fire-and-forget, with feedback arriving on the gateway's monitor channel.

use std::time::Duration;

use bsb_protocol::{FieldValue, Telegram};

use crate::correlate::{result_channel, ResultReceiver};
use crate::error::RequestError;
use crate::event::{Event, LocalCommand, RemoteAction, RemoteRequest};
use crate::source::Emitter;

/// Default caller-side wait for a remote request
pub const DEFAULT_REMOTE_WAIT: Duration = Duration::from_secs(10);

/// Issues remote get/set requests
#[derive(Debug, Clone)]
pub struct RemoteClient {
    emitter: Emitter,
    wait: Duration,
}

impl RemoteClient {
    /// Create a client that gives up after `wait`
    pub fn new(emitter: Emitter, wait: Duration) -> Self {
        Self { emitter, wait }
    }

    /// Submit a request without waiting for its outcome
    pub async fn submit(&self, action: RemoteAction) -> Result<ResultReceiver, RequestError> {
        let (result, rx) = result_channel();
        if !self.emitter.emit(Event::Remote(RemoteRequest { action, result })).await {
            return Err(RequestError::Abandoned);
        }
        Ok(rx)
    }

    /// Read a field
    pub async fn get(&self, field_id: u32) -> Result<Telegram, RequestError> {
        self.submit(RemoteAction::Get { field_id })
            .await?
            .recv_timeout(self.wait)
            .await
    }

    /// Write a field; resolves with the controller's acknowledgement
    pub async fn set(&self, field_id: u32, value: FieldValue) -> Result<Telegram, RequestError> {
        self.submit(RemoteAction::Set { field_id, value })
            .await?
            .recv_timeout(self.wait)
            .await
    }
}

/// Issues local operator commands
#[derive(Debug, Clone)]
pub struct CommandSender {
    emitter: Emitter,
}

impl CommandSender {
    /// Wrap an emitter
    pub fn new(emitter: Emitter) -> Self {
        Self { emitter }
    }

    /// Queue a command; `false` once the hub has stopped
    pub async fn send(&self, command: LocalCommand) -> bool {
        self.emitter.emit(Event::Local(command)).await
    }
}
