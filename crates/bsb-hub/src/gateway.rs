//! Gateway dispatcher
//!
//! Handles every event in arrival order. Owns the pending-request table, the
//! trace loggers and the link to the local monitor, so none of them need
//! locking.

use std::time::Duration;

use bsb_protocol::{PacketType, Telegram};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::comm::{AddressSlot, BusHandle};
use crate::correlate::{CorrelationKey, PendingRequests};
use crate::delay::DelayScheduler;
use crate::error::{BusError, DispatchError, RequestError};
use crate::event::{Deferred, Event, LocalCommand, RemoteAction, RemoteRequest, Tick};
use crate::hub::Dispatch;
use crate::source::StopHandle;
use crate::trace::{TickAction, TraceLogger};

/// Dispatcher knobs
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Ticks reach the loggers only on multiples of this many seconds
    pub atomic_interval: u64,
    /// Window for a matching reply to a remote request
    pub request_timeout: Duration,
    /// Cancel a request's timeout once it is resolved
    pub cancel_stale_timeouts: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            atomic_interval: 5,
            request_timeout: Duration::from_secs(3),
            cancel_stale_timeouts: true,
        }
    }
}

/// What the local monitor is shown
#[derive(Debug)]
pub enum MonitorEvent {
    /// Mirrored bus traffic
    Telegram {
        /// Slot the telegram concerns
        slot: Option<AddressSlot>,
        /// The telegram
        telegram: Telegram,
    },
    /// A local command could not be sent
    CommandFailed {
        /// Command as issued
        command: String,
        /// Why it failed
        error: BusError,
    },
    /// Sniff mode was switched
    SniffMode(bool),
}

/// The dispatcher of the gateway
pub struct Gateway {
    bus: BusHandle,
    delay: DelayScheduler,
    pending: PendingRequests,
    loggers: Vec<Box<dyn TraceLogger>>,
    settings: GatewaySettings,
    monitor: Option<mpsc::Sender<MonitorEvent>>,
    stop: Option<StopHandle>,
}

impl Gateway {
    /// Create a dispatcher sending through `bus` and arming timeouts on `delay`
    pub fn new(bus: BusHandle, delay: DelayScheduler, settings: GatewaySettings) -> Self {
        Self {
            bus,
            delay,
            pending: PendingRequests::new(settings.cancel_stale_timeouts),
            loggers: Vec::new(),
            settings,
            monitor: None,
            stop: None,
        }
    }

    /// Add a trace logger
    pub fn add_logger(&mut self, logger: Box<dyn TraceLogger>) {
        self.loggers.push(logger);
    }

    /// Route mirrored traffic and command failures to `monitor`
    pub fn set_monitor(&mut self, monitor: mpsc::Sender<MonitorEvent>) {
        self.monitor = Some(monitor);
    }

    /// Handle used by the `quit` command
    pub fn set_stop_handle(&mut self, stop: StopHandle) {
        self.stop = Some(stop);
    }

    /// The pending-request table
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Dispatcher settings
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    fn notify(&self, event: MonitorEvent) {
        if let Some(monitor) = &self.monitor {
            if monitor.try_send(event).is_err() {
                debug!("Monitor busy or gone; dropping event");
            }
        }
    }

    async fn on_tick(&mut self, tick: Tick) -> Result<(), DispatchError> {
        if tick.unix_secs % self.settings.atomic_interval.max(1) != 0 {
            return Ok(());
        }

        let mut wanted = Vec::new();
        for logger in &mut self.loggers {
            if logger.tick(tick) == TickAction::RequestValue {
                wanted.push(logger.field_id());
            }
        }

        let mut first_error = None;
        for field in wanted {
            if let Err(source) = self.bus.send_get(field, AddressSlot::Device, true).await {
                warn!("Logger request for {} failed: {}", field, source);
                if first_error.is_none() {
                    first_error = Some(DispatchError::LoggerRequest { field, source });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn on_bus(&mut self, telegrams: Vec<(Option<AddressSlot>, Telegram)>) {
        let sniff = self.bus.sniff_mode();

        for (slot, telegram) in telegrams {
            match slot {
                Some(AddressSlot::Device) if telegram.packet_type == PacketType::Ret => {
                    if let Some(value) = &telegram.value {
                        for logger in &mut self.loggers {
                            if logger.field_id() == telegram.field_id {
                                logger.log_value(telegram.timestamp, value);
                            }
                        }
                    }
                }
                Some(AddressSlot::Remote) => {
                    if let Some(key) = CorrelationKey::of_reply(&telegram) {
                        let resolved = self.pending.resolve(&key, &telegram);
                        debug!("{} resolved {} pending requests", key, resolved);
                    }
                }
                _ => {}
            }

            if sniff || slot == Some(AddressSlot::Operator) {
                self.notify(MonitorEvent::Telegram { slot, telegram });
            }
        }
    }

    async fn on_remote(&mut self, request: RemoteRequest) {
        let RemoteRequest { action, result } = request;
        let key = action.correlation_key();
        let id = self.pending.register(key, result.clone());

        let sent = match &action {
            RemoteAction::Get { field_id } => {
                self.bus.send_get(*field_id, AddressSlot::Remote, true).await
            }
            RemoteAction::Set { field_id, value } => {
                self.bus
                    .send_set(*field_id, value, AddressSlot::Remote, true)
                    .await
            }
        };

        match sent {
            Ok(()) => {
                let handle = self.delay.delay(
                    Deferred::ExpireRequest { id, result },
                    self.settings.request_timeout,
                );
                // Replies are only handled after this event, so the entry is still there
                self.pending.attach_timeout(id, handle);
            }
            Err(e) => {
                debug!("Remote request {} for {} failed: {}", id, key, e);
                self.pending.remove(id);
                result.fulfill(Err(RequestError::Bus(e)));
            }
        }
    }

    fn on_delay(&mut self, action: Deferred) {
        match action {
            Deferred::ExpireRequest { id, result } => {
                if self.pending.remove(id).is_some() {
                    debug!("Request {} timed out", id);
                }
                let timeout = self.settings.request_timeout;
                if !result.fulfill(Err(RequestError::Timeout(timeout))) {
                    warn!("Stale timeout for request {} rejected: already fulfilled", id);
                }
            }
            Deferred::Callback(callback) => callback(),
        }
    }

    async fn on_local(&mut self, command: LocalCommand) -> Result<(), DispatchError> {
        let sent = match &command {
            LocalCommand::Get { field_id } => {
                self.bus.send_get(*field_id, AddressSlot::Operator, true).await
            }
            LocalCommand::Set {
                field_id,
                value,
                validate,
            } => {
                self.bus
                    .send_set(*field_id, value, AddressSlot::Operator, *validate)
                    .await
            }
            LocalCommand::Sniff(on) => {
                self.bus.set_sniff_mode(*on);
                info!("Sniff mode {}", if *on { "on" } else { "off" });
                self.notify(MonitorEvent::SniffMode(*on));
                Ok(())
            }
            LocalCommand::Quit => {
                info!("Quit requested");
                if let Some(stop) = &self.stop {
                    stop.stop();
                }
                Ok(())
            }
        };

        match sent {
            Ok(()) => Ok(()),
            Err(error) if self.monitor.is_some() => {
                self.notify(MonitorEvent::CommandFailed {
                    command: command.to_string(),
                    error,
                });
                Ok(())
            }
            Err(source) => Err(DispatchError::LocalCommand {
                command: command.to_string(),
                source,
            }),
        }
    }
}

impl Dispatch for Gateway {
    async fn dispatch(&mut self, event: Event) -> Result<(), DispatchError> {
        match event {
            Event::Tick(tick) => self.on_tick(tick).await,
            Event::Bus(telegrams) => {
                self.on_bus(telegrams);
                Ok(())
            }
            Event::Remote(request) => {
                self.on_remote(request).await;
                Ok(())
            }
            Event::Delay(action) => {
                self.on_delay(action);
                Ok(())
            }
            Event::Local(command) => self.on_local(command).await,
        }
    }
}
