//! Gateway assembly
//!
//! Wires the standard sources (timer, delay scheduler, bus) into a hub with a
//! [`Gateway`] dispatcher.

use std::sync::Arc;
use std::time::Duration;

use bsb_protocol::FieldTable;
use tokio::sync::mpsc;
use tracing::warn;

use crate::comm::{BusComm, BusHandle};
use crate::config::GatewayConfig;
use crate::delay::DelaySource;
use crate::error::ConfigError;
use crate::gateway::{Gateway, MonitorEvent};
use crate::hub::{EventHub, HubHandle};
use crate::source::{Source, StopHandle};
use crate::surface::{CommandSender, RemoteClient};
use crate::timer::TimerSource;
use crate::trace::{LogAlert, SingleFieldLogger, TraceLogger, TraceSink, Trigger};
use crate::transport::BusDevice;

/// A configured gateway, ready to run
pub struct GatewayRuntime {
    hub: EventHub,
    gateway: Gateway,
    bus: BusHandle,
    table: Arc<FieldTable>,
    remote_wait: Duration,
    remote_enabled: bool,
}

impl GatewayRuntime {
    /// Build the hub and start its sources
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<D: BusDevice>(device: D, table: Arc<FieldTable>, config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut hub = EventHub::new();
        let (delay, scheduler) = DelaySource::new("delay");
        let (comm, bus) = BusComm::new(
            "bsb",
            device,
            table.clone(),
            config.bus_settings()?,
            config.adapter_settings.transport_config()?,
        );

        hub.add_and_start_source(TimerSource::new());
        hub.add_and_start_source(delay);
        hub.add_and_start_source(comm);

        let mut gateway = Gateway::new(bus.clone(), scheduler, config.gateway_settings()?);
        gateway.set_stop_handle(hub.stop_handle());

        Ok(Self {
            hub,
            gateway,
            bus,
            table,
            remote_wait: config.remote_wait()?,
            remote_enabled: config.remote_interface_enable,
        })
    }

    /// Add a trace logger
    pub fn add_logger(&mut self, logger: Box<dyn TraceLogger>) {
        self.gateway.add_logger(logger);
    }

    /// Add the loggers and triggers listed in `config`
    ///
    /// `sink` is asked for one sink per logged field. Triggers log a warning
    /// when they fire.
    pub fn add_configured_loggers<S, F>(&mut self, config: &GatewayConfig, mut sink: F)
    where
        S: TraceSink + 'static,
        F: FnMut(u32) -> S,
    {
        for &(field, interval) in &config.loggers {
            if self.table.get(field).is_none() {
                warn!("Logger for unknown field {}; requests will fail", field);
            }
            let mut logger = SingleFieldLogger::new(field, interval, config.atomic_interval, sink(field));
            for trigger in config.triggers.iter().filter(|t| t.field == field) {
                logger.add_trigger(Trigger::new(trigger.kind, trigger.threshold, LogAlert));
            }
            self.gateway.add_logger(Box::new(logger));
        }
    }

    /// Route mirrored traffic and command failures to `monitor`
    pub fn set_monitor(&mut self, monitor: mpsc::Sender<MonitorEvent>) {
        self.gateway.set_monitor(monitor);
    }

    /// Start an additional source
    pub fn add_source<S: Source>(&mut self, source: S) {
        self.hub.add_and_start_source(source);
    }

    /// Client for remote requests, unless the remote surface is disabled
    pub fn remote_client(&self) -> Option<RemoteClient> {
        self.remote_enabled
            .then(|| RemoteClient::new(self.hub.emitter(), self.remote_wait))
    }

    /// Sender for local operator commands
    pub fn command_sender(&self) -> CommandSender {
        CommandSender::new(self.hub.emitter())
    }

    /// Handle that stops the gateway
    pub fn stop_handle(&self) -> StopHandle {
        self.hub.stop_handle()
    }

    /// Bus handle
    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    /// Names of the running sources
    pub fn source_names(&self) -> Vec<&str> {
        self.hub.source_names()
    }

    /// Run on the current task until stopped
    pub async fn run(self) -> Gateway {
        self.hub.run(self.gateway).await
    }

    /// Run in a background task
    pub fn start(self) -> HubHandle<Gateway> {
        self.hub.start(self.gateway)
    }
}
