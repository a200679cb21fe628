//! BSB Gateway Event Hub
//!
//! This crate provides the core of the gateway: it turns several independent
//! I/O sources into a single ordered stream of typed events, and correlates
//! asynchronous bus replies with the callers that requested them.
//!
//! # Architecture
//!
//! - Each [`Source`] (serial transport, second timer, delay scheduler, command
//!   surfaces) runs in its own task and pushes [`Event`]s through an
//!   [`Emitter`].
//! - The [`EventHub`] merges those events and hands them, one at a time, to a
//!   single [`Dispatch`] implementation. Handlers never run concurrently, so
//!   dispatcher-owned state needs no locks.
//! - The [`Gateway`] dispatcher owns the table of pending remote requests,
//!   matches `ret`/`ack` telegrams to it, and arms cancellable timeouts through
//!   the [`DelayScheduler`].
//!
//! # Example
//!
//! ```rust,ignore
//! use bsb_hub::{GatewayConfig, GatewayRuntime};
//! use bsb_protocol::demo_table;
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::default();
//! let device = config.adapter_settings.open_serial()?;
//! let runtime = GatewayRuntime::new(device, Arc::new(demo_table()), &config)?;
//! let remote = runtime.remote_client().unwrap();
//! let handle = runtime.start();
//!
//! let reply = remote.get(8700).await?;
//! println!("outside temperature: {:?}", reply.value);
//! handle.stop().await?;
//! ```

pub mod comm;
pub mod config;
pub mod correlate;
pub mod delay;
pub mod error;
pub mod event;
pub mod gateway;
pub mod hub;
pub mod runtime;
pub mod source;
pub mod surface;
pub mod timer;
pub mod trace;
pub mod transport;

pub use comm::{AddressSlot, BusAddresses, BusComm, BusHandle, BusSettings};
pub use config::{AdapterSettings, GatewayConfig, ParitySetting, StopBitsSetting, TriggerConfig};
pub use correlate::{
    result_channel, CorrelationKey, PendingRequests, RequestId, RequestOutcome, ResultReceiver,
    ResultSender,
};
pub use delay::{DelayHandle, DelayScheduler, DelaySource};
pub use error::{BusError, ConfigError, DispatchError, RequestError, TransportError};
pub use event::{Deferred, Event, EventKind, LocalCommand, RemoteAction, RemoteRequest, Tick};
pub use gateway::{Gateway, GatewaySettings, MonitorEvent};
pub use hub::{Dispatch, EventHub, HubHandle};
pub use runtime::GatewayRuntime;
pub use source::{Emitter, Source, StopHandle, StopSignal};
pub use surface::{CommandSender, RemoteClient};
pub use timer::TimerSource;
pub use trace::{
    Alert, AlertAction, LogAlert, MemorySink, SingleFieldLogger, TickAction, TraceLogger,
    TraceRecord, TraceSink, TracingSink, Trigger, TriggerKind,
};
pub use transport::{invert_bytes, BusDevice, RawChunk, TransportConfig, TransportSource, TransportWriter};
