//! Bus communication layer
//!
//! Sits on top of the transport: decodes chunks into telegrams tagged with the
//! local address slot they concern, and originates `get`/`set` transactions
//! from one of the gateway's own bus addresses.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bsb_protocol::{FieldTable, FieldValue, Frame, FrameCodec, PacketType, Telegram};
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::{BusError, ConfigError};
use crate::event::Event;
use crate::source::{Emitter, Source, StopSignal};
use crate::transport::{BusDevice, ChunkHandler, RawChunk, TransportConfig, TransportSource, TransportWriter};

/// Minimum number of consecutive bus addresses the gateway occupies
pub const MIN_ADDRESSES: u8 = 3;

/// Role of one of the gateway's own bus addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSlot {
    /// Periodic logging on behalf of trace loggers
    Device,
    /// Local operator commands
    Operator,
    /// Remote requests
    Remote,
}

impl AddressSlot {
    /// Offset from the base address
    pub fn index(self) -> u8 {
        match self {
            AddressSlot::Device => 0,
            AddressSlot::Operator => 1,
            AddressSlot::Remote => 2,
        }
    }

    fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(AddressSlot::Device),
            1 => Some(AddressSlot::Operator),
            2 => Some(AddressSlot::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for AddressSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressSlot::Device => "device",
            AddressSlot::Operator => "operator",
            AddressSlot::Remote => "remote",
        })
    }
}

/// The block of consecutive addresses owned by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusAddresses {
    base: u8,
    count: u8,
}

impl BusAddresses {
    /// Claim `count` addresses starting at `base`
    pub fn new(base: u8, count: u8) -> Result<Self, ConfigError> {
        if count < MIN_ADDRESSES {
            return Err(ConfigError::Invalid {
                key: "n_addresses",
                reason: format!("need at least {MIN_ADDRESSES}, got {count}"),
            });
        }
        if base as u16 + count as u16 > 0x80 {
            return Err(ConfigError::Invalid {
                key: "bus_address",
                reason: format!("{base:#04x} + {count} addresses exceeds 0x7f"),
            });
        }
        Ok(Self { base, count })
    }

    /// First address of the block
    pub fn base(&self) -> u8 {
        self.base
    }

    /// Address used for `slot`
    pub fn address(&self, slot: AddressSlot) -> u8 {
        self.base + slot.index()
    }

    /// Whether `addr` belongs to the block
    pub fn contains(&self, addr: u8) -> bool {
        (self.base..self.base + self.count).contains(&addr)
    }

    /// Slot that `addr` is used for, if any
    pub fn slot_of(&self, addr: u8) -> Option<AddressSlot> {
        if !self.contains(addr) {
            return None;
        }
        AddressSlot::from_index(addr - self.base)
    }

    /// Slot a telegram concerns: receiver first, then sender
    pub fn route(&self, telegram: &Telegram) -> Option<AddressSlot> {
        self.slot_of(telegram.dst)
            .or_else(|| self.slot_of(telegram.src))
    }
}

/// Addressing and pacing of originated transactions
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Gateway address block
    pub addresses: BusAddresses,
    /// Address of the heating controller
    pub device_address: u8,
    /// Minimum gap between two transmissions
    pub min_wait: Duration,
}

struct TelegramDecoder {
    codec: FrameCodec,
    table: Arc<FieldTable>,
    addresses: BusAddresses,
    emitter: Emitter,
}

impl ChunkHandler for TelegramDecoder {
    async fn on_chunk(&mut self, chunk: RawChunk) -> bool {
        self.codec.push_bytes(&chunk.bytes);

        let mut telegrams = Vec::new();
        while let Some(frame) = self.codec.next_frame() {
            let telegram = Telegram::from_frame(frame, &self.table, chunk.timestamp);
            let slot = self.addresses.route(&telegram);
            telegrams.push((slot, telegram));
        }

        if telegrams.is_empty() {
            return true;
        }
        self.emitter.emit(Event::Bus(telegrams)).await
    }
}

/// Bus source: transport plus telegram decoding
pub struct BusComm<D> {
    transport: TransportSource<D>,
    table: Arc<FieldTable>,
    addresses: BusAddresses,
}

impl<D: BusDevice> BusComm<D> {
    /// Wrap a device; returns the source and the handle used to transmit
    pub fn new(
        name: impl Into<String>,
        device: D,
        table: Arc<FieldTable>,
        settings: BusSettings,
        transport: TransportConfig,
    ) -> (Self, BusHandle) {
        let (transport, writer) = TransportSource::new(name, device, transport);
        let handle = BusHandle {
            writer,
            table: table.clone(),
            addresses: settings.addresses,
            device_address: settings.device_address,
            min_wait: settings.min_wait,
            last_send: Arc::new(Mutex::new(None)),
            sniff: Arc::new(AtomicBool::new(false)),
        };
        (
            Self {
                transport,
                table,
                addresses: settings.addresses,
            },
            handle,
        )
    }
}

impl<D: BusDevice> Source for BusComm<D> {
    fn name(&self) -> &str {
        self.transport.name()
    }

    async fn run(self, emitter: Emitter, stop: StopSignal) {
        let mut decoder = TelegramDecoder {
            codec: FrameCodec::new(),
            table: self.table,
            addresses: self.addresses,
            emitter,
        };
        self.transport.run_with(&mut decoder, stop).await;
    }
}

/// Originates transactions on the bus
#[derive(Debug, Clone)]
pub struct BusHandle {
    writer: TransportWriter,
    table: Arc<FieldTable>,
    addresses: BusAddresses,
    device_address: u8,
    min_wait: Duration,
    last_send: Arc<Mutex<Option<Instant>>>,
    sniff: Arc<AtomicBool>,
}

impl BusHandle {
    /// Request the value of a field
    pub async fn send_get(&self, field_id: u32, slot: AddressSlot, validate: bool) -> Result<(), BusError> {
        if validate {
            self.table.field(field_id)?;
        }
        let frame = Frame::new(
            self.addresses.address(slot),
            self.device_address,
            PacketType::Get,
            field_id,
            Vec::new(),
        );
        self.transmit(frame).await
    }

    /// Write a value to a field
    ///
    /// The field must be known even without validation, since the table
    /// decides how the value is encoded.
    pub async fn send_set(
        &self,
        field_id: u32,
        value: &FieldValue,
        slot: AddressSlot,
        validate: bool,
    ) -> Result<(), BusError> {
        let field = self.table.field(field_id)?;
        if validate {
            field.validate(value)?;
        }
        let payload = field.encode(value)?;
        let frame = Frame::new(
            self.addresses.address(slot),
            self.device_address,
            PacketType::Set,
            field_id,
            payload,
        );
        self.transmit(frame).await
    }

    async fn transmit(&self, frame: Frame) -> Result<(), BusError> {
        let bytes = frame.encode()?;

        let mut last_send = self.last_send.lock().await;
        if let Some(previous) = *last_send {
            let ready = previous + self.min_wait;
            if Instant::now() < ready {
                sleep_until(ready).await;
            }
        }
        let result = self.writer.write(bytes).await;
        *last_send = Some(Instant::now());

        debug!(
            "Sent {} {} {:02X}->{:02X}",
            frame.packet_type, frame.field_id, frame.src, frame.dst
        );
        result.map_err(BusError::from)
    }

    /// Whether all traffic is mirrored to the local surface
    pub fn sniff_mode(&self) -> bool {
        self.sniff.load(Ordering::Relaxed)
    }

    /// Switch mirroring of all traffic
    pub fn set_sniff_mode(&self, on: bool) {
        self.sniff.store(on, Ordering::Relaxed);
    }

    /// Field table used for encoding
    pub fn table(&self) -> &Arc<FieldTable> {
        &self.table
    }

    /// Gateway address block
    pub fn addresses(&self) -> &BusAddresses {
        &self.addresses
    }
}
