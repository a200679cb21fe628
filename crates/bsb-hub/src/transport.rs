//! Serial transport
//!
//! The transport task is the sole owner of the bus device. It reads chunks,
//! complements them when the adapter inverts the line, and hands them to a
//! [`ChunkHandler`]. Writes requested through a [`TransportWriter`] are run by
//! the same task, so they never overlap. Writes keep being served while a
//! chunk waits for room in the event queue.

use std::future::Future;
use std::io;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::source::StopSignal;

/// A byte stream the bus can run over
pub trait BusDevice: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Bytes already received and waiting to be read
    fn bytes_available(&self) -> io::Result<usize> {
        Ok(0)
    }

    /// Drop everything received but not yet read
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Drop everything queued but not yet sent
    fn discard_output(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BusDevice for SerialStream {
    fn bytes_available(&self) -> io::Result<usize> {
        Ok(self.bytes_to_read().map_err(io::Error::from)? as usize)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn discard_output(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Output).map_err(io::Error::from)
    }
}

/// In-memory device, used with the simulated controller and in tests
impl BusDevice for DuplexStream {}

/// Complement every byte in place
pub fn invert_bytes(data: &mut [u8]) {
    for byte in data.iter_mut() {
        *byte = !*byte;
    }
}

/// Transport options
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Complement bytes in both directions
    pub invert_bytes: bool,
    /// Upper bound for one write
    pub write_timeout: Duration,
    /// Largest chunk handed on at once
    pub read_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            invert_bytes: true,
            write_timeout: Duration::from_millis(250),
            read_buffer: 1024,
        }
    }
}

/// Bytes read in one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Wall-clock time of the read
    pub timestamp: SystemTime,
    /// Line bytes, already un-inverted
    pub bytes: Vec<u8>,
}

/// Receives chunks from the transport task
pub trait ChunkHandler: Send {
    /// Handle one chunk; returning `false` ends the transport loop
    fn on_chunk(&mut self, chunk: RawChunk) -> impl Future<Output = bool> + Send;
}

struct WriteRequest {
    data: Vec<u8>,
    reply: oneshot::Sender<Result<(), TransportError>>,
}

/// Requests writes from the transport task
#[derive(Debug, Clone)]
pub struct TransportWriter {
    tx: mpsc::Sender<WriteRequest>,
    write_timeout: Duration,
}

impl std::fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRequest")
            .field("len", &self.data.len())
            .finish()
    }
}

impl TransportWriter {
    /// Write raw line bytes (inversion is applied by the transport)
    ///
    /// Gives up with [`TransportError::WriteTimeout`] when the transport has
    /// not completed the write within twice the write timeout plus
    /// [`WRITE_REPLY_SLACK`]. A write given up on is skipped by the transport.
    pub async fn write(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(WriteRequest { data, reply })
                .await
                .map_err(|_| TransportError::Closed)?;
            rx.await.map_err(|_| TransportError::Closed)?
        };
        let limit = self.write_timeout * 2 + WRITE_REPLY_SLACK;
        match tokio::time::timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::WriteTimeout(self.write_timeout)),
        }
    }
}

/// Extra wait for a write reply on top of the transport's own write timeout
pub const WRITE_REPLY_SLACK: Duration = Duration::from_millis(100);

/// Owns the device and runs the read/write loop
pub struct TransportSource<D> {
    name: String,
    device: D,
    config: TransportConfig,
    writes: mpsc::Receiver<WriteRequest>,
}

impl<D: BusDevice> TransportSource<D> {
    /// Wrap a device; the writer may be cloned freely
    pub fn new(name: impl Into<String>, device: D, config: TransportConfig) -> (Self, TransportWriter) {
        let (tx, writes) = mpsc::channel(16);
        let write_timeout = config.write_timeout;
        (
            Self {
                name: name.into(),
                device,
                config,
                writes,
            },
            TransportWriter {
                tx,
                write_timeout,
            },
        )
    }

    /// Name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until stopped, EOF or a fatal read error; the device is closed on return
    pub async fn run_with<H: ChunkHandler>(mut self, handler: &mut H, mut stop: StopSignal) {
        if let Err(e) = self.device.discard_input() {
            debug!("{}: cannot discard input: {}", self.name, e);
        }
        if let Err(e) = self.device.discard_output() {
            debug!("{}: cannot discard output: {}", self.name, e);
        }

        let mut buf = vec![0u8; self.config.read_buffer.max(1)];
        let mut writes_open = true;
        info!("{} running", self.name);

        loop {
            if stop.is_stopped() {
                break;
            }

            tokio::select! {
                _ = stop.stopped() => break,

                request = self.writes.recv(), if writes_open => match request {
                    Some(request) => serve_write(&mut self.device, &self.config, request).await,
                    None => writes_open = false,
                },

                read = self.device.read(&mut buf) => match read {
                    Ok(0) => {
                        warn!("{}: device closed", self.name);
                        break;
                    }
                    Ok(n) => {
                        let len = n + drain_buffered(&mut self.device, &mut buf[n..]).await;
                        let mut bytes = buf[..len].to_vec();
                        if self.config.invert_bytes {
                            invert_bytes(&mut bytes);
                        }
                        trace!("{}: read {} bytes", self.name, len);
                        let chunk = RawChunk {
                            timestamp: SystemTime::now(),
                            bytes,
                        };
                        // The dispatcher may be waiting on a write while the
                        // queue is full, so writes go on until the chunk is taken
                        let delivered = {
                            let deliver = handler.on_chunk(chunk);
                            tokio::pin!(deliver);
                            loop {
                                tokio::select! {
                                    biased;

                                    _ = stop.stopped() => break false,

                                    delivered = &mut deliver => break delivered,

                                    request = self.writes.recv(), if writes_open => match request {
                                        Some(request) => {
                                            serve_write(&mut self.device, &self.config, request).await
                                        }
                                        None => writes_open = false,
                                    },
                                }
                            }
                        };
                        if !delivered {
                            break;
                        }
                    }
                    Err(e) if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                    Err(e) => {
                        warn!("{}: read failed: {}", self.name, e);
                        break;
                    }
                },
            }
        }

        info!("{} closed", self.name);
    }
}

async fn drain_buffered<D: BusDevice>(device: &mut D, buf: &mut [u8]) -> usize {
    let mut len = 0;
    while len < buf.len() {
        match device.bytes_available() {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match device.read(&mut buf[len..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => len += n,
        }
    }
    len
}

async fn serve_write<D: BusDevice>(device: &mut D, config: &TransportConfig, request: WriteRequest) {
    let WriteRequest { data, reply } = request;
    if reply.is_closed() {
        debug!("Skipping write of {} bytes; requester gave up", data.len());
        return;
    }
    let result = write_frame(device, config, data).await;
    let _ = reply.send(result);
}

async fn write_frame<D: BusDevice>(
    device: &mut D,
    config: &TransportConfig,
    mut data: Vec<u8>,
) -> Result<(), TransportError> {
    if config.invert_bytes {
        invert_bytes(&mut data);
    }

    let io = async {
        device.write_all(&data).await?;
        device.flush().await
    };
    match tokio::time::timeout(config.write_timeout, io).await {
        Ok(result) => result.map_err(TransportError::from),
        Err(_) => {
            // Not retried; the partial frame is thrown away
            if let Err(e) = device.discard_output() {
                debug!("Cannot discard output: {}", e);
            }
            Err(TransportError::WriteTimeout(config.write_timeout))
        }
    }
}
