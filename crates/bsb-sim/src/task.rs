//! Virtual controller actor task
//!
//! Owns a [`VirtualController`] and the far end of an in-memory bus. The task
//! uses a select! loop to:
//! - Read frames from the bus stream and answer them
//! - Handle control commands (mute, overwrite values, shutdown)

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bsb_protocol::{FieldTable, FieldValue, FrameCodec};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::VirtualController;

/// Behaviour of the simulated bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimOptions {
    /// Bus address of the controller
    pub address: u8,
    /// Line is inverted, like on the usual adapters
    pub inverted: bool,
    /// Delay before each reply, milliseconds
    pub reply_delay_ms: u64,
    /// Echo every received byte back, like a shared half-duplex line
    pub echo: bool,
    /// Start without answering
    pub muted: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            address: 0x00,
            inverted: true,
            reply_delay_ms: 50,
            echo: false,
            muted: false,
        }
    }
}

/// Commands that can be sent to the controller task
#[derive(Debug)]
pub enum SimCommand {
    /// Stop or resume answering
    SetMuted(bool),
    /// Overwrite a field value
    SetValue {
        /// Field to overwrite
        field_id: u32,
        /// New value
        value: FieldValue,
    },
    /// Read back a field value
    Query {
        /// Field to read
        field_id: u32,
        /// Where to send it
        reply: oneshot::Sender<Option<FieldValue>>,
    },
    /// End the task
    Shutdown,
}

fn line_bytes(mut data: Vec<u8>, inverted: bool) -> Vec<u8> {
    if inverted {
        for byte in data.iter_mut() {
            *byte = !*byte;
        }
    }
    data
}

/// Run the controller until the stream closes or a shutdown is requested
pub async fn run_virtual_controller<S>(
    mut stream: S,
    mut controller: VirtualController,
    options: SimOptions,
    mut cmd_rx: mpsc::Receiver<SimCommand>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut codec = FrameCodec::new();
    let mut buf = [0u8; 512];
    let mut muted = options.muted;
    let reply_delay = Duration::from_millis(options.reply_delay_ms);

    info!(
        "Starting virtual controller at {:02X} (inverted: {})",
        controller.address(),
        options.inverted
    );

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual controller stream closed");
                        break;
                    }
                    Ok(n) => {
                        if options.echo {
                            stream.write_all(&buf[..n]).await?;
                        }
                        let data = line_bytes(buf[..n].to_vec(), options.inverted);
                        codec.push_bytes(&data);

                        while let Some(frame) = codec.next_frame() {
                            if muted {
                                debug!("Muted; ignoring {} {}", frame.packet_type, frame.field_id);
                                continue;
                            }
                            let Some(reply) = controller.handle(&frame) else {
                                continue;
                            };
                            let bytes = match reply.encode() {
                                Ok(bytes) => bytes,
                                Err(e) => {
                                    warn!("Cannot encode reply: {}", e);
                                    continue;
                                }
                            };
                            if !reply_delay.is_zero() {
                                tokio::time::sleep(reply_delay).await;
                            }
                            stream.write_all(&line_bytes(bytes, options.inverted)).await?;
                            stream.flush().await?;
                        }
                    }
                    Err(e) => {
                        warn!("Virtual controller read error: {}", e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SimCommand::SetMuted(on)) => {
                        info!("Virtual controller {}", if on { "muted" } else { "unmuted" });
                        muted = on;
                    }
                    Some(SimCommand::SetValue { field_id, value }) => {
                        controller.set_value(field_id, value);
                    }
                    Some(SimCommand::Query { field_id, reply }) => {
                        let _ = reply.send(controller.value(field_id).cloned());
                    }
                    Some(SimCommand::Shutdown) | None => {
                        info!("Virtual controller shutting down");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Handle to a running controller task
#[derive(Debug)]
pub struct SimHandle {
    tx: mpsc::Sender<SimCommand>,
    task: JoinHandle<io::Result<()>>,
}

impl SimHandle {
    /// Stop or resume answering
    pub async fn set_muted(&self, muted: bool) {
        let _ = self.tx.send(SimCommand::SetMuted(muted)).await;
    }

    /// Overwrite a field value
    pub async fn set_value(&self, field_id: u32, value: FieldValue) {
        let _ = self.tx.send(SimCommand::SetValue { field_id, value }).await;
    }

    /// Read back a field value
    pub async fn value(&self, field_id: u32) -> Option<FieldValue> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SimCommand::Query { field_id, reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Wait for the task to end on its own (the gateway closed the bus)
    pub async fn join(self) -> io::Result<()> {
        self.task.await.map_err(io::Error::other)?
    }

    /// Ask the task to stop and wait for it
    pub async fn shutdown(self) -> io::Result<()> {
        let _ = self.tx.send(SimCommand::Shutdown).await;
        self.join().await
    }
}

/// Spawn a controller loaded with the demonstration values
///
/// Returns the gateway's end of the bus and a handle steering the controller.
pub fn simulated_device(table: Arc<FieldTable>, options: SimOptions) -> (DuplexStream, SimHandle) {
    let (gateway_end, controller_end) = tokio::io::duplex(1024);
    let controller = VirtualController::with_demo_values(options.address, table);
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(run_virtual_controller(controller_end, controller, options, rx));
    (gateway_end, SimHandle { tx, task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsb_protocol::{demo_table, Frame, PacketType};

    async fn exchange(device: &mut DuplexStream, frame: Frame, inverted: bool) -> Frame {
        let bytes = line_bytes(frame.encode().unwrap(), inverted);
        device.write_all(&bytes).await.unwrap();

        let mut codec = FrameCodec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = device.read(&mut buf).await.unwrap();
            assert!(n > 0, "controller closed the bus");
            codec.push_bytes(&line_bytes(buf[..n].to_vec(), inverted));
            if let Some(reply) = codec.next_frame() {
                return reply;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_over_inverted_line() {
        let (mut device, sim) = simulated_device(Arc::new(demo_table()), SimOptions::default());

        let get = Frame::new(0x44, 0x00, PacketType::Get, 8830, Vec::new());
        let reply = exchange(&mut device, get, true).await;
        assert_eq!(reply.packet_type, PacketType::Ret);
        assert_eq!(reply.payload, vec![0x00, 0x01, 0xE0]);

        sim.set_value(8830, FieldValue::Decimal(50.0)).await;
        assert_eq!(sim.value(8830).await, Some(FieldValue::Decimal(50.0)));

        sim.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_controller_stays_silent() {
        let options = SimOptions {
            inverted: false,
            muted: true,
            ..SimOptions::default()
        };
        let (mut device, sim) = simulated_device(Arc::new(demo_table()), options);

        let get = Frame::new(0x44, 0x00, PacketType::Get, 8700, Vec::new());
        device.write_all(&get.encode().unwrap()).await.unwrap();

        let mut buf = [0u8; 16];
        let silent = tokio::time::timeout(Duration::from_secs(5), device.read(&mut buf)).await;
        assert!(silent.is_err());

        sim.set_muted(false).await;
        let reply = exchange(&mut device, get, false).await;
        assert_eq!(reply.packet_type, PacketType::Ret);
        sim.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ends_when_bus_closes() {
        let (device, sim) = simulated_device(Arc::new(demo_table()), SimOptions::default());
        drop(device);
        sim.join().await.unwrap();
    }
}
