//! Integration tests for the gateway hub
//!
//! These tests drive a complete runtime over an in-memory bus, with the test
//! itself playing the controller on the far end:
//! - Reply correlation across several waiting requests
//! - Logger cadence on the atomic interval
//! - Graceful shutdown while the transport is blocked reading
//! - Containment of handler panics
//! - Properties of the line inversion and frame codec

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bsb_hub::{
    invert_bytes, Deferred, Emitter, Event, GatewayConfig, GatewayRuntime, RemoteAction, RequestError, Source,
    StopHandle, StopSignal, Tick, TickAction, TraceLogger,
};
use bsb_protocol::{demo_table, FieldValue, Frame, FrameCodec, PacketType};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Runtime over an inverted in-memory line; returns the controller's end
    pub fn runtime(config: &GatewayConfig) -> (GatewayRuntime, DuplexStream) {
        let (gateway_end, controller_end) = tokio::io::duplex(1024);
        let runtime = GatewayRuntime::new(gateway_end, Arc::new(demo_table()), config).unwrap();
        (runtime, controller_end)
    }

    /// Scripted controller end of the bus
    pub struct Controller {
        pub line: DuplexStream,
        codec: FrameCodec,
    }

    impl Controller {
        pub fn new(line: DuplexStream) -> Self {
            Self {
                line,
                codec: FrameCodec::new(),
            }
        }

        pub async fn next_frame(&mut self) -> Frame {
            let mut buf = [0u8; 256];
            loop {
                if let Some(frame) = self.codec.next_frame() {
                    return frame;
                }
                let n = self.line.read(&mut buf).await.unwrap();
                assert!(n > 0, "gateway closed the bus");
                let mut chunk = buf[..n].to_vec();
                invert_bytes(&mut chunk);
                self.codec.push_bytes(&chunk);
            }
        }

        pub async fn send(&mut self, frame: Frame) {
            let mut bytes = frame.encode().unwrap();
            invert_bytes(&mut bytes);
            self.line.write_all(&bytes).await.unwrap();
        }
    }

    /// Reply from the controller to the remote slot
    pub fn reply(packet_type: PacketType, field_id: u32, payload: Vec<u8>) -> Frame {
        Frame::new(0x00, 0x44, packet_type, field_id, payload)
    }

    /// Logger that records which ticks it saw and never asks for values
    pub struct TickRecorder {
        pub seen: Arc<Mutex<Vec<u64>>>,
    }

    impl TraceLogger for TickRecorder {
        fn field_id(&self) -> u32 {
            8700
        }

        fn tick(&mut self, tick: Tick) -> TickAction {
            self.seen.lock().unwrap().push(tick.unix_secs);
            TickAction::Idle
        }

        fn log_value(&mut self, _timestamp: SystemTime, _value: &FieldValue) {}
    }

    /// Emits fixed events, then idles until stopped
    pub struct Script {
        pub events: Vec<Event>,
    }

    impl Source for Script {
        fn name(&self) -> &str {
            "script"
        }

        async fn run(self, emitter: Emitter, mut stop: StopSignal) {
            for event in self.events {
                if !emitter.emit(event).await {
                    return;
                }
            }
            stop.stopped().await;
        }
    }

    /// Keeps emitting callbacks that record whether stop was already requested
    pub struct Flood {
        pub stop: StopHandle,
        pub ran: Arc<Mutex<Vec<bool>>>,
    }

    impl Source for Flood {
        fn name(&self) -> &str {
            "flood"
        }

        async fn run(self, emitter: Emitter, _stop: StopSignal) {
            loop {
                let stop = self.stop.clone();
                let ran = self.ran.clone();
                let record = move || ran.lock().unwrap().push(stop.is_stop_requested());
                if !emitter.emit(Event::Delay(Deferred::Callback(Box::new(record)))).await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

// ============================================================================
// Correlation
// ============================================================================

mod correlation_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reply_fulfills_every_waiter_with_its_key() {
        let (runtime, line) = runtime(&GatewayConfig::default());
        let remote = runtime.remote_client().unwrap();
        let hub = runtime.start();
        let mut controller = Controller::new(line);

        let get_a = remote.submit(RemoteAction::Get { field_id: 710 }).await.unwrap();
        let set = remote
            .submit(RemoteAction::Set {
                field_id: 710,
                value: FieldValue::Decimal(20.0),
            })
            .await
            .unwrap();
        let get_b = remote.submit(RemoteAction::Get { field_id: 710 }).await.unwrap();

        let sent: Vec<PacketType> = [
            controller.next_frame().await,
            controller.next_frame().await,
            controller.next_frame().await,
        ]
        .iter()
        .map(|f| f.packet_type)
        .collect();
        assert_eq!(sent, vec![PacketType::Get, PacketType::Set, PacketType::Get]);

        controller
            .send(reply(PacketType::Ret, 710, vec![0x00, 0x00, 0xD2]))
            .await;
        assert_eq!(get_a.recv().await.unwrap().value, Some(FieldValue::Decimal(21.0)));
        assert_eq!(get_b.recv().await.unwrap().value, Some(FieldValue::Decimal(21.0)));

        controller.send(reply(PacketType::Ack, 710, Vec::new())).await;
        assert_eq!(set.recv().await.unwrap().packet_type, PacketType::Ack);

        let gateway = hub.stop().await.unwrap();
        assert!(gateway.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_reply_does_not_resolve() {
        let (runtime, line) = runtime(&GatewayConfig::default());
        let remote = runtime.remote_client().unwrap();
        let hub = runtime.start();
        let mut controller = Controller::new(line);

        let get = remote.submit(RemoteAction::Get { field_id: 8700 }).await.unwrap();
        controller.next_frame().await;

        // Same field, but addressed to another bus participant
        controller
            .send(Frame::new(0x00, 0x0A, PacketType::Ret, 8700, vec![0x00, 0x00, 0x10]))
            .await;

        let started = tokio::time::Instant::now();
        assert!(matches!(get.recv().await, Err(RequestError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_secs(3));

        hub.stop().await.unwrap();
    }
}

// ============================================================================
// Logger cadence
// ============================================================================

mod cadence_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_loggers_only_see_atomic_ticks() {
        let (mut runtime, _line) = runtime(&GatewayConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        runtime.add_logger(Box::new(TickRecorder { seen: seen.clone() }));
        let hub = runtime.start();

        tokio::time::sleep(Duration::from_secs(20)).await;
        hub.stop().await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4, "ticks seen: {seen:?}");
        assert!(seen.iter().all(|s| s % 5 == 0));
        assert!(seen.windows(2).all(|w| w[1] - w[0] == 5));
    }
}

// ============================================================================
// Shutdown
// ============================================================================

mod shutdown_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_device_while_reading() {
        let (runtime, mut line) = runtime(&GatewayConfig::default());
        let remote = runtime.remote_client().unwrap();
        let names: Vec<String> = runtime.source_names().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["timer", "delay", "bsb"]);
        let hub = runtime.start();

        tokio::time::sleep(Duration::from_secs(2)).await;
        hub.stop().await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(line.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(remote.get(8700).await, Err(RequestError::Abandoned)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_dispatched_after_stop() {
        let (mut runtime, _line) = runtime(&GatewayConfig::default());
        let ran = Arc::new(Mutex::new(Vec::new()));
        let stop = runtime.stop_handle();
        runtime.add_source(Flood { stop, ran: ran.clone() });
        let hub = runtime.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        hub.stop().await.unwrap();

        let dispatched = ran.lock().unwrap().len();
        assert!(dispatched >= 50, "only {dispatched} callbacks ran");
        assert!(ran.lock().unwrap().iter().all(|after_stop| !after_stop));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ran.lock().unwrap().len(), dispatched);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_remote_surface() {
        let config = GatewayConfig {
            remote_interface_enable: false,
            ..GatewayConfig::default()
        };
        let (runtime, _line) = runtime(&config);
        assert!(runtime.remote_client().is_none());
    }
}

// ============================================================================
// Handler faults
// ============================================================================

mod fault_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_is_contained() {
        let (mut runtime, line) = runtime(&GatewayConfig::default());
        let remote = runtime.remote_client().unwrap();
        let faulty = Deferred::Callback(Box::new(|| {
            let empty: Vec<u8> = Vec::new();
            let _first = empty[0];
        }));
        runtime.add_source(Script {
            events: vec![Event::Delay(faulty)],
        });
        let hub = runtime.start();
        let mut controller = Controller::new(line);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let get = remote.submit(RemoteAction::Get { field_id: 8700 }).await.unwrap();
        assert_eq!(controller.next_frame().await.packet_type, PacketType::Get);
        controller
            .send(reply(PacketType::Ret, 8700, vec![0x00, 0x00, 0x2D]))
            .await;
        assert_eq!(get.recv().await.unwrap().value, Some(FieldValue::Decimal(4.5)));

        let gateway = hub.stop().await.unwrap();
        assert!(gateway.pending().is_empty());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn frame_strategy() -> impl Strategy<Value = Frame> {
        (
            0u8..0x7F,
            any::<u8>(),
            prop::sample::select(vec![
                PacketType::Inf,
                PacketType::Set,
                PacketType::Ack,
                PacketType::Get,
                PacketType::Ret,
            ]),
            any::<u32>(),
            prop::collection::vec(any::<u8>(), 0..8),
        )
            .prop_map(|(src, dst, packet_type, field_id, payload)| {
                Frame::new(src, dst, packet_type, field_id, payload)
            })
    }

    proptest! {
        #[test]
        fn prop_inversion_round_trip(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let mut line = data.clone();
            invert_bytes(&mut line);
            prop_assert!(line.iter().zip(&data).all(|(l, d)| *l == !*d));
            invert_bytes(&mut line);
            prop_assert_eq!(line, data);
        }

        #[test]
        fn prop_frames_survive_arbitrary_chunking(
            frames in prop::collection::vec(frame_strategy(), 1..5),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let stream: Vec<u8> = frames.iter().flat_map(|f| f.encode().unwrap()).collect();
            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len())).collect();
            points.push(stream.len());
            points.sort_unstable();

            let mut codec = FrameCodec::new();
            let mut decoded = Vec::new();
            let mut from = 0;
            for to in points {
                codec.push_bytes(&stream[from..to]);
                from = to;
                while let Some(frame) = codec.next_frame() {
                    decoded.push(frame);
                }
            }
            prop_assert_eq!(decoded, frames);
        }
    }
}
