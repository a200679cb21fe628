//! Gateway against the simulated controller

use std::sync::Arc;
use std::time::Duration;

use bsb_hub::hub::DEFAULT_QUEUE_DEPTH;
use bsb_hub::{
    GatewayConfig, GatewayRuntime, LocalCommand, MemorySink, MonitorEvent, RequestError,
};
use bsb_protocol::{demo_table, FieldValue, PacketType};
use bsb_sim::{simulated_device, SimHandle, SimOptions};
use tokio::sync::mpsc;

mod helpers {
    use super::*;

    pub fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.adapter_settings.adapter_device = ":sim".into();
        config
    }

    pub fn runtime(config: &GatewayConfig, options: SimOptions) -> (GatewayRuntime, SimHandle) {
        let table = Arc::new(demo_table());
        let (device, sim) = simulated_device(table.clone(), options);
        let runtime = GatewayRuntime::new(device, table, config).unwrap();
        (runtime, sim)
    }
}

#[tokio::test(start_paused = true)]
async fn test_remote_get_and_set() {
    let (runtime, sim) = helpers::runtime(&helpers::config(), SimOptions::default());
    let remote = runtime.remote_client().unwrap();
    let hub = runtime.start();

    let reply = remote.get(8700).await.unwrap();
    assert_eq!(reply.packet_type, PacketType::Ret);
    assert_eq!(reply.dst, 0x44);
    assert_eq!(reply.value, Some(FieldValue::Decimal(4.5)));

    let ack = remote.set(710, FieldValue::Decimal(22.5)).await.unwrap();
    assert_eq!(ack.packet_type, PacketType::Ack);
    assert_eq!(sim.value(710).await, Some(FieldValue::Decimal(22.5)));

    let reply = remote.get(710).await.unwrap();
    assert_eq!(reply.value, Some(FieldValue::Decimal(22.5)));

    hub.stop().await.unwrap();
    sim.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_replies() {
    let (runtime, sim) = helpers::runtime(&helpers::config(), SimOptions::default());
    let remote = runtime.remote_client().unwrap();
    let hub = runtime.start();

    let first = remote.submit(bsb_hub::RemoteAction::Get { field_id: 712 }).await.unwrap();
    let write = remote
        .submit(bsb_hub::RemoteAction::Set {
            field_id: 712,
            value: FieldValue::Decimal(17.0),
        })
        .await
        .unwrap();
    let second = remote.submit(bsb_hub::RemoteAction::Get { field_id: 712 }).await.unwrap();

    let (a, b, c) = tokio::join!(first.recv(), write.recv(), second.recv());
    // Both reads are fulfilled by the first ret for 712
    assert_eq!(a.unwrap().value, Some(FieldValue::Decimal(18.0)));
    assert_eq!(b.unwrap().packet_type, PacketType::Ack);
    assert_eq!(c.unwrap().value, Some(FieldValue::Decimal(18.0)));

    let dispatcher = hub.stop().await.unwrap();
    assert!(dispatcher.pending().is_empty());
    sim.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_muted_controller_times_out() {
    let options = SimOptions {
        muted: true,
        ..SimOptions::default()
    };
    let (runtime, sim) = helpers::runtime(&helpers::config(), options);
    let remote = runtime.remote_client().unwrap();
    let hub = runtime.start();

    let start = tokio::time::Instant::now();
    let outcome = remote.get(8700).await;
    assert!(matches!(outcome, Err(RequestError::Timeout(d)) if d == Duration::from_secs(3)));
    assert!(start.elapsed() >= Duration::from_secs(3));

    sim.set_muted(false).await;
    assert!(remote.get(8700).await.is_ok());

    hub.stop().await.unwrap();
    sim.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_request_burst_beyond_queue_depth() {
    let options = SimOptions {
        reply_delay_ms: 0,
        ..SimOptions::default()
    };
    let (runtime, sim) = helpers::runtime(&helpers::config(), options);
    let remote = runtime.remote_client().unwrap();
    let hub = runtime.start();

    let mut requests = tokio::task::JoinSet::new();
    for _ in 0..DEFAULT_QUEUE_DEPTH + 44 {
        let remote = remote.clone();
        requests.spawn(async move { remote.get(8700).await });
    }
    while let Some(outcome) = requests.join_next().await {
        // Late callers may give up, but every caller hears back
        assert!(!matches!(outcome.unwrap(), Err(RequestError::Abandoned)));
    }

    // Backlog drains and the gateway answers again
    tokio::time::sleep(Duration::from_secs(120)).await;
    let reply = remote.get(8700).await.unwrap();
    assert_eq!(reply.value, Some(FieldValue::Decimal(4.5)));

    let stopped = tokio::time::timeout(Duration::from_secs(60), hub.stop()).await;
    assert!(stopped.is_ok(), "hub did not stop");
    sim.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_refused_set_fails_without_bus_traffic() {
    let (runtime, sim) = helpers::runtime(&helpers::config(), SimOptions::default());
    let remote = runtime.remote_client().unwrap();
    let hub = runtime.start();

    let outcome = remote.set(8830, FieldValue::Decimal(60.0)).await;
    assert!(matches!(outcome, Err(RequestError::Bus(_))));

    hub.stop().await.unwrap();
    sim.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_loggers_trace_on_atomic_cadence() {
    let mut config = helpers::config();
    config.loggers = vec![(8700, 5)];
    let (mut runtime, sim) = helpers::runtime(&config, SimOptions::default());
    let sink = MemorySink::new();
    runtime.add_configured_loggers(&config, |_| sink.clone());
    let hub = runtime.start();

    tokio::time::sleep(Duration::from_secs(21)).await;
    hub.stop().await.unwrap();

    let records = sink.records();
    assert!(
        (3..=5).contains(&records.len()),
        "expected one record per 5 s, got {}",
        records.len()
    );
    assert!(records.iter().all(|r| r.value == FieldValue::Decimal(4.5)));
    sim.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_operator_commands_reach_monitor() {
    let (mut runtime, sim) = helpers::runtime(&helpers::config(), SimOptions::default());
    let (monitor_tx, mut monitor) = mpsc::channel(32);
    runtime.set_monitor(monitor_tx);
    let commands = runtime.command_sender();
    let hub = runtime.start();

    assert!(commands.send(LocalCommand::Get { field_id: 8740 }).await);
    let reply = loop {
        match monitor.recv().await {
            Some(MonitorEvent::Telegram { telegram, .. }) if telegram.packet_type == PacketType::Ret => {
                break telegram
            }
            Some(_) => continue,
            None => panic!("monitor closed"),
        }
    };
    assert_eq!(reply.dst, 0x43);
    assert_eq!(reply.value, Some(FieldValue::Decimal(20.5)));

    assert!(commands.send(LocalCommand::Get { field_id: 4242 }).await);
    assert!(matches!(
        monitor.recv().await,
        Some(MonitorEvent::CommandFailed { .. })
    ));

    assert!(commands.send(LocalCommand::Quit).await);
    hub.join().await.unwrap();
    sim.join().await.unwrap();
}
