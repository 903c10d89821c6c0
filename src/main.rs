mod dedup;
mod executor;
mod fsm;
mod link;
mod telemetry;

use clap::Parser;
use crosslight_shared::{codec, now_ms, timing, topics::TopicSet, Mode};
use executor::{CommandExecutor, Outcome};
use link::{EdgeLink, LinkConfig, LinkEvent};
use rumqttc::{AsyncClient, QoS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::TelemetrySource;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "edge-controller", about = "Traffic-light edge controller")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// MQTT username
    #[arg(long, default_value = "demo")]
    user: String,

    /// MQTT password
    #[arg(long, default_value = "demo_pass")]
    password: String,

    /// City identifier for the topic namespace
    #[arg(long, default_value = "demo")]
    city: String,

    /// Intersection identifier for the topic namespace
    #[arg(long, default_value = "001")]
    intersection: String,

    /// MQTT client identifier
    #[arg(long, default_value = "edge-001")]
    device_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let topics = TopicSet::new(&args.city, &args.intersection);

    info!("Edge controller starting: {}", args.device_id);
    info!("  broker: {}:{}", args.host, args.port);
    info!("  cmd topic: {}", topics.cmd);

    let config = LinkConfig {
        broker_host: args.host,
        broker_port: args.port,
        username: args.user,
        password: args.password,
        client_id: args.device_id,
        ..Default::default()
    };

    let started = now_ms();
    let mut link = EdgeLink::connect(config, topics.clone())?;
    let client = link.client();

    let executor = Arc::new(Mutex::new(CommandExecutor::new(started)));

    // 0 means connected; otherwise the moment the broker was lost
    let disconnected_since = Arc::new(AtomicU64::new(started));

    spawn_cycle_task(executor.clone(), disconnected_since.clone());
    spawn_state_publisher(
        executor.clone(),
        client.clone(),
        topics.clone(),
        disconnected_since.clone(),
    );
    spawn_telemetry_publisher(
        client.clone(),
        topics.clone(),
        disconnected_since.clone(),
        started,
    );

    // Main delivery loop
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stop requested");
                break;
            }
            event = link.recv() => match event {
                Some(LinkEvent::Connected) => {
                    info!("Connected to broker");
                    disconnected_since.store(0, Ordering::Relaxed);
                    if let Err(e) = link.announce_online().await {
                        error!("Failed to announce online status: {}", e);
                    }
                }
                Some(LinkEvent::Disconnected { reason }) => {
                    warn!("Disconnected: {}", reason);
                    if disconnected_since.load(Ordering::Relaxed) == 0 {
                        disconnected_since.store(now_ms(), Ordering::Relaxed);
                    }
                }
                Some(LinkEvent::Message { topic, payload }) => {
                    if topic == topics.cmd {
                        handle_command(&executor, &client, &topics, &payload).await;
                    } else {
                        debug!("Ignoring publish on {}", topic);
                    }
                }
                None => {
                    error!("Link event channel closed");
                    break;
                }
            }
        }
    }

    // Orderly liveness retraction before the session drops
    if let Err(e) = link.shutdown().await {
        error!("Shutdown error: {}", e);
    }

    Ok(())
}

/// Process one command payload and publish whatever the executor decided
async fn handle_command(
    executor: &Arc<Mutex<CommandExecutor>>,
    client: &AsyncClient,
    topics: &TopicSet,
    payload: &[u8],
) {
    let outcome = {
        let mut executor = executor.lock().await;
        executor.process(payload, now_ms())
    };

    match outcome {
        Outcome::Drop => {}
        Outcome::Ack(ack) => {
            publish_json(client, &topics.ack, QoS::AtLeastOnce, &ack).await;
        }
        Outcome::AckAndState(ack, state) => {
            publish_json(client, &topics.ack, QoS::AtLeastOnce, &ack).await;
            publish_json(client, &topics.state, QoS::AtMostOnce, &state).await;
        }
    }
}

async fn publish_json<T: serde::Serialize>(
    client: &AsyncClient,
    topic: &str,
    qos: QoS,
    msg: &T,
) {
    match codec::encode(msg) {
        Ok(payload) => {
            if let Err(e) = client.publish(topic, qos, false, payload.to_vec()).await {
                error!("Failed to publish to {}: {}", topic, e);
            }
        }
        Err(e) => error!("Failed to encode payload for {}: {}", topic, e),
    }
}

/// Autonomous cycling: fine-grained AUTO ticks, the slower BLINK alternation,
/// and the broker-loss failsafe check
fn spawn_cycle_task(executor: Arc<Mutex<CommandExecutor>>, disconnected_since: Arc<AtomicU64>) {
    tokio::spawn(async move {
        let mut cycle = interval(Duration::from_millis(timing::CYCLE_TICK_INTERVAL_MS));
        let mut blink = interval(Duration::from_millis(timing::BLINK_TOGGLE_INTERVAL_MS));
        let mut failsafe = interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = cycle.tick() => {
                    let mut executor = executor.lock().await;
                    if executor.mode() != Mode::Blink {
                        executor.tick(now_ms());
                    }
                }
                _ = blink.tick() => {
                    let mut executor = executor.lock().await;
                    if executor.mode() == Mode::Blink {
                        executor.tick(now_ms());
                    }
                }
                _ = failsafe.tick() => {
                    let since = disconnected_since.load(Ordering::Relaxed);
                    if since != 0 && now_ms().saturating_sub(since) > timing::FAILSAFE_TIMEOUT_MS {
                        executor.lock().await.revert_to_auto(now_ms());
                    }
                }
            }
        }
    });
}

/// Periodic best-effort state snapshots, skipped while the broker is down
fn spawn_state_publisher(
    executor: Arc<Mutex<CommandExecutor>>,
    client: AsyncClient,
    topics: TopicSet,
    disconnected_since: Arc<AtomicU64>,
) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(timing::STATE_PUBLISH_INTERVAL_MS));
        loop {
            ticker.tick().await;
            if disconnected_since.load(Ordering::Relaxed) != 0 {
                continue;
            }
            let state = executor.lock().await.snapshot(now_ms());
            publish_json(&client, &topics.state, QoS::AtMostOnce, &state).await;
        }
    });
}

/// Periodic best-effort diagnostics, independent of command traffic
fn spawn_telemetry_publisher(
    client: AsyncClient,
    topics: TopicSet,
    disconnected_since: Arc<AtomicU64>,
    started_ms: u64,
) {
    tokio::spawn(async move {
        let source = TelemetrySource::new(started_ms);
        let mut ticker = interval(Duration::from_millis(timing::TELEMETRY_INTERVAL_MS));
        loop {
            ticker.tick().await;
            if disconnected_since.load(Ordering::Relaxed) != 0 {
                continue;
            }
            let sample = source.sample(now_ms());
            publish_json(&client, &topics.telemetry, QoS::AtMostOnce, &sample).await;
        }
    });
}
