//! Operator-side MQTT link
//!
//! Connecting is a distinct stage: failure to reach the broker aborts the run
//! before anything is sent. Once up, the delivery loop feeds decoded
//! acknowledgments to the router stamped with their receipt time; anything
//! undecodable is dropped without disturbing the loop.

use crate::tracker::{AckRouter, CommandSink};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use crosslight_shared::{codec, now_ms, topics::TopicSet};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Configuration for the operator link
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    /// Outgoing limit must cover the oversize experiment payloads
    pub max_packet_size: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".into(),
            broker_port: 1883,
            username: "demo".into(),
            password: "demo_pass".into(),
            client_id: "operator".into(),
            connect_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
            max_packet_size: 256 * 1024,
        }
    }
}

/// The operator's broker session
pub struct OperatorLink {
    client: AsyncClient,
    cmd_topic: String,
    alive: Arc<AtomicBool>,
}

impl OperatorLink {
    /// Connect, subscribe to the ack topic, and start the delivery loop.
    ///
    /// Returns an error if the broker cannot be reached within the configured
    /// timeout — a connection-stage failure, distinct from any protocol-level
    /// rejection that happens later.
    pub async fn connect(
        config: OperatorConfig,
        topics: &TopicSet,
        router: Arc<AckRouter>,
    ) -> Result<Self> {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_credentials(config.username.clone(), config.password.clone());
        options.set_keep_alive(config.keep_alive);
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        let wait_connack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(anyhow::Error::new(e)),
                }
            }
        };
        tokio::time::timeout(config.connect_timeout, wait_connack)
            .await
            .with_context(|| {
                format!(
                    "Timed out connecting to {}:{}",
                    config.broker_host, config.broker_port
                )
            })??;
        info!(
            "Connected to broker {}:{}",
            config.broker_host, config.broker_port
        );

        client
            .subscribe(topics.ack.clone(), QoS::AtLeastOnce)
            .await?;
        info!("Subscribed to {}", topics.ack);

        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = alive.clone();
        let ack_topic = topics.ack.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if publish.topic != ack_topic {
                            continue;
                        }
                        let recv_ms = now_ms();
                        match codec::decode_ack(&publish.payload) {
                            Ok(ack) => router.route(&ack, recv_ms).await,
                            Err(e) => debug!("Dropping undecodable ack: {}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Broker connection lost: {}", e);
                        alive_flag.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            client,
            cmd_topic: topics.cmd.clone(),
            alive,
        })
    }

    /// Whether the delivery loop is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Drop the broker session
    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl CommandSink for OperatorLink {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        if !self.is_alive() {
            bail!("Broker connection lost");
        }
        self.client
            .publish(
                self.cmd_topic.clone(),
                QoS::AtLeastOnce,
                false,
                payload.to_vec(),
            )
            .await?;
        Ok(())
    }
}
