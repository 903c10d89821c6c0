//! MQTT link manager with last-will liveness and automatic reconnection
//!
//! Wraps the rumqttc client: registers the retained offline marker as the
//! broker-side last will, forwards inbound publishes and connection
//! transitions over a channel, and keeps polling through broker loss so the
//! session comes back on its own.

use anyhow::Result;
use bytes::Bytes;
use crosslight_shared::{codec, now_ms, topics::TopicSet, Status};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Events emitted by the link
#[derive(Debug)]
pub enum LinkEvent {
    /// Session established (initial connect or reconnect)
    Connected,
    /// Broker connection lost
    Disconnected { reason: String },
    /// Inbound publish
    Message { topic: String, payload: Bytes },
}

/// Configuration for the edge link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Delay before re-polling after a connection error
    pub reconnect_delay: Duration,
    /// Largest inbound packet the controller accepts; oversize commands are
    /// rejected at the transport boundary, mimicking a constrained device
    pub max_packet_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".into(),
            broker_port: 1883,
            username: "demo".into(),
            password: "demo_pass".into(),
            client_id: "edge-001".into(),
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            max_packet_size: 8 * 1024,
        }
    }
}

/// Manages the controller's broker session
pub struct EdgeLink {
    client: AsyncClient,
    event_rx: mpsc::Receiver<LinkEvent>,
    topics: TopicSet,
}

impl EdgeLink {
    /// Create the link and start the polling loop.
    ///
    /// The last will carries the retained offline status so subscribers learn
    /// about an abnormal disconnect without any action from us.
    pub fn connect(config: LinkConfig, topics: TopicSet) -> Result<Self> {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_credentials(config.username.clone(), config.password.clone());
        options.set_keep_alive(config.keep_alive);
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);

        let offline = codec::encode(&Status::offline(now_ms()))?;
        options.set_last_will(LastWill::new(
            topics.status.clone(),
            offline.to_vec(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(64);

        let reconnect_delay = config.reconnect_delay;
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        if event_tx.send(LinkEvent::Connected).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let event = LinkEvent::Message {
                            topic: publish.topic,
                            payload: publish.payload,
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(event) => {
                        debug!("MQTT event: {:?}", event);
                    }
                    Err(e) => {
                        let disconnected = LinkEvent::Disconnected {
                            reason: e.to_string(),
                        };
                        if event_tx.send(disconnected).await.is_err() {
                            break;
                        }
                        tokio::time::sleep(reconnect_delay).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            event_rx,
            topics,
        })
    }

    /// Receive the next link event
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.event_rx.recv().await
    }

    /// Cheap clonable handle for publish tasks
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Subscribe to the command topic and announce liveness.
    ///
    /// Called on every (re)connect: the broker does not replay subscriptions
    /// and the retained status must be flipped back to online.
    pub async fn announce_online(&self) -> Result<()> {
        self.client
            .subscribe(self.topics.cmd.clone(), QoS::AtLeastOnce)
            .await?;
        let online = codec::encode(&Status::online(now_ms()))?;
        self.client
            .publish(self.topics.status.clone(), QoS::AtLeastOnce, true, online.to_vec())
            .await?;
        Ok(())
    }

    /// Publish the retained offline marker and drop the session.
    ///
    /// Orderly counterpart of the last will: late subscribers still see the
    /// controller as offline after a graceful stop.
    pub async fn shutdown(&self) -> Result<()> {
        let offline = codec::encode(&Status::offline(now_ms()))?;
        if let Err(e) = self
            .client
            .publish(self.topics.status.clone(), QoS::AtLeastOnce, true, offline.to_vec())
            .await
        {
            error!("Failed to publish offline status: {}", e);
        }
        self.client.disconnect().await?;
        Ok(())
    }
}
