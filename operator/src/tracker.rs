//! Command correlation tracker
//!
//! Issues commands with unique identifiers and matches the acknowledgments
//! that come back on the delivery path. The record set is shared between the
//! send loop and the delivery loop, so every mutation goes through one mutex;
//! the lock is never held across a network call.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use crosslight_shared::{codec, now_ms, timing, Ack, Command, Mode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Where commands go once built; the MQTT link implements this, tests record
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn publish(&self, payload: Bytes) -> Result<()>;
}

/// What kind of command an experiment sends
#[derive(Debug, Clone)]
pub enum CommandKind {
    SetMode(Mode),
    SetPhase(u8),
    Emergency,
}

/// Template for the commands of one experiment case
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub kind: CommandKind,
    /// Padding bytes attached to every command
    pub pad_bytes: usize,
    /// Free-form tag copied into each record (experiment case label)
    pub note: String,
}

/// One in-flight or completed command
#[derive(Debug, Clone, Serialize)]
pub struct PendingRecord {
    pub cmd_id: String,
    pub t_send_ms: u64,
    pub t_ack_recv_ms: Option<u64>,
    pub rtt_ms: Option<u64>,
    pub mode: Option<String>,
    pub phase: Option<i32>,
    /// Declared padding size, the experiment lever
    pub payload_size: usize,
    /// Bytes actually put on the wire
    pub actual_payload_bytes: usize,
    pub note: String,
}

/// Tracks outstanding commands for one experiment case
pub struct CommandTracker {
    sink: Arc<dyn CommandSink>,
    records: Mutex<HashMap<String, PendingRecord>>,
    sent: AtomicUsize,
    received: AtomicUsize,
}

impl CommandTracker {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self {
            sink,
            records: Mutex::new(HashMap::new()),
            sent: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
        }
    }

    /// Build, record and publish one command; returns its identifier
    pub async fn send(&self, spec: &CommandSpec) -> Result<String> {
        let cmd_id = Uuid::new_v4().to_string();
        let t_send_ms = now_ms();

        let cmd = match spec.kind {
            CommandKind::SetMode(mode) => Command::set_mode(&cmd_id, mode, t_send_ms),
            CommandKind::SetPhase(phase) => Command::set_phase(&cmd_id, phase, t_send_ms),
            CommandKind::Emergency => Command::emergency(&cmd_id, t_send_ms),
        }
        .with_padding(spec.pad_bytes);

        let payload = codec::encode(&cmd)?;

        let record = PendingRecord {
            cmd_id: cmd_id.clone(),
            t_send_ms,
            t_ack_recv_ms: None,
            rtt_ms: None,
            mode: cmd.mode.clone(),
            phase: cmd.phase,
            payload_size: spec.pad_bytes,
            actual_payload_bytes: payload.len(),
            note: spec.note.clone(),
        };

        {
            let mut records = self.records.lock().await;
            records.insert(cmd_id.clone(), record);
        }
        self.sent.fetch_add(1, Ordering::SeqCst);

        self.sink.publish(payload).await?;
        Ok(cmd_id)
    }

    /// Complete the matching record; unknown or already-completed identifiers
    /// are ignored so duplicate, late or foreign acks cannot corrupt anything
    pub async fn on_ack(&self, cmd_id: &str, recv_ms: u64) {
        let mut records = self.records.lock().await;
        match records.get_mut(cmd_id) {
            Some(record) if record.t_ack_recv_ms.is_none() => {
                record.t_ack_recv_ms = Some(recv_ms);
                record.rtt_ms = Some(recv_ms.saturating_sub(record.t_send_ms));
                self.received.fetch_add(1, Ordering::SeqCst);
            }
            Some(_) => debug!("Duplicate ack for {}, ignored", cmd_id),
            None => debug!("Ack for unknown command {}, ignored", cmd_id),
        }
    }

    /// Current (sent, received) counts
    pub fn counts(&self) -> (usize, usize) {
        (
            self.sent.load(Ordering::SeqCst),
            self.received.load(Ordering::SeqCst),
        )
    }

    /// Poll until every sent command is acknowledged or the deadline elapses.
    ///
    /// Bounded busy-wait: record counts are small and deadlines are short, and
    /// only the caller blocks, never the delivery path.
    pub async fn wait_for_completion(&self, deadline: Duration) -> (usize, usize) {
        let start = Instant::now();
        loop {
            let (sent, received) = self.counts();
            if received >= sent || start.elapsed() >= deadline {
                return (sent, received);
            }
            tokio::time::sleep(Duration::from_millis(timing::ACK_POLL_INTERVAL_MS)).await;
        }
    }

    /// Snapshot of every record, ordered by send time
    pub async fn export(&self) -> Vec<PendingRecord> {
        let records = self.records.lock().await;
        let mut all: Vec<PendingRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| {
            a.t_send_ms
                .cmp(&b.t_send_ms)
                .then_with(|| a.cmd_id.cmp(&b.cmd_id))
        });
        all
    }
}

/// Routes inbound acknowledgments to the tracker of the running case.
///
/// The delivery loop outlives any single case, so it delivers through this
/// registry instead of holding a tracker directly. Acks that arrive between
/// cases, or that carry no identifier, fall on the floor by design.
pub struct AckRouter {
    current: RwLock<Option<Arc<CommandTracker>>>,
}

impl AckRouter {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Make `tracker` the delivery target
    pub async fn install(&self, tracker: Arc<CommandTracker>) {
        *self.current.write().await = Some(tracker);
    }

    /// Detach the current tracker
    pub async fn clear(&self) {
        *self.current.write().await = None;
    }

    /// Deliver one acknowledgment stamped with its receipt time
    pub async fn route(&self, ack: &Ack, recv_ms: u64) {
        let current = self.current.read().await;
        if let (Some(tracker), Some(cmd_id)) = (current.as_ref(), ack.cmd_id.as_deref()) {
            tracker.on_ack(cmd_id, recv_ms).await;
        }
    }
}

impl Default for AckRouter {
    fn default() -> Self {
        Self::new()
    }
}
