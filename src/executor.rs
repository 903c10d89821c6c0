//! Command executor - validates, deduplicates and applies incoming commands
//!
//! The executor owns the state machine and the idempotency window and turns a
//! raw command payload into the messages the runtime must publish. It never
//! touches the transport itself.

use crosslight_shared::{codec, timing, Ack, Mode, StateSnapshot};
use tracing::{debug, info, warn};

use crate::dedup::IdempotencyWindow;
use crate::fsm::LightController;

/// What the runtime should publish after processing one inbound payload
#[derive(Debug)]
pub enum Outcome {
    /// Undecodable payload, dropped silently
    Drop,
    /// Acknowledgment only (duplicate replay, or command without identifier)
    Ack(Ack),
    /// First-seen command: acknowledgment plus a fresh state snapshot
    AckAndState(Ack, StateSnapshot),
}

/// Processes commands received on the command topic
pub struct CommandExecutor {
    controller: LightController,
    window: IdempotencyWindow,
}

impl CommandExecutor {
    /// Create an executor with a fresh controller and an empty window
    pub fn new(now_ms: u64) -> Self {
        Self {
            controller: LightController::new(now_ms),
            window: IdempotencyWindow::new(timing::CMD_ID_WINDOW_CAPACITY),
        }
    }

    /// Current controller mode
    pub fn mode(&self) -> Mode {
        self.controller.mode()
    }

    /// Advance autonomous cycling
    pub fn tick(&mut self, now_ms: u64) {
        self.controller.tick(now_ms);
    }

    /// Broker-loss failsafe: force AUTO cycling
    pub fn revert_to_auto(&mut self, now_ms: u64) {
        if self.controller.mode() != Mode::Auto {
            warn!("Failsafe: reverting to AUTO mode");
            self.controller.revert_to_auto(now_ms);
        }
    }

    /// Publishable state snapshot
    pub fn snapshot(&self, now_ms: u64) -> StateSnapshot {
        self.controller.snapshot(now_ms)
    }

    /// Process one inbound command payload.
    ///
    /// Exactly one acknowledgment per decodable command; duplicates are
    /// acknowledged as success without re-execution, and identifiers enter the
    /// window whether or not validation passed, so a redelivered rejection is
    /// not re-validated either.
    pub fn process(&mut self, payload: &[u8], now_ms: u64) -> Outcome {
        let cmd = match codec::decode_command(payload) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!("Dropping undecodable command payload: {}", e);
                return Outcome::Drop;
            }
        };

        let cmd_id = match cmd.cmd_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                warn!("Command without cmd_id rejected");
                return Outcome::Ack(Ack::invalid(now_ms));
            }
        };

        if self.window.contains(&cmd_id) {
            debug!("Duplicate command {}, acking without re-execution", cmd_id);
            return Outcome::Ack(Ack::success(cmd_id, now_ms));
        }

        let result = self.controller.handle(
            &cmd.cmd_type,
            cmd.mode.as_deref(),
            cmd.phase,
            now_ms,
        );
        self.window.insert(cmd_id.clone());

        let ack = match result {
            Ok(()) => {
                info!(
                    "Applied {} ({}): mode={} phase={}",
                    cmd.cmd_type,
                    cmd_id,
                    self.controller.mode(),
                    self.controller.phase()
                );
                Ack::success(cmd_id, now_ms)
            }
            Err(code) => {
                warn!("Rejected {} ({}): {}", cmd.cmd_type, cmd_id, code.as_str());
                Ack::rejected(cmd_id, code, now_ms)
            }
        };

        Outcome::AckAndState(ack, self.controller.snapshot(now_ms))
    }
}
