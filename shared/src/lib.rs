//! Crosslight Shared Protocol Types
//!
//! This crate provides the shared protocol types, JSON codec and topic layout
//! for communication between traffic-light edge controllers and operator
//! tooling.

pub mod codec;
pub mod topics;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters for the system
pub mod timing {
    /// AUTO mode phase durations in milliseconds, indexed by phase.
    /// Long green, short yellow, all-red for each of the two approaches.
    pub const PHASE_DURATIONS_MS: [u64; 6] = [900, 300, 200, 900, 300, 200];

    /// State snapshot publish interval
    pub const STATE_PUBLISH_INTERVAL_MS: u64 = 1000;

    /// BLINK mode alternation cadence
    pub const BLINK_TOGGLE_INTERVAL_MS: u64 = 500;

    /// AUTO mode cycling tick granularity
    pub const CYCLE_TICK_INTERVAL_MS: u64 = 100;

    /// Diagnostic telemetry publish interval
    pub const TELEMETRY_INTERVAL_MS: u64 = 2000;

    /// Broker loss longer than this reverts the controller to AUTO
    pub const FAILSAFE_TIMEOUT_MS: u64 = 10_000;

    /// Poll interval while waiting for outstanding acknowledgments
    pub const ACK_POLL_INTERVAL_MS: u64 = 50;

    /// Default deadline for outstanding acknowledgments after the last send
    pub const DEFAULT_WAIT_DEADLINE_MS: u64 = 5000;

    /// Number of recent command identifiers kept for duplicate suppression
    pub const CMD_ID_WINDOW_CAPACITY: usize = 32;
}

/// Phase value reported when no lamp is lit (OFF mode, BLINK dark half)
pub const PHASE_ALL_OFF: i8 = -1;

/// The all-red transition phase, forced by EMERGENCY
pub const PHASE_ALL_RED: u8 = 2;

/// Controller operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Cycle through the six phases autonomously
    Auto,
    /// Phase is set only by SET_PHASE commands
    Manual,
    /// Alternate between all-red and all-off
    Blink,
    /// Everything dark
    Off,
}

impl Mode {
    /// Wire representation of this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "AUTO",
            Mode::Manual => "MANUAL",
            Mode::Blink => "BLINK",
            Mode::Off => "OFF",
        }
    }

    /// Parse a wire mode string; anything unknown is rejected
    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "AUTO" => Some(Mode::Auto),
            "MANUAL" => Some(Mode::Manual),
            "BLINK" => Some(Mode::Blink),
            "OFF" => Some(Mode::Off),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-level rejection codes carried in acknowledgment `err` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Command carried no identifier
    InvalidCmd,
    /// SET_MODE with an unknown mode string
    InvalidMode,
    /// SET_PHASE outside 0..=5
    InvalidPhase,
    /// SET_PHASE while not in MANUAL mode
    NotManualMode,
    /// Unrecognized command type
    UnknownType,
}

impl ErrorCode {
    /// Wire representation of this code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCmd => "ERR_INVALID_CMD",
            ErrorCode::InvalidMode => "ERR_INVALID_MODE",
            ErrorCode::InvalidPhase => "ERR_INVALID_PHASE",
            ErrorCode::NotManualMode => "ERR_NOT_MANUAL_MODE",
            ErrorCode::UnknownType => "ERR_UNKNOWN_TYPE",
        }
    }
}

/// Operator -> controller command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Opaque unique token; absent or empty means the command is unattributable
    #[serde(default)]
    pub cmd_id: Option<String>,
    /// `SET_MODE`, `SET_PHASE` or `EMERGENCY`
    #[serde(rename = "type", default)]
    pub cmd_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<i32>,
    /// Origination timestamp
    #[serde(default)]
    pub ts_ms: u64,
    /// Optional padding, the payload-size test lever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pad: Option<String>,
}

impl Command {
    /// Create a SET_MODE command
    pub fn set_mode(cmd_id: impl Into<String>, mode: Mode, ts_ms: u64) -> Self {
        Self {
            cmd_id: Some(cmd_id.into()),
            cmd_type: "SET_MODE".into(),
            mode: Some(mode.as_str().into()),
            phase: None,
            ts_ms,
            pad: None,
        }
    }

    /// Create a SET_PHASE command
    pub fn set_phase(cmd_id: impl Into<String>, phase: u8, ts_ms: u64) -> Self {
        Self {
            cmd_id: Some(cmd_id.into()),
            cmd_type: "SET_PHASE".into(),
            mode: None,
            phase: Some(phase as i32),
            ts_ms,
            pad: None,
        }
    }

    /// Create an EMERGENCY command
    pub fn emergency(cmd_id: impl Into<String>, ts_ms: u64) -> Self {
        Self {
            cmd_id: Some(cmd_id.into()),
            cmd_type: "EMERGENCY".into(),
            mode: None,
            phase: None,
            ts_ms,
            pad: None,
        }
    }

    /// Attach `bytes` of padding to inflate the wire payload
    pub fn with_padding(mut self, bytes: usize) -> Self {
        if bytes > 0 {
            self.pad = Some("x".repeat(bytes));
        }
        self
    }
}

/// Controller -> operator acknowledgment, exactly one per processed command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// Identifier of the acknowledged command; null when the command had none
    pub cmd_id: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// Controller-side receipt timestamp
    pub edge_recv_ts_ms: u64,
}

impl Ack {
    /// Acknowledge a successfully applied (or replayed) command
    pub fn success(cmd_id: impl Into<String>, edge_recv_ts_ms: u64) -> Self {
        Self {
            cmd_id: Some(cmd_id.into()),
            ok: true,
            err: None,
            edge_recv_ts_ms,
        }
    }

    /// Acknowledge a command rejected by validation
    pub fn rejected(cmd_id: impl Into<String>, code: ErrorCode, edge_recv_ts_ms: u64) -> Self {
        Self {
            cmd_id: Some(cmd_id.into()),
            ok: false,
            err: Some(code.as_str().into()),
            edge_recv_ts_ms,
        }
    }

    /// Acknowledge a command that carried no identifier
    pub fn invalid(edge_recv_ts_ms: u64) -> Self {
        Self {
            cmd_id: None,
            ok: false,
            err: Some(ErrorCode::InvalidCmd.as_str().into()),
            edge_recv_ts_ms,
        }
    }
}

/// Periodic controller state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub mode: String,
    /// Current indication: 0..=5, or -1 when everything is dark
    pub phase: i8,
    /// Milliseconds spent in the current phase
    pub since_ms: u64,
    pub uptime_s: u64,
    pub ts_ms: u64,
}

/// Retained liveness marker on the status topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub online: bool,
    pub ts_ms: u64,
}

impl Status {
    pub fn online(ts_ms: u64) -> Self {
        Self { online: true, ts_ms }
    }

    pub fn offline(ts_ms: u64) -> Self {
        Self { online: false, ts_ms }
    }
}

/// Synthetic controller diagnostics, independent of command traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub rssi_dbm: i32,
    pub heap_free_kb: u32,
    pub uptime_s: u64,
    pub ts_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_roundtrip() {
        for mode in [Mode::Auto, Mode::Manual, Mode::Blink, Mode::Off] {
            assert_eq!(Mode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(Mode::parse("auto"), None);
        assert_eq!(Mode::parse("FLASH"), None);
    }

    #[test]
    fn test_command_builders() {
        let cmd = Command::set_mode("c-1", Mode::Manual, 42);
        assert_eq!(cmd.cmd_type, "SET_MODE");
        assert_eq!(cmd.mode.as_deref(), Some("MANUAL"));
        assert_eq!(cmd.ts_ms, 42);

        let cmd = Command::set_phase("c-2", 3, 43).with_padding(8);
        assert_eq!(cmd.cmd_type, "SET_PHASE");
        assert_eq!(cmd.phase, Some(3));
        assert_eq!(cmd.pad.as_deref(), Some("xxxxxxxx"));

        let cmd = Command::emergency("c-3", 44);
        assert_eq!(cmd.cmd_type, "EMERGENCY");
        assert!(cmd.mode.is_none() && cmd.phase.is_none());
    }

    #[test]
    fn test_ack_builders() {
        let ack = Ack::success("c-1", 100);
        assert!(ack.ok);
        assert!(ack.err.is_none());

        let ack = Ack::rejected("c-2", ErrorCode::NotManualMode, 101);
        assert!(!ack.ok);
        assert_eq!(ack.err.as_deref(), Some("ERR_NOT_MANUAL_MODE"));

        let ack = Ack::invalid(102);
        assert!(ack.cmd_id.is_none());
        assert_eq!(ack.err.as_deref(), Some("ERR_INVALID_CMD"));
    }
}
