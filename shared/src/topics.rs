//! MQTT topic layout
//!
//! Topics are parameterized by a city and intersection identifier:
//! `city/<city>/intersection/<id>/{cmd,ack,state,status,telemetry}`.
//!
//! Commands, acknowledgments and status use at-least-once delivery; state and
//! telemetry are best-effort.

/// The five topics one controller instance speaks on
#[derive(Debug, Clone)]
pub struct TopicSet {
    /// Operator -> controller commands
    pub cmd: String,
    /// Controller -> operator acknowledgments
    pub ack: String,
    /// Periodic controller state
    pub state: String,
    /// Retained controller liveness marker
    pub status: String,
    /// Controller diagnostics
    pub telemetry: String,
}

impl TopicSet {
    /// Build the topic set for one intersection
    pub fn new(city: &str, intersection: &str) -> Self {
        let base = format!("city/{city}/intersection/{intersection}");
        Self {
            cmd: format!("{base}/cmd"),
            ack: format!("{base}/ack"),
            state: format!("{base}/state"),
            status: format!("{base}/status"),
            telemetry: format!("{base}/telemetry"),
        }
    }
}
