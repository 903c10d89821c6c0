//! Traffic Light State Machine
//!
//! Owns the controller's mode and phase and defines the mode-dependent
//! transition rules for incoming commands.

use crosslight_shared::{
    timing, ErrorCode, Mode, StateSnapshot, PHASE_ALL_OFF, PHASE_ALL_RED,
};

/// The traffic light controller state machine
///
/// All methods take an explicit `now_ms` so cycling and phase timing are
/// driven entirely by the caller's clock.
#[derive(Debug)]
pub struct LightController {
    mode: Mode,
    phase: u8,
    phase_started_ms: u64,
    started_ms: u64,
    /// Which half of the BLINK alternation is showing
    blink_red: bool,
}

impl LightController {
    /// Create a controller in AUTO mode at phase 0
    pub fn new(now_ms: u64) -> Self {
        Self {
            mode: Mode::Auto,
            phase: 0,
            phase_started_ms: now_ms,
            started_ms: now_ms,
            blink_red: true,
        }
    }

    /// Current mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current stored phase (0..=5, independent of the BLINK/OFF indication)
    pub fn phase(&self) -> u8 {
        self.phase
    }

    /// When the current phase was entered
    pub fn phase_started_ms(&self) -> u64 {
        self.phase_started_ms
    }

    /// Apply a validated command type to the state machine.
    ///
    /// Returns `Err` with the protocol code on rejection; state is untouched
    /// on any rejection path.
    pub fn handle(
        &mut self,
        cmd_type: &str,
        mode: Option<&str>,
        phase: Option<i32>,
        now_ms: u64,
    ) -> Result<(), ErrorCode> {
        match cmd_type {
            "SET_MODE" => {
                let mode = Mode::parse(mode.unwrap_or("")).ok_or(ErrorCode::InvalidMode)?;
                self.mode = mode;
                if mode == Mode::Blink {
                    self.blink_red = true;
                }
                self.phase_started_ms = now_ms;
                Ok(())
            }
            "SET_PHASE" => {
                if self.mode != Mode::Manual {
                    return Err(ErrorCode::NotManualMode);
                }
                match phase {
                    Some(p) if (0..=5).contains(&p) => {
                        self.phase = p as u8;
                        self.phase_started_ms = now_ms;
                        Ok(())
                    }
                    _ => Err(ErrorCode::InvalidPhase),
                }
            }
            "EMERGENCY" => {
                self.mode = Mode::Blink;
                self.phase = PHASE_ALL_RED;
                self.blink_red = true;
                self.phase_started_ms = now_ms;
                Ok(())
            }
            _ => Err(ErrorCode::UnknownType),
        }
    }

    /// Advance autonomous behavior.
    ///
    /// AUTO moves to the next phase once the configured duration has elapsed,
    /// wrapping modulo six. BLINK flips the alternation on every call.
    /// MANUAL and OFF do nothing.
    pub fn tick(&mut self, now_ms: u64) {
        match self.mode {
            Mode::Auto => {
                let elapsed = now_ms.saturating_sub(self.phase_started_ms);
                if elapsed >= timing::PHASE_DURATIONS_MS[self.phase as usize] {
                    self.phase = (self.phase + 1) % 6;
                    self.phase_started_ms = now_ms;
                }
            }
            Mode::Blink => {
                self.blink_red = !self.blink_red;
            }
            Mode::Manual | Mode::Off => {}
        }
    }

    /// Revert to AUTO cycling (broker-loss failsafe)
    pub fn revert_to_auto(&mut self, now_ms: u64) {
        self.mode = Mode::Auto;
        self.phase_started_ms = now_ms;
    }

    /// The phase value to report: the stored phase in AUTO/MANUAL, the
    /// alternating all-red/all-off indication in BLINK, all-off in OFF.
    pub fn indication(&self) -> i8 {
        match self.mode {
            Mode::Off => PHASE_ALL_OFF,
            Mode::Blink => {
                if self.blink_red {
                    PHASE_ALL_RED as i8
                } else {
                    PHASE_ALL_OFF
                }
            }
            Mode::Auto | Mode::Manual => self.phase as i8,
        }
    }

    /// Produce the publishable state snapshot
    pub fn snapshot(&self, now_ms: u64) -> StateSnapshot {
        StateSnapshot {
            mode: self.mode.as_str().into(),
            phase: self.indication(),
            since_ms: now_ms.saturating_sub(self.phase_started_ms),
            uptime_s: now_ms.saturating_sub(self.started_ms) / 1000,
            ts_ms: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = LightController::new(1000);
        assert_eq!(fsm.mode(), Mode::Auto);
        assert_eq!(fsm.phase(), 0);
        assert_eq!(fsm.phase_started_ms(), 1000);
    }

    #[test]
    fn test_set_mode_all_valid_values() {
        for (s, mode) in [
            ("AUTO", Mode::Auto),
            ("MANUAL", Mode::Manual),
            ("BLINK", Mode::Blink),
            ("OFF", Mode::Off),
        ] {
            let mut fsm = LightController::new(0);
            assert!(fsm.handle("SET_MODE", Some(s), None, 50).is_ok());
            assert_eq!(fsm.mode(), mode);
            assert_eq!(fsm.phase_started_ms(), 50);
        }
    }

    #[test]
    fn test_set_mode_invalid_leaves_state_unchanged() {
        let mut fsm = LightController::new(0);
        let result = fsm.handle("SET_MODE", Some("FLASH"), None, 50);
        assert_eq!(result, Err(ErrorCode::InvalidMode));
        assert_eq!(fsm.mode(), Mode::Auto);
        assert_eq!(fsm.phase_started_ms(), 0);

        // Missing mode field is rejected the same way
        assert_eq!(
            fsm.handle("SET_MODE", None, None, 60),
            Err(ErrorCode::InvalidMode)
        );
    }

    #[test]
    fn test_set_phase_requires_manual_mode() {
        let mut fsm = LightController::new(0);
        assert_eq!(
            fsm.handle("SET_PHASE", None, Some(3), 10),
            Err(ErrorCode::NotManualMode)
        );
        assert_eq!(fsm.phase(), 0);

        // Even an out-of-range phase reports NOT_MANUAL_MODE first
        assert_eq!(
            fsm.handle("SET_PHASE", None, Some(99), 10),
            Err(ErrorCode::NotManualMode)
        );

        fsm.handle("SET_MODE", Some("MANUAL"), None, 20).unwrap();
        assert!(fsm.handle("SET_PHASE", None, Some(3), 30).is_ok());
        assert_eq!(fsm.phase(), 3);
        assert_eq!(fsm.phase_started_ms(), 30);
    }

    #[test]
    fn test_set_phase_range_validation() {
        let mut fsm = LightController::new(0);
        fsm.handle("SET_MODE", Some("MANUAL"), None, 0).unwrap();

        for p in 0..=5 {
            assert!(fsm.handle("SET_PHASE", None, Some(p), 10).is_ok());
            assert_eq!(fsm.phase(), p as u8);
        }
        for bad in [-1, 6, 42] {
            assert_eq!(
                fsm.handle("SET_PHASE", None, Some(bad), 20),
                Err(ErrorCode::InvalidPhase)
            );
        }
        // Missing phase value
        assert_eq!(
            fsm.handle("SET_PHASE", None, None, 20),
            Err(ErrorCode::InvalidPhase)
        );
        assert_eq!(fsm.phase(), 5);
    }

    #[test]
    fn test_emergency_from_any_state() {
        for initial in ["AUTO", "MANUAL", "OFF", "BLINK"] {
            let mut fsm = LightController::new(0);
            fsm.handle("SET_MODE", Some(initial), None, 10).unwrap();
            assert!(fsm.handle("EMERGENCY", None, None, 20).is_ok());
            assert_eq!(fsm.mode(), Mode::Blink);
            assert_eq!(fsm.phase(), PHASE_ALL_RED);
            assert_eq!(fsm.phase_started_ms(), 20);
            assert_eq!(fsm.indication(), PHASE_ALL_RED as i8);
        }
    }

    #[test]
    fn test_unknown_command_type() {
        let mut fsm = LightController::new(0);
        assert_eq!(
            fsm.handle("REBOOT", None, None, 10),
            Err(ErrorCode::UnknownType)
        );
        assert_eq!(fsm.mode(), Mode::Auto);
    }

    #[test]
    fn test_auto_cycles_through_all_phases() {
        let mut fsm = LightController::new(0);
        let mut now = 0;

        for expected in [1, 2, 3, 4, 5, 0] {
            let duration = timing::PHASE_DURATIONS_MS[fsm.phase() as usize];

            // Just before the duration elapses nothing moves
            fsm.tick(now + duration - 1);
            assert_ne!(fsm.phase(), expected);

            now += duration;
            fsm.tick(now);
            assert_eq!(fsm.phase(), expected);
            assert_eq!(fsm.phase_started_ms(), now);
        }
    }

    #[test]
    fn test_manual_and_off_do_not_cycle() {
        for mode in ["MANUAL", "OFF"] {
            let mut fsm = LightController::new(0);
            fsm.handle("SET_MODE", Some(mode), None, 0).unwrap();
            fsm.tick(1_000_000);
            assert_eq!(fsm.phase(), 0);
        }
    }

    #[test]
    fn test_blink_alternates_every_tick() {
        let mut fsm = LightController::new(0);
        fsm.handle("SET_MODE", Some("BLINK"), None, 0).unwrap();

        assert_eq!(fsm.indication(), PHASE_ALL_RED as i8);
        fsm.tick(500);
        assert_eq!(fsm.indication(), PHASE_ALL_OFF);
        fsm.tick(1000);
        assert_eq!(fsm.indication(), PHASE_ALL_RED as i8);
    }

    #[test]
    fn test_off_indication_is_all_off() {
        let mut fsm = LightController::new(0);
        fsm.handle("SET_MODE", Some("OFF"), None, 0).unwrap();
        assert_eq!(fsm.indication(), PHASE_ALL_OFF);
        assert_eq!(fsm.snapshot(1000).phase, PHASE_ALL_OFF);
    }

    #[test]
    fn test_snapshot_fields() {
        let mut fsm = LightController::new(1000);
        fsm.handle("SET_MODE", Some("MANUAL"), None, 3000).unwrap();
        fsm.handle("SET_PHASE", None, Some(4), 5000).unwrap();

        let snap = fsm.snapshot(7500);
        assert_eq!(snap.mode, "MANUAL");
        assert_eq!(snap.phase, 4);
        assert_eq!(snap.since_ms, 2500);
        assert_eq!(snap.uptime_s, 6);
        assert_eq!(snap.ts_ms, 7500);
    }

    #[test]
    fn test_failsafe_revert() {
        let mut fsm = LightController::new(0);
        fsm.handle("SET_MODE", Some("OFF"), None, 100).unwrap();
        fsm.revert_to_auto(20_000);
        assert_eq!(fsm.mode(), Mode::Auto);
        assert_eq!(fsm.phase_started_ms(), 20_000);
    }
}
