//! Risk to action mapping with per-robot hysteresis
//!
//! Each robot carries a small state machine over {CONTINUE, SLOW, STOP,
//! REROUTE}. A raw action is picked by thresholding; leaving STOP, SLOW or
//! REROUTE additionally requires the risk to clear the entry threshold by a
//! release margin. Decisions are emitted only on action changes, plus a
//! periodic heartbeat while STOP is sustained.

use super::risk::RiskAssessment;
use super::state::OverrideRegistry;
use crate::config::DecisionConfig;
use crate::domain::{round_to, summarize, Action, Decision, FusedWindow};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct RobotDecisionState {
    action: Action,
    last_emitted_at: i64,
}

/// What the mapper did with a scored window
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    /// A new decision; `heartbeat` marks a re-emitted sustained STOP
    Emitted { decision: Decision, heartbeat: bool },
    /// Action unchanged, nothing emitted
    Held { action: Action },
    /// Robot is under manual override
    Overridden,
}

impl MapOutcome {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            MapOutcome::Emitted { decision, .. } => Some(decision),
            _ => None,
        }
    }
}

pub struct DecisionMapper {
    config: DecisionConfig,
    congestion_warning: f64,
    overrides: OverrideRegistry,
    robots: HashMap<String, RobotDecisionState>,
}

impl DecisionMapper {
    pub fn new(config: DecisionConfig, congestion_warning: f64, overrides: OverrideRegistry) -> Self {
        Self {
            config,
            congestion_warning,
            overrides,
            robots: HashMap::new(),
        }
    }

    /// Current action held for a robot, if any
    pub fn current_action(&self, robot_id: &str) -> Option<Action> {
        self.robots.get(robot_id).map(|s| s.action)
    }

    /// Forget a robot's hysteresis state
    pub fn reset(&mut self, robot_id: &str) {
        self.robots.remove(robot_id);
    }

    pub fn decide(&mut self, window: &FusedWindow, assessment: &RiskAssessment) -> MapOutcome {
        let robot_id = window.robot_id.as_str();

        if window.robot.manual_override || self.overrides.is_overridden(robot_id) {
            // Cleared overrides start from a clean state
            self.robots.remove(robot_id);
            debug!(robot_id, "skipping robot under manual override");
            return MapOutcome::Overridden;
        }

        let congested =
            !window.context_incomplete && window.zone.congestion >= self.congestion_warning;
        let distance = window.nearest_human_distance;
        let raw = self.raw_action(assessment.score, distance, congested);

        let previous = self.robots.get(robot_id).copied();
        let action = match previous {
            Some(prev) => self.apply_hysteresis(prev.action, raw, assessment.score, distance, congested),
            None => raw,
        };

        let now = window.window_end;
        let (emit, heartbeat) = match previous {
            None => (true, false),
            Some(prev) if prev.action != action => (true, false),
            Some(prev) if action == Action::Stop => {
                let due = now.saturating_sub(prev.last_emitted_at) >= self.config.stop_heartbeat_ms;
                (due, due)
            }
            Some(_) => (false, false),
        };

        if !emit {
            return MapOutcome::Held { action };
        }

        self.robots.insert(
            robot_id.to_string(),
            RobotDecisionState {
                action,
                last_emitted_at: now,
            },
        );

        MapOutcome::Emitted {
            decision: build_decision(window, assessment, action, heartbeat),
            heartbeat,
        }
    }

    fn raw_action(&self, score: f64, distance: f64, congested: bool) -> Action {
        let cfg = &self.config;
        if score >= cfg.stop_threshold || distance < cfg.stop_distance_m {
            Action::Stop
        } else if congested && score >= cfg.reroute_threshold {
            Action::Reroute
        } else if score >= cfg.slow_threshold || distance < cfg.slow_distance_m {
            Action::Slow
        } else {
            Action::Continue
        }
    }

    fn apply_hysteresis(
        &self,
        previous: Action,
        raw: Action,
        score: f64,
        distance: f64,
        congested: bool,
    ) -> Action {
        let cfg = &self.config;
        match (previous, raw) {
            (Action::Stop, raw) if raw != Action::Stop => {
                let holding = score >= cfg.stop_threshold - cfg.stop_release_margin
                    || distance < cfg.stop_distance_m + cfg.distance_release_margin_m;
                if holding {
                    Action::Stop
                } else {
                    raw
                }
            }
            (Action::Slow, Action::Continue) => {
                let holding = score >= cfg.slow_threshold - cfg.slow_release_margin
                    || distance < cfg.slow_distance_m + cfg.distance_release_margin_m;
                if holding {
                    Action::Slow
                } else {
                    Action::Continue
                }
            }
            (Action::Reroute, Action::Continue | Action::Slow) => {
                if congested && score >= cfg.reroute_threshold - cfg.slow_release_margin {
                    Action::Reroute
                } else {
                    raw
                }
            }
            (_, raw) => raw,
        }
    }
}

fn build_decision(
    window: &FusedWindow,
    assessment: &RiskAssessment,
    action: Action,
    heartbeat: bool,
) -> Decision {
    let reason_codes = assessment.reason_codes();
    let primary_reason = assessment.primary_reason();
    let nearest_human_distance = window
        .has_human()
        .then(|| round_to(window.nearest_human_distance, 2));
    let summary = summarize(
        &window.robot_id,
        action,
        &reason_codes,
        nearest_human_distance,
    );

    Decision {
        decision_id: Decision::make_id(&window.robot_id, window.window_end),
        robot_id: window.robot_id.clone(),
        zone_id: window.zone.zone_id.clone(),
        timestamp: window.window_end,
        action,
        reason_codes,
        primary_reason,
        risk_score: round_to(assessment.score, 3),
        nearest_human_distance,
        summary,
        heartbeat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Connectivity, EntityKind, EntitySnapshot, MotionState, ReasonCode, Visibility,
        ZoneSnapshot,
    };
    use crate::engine::risk::{FactorScore, RiskFactor};
    use crate::engine::state::OverrideSource;
    use std::sync::Arc;

    fn window(end: i64, distance: f64, congestion: f64) -> FusedWindow {
        FusedWindow {
            robot_id: "robot-1".to_string(),
            window_start: end - 200,
            window_end: end,
            robot: Arc::new(EntitySnapshot {
                id: "robot-1".to_string(),
                kind: EntityKind::Robot,
                zone_id: Some("zone-a".to_string()),
                x: 0.0,
                y: 0.0,
                velocity: 1.0,
                heading: 0.0,
                motion_state: MotionState::Moving,
                ultrasonic_distance: None,
                beacon_signal: None,
                destination: None,
                manual_override: false,
                timestamp: end - 100,
            }),
            nearest_human_id: None,
            nearest_human_distance: distance,
            relative_velocity: 0.0,
            zone: Arc::new(ZoneSnapshot {
                zone_id: "zone-a".to_string(),
                visibility: Visibility::Normal,
                connectivity: Connectivity::Normal,
                congestion,
                robot_count: 1,
                human_count: 0,
                timestamp: 0,
            }),
            context_incomplete: false,
            beacon_distance: None,
            sensor_disagreement: false,
            event_count: 1,
        }
    }

    /// Assessment with the whole score attributed to one triggered factor
    fn assessment(score: f64) -> RiskAssessment {
        RiskAssessment {
            score,
            factors: vec![FactorScore {
                factor: RiskFactor::Visibility,
                value: 1.0,
                contribution: score,
                triggered: score > 0.0,
            }],
        }
    }

    fn mapper() -> (DecisionMapper, OverrideRegistry) {
        let overrides = OverrideRegistry::new();
        let mapper = DecisionMapper::new(DecisionConfig::default(), 0.6, overrides.clone());
        (mapper, overrides)
    }

    fn emitted_action(outcome: &MapOutcome) -> Option<Action> {
        outcome.decision().map(|d| d.action)
    }

    #[test]
    fn test_threshold_mapping() {
        let (mut m, _) = mapper();
        let inf = f64::INFINITY;
        assert_eq!(m.raw_action(0.2, inf, false), Action::Continue);
        assert_eq!(m.raw_action(0.55, inf, false), Action::Slow);
        assert_eq!(m.raw_action(0.2, 2.5, false), Action::Slow);
        assert_eq!(m.raw_action(0.85, inf, false), Action::Stop);
        assert_eq!(m.raw_action(0.2, 1.2, false), Action::Stop);
        assert_eq!(m.raw_action(0.65, inf, true), Action::Reroute);
        assert_eq!(m.raw_action(0.65, inf, false), Action::Slow);

        // First decision for a robot is always emitted
        let outcome = m.decide(&window(200, inf, 0.0), &assessment(0.1));
        assert_eq!(emitted_action(&outcome), Some(Action::Continue));
    }

    #[test]
    fn test_stop_hysteresis() {
        let (mut m, _) = mapper();
        let inf = f64::INFINITY;
        let mut transitions = Vec::new();
        let scores = [0.85, 0.75, 0.85, 0.75, 0.70, 0.60, 0.85];
        for (i, score) in scores.iter().enumerate() {
            let outcome = m.decide(&window(200 * (i as i64 + 1), inf, 0.0), &assessment(*score));
            if let Some(action) = emitted_action(&outcome) {
                transitions.push(action);
            }
        }
        // 0.75 and 0.70 stay in STOP; 0.60 falls below 0.65 and releases
        assert_eq!(transitions, vec![Action::Stop, Action::Slow, Action::Stop]);
    }

    #[test]
    fn test_slow_hysteresis() {
        let (mut m, _) = mapper();
        let inf = f64::INFINITY;
        assert_eq!(
            emitted_action(&m.decide(&window(200, inf, 0.0), &assessment(0.55))),
            Some(Action::Slow)
        );
        assert_eq!(
            m.decide(&window(400, inf, 0.0), &assessment(0.40)),
            MapOutcome::Held { action: Action::Slow }
        );
        assert_eq!(
            emitted_action(&m.decide(&window(600, inf, 0.0), &assessment(0.30))),
            Some(Action::Continue)
        );
    }

    #[test]
    fn test_stop_heartbeat() {
        let (mut m, _) = mapper();
        let inf = f64::INFINITY;
        let first = m.decide(&window(1_000, inf, 0.0), &assessment(0.9));
        assert!(matches!(first, MapOutcome::Emitted { heartbeat: false, .. }));
        assert!(matches!(
            m.decide(&window(2_000, inf, 0.0), &assessment(0.9)),
            MapOutcome::Held { action: Action::Stop }
        ));
        let beat = m.decide(&window(3_000, inf, 0.0), &assessment(0.9));
        assert!(matches!(beat, MapOutcome::Emitted { heartbeat: true, .. }));
        assert!(beat.decision().is_some_and(|d| d.heartbeat));
        assert!(!first.decision().is_some_and(|d| d.heartbeat));
    }

    #[test]
    fn test_override_suppresses_and_resets() {
        let (mut m, overrides) = mapper();
        let inf = f64::INFINITY;
        m.decide(&window(200, inf, 0.0), &assessment(0.9));

        overrides.set("robot-1", OverrideSource::Operator);
        assert_eq!(
            m.decide(&window(400, 0.5, 0.0), &assessment(1.0)),
            MapOutcome::Overridden
        );
        assert_eq!(m.current_action("robot-1"), None);

        overrides.clear("robot-1");
        let outcome = m.decide(&window(600, inf, 0.0), &assessment(0.9));
        assert_eq!(emitted_action(&outcome), Some(Action::Stop));
    }

    #[test]
    fn test_decision_fields() {
        let (mut m, _) = mapper();
        let outcome = m.decide(&window(1_200, 1.23456, 0.0), &assessment(0.81234));
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.decision_id, "dec-1200-robot-1");
        assert_eq!(decision.risk_score, 0.812);
        assert_eq!(decision.nearest_human_distance, Some(1.23));
        assert_eq!(decision.primary_reason, ReasonCode::LowVisibility);
        assert_eq!(decision.zone_id, "zone-a");
    }
}
