use super::fusion::FusionJoin;
use super::mapper::{DecisionMapper, MapOutcome};
use super::risk::RiskScorer;
use super::state::{EntityStateTracker, HumanBoard, OverrideRegistry, ZoneBoard};
use crate::config::AppConfig;
use crate::domain::{CoordinationState, Decision, EntitySnapshot, FusedWindow};
use tracing::trace;

/// Counters produced while processing one input or tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub windows_fused: u64,
    pub windows_incomplete: u64,
    pub late_events: u64,
    pub stop_heartbeats: u64,
    pub overridden: u64,
}

impl PartitionStats {
    pub fn merge(&mut self, other: PartitionStats) {
        self.windows_fused += other.windows_fused;
        self.windows_incomplete += other.windows_incomplete;
        self.late_events += other.late_events;
        self.stop_heartbeats += other.stop_heartbeats;
        self.overridden += other.overridden;
    }
}

#[derive(Debug, Default)]
pub struct PartitionOutput {
    pub decisions: Vec<Decision>,
    /// One per fused window, overridden robots included
    pub states: Vec<CoordinationState>,
    pub stats: PartitionStats,
}

/// Everything owned by one robot partition: state, open windows, hysteresis.
///
/// Not shared; a single worker drives it, so robot ordering holds.
pub struct PartitionProcessor {
    id: usize,
    tracker: EntityStateTracker,
    fusion: FusionJoin,
    scorer: RiskScorer,
    mapper: DecisionMapper,
    overrides: OverrideRegistry,
}

impl PartitionProcessor {
    pub fn new(
        id: usize,
        config: &AppConfig,
        humans: HumanBoard,
        zones: ZoneBoard,
        overrides: OverrideRegistry,
    ) -> Self {
        Self {
            id,
            tracker: EntityStateTracker::new(),
            fusion: FusionJoin::new(config.fusion.clone(), humans, zones),
            scorer: RiskScorer::new(config.risk.clone()),
            mapper: DecisionMapper::new(
                config.decision.clone(),
                config.risk.congestion_warning,
                overrides.clone(),
            ),
            overrides,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn tracked_robots(&self) -> usize {
        self.tracker.len()
    }

    /// Admit one robot telemetry record
    pub fn on_robot(&mut self, snapshot: EntitySnapshot) -> PartitionOutput {
        self.overrides
            .sync_from_telemetry(&snapshot.id, snapshot.manual_override);
        let snapshot = self.tracker.upsert(snapshot);

        let observation = self.fusion.observe(snapshot);
        let mut output = self.process(observation.closed);
        if !observation.admitted {
            output.stats.late_events += 1;
        }
        output
    }

    /// Close windows the wall clock has moved past
    pub fn on_tick(&mut self, now_ms: i64) -> PartitionOutput {
        let closed = self.fusion.advance(now_ms);
        self.process(closed)
    }

    /// Close every open window (shutdown or end of replay)
    pub fn flush(&mut self) -> PartitionOutput {
        let closed = self.fusion.flush();
        self.process(closed)
    }

    /// Drop a robot's state entirely
    pub fn remove_robot(&mut self, robot_id: &str) {
        self.tracker.remove(robot_id);
        self.fusion.forget(robot_id);
        self.mapper.reset(robot_id);
    }

    fn process(&mut self, windows: Vec<FusedWindow>) -> PartitionOutput {
        let mut output = PartitionOutput::default();
        for window in windows {
            output.stats.windows_fused += 1;
            if window.context_incomplete {
                output.stats.windows_incomplete += 1;
            }

            let assessment = self.scorer.score(&window);
            trace!(
                partition = self.id,
                robot_id = %window.robot_id,
                window_end = window.window_end,
                risk = assessment.score,
                "window scored"
            );
            output
                .states
                .push(CoordinationState::from_window(&window, assessment.score));

            match self.mapper.decide(&window, &assessment) {
                MapOutcome::Emitted {
                    decision,
                    heartbeat,
                } => {
                    if heartbeat {
                        output.stats.stop_heartbeats += 1;
                    }
                    output.decisions.push(decision);
                }
                MapOutcome::Held { .. } => {}
                MapOutcome::Overridden => output.stats.overridden += 1,
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, EntityKind, MotionState};

    fn robot(id: &str, x: f64, timestamp: i64, manual_override: bool) -> EntitySnapshot {
        EntitySnapshot {
            id: id.to_string(),
            kind: EntityKind::Robot,
            zone_id: Some("zone-a".to_string()),
            x,
            y: 0.0,
            velocity: 1.0,
            heading: 0.0,
            motion_state: MotionState::Moving,
            ultrasonic_distance: None,
            beacon_signal: None,
            destination: None,
            manual_override,
            timestamp,
        }
    }

    fn human(x: f64, timestamp: i64) -> EntitySnapshot {
        EntitySnapshot {
            id: "human-1".to_string(),
            kind: EntityKind::Human,
            zone_id: Some("zone-a".to_string()),
            velocity: 0.0,
            ..robot("human-1", x, timestamp, false)
        }
    }

    fn processor() -> (PartitionProcessor, HumanBoard) {
        let humans = HumanBoard::new();
        let p = PartitionProcessor::new(
            0,
            &AppConfig::default(),
            humans.clone(),
            ZoneBoard::new(),
            OverrideRegistry::new(),
        );
        (p, humans)
    }

    #[test]
    fn test_close_human_stops_robot() {
        let (mut p, humans) = processor();
        humans.publish("human-1", human(1.0, 1_000));

        p.on_robot(robot("robot-1", 0.0, 1_050, false));
        let out = p.on_robot(robot("robot-1", 0.0, 1_300, false));

        assert_eq!(out.decisions.len(), 1);
        assert_eq!(out.decisions[0].action, Action::Stop);
        assert_eq!(out.stats.windows_fused, 1);
        assert_eq!(out.states.len(), 1);
        assert_eq!(out.states[0].nearest_human_id.as_deref(), Some("human-1"));
        assert_eq!(out.states[0].nearest_human_distance, Some(1.0));
        assert_eq!(out.states[0].risk_score, out.decisions[0].risk_score);
        // No zone context was ever published
        assert_eq!(out.stats.windows_incomplete, 1);
    }

    #[test]
    fn test_telemetry_override_suppresses_decisions() {
        let (mut p, humans) = processor();
        humans.publish("human-1", human(1.0, 1_000));

        p.on_robot(robot("robot-1", 0.0, 1_050, true));
        p.on_robot(robot("robot-1", 0.0, 1_300, true));
        let out = p.flush();

        assert!(out.decisions.is_empty());
        assert_eq!(out.stats.overridden, 1);
        // Still observed
        assert_eq!(out.states.len(), 1);
        assert_eq!(out.states[0].robot_id, "robot-1");
    }

    #[test]
    fn test_late_event_counted() {
        let (mut p, _) = processor();
        p.on_robot(robot("robot-1", 0.0, 1_050, false));
        p.on_robot(robot("robot-1", 0.0, 1_400, false));
        let out = p.on_robot(robot("robot-1", 0.0, 1_060, false));
        assert_eq!(out.stats.late_events, 1);
        assert_eq!(p.tracked_robots(), 1);
    }
}
