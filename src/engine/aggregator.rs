//! Decision stream roll-up
//!
//! Zone scope uses epoch-aligned tumbling windows of `rate_window_ms`; quiet
//! periods produce zero-count windows so the rate forecaster sees them. Robot
//! scope slides: every STOP onset emits an aggregate over the robot's trailing
//! `stop_window_ms`, starting at the oldest onset still inside it. Heartbeats
//! that re-publish a sustained STOP are not onsets.

use crate::config::AggregationConfig;
use crate::domain::{Action, AggregateScope, Decision, ReasonCode, WindowAggregate};
use std::collections::{BTreeMap, VecDeque};
use tracing::trace;

#[derive(Debug)]
struct ZoneWindows {
    current: Option<WindowAggregate>,
    /// End of the last closed window
    closed_until: Option<i64>,
}

impl ZoneWindows {
    fn new() -> Self {
        Self {
            current: None,
            closed_until: None,
        }
    }

    fn close_current(&mut self, out: &mut Vec<WindowAggregate>) {
        if let Some(window) = self.current.take() {
            self.closed_until = Some(window.window_end);
            out.push(window);
        }
    }

    /// Emit empty aligned windows up to `until`, at most `cap` of them
    fn fill_gaps(
        &mut self,
        scope: &AggregateScope,
        width: i64,
        until: i64,
        cap: usize,
        out: &mut Vec<WindowAggregate>,
    ) {
        let Some(mut start) = self.closed_until else {
            return;
        };
        // Skip ahead instead of emitting more than `cap` empty windows
        let missing = until.saturating_sub(start) / width;
        if missing > cap as i64 {
            start = until.saturating_sub((cap as i64).saturating_mul(width));
        }
        while let Some(end) = start.checked_add(width).filter(|end| *end <= until) {
            out.push(WindowAggregate::empty(scope.clone(), start, end));
            start = end;
        }
        self.closed_until = Some(start);
    }
}

/// One decision remembered for a robot's sliding window
#[derive(Debug, Clone, Copy)]
struct Mark {
    timestamp: i64,
    action: Action,
    onset: bool,
    disagreement: bool,
}

/// A robot's decisions inside the trailing stop window
#[derive(Debug, Default)]
struct StopTrail {
    marks: VecDeque<Mark>,
}

impl StopTrail {
    /// Forget marks at least `width` older than `now`
    fn trim(&mut self, now: i64, width: i64) {
        while self
            .marks
            .front()
            .is_some_and(|m| now.saturating_sub(m.timestamp) >= width)
        {
            self.marks.pop_front();
        }
    }

    /// Counts from the oldest onset still held through `window_end`
    fn aggregate(&self, robot_id: &str, window_end: i64) -> Option<WindowAggregate> {
        let window_start = self.marks.iter().find(|m| m.onset)?.timestamp;
        let mut window = WindowAggregate::empty(
            AggregateScope::Robot(robot_id.to_string()),
            window_start,
            window_end,
        );
        for mark in self.marks.iter().filter(|m| m.timestamp >= window_start) {
            window.decision_count += 1;
            if mark.onset {
                window.stop_count += 1;
            }
            if mark.action == Action::Slow {
                window.slow_count += 1;
            }
            if mark.disagreement {
                window.sensor_disagreement_count += 1;
            }
        }
        Some(window)
    }
}

pub struct WindowAggregator {
    config: AggregationConfig,
    /// Upper bound on zero-count windows emitted for one gap
    max_gap_windows: usize,
    zones: BTreeMap<String, ZoneWindows>,
    robots: BTreeMap<String, StopTrail>,
}

impl WindowAggregator {
    pub fn new(config: AggregationConfig, max_gap_windows: usize) -> Self {
        Self {
            config,
            max_gap_windows,
            zones: BTreeMap::new(),
            robots: BTreeMap::new(),
        }
    }

    /// Count a decision; returns aggregates closed or evaluated by its arrival
    pub fn record(&mut self, decision: &Decision) -> Vec<WindowAggregate> {
        let mut closed = Vec::new();
        self.record_zone(decision, &mut closed);
        self.record_robot(decision, &mut closed);
        closed
    }

    fn aligned_start(&self, timestamp: i64) -> i64 {
        timestamp.saturating_sub(timestamp.rem_euclid(self.config.rate_window_ms))
    }

    fn record_zone(&mut self, decision: &Decision, closed: &mut Vec<WindowAggregate>) {
        let width = self.config.rate_window_ms;
        let cap = self.max_gap_windows;
        let mut start = self.aligned_start(decision.timestamp);
        let scope = AggregateScope::Zone(decision.zone_id.clone());
        let state = self
            .zones
            .entry(decision.zone_id.clone())
            .or_insert_with(ZoneWindows::new);

        if let Some(current) = &state.current {
            if start > current.window_start {
                state.close_current(closed);
                state.fill_gaps(&scope, width, start, cap, closed);
            } else {
                // Late decisions from other partitions land in the open window
                start = current.window_start;
            }
        } else if let Some(closed_until) = state.closed_until {
            if start < closed_until {
                start = closed_until;
            } else {
                state.fill_gaps(&scope, width, start, cap, closed);
            }
        }

        let window = state.current.get_or_insert_with(|| {
            WindowAggregate::empty(scope, start, start.saturating_add(width))
        });
        count(window, decision);
    }

    fn record_robot(&mut self, decision: &Decision, closed: &mut Vec<WindowAggregate>) {
        let width = self.config.stop_window_ms;
        let trail = self.robots.entry(decision.robot_id.clone()).or_default();
        trail.trim(decision.timestamp, width);

        let onset = decision.is_stop() && !decision.heartbeat;
        trail.marks.push_back(Mark {
            timestamp: decision.timestamp,
            action: decision.action,
            onset,
            disagreement: decision.primary_reason == ReasonCode::SensorDisagreement,
        });

        if !onset {
            return;
        }
        if let Some(window) = trail.aggregate(&decision.robot_id, decision.timestamp) {
            trace!(
                robot_id = %decision.robot_id,
                stops = window.stop_count,
                since = window.window_start,
                "stop onset"
            );
            closed.push(window);
        }
    }

    /// Close zone windows ending at or before `now_ms` and expire stop trails
    pub fn advance(&mut self, now_ms: i64) -> Vec<WindowAggregate> {
        let mut closed = Vec::new();
        let width = self.config.rate_window_ms;
        let cap = self.max_gap_windows;
        let until = self.aligned_start(now_ms);

        for (zone_id, state) in self.zones.iter_mut() {
            if state
                .current
                .as_ref()
                .is_some_and(|w| w.window_end <= now_ms)
            {
                state.close_current(&mut closed);
            }
            if state.current.is_none() {
                let scope = AggregateScope::Zone(zone_id.clone());
                state.fill_gaps(&scope, width, until, cap, &mut closed);
            }
        }

        let stop_window_ms = self.config.stop_window_ms;
        self.robots.retain(|_, trail| {
            trail.trim(now_ms, stop_window_ms);
            !trail.marks.is_empty()
        });
        closed
    }

    /// Close every open zone window
    pub fn flush(&mut self) -> Vec<WindowAggregate> {
        let mut closed = Vec::new();
        for state in self.zones.values_mut() {
            state.close_current(&mut closed);
        }
        closed
    }

    /// Zone windows still accepting decisions
    pub fn open_windows(&self) -> usize {
        self.zones.values().filter(|s| s.current.is_some()).count()
    }

    /// Robots with decisions inside their trailing stop window
    pub fn tracked_robots(&self) -> usize {
        self.robots.len()
    }
}

fn count(window: &mut WindowAggregate, decision: &Decision) {
    window.decision_count += 1;
    match decision.action {
        Action::Stop => window.stop_count += 1,
        Action::Slow => window.slow_count += 1,
        Action::Continue | Action::Reroute => {}
    }
    if decision.primary_reason == ReasonCode::SensorDisagreement {
        window.sensor_disagreement_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(robot: &str, timestamp: i64, action: Action, primary: ReasonCode) -> Decision {
        Decision {
            decision_id: Decision::make_id(robot, timestamp),
            robot_id: robot.to_string(),
            zone_id: "zone-a".to_string(),
            timestamp,
            action,
            reason_codes: vec![primary],
            primary_reason: primary,
            risk_score: 0.5,
            nearest_human_distance: None,
            summary: String::new(),
            heartbeat: false,
        }
    }

    fn stop(robot: &str, timestamp: i64) -> Decision {
        decision(robot, timestamp, Action::Stop, ReasonCode::CloseProximity)
    }

    fn aggregator() -> WindowAggregator {
        WindowAggregator::new(AggregationConfig::default(), 60)
    }

    fn zone_windows(windows: &[WindowAggregate]) -> Vec<&WindowAggregate> {
        windows
            .iter()
            .filter(|w| matches!(w.scope, AggregateScope::Zone(_)))
            .collect()
    }

    fn robot_windows(windows: &[WindowAggregate]) -> Vec<&WindowAggregate> {
        windows
            .iter()
            .filter(|w| matches!(w.scope, AggregateScope::Robot(_)))
            .collect()
    }

    #[test]
    fn test_zone_window_counts() {
        let mut agg = aggregator();
        agg.record(&decision("robot-1", 1_000, Action::Stop, ReasonCode::CloseProximity));
        agg.record(&decision("robot-2", 2_000, Action::Slow, ReasonCode::SensorDisagreement));
        agg.record(&decision("robot-1", 3_000, Action::Continue, ReasonCode::None));

        let closed = agg.record(&decision("robot-1", 12_000, Action::Continue, ReasonCode::None));
        let zones = zone_windows(&closed);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].window_start, 0);
        assert_eq!(zones[0].window_end, 10_000);
        assert_eq!(zones[0].decision_count, 3);
        assert_eq!(zones[0].stop_count, 1);
        assert_eq!(zones[0].slow_count, 1);
        assert_eq!(zones[0].sensor_disagreement_count, 1);
    }

    #[test]
    fn test_quiet_zone_emits_empty_windows() {
        let mut agg = aggregator();
        agg.record(&decision("robot-1", 1_000, Action::Slow, ReasonCode::CloseProximity));
        let closed = agg.record(&decision("robot-1", 35_000, Action::Continue, ReasonCode::None));
        let zones = zone_windows(&closed);
        assert_eq!(zones.len(), 3);
        assert_eq!(zones[1].decision_count, 0);
        assert_eq!(zones[2].window_end, 30_000);
    }

    #[test]
    fn test_each_stop_onset_reports_the_trailing_window() {
        let mut agg = aggregator();

        let first = agg.record(&stop("robot-3", 20_000));
        let robot = robot_windows(&first);
        assert_eq!(robot.len(), 1);
        assert_eq!(robot[0].stop_count, 1);

        agg.record(&decision("robot-3", 28_000, Action::Continue, ReasonCode::None));
        let second = agg.record(&stop("robot-3", 35_000));
        let robot = robot_windows(&second);
        assert_eq!(robot[0].stop_count, 2);
        assert_eq!(robot[0].decision_count, 3);
        assert_eq!((robot[0].window_start, robot[0].window_end), (20_000, 35_000));

        // 20s has slid out; 35s and 52s remain
        let third = agg.record(&stop("robot-3", 52_000));
        let robot = robot_windows(&third);
        assert_eq!(robot[0].stop_count, 2);
        assert_eq!(robot[0].window_start, 35_000);
    }

    #[test]
    fn test_stops_straddling_an_epoch_boundary_are_counted_together() {
        let mut agg = aggregator();
        let mut counts = Vec::new();
        for t in [0, 29_000, 31_000, 45_000] {
            for window in robot_windows(&agg.record(&stop("robot-9", t))) {
                counts.push(window.stop_count);
            }
        }
        assert_eq!(counts, vec![1, 2, 2, 3]);
    }

    #[test]
    fn test_heartbeats_are_not_onsets() {
        let mut agg = aggregator();
        agg.record(&stop("robot-4", 1_000));
        for t in [3_000, 5_000, 7_000] {
            let heartbeat = Decision {
                heartbeat: true,
                ..stop("robot-4", t)
            };
            assert!(robot_windows(&agg.record(&heartbeat)).is_empty());
        }

        let closed = agg.record(&stop("robot-4", 9_000));
        let robot = robot_windows(&closed);
        assert_eq!(robot[0].stop_count, 2);
        assert_eq!(robot[0].decision_count, 5);
    }

    #[test]
    fn test_advance_closes_zones_and_expires_trails() {
        let mut agg = aggregator();
        agg.record(&stop("robot-1", 1_000));
        assert!(agg.advance(9_000).is_empty());
        assert_eq!(agg.tracked_robots(), 1);

        let closed = agg.advance(21_000);
        // zone [0,10s) plus empty [10s,20s)
        assert_eq!(zone_windows(&closed).len(), 2);
        assert!(robot_windows(&closed).is_empty());
        assert_eq!(agg.open_windows(), 0);

        agg.advance(31_000);
        assert_eq!(agg.tracked_robots(), 0);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let mut agg = aggregator();
        agg.record(&stop("robot-1", i64::MIN));
        let closed = agg.record(&stop("robot-1", i64::MAX));
        assert!(!closed.is_empty());
        assert!(agg.advance(i64::MAX).len() <= 61);
        agg.flush();
    }
}
