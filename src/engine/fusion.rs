//! Windowed fusion join
//!
//! Robot telemetry is bucketed into fixed tumbling windows per robot. A window
//! closes once the robot's watermark (latest event time minus the grace period)
//! passes its end, or when the wall clock does via [`FusionJoin::advance`].
//! Closing a window joins the robot's latest snapshot in it with the nearest
//! human and the owning zone's context.

use super::state::{HumanBoard, ZoneBoard};
use crate::config::FusionConfig;
use crate::domain::{EntitySnapshot, FusedWindow, ZoneSnapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A window still accepting telemetry
#[derive(Debug, Clone)]
struct OpenWindow {
    latest: Arc<EntitySnapshot>,
    event_count: u32,
}

/// Per-robot window bookkeeping
#[derive(Debug, Default)]
struct RobotWindows {
    open: BTreeMap<i64, OpenWindow>,
    /// Highest event time seen for the robot
    max_event_time: Option<i64>,
    /// End of the most recently closed window; earlier telemetry is late
    closed_until: Option<i64>,
}

/// Result of admitting one robot event
#[derive(Debug, Default)]
pub struct Observation {
    /// False when the event fell into an already closed window
    pub admitted: bool,
    pub closed: Vec<FusedWindow>,
}

/// Tumbling-window join of robot telemetry with human and zone state
pub struct FusionJoin {
    config: FusionConfig,
    humans: HumanBoard,
    zones: ZoneBoard,
    robots: BTreeMap<String, RobotWindows>,
    late_events: u64,
}

impl FusionJoin {
    pub fn new(config: FusionConfig, humans: HumanBoard, zones: ZoneBoard) -> Self {
        Self {
            config,
            humans,
            zones,
            robots: BTreeMap::new(),
            late_events: 0,
        }
    }

    /// Start of the tumbling window containing `timestamp`
    pub fn window_start(&self, timestamp: i64) -> i64 {
        timestamp.saturating_sub(timestamp.rem_euclid(self.config.window_ms))
    }

    /// Telemetry dropped for arriving after its window closed
    pub fn late_events(&self) -> u64 {
        self.late_events
    }

    /// Windows currently open across all robots
    pub fn open_windows(&self) -> usize {
        self.robots.values().map(|r| r.open.len()).sum()
    }

    /// Admit a robot snapshot and close every window its watermark has passed
    pub fn observe(&mut self, snapshot: Arc<EntitySnapshot>) -> Observation {
        let timestamp = snapshot.timestamp;
        let start = self.window_start(timestamp);
        let end = start.saturating_add(self.config.window_ms);
        let grace = self.config.grace_ms;
        let robot_id = snapshot.id.clone();

        let state = self.robots.entry(robot_id.clone()).or_default();

        if state.closed_until.is_some_and(|closed| end <= closed) {
            self.late_events += 1;
            debug!(
                robot_id = %robot_id,
                timestamp,
                window_end = end,
                "dropping late telemetry"
            );
            return Observation {
                admitted: false,
                closed: Vec::new(),
            };
        }

        state
            .open
            .entry(start)
            .and_modify(|window| {
                if timestamp >= window.latest.timestamp {
                    window.latest = Arc::clone(&snapshot);
                }
                window.event_count += 1;
            })
            .or_insert_with(|| OpenWindow {
                latest: Arc::clone(&snapshot),
                event_count: 1,
            });

        let max_event_time = state.max_event_time.map_or(timestamp, |t| t.max(timestamp));
        state.max_event_time = Some(max_event_time);

        let watermark = max_event_time.saturating_sub(grace);
        let ready = Self::take_closed(state, watermark, self.config.window_ms);
        let closed = ready
            .into_iter()
            .map(|(start, window)| self.fuse(start, window))
            .collect();

        Observation {
            admitted: true,
            closed,
        }
    }

    /// Close windows whose end plus grace is at or before `now_ms`
    pub fn advance(&mut self, now_ms: i64) -> Vec<FusedWindow> {
        let watermark = now_ms.saturating_sub(self.config.grace_ms);
        self.close_all(watermark)
    }

    /// Close every open window regardless of time (shutdown)
    pub fn flush(&mut self) -> Vec<FusedWindow> {
        self.close_all(i64::MAX)
    }

    /// Drop all window state for a robot
    pub fn forget(&mut self, robot_id: &str) {
        self.robots.remove(robot_id);
    }

    fn close_all(&mut self, watermark: i64) -> Vec<FusedWindow> {
        let window_ms = self.config.window_ms;
        let mut ready = Vec::new();
        for state in self.robots.values_mut() {
            ready.extend(Self::take_closed(state, watermark, window_ms));
        }
        ready
            .into_iter()
            .map(|(start, window)| self.fuse(start, window))
            .collect()
    }

    /// Remove windows ending at or before the watermark, oldest first
    fn take_closed(
        state: &mut RobotWindows,
        watermark: i64,
        window_ms: i64,
    ) -> Vec<(i64, OpenWindow)> {
        let mut ready = Vec::new();
        while let Some((&start, _)) = state.open.first_key_value() {
            let end = start.saturating_add(window_ms);
            if end > watermark {
                break;
            }
            if let Some(window) = state.open.remove(&start) {
                state.closed_until = Some(state.closed_until.map_or(end, |c| c.max(end)));
                ready.push((start, window));
            }
        }
        ready
    }

    /// Join a closed window with human and zone context
    fn fuse(&self, window_start: i64, window: OpenWindow) -> FusedWindow {
        let robot = window.latest;
        let window_end = window_start.saturating_add(self.config.window_ms);
        let zone_id = robot.zone_id.clone().unwrap_or_default();

        let (zone, context_incomplete) = match self.zones.get(&zone_id) {
            Some(zone) => (zone, false),
            None => (Arc::new(ZoneSnapshot::fallback(&zone_id)), true),
        };

        let nearest = self.nearest_human(&robot, window_end);
        let (nearest_human_id, nearest_human_distance, relative_velocity) = match &nearest {
            Some((human, distance)) => (
                Some(human.id.clone()),
                *distance,
                robot.closing_speed(human),
            ),
            None => (None, f64::INFINITY, 0.0),
        };

        let beacon_distance = robot.beacon_signal.map(|rssi| self.beacon_distance(rssi));
        let sensor_disagreement = match (robot.ultrasonic_distance, beacon_distance) {
            (Some(ultrasonic), Some(beacon)) => {
                (ultrasonic - beacon).abs() > self.config.sensor_disagreement_tolerance_m
            }
            _ => false,
        };

        FusedWindow {
            robot_id: robot.id.clone(),
            window_start,
            window_end,
            nearest_human_id,
            nearest_human_distance,
            relative_velocity,
            zone,
            context_incomplete,
            beacon_distance,
            sensor_disagreement,
            event_count: window.event_count,
            robot,
        }
    }

    /// Nearest live human, restricted to the robot's zone when both report one
    fn nearest_human(
        &self,
        robot: &EntitySnapshot,
        window_end: i64,
    ) -> Option<(Arc<EntitySnapshot>, f64)> {
        self.humans
            .snapshot()
            .into_iter()
            .filter(|human| window_end.saturating_sub(human.timestamp) <= self.config.human_ttl_ms)
            .filter(|human| match (&robot.zone_id, &human.zone_id) {
                (Some(robot_zone), Some(human_zone)) => robot_zone == human_zone,
                _ => true,
            })
            .map(|human| {
                let distance = robot.distance_to(&human);
                (human, distance)
            })
            // Ties broken by id so replays fuse identically
            .min_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)))
    }

    /// Log-distance path loss model: rssi = ref - 10 n log10(d)
    pub fn beacon_distance(&self, rssi: f64) -> f64 {
        let exponent = (self.config.beacon_reference_rssi - rssi)
            / (10.0 * self.config.beacon_path_loss_exponent);
        10f64.powf(exponent)
    }
}
