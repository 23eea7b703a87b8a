use super::entity::{Connectivity, MotionState, Visibility};
use super::window::{round_to, FusedWindow};
use serde::{Deserialize, Serialize};

/// Per-window view of a robot and its surroundings, published for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationState {
    pub robot_id: String,
    /// Window end
    pub timestamp: i64,
    pub zone_id: String,
    pub x: f64,
    pub y: f64,
    pub velocity: f64,
    pub heading: f64,
    pub motion_state: MotionState,
    pub nearest_human_id: Option<String>,
    /// Meters, two decimals; None without a human in range
    pub nearest_human_distance: Option<f64>,
    /// Closing speed with the nearest human, two decimals
    pub relative_velocity: Option<f64>,
    pub visibility: Visibility,
    pub congestion_level: f64,
    pub connectivity: Connectivity,
    pub risk_score: f64,
}

impl CoordinationState {
    pub fn from_window(window: &FusedWindow, risk_score: f64) -> Self {
        let robot = &window.robot;
        let (nearest_human_id, nearest_human_distance, relative_velocity) = if window.has_human() {
            (
                window.nearest_human_id.clone(),
                Some(round_to(window.nearest_human_distance, 2)),
                Some(round_to(window.relative_velocity, 2)),
            )
        } else {
            (None, None, None)
        };

        Self {
            robot_id: window.robot_id.clone(),
            timestamp: window.window_end,
            zone_id: window.zone.zone_id.clone(),
            x: robot.x,
            y: robot.y,
            velocity: robot.velocity,
            heading: robot.heading,
            motion_state: robot.motion_state,
            nearest_human_id,
            nearest_human_distance,
            relative_velocity,
            visibility: window.zone.visibility,
            congestion_level: window.zone.congestion,
            connectivity: window.zone.connectivity,
            risk_score: round_to(risk_score, 3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, EntitySnapshot, ZoneSnapshot};
    use std::sync::Arc;

    fn window(distance: f64) -> FusedWindow {
        let robot = EntitySnapshot {
            id: "robot-2".to_string(),
            kind: EntityKind::Robot,
            zone_id: Some("zone-b".to_string()),
            x: 4.0,
            y: 1.5,
            velocity: 1.2,
            heading: 90.0,
            motion_state: MotionState::Moving,
            ultrasonic_distance: None,
            beacon_signal: None,
            destination: None,
            manual_override: false,
            timestamp: 9_800,
        };
        FusedWindow {
            robot_id: "robot-2".to_string(),
            window_start: 9_500,
            window_end: 10_000,
            robot: Arc::new(robot),
            nearest_human_id: distance.is_finite().then(|| "human-4".to_string()),
            nearest_human_distance: distance,
            relative_velocity: 0.8765,
            zone: Arc::new(ZoneSnapshot {
                zone_id: "zone-b".to_string(),
                visibility: Visibility::Degraded,
                connectivity: Connectivity::Normal,
                congestion: 0.6,
                robot_count: 4,
                human_count: 3,
                timestamp: 9_000,
            }),
            context_incomplete: false,
            beacon_distance: None,
            sensor_disagreement: false,
            event_count: 2,
        }
    }

    #[test]
    fn test_state_from_window_with_human() {
        let state = CoordinationState::from_window(&window(2.3456), 0.61234);

        assert_eq!(state.timestamp, 10_000);
        assert_eq!(state.zone_id, "zone-b");
        assert_eq!(state.nearest_human_id.as_deref(), Some("human-4"));
        assert_eq!(state.nearest_human_distance, Some(2.35));
        assert_eq!(state.relative_velocity, Some(0.88));
        assert_eq!(state.risk_score, 0.612);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["motion_state"], "moving");
        assert_eq!(json["visibility"], "degraded");
        assert_eq!(json["congestion_level"], 0.6);
    }

    #[test]
    fn test_state_without_human_is_null() {
        let state = CoordinationState::from_window(&window(f64::INFINITY), 0.1);
        let json = serde_json::to_value(&state).unwrap();
        assert!(json["nearest_human_id"].is_null());
        assert!(json["nearest_human_distance"].is_null());
        assert!(json["relative_velocity"].is_null());
    }
}
