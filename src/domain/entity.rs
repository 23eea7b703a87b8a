use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Robot,
    Human,
}

/// Reported motion state of a robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum MotionState {
    Moving,
    Stopped,
    Slowing,
    #[default]
    Unknown,
}

impl From<String> for MotionState {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "moving" => MotionState::Moving,
            "stopped" => MotionState::Stopped,
            "slowing" => MotionState::Slowing,
            _ => MotionState::Unknown,
        }
    }
}

/// Camera/vision visibility in a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Visibility {
    #[default]
    Normal,
    Degraded,
    Poor,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Normal => "normal",
            Visibility::Degraded => "degraded",
            Visibility::Poor => "poor",
        }
    }

    /// Risk penalty for this visibility level
    pub fn penalty(&self) -> f64 {
        match self {
            Visibility::Normal => 0.0,
            Visibility::Degraded => 0.5,
            Visibility::Poor => 1.0,
        }
    }
}

// Unknown levels degrade to the documented default rather than failing the record.
impl From<String> for Visibility {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "degraded" => Visibility::Degraded,
            "poor" => Visibility::Poor,
            _ => Visibility::Normal,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Network connectivity in a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Connectivity {
    #[default]
    Normal,
    Degraded,
    Offline,
}

impl From<String> for Connectivity {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "degraded" => Connectivity::Degraded,
            "offline" => Connectivity::Offline,
            _ => Connectivity::Normal,
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Normal => write!(f, "normal"),
            Connectivity::Degraded => write!(f, "degraded"),
            Connectivity::Offline => write!(f, "offline"),
        }
    }
}

/// Latest known state of a robot or human
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    pub kind: EntityKind,
    pub zone_id: Option<String>,
    pub x: f64,
    pub y: f64,
    /// Speed in m/s
    pub velocity: f64,
    /// Heading in degrees
    pub heading: f64,
    pub motion_state: MotionState,
    /// Nearest obstacle distance reported by the ultrasonic sensor (m)
    pub ultrasonic_distance: Option<f64>,
    /// Proximity beacon signal strength (dBm)
    pub beacon_signal: Option<f64>,
    pub destination: Option<String>,
    pub manual_override: bool,
    /// Event time in unix milliseconds
    pub timestamp: i64,
}

impl EntitySnapshot {
    /// Euclidean distance to another entity
    pub fn distance_to(&self, other: &EntitySnapshot) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }

    /// Velocity vector from speed and heading
    pub fn velocity_components(&self) -> (f64, f64) {
        let heading = self.heading.to_radians();
        (self.velocity * heading.cos(), self.velocity * heading.sin())
    }

    /// Closing speed towards `other` (positive = approaching)
    pub fn closing_speed(&self, other: &EntitySnapshot) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dist = (dx * dx + dy * dy).sqrt();
        if dist < 0.01 {
            return 0.0;
        }

        let (nx, ny) = (dx / dist, dy / dist);
        let (rvx, rvy) = self.velocity_components();
        let (hvx, hvy) = other.velocity_components();

        (rvx - hvx) * nx + (rvy - hvy) * ny
    }
}

/// Shared context for a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zone_id: String,
    pub visibility: Visibility,
    pub connectivity: Connectivity,
    /// Congestion in [0, 1]
    pub congestion: f64,
    pub robot_count: u32,
    pub human_count: u32,
    pub timestamp: i64,
}

impl ZoneSnapshot {
    /// Conservative context used when a zone has not reported yet
    pub fn fallback(zone_id: &str) -> Self {
        Self {
            zone_id: zone_id.to_string(),
            visibility: Visibility::Normal,
            connectivity: Connectivity::Normal,
            congestion: 0.0,
            robot_count: 0,
            human_count: 0,
            timestamp: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(x: f64, y: f64, velocity: f64, heading: f64) -> EntitySnapshot {
        EntitySnapshot {
            id: "e".to_string(),
            kind: EntityKind::Robot,
            zone_id: None,
            x,
            y,
            velocity,
            heading,
            motion_state: MotionState::Moving,
            ultrasonic_distance: None,
            beacon_signal: None,
            destination: None,
            manual_override: false,
            timestamp: 0,
        }
    }

    #[test]
    fn test_closing_speed_head_on() {
        // Robot heading east at 1 m/s, human 2m east heading west at 1 m/s
        let robot = entity(0.0, 0.0, 1.0, 0.0);
        let human = entity(2.0, 0.0, 1.0, 180.0);
        assert!((robot.closing_speed(&human) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_closing_speed_separating_is_negative() {
        let robot = entity(0.0, 0.0, 1.0, 180.0);
        let human = entity(2.0, 0.0, 0.0, 0.0);
        assert!(robot.closing_speed(&human) < 0.0);
    }

    #[test]
    fn test_closing_speed_coincident() {
        let robot = entity(1.0, 1.0, 2.0, 0.0);
        let human = entity(1.0, 1.0, 2.0, 180.0);
        assert_eq!(robot.closing_speed(&human), 0.0);
    }

    #[test]
    fn test_unknown_levels_degrade_to_normal() {
        let v: Visibility = serde_json::from_str("\"foggy\"").unwrap();
        assert_eq!(v, Visibility::Normal);
        let c: Connectivity = serde_json::from_str("\"OFFLINE\"").unwrap();
        assert_eq!(c, Connectivity::Offline);
    }
}
