use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordination action commanded to a robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// No intervention needed
    Continue,
    /// Reduce speed
    Slow,
    /// Full stop
    Stop,
    /// Find alternate path
    Reroute,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Continue => "CONTINUE",
            Action::Slow => "SLOW",
            Action::Stop => "STOP",
            Action::Reroute => "REROUTE",
        }
    }

    /// Verb used in operator-facing summaries
    pub fn verb(&self) -> &'static str {
        match self {
            Action::Continue => "proceeding",
            Action::Slow => "slowing",
            Action::Stop => "stopping",
            Action::Reroute => "rerouting",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason codes explaining why a decision was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    None,
    CloseProximity,
    HighRelativeSpeed,
    LowVisibility,
    HighCongestion,
    BleProximityDetected,
    SensorDisagreement,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::None => "NONE",
            ReasonCode::CloseProximity => "CLOSE_PROXIMITY",
            ReasonCode::HighRelativeSpeed => "HIGH_RELATIVE_SPEED",
            ReasonCode::LowVisibility => "LOW_VISIBILITY",
            ReasonCode::HighCongestion => "HIGH_CONGESTION",
            ReasonCode::BleProximityDetected => "BLE_PROXIMITY_DETECTED",
            ReasonCode::SensorDisagreement => "SENSOR_DISAGREEMENT",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A coordination decision for a robot (`coordination.decisions`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub robot_id: String,
    pub zone_id: String,
    /// Event time (end of the fused window) in unix milliseconds
    pub timestamp: i64,
    pub action: Action,
    /// Ordered by contribution, strongest first
    pub reason_codes: Vec<ReasonCode>,
    pub primary_reason: ReasonCode,
    pub risk_score: f64,
    /// Absent when no human was in range
    pub nearest_human_distance: Option<f64>,
    pub summary: String,
    /// Re-publication of a sustained STOP, not a new action
    #[serde(default)]
    pub heartbeat: bool,
}

impl Decision {
    /// Stable id so reprocessing the same window yields the same decision
    pub fn make_id(robot_id: &str, timestamp: i64) -> String {
        format!("dec-{}-{}", timestamp, robot_id)
    }

    pub fn is_stop(&self) -> bool {
        self.action == Action::Stop
    }
}

/// Human-readable one-line summary from the action and strongest reasons
pub fn summarize(
    robot_id: &str,
    action: Action,
    reason_codes: &[ReasonCode],
    distance: Option<f64>,
) -> String {
    if action == Action::Continue {
        return format!("{} proceeding normally", robot_id);
    }

    let reasons: Vec<String> = reason_codes
        .iter()
        .take(2)
        .filter_map(|code| match code {
            ReasonCode::CloseProximity => Some(match distance {
                Some(d) => format!("human within {:.1}m", d),
                None => "human nearby".to_string(),
            }),
            ReasonCode::HighRelativeSpeed => Some("high closing speed".to_string()),
            ReasonCode::LowVisibility => Some("low visibility".to_string()),
            ReasonCode::HighCongestion => Some("zone congested".to_string()),
            ReasonCode::BleProximityDetected => Some("beacon proximity alert".to_string()),
            ReasonCode::SensorDisagreement => Some("sensor readings conflict".to_string()),
            ReasonCode::None => None,
        })
        .collect();

    let reason_str = if reasons.is_empty() {
        "precautionary".to_string()
    } else {
        reasons.join(" and ")
    };

    format!("{} {}: {}", robot_id, action.verb(), reason_str)
}
