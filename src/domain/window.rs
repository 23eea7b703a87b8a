use super::entity::{EntitySnapshot, ZoneSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One robot's telemetry fused with its surroundings over a tumbling window
#[derive(Debug, Clone)]
pub struct FusedWindow {
    pub robot_id: String,
    pub window_start: i64,
    pub window_end: i64,
    /// Latest robot snapshot observed inside the window
    pub robot: Arc<EntitySnapshot>,
    pub nearest_human_id: Option<String>,
    /// `f64::INFINITY` when no human is in range
    pub nearest_human_distance: f64,
    /// Closing speed with the nearest human (positive = approaching)
    pub relative_velocity: f64,
    pub zone: Arc<ZoneSnapshot>,
    /// Zone context was missing and defaults were applied
    pub context_incomplete: bool,
    /// Distance implied by the proximity beacon signal
    pub beacon_distance: Option<f64>,
    pub sensor_disagreement: bool,
    /// Telemetry events that landed in the window
    pub event_count: u32,
}

impl FusedWindow {
    pub fn has_human(&self) -> bool {
        self.nearest_human_distance.is_finite()
    }
}

/// Round for the wire; internal comparisons use the unrounded values
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Scope a window aggregate was computed over
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum AggregateScope {
    Zone(String),
    Robot(String),
}

impl AggregateScope {
    pub fn id(&self) -> &str {
        match self {
            AggregateScope::Zone(id) | AggregateScope::Robot(id) => id,
        }
    }
}

impl fmt::Display for AggregateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateScope::Zone(id) => write!(f, "zone:{}", id),
            AggregateScope::Robot(id) => write!(f, "robot:{}", id),
        }
    }
}

/// Decision counts for one scope over one closed window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub scope: AggregateScope,
    pub window_start: i64,
    pub window_end: i64,
    pub decision_count: u32,
    pub stop_count: u32,
    pub slow_count: u32,
    pub sensor_disagreement_count: u32,
}

impl WindowAggregate {
    pub fn empty(scope: AggregateScope, window_start: i64, window_end: i64) -> Self {
        Self {
            scope,
            window_start,
            window_end,
            decision_count: 0,
            stop_count: 0,
            slow_count: 0,
            sensor_disagreement_count: 0,
        }
    }
}
