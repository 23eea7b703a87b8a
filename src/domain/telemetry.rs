//! Wire records consumed from the telemetry topics
//!
//! Records are validated at the boundary and converted into snapshots.
//! Missing optional fields degrade to documented defaults; structural
//! problems (missing ids, non-finite coordinates) reject the record.

use super::entity::{Connectivity, EntityKind, EntitySnapshot, MotionState, Visibility, ZoneSnapshot};
use crate::error::RecordError;
use serde::{Deserialize, Serialize};

pub const ROBOT_TELEMETRY_TOPIC: &str = "robot.telemetry";
pub const HUMAN_TELEMETRY_TOPIC: &str = "human.telemetry";
pub const ZONE_CONTEXT_TOPIC: &str = "zone.context";

/// Latest accepted event time, 9999-12-31T23:59:59.999Z in unix milliseconds
pub const MAX_TIMESTAMP_MS: i64 = 253_402_300_799_999;

/// `robot.telemetry` record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotTelemetry {
    #[serde(default)]
    pub robot_id: String,
    pub timestamp: i64,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub velocity: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub motion_state: MotionState,
    #[serde(default)]
    pub ultrasonic_distance: Option<f64>,
    #[serde(default, alias = "ble_rssi")]
    pub beacon_signal: Option<f64>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub manual_override: bool,
}

/// `human.telemetry` record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanTelemetry {
    #[serde(default)]
    pub human_id: String,
    pub timestamp: i64,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub velocity: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub position_confidence: Option<f64>,
}

/// `zone.context` record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneContext {
    #[serde(default)]
    pub zone_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub congestion_level: f64,
    #[serde(default)]
    pub connectivity: Connectivity,
    #[serde(default)]
    pub robot_count: u32,
    #[serde(default)]
    pub human_count: u32,
}

fn finite(field: &'static str, value: f64) -> Result<f64, RecordError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RecordError::NonFinite { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<f64, RecordError> {
    let value = finite(field, value)?;
    if value < 0.0 {
        return Err(RecordError::Negative { field, value });
    }
    Ok(value)
}

/// Event times must be unix milliseconds that window arithmetic can't overflow
fn event_time(timestamp: i64) -> Result<i64, RecordError> {
    if (0..=MAX_TIMESTAMP_MS).contains(&timestamp) {
        Ok(timestamp)
    } else {
        Err(RecordError::TimestampOutOfRange { timestamp })
    }
}

/// Optional sensor readings that are unusable are dropped, not fatal
fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl RobotTelemetry {
    pub fn into_snapshot(self, default_zone: &str) -> Result<EntitySnapshot, RecordError> {
        if self.robot_id.trim().is_empty() {
            return Err(RecordError::MissingId { kind: "robot" });
        }
        let timestamp = event_time(self.timestamp)?;

        Ok(EntitySnapshot {
            kind: EntityKind::Robot,
            x: finite("x", self.x)?,
            y: finite("y", self.y)?,
            velocity: non_negative("velocity", self.velocity)?,
            heading: finite("heading", self.heading)?.rem_euclid(360.0),
            motion_state: self.motion_state,
            ultrasonic_distance: usable(self.ultrasonic_distance).filter(|d| *d >= 0.0),
            beacon_signal: usable(self.beacon_signal),
            destination: self.destination,
            zone_id: Some(
                self.zone_id
                    .filter(|z| !z.trim().is_empty())
                    .unwrap_or_else(|| default_zone.to_string()),
            ),
            manual_override: self.manual_override,
            timestamp,
            id: self.robot_id,
        })
    }
}

impl HumanTelemetry {
    pub fn into_snapshot(self) -> Result<EntitySnapshot, RecordError> {
        if self.human_id.trim().is_empty() {
            return Err(RecordError::MissingId { kind: "human" });
        }
        let timestamp = event_time(self.timestamp)?;

        Ok(EntitySnapshot {
            kind: EntityKind::Human,
            x: finite("x", self.x)?,
            y: finite("y", self.y)?,
            velocity: non_negative("velocity", self.velocity)?,
            heading: usable(self.heading).unwrap_or(0.0).rem_euclid(360.0),
            motion_state: MotionState::Unknown,
            ultrasonic_distance: None,
            beacon_signal: None,
            destination: None,
            zone_id: self.zone_id.filter(|z| !z.trim().is_empty()),
            manual_override: false,
            timestamp,
            id: self.human_id,
        })
    }
}

impl ZoneContext {
    pub fn into_snapshot(self) -> Result<ZoneSnapshot, RecordError> {
        if self.zone_id.trim().is_empty() {
            return Err(RecordError::MissingId { kind: "zone" });
        }
        let timestamp = event_time(self.timestamp)?;

        let congestion = if self.congestion_level.is_finite() {
            self.congestion_level.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(ZoneSnapshot {
            zone_id: self.zone_id,
            visibility: self.visibility,
            connectivity: self.connectivity,
            congestion,
            robot_count: self.robot_count,
            human_count: self.human_count,
            timestamp,
        })
    }
}

/// A validated input record, routed by kind
#[derive(Debug, Clone, PartialEq)]
pub enum InputRecord {
    Robot(EntitySnapshot),
    Human(EntitySnapshot),
    Zone(ZoneSnapshot),
}

impl InputRecord {
    /// Decode and validate a record for an un-prefixed topic name
    pub fn decode(
        topic: &str,
        value: serde_json::Value,
        default_zone: &str,
    ) -> Result<Self, RecordError> {
        let malformed = |e: serde_json::Error| RecordError::Malformed(e.to_string());

        match topic {
            ROBOT_TELEMETRY_TOPIC => {
                let record: RobotTelemetry = serde_json::from_value(value).map_err(malformed)?;
                record.into_snapshot(default_zone).map(InputRecord::Robot)
            }
            HUMAN_TELEMETRY_TOPIC => {
                let record: HumanTelemetry = serde_json::from_value(value).map_err(malformed)?;
                record.into_snapshot().map(InputRecord::Human)
            }
            ZONE_CONTEXT_TOPIC => {
                let record: ZoneContext = serde_json::from_value(value).map_err(malformed)?;
                record.into_snapshot().map(InputRecord::Zone)
            }
            other => Err(RecordError::UnknownTopic {
                topic: other.to_string(),
            }),
        }
    }

    /// Event time of the record
    pub fn timestamp(&self) -> i64 {
        match self {
            InputRecord::Robot(s) | InputRecord::Human(s) => s.timestamp,
            InputRecord::Zone(z) => z.timestamp,
        }
    }
}
