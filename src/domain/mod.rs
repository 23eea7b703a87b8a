pub mod alert;
pub mod decision;
pub mod entity;
pub mod state;
pub mod telemetry;
pub mod window;

pub use alert::{AlertType, AnomalyAlert, Severity};
pub use decision::{summarize, Action, Decision, ReasonCode};
pub use entity::{
    Connectivity, EntityKind, EntitySnapshot, MotionState, Visibility, ZoneSnapshot,
};
pub use state::CoordinationState;
pub use telemetry::{
    HumanTelemetry, InputRecord, RobotTelemetry, ZoneContext, HUMAN_TELEMETRY_TOPIC,
    MAX_TIMESTAMP_MS, ROBOT_TELEMETRY_TOPIC, ZONE_CONTEXT_TOPIC,
};
pub use window::{round_to, AggregateScope, FusedWindow, WindowAggregate};
