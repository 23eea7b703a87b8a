//! Streaming decision engine
//!
//! Entity state, windowed fusion, risk scoring and decision mapping run
//! inside a robot partition; aggregation and anomaly detection consume the
//! merged decision stream.

pub mod aggregator;
pub mod fusion;
pub mod mapper;
pub mod partition;
pub mod pipeline;
pub mod risk;
pub mod state;

pub use aggregator::WindowAggregator;
pub use fusion::{FusionJoin, Observation};
pub use mapper::{DecisionMapper, MapOutcome};
pub use partition::{PartitionOutput, PartitionProcessor, PartitionStats};
pub use pipeline::{Analytics, AnalyticsOutput, Pipeline, PipelineOutput};
pub use risk::{proximity_factor, FactorScore, RiskAssessment, RiskFactor, RiskScorer};
pub use state::{
    EntityStateTracker, HumanBoard, OverrideRegistry, OverrideSource, SnapshotBoard, ZoneBoard,
};
