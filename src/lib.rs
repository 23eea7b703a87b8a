pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod detectors;
pub mod domain;
pub mod engine;
pub mod error;
pub mod services;

pub use config::AppConfig;
pub use coordination::{Coordinator, GracefulShutdown, ShutdownSignal};
pub use detectors::AnomalyDetector;
pub use domain::{Action, AnomalyAlert, Decision, InputRecord, ReasonCode, WindowAggregate};
pub use engine::{Pipeline, PipelineOutput};
pub use error::{CoSenseError, Result};
pub use services::{AlertEmitter, DecisionEmitter, HealthServer, HealthState, Metrics};
