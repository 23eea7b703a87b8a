pub mod alert_emitter;
pub mod emitter;
pub mod health;
pub mod metrics;

pub use alert_emitter::AlertEmitter;
pub use emitter::DecisionEmitter;
pub use health::{ComponentHealth, HealthResponse, HealthServer, HealthState, HealthStatus};
pub use metrics::Metrics;
