pub mod actuator;
pub mod explainer;
pub mod ingest;
pub mod output;

pub use actuator::{deliver_with_retry, ActuationCommand, Actuator, HttpActuator, NoopActuator};
pub use explainer::{Explainer, HttpExplainer};
pub use ingest::{pump_lines, Envelope, PumpStats, RecordDecoder};
pub use output::{
    JsonLinesSink, OutputRecord, OutputTopics, ALERTS_TOPIC, DECISIONS_TOPIC,
    ENRICHED_ALERTS_TOPIC, STATE_TOPIC,
};
