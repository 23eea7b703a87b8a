//! JSON-lines output in the ingest envelope format

use super::ingest::Envelope;
use crate::config::IngestConfig;
use crate::domain::{AnomalyAlert, CoordinationState, Decision};
use crate::error::Result;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const DECISIONS_TOPIC: &str = "coordination.decisions";
pub const STATE_TOPIC: &str = "coordination.state";
pub const ALERTS_TOPIC: &str = "anomaly.alerts";
pub const ENRICHED_ALERTS_TOPIC: &str = "anomaly.alerts.enriched";

/// Resolved output topic names
#[derive(Debug, Clone)]
pub struct OutputTopics {
    pub decisions: String,
    pub states: String,
    pub alerts: String,
    pub enriched_alerts: String,
}

impl OutputTopics {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            decisions: config.topic(DECISIONS_TOPIC),
            states: config.topic(STATE_TOPIC),
            alerts: config.topic(ALERTS_TOPIC),
            enriched_alerts: config.topic(ENRICHED_ALERTS_TOPIC),
        }
    }
}

/// Anything written to the output stream
#[derive(Debug, Clone)]
pub enum OutputRecord {
    Decision(Decision),
    Alert(AnomalyAlert),
    State(CoordinationState),
}

/// Writes one envelope per line and flushes after each
pub struct JsonLinesSink<W> {
    writer: W,
    topics: OutputTopics,
}

impl<W: AsyncWrite + Unpin> JsonLinesSink<W> {
    pub fn new(writer: W, topics: OutputTopics) -> Self {
        Self { writer, topics }
    }

    pub async fn write_record(&mut self, record: &OutputRecord) -> Result<()> {
        match record {
            OutputRecord::Decision(decision) => self.write_decision(decision).await,
            OutputRecord::Alert(alert) => self.write_alert(alert).await,
            OutputRecord::State(state) => self.write_state(state).await,
        }
    }

    pub async fn write_state(&mut self, state: &CoordinationState) -> Result<()> {
        let topic = self.topics.states.clone();
        self.write(topic, state).await
    }

    pub async fn write_decision(&mut self, decision: &Decision) -> Result<()> {
        let topic = self.topics.decisions.clone();
        self.write(topic, decision).await
    }

    /// Raw alerts and enriched copies go to separate topics
    pub async fn write_alert(&mut self, alert: &AnomalyAlert) -> Result<()> {
        let topic = if alert.is_enriched() {
            self.topics.enriched_alerts.clone()
        } else {
            self.topics.alerts.clone()
        };
        self.write(topic, alert).await
    }

    async fn write<T: Serialize>(&mut self, topic: String, value: &T) -> Result<()> {
        let envelope = Envelope {
            topic,
            value: serde_json::to_value(value)?,
        };
        let mut line = serde_json::to_vec(&envelope)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
