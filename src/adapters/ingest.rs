//! JSON-lines ingest boundary
//!
//! Each line is an envelope `{"topic": "...", "value": {...}}`. Topics may
//! carry the configured namespace prefix. Bad lines are dropped and counted
//! by the caller; they never stop the reader.

use crate::config::IngestConfig;
use crate::domain::InputRecord;
use crate::error::{RecordError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Wire envelope shared by inputs and outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub value: serde_json::Value,
}

/// Decodes envelopes into validated records
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    prefix: String,
    default_zone: String,
}

impl RecordDecoder {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            prefix: config.topic_prefix.clone(),
            default_zone: config.default_zone.clone(),
        }
    }

    /// Strip the namespace prefix, if any
    pub fn base_topic<'a>(&self, topic: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return topic;
        }
        topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(topic)
    }

    pub fn decode(&self, envelope: Envelope) -> std::result::Result<InputRecord, RecordError> {
        let topic = self.base_topic(&envelope.topic);
        InputRecord::decode(topic, envelope.value, &self.default_zone)
    }

    /// Decode a record posted directly to a topic
    pub fn decode_value(
        &self,
        topic: &str,
        value: serde_json::Value,
    ) -> std::result::Result<InputRecord, RecordError> {
        InputRecord::decode(self.base_topic(topic), value, &self.default_zone)
    }

    pub fn parse_line(&self, line: &str) -> std::result::Result<InputRecord, RecordError> {
        let envelope: Envelope =
            serde_json::from_str(line).map_err(|e| RecordError::Malformed(e.to_string()))?;
        self.decode(envelope)
    }
}

/// Outcome of pumping a line source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Read lines until EOF, forwarding valid records.
///
/// `on_reject` sees every dropped line's error. Stops early when the
/// receiver is gone.
pub async fn pump_lines<R, F>(
    reader: R,
    decoder: &RecordDecoder,
    tx: mpsc::Sender<InputRecord>,
    mut on_reject: F,
) -> Result<PumpStats>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&RecordError),
{
    let mut lines = reader.lines();
    let mut stats = PumpStats::default();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decoder.parse_line(line) {
            Ok(record) => {
                if tx.send(record).await.is_err() {
                    info!("record consumer closed, stopping reader");
                    break;
                }
                stats.accepted += 1;
            }
            Err(e) => {
                debug!(error = %e, "dropping malformed record");
                on_reject(&e);
                stats.rejected += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(prefix: &str) -> RecordDecoder {
        RecordDecoder::new(&IngestConfig {
            topic_prefix: prefix.to_string(),
            ..IngestConfig::default()
        })
    }

    #[test]
    fn test_prefixed_topic() {
        let d = decoder("site1");
        assert_eq!(d.base_topic("site1.zone.context"), "zone.context");
        assert_eq!(d.base_topic("zone.context"), "zone.context");
        assert_eq!(decoder("").base_topic("zone.context"), "zone.context");
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        let d = decoder("");
        assert!(matches!(d.parse_line("{not json"), Err(RecordError::Malformed(_))));
        assert!(matches!(
            d.parse_line(r#"{"topic": "robot.commands", "value": {}}"#),
            Err(RecordError::UnknownTopic { .. })
        ));
    }

    #[tokio::test]
    async fn test_pump_counts_and_forwards() {
        let input = concat!(
            r#"{"topic":"human.telemetry","value":{"human_id":"human-1","timestamp":1000,"x":1.0,"y":2.0,"velocity":0.5}}"#,
            "\n",
            "garbage\n",
            "\n",
            r#"{"topic":"zone.context","value":{"zone_id":"zone-a","timestamp":1000,"visibility":"poor","congestion_level":0.4,"connectivity":"normal","robot_count":2,"human_count":1}}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        let mut rejected = Vec::new();
        let stats = pump_lines(input.as_bytes(), &decoder(""), tx, |e| {
            rejected.push(e.clone())
        })
        .await
        .unwrap();

        assert_eq!(stats, PumpStats { accepted: 2, rejected: 1 });
        assert_eq!(rejected.len(), 1);
        assert!(matches!(rx.recv().await, Some(InputRecord::Human(_))));
        assert!(matches!(rx.recv().await, Some(InputRecord::Zone(_))));
    }
}
