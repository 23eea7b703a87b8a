//! Single-threaded composition of the whole engine
//!
//! [`Pipeline`] drives one partition, the aggregator and the detectors in
//! input order. It backs `replay` and the end-to-end tests; the concurrent
//! runtime wires the same pieces across tasks.

use super::aggregator::WindowAggregator;
use super::partition::{PartitionOutput, PartitionProcessor, PartitionStats};
use super::state::{HumanBoard, OverrideRegistry, ZoneBoard};
use crate::config::AppConfig;
use crate::detectors::AnomalyDetector;
use crate::domain::{AnomalyAlert, CoordinationState, Decision, InputRecord, WindowAggregate};

/// Aggregation plus anomaly detection over the decision stream
pub struct Analytics {
    aggregator: WindowAggregator,
    detector: AnomalyDetector,
}

#[derive(Debug, Default)]
pub struct AnalyticsOutput {
    pub aggregates: Vec<WindowAggregate>,
    pub alerts: Vec<AnomalyAlert>,
}

impl Analytics {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            aggregator: WindowAggregator::new(
                config.aggregation.clone(),
                config.anomaly.history_capacity,
            ),
            detector: AnomalyDetector::new(config.anomaly.clone()),
        }
    }

    pub fn with_detector(config: &AppConfig, detector: AnomalyDetector) -> Self {
        Self {
            aggregator: WindowAggregator::new(
                config.aggregation.clone(),
                config.anomaly.history_capacity,
            ),
            detector,
        }
    }

    pub fn record(&mut self, decision: &Decision) -> AnalyticsOutput {
        let closed = self.aggregator.record(decision);
        self.detect(closed)
    }

    pub fn advance(&mut self, now_ms: i64) -> AnalyticsOutput {
        let closed = self.aggregator.advance(now_ms);
        self.detect(closed)
    }

    pub fn flush(&mut self) -> AnalyticsOutput {
        let closed = self.aggregator.flush();
        self.detect(closed)
    }

    fn detect(&mut self, aggregates: Vec<WindowAggregate>) -> AnalyticsOutput {
        let alerts = aggregates
            .iter()
            .flat_map(|aggregate| self.detector.observe(aggregate))
            .collect();
        AnalyticsOutput { aggregates, alerts }
    }
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub decisions: Vec<Decision>,
    pub states: Vec<CoordinationState>,
    pub aggregates: Vec<WindowAggregate>,
    pub alerts: Vec<AnomalyAlert>,
}

impl PipelineOutput {
    fn extend(&mut self, other: AnalyticsOutput) {
        self.aggregates.extend(other.aggregates);
        self.alerts.extend(other.alerts);
    }
}

/// Deterministic, in-order engine
pub struct Pipeline {
    humans: HumanBoard,
    zones: ZoneBoard,
    overrides: OverrideRegistry,
    partition: PartitionProcessor,
    analytics: Analytics,
    stats: PartitionStats,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_overrides(config, OverrideRegistry::new())
    }

    pub fn with_overrides(config: &AppConfig, overrides: OverrideRegistry) -> Self {
        let humans = HumanBoard::new();
        let zones = ZoneBoard::new();
        let partition = PartitionProcessor::new(
            0,
            config,
            humans.clone(),
            zones.clone(),
            overrides.clone(),
        );
        Self {
            humans,
            zones,
            overrides,
            partition,
            analytics: Analytics::new(config),
            stats: PartitionStats::default(),
        }
    }

    pub fn overrides(&self) -> &OverrideRegistry {
        &self.overrides
    }

    /// Cumulative partition counters
    pub fn stats(&self) -> PartitionStats {
        self.stats
    }

    pub fn process(&mut self, record: InputRecord) -> PipelineOutput {
        match record {
            InputRecord::Robot(snapshot) => {
                let output = self.partition.on_robot(snapshot);
                self.collect(output)
            }
            InputRecord::Human(snapshot) => {
                let id = snapshot.id.clone();
                self.humans.publish(&id, snapshot);
                PipelineOutput::default()
            }
            InputRecord::Zone(zone) => {
                let id = zone.zone_id.clone();
                self.zones.publish(&id, zone);
                PipelineOutput::default()
            }
        }
    }

    /// Flush open fusion and aggregation windows
    pub fn finish(&mut self) -> PipelineOutput {
        let output = self.partition.flush();
        let mut result = self.collect(output);
        result.extend(self.analytics.flush());
        result
    }

    fn collect(&mut self, output: PartitionOutput) -> PipelineOutput {
        self.stats.merge(output.stats);
        let mut result = PipelineOutput {
            states: output.states,
            ..PipelineOutput::default()
        };
        for decision in output.decisions {
            result.extend(self.analytics.record(&decision));
            result.decisions.push(decision);
        }
        result
    }
}
