//! Decision rate spike detection per zone

use super::forecast::{Forecaster, StandardScoreForecaster, TrailingHistory};
use crate::config::AnomalyConfig;
use crate::domain::{AggregateScope, AlertType, AnomalyAlert, Severity, WindowAggregate};
use std::collections::HashMap;
use tracing::debug;

pub struct RateSpikeDetector {
    config: AnomalyConfig,
    forecaster: Box<dyn Forecaster>,
    histories: HashMap<String, TrailingHistory>,
}

impl RateSpikeDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        let forecaster = StandardScoreForecaster::new(config.z, config.min_std_dev);
        Self::with_forecaster(config, Box::new(forecaster))
    }

    /// Swap in another forecasting model behind the same contract
    pub fn with_forecaster(config: AnomalyConfig, forecaster: Box<dyn Forecaster>) -> Self {
        Self {
            config,
            forecaster,
            histories: HashMap::new(),
        }
    }

    /// Windows observed so far for a zone
    pub fn observed(&self, zone_id: &str) -> usize {
        self.histories.get(zone_id).map_or(0, TrailingHistory::len)
    }

    pub fn observe(&mut self, aggregate: &WindowAggregate) -> Option<AnomalyAlert> {
        let AggregateScope::Zone(zone_id) = &aggregate.scope else {
            return None;
        };

        let capacity = self.config.history_capacity;
        let history = self
            .histories
            .entry(zone_id.clone())
            .or_insert_with(|| TrailingHistory::new(capacity));

        let actual = aggregate.decision_count as f64;
        let alert = if history.len() < self.config.min_training_size {
            debug!(
                zone_id = %zone_id,
                observed = history.len(),
                "rate detector still training"
            );
            None
        } else {
            self.forecaster
                .forecast(history.as_slice())
                .filter(|forecast| actual > forecast.upper)
                .map(|forecast| {
                    let severity = if actual > self.config.high_multiplier * forecast.upper {
                        Severity::High
                    } else {
                        Severity::Medium
                    };
                    let window_secs = (aggregate.window_end - aggregate.window_start) / 1_000;
                    AnomalyAlert {
                        alert_id: AnomalyAlert::make_id(
                            AlertType::DecisionRateSpike,
                            zone_id,
                            aggregate.window_end,
                        ),
                        alert_type: AlertType::DecisionRateSpike,
                        detected_at: aggregate.window_end,
                        zone_id: Some(zone_id.clone()),
                        robot_id: None,
                        metric_name: AlertType::DecisionRateSpike.metric_name().to_string(),
                        actual_value: actual,
                        forecast_value: Some(forecast.value),
                        lower_bound: Some(forecast.lower),
                        upper_bound: Some(forecast.upper),
                        severity,
                        context: format!(
                            "{} decisions in {}s window in {}, expected {:.1} (upper bound {:.1})",
                            aggregate.decision_count,
                            window_secs,
                            zone_id,
                            forecast.value,
                            forecast.upper
                        ),
                        ai_explanation: None,
                    }
                })
        };

        history.push(actual);
        alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone_window(index: i64, count: u32) -> WindowAggregate {
        let mut window = WindowAggregate::empty(
            AggregateScope::Zone("zone-a".to_string()),
            index * 10_000,
            (index + 1) * 10_000,
        );
        window.decision_count = count;
        window
    }

    #[test]
    fn test_abstains_until_trained() {
        let mut detector = RateSpikeDetector::new(AnomalyConfig::default());
        for i in 0..6 {
            assert!(detector.observe(&zone_window(i, 1_000)).is_none());
        }
        assert_eq!(detector.observed("zone-a"), 6);
    }

    #[test]
    fn test_flags_spike() {
        let mut detector = RateSpikeDetector::new(AnomalyConfig::default());
        let counts = [5, 5, 6, 5, 6, 5, 5, 6, 5, 5];
        for (i, c) in counts.iter().enumerate() {
            assert!(detector.observe(&zone_window(i as i64, *c)).is_none());
        }

        let alert = detector.observe(&zone_window(10, 40)).unwrap();
        assert_eq!(alert.alert_type, AlertType::DecisionRateSpike);
        assert_eq!(alert.actual_value, 40.0);
        assert!((alert.forecast_value.unwrap() - 5.3).abs() < 1e-9);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.detected_at, 110_000);
        assert_eq!(alert.zone_id.as_deref(), Some("zone-a"));
    }

    #[test]
    fn test_moderate_excess_is_medium() {
        let mut detector = RateSpikeDetector::new(AnomalyConfig::default());
        for i in 0..6 {
            detector.observe(&zone_window(i, 4));
        }
        // upper = 4 + 2 * 0.5 = 5
        let alert = detector.observe(&zone_window(6, 6)).unwrap();
        assert_eq!(alert.severity, Severity::Medium);
    }

    #[test]
    fn test_ignores_robot_scope() {
        let mut detector = RateSpikeDetector::new(AnomalyConfig::default());
        let window = WindowAggregate::empty(AggregateScope::Robot("robot-1".to_string()), 0, 30_000);
        assert!(detector.observe(&window).is_none());
    }
}
