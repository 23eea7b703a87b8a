use crate::config::AnomalyConfig;
use crate::domain::{AggregateScope, AlertType, AnomalyAlert, Severity, WindowAggregate};

/// Flags zones where several decisions were driven by conflicting sensors
#[derive(Debug, Clone)]
pub struct SensorDisagreementDetector {
    threshold: u32,
}

impl SensorDisagreementDetector {
    pub fn new(config: &AnomalyConfig) -> Self {
        Self {
            threshold: config.sensor_disagreement_threshold,
        }
    }

    pub fn observe(&self, aggregate: &WindowAggregate) -> Option<AnomalyAlert> {
        let AggregateScope::Zone(zone_id) = &aggregate.scope else {
            return None;
        };
        let count = aggregate.sensor_disagreement_count;
        if count < self.threshold {
            return None;
        }

        Some(AnomalyAlert {
            alert_id: AnomalyAlert::make_id(
                AlertType::SensorDisagreementSpike,
                zone_id,
                aggregate.window_end,
            ),
            alert_type: AlertType::SensorDisagreementSpike,
            detected_at: aggregate.window_end,
            zone_id: Some(zone_id.clone()),
            robot_id: None,
            metric_name: AlertType::SensorDisagreementSpike.metric_name().to_string(),
            actual_value: count as f64,
            forecast_value: None,
            lower_bound: None,
            upper_bound: Some(self.threshold as f64),
            severity: Severity::High,
            context: format!(
                "{} decisions in {} driven by ultrasonic/beacon disagreement",
                count, zone_id
            ),
            ai_explanation: None,
        })
    }
}
