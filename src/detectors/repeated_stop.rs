use crate::config::AnomalyConfig;
use crate::domain::{AggregateScope, AlertType, AnomalyAlert, Severity, WindowAggregate};
use std::collections::HashMap;

/// An alert already raised for a robot's current run of stops
#[derive(Debug, Clone, Copy)]
struct Burst {
    /// First onset of the burst; keys the alert id
    started_at: i64,
    severity: Severity,
}

/// Flags robots stopped repeatedly within the sliding stop window.
///
/// One alert per burst: raised when the count reaches the threshold and
/// re-published under the same id if it escalates to HIGH. A burst ends once
/// an onset finds fewer stops than the threshold in its window.
#[derive(Debug, Clone)]
pub struct RepeatedStopDetector {
    threshold: u32,
    high: u32,
    bursts: HashMap<String, Burst>,
}

impl RepeatedStopDetector {
    pub fn new(config: &AnomalyConfig) -> Self {
        Self {
            threshold: config.repeated_stop_threshold,
            high: config.repeated_stop_high,
            bursts: HashMap::new(),
        }
    }

    pub fn observe(&mut self, aggregate: &WindowAggregate) -> Option<AnomalyAlert> {
        let AggregateScope::Robot(robot_id) = &aggregate.scope else {
            return None;
        };
        if aggregate.stop_count < self.threshold {
            self.bursts.remove(robot_id);
            return None;
        }

        let severity = if aggregate.stop_count >= self.high {
            Severity::High
        } else {
            Severity::Medium
        };
        let burst = match self.bursts.get_mut(robot_id) {
            Some(burst) if burst.severity >= severity => return None,
            Some(burst) => {
                burst.severity = severity;
                *burst
            }
            None => {
                let burst = Burst {
                    started_at: aggregate.window_start,
                    severity,
                };
                self.bursts.insert(robot_id.clone(), burst);
                burst
            }
        };

        let span_secs = aggregate.window_end.saturating_sub(aggregate.window_start) as f64 / 1_000.0;
        Some(AnomalyAlert {
            alert_id: AnomalyAlert::make_id(AlertType::RepeatedRobotStop, robot_id, burst.started_at),
            alert_type: AlertType::RepeatedRobotStop,
            detected_at: aggregate.window_end,
            zone_id: None,
            robot_id: Some(robot_id.clone()),
            metric_name: AlertType::RepeatedRobotStop.metric_name().to_string(),
            actual_value: aggregate.stop_count as f64,
            forecast_value: None,
            lower_bound: None,
            upper_bound: Some(self.threshold as f64),
            severity,
            context: format!(
                "{} stopped {} times within {:.0}s",
                robot_id, aggregate.stop_count, span_secs
            ),
            ai_explanation: None,
        })
    }
}
