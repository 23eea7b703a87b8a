use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of anomaly detected in the decision stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Unusual increase in safety decisions
    DecisionRateSpike,
    /// Same robot stopped multiple times in a short window
    RepeatedRobotStop,
    /// Ultrasonic and beacon sensors conflicting
    SensorDisagreementSpike,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::DecisionRateSpike => "DECISION_RATE_SPIKE",
            AlertType::RepeatedRobotStop => "REPEATED_ROBOT_STOP",
            AlertType::SensorDisagreementSpike => "SENSOR_DISAGREEMENT_SPIKE",
        }
    }

    pub fn metric_name(&self) -> &'static str {
        match self {
            AlertType::DecisionRateSpike => "decision_count",
            AlertType::RepeatedRobotStop => "stop_count",
            AlertType::SensorDisagreementSpike => "sensor_disagreement_count",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

/// Anomaly alert (`anomaly.alerts`, and `anomaly.alerts.enriched` once explained)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub alert_id: String,
    pub alert_type: AlertType,
    /// Event time of the window that triggered the alert (unix ms)
    pub detected_at: i64,
    pub zone_id: Option<String>,
    pub robot_id: Option<String>,
    pub metric_name: String,
    pub actual_value: f64,
    pub forecast_value: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub severity: Severity,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_explanation: Option<String>,
}

impl AnomalyAlert {
    /// Stable id: one alert per detector, scope and window
    pub fn make_id(alert_type: AlertType, scope_id: &str, window_end: i64) -> String {
        format!(
            "alert-{}-{}-{}",
            alert_type.as_str().to_ascii_lowercase(),
            scope_id,
            window_end
        )
    }

    pub fn is_enriched(&self) -> bool {
        self.ai_explanation.is_some()
    }

    /// Structured prompt handed to the explanation capability
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "Explain this warehouse safety anomaly for an operator in 2-3 sentences.\n\
             Alert type: {}\n\
             Severity: {}\n\
             Metric: {} = {}\n",
            self.alert_type, self.severity, self.metric_name, self.actual_value
        );
        if let (Some(forecast), Some(upper)) = (self.forecast_value, self.upper_bound) {
            prompt.push_str(&format!(
                "Expected: {:.2} (upper bound {:.2})\n",
                forecast, upper
            ));
        }
        if let Some(zone_id) = &self.zone_id {
            prompt.push_str(&format!("Zone: {}\n", zone_id));
        }
        if let Some(robot_id) = &self.robot_id {
            prompt.push_str(&format!("Robot: {}\n", robot_id));
        }
        prompt.push_str(&format!("Context: {}", self.context));
        prompt
    }
}
