use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// JSONL input path ("-" for stdin); empty disables the line reader
    #[serde(default)]
    pub input: String,
    /// Topic namespace prefix (e.g. "prod" -> "prod.robot.telemetry")
    #[serde(default)]
    pub topic_prefix: String,
    /// Number of robot partitions (one worker each)
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    /// Bounded capacity of each partition queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Zone assumed for robots whose telemetry carries no zone id
    #[serde(default = "default_zone")]
    pub default_zone: String,
    /// Also close windows on the wall clock; disable for recorded streams
    #[serde(default = "default_wall_clock")]
    pub wall_clock: bool,
}

fn default_wall_clock() -> bool {
    true
}

fn default_partitions() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_zone() -> String {
    "zone-c".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            topic_prefix: String::new(),
            partitions: default_partitions(),
            channel_capacity: default_channel_capacity(),
            default_zone: default_zone(),
            wall_clock: default_wall_clock(),
        }
    }
}

impl IngestConfig {
    /// Get prefixed topic name
    pub fn topic(&self, name: &str) -> String {
        if self.topic_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.topic_prefix, name)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Tumbling window size in milliseconds
    pub window_ms: i64,
    /// How long a window stays open after its end for late telemetry
    pub grace_ms: i64,
    /// Humans not heard from for this long are ignored
    pub human_ttl_ms: i64,
    /// Maximum ultrasonic vs beacon distance gap before sensors disagree
    pub sensor_disagreement_tolerance_m: f64,
    /// Beacon RSSI measured at one meter (dBm)
    pub beacon_reference_rssi: f64,
    /// Log-distance path loss exponent
    pub beacon_path_loss_exponent: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            window_ms: 200,
            grace_ms: 100,
            human_ttl_ms: 2_000,
            sensor_disagreement_tolerance_m: 2.0,
            beacon_reference_rssi: -40.0,
            beacon_path_loss_exponent: 2.0,
        }
    }
}

/// Risk factor weights; must sum to one
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskWeights {
    pub proximity: f64,
    pub relative_speed: f64,
    pub visibility: f64,
    pub beacon: f64,
    pub congestion: f64,
    pub sensor_disagreement: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            proximity: 0.35,
            relative_speed: 0.25,
            visibility: 0.15,
            beacon: 0.10,
            congestion: 0.10,
            sensor_disagreement: 0.05,
        }
    }
}

impl RiskWeights {
    pub fn sum(&self) -> f64 {
        self.proximity
            + self.relative_speed
            + self.visibility
            + self.beacon
            + self.congestion
            + self.sensor_disagreement
    }

    fn all(&self) -> [f64; 6] {
        [
            self.proximity,
            self.relative_speed,
            self.visibility,
            self.beacon,
            self.congestion,
            self.sensor_disagreement,
        ]
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskConfig {
    #[serde(default)]
    pub weights: RiskWeights,
    /// Distance at or below which proximity risk saturates
    pub proximity_critical_m: f64,
    /// Distance below which CLOSE_PROXIMITY / BLE_PROXIMITY_DETECTED are asserted
    pub proximity_warning_m: f64,
    /// Distance at which proximity risk falls to zero
    pub proximity_range_m: f64,
    /// Closing speed above which HIGH_RELATIVE_SPEED is asserted (m/s)
    pub speed_warning_ms: f64,
    /// Closing speed mapped to full relative-speed risk (m/s)
    pub max_closing_speed_ms: f64,
    /// Congestion at or above which HIGH_CONGESTION is asserted
    pub congestion_warning: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            proximity_critical_m: 1.5,
            proximity_warning_m: 3.0,
            proximity_range_m: 6.0,
            speed_warning_ms: 1.5,
            max_closing_speed_ms: 3.0,
            congestion_warning: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub stop_threshold: f64,
    pub slow_threshold: f64,
    pub reroute_threshold: f64,
    pub stop_distance_m: f64,
    pub slow_distance_m: f64,
    /// Risk must fall this far below stop_threshold to leave STOP
    pub stop_release_margin: f64,
    /// Risk must fall this far below slow_threshold to leave SLOW
    pub slow_release_margin: f64,
    /// Distance must clear the distance rule by this much to release
    pub distance_release_margin_m: f64,
    /// Re-emission interval for a sustained STOP
    pub stop_heartbeat_ms: i64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            stop_threshold: 0.8,
            slow_threshold: 0.5,
            reroute_threshold: 0.6,
            stop_distance_m: 1.5,
            slow_distance_m: 3.0,
            stop_release_margin: 0.15,
            slow_release_margin: 0.15,
            distance_release_margin_m: 0.25,
            stop_heartbeat_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Forward decisions to the telemetry source
    pub enabled: bool,
    /// Base URL of the actuator; commands go to {url}/decision
    pub url: String,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://simulator:8000".to_string(),
            timeout_ms: 2_000,
            max_attempts: 2,
            backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Zone-scope window used for rate and sensor disagreement detection
    pub rate_window_ms: i64,
    /// Robot-scope window used for repeated stop detection
    pub stop_window_ms: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            rate_window_ms: 10_000,
            stop_window_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Trailing windows retained for forecasting
    pub history_capacity: usize,
    /// Windows observed before the rate detector may fire
    pub min_training_size: usize,
    /// Width of the forecast bound in standard deviations
    pub z: f64,
    /// Floor applied to the trailing standard deviation
    pub min_std_dev: f64,
    /// Actual above upper_bound * this is HIGH severity
    pub high_multiplier: f64,
    pub repeated_stop_threshold: u32,
    pub repeated_stop_high: u32,
    pub sensor_disagreement_threshold: u32,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            history_capacity: 60,
            min_training_size: 6,
            z: 2.0,
            min_std_dev: 0.5,
            high_multiplier: 1.5,
            repeated_stop_threshold: 2,
            repeated_stop_high: 3,
            sensor_disagreement_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    /// Explanation endpoint; receives {"prompt": ...}, returns {"explanation": ...}
    pub url: String,
    pub timeout_ms: u64,
    /// Concurrent explanation calls; alerts beyond this stay raw
    pub max_in_flight: usize,
    /// Recent alerts kept referencable for late enrichment results
    pub recent_alerts: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://explainer:8080/explain".to_string(),
            timeout_ms: 5_000,
            max_in_flight: 4,
            recent_alerts: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerConfig {
    /// Health/API server port; disabled when unset
    #[serde(default)]
    pub port: Option<u16>,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("COSENSE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (COSENSE_RISK__STOP_THRESHOLD, etc.)
            .add_source(
                Environment::with_prefix("COSENSE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Risk model
        let weights = &self.risk.weights;
        if weights.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            errors.push("risk weights must be non-negative".to_string());
        }
        if (weights.sum() - 1.0).abs() > 1e-6 {
            errors.push(format!("risk weights must sum to 1, got {:.4}", weights.sum()));
        }
        if self.risk.proximity_critical_m >= self.risk.proximity_range_m {
            errors.push("proximity_critical_m must be less than proximity_range_m".to_string());
        }
        if self.risk.max_closing_speed_ms <= 0.0 {
            errors.push("max_closing_speed_ms must be positive".to_string());
        }

        // Decision thresholds
        let d = &self.decision;
        for (name, value) in [
            ("stop_threshold", d.stop_threshold),
            ("slow_threshold", d.slow_threshold),
            ("reroute_threshold", d.reroute_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{name} must be within [0, 1]"));
            }
        }
        if d.slow_threshold >= d.stop_threshold {
            errors.push("slow_threshold must be less than stop_threshold".to_string());
        }
        if d.stop_distance_m >= d.slow_distance_m {
            errors.push("stop_distance_m must be less than slow_distance_m".to_string());
        }
        if d.stop_release_margin < 0.0 || d.slow_release_margin < 0.0 {
            errors.push("release margins must be non-negative".to_string());
        }

        // Windows
        if self.fusion.window_ms <= 0 || self.fusion.grace_ms < 0 {
            errors.push("fusion window_ms must be positive and grace_ms non-negative".to_string());
        }
        if self.aggregation.rate_window_ms <= 0 || self.aggregation.stop_window_ms <= 0 {
            errors.push("aggregation windows must be positive".to_string());
        }

        // Anomaly detection
        if self.anomaly.history_capacity == 0 {
            errors.push("history_capacity must be positive".to_string());
        }
        if self.anomaly.min_training_size > self.anomaly.history_capacity {
            errors.push("min_training_size must not exceed history_capacity".to_string());
        }
        if self.anomaly.repeated_stop_high < self.anomaly.repeated_stop_threshold {
            errors.push("repeated_stop_high must be >= repeated_stop_threshold".to_string());
        }

        if self.ingest.partitions == 0 || self.ingest.channel_capacity == 0 {
            errors.push("ingest partitions and channel_capacity must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.risk.weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_collects_every_violation() {
        let mut config = AppConfig::default();
        config.risk.weights.proximity = 0.9;
        config.decision.slow_threshold = 0.9;
        config.anomaly.min_training_size = 100;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("sum to 1"));
    }

    #[test]
    fn test_topic_prefix() {
        let mut ingest = IngestConfig::default();
        assert_eq!(ingest.topic("robot.telemetry"), "robot.telemetry");
        ingest.topic_prefix = "prod".to_string();
        assert_eq!(ingest.topic("robot.telemetry"), "prod.robot.telemetry");
    }
}
