use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::info;

macro_rules! counters {
    ($($name:ident => $help:literal),* $(,)?) => {
        /// Metrics collector for observability
        pub struct Metrics {
            $(
                #[doc = $help]
                pub $name: AtomicU64,
            )*
            /// Unix seconds of the last processed record
            last_activity: AtomicI64,
        }

        impl Metrics {
            /// Create a new metrics instance
            pub fn new() -> Self {
                Self {
                    $($name: AtomicU64::new(0),)*
                    last_activity: AtomicI64::new(Utc::now().timestamp()),
                }
            }

            /// (name, help, value) for every counter
            fn counters(&self) -> Vec<(&'static str, &'static str, u64)> {
                vec![$((stringify!($name), $help, self.$name.load(Ordering::Relaxed)),)*]
            }
        }
    };
}

counters! {
    records_ingested => "Input records accepted",
    records_malformed => "Input records dropped at the boundary",
    records_late => "Robot telemetry dropped after its window closed",
    windows_fused => "Fused windows scored",
    windows_context_incomplete => "Fused windows scored with default zone context",
    decisions_emitted => "Decisions published",
    stop_heartbeats => "Sustained STOP decisions re-emitted",
    actuation_failures => "Actuation commands that exhausted their retries",
    aggregates_closed => "Window aggregates closed",
    alerts_emitted => "Raw anomaly alerts published",
    enrichments_succeeded => "Alerts enriched with an explanation",
    enrichments_failed => "Explanation calls that failed or timed out",
    enrichments_discarded => "Explanations dropped because the alert was no longer held",
    worker_restarts => "Partition workers restarted after a panic",
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Mark that the pipeline just processed something
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// One-line status summary
    pub fn summary(&self) -> String {
        format!(
            "records={} malformed={} late={} windows={} decisions={} alerts={} actuation_failures={} restarts={}",
            Self::get(&self.records_ingested),
            Self::get(&self.records_malformed),
            Self::get(&self.records_late),
            Self::get(&self.windows_fused),
            Self::get(&self.decisions_emitted),
            Self::get(&self.alerts_emitted),
            Self::get(&self.actuation_failures),
            Self::get(&self.worker_restarts),
        )
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self) -> String {
        let mut out = String::new();
        for (name, help, value) in self.counters() {
            out.push_str(&format!(
                "# HELP cosense_{name}_total {help}\n# TYPE cosense_{name}_total counter\ncosense_{name}_total {value}\n\n"
            ));
        }
        out.push_str(&format!(
            "# HELP cosense_last_activity_seconds Unix time of the last processed record\n\
             # TYPE cosense_last_activity_seconds gauge\n\
             cosense_last_activity_seconds {}\n",
            self.last_activity()
        ));
        out
    }

    /// Log periodic status
    pub fn log_status(&self) {
        info!("{}", self.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        Metrics::inc(&metrics.decisions_emitted);
        Metrics::add(&metrics.records_ingested, 5);

        let text = metrics.prometheus();
        assert!(text.contains("cosense_decisions_emitted_total 1\n"));
        assert!(text.contains("cosense_records_ingested_total 5\n"));
        assert!(text.contains("# TYPE cosense_worker_restarts_total counter"));
        assert!(metrics.summary().contains("decisions=1"));
    }
}
