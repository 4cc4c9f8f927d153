use prometheus::{
    Encoder, GaugeVec, CounterVec, Opts, Registry, TextEncoder,
    register_gauge_vec_with_registry, register_counter_vec_with_registry,
};
use lazy_static::lazy_static;
use std::sync::Arc;
use sysinfo::System;

use crate::services::recorder::EventOutcome;
use crate::state::RegistrySnapshot;

pub struct MetricsRegistry {
    registry: Registry,
    hostname: String,

    // Gauge metrics
    pub program_running: GaugeVec,
    pub program_total_runtime: GaugeVec,
    pub program_sessions: GaugeVec,
    pub tracked_programs: GaugeVec,

    // Counter metrics
    pub events_total: CounterVec,
    pub anomalies_total: CounterVec,
    pub stray_sessions_total: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();
        let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());

        let program_labels = &["name", "hostname"];

        // Gauge metrics
        let program_running = register_gauge_vec_with_registry!(
            Opts::new("activity_program_running", "Program has an open usage session (1) or not (0)"),
            program_labels,
            registry
        ).unwrap();

        let program_total_runtime = register_gauge_vec_with_registry!(
            Opts::new("activity_program_total_runtime_seconds", "Summed duration of closed usage sessions"),
            program_labels,
            registry
        ).unwrap();

        let program_sessions = register_gauge_vec_with_registry!(
            Opts::new("activity_program_sessions", "Number of usage sessions recorded for the program"),
            program_labels,
            registry
        ).unwrap();

        let tracked_programs = register_gauge_vec_with_registry!(
            Opts::new("activity_tracked_programs", "Number of tracked executables"),
            &["hostname"],
            registry
        ).unwrap();

        // Counter metrics
        let events_total = register_counter_vec_with_registry!(
            Opts::new("activity_events_total", "Snapshot entries and process events by outcome"),
            &["kind", "outcome", "hostname"],
            registry
        ).unwrap();

        let anomalies_total = register_counter_vec_with_registry!(
            Opts::new("activity_anomalies_total", "Events that could not be reconciled with the history"),
            &["kind", "hostname"],
            registry
        ).unwrap();

        let stray_sessions_total = register_counter_vec_with_registry!(
            Opts::new("activity_stray_sessions_total", "Sessions left open by an unclean shutdown"),
            &["hostname"],
            registry
        ).unwrap();

        Self {
            registry,
            hostname,
            program_running,
            program_total_runtime,
            program_sessions,
            tracked_programs,
            events_total,
            anomalies_total,
            stray_sessions_total,
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// `kind` 取值为 "snapshot"、"start" 或 "stop"
    pub fn record_outcome(&self, kind: &str, outcome: &EventOutcome) {
        self.events_total
            .with_label_values(&[kind, outcome.as_str(), &self.hostname])
            .inc();

        if let EventOutcome::Anomaly(anomaly) = outcome {
            self.anomalies_total
                .with_label_values(&[anomaly.as_str(), &self.hostname])
                .inc();
        }
    }

    pub fn record_stray_sessions(&self, count: usize) {
        self.stray_sessions_total
            .with_label_values(&[&self.hostname])
            .inc_by(count as f64);
    }

    /// 根据注册表快照更新每个程序的 gauge
    pub fn update_programs(&self, snapshot: &RegistrySnapshot) {
        self.tracked_programs
            .with_label_values(&[&self.hostname])
            .set(snapshot.len() as f64);

        for program in snapshot.iter() {
            let labels = &[program.exe_name.as_str(), self.hostname.as_str()];

            self.program_running
                .with_label_values(labels)
                .set(if program.is_running() { 1.0 } else { 0.0 });

            self.program_total_runtime
                .with_label_values(labels)
                .set(program.total_run_time().num_milliseconds() as f64 / 1000.0);

            self.program_sessions
                .with_label_values(labels)
                .set(program.total_sessions() as f64);
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Program;
    use crate::services::recorder::Anomaly;
    use crate::state::TrackedPrograms;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_program_gauges() {
        let metrics = MetricsRegistry::new();
        let mut programs = TrackedPrograms::default();
        let mut program = Program::new("vim", "vim", "/usr/bin/vim", 1, Utc.timestamp_opt(0, 0).unwrap());
        program.end_instance(1, Utc.timestamp_opt(90, 0).unwrap());
        programs.try_insert(program);

        metrics.update_programs(&programs.all_records());
        let text = metrics.render().unwrap();

        assert!(text.contains("activity_tracked_programs"));
        assert!(text.contains("activity_program_total_runtime_seconds{hostname="));
        assert!(text.contains("name=\"vim\"} 90"));
    }

    #[test]
    fn test_anomalies_are_counted_by_kind() {
        let metrics = MetricsRegistry::new();
        metrics.record_outcome("stop", &EventOutcome::Anomaly(Anomaly::UnknownProgramStop));
        metrics.record_outcome("stop", &EventOutcome::Anomaly(Anomaly::UnknownProgramStop));
        metrics.record_outcome("start", &EventOutcome::ProgramAdded);

        let hostname = metrics.hostname.clone();
        let count = metrics
            .anomalies_total
            .with_label_values(&["unknown_program_stop", &hostname])
            .get();
        assert_eq!(count, 2.0);
        let added = metrics
            .events_total
            .with_label_values(&["start", "program_added", &hostname])
            .get();
        assert_eq!(added, 1.0);
    }
}
