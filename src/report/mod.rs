//! Per-run instrumentation: an append-only event log, named timer
//! checkpoints and the findings a probe leaves behind.

pub mod error;

pub use error::{ErrorKind, ErrorRecord};

use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::model::AgentConfig;

/// A timestamped log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub time: f64,
    pub message: String,
}

/// Metadata of the peer certificate and negotiated TLS parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CertInfo {
    pub protocol: Option<String>,
    pub cipher: Option<String>,
    /// Unix seconds.
    pub not_before: Option<i64>,
    /// Unix seconds.
    pub not_after: Option<i64>,
    pub subject: Option<String>,
    pub issuer: Option<String>,
}

/// One step of a reconstructed timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub tag: String,
    /// Milliseconds since the previous checkpoint.
    pub delta_ms: f64,
    /// Milliseconds since the first checkpoint.
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: Uuid,
    debug: Vec<LogEntry>,
    warnings: Vec<LogEntry>,
    alerts: Vec<LogEntry>,
    error: Option<ErrorRecord>,
    timers: HashMap<String, f64>,
    offset: f64,
    #[serde(skip)]
    verbose: bool,

    pub status_code: Option<String>,
    pub server: Option<String>,
    pub location: Option<String>,
    pub cert: Option<CertInfo>,
    /// Cumulative bytes received by the transport.
    pub bytes: u64,
    /// Response body bytes collected by the HTTP probe.
    pub body_bytes: Option<u64>,
}

impl Report {
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_offset(config.misc.offset, config.debug)
    }

    pub fn with_offset(offset: f64, verbose: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            debug: Vec::new(),
            warnings: Vec::new(),
            alerts: Vec::new(),
            error: None,
            timers: HashMap::new(),
            offset,
            verbose,
            status_code: None,
            server: None,
            location: None,
            cert: None,
            bytes: 0,
            body_bytes: None,
        }
    }

    /// Wall-clock seconds corrected by the configured clock offset.
    pub fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0 - self.offset
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.verbose {
            log::info!("[{}] {}", self.id, message);
        } else {
            log::trace!("[{}] {}", self.id, message);
        }
        let time = self.now();
        self.debug.push(LogEntry { time, message });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let time = self.now();
        self.warnings.push(LogEntry {
            time,
            message: message.into(),
        });
    }

    pub fn alert(&mut self, message: impl Into<String>) {
        let time = self.now();
        self.alerts.push(LogEntry {
            time,
            message: message.into(),
        });
    }

    /// Records the run's error. Only the first call has an effect; later
    /// errors are kept in the debug log.
    pub fn error(&mut self, component: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        if self.error.is_some() {
            log::debug!("[{}] suppressed {} error: {}", self.id, component, message);
            self.debug(format!("Suppressed {component} error: {message}"));
            return;
        }
        self.error = Some(ErrorRecord {
            time: self.now(),
            component,
            message,
        });
    }

    pub fn timer(&mut self, tag: &str) {
        let now = self.now();
        self.timers.insert(tag.to_string(), now);
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    pub fn debug_log(&self) -> &[LogEntry] {
        &self.debug
    }

    pub fn warnings(&self) -> &[LogEntry] {
        &self.warnings
    }

    pub fn alerts(&self) -> &[LogEntry] {
        &self.alerts
    }

    pub fn timers(&self) -> &HashMap<String, f64> {
        &self.timers
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Timers ordered by recorded value, with per-step and cumulative
    /// durations in milliseconds.
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        let mut sorted: Vec<(&String, f64)> = self.timers.iter().map(|(k, v)| (k, *v)).collect();
        sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

        let Some(&(_, first)) = sorted.first() else {
            return Vec::new();
        };
        let mut previous = first;
        sorted
            .into_iter()
            .map(|(tag, value)| {
                let entry = TimelineEntry {
                    tag: tag.clone(),
                    delta_ms: (value - previous) * 1000.0,
                    elapsed_ms: (value - first) * 1000.0,
                };
                previous = value;
                entry
            })
            .collect()
    }

    /// Human readable dump of the debug log and timeline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "-".repeat(80);
        let _ = writeln!(out, "REPORT {}", self.id);
        let _ = writeln!(out, "DEBUG:\n{rule}");
        for entry in &self.debug {
            let _ = writeln!(out, "{} {}", format_timestamp(entry.time), entry.message);
        }
        let _ = writeln!(out, "{rule}\nTIMESTAMPS:\n{rule}");
        for step in self.timeline() {
            let _ = writeln!(
                out,
                "{}: +{:>3.0}ms ({:>3.0}ms)",
                to_fixed_width(&step.tag, 10),
                step.delta_ms,
                step.elapsed_ms
            );
        }
        let _ = writeln!(out, "{rule}");
        if let Some(error) = &self.error {
            let _ = writeln!(out, "ERROR [{}]: {}", error.component, error.message);
        }
        out
    }
}

fn to_fixed_width(input: &str, width: usize) -> String {
    use unicode_truncate::UnicodeTruncateStr;

    let (truncated, _) = input.unicode_truncate(width);
    format!("{:<width$}", truncated, width = width)
}

fn format_timestamp(seconds: f64) -> String {
    DateTime::<Utc>::from_timestamp_micros((seconds * 1_000_000.0) as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        .unwrap_or_else(|| format!("{seconds:.6}"))
}
