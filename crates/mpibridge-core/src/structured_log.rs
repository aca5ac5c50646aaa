//! Structured JSONL log for lifecycle events.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to a file, stderr, or a shared buffer.
//! - [`validate_log_line`]: checks a single JSONL line against the schema.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::LogTarget;
use crate::error::{BridgeError, ForeignError};
use crate::handle::Endpoint;
use crate::report::{LifecycleReport, Operation, Transition};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Canonical log record.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    /// Step name within a transition (`capture_errhandler`, `free_window_key`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Status code returned by a foreign primitive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    /// Symbol of the foreign primitive that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            operation: None,
            transition: None,
            endpoint: None,
            step: None,
            status: None,
            symbol: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    #[must_use]
    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Record a primitive failure: its status code and symbol.
    #[must_use]
    pub fn with_foreign_error(mut self, err: ForeignError) -> Self {
        self.status = Some(err.code);
        self.symbol = Some(err.primitive.symbol().to_string());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// In-memory sink shared between an emitter and whoever reads it back.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Writes JSONL records with sequential trace ids.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::with_writer(Box::new(std::io::LineWriter::new(file)), run_id))
    }

    #[must_use]
    pub fn to_stderr(run_id: &str) -> Self {
        Self::with_writer(Box::new(std::io::stderr()), run_id)
    }

    /// Emitter over an in-memory buffer (for testing).
    #[must_use]
    pub fn to_buffer(run_id: &str) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Self::with_writer(Box::new(buffer.clone()), run_id), buffer)
    }

    /// Emitter for a configured target; `None` when logging is disabled.
    pub fn from_target(target: &LogTarget, run_id: &str) -> Result<Option<Self>, BridgeError> {
        Ok(match target {
            LogTarget::Disabled => None,
            LogTarget::Stderr => Some(Self::to_stderr(run_id)),
            LogTarget::File(path) => Some(Self::to_file(path, run_id)?),
        })
    }

    fn with_writer(writer: Box<dyn Write + Send>, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:03}", self.run_id, self.seq)
    }

    /// Emit a bare record with an auto-generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> Result<LogEntry, BridgeError> {
        let entry = LogEntry::new(self.next_trace_id(), level, event);
        writeln!(self.writer, "{}", entry.to_jsonl()?)?;
        Ok(entry)
    }

    /// Emit a populated record, filling in the trace id when empty.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> Result<(), BridgeError> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        writeln!(self.writer, "{}", entry.to_jsonl()?)?;
        Ok(())
    }

    /// One record per attempted step, then a summary record.
    pub fn emit_report(&mut self, report: &LifecycleReport) -> Result<(), BridgeError> {
        for record in &report.steps {
            let (level, event) = match record.error {
                None => (LogLevel::Debug, "lifecycle.step"),
                Some(_) => (LogLevel::Warn, "lifecycle.step_failed"),
            };
            let mut entry = LogEntry::new("", level, event)
                .with_operation(report.operation)
                .with_step(record.step.name());
            if let Some(endpoint) = record.step.endpoint() {
                entry = entry.with_endpoint(endpoint);
            }
            if let Some(err) = record.error {
                entry = entry.with_foreign_error(err);
            }
            self.emit_entry(entry)?;
        }

        let failures = report.failures().count();
        let level = if failures == 0 {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        let summary = LogEntry::new("", level, format!("lifecycle.{}", report.operation.as_str()))
            .with_operation(report.operation)
            .with_transition(report.transition)
            .with_details(serde_json::json!({
                "steps": report.steps.len(),
                "failures": failures,
            }));
        self.emit_entry(summary)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("seq", &self.seq)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let err = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Err(vec![err("<json>", format!("invalid JSON: {e}"))]),
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![err("<root>", "expected JSON object".to_string())]);
    };

    let mut errors = Vec::new();
    for field in ["timestamp", "trace_id", "level", "event"] {
        match obj.get(field) {
            None => errors.push(err(field, "required field missing".to_string())),
            Some(v) if !v.is_string() => errors.push(err(field, "expected string".to_string())),
            Some(v) if v.as_str().is_some_and(str::is_empty) => {
                errors.push(err(field, "must not be empty".to_string()));
            }
            Some(_) => {}
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(value).map_err(|e| vec![err("<schema>", e.to_string())])
}

/// Validate every non-empty line of a JSONL document.
pub fn validate_log_text(text: &str) -> Result<Vec<LogEntry>, Vec<LogValidationError>> {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match validate_log_line(line, idx + 1) {
            Ok(entry) => entries.push(entry),
            Err(mut errs) => errors.append(&mut errs),
        }
    }
    if errors.is_empty() {
        Ok(entries)
    } else {
        Err(errors)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    // Civil-from-days over the proleptic Gregorian calendar.
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3_600,
        (rem % 3_600) / 60,
        rem % 60,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Primitive;
    use crate::report::Step;

    #[test]
    fn entry_serializes_required_fields_only() {
        let entry = LogEntry::new("run::001", LogLevel::Info, "lifecycle.startup");
        let line = entry.to_jsonl().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert_eq!(obj["level"], "info");
        assert!(validate_log_line(&line, 1).is_ok());
    }

    #[test]
    fn validation_catches_missing_and_empty_fields() {
        let errs = validate_log_line(r#"{"timestamp":"t","level":"info","event":""}"#, 4)
            .unwrap_err();
        let fields: Vec<_> = errs.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["trace_id", "event"]);
        assert_eq!(errs[0].line_number, 4);

        assert!(validate_log_line("not json", 1).is_err());
        assert!(validate_log_line("[1,2]", 1).is_err());
    }

    #[test]
    fn emitter_numbers_trace_ids() {
        let (mut emitter, buffer) = LogEmitter::to_buffer("unit");
        emitter.emit(LogLevel::Info, "a").unwrap();
        emitter.emit(LogLevel::Info, "b").unwrap();
        let entries = validate_log_text(&buffer.contents()).unwrap();
        assert_eq!(entries[0].trace_id, "unit::001");
        assert_eq!(entries[1].trace_id, "unit::002");
    }

    #[test]
    fn report_emits_steps_and_summary() {
        let mut report = LifecycleReport::new(Operation::CleanUp, Transition::Performed);
        report.record::<()>(Step::FreeFinalizeKey, &Ok(()));
        report.record::<()>(
            Step::RestoreErrhandler(Endpoint::World),
            &Err(ForeignError::new(Primitive::CommSetErrhandler, 12)),
        );

        let (mut emitter, buffer) = LogEmitter::to_buffer("unit");
        emitter.emit_report(&report).unwrap();
        let entries = validate_log_text(&buffer.contents()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].level, LogLevel::Debug);
        assert_eq!(entries[1].event, "lifecycle.step_failed");
        assert_eq!(entries[1].status, Some(12));
        assert_eq!(entries[1].symbol.as_deref(), Some("MPI_Comm_set_errhandler"));
        assert_eq!(entries[1].endpoint, Some(Endpoint::World));
        assert_eq!(entries[2].event, "lifecycle.cleanup");
        assert_eq!(entries[2].level, LogLevel::Warn);
        assert_eq!(entries[2].details.as_ref().unwrap()["failures"], 1);
    }

    #[test]
    fn utc_formatting() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_utc(951_782_400, 5), "2000-02-29T00:00:00.005Z");
        assert_eq!(format_utc(1_700_000_000, 250), "2023-11-14T22:13:20.250Z");
    }
}
