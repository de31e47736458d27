//! telemetry.rs
//!
//! JSONL progress telemetry for sweep runs.
//!
//! The runner emits one JSON object per event: `repeat_finished`,
//! `repeat_failed`, `scenario_finished` and `sweep_finished`. Long sweeps can
//! be followed with `tail -f` without touching the stderr log.
//!
//! # Environment variables
//!
//! - `BEACON_SWEEP_TELEMETRY_MODE`: `off` (default) or `jsonl`.
//! - `BEACON_SWEEP_TELEMETRY_PATH`: output file, required for `jsonl`.
//! - `BEACON_SWEEP_TELEMETRY_APPEND`: append to an existing file instead of
//!   truncating it.
//!
//! Every record carries `schema_version` and `event`. The sink is
//! write-only: an I/O failure disables it and is never reported to the
//! runner.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as JsonValue};

use crate::config::parse_flag;

pub const SCHEMA_VERSION: i64 = 1;

/// Stamp `schema_version` on an object record unless it already has one.
pub fn ensure_schema_v1(record: &mut JsonValue) {
    if let JsonValue::Object(map) = record {
        map.entry("schema_version")
            .or_insert_with(|| JsonValue::from(SCHEMA_VERSION));
    } else {
        debug_assert!(false, "telemetry record is not an object: {}", record);
    }
}

/// `fields` plus `event` and `schema_version`. Non-object fields are dropped.
pub fn event_record(event: &str, fields: JsonValue) -> JsonValue {
    let mut map = match fields {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    };
    map.insert("event".to_string(), JsonValue::from(event));
    let mut record = JsonValue::Object(map);
    ensure_schema_v1(&mut record);
    record
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    Off,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    pub mode: TelemetryMode,
    pub path: Option<PathBuf>,
    pub append: bool,
}

impl TelemetryConfig {
    pub fn off() -> Self {
        Self {
            mode: TelemetryMode::Off,
            path: None,
            append: false,
        }
    }

    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: TelemetryMode::Jsonl,
            path: Some(path.into()),
            append: false,
        }
    }

    pub fn from_env() -> Self {
        let jsonl = env::var("BEACON_SWEEP_TELEMETRY_MODE")
            .map(|m| m.trim().eq_ignore_ascii_case("jsonl"))
            .unwrap_or(false);
        if !jsonl {
            return Self::off();
        }
        let path = env::var_os("BEACON_SWEEP_TELEMETRY_PATH").map(PathBuf::from);
        if path.is_none() {
            eprintln!("[telemetry] WARN: jsonl mode without BEACON_SWEEP_TELEMETRY_PATH; telemetry off");
        }
        Self {
            mode: TelemetryMode::Jsonl,
            path,
            append: env::var("BEACON_SWEEP_TELEMETRY_APPEND")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }
}

enum SinkState {
    Disabled,
    /// Configured but not opened; the file is created on the first event.
    Pending { path: PathBuf, append: bool },
    Open(BufWriter<File>),
}

/// JSONL telemetry sink. All methods are no-ops once disabled.
pub struct TelemetrySink {
    state: SinkState,
}

impl TelemetrySink {
    pub fn from_env() -> Self {
        Self::from_config(TelemetryConfig::from_env())
    }

    pub fn from_config(cfg: TelemetryConfig) -> Self {
        let state = match (cfg.mode, cfg.path) {
            (TelemetryMode::Jsonl, Some(path)) => SinkState::Pending {
                path,
                append: cfg.append,
            },
            _ => SinkState::Disabled,
        };
        Self { state }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state, SinkState::Disabled)
    }

    fn writer(&mut self) -> Option<&mut BufWriter<File>> {
        if let SinkState::Pending { path, append } = &self.state {
            self.state = match open(path, *append) {
                Ok(file) => SinkState::Open(BufWriter::new(file)),
                Err(err) => {
                    eprintln!(
                        "[telemetry] WARN: cannot open {}: {}; telemetry off",
                        path.display(),
                        err
                    );
                    SinkState::Disabled
                }
            };
        }
        match &mut self.state {
            SinkState::Open(w) => Some(w),
            _ => None,
        }
    }

    /// Write `value` as one line.
    pub fn log_json(&mut self, value: &JsonValue) {
        let Some(writer) = self.writer() else {
            return;
        };
        let ok = serde_json::to_writer(&mut *writer, value).is_ok()
            && writer.write_all(b"\n").is_ok();
        if !ok {
            self.state = SinkState::Disabled;
        }
    }

    pub fn log_event(&mut self, event: &str, fields: JsonValue) {
        if self.is_enabled() {
            self.log_json(&event_record(event, fields));
        }
    }

    pub fn flush(&mut self) {
        if let SinkState::Open(w) = &mut self.state {
            let _ = w.flush();
        }
    }
}

impl Drop for TelemetrySink {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open(path: &Path, append: bool) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_version_is_added_but_never_replaced() {
        let mut fresh = json!({"event": "sweep_finished"});
        ensure_schema_v1(&mut fresh);
        assert_eq!(fresh["schema_version"], 1);

        let mut newer = json!({"schema_version": 2});
        ensure_schema_v1(&mut newer);
        assert_eq!(newer["schema_version"], 2);
    }

    #[test]
    fn event_record_tags_event() {
        let rec = event_record("repeat_finished", json!({"scenario": "a", "repeat": 3}));
        assert_eq!(rec["event"], "repeat_finished");
        assert_eq!(rec["repeat"], 3);
        assert_eq!(rec["schema_version"], SCHEMA_VERSION);
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("telemetry.jsonl");
        {
            let mut sink = TelemetrySink::from_config(TelemetryConfig::jsonl(&path));
            sink.log_event("repeat_finished", json!({"repeat": 0}));
            sink.log_event("sweep_finished", json!({}));
        }
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: JsonValue = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["event"], "sweep_finished");
    }

    #[test]
    fn append_keeps_earlier_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        for _ in 0..2 {
            let mut cfg = TelemetryConfig::jsonl(&path);
            cfg.append = true;
            TelemetrySink::from_config(cfg).log_event("sweep_finished", json!({}));
        }
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn unopenable_path_disables_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as the telemetry file.
        let mut sink = TelemetrySink::from_config(TelemetryConfig::jsonl(dir.path()));
        assert!(sink.is_enabled());
        sink.log_event("sweep_finished", json!({}));
        assert!(!sink.is_enabled());
    }

    #[test]
    fn off_sink_is_noop() {
        let mut sink = TelemetrySink::from_config(TelemetryConfig::off());
        assert!(!sink.is_enabled());
        sink.log_event("sweep_finished", json!({}));
    }
}
