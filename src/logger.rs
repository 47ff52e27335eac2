/*
 * This file is part of dcpipe.
 *
 * Copyright (C) 2025 dcpipe contributors
 *
 * dcpipe is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * dcpipe is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with dcpipe. If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-lines event log
//!
//! Connection-status messages, commit outcomes and debugger breaks are
//! appended here as one JSON object per line. Events are dropped silently
//! until the log is initialized.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde_json::{json, Value};

const DEFAULT_LOG_PATH: &str = "/var/log/dcpipe/events.json";
const FALLBACK_LOG_PATH: &str = "/tmp/dcpipe_events.json";

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Event log location, overridable with `DCPIPE_EVENT_LOG`
pub fn log_path() -> PathBuf {
    env::var("DCPIPE_EVENT_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_PATH))
}

fn open_append(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// Open the event log, falling back to /tmp when the default is unwritable
pub fn init_logging() {
    let file = open_append(&log_path()).or_else(|| open_append(Path::new(FALLBACK_LOG_PATH)));
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = file;
    }
}

/// Open the event log at an explicit path
pub fn init_logging_at(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    Ok(())
}

/// Close the event log; later events are dropped
pub fn shutdown_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = None;
    }
}

pub fn is_enabled() -> bool {
    LOG_FILE.lock().map(|g| g.is_some()).unwrap_or(false)
}

pub fn log_event(event: &str, data: Value) {
    let line = json!({
        "ts_ms": now_millis(),
        "event": event,
        "data": data,
    })
    .to_string();

    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(f) = guard.as_mut() {
            let _ = writeln!(f, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_events_written_as_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        init_logging_at(&path).unwrap();
        log_event("json_lines_first", json!({"targets": 1}));
        log_event("json_lines_second", json!({"reason": "test"}));
        shutdown_logging();

        // Other tests may commit while the log is open
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap())
            .filter(|v| v["event"].as_str().is_some_and(|e| e.starts_with("json_lines_")))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "json_lines_first");
        assert_eq!(lines[0]["data"]["targets"], 1);
        assert!(lines[1]["ts_ms"].as_u64().is_some());
    }

    #[test]
    #[serial]
    fn test_events_dropped_when_uninitialized() {
        shutdown_logging();
        assert!(!is_enabled());
        log_event("ignored", json!({}));
    }

    #[test]
    #[serial]
    fn test_log_path_override() {
        env::set_var("DCPIPE_EVENT_LOG", "/custom/events.json");
        assert_eq!(log_path(), PathBuf::from("/custom/events.json"));
        env::remove_var("DCPIPE_EVENT_LOG");
        assert_eq!(log_path(), PathBuf::from(DEFAULT_LOG_PATH));
    }
}
