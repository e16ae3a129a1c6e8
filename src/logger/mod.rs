//! Recorder log: append-only line-delimited JSON for unattended operation.
//!
//! Each line is a self-contained JSON object. Lines are assembled in memory
//! and written atomically via `write_all` so a tailing process never sees a
//! partial line. When the file cannot be written the logger degrades to
//! stderr; the recorder must never stop because logging failed.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::errors::{LmcrecError, Result};

/// Default size after which the log file is rotated.
pub const DEFAULT_LOG_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// Rotated generations kept next to the live file (`.1` .. `.N`).
pub const LOG_MAX_ROTATED_FILES: u32 = 3;

#[derive(Serialize)]
struct LogLine<'a> {
    ts: String,
    level: &'static str,
    comp: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    inst: Option<&'a str>,
    msg: &'a str,
}

enum Sink {
    File { file: File, written: u64 },
    Stderr,
}

struct LoggerInner {
    sink: Mutex<Sink>,
    path: Option<PathBuf>,
    max_size_bytes: u64,
}

/// Cheap handle onto the shared log sink, carrying the component (and
/// optionally instance) fields stamped on every line.
#[derive(Clone)]
pub struct RecorderLogger {
    inner: Arc<LoggerInner>,
    comp: &'static str,
    inst: Option<String>,
}

impl RecorderLogger {
    /// Logger writing JSON lines to stderr only.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                sink: Mutex::new(Sink::Stderr),
                path: None,
                max_size_bytes: DEFAULT_LOG_MAX_SIZE_BYTES,
            }),
            comp: "main",
            inst: None,
        }
    }

    /// Logger appending to `path`, creating parent directories as needed.
    pub fn to_file(path: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self> {
        let path: PathBuf = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| LmcrecError::io(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LmcrecError::io(&path, e))?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            inner: Arc::new(LoggerInner {
                sink: Mutex::new(Sink::File { file, written }),
                path: Some(path),
                max_size_bytes,
            }),
            comp: "main",
            inst: None,
        })
    }

    /// A handle stamping `comp` on every line.
    #[must_use]
    pub fn component(&self, comp: &'static str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            comp,
            inst: self.inst.clone(),
        }
    }

    /// A handle additionally stamping the recorder instance.
    #[must_use]
    pub fn with_inst(&self, inst: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            comp: self.comp,
            inst: Some(inst.to_string()),
        }
    }

    #[allow(missing_docs)]
    pub fn info(&self, msg: impl AsRef<str>) {
        self.log("info", msg.as_ref());
    }

    #[allow(missing_docs)]
    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log("warning", msg.as_ref());
    }

    #[allow(missing_docs)]
    pub fn error(&self, msg: impl AsRef<str>) {
        self.log("error", msg.as_ref());
    }

    fn log(&self, level: &'static str, msg: &str) {
        let line = LogLine {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            comp: self.comp,
            inst: self.inst.as_deref(),
            msg,
        };
        let Ok(mut serialized) = serde_json::to_vec(&line) else {
            return;
        };
        serialized.push(b'\n');

        let mut guard = self.inner.sink.lock();
        let needs_rotate = matches!(
            &*guard,
            Sink::File { written, .. }
                if *written + serialized.len() as u64 > self.inner.max_size_bytes
        );
        if needs_rotate {
            self.rotate(&mut guard);
        }
        self.write_line(&mut guard, &serialized);
    }

    fn write_line(&self, sink: &mut Sink, serialized: &[u8]) {
        match sink {
            Sink::Stderr => {
                let _ = std::io::stderr().write_all(serialized);
            }
            Sink::File { file, written } => {
                if file.write_all(serialized).is_ok() {
                    *written += serialized.len() as u64;
                } else {
                    *sink = Sink::Stderr;
                    let _ = std::io::stderr().write_all(serialized);
                }
            }
        }
    }

    /// Shift rotated generations up and reopen a fresh live file. Any
    /// failure degrades the sink to stderr.
    fn rotate(&self, sink: &mut Sink) {
        let Some(path) = &self.inner.path else {
            *sink = Sink::Stderr;
            return;
        };
        for generation in (1..LOG_MAX_ROTATED_FILES).rev() {
            let from = rotated_name(path, generation);
            let to = rotated_name(path, generation + 1);
            let _ = fs::rename(&from, &to);
        }
        let _ = fs::rename(path, rotated_name(path, 1));
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => *sink = Sink::File { file, written: 0 },
            Err(_) => *sink = Sink::Stderr,
        }
    }
}

fn rotated_name(path: &std::path::Path, generation: u32) -> PathBuf {
    let mut name = path.to_path_buf().into_os_string();
    name.push(format!(".{generation}"));
    name.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_self_contained_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lmcrec.jsonl");
        let logger = RecorderLogger::to_file(&path, DEFAULT_LOG_MAX_SIZE_BYTES).unwrap();
        let recorder_log = logger.component("recorder").with_inst("test-inst");

        recorder_log.info("first");
        recorder_log.warn("second");
        recorder_log.error("third");

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        for (line, (level, msg)) in lines
            .iter()
            .zip([("info", "first"), ("warning", "second"), ("error", "third")])
        {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["level"], level);
            assert_eq!(value["msg"], msg);
            assert_eq!(value["comp"], "recorder");
            assert_eq!(value["inst"], "test-inst");
            assert!(value["ts"].as_str().unwrap().ends_with('Z'));
        }
    }

    #[test]
    fn component_handles_share_one_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lmcrec.jsonl");
        let logger = RecorderLogger::to_file(&path, DEFAULT_LOG_MAX_SIZE_BYTES).unwrap();
        logger.component("runner").info("a");
        logger.component("recorder").info("b");

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn rotation_keeps_live_file_small() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lmcrec.jsonl");
        let logger = RecorderLogger::to_file(&path, 256).unwrap();
        for i in 0..50 {
            logger.info(format!("line number {i} with some padding text"));
        }

        let live = fs::metadata(&path).unwrap().len();
        assert!(live <= 256, "live file should stay under the cap: {live}");
        assert!(rotated_name(&path, 1).exists());
    }

    #[test]
    fn stderr_logger_never_fails() {
        let logger = RecorderLogger::stderr();
        logger.info("goes to stderr");
        logger.error("also fine");
    }
}
