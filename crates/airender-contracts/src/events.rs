use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorCode;

/// Where backend failures end up. The host decides how they are displayed.
///
/// `context` names the host object the failure belongs to (for example the
/// scene a catalog fetch was started from); generation failures pass `None`.
pub trait ErrorSink: Send + Sync {
    fn report(&self, context: Option<&str>, message: &str, code: Option<ErrorCode>);
}

/// Forwards reported errors to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, context: Option<&str>, message: &str, code: Option<ErrorCode>) {
        let code = code.map(ErrorCode::as_str).unwrap_or("-");
        match context {
            Some(context) => log::error!("[{code}] ({context}) {message}"),
            None => log::error!("[{code}] {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub context: Option<String>,
    pub message: String,
    pub code: Option<ErrorCode>,
}

/// Keeps every report in memory; hosts use it to show the last failure.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<ReportedError>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ReportedError> {
        self.reports
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<ReportedError> {
        self.reports().pop()
    }
}

impl ErrorSink for MemorySink {
    fn report(&self, context: Option<&str>, message: &str, code: Option<ErrorCode>) {
        if let Ok(mut rows) = self.reports.lock() {
            rows.push(ReportedError {
                context: context.map(str::to_string),
                message: message.to_string(),
                code,
            });
        }
    }
}

impl<S: ErrorSink + ?Sized> ErrorSink for Arc<S> {
    fn report(&self, context: Option<&str>, message: &str, code: Option<ErrorCode>) {
        (**self).report(context, message, code)
    }
}

/// One line of the JSONL error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub run_id: String,
    pub ts: String,
    pub message: String,
    pub code: Option<String>,
    pub context: Option<String>,
}

/// Appends every reported failure to a JSONL file, one `error` event per
/// line, tagged with the run id of the process that wrote it.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(
        &self,
        context: Option<&str>,
        message: &str,
        code: Option<ErrorCode>,
    ) -> anyhow::Result<ErrorEvent> {
        let event = ErrorEvent {
            event_type: "error".to_string(),
            run_id: self.run_id.clone(),
            ts: now_utc_iso(),
            message: message.to_string(),
            code: code.map(|code| code.as_str().to_string()),
            context: context.map(str::to_string),
        };
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("error log lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(event)
    }
}

impl ErrorSink for ErrorLog {
    fn report(&self, context: Option<&str>, message: &str, code: Option<ErrorCode>) {
        if let Err(err) = self.record(context, message, code) {
            log::warn!("error log unavailable: {err:#}");
        }
    }
}

/// Reports to every inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ErrorSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: ErrorSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ErrorSink for FanoutSink {
    fn report(&self, context: Option<&str>, message: &str, code: Option<ErrorCode>) {
        for sink in &self.sinks {
            sink.report(context, message, code);
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
