// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon log formatting.
//!
//! One line per message:
//! `[YYYY-MM-DD HH:MM:SS] <5-char pid> <13-char label> <message>`.
//! A header is written exactly once per file open. The log path is
//! re-resolved on 5-minute wall-clock multiples so rotation-by-rename is
//! picked up without a restart.

use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event as TracingEvent, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

/// Column header written at the top of every freshly opened log file.
pub const LOG_HEADER: &str = "\nDate                  PID   Label         Message\n";

const LABEL_WIDTH: usize = 13;

/// Event formatter producing the daemon line format.
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &TracingEvent<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let pid = std::process::id();
        let label = short_label(event.metadata().target());

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        write!(writer, "[{timestamp}] {pid:>5} {label:<13} ")?;
        for _ in 0..visitor.indent {
            write!(writer, "\t")?;
        }
        write!(writer, "{}", visitor.message)?;
        for (name, value) in &visitor.fields {
            write!(writer, " {name}={value}")?;
        }
        writeln!(writer)
    }
}

/// Last path segment of the target, truncated to the label column.
pub(crate) fn short_label(target: &str) -> String {
    let segment = target.rsplit("::").next().unwrap_or(target);
    segment.chars().take(LABEL_WIDTH).collect()
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: Vec<(String, String)>,
    indent: usize,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "indent" {
            self.indent = value as usize;
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }
}

struct SinkInner {
    /// None logs to stdout (foreground mode).
    path: Option<PathBuf>,
    file: Option<File>,
    /// 5-minute wall-clock slot of the last path poll.
    last_poll_slot: Option<u64>,
}

impl SinkInner {
    /// Re-resolve the path on 5-minute multiples; reopen when it moved.
    fn poll_path(&mut self) {
        let Some(current) = &self.path else {
            return;
        };
        let slot = epoch_minutes() / 5;
        if self.last_poll_slot == Some(slot) {
            return;
        }
        self.last_poll_slot = Some(slot);
        let resolved = crate::env::log_path().unwrap_or_else(|| current.clone());
        if &resolved != current || !resolved.exists() {
            self.path = Some(resolved);
            self.file = None;
        }
    }

    fn ensure_open(&mut self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if self.file.is_none() {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(LOG_HEADER.as_bytes())?;
            self.file = Some(file);
        }
        Ok(())
    }
}

fn epoch_minutes() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / 60
}

/// Log destination with header-on-open and periodic path re-resolution.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl LogSink {
    /// Log to stdout (no header, no polling).
    pub fn stdout() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                path: None,
                file: None,
                last_poll_slot: None,
            })),
        }
    }

    /// Log to a file, writing the header on every open.
    pub fn to_path(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                path: Some(path.into()),
                file: None,
                last_poll_slot: None,
            })),
        }
    }
}

/// Per-event writer handed out by [`LogSink`].
pub struct SinkWriter {
    inner: Arc<Mutex<SinkInner>>,
}

impl io::Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        inner.poll_path();
        inner.ensure_open()?;
        match inner.file.as_mut() {
            Some(file) => file.write(buf),
            None => io::stdout().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.inner.lock();
        match inner.file.as_mut() {
            Some(file) => file.flush(),
            None => io::stdout().lock().flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Install the daemon log format as the global tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(sink: LogSink) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .event_format(LineFormat)
        .with_writer(sink)
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
#[path = "logfmt_tests.rs"]
mod tests;
