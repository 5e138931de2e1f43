//! Log file sink
//!
//! All diagnostics go to one append-mode file. Every line starts with
//! [`LOG_PREFIX`]. The file handle is released by a cleanup action
//! registered on the process [`ResourceScope`]; anything logged after that
//! is dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{ProxyError, Result};
use crate::scope::ResourceScope;

/// Tag written at the start of every log line
pub const LOG_PREFIX: &str = "[reverseproxy] ";

const DEFAULT_FILTER: &str = "reverseproxy=info,tower_http=info";

/// Shared handle to the log file
#[derive(Clone, Debug)]
pub struct LogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl LogSink {
    /// Open or create the file in append mode
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(Some(file))),
        })
    }

    /// Flush and release the file
    pub fn close(&self) {
        if let Some(mut file) = self.lock().take() {
            let _ = file.flush();
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Writer for a single formatted event
pub struct LogLine<'a> {
    file: MutexGuard<'a, Option<File>>,
    tagged: bool,
}

impl Write for LogLine<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(buf.len());
        };
        if !self.tagged {
            file.write_all(LOG_PREFIX.as_bytes())?;
            self.tagged = true;
        }
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogLine<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogLine {
            file: self.lock(),
            tagged: false,
        }
    }
}

/// Formatting layer that writes to the sink, with source locations and
/// without colors
pub fn layer<S>(sink: LogSink) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(sink)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
}

/// Open the log file, register its release on `scope` and install the
/// global subscriber.
pub fn init(path: &Path, scope: &ResourceScope) -> Result<LogSink> {
    let sink = LogSink::open(path).map_err(|e| {
        ProxyError::Io(io::Error::new(
            e.kind(),
            format!("Failed to open log file {}: {}", path.display(), e),
        ))
    })?;

    let closing = sink.clone();
    scope.register(move || closing.close());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(layer(sink.clone()))
        .try_init()
        .map_err(|e| ProxyError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

    Ok(sink)
}
