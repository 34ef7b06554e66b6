//! Leveled, queued log sink.
//!
//! Formatted lines are pushed onto a channel by whichever task logs them and
//! appended to the log file by a single writer thread, so logging never waits
//! on file I/O. The queue is bounded; when it is full new lines are dropped
//! and counted.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, SyncSender, TrySendError},
    },
    thread::{self, JoinHandle},
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::LoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Unrecognized level names log everything.
    All,
}

impl FromStr for LogLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "TRACE" => Self::Trace,
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "WARN" => Self::Warn,
            "ERROR" => Self::Error,
            _ => Self::All,
        })
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace | LogLevel::All => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

enum Command {
    Line(Vec<u8>),
    Shutdown,
}

/// Lines the queue holds before new ones are dropped.
pub const QUEUE_CAPACITY: usize = 8192;

/// `MakeWriter` handing out cheap handles onto the log queue.
#[derive(Clone)]
pub struct QueuedWriter {
    tx: SyncSender<Command>,
    dropped: Arc<AtomicU64>,
}

impl QueuedWriter {
    /// Lines discarded so far because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drains the queue and stops the writer thread when dropped.
pub struct LogGuard {
    tx: SyncSender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Opens `path` for appending and starts the writer thread.
pub fn queued_file_writer(path: &Path) -> io::Result<(QueuedWriter, LogGuard)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    spawn_writer(file, QUEUE_CAPACITY)
}

fn spawn_writer<W>(sink: W, capacity: usize) -> io::Result<(QueuedWriter, LogGuard)>
where
    W: Write + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let worker_dropped = Arc::clone(&dropped);
    let worker = thread::Builder::new()
        .name("log-writer".to_string())
        .spawn(move || write_queue(sink, &rx, &worker_dropped))?;

    Ok((
        QueuedWriter {
            tx: tx.clone(),
            dropped,
        },
        LogGuard {
            tx,
            worker: Some(worker),
        },
    ))
}

fn write_queue<W: Write>(mut sink: W, rx: &Receiver<Command>, dropped: &AtomicU64) {
    while let Ok(Command::Line(line)) = rx.recv() {
        if let Err(e) = sink.write_all(&line).and_then(|()| sink.flush()) {
            eprintln!("Logging error: {e}");
        }
    }

    let dropped = dropped.load(Ordering::Relaxed);
    if dropped > 0 {
        let _ = writeln!(sink, "{dropped} log lines dropped because the queue was full");
        let _ = sink.flush();
    }
}

impl Write for QueuedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A full or closed queue drops the line; logging never blocks or fails the caller.
        match self.tx.try_send(Command::Line(buf.to_vec())) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for QueuedWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs the global subscriber. Returns `None` when logging is disabled or
/// the log file cannot be opened, in which case nothing is logged.
#[must_use]
pub fn init(config: &LoggingConfig) -> Option<LogGuard> {
    if !config.enabled {
        return None;
    }

    let (writer, guard) = match queued_file_writer(Path::new(&config.file)) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Opening log file {} failed: {e}", config.file);
            return None;
        }
    };

    let level: LogLevel = config
        .level
        .as_deref()
        .unwrap_or_default()
        .parse()
        .unwrap_or(LogLevel::All);

    let installed = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(level))
        .with_ansi(false)
        .with_writer(writer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("Installing log subscriber failed: {e}");
        return None;
    }

    Some(guard)
}
