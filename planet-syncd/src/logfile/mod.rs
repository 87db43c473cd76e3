pub mod bounded;

use std::io::{self, Write};
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub use bounded::BoundedLogWriter;
use crate::config::LogConfig;

const DEFAULT_FILTER: &str = "planet_syncd=info";

/// Fans each write out to the log file and a console mirror.
///
/// The file decides the outcome. The console is best effort: a detached or
/// closed stdout must not make logging fail.
pub struct MirrorWriter<F, C> {
    file: F,
    console: C,
}

impl<F: Write, C: Write> MirrorWriter<F, C> {
    pub fn new(file: F, console: C) -> Self {
        Self { file, console }
    }
}

impl<F: Write, C: Write> Write for MirrorWriter<F, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        let _ = self.console.write_all(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber writing to the bounded log file and stdout.
///
/// Returns the file writer; the caller owns it and flushes it on shutdown.
pub fn init(config: &LogConfig) -> Result<BoundedLogWriter> {
    let file = BoundedLogWriter::open(&config.path, config.max_lines, config.buffer_lines)
        .context("Failed to open log file")?;

    let sink = file.clone();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(move || MirrorWriter::new(sink.clone(), io::stdout()))
        .init();

    Ok(file)
}

/// Console-only logging for one-shot commands
pub fn init_console() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .init();
}
