use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log rotation failed while {stage} {}: {source}", path.display())]
    Rotation {
        stage: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Append-only log file whose line count is kept under a ceiling.
///
/// Every write is appended to the file first. The file is then recounted, and
/// once it holds more than `max_lines + buffer_lines` lines the oldest
/// `buffer_lines` lines are cut in one rotation. Rotating in batches keeps the
/// O(file) rewrite off the hot path; the price is that the file may sit up to
/// `buffer_lines` above `max_lines`.
///
/// Clones share the same file and lock, so rotation never interleaves with a
/// write from another clone.
#[derive(Clone)]
pub struct BoundedLogWriter {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    path: PathBuf,
    /// `None` after a failed reopen; the next write retries the open
    file: Option<File>,
    max_lines: usize,
    buffer_lines: usize,
}

impl BoundedLogWriter {
    /// Open (or create) `path` for appending, creating its parent directory
    pub fn open(
        path: impl AsRef<Path>,
        max_lines: usize,
        buffer_lines: usize,
    ) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LogError::Open {
                path: path.clone(),
                source,
            })?;
        }

        let file = open_append(&path).map_err(|source| LogError::Open {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                path,
                file: Some(file),
                max_lines,
                buffer_lines,
            })),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic mid-write leaves the file itself consistent; keep logging.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for BoundedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        inner.file()?.write_all(buf)?;

        // The bytes are on disk at this point. A failed count must not turn
        // into a failed write, so it only postpones rotation.
        if let Ok(lines) = count_lines(&inner.path) {
            if lines > inner.max_lines + inner.buffer_lines {
                inner.rotate(lines).map_err(io::Error::other)?;
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Inner {
    /// The live handle, reopened if a rotation lost it
    fn file(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => open_append(&self.path)?,
        };
        Ok(self.file.insert(file))
    }

    fn rotate(&mut self, lines: usize) -> Result<(), LogError> {
        // One oversized write can push the file past the band by more than a
        // batch; cut enough to land back inside it.
        let excess = lines - (self.max_lines + self.buffer_lines);
        let skip = self.buffer_lines.max(excess);
        let staging = rotation_path(&self.path);

        // The live file is untouched until the rename, so a failure while
        // staging just leaves rotation to the next write.
        if copy_tail(&self.path, &staging, skip).is_err() {
            let _ = fs::remove_file(&staging);
            return Ok(());
        }

        if let Err(source) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(LogError::Rotation {
                stage: "replacing",
                path: self.path.clone(),
                source,
            });
        }

        // The old handle now points at the unlinked file; never write to it
        self.file = None;
        self.file = Some(open_append(&self.path).map_err(|source| LogError::Rotation {
            stage: "reopening",
            path: self.path.clone(),
            source,
        })?);

        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotation_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".rotate");
    PathBuf::from(name)
}

/// Copy everything after the first `skip` lines of `src` into a fresh `dst`
fn copy_tail(src: &Path, dst: &Path, skip: usize) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut line = Vec::new();
    for _ in 0..skip {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
    }

    let mut out = BufWriter::new(File::create(dst)?);
    io::copy(&mut reader, &mut out)?;
    let out = out.into_inner().map_err(|e| e.into_error())?;
    out.sync_all()
}

/// Count lines the way a line scanner would: a trailing fragment without a
/// newline still counts as a line.
pub fn count_lines(path: &Path) -> io::Result<usize> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 8192];
    let mut lines = 0;
    let mut last = b'\n';

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        lines += buf[..n].iter().filter(|&&b| b == b'\n').count();
        last = buf[n - 1];
    }

    if last != b'\n' {
        lines += 1;
    }
    Ok(lines)
}
