//! Size-rotated log file
//!
//! `vmrac.log` grows until the next line would push it past the rotation
//! threshold, then the numbered backups shift up (`vmrac.1.log` becomes
//! `vmrac.2.log`, ...), the oldest beyond the keep limit is deleted, and the
//! live file becomes `vmrac.1.log`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

use crate::config::LogConfig;

/// Upper bound on backups shifted when the keep limit is unlimited
const MAX_UNLIMITED_SHIFT: u32 = 100;

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    rotate_bytes: u64,
    keep_files: u32,
    console_mirror: bool,
    file: Option<File>,
}

/// Rotating log file usable as a `tracing_subscriber` writer
#[derive(Debug)]
pub struct RotatingLog {
    inner: Mutex<Inner>,
}

impl RotatingLog {
    pub fn new(config: &LogConfig) -> Self {
        let mut inner = Inner {
            path: config.path.clone(),
            rotate_bytes: config.rotate_bytes,
            keep_files: config.keep_files,
            console_mirror: config.console_mirror,
            file: None,
        };
        inner.open_if_needed();
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Whether the log file could be opened
    pub fn is_file_backed(&self) -> bool {
        self.lock().open_if_needed()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Path of backup number `n` for `base` (`/var/log/vmrac.log` -> `/var/log/vmrac.N.log`)
fn numbered(base: &Path, n: u32) -> PathBuf {
    let text = base.to_string_lossy();
    match text.strip_suffix(".log") {
        Some(stem) => PathBuf::from(format!("{stem}.{n}.log")),
        None => PathBuf::from(format!("{text}.{n}.log")),
    }
}

impl Inner {
    fn open_if_needed(&mut self) -> bool {
        if self.file.is_none() {
            self.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .ok();
        }
        self.file.is_some()
    }

    fn current_size(&self) -> u64 {
        self.file
            .as_ref()
            .and_then(|f| f.metadata().ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn rotate_if_needed(&mut self, upcoming: usize) {
        if self.rotate_bytes > 0 && self.current_size() + upcoming as u64 > self.rotate_bytes {
            self.rotate();
        }
    }

    fn rotate(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        if self.keep_files > 0 {
            let _ = fs::remove_file(numbered(&self.path, self.keep_files));
        }

        let max_shift = if self.keep_files > 0 {
            self.keep_files - 1
        } else {
            MAX_UNLIMITED_SHIFT
        };
        for i in (1..=max_shift).rev() {
            let src = numbered(&self.path, i);
            if src.exists() {
                let _ = fs::rename(&src, numbered(&self.path, i + 1));
            }
        }

        let _ = fs::rename(&self.path, numbered(&self.path, 1));
        self.open_if_needed();
    }

    fn write_line(&mut self, buf: &[u8]) {
        if self.open_if_needed() {
            self.rotate_if_needed(buf.len());
            if let Some(file) = self.file.as_mut() {
                let _ = file.write_all(buf);
            }
        }
        if self.console_mirror || self.file.is_none() {
            let _ = io::stderr().write_all(buf);
        }
    }
}

/// Per-event handle; holds the log lock while tracing writes one line
pub struct RotatingWriter<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl Write for RotatingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_line(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.inner.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RotatingLog {
    type Writer = RotatingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriter { inner: self.lock() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path, rotate_bytes: u64, keep_files: u32) -> LogConfig {
        LogConfig {
            path: dir.join("vmrac.log"),
            rotate_bytes,
            keep_files,
            console_mirror: false,
        }
    }

    fn write(log: &RotatingLog, line: &str) {
        log.make_writer().write_all(line.as_bytes()).unwrap();
    }

    #[test]
    fn numbered_paths() {
        assert_eq!(
            numbered(Path::new("/var/log/vmrac.log"), 3),
            PathBuf::from("/var/log/vmrac.3.log")
        );
        assert_eq!(
            numbered(Path::new("/tmp/trace"), 1),
            PathBuf::from("/tmp/trace.1.log")
        );
    }

    #[test]
    fn appends_without_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let log = RotatingLog::new(&config(dir.path(), 0, 5));
        assert!(log.is_file_backed());
        write(&log, "first\n");
        write(&log, "second\n");
        let content = fs::read_to_string(dir.path().join("vmrac.log")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn rotates_and_caps_backups() {
        let dir = tempfile::tempdir().unwrap();
        let log = RotatingLog::new(&config(dir.path(), 10, 2));

        // each line is 8 bytes, so every write after the first rotates
        for i in 0..4 {
            write(&log, &format!("line {i:02}\n"));
        }

        let read = |name: &str| fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("vmrac.log"), "line 03\n");
        assert_eq!(read("vmrac.1.log"), "line 02\n");
        assert_eq!(read("vmrac.2.log"), "line 01\n");
        assert!(!dir.path().join("vmrac.3.log").exists());
    }

    #[test]
    fn unopenable_file_is_not_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LogConfig {
            path: dir.path().join("missing/dir/vmrac.log"),
            ..LogConfig::default()
        };
        let log = RotatingLog::new(&cfg);
        assert!(!log.is_file_backed());
        // falls back to stderr without failing
        write(&log, "to stderr\n");
    }
}
