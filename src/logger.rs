use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Metadata, Record};
use parking_lot::Mutex;

const MAX_LOG_BYTES: u64 = 256 * 1024;
const KEEP_ROTATIONS: usize = 3;

/// [`log::Log`] implementation writing to a size-rotated file under the logs
/// root. Warnings and errors are mirrored to stderr so a tethered shell sees
/// them live. Rotation renames the active file to `.1` and shifts older
/// rotations up, dropping the oldest past the keep count.
pub struct RotatingLogger {
    level: LevelFilter,
    max_bytes: u64,
    keep: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl RotatingLogger {
    pub fn new(path: PathBuf, level: LevelFilter) -> Self {
        Self::with_limits(path, level, MAX_LOG_BYTES, KEEP_ROTATIONS)
    }

    fn with_limits(path: PathBuf, level: LevelFilter, max_bytes: u64, keep: usize) -> Self {
        Self {
            level,
            max_bytes,
            keep,
            inner: Mutex::new(Inner {
                path,
                file: None,
                written: 0,
            }),
        }
    }

    /// Installs this logger as the global [`log`] sink.
    pub fn install(self) -> Result<()> {
        log::set_max_level(self.level);
        log::set_boxed_logger(Box::new(self)).context("logger already installed")?;

        Ok(())
    }

    /// Log level from `RUST_LOG`, accepting a bare level name. Defaults to
    /// `info`.
    pub fn level_from_env() -> LevelFilter {
        match std::env::var("RUST_LOG").ok().as_deref() {
            Some("off") => LevelFilter::Off,
            Some("error") => LevelFilter::Error,
            Some("warn") => LevelFilter::Warn,
            Some("debug") => LevelFilter::Debug,
            Some("trace") => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }

    fn write_line(&self, line: &str) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.file.is_none() {
            inner.file = open_active(&inner.path, &mut inner.written);
        }

        let Some(file) = inner.file.as_mut() else {
            return;
        };

        if file.write_all(line.as_bytes()).is_ok() {
            inner.written += line.len() as u64;
        }

        if inner.written >= self.max_bytes {
            self.rotate_locked(inner);
        }
    }

    fn rotate_locked(&self, inner: &mut Inner) {
        inner.file = None;
        inner.written = 0;

        let rotated = |n: usize| {
            let mut path = inner.path.clone().into_os_string();
            path.push(format!(".{n}"));
            PathBuf::from(path)
        };

        let _ = fs::remove_file(rotated(self.keep));

        for n in (1..self.keep).rev() {
            let _ = fs::rename(rotated(n), rotated(n + 1));
        }

        let _ = fs::rename(&inner.path, rotated(1));
    }
}

fn open_active(path: &PathBuf, written: &mut u64) -> Option<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).ok()?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path).ok()?;
    *written = file.metadata().map(|meta| meta.len()).unwrap_or(0);

    Some(file)
}

impl log::Log for RotatingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let target = if record.target().is_empty() {
            record.module_path().unwrap_or_default()
        } else {
            record.target()
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let line = format!(
            "{}.{:03} [{}] [{}] {}\n",
            now.as_secs(),
            now.subsec_millis(),
            record.level(),
            target,
            record.args()
        );

        if record.level() <= Level::Warn {
            eprint!("{line}");
        }

        self.write_line(&line);
    }

    fn flush(&self) {
        let mut inner = self.inner.lock();

        if let Some(file) = inner.file.as_mut() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    fn record(msg: &str) -> String {
        msg.to_owned()
    }

    #[test]
    fn rotation_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.log");
        let logger = RotatingLogger::with_limits(path.clone(), LevelFilter::Info, 64, 2);

        for n in 0..20 {
            logger.write_line(&format!("line number {n} with some padding\n"));
        }

        assert!(path.with_extension("log.1").exists());
        assert!(path.with_extension("log.2").exists());
        assert!(!path.with_extension("log.3").exists());
    }

    #[test]
    fn respects_level_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.log");
        let logger = RotatingLogger::with_limits(path.clone(), LevelFilter::Warn, 1024, 2);

        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .args(format_args!("{}", record("dropped")))
                .build(),
        );
        logger.flush();

        assert!(fs::read_to_string(&path).unwrap_or_default().is_empty());
    }
}
