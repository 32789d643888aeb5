//! Policy layer over [`AppendFile`]: timestamped filenames, size/day
//! rolling, periodic flushing, and optional internal synchronization.

use std::cell::UnsafeCell;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::append_file::AppendFile;
use crate::error::{LogFileError, OpenFailedSnafu, RollError, RollOpenFailedSnafu};
use crate::filename::{make_filename, now_unix_secs, period_start, ROLL_PERIOD_SECONDS};
use snafu::ResultExt;

/// Default number of appends between size/time checkpoints.
const DEFAULT_CHECK_EVERY_N: u32 = 1024;
/// Default minimum wall-clock seconds between forced flushes.
const DEFAULT_FLUSH_INTERVAL_SECS: i64 = 3;

struct Inner {
    append_counter: u32,
    period_start: i64,
    last_roll: i64,
    last_flush: i64,
    file: AppendFile,
}

/// A rolling, flushing log file.
///
/// In thread-safe mode (the default for standalone use) an internal mutex
/// serializes concurrent `append` calls. When embedded beneath
/// [`crate::async_logging::AsyncLogging`], whose consumer thread is the
/// sole writer, construction with `thread_safe = false` skips that lock
/// entirely — the same type, configured rather than subclassed, per this
/// crate's "no inheritance" design.
pub struct LogFile {
    basename: PathBuf,
    roll_size: u64,
    flush_interval_secs: i64,
    check_every_n: u32,
    lock: Option<Mutex<()>>,
    inner: UnsafeCell<Inner>,
}

// SAFETY: every access to `inner` goes through `with_inner`, which either
// holds `lock` for the duration of the access (thread-safe mode) or relies
// on the construction-time contract that a `thread_safe = false` LogFile is
// only ever touched by a single exclusive owner (see `new_exclusive`), so
// `&UnsafeCell<Inner>` is never aliased mutably from two threads at once.
unsafe impl Sync for LogFile {}

impl LogFile {
    /// Constructs a thread-safe `LogFile`, suitable for standalone use from
    /// multiple producer threads.
    pub fn new(basename: impl Into<PathBuf>, roll_size: u64) -> Result<Self, LogFileError> {
        Self::build(basename.into(), roll_size, DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_CHECK_EVERY_N, true)
    }

    /// Constructs a `LogFile` with no internal locking, for exclusive use by
    /// a single owning thread (e.g. `AsyncLogging`'s consumer).
    pub fn new_exclusive(
        basename: impl Into<PathBuf>,
        roll_size: u64,
        flush_interval_secs: i64,
        check_every_n: u32,
    ) -> Result<Self, LogFileError> {
        Self::build(basename.into(), roll_size, flush_interval_secs, check_every_n, false)
    }

    fn build(
        basename: PathBuf,
        roll_size: u64,
        flush_interval_secs: i64,
        check_every_n: u32,
        thread_safe: bool,
    ) -> Result<Self, LogFileError> {
        let now = now_unix_secs();
        let path = make_filename(&basename, now);
        let file = AppendFile::open(&path).context(OpenFailedSnafu { path })?;
        Ok(Self {
            basename,
            roll_size,
            flush_interval_secs,
            check_every_n,
            lock: thread_safe.then(|| Mutex::new(())),
            inner: UnsafeCell::new(Inner {
                append_counter: 0,
                period_start: period_start(now),
                last_roll: now,
                last_flush: now,
                file,
            }),
        })
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        match &self.lock {
            Some(mutex) => {
                let _guard = mutex.lock();
                // SAFETY: we hold the only lock guarding `inner`.
                f(unsafe { &mut *self.inner.get() })
            }
            None => {
                // SAFETY: construction-time contract, see `unsafe impl Sync` above.
                f(unsafe { &mut *self.inner.get() })
            }
        }
    }

    /// Appends `bytes`, locking internally if constructed thread-safe.
    pub fn append(&self, bytes: &[u8]) -> Result<(), RollError> {
        self.with_inner(|inner| self.append_unlocked(inner, bytes))
    }

    fn append_unlocked(&self, inner: &mut Inner, bytes: &[u8]) -> Result<(), RollError> {
        inner.file.append(bytes);

        if inner.file.written_bytes() >= self.roll_size {
            self.roll_unlocked(inner)?;
            return Ok(());
        }

        inner.append_counter += 1;
        if inner.append_counter >= self.check_every_n {
            inner.append_counter = 0;
            let now = now_unix_secs();
            let this_period = period_start(now);
            if this_period != inner.period_start {
                self.roll_unlocked(inner)?;
            } else if now - inner.last_flush >= self.flush_interval_secs {
                inner.file.flush();
                inner.last_flush = now;
            }
        }
        Ok(())
    }

    /// Forces the current file to the kernel.
    pub fn flush(&self) {
        self.with_inner(|inner| inner.file.flush());
    }

    /// Rolls to a freshly timestamped file. Returns `Ok(true)` if it rolled,
    /// `Ok(false)` if declined because of a monotone-clock regression.
    pub fn roll_file(&self) -> Result<bool, RollError> {
        self.with_inner(|inner| self.roll_unlocked(inner))
    }

    fn roll_unlocked(&self, inner: &mut Inner) -> Result<bool, RollError> {
        let now = now_unix_secs();
        if now <= inner.last_roll {
            return Ok(false);
        }

        let path = make_filename(&self.basename, now);
        let file = AppendFile::open(&path).context(RollOpenFailedSnafu { path: path.clone() })?;
        tracing::info!(target: "asynclog::log_file", path = %path.display(), "rolled log file");
        metrics::counter!("asynclog_rolls_total").increment(1);

        inner.file = file;
        inner.last_roll = now;
        inner.last_flush = now;
        inner.period_start = period_start(now);
        Ok(true)
    }
}

/// Roll period in seconds; re-exported for callers that reason about day
/// boundaries alongside [`LogFile`].
pub const fn roll_period_seconds() -> i64 {
    ROLL_PERIOD_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn appends_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let basename = dir.path().join("test");
        let log = LogFile::new(&basename, 1024 * 1024).unwrap();
        log.append(b"hello world\n").unwrap();
        log.flush();

        let mut found = Vec::new();
        for entry in fs::read_dir(dir.path()).unwrap() {
            let entry = entry.unwrap();
            found.push(fs::read(entry.path()).unwrap());
        }
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], b"hello world\n");
    }

    #[test]
    fn rolls_when_size_threshold_crossed() {
        let dir = tempfile::tempdir().unwrap();
        let basename = dir.path().join("test");
        let log = LogFile::new(&basename, 16).unwrap();
        log.append(b"0123456789012345678901234567890").unwrap(); // > 16 bytes

        let mut files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        files.sort_by_key(|e| e.as_ref().unwrap().path());
        // Rolling happens at most once per wall-clock second (monotone
        // guard), so immediately after one oversized append we may still
        // observe only the original file; what matters is total bytes match.
        let total: usize = files
            .into_iter()
            .map(|e| fs::read(e.unwrap().path()).unwrap().len())
            .sum();
        assert_eq!(total, 31);
    }

    #[test]
    fn exclusive_mode_skips_lock_but_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let basename = dir.path().join("test");
        let log = LogFile::new_exclusive(&basename, 1024 * 1024, 3, 1024).unwrap();
        log.append(b"abc").unwrap();
        log.flush();
        let entry = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap();
        assert_eq!(fs::read(entry.path()).unwrap(), b"abc");
    }
}
