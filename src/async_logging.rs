//! The double-buffered producer/consumer pipeline: many producer threads
//! append into a shared pair of buffers; one dedicated consumer thread
//! drains full buffers onto a rolling [`LogFile`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::fixed_buffer::FixedBuffer;
use crate::log_file::LogFile;

/// Default minimum wall-clock seconds between forced flushes, and the
/// condition-variable wait timeout while idle.
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 3;
/// Default appends between [`LogFile`] size/day checkpoints.
const DEFAULT_CHECK_EVERY_N: u32 = 1024;
/// Above this many queued buffers, the consumer drops all but the oldest
/// two and records a warning line (spec's overflow / back-pressure policy).
const OVERFLOW_THRESHOLD: usize = 25;
/// Buffers retained after an overflow drop, and the steady-state cap on
/// buffers carried across consumer passes.
const RETAINED_BUFFERS: usize = 2;
/// Reserved capacity of the full-buffer queue, mirroring the original's
/// `buffers_.reserve(16)`.
const QUEUE_RESERVE: usize = 16;

static ABORT_ON_PANIC_HOOK: Once = Once::new();

/// Installs a process-wide panic hook that runs the previous hook and then
/// aborts. The consumer thread is detached and alone owns the buffers
/// awaiting write, so an unwind there (whether from one of this module's own
/// `expect()`s or any future bug) must take the whole process down rather
/// than leave a dead consumer and an unbounded, never-drained `full_queue`
/// behind it — spec's "Consumer thread panic/abort: terminates the
/// process." Installed at most once per process, before the first consumer
/// thread is spawned.
fn install_abort_on_panic_hook() {
    ABORT_ON_PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            std::process::abort();
        }));
    });
}

/// A one-shot countdown latch: `wait` blocks until `count_down` has been
/// called `count` times.
struct CountdownLatch {
    remaining: Mutex<u32>,
    reached_zero: Condvar,
}

impl CountdownLatch {
    fn new(count: u32) -> Self {
        Self {
            remaining: Mutex::new(count),
            reached_zero: Condvar::new(),
        }
    }

    fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.reached_zero.notify_all();
            }
        }
    }

    fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.reached_zero.wait(&mut remaining);
        }
    }
}

struct SharedState {
    current: Box<FixedBuffer>,
    spare: Option<Box<FixedBuffer>>,
    full_queue: VecDeque<Box<FixedBuffer>>,
}

struct Shared {
    basename: PathBuf,
    roll_size: u64,
    flush_interval_secs: u64,
    check_every_n: u32,
    state: Mutex<SharedState>,
    not_empty: Condvar,
    running: AtomicBool,
    bytes_written: AtomicU64,
    latch: CountdownLatch,
}

/// The asynchronous, double-buffered logging front end.
///
/// Producer threads call [`append`](Self::append); a single dedicated
/// consumer thread, started by [`start`](Self::start), drains full buffers
/// onto a rolling [`LogFile`] built from `basename`.
pub struct AsyncLogging {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncLogging {
    /// Constructs a pipeline targeting `basename`, rolling the underlying
    /// log file once it reaches `roll_size` bytes (or a UTC day boundary is
    /// crossed). Default flush interval is 3 seconds.
    pub fn new(basename: impl Into<PathBuf>, roll_size: u64) -> Self {
        let shared = Shared {
            basename: basename.into(),
            roll_size,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            check_every_n: DEFAULT_CHECK_EVERY_N,
            state: Mutex::new(SharedState {
                current: Box::new(FixedBuffer::new()),
                spare: Some(Box::new(FixedBuffer::new())),
                full_queue: VecDeque::with_capacity(QUEUE_RESERVE),
            }),
            not_empty: Condvar::new(),
            running: AtomicBool::new(false),
            bytes_written: AtomicU64::new(0),
            latch: CountdownLatch::new(1),
        };
        Self {
            shared: Arc::new(shared),
            consumer: Mutex::new(None),
        }
    }

    /// Overrides the flush interval (seconds). Must be called before
    /// [`start`](Self::start).
    pub fn with_flush_interval(mut self, secs: u64) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("with_flush_interval called after start")
            .flush_interval_secs = secs.max(1);
        self
    }

    /// Overrides how many appends elapse between size/day checkpoints in
    /// the underlying [`LogFile`]. Must be called before
    /// [`start`](Self::start).
    pub fn with_check_every_n(mut self, n: u32) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("with_check_every_n called after start")
            .check_every_n = n;
        self
    }

    /// Starts the consumer thread and blocks until it has begun running,
    /// so that `append` can never race its initial state.
    pub fn start(&self) {
        install_abort_on_panic_hook();
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("asynclog-consumer".to_string())
            .spawn(move || consumer_loop(shared))
            .expect("failed to spawn asynclog consumer thread");
        *self.consumer.lock() = Some(handle);
        self.shared.latch.wait();
    }

    /// Stops the consumer thread, letting it finish its current drain cycle
    /// and final flush before returning. Idempotent.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.not_empty.notify_one();
        if let Some(handle) = self.consumer.lock().take() {
            handle.join().expect("asynclog consumer thread panicked");
        }
    }

    /// Delivers one already-formatted record. Bytes are copied into the
    /// current front buffer under a short mutex section; producers never
    /// wait on I/O.
    ///
    /// `bytes.len()` must be at most [`crate::fixed_buffer::CAPACITY`] — a
    /// precondition enforced by the caller's record formatter, not this
    /// function (see spec's Open Question on record truncation).
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let mut state = self.shared.state.lock();
        if state.current.available() > bytes.len() {
            state.current.append(bytes);
            return;
        }

        let promoted = state
            .spare
            .take()
            .unwrap_or_else(|| Box::new(FixedBuffer::new()));
        let full = std::mem::replace(&mut state.current, promoted);
        state.full_queue.push_back(full);
        state.current.append(bytes);
        metrics::counter!("asynclog_buffers_queued_total").increment(1);
        drop(state);

        self.shared.not_empty.notify_one();
    }

    /// Number of full buffers currently awaiting the consumer. Advisory,
    /// for health checks; racy by construction.
    pub fn buffers_queued(&self) -> usize {
        self.shared.state.lock().full_queue.len()
    }

    /// Total bytes the consumer thread has handed to the underlying
    /// [`LogFile`]. Advisory, for health checks.
    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::Relaxed)
    }
}

impl Drop for AsyncLogging {
    fn drop(&mut self) {
        if self.shared.running.load(Ordering::Acquire) {
            self.stop();
        }
    }
}

/// Aborts the process. Used for failures the consumer thread cannot
/// recover from (e.g. it alone owns the buffers awaiting write). A panic
/// on this detached thread would otherwise unwind silently without taking
/// the rest of the process down with it.
fn consumer_fatal(context: &str, error: &dyn std::fmt::Display) -> ! {
    tracing::error!(target: "asynclog::async_logging", %error, "{context}, aborting process");
    std::process::abort();
}

/// Applies the overflow / back-pressure policy to a batch about to be
/// written: above [`OVERFLOW_THRESHOLD`] buffers, drop all but the oldest
/// [`RETAINED_BUFFERS`] and record a warning line both on standard error and
/// in-band in `log_file`. Used by every drain pass — the steady-state one
/// and the final pass on loop exit — so the buffer-count bound holds
/// regardless of which pass observes the overflow.
fn drop_overflow(to_write: &mut Vec<Box<FixedBuffer>>, log_file: &LogFile) {
    if to_write.len() > OVERFLOW_THRESHOLD {
        let dropped = to_write.len() - RETAINED_BUFFERS;
        let warning = format!(
            "Dropped log messages at {}, {} larger buffers\n",
            Utc::now().format("%Y/%m/%d %H:%M:%S%.6f"),
            dropped
        );
        eprint!("{warning}");
        log_file
            .append(warning.as_bytes())
            .unwrap_or_else(|e| consumer_fatal("failed to record overflow warning", &e));
        to_write.truncate(RETAINED_BUFFERS);
        metrics::counter!("asynclog_buffers_dropped_total").increment(dropped as u64);
    }
}

fn consumer_loop(shared: Arc<Shared>) {
    shared.latch.count_down();

    let log_file = LogFile::new_exclusive(
        &shared.basename,
        shared.roll_size,
        shared.flush_interval_secs as i64,
        shared.check_every_n,
    )
    .unwrap_or_else(|e| consumer_fatal("failed to open initial log file", &e));

    let mut new1 = Some(Box::new(FixedBuffer::new()));
    let mut new2 = Some(Box::new(FixedBuffer::new()));
    let mut to_write: Vec<Box<FixedBuffer>> = Vec::with_capacity(QUEUE_RESERVE);

    while shared.running.load(Ordering::Acquire) {
        debug_assert!(to_write.is_empty());

        {
            let mut state: MutexGuard<'_, SharedState> = shared.state.lock();
            if state.full_queue.is_empty() {
                shared.not_empty.wait_for(
                    &mut state,
                    Duration::from_secs(shared.flush_interval_secs),
                );
                // Spurious wakeups and timeouts are handled identically:
                // we fall through and drain whatever is there, even if
                // that's just the (possibly empty) current buffer.
            }

            let promoted = new1.take().expect("new1 present at top of loop");
            let old_current = std::mem::replace(&mut state.current, promoted);
            state.full_queue.push_back(old_current);
            to_write.extend(state.full_queue.drain(..));
            if state.spare.is_none() {
                state.spare = new2.take();
            }
        }

        drop_overflow(&mut to_write, &log_file);

        let mut batch_bytes: u64 = 0;
        for buffer in &to_write {
            log_file
                .append(buffer.data())
                .unwrap_or_else(|e| consumer_fatal("failed to append to log file", &e));
            batch_bytes += buffer.length() as u64;
        }
        metrics::counter!("asynclog_buffers_written_total").increment(to_write.len() as u64);
        metrics::counter!("asynclog_bytes_written_total").increment(batch_bytes);
        shared.bytes_written.fetch_add(batch_bytes, Ordering::Relaxed);

        if to_write.len() > RETAINED_BUFFERS {
            to_write.truncate(RETAINED_BUFFERS);
        }

        if new1.is_none() {
            let mut buffer = to_write.pop().expect("a retained buffer is available for new1");
            buffer.reset();
            new1 = Some(buffer);
        }
        if new2.is_none() {
            let mut buffer = to_write.pop().expect("a retained buffer is available for new2");
            buffer.reset();
            new2 = Some(buffer);
        }
        to_write.clear();

        log_file.flush();
    }

    // Final drain: running has flipped false, but whatever producers
    // already committed before `stop()` was called must still reach disk,
    // under the same protocol as every other pass — including the overflow
    // policy, so a burst immediately followed by `stop()` can't leave more
    // than the steady-state bound of buffers written untruncated.
    let mut final_batch = {
        let mut state = shared.state.lock();
        let mut batch: Vec<Box<FixedBuffer>> = state.full_queue.drain(..).collect();
        let current = std::mem::replace(&mut state.current, Box::new(FixedBuffer::new()));
        batch.push(current);
        batch
    };
    drop_overflow(&mut final_batch, &log_file);

    let mut final_bytes: u64 = 0;
    for buffer in &final_batch {
        log_file
            .append(buffer.data())
            .unwrap_or_else(|e| consumer_fatal("failed to append during final drain", &e));
        final_bytes += buffer.length() as u64;
    }
    metrics::counter!("asynclog_bytes_written_total").increment(final_bytes);
    shared.bytes_written.fetch_add(final_bytes, Ordering::Relaxed);
    log_file.flush();
}
