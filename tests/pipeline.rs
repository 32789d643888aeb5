//! End-to-end tests against the public `asynclog` API: many producer
//! threads through one `AsyncLogging` pipeline onto disk.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use asynclog::AsyncLogging;
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn read_all_logs(dir: &Path) -> Vec<u8> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    let mut out = Vec::new();
    for path in entries {
        out.extend(fs::read(path).unwrap());
    }
    out
}

#[test]
fn multi_producer_threads_preserve_every_byte() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let basename = dir.path().join("multi");
    let log = Arc::new(AsyncLogging::new(&basename, 64 * 1024 * 1024));
    log.start();

    const THREADS: usize = 12;
    const RECORDS_PER_THREAD: usize = 500;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let log = Arc::clone(&log);
        handles.push(thread::spawn(move || {
            let marker = format!("T{t:02}-");
            for _ in 0..RECORDS_PER_THREAD {
                log.append(marker.as_bytes());
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    log.stop();

    let content = read_all_logs(dir.path());
    let text = String::from_utf8(content).unwrap();

    for t in 0..THREADS {
        let marker = format!("T{t:02}-");
        let count = text.matches(&marker).count();
        assert_eq!(
            count, RECORDS_PER_THREAD,
            "thread {t} lost or duplicated records"
        );
    }
}

#[test]
fn stopped_pipeline_observation_contains_every_prior_append() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let basename = dir.path().join("ack");
    let log = AsyncLogging::new(&basename, 16 * 1024 * 1024);
    log.start();

    let mut expected = Vec::new();
    for i in 0..5_000u32 {
        let line = format!("line-{i}\n");
        expected.extend_from_slice(line.as_bytes());
        log.append(line.as_bytes());
    }
    log.stop();

    let content = read_all_logs(dir.path());
    assert_eq!(content, expected);
}

#[test]
fn restarted_pipeline_reuses_buffers_without_growth() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let basename = dir.path().join("restart");

    for round in 0..3 {
        let log = AsyncLogging::new(&basename, 1024 * 1024);
        log.start();
        log.append(format!("round {round}\n").as_bytes());
        log.stop();
    }

    let content = read_all_logs(dir.path());
    let text = String::from_utf8(content).unwrap();
    for round in 0..3 {
        assert!(text.contains(&format!("round {round}\n")));
    }
}
