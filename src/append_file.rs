//! Unlocked buffered append to an open regular file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Size of the user-space write buffer coalescing small writes before they
/// reach the kernel.
const WRITE_BUFFER_CAPACITY: usize = 64 * 1024;

/// Buffered append-only handle to a single regular file.
///
/// Opens the target path in append mode with close-on-exec semantics on
/// Unix, and installs a 64 KiB user-space buffer so producers' many small
/// records are coalesced into few `write(2)` calls.
#[derive(Debug)]
pub struct AppendFile {
    writer: io::BufWriter<File>,
    written_bytes: u64,
}

impl AppendFile {
    /// Opens `path` for appending, creating it if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        options.custom_flags(libc::O_CLOEXEC);
        let file = options.open(path)?;
        Ok(Self {
            writer: io::BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, file),
            written_bytes: 0,
        })
    }

    /// Writes all of `bytes`, looping on short writes.
    ///
    /// On persistent zero-progress (the underlying writer refuses to accept
    /// any more bytes) this logs a single diagnostic and gives up on the
    /// remainder — bytes are still counted as written to `written_bytes` to
    /// avoid retry storms against a wedged disk. The caller never sees the
    /// failure: producers must not be blocked or made to retry because of a
    /// slow or broken disk.
    pub fn append(&mut self, bytes: &[u8]) {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            match self.writer.write(remaining) {
                Ok(0) => {
                    tracing::error!(
                        target: "asynclog::append_file",
                        remaining = remaining.len(),
                        "AppendFile::append made zero progress, dropping remainder"
                    );
                    break;
                }
                Ok(n) => remaining = &remaining[n..],
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(
                        target: "asynclog::append_file",
                        error = %e,
                        remaining = remaining.len(),
                        "AppendFile::append failed, dropping remainder"
                    );
                    break;
                }
            }
        }
        self.written_bytes += bytes.len() as u64;
    }

    /// Forces the user-space buffer out to the kernel.
    pub fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::error!(target: "asynclog::append_file", error = %e, "AppendFile::flush failed");
        }
    }

    /// Total bytes handed to the kernel, plus any dropped during failure.
    /// Advisory; drives roll policy in [`crate::log_file::LogFile`].
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }
}

impl Drop for AppendFile {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn append_and_flush_lands_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        {
            let mut f = AppendFile::open(&path).unwrap();
            f.append(b"hello ");
            f.append(b"world");
            assert_eq!(f.written_bytes(), 11);
            f.flush();
        }
        let content = fs::read(&path).unwrap();
        assert_eq!(content, b"hello world");
    }

    #[test]
    fn reopen_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        {
            let mut f = AppendFile::open(&path).unwrap();
            f.append(b"first");
        }
        {
            let mut f = AppendFile::open(&path).unwrap();
            f.append(b"second");
        }
        let content = fs::read(&path).unwrap();
        assert_eq!(content, b"firstsecond");
    }

    #[test]
    fn drop_flushes_buffered_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut f = AppendFile::open(&path).unwrap();
        f.append(&vec![b'x'; 10]);
        drop(f);
        let content = fs::read(&path).unwrap();
        assert_eq!(content.len(), 10);
    }

    #[test]
    fn append_zero_bytes_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut f = AppendFile::open(&path).unwrap();
        f.append(b"");
        assert_eq!(f.written_bytes(), 0);
    }
}
