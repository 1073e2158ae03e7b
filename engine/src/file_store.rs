use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use lru::LruCache;

use crate::error::IoError;

/// One payload file of a torrent, opened once and kept in the pool.
struct OpenFile {
    handle: Mutex<File>,
    /// Set at open time: the file pre-existed with the exact expected
    /// length, so Torrent should schedule hashing instead of assuming
    /// the file is empty.
    reopened: bool,
}

/// Fixed-size pool of open file handles backing a torrent's payload
/// files, addressed by relative path. `read`/`write` operate on a single
/// byte-space per file; spanning across files is the Torrent's job.
///
/// When the pool exceeds `max_open_files`, the least-recently-used
/// handle is closed to make room, mirroring the cache discipline used
/// elsewhere in the pack via the `lru` crate.
pub struct FileStore {
    root: PathBuf,
    pool: RwLock<LruCache<PathBuf, OpenFile>>,
}

impl FileStore {
    pub fn new(root: PathBuf, max_open_files: usize) -> Self {
        let capacity = NonZeroUsize::new(max_open_files.max(1)).expect("max_open_files > 0");
        Self {
            root,
            pool: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Opens (or creates, truncating on length mismatch) the file at
    /// `relative_path` sized to `expected_len`, recording whether it was
    /// reopened with a matching length.
    pub fn prepare(&self, relative_path: &str, expected_len: u64) -> Result<bool, IoError> {
        let full_path = self.root.join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|e| IoError::Open {
                path: full_path.display().to_string(),
                cause: e.to_string(),
            })?;
        }

        let existing_len = fs::metadata(&full_path).ok().map(|m| m.len());
        let reopened = existing_len == Some(expected_len);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(!reopened && existing_len.is_some())
            .open(&full_path)
            .map_err(|e| IoError::Open {
                path: full_path.display().to_string(),
                cause: e.to_string(),
            })?;

        if !reopened {
            file.set_len(expected_len).map_err(|e| IoError::Open {
                path: full_path.display().to_string(),
                cause: e.to_string(),
            })?;
        }

        let mut pool = self.pool.write().expect("file pool lock poisoned");
        pool.put(
            full_path,
            OpenFile {
                handle: Mutex::new(file),
                reopened,
            },
        );
        Ok(reopened)
    }

    pub fn was_reopened(&self, relative_path: &str) -> bool {
        let full_path = self.root.join(relative_path);
        let pool = self.pool.read().expect("file pool lock poisoned");
        pool.peek(&full_path).map(|f| f.reopened).unwrap_or(false)
    }

    pub fn read(&self, relative_path: &str, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        let full_path = self.root.join(relative_path);
        self.with_handle(&full_path, |file| {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Self::seek_error(&full_path, e))?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)
                .map_err(|e| Self::io_error(&full_path, e))?;
            Ok(buf)
        })
    }

    pub fn write(&self, relative_path: &str, offset: u64, data: &[u8]) -> Result<(), IoError> {
        let full_path = self.root.join(relative_path);
        self.with_handle(&full_path, |file| {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Self::seek_error(&full_path, e))?;
            file.write_all(data)
                .map_err(|e| Self::io_error(&full_path, e))?;
            Ok(())
        })
    }

    fn with_handle<T>(
        &self,
        full_path: &Path,
        op: impl FnOnce(&mut File) -> Result<T, IoError>,
    ) -> Result<T, IoError> {
        // `get_mut`, not `peek`: touching a handle must refresh its LRU
        // recency or a hot file can still be evicted out from under it.
        let mut pool = self.pool.write().expect("file pool lock poisoned");
        let entry = pool.get_mut(full_path).ok_or_else(|| IoError::Open {
            path: full_path.display().to_string(),
            cause: "file not prepared".into(),
        })?;
        let mut file = entry.handle.lock().expect("file handle lock poisoned");
        op(&mut file)
    }

    fn seek_error(path: &Path, e: std::io::Error) -> IoError {
        IoError::Seek {
            path: path.display().to_string(),
            cause: e.to_string(),
        }
    }

    fn io_error(path: &Path, e: std::io::Error) -> IoError {
        IoError::ReadWrite {
            path: path.display().to_string(),
            cause: e.to_string(),
        }
    }
}

/// Maps a byte range of the torrent's concatenated payload to the
/// (relative_path, offset, length) spans it touches, in order, so a
/// chunk that straddles a file boundary is written/read piecewise.
pub fn spans_for_range<'a>(
    files: &'a [(String, u64)],
    mut start: u64,
    mut len: u64,
) -> Vec<(&'a str, u64, u64)> {
    let mut spans = Vec::new();
    let mut file_start = 0u64;

    for (path, file_len) in files {
        let file_end = file_start + file_len;
        if start < file_end && len > 0 {
            let within_file_offset = start.saturating_sub(file_start);
            let available = file_end - file_start - within_file_offset;
            let take = available.min(len);
            if take > 0 {
                spans.push((path.as_str(), within_file_offset, take));
                start += take;
                len -= take;
            }
        }
        file_start = file_end;
        if len == 0 {
            break;
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_creates_missing_file_and_reports_not_reopened() {
        let dir = std::env::temp_dir().join(format!("filestore-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let store = FileStore::new(dir.clone(), 4);

        let reopened = store.prepare("hello.bin", 16384).unwrap();
        assert!(!reopened);
        assert!(store.was_reopened("hello.bin") == false);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("filestore-test-rw-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let store = FileStore::new(dir.clone(), 4);

        store.prepare("a.bin", 10).unwrap();
        store.write("a.bin", 2, b"hello").unwrap();
        let back = store.read("a.bin", 2, 5).unwrap();
        assert_eq!(back, b"hello");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn lru_evicts_oldest_handle_when_pool_is_full() {
        let dir = std::env::temp_dir().join(format!("filestore-test-lru-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let store = FileStore::new(dir.clone(), 2);

        store.prepare("a.bin", 4).unwrap();
        store.prepare("b.bin", 4).unwrap();
        store.prepare("c.bin", 4).unwrap();

        // "a.bin" was least-recently-used and should have been evicted.
        assert!(store.read("a.bin", 0, 4).is_err());
        assert!(store.read("c.bin", 0, 4).is_ok());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reading_a_handle_refreshes_its_lru_recency() {
        let dir = std::env::temp_dir().join(format!("filestore-test-lru-touch-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let store = FileStore::new(dir.clone(), 2);

        store.prepare("a.bin", 4).unwrap();
        store.prepare("b.bin", 4).unwrap();
        // Touch "a.bin" so it is no longer the least-recently-used entry,
        // even though "b.bin" was prepared after it.
        store.read("a.bin", 0, 4).unwrap();
        store.prepare("c.bin", 4).unwrap();

        // "b.bin" was least-recently-used and should have been evicted instead.
        assert!(store.read("a.bin", 0, 4).is_ok());
        assert!(store.read("b.bin", 0, 4).is_err());
        assert!(store.read("c.bin", 0, 4).is_ok());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn spans_for_range_straddles_two_files() {
        let files: Vec<(String, u64)> = vec![("a".into(), 10000), ("b".into(), 30000)];
        let spans = spans_for_range(&files, 0, 16384);
        assert_eq!(spans, vec![("a", 0, 10000), ("b", 0, 6384)]);
    }

    #[test]
    fn spans_for_range_single_file() {
        let files: Vec<(String, u64)> = vec![("a".into(), 100)];
        let spans = spans_for_range(&files, 10, 20);
        assert_eq!(spans, vec![("a", 10, 20)]);
    }

}
