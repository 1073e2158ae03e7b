use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use logger::logger_sender::LoggerSender;

use crate::file_store::FileStore;
use crate::sha1::IncrementalSha1;

const HASH_READ_CHUNK: usize = 8 * 1024;
const HASHER_THREAD_NAME: &str = "Hasher";

/// Narrow view a `Torrent` exposes to the Hasher: enough to read a piece
/// back out of the FileStore and to be told the verification result.
/// Kept deliberately small so the Hasher never needs the Torrent's data
/// lock to do its work.
pub trait HashableTorrent: Send + Sync {
    fn info_hash(&self) -> [u8; 20];
    fn file_store(&self) -> Arc<FileStore>;
    fn piece_spans(&self, piece: u32) -> Vec<(String, u64, u64)>;
    fn expected_piece_hash(&self, piece: u32) -> [u8; 20];
    fn on_hash_complete(&self, piece: u32, ok: bool);
}

struct HashJob {
    torrent: Arc<dyn HashableTorrent>,
    piece: u32,
}

struct Queue {
    jobs: VecDeque<HashJob>,
    terminate: bool,
}

/// Single background worker shared by every torrent. Jobs are a FIFO of
/// `(torrent, piece_index)`; the worker reads the piece through the
/// FileStore in `8 KiB` chunks, feeds an incremental SHA-1, and reports
/// the verdict back to the torrent that enqueued it.
pub struct Hasher {
    queue: Arc<(Mutex<Queue>, Condvar)>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Hasher {
    pub fn new(logger: LoggerSender) -> Self {
        let queue = Arc::new((
            Mutex::new(Queue {
                jobs: VecDeque::new(),
                terminate: false,
            }),
            Condvar::new(),
        ));

        let worker_queue = Arc::clone(&queue);
        let worker = thread::Builder::new()
            .name(HASHER_THREAD_NAME.to_string())
            .spawn(move || Self::run(worker_queue, logger))
            .expect("failed to spawn hasher thread");

        Self {
            queue,
            worker: Some(worker),
        }
    }

    pub fn enqueue(&self, torrent: Arc<dyn HashableTorrent>, piece: u32) {
        let (lock, cvar) = &*self.queue;
        let mut queue = lock.lock().expect("hasher queue lock poisoned");
        queue.jobs.push_back(HashJob { torrent, piece });
        cvar.notify_one();
    }

    /// Removes every queued job belonging to `torrent`. Must be called,
    /// and observed to return, before that torrent's teardown completes.
    pub fn cancel_all(&self, torrent: &Arc<dyn HashableTorrent>) {
        let (lock, _) = &*self.queue;
        let mut queue = lock.lock().expect("hasher queue lock poisoned");
        queue
            .jobs
            .retain(|job| !Arc::ptr_eq(&job.torrent, torrent));
    }

    pub fn terminate(&mut self) {
        {
            let (lock, cvar) = &*self.queue;
            let mut queue = lock.lock().expect("hasher queue lock poisoned");
            queue.terminate = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn run(queue: Arc<(Mutex<Queue>, Condvar)>, logger: LoggerSender) {
        let (lock, cvar) = &*queue;
        loop {
            let job = {
                let mut guard = lock.lock().expect("hasher queue lock poisoned");
                loop {
                    if let Some(job) = guard.jobs.pop_front() {
                        break Some(job);
                    }
                    if guard.terminate {
                        break None;
                    }
                    guard = cvar.wait(guard).expect("hasher queue wait poisoned");
                }
            };

            let job = match job {
                Some(job) => job,
                None => return,
            };

            let ok = Self::verify(&job, &logger);
            job.torrent.on_hash_complete(job.piece, ok);
        }
    }

    fn verify(job: &HashJob, logger: &LoggerSender) -> bool {
        let store = job.torrent.file_store();
        let expected = job.torrent.expected_piece_hash(job.piece);
        let spans = job.torrent.piece_spans(job.piece);

        let mut incremental = IncrementalSha1::new();
        for (path, offset, len) in spans {
            let mut remaining = len;
            let mut pos = offset;
            while remaining > 0 {
                let take = remaining.min(HASH_READ_CHUNK as u64) as usize;
                match store.read(&path, pos, take) {
                    Ok(bytes) => incremental.feed(&bytes),
                    Err(e) => {
                        logger.error(&format!(
                            "hasher: failed reading piece {} of {:?}: {}",
                            job.piece,
                            job.torrent.info_hash(),
                            e
                        ));
                        return false;
                    }
                }
                pos += take as u64;
                remaining -= take as u64;
            }
        }

        incremental.finish() == expected
    }
}

impl Drop for Hasher {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct FakeTorrent {
        store: Arc<FileStore>,
        expected: [u8; 20],
        result_tx: Mutex<mpsc::Sender<(u32, bool)>>,
    }

    impl HashableTorrent for FakeTorrent {
        fn info_hash(&self) -> [u8; 20] {
            [0; 20]
        }
        fn file_store(&self) -> Arc<FileStore> {
            Arc::clone(&self.store)
        }
        fn piece_spans(&self, _piece: u32) -> Vec<(String, u64, u64)> {
            vec![("piece.bin".to_string(), 0, 16384)]
        }
        fn expected_piece_hash(&self, _piece: u32) -> [u8; 20] {
            self.expected
        }
        fn on_hash_complete(&self, piece: u32, ok: bool) {
            let _ = self.result_tx.lock().unwrap().send((piece, ok));
        }
    }

    fn make_logger() -> LoggerSender {
        let (tx, _rx) = mpsc::channel();
        LoggerSender::new(tx)
    }

    #[test]
    fn verifies_a_correct_piece() {
        let dir = std::env::temp_dir().join(format!("hasher-test-ok-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(FileStore::new(dir.clone(), 4));
        store.prepare("piece.bin", 16384).unwrap();
        let data = vec![0xABu8; 16384];
        store.write("piece.bin", 0, &data).unwrap();
        let expected = crate::sha1::sha1_bytes(&data);

        let (tx, rx) = mpsc::channel();
        let torrent: Arc<dyn HashableTorrent> = Arc::new(FakeTorrent {
            store,
            expected,
            result_tx: Mutex::new(tx),
        });

        let hasher = Hasher::new(make_logger());
        hasher.enqueue(Arc::clone(&torrent), 0);

        let (piece, ok) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(piece, 0);
        assert!(ok);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cancel_all_drops_queued_jobs_for_a_torrent() {
        let dir = std::env::temp_dir().join(format!("hasher-test-cancel-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(FileStore::new(dir.clone(), 4));
        store.prepare("piece.bin", 16384).unwrap();

        let (tx, rx) = mpsc::channel();
        let torrent: Arc<dyn HashableTorrent> = Arc::new(FakeTorrent {
            store,
            expected: [0; 20],
            result_tx: Mutex::new(tx),
        });

        let hasher = Hasher::new(make_logger());
        // Cancel before it ever runs by racing isn't deterministic in a unit
        // test; instead verify cancel_all empties a queue we control directly.
        hasher.enqueue(Arc::clone(&torrent), 0);
        hasher.cancel_all(&torrent);

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
