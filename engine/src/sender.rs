use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::peer::PeerHandle;

const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Writable side of the engine. Unlike the Receiver, peer sockets are
/// already non-blocking and `Peer::drain_send_queue` already stops at
/// `WouldBlock`, so this does not need its own readiness multiplexer:
/// it only needs to decide *which* peer to write to next and *how much*,
/// which is the upload token bucket's job. `upload_rate_bytes_per_sec`
/// of 0 means unlimited, matching the config default.
pub struct Sender {
    upload_rate_bytes_per_sec: AtomicU64,
    tokens: AtomicU64,
    idle_lock: Mutex<()>,
    signal: Condvar,
}

impl Sender {
    pub fn new(upload_rate_bytes_per_sec: u64) -> Self {
        Self {
            upload_rate_bytes_per_sec: AtomicU64::new(upload_rate_bytes_per_sec),
            tokens: AtomicU64::new(upload_rate_bytes_per_sec),
            idle_lock: Mutex::new(()),
            signal: Condvar::new(),
        }
    }

    fn is_rate_limited(&self) -> bool {
        self.upload_rate_bytes_per_sec.load(Ordering::Relaxed) > 0
    }

    /// Called once a second by the bandwidth thread to top the bucket
    /// back up and wake a possibly-stalled writer.
    pub fn refill(&self) {
        let rate = self.upload_rate_bytes_per_sec.load(Ordering::Relaxed);
        self.tokens.store(rate, Ordering::Relaxed);
        self.signal.notify_all();
    }

    /// Lets a peer's own `queue_frame` caller nudge the writer awake
    /// instead of waiting out the idle timeout.
    pub fn notify_queued(&self) {
        self.signal.notify_all();
    }

    pub fn set_upload_rate(&self, rate: u64) {
        self.upload_rate_bytes_per_sec.store(rate, Ordering::Relaxed);
    }

    /// One pass over every peer with pending output, in random order so
    /// no single peer starves the others under a tight token budget.
    /// Returns the number of peers that still have output queued after
    /// the pass (either rate-limited or only partially drained).
    pub fn drain_once(&self, peers: &[PeerHandle]) -> usize {
        let mut candidates: Vec<&PeerHandle> = peers
            .iter()
            .filter(|p| !p.is_shutting_down() && p.has_queued_output())
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        for peer in &candidates {
            if self.is_rate_limited() && self.tokens.load(Ordering::Relaxed) == 0 {
                continue;
            }

            let budget = if self.is_rate_limited() {
                Some(self.tokens.load(Ordering::Relaxed))
            } else {
                None
            };

            match peer.drain_send_queue(budget) {
                Ok(written) => {
                    if self.is_rate_limited() && written > 0 {
                        self.tokens.fetch_sub(
                            written.min(self.tokens.load(Ordering::Relaxed)),
                            Ordering::Relaxed,
                        );
                    }
                }
                Err(_) => peer.mark_shutting_down(),
            }
        }

        candidates
            .iter()
            .filter(|p| !p.is_shutting_down() && p.has_queued_output())
            .count()
    }

    /// Runs until `terminate` is set. `peers` is re-fetched on every
    /// iteration since the Overseer's peer roster changes as connections
    /// come and go; a short idle wait keeps the loop from busy-spinning
    /// while still reacting quickly once something is queued.
    pub fn run(&self, terminate: &AtomicBool, peers: impl Fn() -> Vec<PeerHandle>) {
        while !terminate.load(Ordering::SeqCst) {
            let snapshot = peers();
            let still_pending = self.drain_once(&snapshot);

            if still_pending == 0 {
                let guard = self.idle_lock.lock().expect("sender idle lock poisoned");
                let _ = self.signal.wait_timeout(guard, IDLE_WAIT);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Peer, PeerMessage, TorrentCallbacks};
    use mio::net::TcpStream;
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
    use std::sync::{Arc, Weak};

    struct NullTorrent;
    impl TorrentCallbacks for NullTorrent {
        fn num_pieces(&self) -> u32 {
            1
        }
        fn chunk_size(&self) -> u32 {
            16384
        }
        fn on_bitfield(&self, _peer: &PeerHandle, _bitfield: &crate::bitfield::Bitfield) {}
        fn on_have(&self, _peer: &PeerHandle, _index: u32) {}
        fn on_choke_received(&self, _peer: &PeerHandle) {}
        fn on_unchoke_received(&self, _peer: &PeerHandle) {}
        fn on_interested(&self, _peer: &PeerHandle) {}
        fn on_not_interested(&self, _peer: &PeerHandle) {}
        fn on_request(&self, _peer: &PeerHandle, _index: u32, _begin: u32, _length: u32) {}
        fn on_piece(&self, _peer: &PeerHandle, _index: u32, _begin: u32, _data: Vec<u8>) {}
        fn on_cancel(&self, _peer: &PeerHandle, _index: u32, _begin: u32, _length: u32) {}
    }

    fn make_peer_pair() -> (PeerHandle, Arc<dyn TorrentCallbacks>, StdTcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        client.set_nonblocking(true).unwrap();

        let torrent: Arc<dyn TorrentCallbacks> = Arc::new(NullTorrent);
        let weak: Weak<dyn TorrentCallbacks> = Arc::downgrade(&torrent);
        let peer = Arc::new(Peer::new(TcpStream::from_std(server), addr, 1, 128 * 1024, weak));
        (peer, torrent, client)
    }

    #[test]
    fn drains_a_queued_frame_to_the_socket() {
        let (peer, _torrent, mut client) = make_peer_pair();
        peer.queue_frame(&PeerMessage::Interested);

        let sender = Sender::new(0);
        let remaining = sender.drain_once(&[peer.clone()]);
        assert_eq!(remaining, 0);
        assert!(!peer.has_queued_output());

        use std::io::Read;
        let mut buf = [0u8; 5];
        client.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 1, 2]);
    }

    #[test]
    fn rate_limit_of_zero_tokens_stalls_the_peer() {
        let (peer, _torrent, _client) = make_peer_pair();
        peer.queue_frame(&PeerMessage::Interested);

        let sender = Sender::new(1);
        sender.tokens.store(0, Ordering::Relaxed);
        let remaining = sender.drain_once(&[peer.clone()]);
        assert_eq!(remaining, 1);
        assert!(peer.has_queued_output());
    }

    #[test]
    fn refill_restores_the_configured_rate() {
        let sender = Sender::new(32_768);
        sender.tokens.store(0, Ordering::Relaxed);
        sender.refill();
        assert_eq!(sender.tokens.load(Ordering::Relaxed), 32_768);
    }
}
