use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use mio::net::TcpStream;

use crate::bitfield::Bitfield;
use crate::error::ProtocolError;

use super::message::PeerMessage;

pub type PeerHandle = Arc<Peer>;

/// Callbacks a Peer invokes on its owning Torrent. Kept as a trait so
/// `peer.rs` does not depend on `torrent.rs` directly; `Torrent`
/// implements it. Every method receives the peer as an `Arc` so the
/// Torrent can look it up in its roster or clear bookkeeping by pointer
/// identity.
pub trait TorrentCallbacks: Send + Sync {
    fn num_pieces(&self) -> u32;
    fn chunk_size(&self) -> u32;
    fn on_bitfield(&self, peer: &PeerHandle, bitfield: &Bitfield);
    fn on_have(&self, peer: &PeerHandle, index: u32);
    fn on_choke_received(&self, peer: &PeerHandle);
    fn on_unchoke_received(&self, peer: &PeerHandle);
    fn on_interested(&self, peer: &PeerHandle);
    fn on_not_interested(&self, peer: &PeerHandle);
    fn on_request(&self, peer: &PeerHandle, index: u32, begin: u32, length: u32);
    fn on_piece(&self, peer: &PeerHandle, index: u32, begin: u32, data: Vec<u8>);
    fn on_cancel(&self, peer: &PeerHandle, index: u32, begin: u32, length: u32);
}

struct PeerInner {
    stream: TcpStream,

    am_choked: bool,
    am_interested: bool,
    peer_choked: bool,
    peer_interested: bool,

    have_piece: Bitfield,
    num_pieces_have: usize,
    first_message_seen: bool,

    /// Chunks we have requested but not yet received: `(piece, begin, length)`.
    outstanding: VecDeque<(u32, u32, u32)>,
    /// Encoded frames (and upload payload jobs, already encoded) waiting
    /// to be written by the Sender.
    queued_to_send: VecDeque<Vec<u8>>,

    /// Growable receive buffer. The spec's hand-rolled circular buffer is
    /// an implementation choice the designer notes may be replaced by a
    /// streaming parser so long as a single frame stays within
    /// `max_frame_len`; this uses a `Vec` that is drained as frames
    /// complete.
    recv_buf: Vec<u8>,

    rx_bytes_tick: u64,
    tx_bytes_tick: u64,
    pub rx_rate: u64,
    pub tx_rate: u64,
    last_rx_time: Instant,
}

/// One live TCP connection to a remote peer. Owns the framed-message
/// codec, handshake state, remote bitfield, outstanding-request
/// bookkeeping and per-second rate counters. `torrent` is a non-owning
/// back-reference; the Torrent tears every Peer down before it is
/// itself dropped.
pub struct Peer {
    pub addr: SocketAddr,
    pub handshaking: AtomicBool,
    pub shutting_down: AtomicBool,
    max_frame_len: usize,
    inner: Mutex<PeerInner>,
    torrent: std::sync::Weak<dyn TorrentCallbacks>,
}

impl Peer {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        num_pieces: u32,
        max_frame_len: usize,
        torrent: std::sync::Weak<dyn TorrentCallbacks>,
    ) -> Self {
        Self {
            addr,
            handshaking: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            max_frame_len,
            inner: Mutex::new(PeerInner {
                stream,
                am_choked: true,
                am_interested: false,
                peer_choked: true,
                peer_interested: false,
                have_piece: Bitfield::zeroed(num_pieces as usize),
                num_pieces_have: 0,
                first_message_seen: false,
                outstanding: VecDeque::new(),
                queued_to_send: VecDeque::new(),
                recv_buf: Vec::new(),
                rx_bytes_tick: 0,
                tx_bytes_tick: 0,
                rx_rate: 0,
                tx_rate: 0,
                last_rx_time: Instant::now(),
            }),
            torrent,
        }
    }

    pub fn am_choked(&self) -> bool {
        self.inner.lock().expect("peer lock poisoned").am_choked
    }

    pub fn peer_interested(&self) -> bool {
        self.inner.lock().expect("peer lock poisoned").peer_interested
    }

    /// Whether we currently choke this peer (the upload direction).
    pub fn peer_choked(&self) -> bool {
        self.inner.lock().expect("peer lock poisoned").peer_choked
    }

    /// Sets the upload-direction choke flag and queues the matching frame.
    /// Returns `false` if the flag already had this value (no frame sent).
    pub fn set_peer_choked(&self, value: bool) -> bool {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        if inner.peer_choked == value {
            return false;
        }
        inner.peer_choked = value;
        let message = if value { PeerMessage::Choke } else { PeerMessage::Unchoke };
        inner.queued_to_send.push_back(message.encode());
        true
    }

    pub fn am_interested(&self) -> bool {
        self.inner.lock().expect("peer lock poisoned").am_interested
    }

    /// Sets our interest in this peer's pieces, queuing the matching frame
    /// only when the flag actually changes.
    pub fn set_am_interested(&self, value: bool) -> bool {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        if inner.am_interested == value {
            return false;
        }
        inner.am_interested = value;
        let message = if value { PeerMessage::Interested } else { PeerMessage::NotInterested };
        inner.queued_to_send.push_back(message.encode());
        true
    }

    pub fn rates(&self) -> (u64, u64) {
        let inner = self.inner.lock().expect("peer lock poisoned");
        (inner.rx_rate, inner.tx_rate)
    }

    /// Removes a queued, not-yet-sent `piece` frame matching `(index, begin)`,
    /// honoring an incoming `cancel`. Best-effort: a frame already handed to
    /// the socket cannot be recalled.
    pub fn cancel_queued_piece(&self, index: u32, begin: u32) -> bool {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        let before = inner.queued_to_send.len();
        inner.queued_to_send.retain(|frame| !Self::is_matching_piece_frame(frame, index, begin));
        inner.queued_to_send.len() != before
    }

    fn is_matching_piece_frame(frame: &[u8], index: u32, begin: u32) -> bool {
        // <4:len><1:id=7><4:index><4:begin>...
        if frame.len() < 4 + 1 + 4 + 4 || frame[4] != 7 {
            return false;
        }
        let frame_index = u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]);
        let frame_begin = u32::from_be_bytes([frame[9], frame[10], frame[11], frame[12]]);
        frame_index == index && frame_begin == begin
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.inner.lock().expect("peer lock poisoned").have_piece.has(index)
    }

    pub fn has_all_pieces(&self) -> bool {
        self.inner.lock().expect("peer lock poisoned").have_piece.is_complete()
    }

    pub fn is_interesting(&self, have_piece: &Bitfield) -> bool {
        let inner = self.inner.lock().expect("peer lock poisoned");
        (0..have_piece.len() as u32).any(|i| inner.have_piece.has(i) && !have_piece.has(i))
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.lock().expect("peer lock poisoned").outstanding.len()
    }

    pub fn queue_frame(&self, message: &PeerMessage) {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        inner.queued_to_send.push_back(message.encode());
    }

    pub fn queue_raw(&self, bytes: Vec<u8>) {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        inner.queued_to_send.push_back(bytes);
    }

    pub fn has_queued_output(&self) -> bool {
        !self.inner.lock().expect("peer lock poisoned").queued_to_send.is_empty()
    }

    pub fn record_request_sent(&self, index: u32, begin: u32, length: u32) {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        inner.outstanding.push_back((index, begin, length));
        inner.queued_to_send.push_back(
            PeerMessage::Request { index, begin, length }.encode(),
        );
    }

    /// Clears outstanding requests, e.g. on `choke` received or on
    /// connection teardown, so other peers may be asked for those chunks.
    pub fn clear_outstanding(&self) -> Vec<(u32, u32, u32)> {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        inner.outstanding.drain(..).collect()
    }

    pub fn cancel_outstanding(&self, index: u32, begin: u32, length: u32) {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        inner.outstanding.retain(|&(i, b, _)| !(i == index && b == begin));
        inner.queued_to_send.push_back(
            PeerMessage::Cancel { index, begin, length }.encode(),
        );
    }

    pub fn snapshot_and_reset_rate(&self) -> (u64, u64) {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        inner.rx_rate = inner.rx_bytes_tick;
        inner.tx_rate = inner.tx_bytes_tick;
        inner.rx_bytes_tick = 0;
        inner.tx_bytes_tick = 0;
        (inner.rx_rate, inner.tx_rate)
    }

    pub fn is_snubbed(&self, snub_timeout_secs: u64) -> bool {
        let inner = self.inner.lock().expect("peer lock poisoned");
        inner.last_rx_time.elapsed().as_secs() >= snub_timeout_secs
    }

    pub fn is_dead(&self, kick_timeout_secs: u64) -> bool {
        let inner = self.inner.lock().expect("peer lock poisoned");
        inner.last_rx_time.elapsed().as_secs() >= kick_timeout_secs
    }

    /// Called by the Sender's writable-readiness loop. Writes as many
    /// queued bytes as `token_budget` allows (or unbounded when `None`),
    /// returning the number of bytes actually written.
    pub fn drain_send_queue(&self, token_budget: Option<u64>) -> std::io::Result<u64> {
        use std::io::Write;
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        let mut written = 0u64;
        while let Some(front) = inner.queued_to_send.front() {
            if let Some(budget) = token_budget {
                if written >= budget {
                    break;
                }
            }
            match inner.stream.write(front) {
                Ok(n) if n == front.len() => {
                    written += n as u64;
                    inner.tx_bytes_tick += n as u64;
                    inner.queued_to_send.pop_front();
                }
                Ok(n) => {
                    written += n as u64;
                    inner.tx_bytes_tick += n as u64;
                    let remaining = front[n..].to_vec();
                    inner.queued_to_send.pop_front();
                    inner.queued_to_send.push_front(remaining);
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// Called by the Receiver's readable-readiness loop with bytes just
    /// read off the socket. Extracts and dispatches complete frames.
    pub fn receive(self: &Arc<Self>, data: &[u8]) -> Result<(), ProtocolError> {
        let torrent = match self.torrent.upgrade() {
            Some(t) => t,
            None => return Ok(()),
        };

        {
            let mut inner = self.inner.lock().expect("peer lock poisoned");
            inner.rx_bytes_tick += data.len() as u64;
            inner.last_rx_time = Instant::now();
            inner.recv_buf.extend_from_slice(data);
        }

        loop {
            let frame = {
                let mut inner = self.inner.lock().expect("peer lock poisoned");
                if inner.recv_buf.len() < 4 {
                    break;
                }
                let len = u32::from_be_bytes([
                    inner.recv_buf[0],
                    inner.recv_buf[1],
                    inner.recv_buf[2],
                    inner.recv_buf[3],
                ]) as usize;
                if len > self.max_frame_len {
                    return Err(ProtocolError::FrameTooLarge(len));
                }
                if inner.recv_buf.len() < 4 + len {
                    break;
                }
                let payload = inner.recv_buf[4..4 + len].to_vec();
                inner.recv_buf.drain(0..4 + len);
                payload
            };

            let is_first = {
                let mut inner = self.inner.lock().expect("peer lock poisoned");
                let first = !inner.first_message_seen;
                inner.first_message_seen = true;
                first
            };

            let message = PeerMessage::decode(
                &frame,
                is_first,
                torrent.num_pieces(),
                torrent.chunk_size(),
            )?;
            self.dispatch(&torrent, message);
        }
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, torrent: &Arc<dyn TorrentCallbacks>, message: PeerMessage) {
        match message {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => {
                self.inner.lock().expect("peer lock poisoned").am_choked = true;
                torrent.on_choke_received(self);
            }
            PeerMessage::Unchoke => {
                self.inner.lock().expect("peer lock poisoned").am_choked = false;
                torrent.on_unchoke_received(self);
            }
            PeerMessage::Interested => {
                self.inner.lock().expect("peer lock poisoned").peer_interested = true;
                torrent.on_interested(self);
            }
            PeerMessage::NotInterested => {
                self.inner.lock().expect("peer lock poisoned").peer_interested = false;
                torrent.on_not_interested(self);
            }
            PeerMessage::Have { index } => {
                let mut inner = self.inner.lock().expect("peer lock poisoned");
                if !inner.have_piece.has(index) {
                    inner.have_piece.set(index, true);
                    inner.num_pieces_have += 1;
                }
                drop(inner);
                torrent.on_have(self, index);
            }
            PeerMessage::Bitfield(bf) => {
                let mut inner = self.inner.lock().expect("peer lock poisoned");
                inner.num_pieces_have = bf.count_ones();
                inner.have_piece = bf.clone();
                drop(inner);
                torrent.on_bitfield(self, &bf);
            }
            PeerMessage::Request { index, begin, length } => {
                torrent.on_request(self, index, begin, length);
            }
            PeerMessage::Piece { index, begin, data } => {
                {
                    let mut inner = self.inner.lock().expect("peer lock poisoned");
                    inner.outstanding.retain(|&(i, b, _)| !(i == index && b == begin));
                }
                torrent.on_piece(self, index, begin, data);
            }
            PeerMessage::Cancel { index, begin, length } => {
                torrent.on_cancel(self, index, begin, length);
            }
            PeerMessage::Port { .. } => {}
        }
    }

    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Registers this peer's socket with a mio `Registry` under `token`,
    /// called once by the Receiver right after the handshake completes.
    pub fn register_with(&self, registry: &mio::Registry, token: mio::Token) -> std::io::Result<()> {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        registry.register(&mut inner.stream, token, mio::Interest::READABLE | mio::Interest::WRITABLE)
    }

    pub fn deregister_with(&self, registry: &mio::Registry) -> std::io::Result<()> {
        let mut inner = self.inner.lock().expect("peer lock poisoned");
        registry.deregister(&mut inner.stream)
    }

    /// Drains the socket on a readable event, dispatching every complete
    /// frame. Returns `true` if the remote closed the connection.
    pub fn poll_readable(self: &Arc<Self>) -> Result<bool, ProtocolError> {
        use std::io::Read;
        loop {
            let mut buf = [0u8; 16 * 1024];
            let read = {
                let mut inner = self.inner.lock().expect("peer lock poisoned");
                inner.stream.read(&mut buf)
            };
            match read {
                Ok(0) => return Ok(true),
                Ok(n) => self.receive(&buf[..n])?,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(_) => return Ok(true),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::sync::Weak;

    struct NullTorrent;
    impl TorrentCallbacks for NullTorrent {
        fn num_pieces(&self) -> u32 {
            8
        }
        fn chunk_size(&self) -> u32 {
            16384
        }
        fn on_bitfield(&self, _peer: &PeerHandle, _bitfield: &Bitfield) {}
        fn on_have(&self, _peer: &PeerHandle, _index: u32) {}
        fn on_choke_received(&self, _peer: &PeerHandle) {}
        fn on_unchoke_received(&self, _peer: &PeerHandle) {}
        fn on_interested(&self, _peer: &PeerHandle) {}
        fn on_not_interested(&self, _peer: &PeerHandle) {}
        fn on_request(&self, _peer: &PeerHandle, _index: u32, _begin: u32, _length: u32) {}
        fn on_piece(&self, _peer: &PeerHandle, _index: u32, _begin: u32, _data: Vec<u8>) {}
        fn on_cancel(&self, _peer: &PeerHandle, _index: u32, _begin: u32, _length: u32) {}
    }

    fn make_peer() -> (PeerHandle, Arc<dyn TorrentCallbacks>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(server);
        let _ = client;

        let torrent: Arc<dyn TorrentCallbacks> = Arc::new(NullTorrent);
        let weak: Weak<dyn TorrentCallbacks> = Arc::downgrade(&torrent);

        (Arc::new(Peer::new(stream, addr, 8, 128 * 1024, weak)), torrent)
    }

    #[test]
    fn initial_state_matches_spec_defaults() {
        let (peer, _torrent) = make_peer();
        assert!(peer.am_choked());
        assert!(!peer.peer_interested());
    }

    #[test]
    fn queueing_a_frame_marks_output_pending() {
        let (peer, _torrent) = make_peer();
        assert!(!peer.has_queued_output());
        peer.queue_frame(&PeerMessage::Interested);
        assert!(peer.has_queued_output());
    }

    #[test]
    fn record_and_cancel_outstanding() {
        let (peer, _torrent) = make_peer();
        peer.record_request_sent(0, 0, 16384);
        assert_eq!(peer.outstanding_count(), 1);
        peer.cancel_outstanding(0, 0, 16384);
        assert_eq!(peer.outstanding_count(), 0);
    }
}
