use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

use rand::seq::SliceRandom;

use logger::logger_sender::LoggerSender;

use crate::bitfield::Bitfield;
use crate::config::cfg::Cfg;
use crate::file_store::{spans_for_range, FileStore};
use crate::hasher::{HashableTorrent, Hasher};
use crate::metainfo::Metainfo;
use crate::peer::{Peer, PeerHandle, PeerMessage, TorrentCallbacks};
use crate::receiver::TorrentBinder;
use crate::tracker::{AnnounceEvent, TrackerClient};

/// A tracker-reported endpoint waiting to be dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPeer {
    pub ip: String,
    pub port: u16,
    pub peer_id: Option<Vec<u8>>,
}

/// Mutable, lock-guarded state (data mutex in the concurrency model):
/// piece/chunk bitmaps, counters, pending peers, and choking bookkeeping.
struct TorrentData {
    have_piece: Bitfield,
    have_chunk: Vec<Bitfield>,
    requested_by: Vec<Vec<Vec<SocketAddr>>>,
    hashing: Vec<bool>,
    cardinality: Vec<u32>,
    pending_peers: VecDeque<PendingPeer>,
    uploaded: u64,
    downloaded: u64,
    left: u64,
    endgame: bool,
    complete: bool,
    last_choking_tick: Instant,
    round_index: u32,
    optimistic_slot: Option<SocketAddr>,
    last_announce: Instant,
    next_interval_secs: u64,
}

/// Per-torrent state machine: piece/chunk ownership, peer roster,
/// rarity counters, the choking algorithm, the tracker schedule and the
/// endgame trigger. Owns one TrackerClient and its live Peers; a Peer
/// holds only a weak back-reference so the Torrent may tear every peer
/// down before it is itself dropped.
pub struct Torrent {
    pub metainfo: Metainfo,
    config: Cfg,
    file_store: Arc<FileStore>,
    hasher: Arc<Hasher>,
    logger: LoggerSender,
    our_peer_id: [u8; 20],
    tracker: Mutex<TrackerClient>,
    data: Mutex<TorrentData>,
    peers: RwLock<Vec<PeerHandle>>,
    self_weak: Weak<Torrent>,
}

impl Torrent {
    pub fn new(
        metainfo: Metainfo,
        config: Cfg,
        file_store: Arc<FileStore>,
        hasher: Arc<Hasher>,
        logger: LoggerSender,
        our_peer_id: [u8; 20],
    ) -> Arc<Torrent> {
        let num_pieces = metainfo.num_pieces() as usize;
        let chunk_size = config.chunk_size;
        let total_size = metainfo.total_size();
        let tracker = TrackerClient::new(metainfo.announce_list.clone(), our_peer_id, config.tcp_port);

        Arc::new_cyclic(|weak| Torrent {
            tracker: Mutex::new(tracker),
            data: Mutex::new(TorrentData {
                have_piece: Bitfield::zeroed(num_pieces),
                have_chunk: (0..num_pieces as u32)
                    .map(|i| Bitfield::zeroed(Self::chunks_per_piece_of(&metainfo, i, chunk_size) as usize))
                    .collect(),
                requested_by: (0..num_pieces as u32)
                    .map(|i| vec![Vec::new(); Self::chunks_per_piece_of(&metainfo, i, chunk_size) as usize])
                    .collect(),
                hashing: vec![false; num_pieces],
                cardinality: vec![0; num_pieces],
                pending_peers: VecDeque::new(),
                uploaded: 0,
                downloaded: 0,
                left: total_size,
                endgame: false,
                complete: false,
                last_choking_tick: Instant::now(),
                round_index: 0,
                optimistic_slot: None,
                last_announce: Instant::now(),
                next_interval_secs: 0,
            }),
            peers: RwLock::new(Vec::new()),
            metainfo,
            config,
            file_store,
            hasher,
            logger,
            our_peer_id,
            self_weak: weak.clone(),
        })
    }

    fn chunks_per_piece_of(metainfo: &Metainfo, index: u32, chunk_size: u32) -> u32 {
        metainfo.chunks_per_piece(index, chunk_size)
    }

    /// Weak back-reference handed to newly created Peers bound to this
    /// torrent; used by the handshake handler and outbound-connect path.
    pub fn callbacks_handle(&self) -> Weak<dyn TorrentCallbacks> {
        self.self_weak.clone()
    }

    fn files(&self) -> Vec<(String, u64)> {
        self.metainfo
            .info
            .files
            .iter()
            .map(|f| (self.metainfo.info.file_relative_path(f), f.length))
            .collect()
    }

    fn piece_byte_range(&self, piece: u32) -> (u64, u64) {
        let offset = piece as u64 * self.metainfo.piece_length() as u64;
        let len = self.metainfo.piece_length_of(piece) as u64;
        (offset, len)
    }

    /// Opens (or creates) every payload file and schedules hashing for
    /// pieces that land in a file found to already have the right length.
    pub fn start(self: &Arc<Self>) -> Result<(), crate::error::IoError> {
        let files = self.files();
        let mut file_start = 0u64;
        let mut reopened_ranges = Vec::new();
        for (path, length) in &files {
            let reopened = self.file_store.prepare(path, *length)?;
            if reopened {
                reopened_ranges.push((file_start, file_start + length));
            }
            file_start += length;
        }

        let num_pieces = self.metainfo.num_pieces();
        for piece in 0..num_pieces {
            let (offset, len) = self.piece_byte_range(piece);
            let piece_end = offset + len;
            let touches_reopened = reopened_ranges
                .iter()
                .any(|&(start, end)| offset < end && piece_end > start);
            if touches_reopened {
                self.enqueue_hash(piece);
            }
        }

        self.announce(AnnounceEvent::Started);
        Ok(())
    }

    fn enqueue_hash(self: &Arc<Self>, piece: u32) {
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        if data.hashing[piece as usize] {
            return;
        }
        data.hashing[piece as usize] = true;
        drop(data);
        let handle: Arc<dyn HashableTorrent> = self.clone();
        self.hasher.enqueue(handle, piece);
    }

    /// Best-effort shutdown: announces `stopped` (errors are logged and
    /// ignored), cancels any queued hash jobs, and marks every peer
    /// shutting down so the Receiver/Sender sweep frees them. Must be
    /// called, and observed to return, before the last `Arc<Torrent>` is
    /// dropped from the Overseer's registry.
    pub fn stop(self: &Arc<Self>) {
        self.announce(AnnounceEvent::Stopped);
        let handle: Arc<dyn HashableTorrent> = self.clone();
        self.hasher.cancel_all(&handle);
        let peers = self.peers.read().expect("peer roster lock poisoned").clone();
        for peer in &peers {
            peer.mark_shutting_down();
        }
    }

    fn announce(&self, event: AnnounceEvent) {
        let (uploaded, downloaded, left) = {
            let data = self.data.lock().expect("torrent data lock poisoned");
            (data.uploaded, data.downloaded, data.left)
        };
        let current_peers = self.peers.read().expect("peer roster lock poisoned").len() as u32;
        let mut tracker = self.tracker.lock().expect("tracker lock poisoned");
        match tracker.announce(
            &self.metainfo.info_hash,
            uploaded,
            downloaded,
            left,
            event,
            self.config.desired_peers as u32,
            current_peers,
        ) {
            Ok(response) => {
                let mut data = self.data.lock().expect("torrent data lock poisoned");
                data.next_interval_secs = response.min_interval.unwrap_or(response.interval);
                data.last_announce = Instant::now();
                drop(data);
                self.admit_tracker_peers(response.peers.into_iter().map(|p| PendingPeer {
                    ip: p.ip,
                    port: p.port,
                    peer_id: p.peer_id,
                }));
            }
            Err(e) => {
                self.logger.warn(&format!("tracker announce failed: {}", e));
            }
        }
    }

    fn admit_tracker_peers(&self, incoming: impl Iterator<Item = PendingPeer>) {
        let existing: Vec<(String, u16)> = {
            let peers = self.peers.read().expect("peer roster lock poisoned");
            peers.iter().map(|p| (p.addr.ip().to_string(), p.addr.port())).collect()
        };
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        for peer in incoming {
            if peer.peer_id.as_deref() == Some(&self.our_peer_id[..]) {
                continue;
            }
            if existing.iter().any(|(ip, port)| *ip == peer.ip && *port == peer.port) {
                continue;
            }
            if data.pending_peers.iter().any(|p| p.ip == peer.ip && p.port == peer.port) {
                continue;
            }
            data.pending_peers.push_back(peer);
        }
    }

    /// Registers a live, already-handshaked connection. Used by both the
    /// outbound-connect path and the inbound handshake handler.
    pub fn register_peer(&self, peer: PeerHandle) -> bool {
        let mut peers = self.peers.write().expect("peer roster lock poisoned");
        if peers.len() >= self.config.max_peers {
            return false;
        }
        if peers.iter().any(|p| p.addr == peer.addr) {
            return false;
        }
        peers.push(Arc::clone(&peer));
        drop(peers);

        let have_piece = {
            let data = self.data.lock().expect("torrent data lock poisoned");
            data.have_piece.clone()
        };
        if !have_piece.is_empty_bitfield() {
            peer.queue_frame(&PeerMessage::Bitfield(have_piece));
        }
        true
    }

    /// Snapshot of the live peer roster, used by the Overseer's
    /// bandwidth and Sender threads which need to reach across every
    /// torrent without holding this torrent's own locks.
    pub fn live_peers(&self) -> Vec<PeerHandle> {
        self.peers.read().expect("peer roster lock poisoned").clone()
    }

    pub fn is_complete(&self) -> bool {
        self.data.lock().expect("torrent data lock poisoned").complete
    }

    fn remove_peer(&self, peer: &PeerHandle) {
        let mut peers = self.peers.write().expect("peer roster lock poisoned");
        peers.retain(|p| p.addr != peer.addr);
        drop(peers);

        let mut data = self.data.lock().expect("torrent data lock poisoned");
        for piece in 0..data.cardinality.len() {
            if peer.has_piece(piece as u32) {
                data.cardinality[piece] = data.cardinality[piece].saturating_sub(1);
            }
        }
        for chunk_lists in data.requested_by.iter_mut() {
            for holders in chunk_lists.iter_mut() {
                holders.retain(|addr| *addr != peer.addr);
            }
        }
    }

    /// 1 Hz per-torrent sweep: free dead peers, top up connections from
    /// `pending_peers`, rerun the tracker schedule and choking algorithm
    /// when due, kick unresponsive peers.
    pub fn heartbeat(self: &Arc<Self>) {
        let dead: Vec<PeerHandle> = {
            let peers = self.peers.read().expect("peer roster lock poisoned");
            peers
                .iter()
                .filter(|p| p.is_shutting_down() || p.is_dead(self.config.kick_timeout))
                .cloned()
                .collect()
        };
        for peer in &dead {
            peer.mark_shutting_down();
            self.remove_peer(peer);
        }

        let due_for_announce = {
            let data = self.data.lock().expect("torrent data lock poisoned");
            data.last_announce.elapsed().as_secs() >= data.next_interval_secs.max(1)
        };
        if due_for_announce {
            self.announce(AnnounceEvent::None);
        }

        let due_for_choking = {
            let data = self.data.lock().expect("torrent data lock poisoned");
            data.last_choking_tick.elapsed().as_secs() >= 10
        };
        if due_for_choking {
            self.run_choking_tick();
        }
    }

    /// Attempts outbound connects while under `desired_peers`, popping
    /// `pending_peers` entries. Socket creation belongs to the Receiver;
    /// this returns the addresses to dial so the caller (Overseer) can
    /// hand them to the event loop with a `connect_timeout` deadline.
    pub fn peers_to_dial(&self, max: usize) -> Vec<PendingPeer> {
        let current = self.peers.read().expect("peer roster lock poisoned").len();
        if current >= self.config.desired_peers {
            return Vec::new();
        }
        let want = (self.config.desired_peers - current).min(max);
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        let mut dialed = Vec::with_capacity(want);
        for _ in 0..want {
            match data.pending_peers.pop_front() {
                Some(p) => dialed.push(p),
                None => break,
            }
        }
        dialed
    }

    fn update_interest(&self, peer: &PeerHandle) {
        let have_piece = {
            let data = self.data.lock().expect("torrent data lock poisoned");
            data.have_piece.clone()
        };
        let wants = peer.is_interesting(&have_piece);
        if peer.set_am_interested(wants) && wants {
            self.refill_pipeline(peer);
        }
    }

    /// Rarest-first refill of a peer's request pipeline up to
    /// `max_outstanding`. In endgame the same chunk may be requested from
    /// multiple peers; outside it, only chunks with no outstanding holder.
    fn refill_pipeline(&self, peer: &PeerHandle) {
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        let num_pieces = self.metainfo.num_pieces();

        let mut interesting: Vec<u32> = (0..num_pieces)
            .filter(|&i| {
                peer.has_piece(i) && !data.have_piece.has(i) && !data.hashing[i as usize]
            })
            .collect();
        interesting.shuffle(&mut rand::thread_rng());
        interesting.sort_by_key(|&i| data.cardinality[i as usize]);

        let chunk_size = self.config.chunk_size;
        let endgame = data.endgame;

        while peer.outstanding_count() < self.config.max_outstanding {
            let mut picked = None;
            'pieces: for &piece in &interesting {
                let chunks = &data.have_chunk[piece as usize];
                for chunk in 0..chunks.len() as u32 {
                    if chunks.has(chunk) {
                        continue;
                    }
                    let holders = &data.requested_by[piece as usize][chunk as usize];
                    if !endgame && !holders.is_empty() {
                        continue;
                    }
                    if !endgame && holders.contains(&peer.addr) {
                        continue;
                    }
                    picked = Some((piece, chunk));
                    break 'pieces;
                }
            }

            let (piece, chunk) = match picked {
                Some(p) => p,
                None => break,
            };

            let begin = chunk * chunk_size;
            let piece_len = self.metainfo.piece_length_of(piece);
            let length = chunk_size.min(piece_len - begin);

            data.requested_by[piece as usize][chunk as usize].push(peer.addr);
            peer.record_request_sent(piece, begin, length);
        }
    }

    fn chunk_index(&self, piece: u32, begin: u32) -> u32 {
        begin / self.config.chunk_size
    }

    /// Runs the choking algorithm: top `max_unchoked - 1` peers ranked by
    /// rolling rate (download rate while leeching, upload rate while
    /// seeding), plus one optimistic slot. The slot's occupant persists
    /// across ticks and is only re-randomized every third tick, but a
    /// slot is always present as long as an eligible peer exists —
    /// if its occupant drops out (disconnects, is promoted into the
    /// regular set, or becomes snubbed) it is replaced immediately
    /// rather than left empty until the next scheduled reroll.
    /// Snubbed peers are ineligible for the optimistic slot and sort last.
    fn run_choking_tick(&self) {
        let peers = self.peers.read().expect("peer roster lock poisoned").clone();
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        data.last_choking_tick = Instant::now();
        data.round_index += 1;
        let round_index = data.round_index;
        let is_seeder = data.left == 0;
        let mut optimistic_slot = data.optimistic_slot;
        drop(data);

        let mut candidates: Vec<PeerHandle> = peers.iter().filter(|p| p.peer_interested()).cloned().collect();

        let snub_timeout = self.config.snub_timeout;
        candidates.sort_by(|a, b| {
            let a_snubbed = a.is_snubbed(snub_timeout);
            let b_snubbed = b.is_snubbed(snub_timeout);
            if a_snubbed != b_snubbed {
                return a_snubbed.cmp(&b_snubbed);
            }
            let (a_rx, a_tx) = a.rates();
            let (b_rx, b_tx) = b.rates();
            let a_rate = if is_seeder { a_tx } else { a_rx };
            let b_rate = if is_seeder { b_tx } else { b_rx };
            b_rate.cmp(&a_rate)
        });

        let regular_count = self.config.max_unchoked.saturating_sub(1);
        let mut unchoked: Vec<SocketAddr> = candidates.iter().take(regular_count).map(|p| p.addr).collect();

        let slot_still_eligible = |addr: SocketAddr| {
            candidates
                .iter()
                .any(|p| p.addr == addr && !unchoked.contains(&addr) && !p.is_snubbed(snub_timeout))
        };

        let reroll = round_index % 3 == 1;
        if reroll || !optimistic_slot.map(slot_still_eligible).unwrap_or(false) {
            let eligible: Vec<&PeerHandle> = candidates
                .iter()
                .filter(|p| !unchoked.contains(&p.addr) && !p.is_snubbed(snub_timeout))
                .collect();
            optimistic_slot = eligible.choose(&mut rand::thread_rng()).map(|p| p.addr);
        }

        if let Some(addr) = optimistic_slot {
            unchoked.push(addr);
        }
        self.data.lock().expect("torrent data lock poisoned").optimistic_slot = optimistic_slot;

        for peer in &peers {
            let should_unchoke = unchoked.contains(&peer.addr);
            peer.set_peer_choked(!should_unchoke);
        }
    }
}

impl TorrentCallbacks for Torrent {
    fn num_pieces(&self) -> u32 {
        self.metainfo.num_pieces()
    }

    fn chunk_size(&self) -> u32 {
        self.config.chunk_size
    }

    fn on_bitfield(&self, peer: &PeerHandle, bitfield: &Bitfield) {
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        for i in 0..bitfield.len() as u32 {
            if bitfield.has(i) {
                data.cardinality[i as usize] += 1;
            }
        }
        drop(data);
        self.update_interest(peer);
    }

    fn on_have(&self, peer: &PeerHandle, index: u32) {
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        if (index as usize) < data.cardinality.len() {
            data.cardinality[index as usize] += 1;
        }
        drop(data);
        self.update_interest(peer);
    }

    fn on_choke_received(&self, peer: &PeerHandle) {
        let dropped = peer.clear_outstanding();
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        for (piece, begin, _length) in dropped {
            let chunk = begin / self.config.chunk_size;
            if let Some(chunks) = data.requested_by.get_mut(piece as usize) {
                if let Some(holders) = chunks.get_mut(chunk as usize) {
                    holders.retain(|addr| *addr != peer.addr);
                }
            }
        }
    }

    fn on_unchoke_received(&self, peer: &PeerHandle) {
        self.refill_pipeline(peer);
    }

    fn on_interested(&self, _peer: &PeerHandle) {}

    fn on_not_interested(&self, _peer: &PeerHandle) {}

    fn on_request(&self, peer: &PeerHandle, index: u32, begin: u32, length: u32) {
        if peer.peer_choked() {
            return;
        }
        let (piece_offset, _piece_len) = self.piece_byte_range(index);
        let files = self.files();
        let spans = spans_for_range(&files, piece_offset + begin as u64, length as u64);
        let mut payload = Vec::with_capacity(length as usize);
        for (path, offset, len) in spans {
            match self.file_store.read(path, offset, len as usize) {
                Ok(bytes) => payload.extend_from_slice(&bytes),
                Err(e) => {
                    self.logger.warn(&format!("read for upload failed: {}", e));
                    return;
                }
            }
        }
        peer.queue_frame(&PeerMessage::Piece { index, begin, data: payload });
    }

    fn on_piece(&self, peer: &PeerHandle, index: u32, begin: u32, data: Vec<u8>) {
        let chunk = self.chunk_index(index, begin);
        let already_have = {
            let data_guard = self.data.lock().expect("torrent data lock poisoned");
            data_guard.have_piece.has(index) || data_guard.have_chunk[index as usize].has(chunk)
        };
        if already_have {
            return;
        }

        let (piece_offset, _) = self.piece_byte_range(index);
        let files = self.files();
        let spans = spans_for_range(&files, piece_offset + begin as u64, data.len() as u64);
        let mut cursor = 0usize;
        for (path, offset, len) in spans {
            let end = cursor + len as usize;
            if let Err(e) = self.file_store.write(path, offset, &data[cursor..end]) {
                self.logger.error(&format!("write for chunk failed: {}", e));
                return;
            }
            cursor = end;
        }

        let (piece_complete, other_holders) = {
            let mut data_guard = self.data.lock().expect("torrent data lock poisoned");
            data_guard.have_chunk[index as usize].set(chunk, true);
            data_guard.downloaded += data.len() as u64;

            let holders: Vec<SocketAddr> =
                data_guard.requested_by[index as usize][chunk as usize].drain(..).collect();

            (data_guard.have_chunk[index as usize].is_complete(), holders)
        };

        if !other_holders.is_empty() {
            let peers = self.peers.read().expect("peer roster lock poisoned");
            for other in peers.iter().filter(|p| other_holders.contains(&p.addr) && p.addr != peer.addr) {
                other.cancel_outstanding(index, begin, data.len() as u32);
            }
        }
        {
            let peers = self.peers.read().expect("peer roster lock poisoned");
            for p in peers.iter() {
                p.cancel_queued_piece(index, begin);
            }
        }

        if piece_complete {
            let mut data_guard = self.data.lock().expect("torrent data lock poisoned");
            if !data_guard.hashing[index as usize] {
                data_guard.hashing[index as usize] = true;
                drop(data_guard);
                let handle: Arc<dyn HashableTorrent> =
                    self.self_weak.upgrade().expect("torrent dropped while peers live");
                self.hasher.enqueue(handle, index);
            }
        }
    }

    fn on_cancel(&self, peer: &PeerHandle, index: u32, begin: u32, _length: u32) {
        peer.cancel_queued_piece(index, begin);
    }
}

impl HashableTorrent for Torrent {
    fn info_hash(&self) -> [u8; 20] {
        self.metainfo.info_hash
    }

    fn file_store(&self) -> Arc<FileStore> {
        Arc::clone(&self.file_store)
    }

    fn piece_spans(&self, piece: u32) -> Vec<(String, u64, u64)> {
        let (offset, len) = self.piece_byte_range(piece);
        let files = self.files();
        spans_for_range(&files, offset, len)
            .into_iter()
            .map(|(path, off, len)| (path.to_string(), off, len))
            .collect()
    }

    fn expected_piece_hash(&self, piece: u32) -> [u8; 20] {
        let mut out = [0u8; 20];
        out.copy_from_slice(self.metainfo.piece_hash(piece));
        out
    }

    fn on_hash_complete(&self, piece: u32, ok: bool) {
        let mut data = self.data.lock().expect("torrent data lock poisoned");
        data.hashing[piece as usize] = false;

        if !ok {
            data.have_chunk[piece as usize] = Bitfield::zeroed(data.have_chunk[piece as usize].len());
            for holders in data.requested_by[piece as usize].iter_mut() {
                holders.clear();
            }
            self.logger.warn(&format!("piece {} failed verification, re-downloading", piece));
            return;
        }

        if data.have_piece.has(piece) {
            return;
        }
        data.have_piece.set(piece, true);
        let piece_len = self.metainfo.piece_length_of(piece) as u64;
        data.left = data.left.saturating_sub(piece_len);

        let total_size = self.metainfo.total_size();
        if total_size > 0 && !data.endgame {
            let fraction_done = (total_size - data.left) as f64 / total_size as f64;
            if fraction_done >= 0.95 {
                data.endgame = true;
            }
        }

        let all_done = data.left == 0;
        if all_done {
            data.complete = true;
        }
        drop(data);

        let peers = self.peers.read().expect("peer roster lock poisoned").clone();
        for peer in &peers {
            peer.queue_frame(&PeerMessage::Have { index: piece });
            self.update_interest(peer);
        }

        if all_done {
            self.announce(AnnounceEvent::Completed);
            for peer in &peers {
                if peer.has_all_pieces() {
                    peer.mark_shutting_down();
                }
            }
        }
    }
}

impl TorrentBinder for Torrent {
    fn num_pieces(&self) -> u32 {
        TorrentCallbacks::num_pieces(self)
    }

    fn callbacks(&self) -> Weak<dyn TorrentCallbacks> {
        self.callbacks_handle()
    }

    fn accept_peer(&self, peer: PeerHandle) -> bool {
        self.register_peer(peer)
    }
}

