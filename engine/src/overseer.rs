use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use logger::logger_sender::LoggerSender;

use crate::config::cfg::Cfg;
use crate::file_store::FileStore;
use crate::hasher::Hasher;
use crate::metainfo::Metainfo;
use crate::peer::PeerHandle;
use crate::receiver::{HandshakeRouter, Receiver, TorrentBinder};
use crate::sender::Sender;
use crate::torrent::Torrent;

/// Process-wide coordinator: owns the torrent registry, the shared
/// Hasher and FileStore, the Sender's bandwidth token bucket and the
/// Receiver's readiness loop, and runs the bandwidth/heartbeat/receiver
/// threads every other piece of the engine depends on.
pub struct Overseer {
    cfg: Cfg,
    logger: LoggerSender,
    our_peer_id: [u8; 20],
    file_store: Arc<FileStore>,
    hasher: Arc<Hasher>,
    sender: Arc<Sender>,
    torrents: Mutex<HashMap<[u8; 20], Arc<Torrent>>>,
    terminate: Arc<AtomicBool>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Overseer {
    pub fn new(cfg: Cfg, logger: LoggerSender, our_peer_id: [u8; 20]) -> Arc<Self> {
        let file_store = Arc::new(FileStore::new(
            PathBuf::from(&cfg.download_directory),
            cfg.max_open_files,
        ));
        let hasher = Arc::new(Hasher::new(logger.clone()));
        let sender = Arc::new(Sender::new(cfg.upload_rate_bytes_per_sec));

        Arc::new(Self {
            cfg,
            logger,
            our_peer_id,
            file_store,
            hasher,
            sender,
            torrents: Mutex::new(HashMap::new()),
            terminate: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Builds and starts a Torrent from parsed metainfo, registering it
    /// so incoming handshakes for its info_hash resolve.
    pub fn add_torrent(self: &Arc<Self>, metainfo: Metainfo) -> Result<Arc<Torrent>, crate::error::IoError> {
        let info_hash = metainfo.info_hash;
        let torrent = Torrent::new(
            metainfo,
            self.cfg.clone(),
            Arc::clone(&self.file_store),
            Arc::clone(&self.hasher),
            self.logger.clone(),
            self.our_peer_id,
        );
        torrent.start()?;
        self.torrents
            .lock()
            .expect("torrent registry lock poisoned")
            .insert(info_hash, Arc::clone(&torrent));
        Ok(torrent)
    }

    /// Stops and forgets a torrent. `Torrent::stop` must run before it
    /// leaves the registry, so every live peer gets torn down.
    pub fn remove_torrent(&self, info_hash: &[u8; 20]) {
        let torrent = self
            .torrents
            .lock()
            .expect("torrent registry lock poisoned")
            .remove(info_hash);
        if let Some(torrent) = torrent {
            torrent.stop();
        }
    }

    fn all_peers(&self) -> Vec<PeerHandle> {
        self.torrents
            .lock()
            .expect("torrent registry lock poisoned")
            .values()
            .flat_map(|t| t.live_peers())
            .collect()
    }

    /// Spawns the Bandwidth, Heartbeat, Sender and Receiver threads and
    /// returns once they are running. `shutdown` reverses this.
    pub fn run(self: &Arc<Self>) -> std::io::Result<()> {
        let listener = if self.cfg.tcp_port != 0 {
            let addr: SocketAddr = format!("0.0.0.0:{}", self.cfg.tcp_port)
                .parse()
                .expect("0.0.0.0:port always parses");
            Some(mio::net::TcpListener::bind(addr)?)
        } else {
            None
        };
        let receiver = Receiver::new(listener, self.our_peer_id, self.cfg.max_frame_len)?;

        let mut threads = self.threads.lock().expect("thread registry lock poisoned");

        let bandwidth_self = Arc::clone(self);
        threads.push(
            thread::Builder::new()
                .name("Bandwidth".to_string())
                .spawn(move || bandwidth_self.run_bandwidth_loop())
                .expect("failed to spawn bandwidth thread"),
        );

        let heartbeat_self = Arc::clone(self);
        threads.push(
            thread::Builder::new()
                .name("Heartbeat".to_string())
                .spawn(move || heartbeat_self.run_heartbeat_loop())
                .expect("failed to spawn heartbeat thread"),
        );

        let sender = Arc::clone(&self.sender);
        let sender_self = Arc::clone(self);
        let sender_terminate = Arc::clone(&self.terminate);
        threads.push(
            thread::Builder::new()
                .name("Sender".to_string())
                .spawn(move || sender.run(&sender_terminate, move || sender_self.all_peers()))
                .expect("failed to spawn sender thread"),
        );

        let receiver_self = Arc::clone(self);
        threads.push(
            thread::Builder::new()
                .name("Receiver".to_string())
                .spawn(move || receiver_self.run_receiver_loop(receiver))
                .expect("failed to spawn receiver thread"),
        );

        Ok(())
    }

    fn run_bandwidth_loop(&self) {
        while !self.terminate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_secs(1));
            self.sender.refill();
            for peer in self.all_peers() {
                peer.snapshot_and_reset_rate();
            }
        }
    }

    fn run_heartbeat_loop(&self) {
        while !self.terminate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_secs(1));
            let torrents: Vec<Arc<Torrent>> = self
                .torrents
                .lock()
                .expect("torrent registry lock poisoned")
                .values()
                .cloned()
                .collect();
            for torrent in torrents {
                torrent.heartbeat();
            }
        }
    }

    fn run_receiver_loop(self: Arc<Self>, mut receiver: Receiver) {
        let mut last_dial_sweep = Instant::now();
        while !self.terminate.load(Ordering::SeqCst) {
            if let Err(e) = receiver.poll_once(&*self) {
                self.logger.warn(&format!("receiver poll failed: {}", e));
            }
            if last_dial_sweep.elapsed() >= Duration::from_secs(1) {
                last_dial_sweep = Instant::now();
                self.dial_pending_peers(&mut receiver);
            }
        }
    }

    fn dial_pending_peers(&self, receiver: &mut Receiver) {
        let torrents: Vec<Arc<Torrent>> = self
            .torrents
            .lock()
            .expect("torrent registry lock poisoned")
            .values()
            .cloned()
            .collect();

        for torrent in torrents {
            let room = self.cfg.desired_peers.saturating_sub(receiver.live_peer_count());
            if room == 0 {
                continue;
            }
            for pending in torrent.peers_to_dial(room) {
                let addr: SocketAddr = match format!("{}:{}", pending.ip, pending.port).parse() {
                    Ok(addr) => addr,
                    Err(_) => continue,
                };
                let binder: Arc<dyn TorrentBinder> = Arc::clone(&torrent);
                if let Err(e) = receiver.connect(addr, torrent.metainfo.info_hash, binder) {
                    self.logger
                        .warn(&format!("dial to {} failed: {}", addr, e));
                }
            }
        }
    }

    /// Signals every background thread to stop and waits for them to
    /// exit. Callers should `Torrent::stop` every registered torrent
    /// first so peers are marked shutting down before the Receiver and
    /// Sender loops observe `terminate`.
    pub fn shutdown(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.sender.notify_queued();
        let mut threads = self.threads.lock().expect("thread registry lock poisoned");
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl HandshakeRouter for Overseer {
    fn resolve(&self, info_hash: &[u8; 20]) -> Option<Arc<dyn TorrentBinder>> {
        let torrents = self.torrents.lock().expect("torrent registry lock poisoned");
        torrents.get(info_hash).map(|t| {
            let binder: Arc<dyn TorrentBinder> = Arc::clone(t);
            binder
        })
    }
}
