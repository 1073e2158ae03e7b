use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::peer::{Handshake, Peer, PeerHandle, TorrentCallbacks};

const POLL_TIMEOUT: Duration = Duration::from_millis(5);
const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);
const HANDSHAKE_LEN: usize = 68;
const LISTENER_TOKEN: Token = Token(usize::MAX);

/// What the Receiver needs from a Torrent to finish a handshake and
/// hand the new connection off. Kept as a trait so this module does not
/// depend on `torrent.rs`; `Torrent` implements it.
pub trait TorrentBinder: Send + Sync {
    fn num_pieces(&self) -> u32;
    fn callbacks(&self) -> Weak<dyn TorrentCallbacks>;
    fn accept_peer(&self, peer: PeerHandle) -> bool;
}

/// Resolves an inbound handshake's info_hash to the Torrent it belongs
/// to. The Overseer owns the registry and implements this.
pub trait HandshakeRouter: Send + Sync {
    fn resolve(&self, info_hash: &[u8; 20]) -> Option<Arc<dyn TorrentBinder>>;
}

enum Direction {
    Inbound,
    Outbound {
        info_hash: [u8; 20],
        binder: Arc<dyn TorrentBinder>,
    },
}

struct PendingHandshake {
    stream: TcpStream,
    addr: SocketAddr,
    buf: Vec<u8>,
    started: Instant,
    sent_our_half: bool,
    direction: Direction,
}

enum HandshakeSignal {
    Pending,
    Failed,
    Ready {
        num_pieces: u32,
        callbacks: Weak<dyn TorrentCallbacks>,
        binder: Arc<dyn TorrentBinder>,
    },
}

/// Single-threaded mio readiness loop over the listener socket, every
/// live peer socket and every in-progress handshake. A short poll
/// timeout keeps the loop responsive to a terminate flag checked by the
/// caller between iterations.
pub struct Receiver {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    pending: HashMap<Token, PendingHandshake>,
    peers: HashMap<Token, PeerHandle>,
    next_token: usize,
    our_peer_id: [u8; 20],
    max_frame_len: usize,
}

impl Receiver {
    pub fn new(
        mut listener: Option<TcpListener>,
        our_peer_id: [u8; 20],
        max_frame_len: usize,
    ) -> std::io::Result<Self> {
        let poll = Poll::new()?;
        if let Some(l) = listener.as_mut() {
            poll.registry()
                .register(l, LISTENER_TOKEN, Interest::READABLE)?;
        }
        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            pending: HashMap::new(),
            peers: HashMap::new(),
            next_token: 0,
            our_peer_id,
            max_frame_len,
        })
    }

    fn alloc_token(&mut self) -> Token {
        self.next_token += 1;
        Token(self.next_token)
    }

    /// Starts dialing a peer we learned about from a tracker or PEX.
    /// `info_hash` is the torrent we expect the remote to confirm.
    pub fn connect(
        &mut self,
        addr: SocketAddr,
        info_hash: [u8; 20],
        binder: Arc<dyn TorrentBinder>,
    ) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(addr)?;
        let token = self.alloc_token();
        self.poll
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
        self.pending.insert(
            token,
            PendingHandshake {
                stream,
                addr,
                buf: Vec::new(),
                started: Instant::now(),
                sent_our_half: false,
                direction: Direction::Outbound { info_hash, binder },
            },
        );
        Ok(())
    }

    pub fn live_peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Runs one readiness-wait iteration. Call this in a loop, checking
    /// a terminate flag between calls.
    pub fn poll_once(&mut self, router: &dyn HandshakeRouter) -> std::io::Result<()> {
        self.poll.poll(&mut self.events, Some(POLL_TIMEOUT))?;

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            if token == LISTENER_TOKEN {
                self.accept_all()?;
                continue;
            }
            if let Some(peer) = self.peers.get(&token).cloned() {
                if readable {
                    self.service_peer(token, &peer);
                }
                continue;
            }
            if (readable || writable) && self.pending.contains_key(&token) {
                self.drive_handshake(token, router);
            }
        }

        self.sweep_expired_handshakes();
        self.reap_shutdown_peers();
        Ok(())
    }

    fn service_peer(&mut self, token: Token, peer: &PeerHandle) {
        match peer.poll_readable() {
            Ok(false) => {}
            Ok(true) => peer.mark_shutting_down(),
            Err(_) => peer.mark_shutting_down(),
        }
        let _ = token;
    }

    fn accept_all(&mut self) -> std::io::Result<()> {
        loop {
            let listener = match self.listener.as_ref() {
                Some(l) => l,
                None => return Ok(()),
            };
            let (mut stream, addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };
            let token = self.alloc_token();
            self.poll.registry().register(
                &mut stream,
                token,
                Interest::READABLE | Interest::WRITABLE,
            )?;
            self.pending.insert(
                token,
                PendingHandshake {
                    stream,
                    addr,
                    buf: Vec::new(),
                    started: Instant::now(),
                    sent_our_half: false,
                    direction: Direction::Inbound,
                },
            );
        }
    }

    fn drive_handshake(&mut self, token: Token, router: &dyn HandshakeRouter) {
        let signal = match self.pending.get_mut(&token) {
            Some(p) if p.started.elapsed() >= HANDSHAKE_DEADLINE => HandshakeSignal::Failed,
            Some(p) => Self::pump_handshake(p, &self.our_peer_id, router),
            None => return,
        };

        match signal {
            HandshakeSignal::Pending => {}
            HandshakeSignal::Failed => self.drop_pending(token),
            HandshakeSignal::Ready {
                num_pieces,
                callbacks,
                binder,
            } => {
                let mut pending = match self.pending.remove(&token) {
                    Some(p) => p,
                    None => return,
                };
                let _ = self.poll.registry().deregister(&mut pending.stream);
                let peer = Arc::new(Peer::new(
                    pending.stream,
                    pending.addr,
                    num_pieces,
                    self.max_frame_len,
                    callbacks,
                ));
                if binder.accept_peer(Arc::clone(&peer)) {
                    if peer.register_with(self.poll.registry(), token).is_ok() {
                        self.peers.insert(token, peer);
                    }
                }
            }
        }
    }

    fn drop_pending(&mut self, token: Token) {
        if let Some(mut pending) = self.pending.remove(&token) {
            let _ = self.poll.registry().deregister(&mut pending.stream);
        }
    }

    fn sweep_expired_handshakes(&mut self) {
        let expired: Vec<Token> = self
            .pending
            .iter()
            .filter(|(_, p)| p.started.elapsed() >= HANDSHAKE_DEADLINE)
            .map(|(t, _)| *t)
            .collect();
        for token in expired {
            self.drop_pending(token);
        }
    }

    fn reap_shutdown_peers(&mut self) {
        let dead: Vec<Token> = self
            .peers
            .iter()
            .filter(|(_, p)| p.is_shutting_down())
            .map(|(t, _)| *t)
            .collect();
        for token in dead {
            if let Some(peer) = self.peers.remove(&token) {
                let _ = peer.deregister_with(self.poll.registry());
            }
        }
    }

    fn pump_handshake(
        pending: &mut PendingHandshake,
        our_peer_id: &[u8; 20],
        router: &dyn HandshakeRouter,
    ) -> HandshakeSignal {
        if let Direction::Outbound { info_hash, .. } = &pending.direction {
            if !pending.sent_our_half {
                let handshake = Handshake::new(info_hash.to_vec(), our_peer_id.to_vec());
                match pending.stream.write_all(&handshake.as_bytes()) {
                    Ok(()) => pending.sent_our_half = true,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        return HandshakeSignal::Pending
                    }
                    Err(_) => return HandshakeSignal::Failed,
                }
            }
        }

        loop {
            if pending.buf.len() >= HANDSHAKE_LEN {
                break;
            }
            let mut buf = [0u8; HANDSHAKE_LEN];
            let want = HANDSHAKE_LEN - pending.buf.len();
            match pending.stream.read(&mut buf[..want]) {
                Ok(0) => return HandshakeSignal::Failed,
                Ok(n) => pending.buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => return HandshakeSignal::Failed,
            }
        }

        if pending.buf.len() < HANDSHAKE_LEN {
            return HandshakeSignal::Pending;
        }

        let remote = match Handshake::from_bytes(&pending.buf) {
            Ok(h) => h,
            Err(_) => return HandshakeSignal::Failed,
        };
        if remote.peer_id == our_peer_id.to_vec() {
            return HandshakeSignal::Failed;
        }
        if remote.info_hash.len() != 20 {
            return HandshakeSignal::Failed;
        }
        let mut remote_info_hash = [0u8; 20];
        remote_info_hash.copy_from_slice(&remote.info_hash);

        match &pending.direction {
            Direction::Inbound => {
                let binder = match router.resolve(&remote_info_hash) {
                    Some(b) => b,
                    None => return HandshakeSignal::Failed,
                };
                let our_handshake = Handshake::new(remote_info_hash.to_vec(), our_peer_id.to_vec());
                if pending.stream.write_all(&our_handshake.as_bytes()).is_err() {
                    return HandshakeSignal::Failed;
                }
                HandshakeSignal::Ready {
                    num_pieces: binder.num_pieces(),
                    callbacks: binder.callbacks(),
                    binder,
                }
            }
            Direction::Outbound { info_hash, binder } => {
                if remote_info_hash != *info_hash {
                    return HandshakeSignal::Failed;
                }
                HandshakeSignal::Ready {
                    num_pieces: binder.num_pieces(),
                    callbacks: binder.callbacks(),
                    binder: Arc::clone(binder),
                }
            }
        }
    }
}
