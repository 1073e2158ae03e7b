pub mod handshake;
pub mod message;
pub mod peer;

pub use handshake::Handshake;
pub use message::PeerMessage;
pub use peer::{Peer, PeerHandle, TorrentCallbacks};
