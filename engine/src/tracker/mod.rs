pub mod client;
pub mod http;
pub mod query;
pub mod response;
pub mod url;

pub use client::{AnnounceEvent, TrackerClient};
pub use response::{PeerAddr, TrackerResponse};
