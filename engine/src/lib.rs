pub mod bitfield;
pub mod config;
pub mod error;
pub mod file_store;
pub mod hasher;
pub mod metainfo;
pub mod overseer;
pub mod peer;
pub mod receiver;
pub mod sender;
pub mod sha1;
pub mod torrent;
pub mod tracker;
