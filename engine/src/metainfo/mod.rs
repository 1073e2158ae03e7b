pub mod info;
pub mod metainfo;
pub mod parser;

pub use info::{FileEntry, Info};
pub use metainfo::Metainfo;
pub use parser::MetainfoParser;
