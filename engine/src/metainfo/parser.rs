use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bencoder::bencode::Bencode;

use crate::error::MetadataError;

use super::metainfo::Metainfo;

#[derive(Debug)]
pub enum ParseError {
    Io(std::io::Error),
    Bencode(String),
    Metadata(MetadataError),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::Io(e)
    }
}

impl From<MetadataError> for ParseError {
    fn from(e: MetadataError) -> Self {
        ParseError::Metadata(e)
    }
}

pub struct MetainfoParser;

impl MetainfoParser {
    /// Reads and decodes a `.torrent` file into a [`Metainfo`].
    pub fn parse(path: &Path) -> Result<Metainfo, ParseError> {
        let buffer = Self::read_file(path)?;
        let bencode = Bencode::decode(&buffer).map_err(|e| ParseError::Bencode(format!("{:?}", e)))?;
        Ok(Metainfo::from_bencode(bencode)?)
    }

    fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_a_single_file_torrent() {
        let path = Path::new("./test_parse_metainfo.torrent");
        let contents = b"d8:announce24:http://tracker.example/4:infod6:lengthi16384e4:name9:hello.bin12:piece lengthi16384e6:pieces20:01234567890123456789ee";
        {
            let mut file = File::create(path).unwrap();
            file.write_all(contents).unwrap();
        }

        let metainfo = MetainfoParser::parse(path).expect("should parse");
        assert_eq!(metainfo.info.name, "hello.bin");
        assert_eq!(metainfo.info.total_size, 16384);
        assert_eq!(metainfo.announce_list, vec![vec!["http://tracker.example/".to_string()]]);

        std::fs::remove_file(path).unwrap();
    }
}
