use std::collections::BTreeMap;

use bencoder::bencode::{Bencode, ToBencode};

use crate::error::MetadataError;

/// One file within a (possibly multi-file) torrent, in announce order.
/// `path` is the list of path components exactly as they appeared in the
/// bencoded `path` list, e.g. `["subdir", "a.bin"]` — not yet rooted
/// under the torrent's name directory; use `Info::file_relative_path`
/// for the on-disk placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: u64,
}

impl FileEntry {
    /// Joins `path` components with `/`. For a single-file torrent
    /// `path` is already `[name]`; for multi-file torrents this is
    /// relative to the name directory, not yet rooted under it.
    pub fn relative_path(&self) -> String {
        self.path.join("/")
    }
}

/// The parsed `info` dictionary: everything needed to compute piece
/// layout and lay files out on disk. Single-file torrents are modeled
/// as a one-entry `files` list whose path is just the torrent name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub name: String,
    pub piece_length: u32,
    pub pieces: Vec<u8>,
    pub files: Vec<FileEntry>,
    pub total_size: u64,
}

impl Info {
    pub fn from_bencode(bencode: &Bencode) -> Result<Info, MetadataError> {
        let d = match bencode {
            Bencode::BDict(d) => d,
            _ => return Err(MetadataError::Bencode("info is not a dictionary".into())),
        };

        let name = match d.get(b"name".as_slice()) {
            Some(Bencode::BString(s)) => String::from_utf8_lossy(s).into_owned(),
            _ => return Err(MetadataError::MissingField("name")),
        };

        let piece_length = match d.get(b"piece length".as_slice()) {
            Some(Bencode::BNumber(n)) if *n > 0 => *n as u32,
            _ => return Err(MetadataError::MissingField("piece length")),
        };

        let pieces = match d.get(b"pieces".as_slice()) {
            Some(Bencode::BString(s)) => s.clone(),
            _ => return Err(MetadataError::MissingField("pieces")),
        };
        if pieces.len() % 20 != 0 {
            return Err(MetadataError::PieceHashLengthMismatch {
                expected: pieces.len() / 20,
                found: pieces.len(),
            });
        }

        let files = match d.get(b"files".as_slice()) {
            Some(Bencode::BList(entries)) => Self::parse_multi_file(entries)?,
            Some(_) => return Err(MetadataError::Bencode("files is not a list".into())),
            None => {
                let length = match d.get(b"length".as_slice()) {
                    Some(Bencode::BNumber(n)) if *n >= 0 => *n as u64,
                    _ => return Err(MetadataError::MissingField("length")),
                };
                vec![FileEntry {
                    path: vec![name.clone()],
                    length,
                }]
            }
        };

        let total_size = files.iter().map(|f| f.length).sum();
        if files.len() > 1 && files.iter().any(|f| f.length == 0) {
            return Err(MetadataError::MultipleFilesZeroLength);
        }
        if piece_length == 0 || total_size == 0 {
            return Err(MetadataError::InvalidPieceLength);
        }

        Ok(Info {
            name,
            piece_length,
            pieces,
            files,
            total_size,
        })
    }

    fn parse_multi_file(entries: &[Bencode]) -> Result<Vec<FileEntry>, MetadataError> {
        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let d = match entry {
                Bencode::BDict(d) => d,
                _ => return Err(MetadataError::Bencode("file entry is not a dictionary".into())),
            };
            let length = match d.get(b"length".as_slice()) {
                Some(Bencode::BNumber(n)) if *n >= 0 => *n as u64,
                _ => return Err(MetadataError::MissingField("length")),
            };
            let path = match d.get(b"path".as_slice()) {
                Some(Bencode::BList(parts)) => parts
                    .iter()
                    .map(|p| match p {
                        Bencode::BString(s) => Ok(String::from_utf8_lossy(s).into_owned()),
                        _ => Err(MetadataError::Bencode("path component is not a string".into())),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                _ => return Err(MetadataError::MissingField("path")),
            };
            files.push(FileEntry { path, length });
        }
        Ok(files)
    }

    pub fn num_pieces(&self) -> u32 {
        (self.pieces.len() / 20) as u32
    }

    pub fn piece_hash(&self, index: u32) -> &[u8] {
        let start = index as usize * 20;
        &self.pieces[start..start + 20]
    }

    /// Length in bytes of piece `index`, accounting for a possibly
    /// shorter final piece.
    pub fn piece_length_of(&self, index: u32) -> u32 {
        if index + 1 == self.num_pieces() {
            let remainder = self.total_size - (index as u64) * (self.piece_length as u64);
            remainder as u32
        } else {
            self.piece_length
        }
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1
    }

    /// Path `file` should occupy on disk, relative to the torrent's
    /// download directory. Multi-file torrents are rooted under `name`
    /// per BEP3 (the bencoded `path` list itself excludes `name`, so
    /// this must not feed back into `to_bencode` or `info_hash` would
    /// no longer match other peers' for the same `.torrent`).
    pub fn file_relative_path(&self, file: &FileEntry) -> String {
        if self.is_multi_file() {
            std::iter::once(self.name.as_str())
                .chain(file.path.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join("/")
        } else {
            file.relative_path()
        }
    }
}

impl ToBencode for Info {
    fn to_bencode(&self) -> Bencode {
        let mut m = BTreeMap::new();
        m.insert(b"name".to_vec(), self.name.to_bencode());
        m.insert(b"piece length".to_vec(), (self.piece_length as i64).to_bencode());
        m.insert(b"pieces".to_vec(), self.pieces.to_bencode());

        if self.is_multi_file() {
            let files: Vec<Bencode> = self
                .files
                .iter()
                .map(|f| {
                    let mut fd = BTreeMap::new();
                    fd.insert(b"length".to_vec(), (f.length as i64).to_bencode());
                    let path: Vec<Bencode> = f.path.iter().map(|p| p.to_bencode()).collect();
                    fd.insert(b"path".to_vec(), Bencode::BList(path));
                    Bencode::BDict(fd)
                })
                .collect();
            m.insert(b"files".to_vec(), Bencode::BList(files));
        } else {
            m.insert(
                b"length".to_vec(),
                (self.files.first().map(|f| f.length).unwrap_or(0) as i64).to_bencode(),
            );
        }

        Bencode::BDict(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece_hashes(n: usize) -> Vec<u8> {
        (0..n).flat_map(|i| [i as u8; 20]).collect()
    }

    #[test]
    fn parses_single_file_info() {
        let mut d = BTreeMap::new();
        d.insert(b"name".to_vec(), Bencode::BString(b"hello.bin".to_vec()));
        d.insert(b"piece length".to_vec(), Bencode::BNumber(16384));
        d.insert(b"length".to_vec(), Bencode::BNumber(16384));
        d.insert(b"pieces".to_vec(), Bencode::BString(piece_hashes(1)));

        let info = Info::from_bencode(&Bencode::BDict(d)).unwrap();
        assert_eq!(info.files.len(), 1);
        assert_eq!(info.files[0].relative_path(), "hello.bin");
        assert_eq!(info.total_size, 16384);
        assert_eq!(info.num_pieces(), 1);
    }

    #[test]
    fn parses_multi_file_info_with_straddling_piece() {
        let mut d = BTreeMap::new();
        d.insert(b"name".to_vec(), Bencode::BString(b"pack".to_vec()));
        d.insert(b"piece length".to_vec(), Bencode::BNumber(16384));
        d.insert(b"pieces".to_vec(), Bencode::BString(piece_hashes(3)));

        let mut file_a = BTreeMap::new();
        file_a.insert(b"length".to_vec(), Bencode::BNumber(10000));
        file_a.insert(b"path".to_vec(), Bencode::BList(vec![Bencode::BString(b"a".to_vec())]));

        let mut file_b = BTreeMap::new();
        file_b.insert(b"length".to_vec(), Bencode::BNumber(30000));
        file_b.insert(b"path".to_vec(), Bencode::BList(vec![Bencode::BString(b"b".to_vec())]));

        d.insert(
            b"files".to_vec(),
            Bencode::BList(vec![Bencode::BDict(file_a), Bencode::BDict(file_b)]),
        );

        let info = Info::from_bencode(&Bencode::BDict(d)).unwrap();
        assert!(info.is_multi_file());
        assert_eq!(info.total_size, 40000);
        assert_eq!(info.num_pieces(), 3);
        assert_eq!(info.piece_length_of(2), 40000 - 2 * 16384);

        assert_eq!(info.files[0].relative_path(), "a");
        assert_eq!(info.file_relative_path(&info.files[0]), "pack/a");
        assert_eq!(info.file_relative_path(&info.files[1]), "pack/b");
    }

    #[test]
    fn multi_file_path_round_trips_through_bencode_without_name_prefix() {
        let mut d = BTreeMap::new();
        d.insert(b"name".to_vec(), Bencode::BString(b"pack".to_vec()));
        d.insert(b"piece length".to_vec(), Bencode::BNumber(16384));
        d.insert(b"pieces".to_vec(), Bencode::BString(piece_hashes(1)));

        let mut file_a = BTreeMap::new();
        file_a.insert(b"length".to_vec(), Bencode::BNumber(10));
        file_a.insert(
            b"path".to_vec(),
            Bencode::BList(vec![Bencode::BString(b"sub".to_vec()), Bencode::BString(b"a".to_vec())]),
        );
        let mut file_b = BTreeMap::new();
        file_b.insert(b"length".to_vec(), Bencode::BNumber(10));
        file_b.insert(b"path".to_vec(), Bencode::BList(vec![Bencode::BString(b"b".to_vec())]));
        d.insert(
            b"files".to_vec(),
            Bencode::BList(vec![Bencode::BDict(file_a), Bencode::BDict(file_b)]),
        );

        let info = Info::from_bencode(&Bencode::BDict(d)).unwrap();
        assert_eq!(info.file_relative_path(&info.files[0]), "pack/sub/a");

        // `to_bencode` must re-emit the original, un-prefixed `path` lists,
        // since that's what the info_hash is computed over.
        let re = info.to_bencode();
        let files = match re {
            Bencode::BDict(m) => match &m[b"files".as_slice()] {
                Bencode::BList(l) => l.clone(),
                _ => panic!("files is not a list"),
            },
            _ => panic!("info is not a dict"),
        };
        let path_a = match &files[0] {
            Bencode::BDict(m) => match &m[b"path".as_slice()] {
                Bencode::BList(l) => l.clone(),
                _ => panic!("path is not a list"),
            },
            _ => panic!("file entry is not a dict"),
        };
        assert_eq!(path_a, vec![Bencode::BString(b"sub".to_vec()), Bencode::BString(b"a".to_vec())]);
    }

    #[test]
    fn rejects_non_multiple_of_20_pieces() {
        let mut d = BTreeMap::new();
        d.insert(b"name".to_vec(), Bencode::BString(b"x".to_vec()));
        d.insert(b"piece length".to_vec(), Bencode::BNumber(16384));
        d.insert(b"length".to_vec(), Bencode::BNumber(16384));
        d.insert(b"pieces".to_vec(), Bencode::BString(vec![0; 19]));

        assert!(Info::from_bencode(&Bencode::BDict(d)).is_err());
    }
}
