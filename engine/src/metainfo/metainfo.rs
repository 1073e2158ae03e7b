use std::collections::BTreeMap;

use bencoder::bencode::Bencode;

use crate::error::MetadataError;
use crate::sha1::sha1_bytes;

use super::info::Info;

/// Parsed torrent descriptor: tiered announce list plus the `info`
/// dictionary, with `info_hash` derived at construction time.
///
/// `info_hash` is the 20-byte SHA-1 over the canonical bencode
/// re-serialization of `info`; `info`'s `ToBencode` impl reproduces the
/// dictionary's original key order (bencode dictionaries are sorted
/// lexicographically) so this matches the hash over the source bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    pub announce_list: Vec<Vec<String>>,
    pub info: Info,
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bencode(bencode: Bencode) -> Result<Metainfo, MetadataError> {
        let d = match bencode {
            Bencode::BDict(d) => d,
            _ => return Err(MetadataError::Bencode("torrent file is not a dictionary".into())),
        };

        let info_bencode = d
            .get(b"info".as_slice())
            .ok_or(MetadataError::MissingField("info"))?;
        let info = Info::from_bencode(info_bencode)?;
        let info_hash = sha1_bytes(&Bencode::encode(&info));

        let announce_list = Self::build_announce_list(&d)?;

        Ok(Metainfo {
            announce_list,
            info,
            info_hash,
        })
    }

    fn build_announce_list(
        d: &BTreeMap<Vec<u8>, Bencode>,
    ) -> Result<Vec<Vec<String>>, MetadataError> {
        if let Some(Bencode::BList(tiers)) = d.get(b"announce-list".as_slice()) {
            let mut list = Vec::with_capacity(tiers.len());
            for tier in tiers {
                let urls = match tier {
                    Bencode::BList(urls) => urls,
                    _ => return Err(MetadataError::Bencode("announce-list tier is not a list".into())),
                };
                let tier: Vec<String> = urls
                    .iter()
                    .filter_map(|u| match u {
                        Bencode::BString(s) => Some(String::from_utf8_lossy(s).into_owned()),
                        _ => None,
                    })
                    .collect();
                if !tier.is_empty() {
                    list.push(tier);
                }
            }
            if !list.is_empty() {
                return Ok(list);
            }
        }

        match d.get(b"announce".as_slice()) {
            Some(Bencode::BString(s)) => {
                Ok(vec![vec![String::from_utf8_lossy(s).into_owned()]])
            }
            _ => Err(MetadataError::MissingField("announce")),
        }
    }

    pub fn num_pieces(&self) -> u32 {
        self.info.num_pieces()
    }

    pub fn total_size(&self) -> u64 {
        self.info.total_size
    }

    pub fn piece_length(&self) -> u32 {
        self.info.piece_length
    }

    pub fn piece_length_of(&self, index: u32) -> u32 {
        self.info.piece_length_of(index)
    }

    pub fn piece_hash(&self, index: u32) -> &[u8] {
        self.info.piece_hash(index)
    }

    pub fn chunks_per_piece(&self, index: u32, chunk_size: u32) -> u32 {
        (self.piece_length_of(index) + chunk_size - 1) / chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bencoder::bencode::ToBencode;

    fn sample_info_bencode() -> Bencode {
        let mut d = BTreeMap::new();
        d.insert(b"name".to_vec(), Bencode::BString(b"hello.bin".to_vec()));
        d.insert(b"piece length".to_vec(), Bencode::BNumber(16384));
        d.insert(b"length".to_vec(), Bencode::BNumber(16384));
        d.insert(b"pieces".to_vec(), Bencode::BString(vec![7u8; 20]));
        Bencode::BDict(d)
    }

    #[test]
    fn info_hash_round_trips_through_reencoding() {
        let info_bencode = sample_info_bencode();
        let info = Info::from_bencode(&info_bencode).unwrap();
        let direct_hash = sha1_bytes(&Bencode::encode(&info_bencode));
        let via_info = sha1_bytes(&Bencode::encode(&info));
        assert_eq!(direct_hash, via_info);
    }

    #[test]
    fn single_announce_becomes_one_tier() {
        let mut d = BTreeMap::new();
        d.insert(
            b"announce".to_vec(),
            Bencode::BString(b"http://tracker.example/announce".to_vec()),
        );
        d.insert(b"info".to_vec(), sample_info_bencode());

        let metainfo = Metainfo::from_bencode(Bencode::BDict(d)).unwrap();
        assert_eq!(metainfo.announce_list, vec![vec![
            "http://tracker.example/announce".to_string()
        ]]);
    }

    #[test]
    fn announce_list_tiers_take_priority_over_announce() {
        let mut d = BTreeMap::new();
        d.insert(
            b"announce".to_vec(),
            Bencode::BString(b"http://primary.example/announce".to_vec()),
        );
        let tiers = Bencode::BList(vec![
            Bencode::BList(vec![
                Bencode::BString(b"http://t1.example/announce".to_vec()),
                Bencode::BString(b"http://t2.example/announce".to_vec()),
            ]),
            Bencode::BList(vec![Bencode::BString(b"http://t3.example/announce".to_vec())]),
        ]);
        d.insert(b"announce-list".to_vec(), tiers);
        d.insert(b"info".to_vec(), sample_info_bencode());

        let metainfo = Metainfo::from_bencode(Bencode::BDict(d)).unwrap();
        assert_eq!(metainfo.announce_list.len(), 2);
        assert_eq!(metainfo.announce_list[0].len(), 2);
        assert_eq!(metainfo.announce_list[1], vec!["http://t3.example/announce".to_string()]);
    }
}
