use bencoder::bencode::{Bencode, BencodeError};

use crate::error::TrackerError;

/// One peer endpoint reported by a tracker, either from the dictionary
/// or compact peer-list encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub ip: String,
    pub port: u16,
    pub peer_id: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct TrackerResponse {
    pub interval: u64,
    pub min_interval: Option<u64>,
    pub key: Option<String>,
    pub peers: Vec<PeerAddr>,
}

impl TrackerResponse {
    pub fn decode(body: &[u8]) -> Result<TrackerResponse, TrackerError> {
        let decoded = Bencode::decode(body)
            .map_err(|e: BencodeError| TrackerError::MalformedResponse(format!("{:?}", e)))?;

        let d = match decoded {
            Bencode::BDict(d) => d,
            _ => return Err(TrackerError::MalformedResponse("response is not a dict".into())),
        };

        if let Some(Bencode::BString(reason)) = d.get(b"failure reason".as_slice()) {
            return Err(TrackerError::FailureReason(
                String::from_utf8_lossy(reason).into_owned(),
            ));
        }

        let interval = match d.get(b"interval".as_slice()) {
            Some(Bencode::BNumber(n)) if *n >= 0 => *n as u64,
            _ => return Err(TrackerError::MalformedResponse("missing interval".into())),
        };

        let min_interval = match d.get(b"min interval".as_slice()) {
            Some(Bencode::BNumber(n)) if *n >= 0 => Some(*n as u64),
            _ => None,
        };

        let key = match d.get(b"key".as_slice()) {
            Some(Bencode::BString(s)) => Some(String::from_utf8_lossy(s).into_owned()),
            _ => None,
        };

        let peers = match d.get(b"peers".as_slice()) {
            Some(Bencode::BList(list)) => Self::peers_from_dict_list(list)?,
            Some(Bencode::BString(compact)) => Self::peers_from_compact(compact),
            _ => Vec::new(),
        };

        Ok(TrackerResponse {
            interval,
            min_interval,
            key,
            peers,
        })
    }

    fn peers_from_dict_list(list: &[Bencode]) -> Result<Vec<PeerAddr>, TrackerError> {
        let mut peers = Vec::with_capacity(list.len());
        for entry in list {
            let d = match entry {
                Bencode::BDict(d) => d,
                _ => return Err(TrackerError::MalformedResponse("peer entry is not a dict".into())),
            };
            let ip = match d.get(b"ip".as_slice()) {
                Some(Bencode::BString(s)) => String::from_utf8_lossy(s).into_owned(),
                _ => return Err(TrackerError::MalformedResponse("peer missing ip".into())),
            };
            let port = match d.get(b"port".as_slice()) {
                Some(Bencode::BNumber(n)) if *n >= 0 && *n <= u16::MAX as i64 => *n as u16,
                _ => return Err(TrackerError::MalformedResponse("peer missing port".into())),
            };
            let peer_id = match d.get(b"peer id".as_slice()) {
                Some(Bencode::BString(s)) => Some(s.clone()),
                _ => None,
            };
            peers.push(PeerAddr { ip, port, peer_id });
        }
        Ok(peers)
    }

    fn peers_from_compact(bytes: &[u8]) -> Vec<PeerAddr> {
        bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = format!("{}.{}.{}.{}", chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                PeerAddr { ip, port, peer_id: None }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn decodes_compact_peer_list() {
        let mut d = BTreeMap::new();
        d.insert(b"interval".to_vec(), Bencode::BNumber(1800));
        let compact = vec![127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 2, 0x1A, 0xE2];
        d.insert(b"peers".to_vec(), Bencode::BString(compact));

        let body = Bencode::encode(&d);
        let response = TrackerResponse::decode(&body).unwrap();

        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].ip, "127.0.0.1");
        assert_eq!(response.peers[0].port, 0x1AE1);
    }

    #[test]
    fn decodes_dictionary_peer_list() {
        let mut peer = BTreeMap::new();
        peer.insert(b"ip".to_vec(), Bencode::BString(b"127.0.0.1".to_vec()));
        peer.insert(b"port".to_vec(), Bencode::BNumber(6881));
        peer.insert(b"peer id".to_vec(), Bencode::BString(b"-AZ1234-abcdefghijkl".to_vec()));

        let mut d = BTreeMap::new();
        d.insert(b"interval".to_vec(), Bencode::BNumber(1800));
        d.insert(b"peers".to_vec(), Bencode::BList(vec![Bencode::BDict(peer)]));

        let body = Bencode::encode(&d);
        let response = TrackerResponse::decode(&body).unwrap();

        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].port, 6881);
        assert!(response.peers[0].peer_id.is_some());
    }

    #[test]
    fn failure_reason_is_surfaced_as_error() {
        let mut d = BTreeMap::new();
        d.insert(b"failure reason".to_vec(), Bencode::BString(b"banned".to_vec()));
        let body = Bencode::encode(&d);

        let err = TrackerResponse::decode(&body).unwrap_err();
        assert!(matches!(err, TrackerError::FailureReason(reason) if reason == "banned"));
    }
}
