use crate::bitfield::Bitfield;
use crate::error::ProtocolError;

/// A parsed post-handshake message. Framing (`<4-byte length><id><body>`)
/// is handled by [`encode`]/[`decode`]; this enum is the validated,
/// typed body.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield(Bitfield),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    Port { port: u16 },
}

impl PeerMessage {
    pub fn id(&self) -> Option<u8> {
        match self {
            PeerMessage::KeepAlive => None,
            PeerMessage::Choke => Some(0),
            PeerMessage::Unchoke => Some(1),
            PeerMessage::Interested => Some(2),
            PeerMessage::NotInterested => Some(3),
            PeerMessage::Have { .. } => Some(4),
            PeerMessage::Bitfield(_) => Some(5),
            PeerMessage::Request { .. } => Some(6),
            PeerMessage::Piece { .. } => Some(7),
            PeerMessage::Cancel { .. } => Some(8),
            PeerMessage::Port { .. } => Some(9),
        }
    }

    /// Encodes the 4-byte big-endian length prefix plus id and body.
    /// `KeepAlive` is the zero-length frame.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body_bytes();
        let id = self.id();
        let len = id.map(|_| body.len() + 1).unwrap_or(0) as u32;

        let mut out = Vec::with_capacity(4 + len as usize);
        out.extend_from_slice(&len.to_be_bytes());
        if let Some(id) = id {
            out.push(id);
            out.extend_from_slice(&body);
        }
        out
    }

    fn body_bytes(&self) -> Vec<u8> {
        match self {
            PeerMessage::Have { index } => index.to_be_bytes().to_vec(),
            PeerMessage::Bitfield(bf) => bf.as_bytes().to_vec(),
            PeerMessage::Request { index, begin, length }
            | PeerMessage::Cancel { index, begin, length } => {
                let mut v = Vec::with_capacity(12);
                v.extend_from_slice(&index.to_be_bytes());
                v.extend_from_slice(&begin.to_be_bytes());
                v.extend_from_slice(&length.to_be_bytes());
                v
            }
            PeerMessage::Piece { index, begin, data } => {
                let mut v = Vec::with_capacity(8 + data.len());
                v.extend_from_slice(&index.to_be_bytes());
                v.extend_from_slice(&begin.to_be_bytes());
                v.extend_from_slice(data);
                v
            }
            PeerMessage::Port { port } => port.to_be_bytes().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Decodes a single payload (id + body, length prefix already
    /// stripped) into a typed message, validating the per-id rules in
    /// the wire protocol. `is_first_message` gates the bitfield-only-once
    /// rule; `num_pieces`/`chunk_size` bound index/alignment checks.
    pub fn decode(
        payload: &[u8],
        is_first_message: bool,
        num_pieces: u32,
        chunk_size: u32,
    ) -> Result<PeerMessage, ProtocolError> {
        if payload.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }

        let id = payload[0];
        let body = &payload[1..];

        match id {
            0 => Ok(PeerMessage::Choke),
            1 => Ok(PeerMessage::Unchoke),
            2 => Ok(PeerMessage::Interested),
            3 => Ok(PeerMessage::NotInterested),
            4 => {
                let index = read_u32(body, 0)?;
                if index >= num_pieces {
                    return Err(ProtocolError::OutOfRangeIndex(index));
                }
                Ok(PeerMessage::Have { index })
            }
            5 => {
                if !is_first_message {
                    return Err(ProtocolError::BitfieldNotFirstMessage);
                }
                let expected = ((num_pieces + 7) / 8) as usize;
                if body.len() != expected {
                    return Err(ProtocolError::MisSizedBitfield {
                        expected,
                        found: body.len(),
                    });
                }
                Ok(PeerMessage::Bitfield(Bitfield::from_bytes(
                    body.to_vec(),
                    num_pieces as usize,
                )))
            }
            6 => {
                let (index, begin, length) = read_request_body(body)?;
                if index >= num_pieces {
                    return Err(ProtocolError::OutOfRangeIndex(index));
                }
                Ok(PeerMessage::Request { index, begin, length })
            }
            7 => {
                if body.len() < 8 {
                    return Err(ProtocolError::UnknownMessageId(id));
                }
                let index = read_u32(body, 0)?;
                let begin = read_u32(body, 4)?;
                let data = body[8..].to_vec();
                if index >= num_pieces {
                    return Err(ProtocolError::OutOfRangeIndex(index));
                }
                if begin % chunk_size != 0 {
                    return Err(ProtocolError::MisalignedChunk { begin });
                }
                if data.len() as u32 > chunk_size {
                    return Err(ProtocolError::OversizedChunk { length: data.len() });
                }
                Ok(PeerMessage::Piece { index, begin, data })
            }
            8 => {
                let (index, begin, length) = read_request_body(body)?;
                if index >= num_pieces {
                    return Err(ProtocolError::OutOfRangeIndex(index));
                }
                Ok(PeerMessage::Cancel { index, begin, length })
            }
            9 => {
                if body.len() != 2 {
                    return Err(ProtocolError::UnknownMessageId(id));
                }
                let port = u16::from_be_bytes([body[0], body[1]]);
                Ok(PeerMessage::Port { port })
            }
            other => Err(ProtocolError::UnknownMessageId(other)),
        }
    }
}

fn read_u32(body: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    body.get(offset..offset + 4)
        .map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
        .ok_or(ProtocolError::UnknownMessageId(0))
}

fn read_request_body(body: &[u8]) -> Result<(u32, u32, u32), ProtocolError> {
    if body.len() != 12 {
        return Err(ProtocolError::UnknownMessageId(6));
    }
    Ok((read_u32(body, 0)?, read_u32(body, 4)?, read_u32(body, 8)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_is_zero_length_frame() {
        assert_eq!(PeerMessage::KeepAlive.encode(), 0u32.to_be_bytes().to_vec());
    }

    #[test]
    fn request_encodes_with_length_prefix() {
        let msg = PeerMessage::Request { index: 0, begin: 0, length: 16384 };
        let bytes = msg.encode();
        assert_eq!(&bytes[0..4], &13u32.to_be_bytes());
        assert_eq!(bytes[4], 6);
        assert_eq!(bytes.len(), 17);
    }

    #[test]
    fn decode_have_round_trips() {
        let msg = PeerMessage::Have { index: 3 };
        let encoded = msg.encode();
        let decoded = PeerMessage::decode(&encoded[4..], false, 10, 16384).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn have_out_of_range_is_protocol_error() {
        let msg = PeerMessage::Have { index: 99 };
        let encoded = msg.encode();
        let decoded = PeerMessage::decode(&encoded[4..], false, 10, 16384);
        assert!(matches!(decoded, Err(ProtocolError::OutOfRangeIndex(99))));
    }

    #[test]
    fn bitfield_only_valid_as_first_message() {
        let bf = Bitfield::zeroed(8);
        let msg = PeerMessage::Bitfield(bf);
        let encoded = msg.encode();
        let body = &encoded[4..];

        assert!(PeerMessage::decode(body, true, 8, 16384).is_ok());
        assert!(matches!(
            PeerMessage::decode(body, false, 8, 16384),
            Err(ProtocolError::BitfieldNotFirstMessage)
        ));
    }

    #[test]
    fn mis_sized_bitfield_is_rejected() {
        let body = [5u8, 0, 0];
        assert!(matches!(
            PeerMessage::decode(&body, true, 100, 16384),
            Err(ProtocolError::MisSizedBitfield { .. })
        ));
    }

    #[test]
    fn piece_with_misaligned_begin_is_rejected() {
        let mut body = vec![7u8];
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&100u32.to_be_bytes());
        body.extend_from_slice(&[0u8; 4]);
        assert!(matches!(
            PeerMessage::decode(&body, false, 10, 16384),
            Err(ProtocolError::MisalignedChunk { begin: 100 })
        ));
    }

    #[test]
    fn unknown_id_is_rejected() {
        let body = [42u8];
        assert!(matches!(
            PeerMessage::decode(&body, false, 10, 16384),
            Err(ProtocolError::UnknownMessageId(42))
        ));
    }
}
