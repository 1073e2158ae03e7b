/// Percent-encodes a raw byte string per RFC 3986, leaving the unreserved set
/// (`A-Z a-z 0-9 - . _ ~`) untouched and escaping everything else as `%HH`
/// with lowercase hex digits.
///
/// Tracker announce parameters such as `info_hash` and `peer_id` are raw
/// 20-byte strings, not text, so encoding operates on bytes rather than
/// `char`s.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if is_unreserved(b) {
            encoded.push(b as char);
        } else {
            encoded.push('%');
            encoded.push_str(&format!("{:02x}", b));
        }
    }
    encoded
}

/// Convenience wrapper over [`encode_bytes`] for a hex-encoded string such as
/// a `20-byte` info hash rendered as 40 hex characters.
pub fn encode_hex(hex_string: &str) -> String {
    encode_bytes(&decode_hex_string(hex_string))
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn decode_hex_string(hex_string: &str) -> Vec<u8> {
    hex_string
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_empty_is_empty() {
        assert_eq!("", encode_bytes(&[]));
    }

    #[test]
    fn encode_info_hash_bytes() {
        let info_hash = [
            0x2c, 0x6b, 0x68, 0x58, 0xd6, 0x1d, 0xa9, 0x54, 0x3d, 0x42, 0x31, 0xa7, 0x1d, 0xb4,
            0xb1, 0xc9, 0x26, 0x4b, 0x06, 0x85,
        ];
        assert_eq!(
            "%2c%6bhX%d6%1d%a9T%3dB1%a7%1d%b4%b1%c9%26K%06%85",
            encode_bytes(&info_hash)
        );
    }

    #[test]
    fn unreserved_characters_pass_through() {
        assert_eq!("abc-XYZ_0.9~", encode_bytes(b"abc-XYZ_0.9~"));
    }

    #[test]
    fn encode_hex_matches_encode_bytes() {
        let hex_string = "2c6b6858d61da9543d4231a71db4b1c9264b0685";
        assert_eq!(
            encode_bytes(&decode_hex_string(hex_string)),
            encode_hex(hex_string)
        );
    }
}
