use url_encoder::url_encoder::encode_bytes;

use super::client::AnnounceEvent;

/// Builds the query string of an announce GET request. Every value not
/// in the RFC-3986 unreserved set is percent-encoded with lowercase hex.
pub struct QueryParams<'a> {
    pub info_hash: &'a [u8; 20],
    pub peer_id: &'a [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: AnnounceEvent,
    pub numwant: Option<u32>,
    pub key: Option<&'a str>,
}

impl<'a> QueryParams<'a> {
    pub fn build(&self) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            encode_bytes(self.info_hash),
            encode_bytes(self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        );

        if let Some(event_str) = self.event.as_query_value() {
            query.push_str("&event=");
            query.push_str(event_str);
        }
        if let Some(numwant) = self.numwant {
            query.push_str(&format!("&numwant={}", numwant));
        }
        if let Some(key) = self.key {
            query.push_str("&key=");
            query.push_str(&encode_bytes(key.as_bytes()));
        }

        query
    }
}
