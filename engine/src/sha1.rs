use sha1::{Digest, Sha1};

/// Incremental SHA-1 feed used by the Hasher to verify pieces in
/// `8 KiB` chunks without holding the whole piece in memory at once.
pub struct IncrementalSha1 {
    hasher: Sha1,
}

impl IncrementalSha1 {
    pub fn new() -> Self {
        Self {
            hasher: Sha1::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finish(self) -> [u8; 20] {
        let digest = self.hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }
}

impl Default for IncrementalSha1 {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-1 over the raw bytes of a bencoded `info` dictionary, used both to
/// derive `info_hash` at parse time and to recompute it for verification.
pub fn sha1_bytes(bytes: &[u8]) -> [u8; 20] {
    let mut digest = Sha1::new();
    digest.update(bytes);
    let out = digest.finalize();
    let mut result = [0u8; 20];
    result.copy_from_slice(&out);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_feed_matches_single_shot() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1 << 20).collect();

        let single_shot = sha1_bytes(&data);

        let mut incremental = IncrementalSha1::new();
        for chunk in data.chunks(8192) {
            incremental.feed(chunk);
        }
        let chunked = incremental.finish();

        assert_eq!(single_shot, chunked);
    }

    #[test]
    fn empty_input_is_stable() {
        let a = sha1_bytes(&[]);
        let b = sha1_bytes(&[]);
        assert_eq!(a, b);
    }
}
