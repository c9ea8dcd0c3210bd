use std::io::Write;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Returns `true` if `s` looks like a hex-encoded SHA-256 digest.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The chunks of a complete transfer, in index order.
///
/// Chunks are shared with the owning [`Transfer`](crate::Transfer), so a
/// payload can be handed to a blocking task without copying the bytes.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    parts: Vec<Arc<[u8]>>,
}

impl Payload {
    pub fn new(parts: Vec<Arc<[u8]>>) -> Self {
        Self { parts }
    }

    /// Total byte length.
    pub fn len(&self) -> u64 {
        self.parts.iter().map(|p| p.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.is_empty())
    }

    /// SHA-256 hex digest of the concatenated chunks.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for part in &self.parts {
            hasher.update(part);
        }
        hex::encode(hasher.finalize())
    }

    /// Writes the concatenated chunks to `w`.
    pub fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        for part in &self.parts {
            w.write_all(part)?;
        }
        Ok(())
    }

    /// Concatenates the chunks into one buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() as usize);
        for part in &self.parts {
            out.extend_from_slice(part);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(parts: &[&[u8]]) -> Payload {
        Payload::new(parts.iter().map(|p| Arc::from(*p)).collect())
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
        assert!(is_sha256_hex(&c1));
    }

    #[test]
    fn sha256_hex_shape() {
        assert!(!is_sha256_hex("abc"));
        assert!(!is_sha256_hex(&"g".repeat(64)));
        assert!(is_sha256_hex(&"AbCdEf0123456789".repeat(4)));
    }

    #[test]
    fn payload_checksum_matches_concatenation() {
        let p = payload(&[b"hello ", b"wor", b"ld"]);
        assert_eq!(p.len(), 11);
        assert_eq!(p.checksum(), checksum_bytes(b"hello world"));
        assert_eq!(p.to_vec(), b"hello world");
    }

    #[test]
    fn payload_write_to() {
        let p = payload(&[b"ab", b"cd"]);
        let mut out = Vec::new();
        p.write_to(&mut out).unwrap();
        assert_eq!(out, b"abcd");
    }

    #[test]
    fn empty_payload() {
        let p = Payload::default();
        assert!(p.is_empty());
        assert_eq!(p.len(), 0);
    }
}
