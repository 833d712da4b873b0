//! Content hash identity (§3 "Content hash").

use std::fmt;

/// 32-byte BLAKE3 digest rendered as 64 lowercase hex characters.
/// Stable and self-verifying: `ContentHash::of(bytes)` always recomputes
/// the same value for the same input.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

/// Hash of the empty byte string — used as the well-known hash for
/// zero-length CAS writes (§4.A "Edge cases").
pub const EMPTY_HASH: ContentHash = ContentHash([
    175, 19, 73, 185, 245, 249, 161, 166, 160, 64, 77, 234, 54, 220, 201, 73, 155, 203, 37, 201,
    173, 193, 18, 183, 204, 154, 147, 202, 228, 31, 50, 98,
]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        ContentHash(*blake3::hash(bytes).as_bytes())
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            out[i] = ((hi << 4) | lo) as u8;
        }
        Some(ContentHash(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Two-level fan-out directory prefix (§4.A "Path layout"):
    /// the first byte pair, and the second byte pair, as hex.
    pub fn fanout(&self) -> (String, String) {
        (format!("{:02x}", self.0[0]), format!("{:02x}", self.0[1]))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = ContentHash::of(b"hello world");
        let b = ContentHash::of(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_roundtrips_through_hex() {
        let h = ContentHash::of(b"some content");
        let hex = h.to_string();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentHash::from_hex(&hex), Some(h));
    }

    #[test]
    fn empty_hash_matches_blake3_of_empty() {
        assert_eq!(ContentHash::of(b""), EMPTY_HASH);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert_eq!(ContentHash::from_hex("abcd"), None);
    }
}
