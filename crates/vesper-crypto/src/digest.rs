//! Dataset digest mixing for `DEBUG DIGEST` (spec §4.13).
//!
//! The digest must be equal for two datasets that are logically identical
//! regardless of storage layout (hash-table iteration order, zset skiplist
//! order, etc.). Each key contributes a 160-bit digest which is XORed into
//! a running global digest, so whole-dataset digests are order-independent
//! at the key level too.

use sha1::{Digest, Sha1};

/// A 160-bit SHA-1 digest, XOR-mixable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mixed([u8; 20]);

impl Mixed {
    pub const ZERO: Self = Self([0; 20]);

    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    /// XOR-mix another digest into this one, order-independent.
    pub fn mix(&mut self, other: Self) {
        for i in 0..20 {
            self.0[i] ^= other.0[i];
        }
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Feedback-mixes a running digest with the next element for ordered
/// aggregates (LIST). `running' = SHA1(running XOR SHA1(element))`.
pub fn feedback_mix(running: Mixed, element: &[u8]) -> Mixed {
    let element_digest = Mixed::of(element);
    let mut xored = running;
    xored.mix(element_digest);
    Mixed::of(xored.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_is_commutative_and_order_independent() {
        let a = Mixed::of(b"alpha");
        let b = Mixed::of(b"beta");
        let mut ab = a;
        ab.mix(b);
        let mut ba = b;
        ba.mix(a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn mix_with_zero_is_identity() {
        let a = Mixed::of(b"alpha");
        let mut mixed = a;
        mixed.mix(Mixed::ZERO);
        assert_eq!(mixed, a);
    }

    #[test]
    fn feedback_mix_is_order_sensitive() {
        let start = Mixed::ZERO;
        let ab = feedback_mix(feedback_mix(start, b"a"), b"b");
        let ba = feedback_mix(feedback_mix(start, b"b"), b"a");
        assert_ne!(ab, ba);
    }
}
