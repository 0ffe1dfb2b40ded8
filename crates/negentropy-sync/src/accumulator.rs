//! 256-bit little-endian modular accumulator and SHA-256 range fingerprint
//! (§4.C).
//!
//! Commutative and associative by construction: summing 32-byte ids in any
//! order over `mod 2^256` addition yields the same accumulator, so the
//! fingerprint of a range depends only on its item multiset and cardinality,
//! never on insertion order. Plain XOR would have the same commutativity
//! but cancels duplicate ids in pairs, silently losing multiset fidelity —
//! wrapping addition does not.

use sha2::{Digest, Sha256};

use crate::item::ID_SIZE;
use crate::varint::encode_varint;

pub const FINGERPRINT_SIZE: usize = 16;

/// A 256-bit accumulator, stored as 32 little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accumulator {
    buf: [u8; ID_SIZE],
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            buf: [0u8; ID_SIZE],
        }
    }

    /// `self += other`, wrapping modulo 2^256, little-endian carry
    /// propagation from byte 0 upward.
    pub fn add(&mut self, other: &[u8; ID_SIZE]) {
        let mut carry: u16 = 0;
        for i in 0..ID_SIZE {
            let sum = self.buf[i] as u16 + other[i] as u16 + carry;
            self.buf[i] = sum as u8;
            carry = sum >> 8;
        }
    }

    /// Two's-complement negation: `!self + 1`, short-circuiting once the
    /// carry from the `+1` stops propagating.
    pub fn negate(&mut self) {
        for byte in &mut self.buf {
            *byte = !*byte;
        }
        let mut carry: u16 = 1;
        for byte in &mut self.buf {
            if carry == 0 {
                break;
            }
            let sum = *byte as u16 + carry;
            *byte = sum as u8;
            carry = sum >> 8;
        }
    }

    /// `self -= other`, computed as `self + (-other)` via a negated copy.
    pub fn sub(&mut self, other: &[u8; ID_SIZE]) {
        let mut neg = Accumulator { buf: *other };
        neg.negate();
        self.add(&neg.buf);
    }

    /// `SHA-256(self.bytes || varint(n))[0..16]`, where `n` is the item
    /// count the accumulator summarises.
    pub fn fingerprint(&self, n: u64) -> [u8; FINGERPRINT_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(self.buf);
        hasher.update(encode_varint(n));
        let digest = hasher.finalize();

        let mut out = [0u8; FINGERPRINT_SIZE];
        out.copy_from_slice(&digest[..FINGERPRINT_SIZE]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf_of(byte: u8) -> [u8; ID_SIZE] {
        [byte; ID_SIZE]
    }

    #[test]
    fn add_is_commutative_and_order_independent() {
        let ids = [buf_of(1), buf_of(7), buf_of(200), buf_of(0xff)];

        let mut forward = Accumulator::new();
        for id in &ids {
            forward.add(id);
        }

        let mut reversed = Accumulator::new();
        for id in ids.iter().rev() {
            reversed.add(id);
        }

        assert_eq!(forward, reversed);
        assert_eq!(
            forward.fingerprint(ids.len() as u64),
            reversed.fingerprint(ids.len() as u64)
        );
    }

    #[test]
    fn fingerprint_depends_on_cardinality() {
        let id = buf_of(42);
        let mut acc = Accumulator::new();
        acc.add(&id);

        assert_ne!(acc.fingerprint(1), acc.fingerprint(2));
    }

    #[test]
    fn sub_undoes_add() {
        let mut acc = Accumulator::new();
        acc.add(&buf_of(5));
        acc.add(&buf_of(9));
        acc.sub(&buf_of(9));

        let mut expected = Accumulator::new();
        expected.add(&buf_of(5));
        assert_eq!(acc, expected);
    }

    #[test]
    fn negate_then_add_cancels() {
        let mut acc = Accumulator::new();
        acc.add(&buf_of(17));

        let mut neg = acc;
        neg.negate();

        acc.add(&neg.buf);
        assert_eq!(acc, Accumulator::new());
    }

    #[test]
    fn fingerprint_is_sixteen_bytes_of_sha256() {
        let acc = Accumulator::new();
        let fp = acc.fingerprint(0);

        let mut hasher = Sha256::new();
        hasher.update(acc.buf);
        hasher.update(encode_varint(0));
        let full = hasher.finalize();

        assert_eq!(&fp[..], &full[..FINGERPRINT_SIZE]);
    }
}
