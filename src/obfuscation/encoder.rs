//! Keyed encoding of raw element sequences.
//!
//! For every element the encoder either leaves it in plaintext or draws a key
//! and stores `key ^ value`. Three parallel sequences come out:
//!
//! | slot        | key       | ciphertext        | dummy (shadow init)   |
//! |-------------|-----------|-------------------|-----------------------|
//! | encrypted   | random k  | `k ^ value`       | random, never `value` |
//! | unencrypted | 1         | 0                 | `value`               |
//!
//! Decryption only touches encrypted slots, so the shadow buffer's initial
//! contents must already be the plaintext for every unencrypted slot.

use std::collections::BTreeSet;

use crate::{
    ir::{Constant, IntWidth, IrType},
    obfuscation::keys::KeySource,
};

/// The result of encoding one raw sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedData {
    /// Element width.
    pub width: IntWidth,
    /// Per-element key.
    pub keys: Vec<u64>,
    /// Per-element ciphertext (0 for unencrypted slots).
    pub ciphertext: Vec<u64>,
    /// Initial contents of the shadow buffer.
    pub dummy: Vec<u64>,
    /// Indices left in plaintext.
    pub unencrypted: BTreeSet<usize>,
}

impl EncodedData {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` for an empty sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Indices that are encrypted, ascending.
    pub fn encrypted_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(|i| !self.unencrypted.contains(i))
    }

    /// Ciphertext of the encrypted slots only, in index order.
    ///
    /// This is what gets stored in the blob.
    #[must_use]
    pub fn compact_ciphertext(&self) -> Vec<u64> {
        self.encrypted_indices().map(|i| self.ciphertext[i]).collect()
    }

    /// Returns `true` if no element is encrypted.
    #[must_use]
    pub fn is_plaintext(&self) -> bool {
        self.unencrypted.len() == self.len()
    }

    /// Recovers the original sequence the same way the generated code does.
    #[must_use]
    pub fn decode(&self) -> Vec<u64> {
        (0..self.len())
            .map(|i| {
                if self.unencrypted.contains(&i) {
                    self.dummy[i]
                } else {
                    self.ciphertext[i] ^ self.keys[i]
                }
            })
            .collect()
    }
}

/// Returns the element width and elements of a constant the encoder accepts.
///
/// Only raw integer sequences of 8, 16, 32 or 64 bits qualify; all-zero
/// sequences carry nothing worth hiding and are rejected as well.
#[must_use]
pub fn encodable(constant: &Constant) -> Option<(IntWidth, &[u64])> {
    match constant {
        Constant::Data {
            elem: IrType::Int(bits),
            elements,
        } if !constant.is_null_value() => {
            IntWidth::from_bits(*bits).map(|width| (width, elements.as_slice()))
        }
        _ => None,
    }
}

/// Encodes `elements` at `width`.
///
/// An element is left in plaintext when a percent draw is `>= probability`,
/// so `probability` 100 encrypts everything and 0 nothing.
pub fn encode<K: KeySource + ?Sized>(
    elements: &[u64],
    width: IntWidth,
    probability: u32,
    keys: &mut K,
) -> EncodedData {
    let mask = width.mask();
    let mut encoded = EncodedData {
        width,
        keys: Vec::with_capacity(elements.len()),
        ciphertext: Vec::with_capacity(elements.len()),
        dummy: Vec::with_capacity(elements.len()),
        unencrypted: BTreeSet::new(),
    };

    for (index, &element) in elements.iter().enumerate() {
        let value = element & mask;
        if keys.percent() >= probability {
            encoded.unencrypted.insert(index);
            encoded.keys.push(1);
            encoded.ciphertext.push(0);
            encoded.dummy.push(value);
            continue;
        }

        let key = keys.key(width) & mask;
        let mut filler = keys.filler(width) & mask;
        if filler == value {
            filler = !value & mask;
        }
        encoded.keys.push(key);
        encoded.ciphertext.push(key ^ value);
        encoded.dummy.push(filler);
    }

    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obfuscation::keys::{FixedKeySource, RngKeySource};

    const HELLO: [u64; 5] = [72, 101, 108, 108, 111];

    #[test]
    fn test_hello_with_fixed_keys() {
        let mut keys = FixedKeySource::new([1, 2, 3, 4, 5]);
        let encoded = encode(&HELLO, IntWidth::W8, 100, &mut keys);

        assert_eq!(encoded.ciphertext, vec![73, 103, 111, 104, 106]);
        assert_eq!(encoded.keys, vec![1, 2, 3, 4, 5]);
        assert!(encoded.unencrypted.is_empty());
        for (dummy, plain) in encoded.dummy.iter().zip(HELLO) {
            assert_ne!(*dummy, plain);
        }
        assert_eq!(encoded.decode(), HELLO.to_vec());
        assert_eq!(encoded.compact_ciphertext().len(), 5);
    }

    #[test]
    fn test_zero_probability_is_identity() {
        let mut keys = RngKeySource::new(Some(3));
        let encoded = encode(&HELLO, IntWidth::W8, 0, &mut keys);

        assert!(encoded.is_plaintext());
        assert_eq!(encoded.keys, vec![1; 5]);
        assert_eq!(encoded.dummy, HELLO.to_vec());
        assert!(encoded.compact_ciphertext().is_empty());
        assert_eq!(encoded.decode(), HELLO.to_vec());
    }

    #[test]
    fn test_filler_never_equals_plaintext() {
        // Filler 'H' collides with the first element.
        let mut keys = FixedKeySource::new([9]).with_fillers([72]);
        let encoded = encode(&HELLO, IntWidth::W8, 100, &mut keys);
        assert_eq!(encoded.dummy[0], !72u64 & 0xff);
        assert_eq!(encoded.dummy[1], 72);
    }

    #[test]
    fn test_partial_probability_compacts() {
        let mut keys = FixedKeySource::new([0x11]).with_percents([10, 60, 10, 60, 10]);
        let encoded = encode(&HELLO, IntWidth::W8, 50, &mut keys);

        assert_eq!(encoded.unencrypted, BTreeSet::from([1, 3]));
        assert_eq!(encoded.encrypted_indices().collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(
            encoded.compact_ciphertext(),
            vec![72 ^ 0x11, 108 ^ 0x11, 111 ^ 0x11]
        );
        assert_eq!(encoded.decode(), HELLO.to_vec());
    }

    #[test]
    fn test_encodable() {
        assert!(encodable(&Constant::c_string("hi")).is_some());
        assert!(encodable(&Constant::data(16, vec![0, 0])).is_none());
        assert!(encodable(&Constant::data(24, vec![1])).is_none());
        assert!(encodable(&Constant::Data {
            elem: IrType::Float(32),
            elements: vec![0x3f80_0000],
        })
        .is_none());
        let binding = Constant::data(64, vec![u64::MAX]);
        let (width, elements) = encodable(&binding).unwrap();
        assert_eq!(width, IntWidth::W64);
        assert_eq!(elements, &[u64::MAX]);
    }
}
