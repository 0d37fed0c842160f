//! Sources of key material.
//!
//! Every random decision of the passes goes through a [`KeySource`]: whether
//! an element stays in plaintext, the XOR key of an encrypted element, and
//! the filler stored in a shadow buffer before decryption.

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::ir::IntWidth;

/// Provider of the random values used while encoding.
pub trait KeySource {
    /// Uniform draw from `0..100`.
    fn percent(&mut self) -> u32;

    /// Key for one element, masked to `width`.
    fn key(&mut self, width: IntWidth) -> u64;

    /// Filler for one shadow slot, masked to `width`.
    fn filler(&mut self, width: IntWidth) -> u64 {
        self.key(width)
    }
}

/// [`KeySource`] backed by a `rand` generator.
#[derive(Debug)]
pub struct RngKeySource<R = StdRng> {
    rng: R,
}

impl RngKeySource<StdRng> {
    /// Seeds from `seed`, or from the operating system when `None`.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl<R: RngCore> RngKeySource<R> {
    /// Wraps an existing generator.
    pub fn from_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore> KeySource for RngKeySource<R> {
    fn percent(&mut self) -> u32 {
        self.rng.gen_range(0..100)
    }

    // A zero key would leave the plaintext in the blob.
    fn key(&mut self, width: IntWidth) -> u64 {
        loop {
            let key = self.rng.next_u64() & width.mask();
            if key != 0 {
                return key;
            }
        }
    }

    fn filler(&mut self, width: IntWidth) -> u64 {
        self.rng.next_u64() & width.mask()
    }
}

/// [`KeySource`] replaying fixed sequences, for reproducible tests.
///
/// Each sequence cycles when exhausted. By default every percent draw is 0,
/// so any positive probability encrypts every element.
#[derive(Debug, Clone)]
pub struct FixedKeySource {
    keys: Vec<u64>,
    fillers: Vec<u64>,
    percents: Vec<u32>,
    next_key: usize,
    next_filler: usize,
    next_percent: usize,
}

impl FixedKeySource {
    /// Replays `keys`; fillers default to `0xa5` patterns.
    #[must_use]
    pub fn new(keys: impl IntoIterator<Item = u64>) -> Self {
        let keys: Vec<u64> = keys.into_iter().collect();
        Self {
            keys: if keys.is_empty() { vec![1] } else { keys },
            fillers: vec![0xa5a5_a5a5_a5a5_a5a5],
            percents: vec![0],
            next_key: 0,
            next_filler: 0,
            next_percent: 0,
        }
    }

    /// Replays `fillers` for shadow slots.
    #[must_use]
    pub fn with_fillers(mut self, fillers: impl IntoIterator<Item = u64>) -> Self {
        let fillers: Vec<u64> = fillers.into_iter().collect();
        if !fillers.is_empty() {
            self.fillers = fillers;
        }
        self
    }

    /// Replays `percents` for the plaintext decision.
    #[must_use]
    pub fn with_percents(mut self, percents: impl IntoIterator<Item = u32>) -> Self {
        let percents: Vec<u32> = percents.into_iter().collect();
        if !percents.is_empty() {
            self.percents = percents;
        }
        self
    }
}

fn cycle<T: Copy>(values: &[T], cursor: &mut usize) -> T {
    let value = values[*cursor % values.len()];
    *cursor += 1;
    value
}

impl KeySource for FixedKeySource {
    fn percent(&mut self) -> u32 {
        cycle(&self.percents, &mut self.next_percent)
    }

    fn key(&mut self, width: IntWidth) -> u64 {
        cycle(&self.keys, &mut self.next_key) & width.mask()
    }

    fn filler(&mut self, width: IntWidth) -> u64 {
        cycle(&self.fillers, &mut self.next_filler) & width.mask()
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_seeded_source_is_reproducible() {
        let mut a = RngKeySource::new(Some(7));
        let mut b = RngKeySource::new(Some(7));
        for width in IntWidth::iter() {
            assert_eq!(a.key(width), b.key(width));
            assert_eq!(a.percent(), b.percent());
        }
    }

    #[test]
    fn test_keys_are_masked_and_nonzero() {
        let mut source = RngKeySource::new(Some(1));
        for _ in 0..1000 {
            let key = source.key(IntWidth::W8);
            assert!(key != 0 && key <= 0xff);
            assert!(source.percent() < 100);
        }
    }

    #[test]
    fn test_fixed_source_cycles() {
        let mut source = FixedKeySource::new([1, 2, 0x1ff]).with_percents([10, 90]);
        let keys: Vec<u64> = (0..4).map(|_| source.key(IntWidth::W8)).collect();
        assert_eq!(keys, vec![1, 2, 0xff, 1]);
        assert_eq!(source.percent(), 10);
        assert_eq!(source.percent(), 90);
        assert_eq!(source.percent(), 10);
        assert_eq!(source.filler(IntWidth::W16), 0xa5a5);
    }
}
