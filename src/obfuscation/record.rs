//! Protection records and shadow recipes.

use std::collections::BTreeSet;

use crate::ir::{FunctionId, GlobalId, IntWidth};

/// How to decrypt a shadow buffer.
///
/// Kept in the [`crate::compiler::CompilerContext`] for the lifetime of the
/// run, so that a function reaching a shadow buffer created for another
/// function can emit its own decryption of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRecipe {
    /// Compacted ciphertext; `None` when every element is plaintext.
    pub blob: Option<GlobalId>,
    /// Element width.
    pub width: IntWidth,
    /// Per-element keys, baked into the generated XORs.
    pub keys: Vec<u64>,
    /// Indices left in plaintext.
    pub unencrypted: BTreeSet<usize>,
    /// Functions whose decryption block covers the buffer.
    pub users: BTreeSet<FunctionId>,
}

impl ShadowRecipe {
    /// Number of elements of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` for an empty buffer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Encrypted element indices paired with their offset in the blob.
    pub fn encrypted_slots(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.len())
            .filter(|i| !self.unencrypted.contains(i))
            .enumerate()
            .map(|(offset, index)| (index, offset))
    }

    /// Returns `true` if decrypting the buffer requires any code.
    #[must_use]
    pub fn needs_decryption(&self) -> bool {
        self.blob.is_some() && self.unencrypted.len() < self.len()
    }
}

/// Replacement of one original raw global, at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionRecord {
    /// The plaintext global being replaced.
    pub original: GlobalId,
    /// Writable buffer holding the plaintext after decryption.
    pub shadow: GlobalId,
    /// Key material and layout.
    pub recipe: ShadowRecipe,
}
