//! Pre-shared key storage.
//!
//! The client resolves a PSK either by the identity hint the server sends in
//! its ServerKeyExchange or, absent a hint, by picking any configured entry.
//! The server resolves the identity echoed in the ClientKeyExchange, either
//! through the store or through a validator callback installed in [`Config`].
//!
//! [`Config`]: crate::Config

use zeroize::Zeroizing;

/// A table of `(identity, key)` pairs.
///
/// Read-mostly after construction. Wrap in `Arc` to share between a config
/// and application code; updates require external synchronization.
#[derive(Default)]
pub struct PskStore {
    entries: Vec<(Vec<u8>, Zeroizing<Vec<u8>>)>,
}

impl PskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding a single identity.
    pub fn single(identity: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        let mut store = Self::new();
        store.insert(identity, key);
        store
    }

    /// Add an identity. A later entry with the same identity shadows the
    /// earlier one on lookup.
    pub fn insert(&mut self, identity: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) {
        self.entries
            .insert(0, (identity.into(), Zeroizing::new(key.into())));
    }

    /// Look up the key for an identity (or identity hint).
    pub fn lookup(&self, identity: &[u8]) -> Option<Vec<u8>> {
        self.entries
            .iter()
            .find(|(id, _)| id.as_slice() == identity)
            .map(|(_, key)| key.to_vec())
    }

    /// Pick an arbitrary entry, used when the server gives no identity hint.
    pub fn pick_any(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.entries
            .first()
            .map(|(id, key)| (id.clone(), key.to_vec()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PskStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}
