//! Process-local "in flight" markers
//!
//! A marker is held by an [`InFlightGuard`] and released when the guard drops,
//! including while a panicking task unwinds.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use multichain_rs::ChainId;

pub struct InFlight<K: Eq + Hash + Clone> {
    keys: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash + Clone> Clone for InFlight<K> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            keys: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key`; `None` if it is already marked
    pub fn try_acquire(&self, key: K) -> Option<InFlightGuard<K>> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InFlightGuard<K: Eq + Hash + Clone> {
    keys: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash + Clone> InFlightGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Markers for one chain's outbounds. Owned per process rather than per
/// worker group so a restarted group sees attempts its predecessor still
/// has running.
#[derive(Clone, Default)]
pub struct OutboundMarkers {
    /// `(chain, nonce)` with a signing attempt running
    pub signing: InFlight<(ChainId, u64)>,
    /// Nonces whose broadcast hash is being watched for inclusion
    pub reporting: InFlight<u64>,
}
