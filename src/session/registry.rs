//! Registry of live process pairs.

use super::types::{PairKey, ProcessPair};
use crate::error::RunError;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Default)]
struct Entries {
    pairs: HashMap<PairKey, ProcessPair>,
    /// Claimed pairs whose teardown has not completed yet.
    closing: HashSet<PairKey>,
}

impl Entries {
    fn live(&self) -> usize {
        self.pairs.len() + self.closing.len()
    }
}

/// Live process pairs of one run, keyed by (run id, client pid).
///
/// Every pair leaves the registry exactly once: whoever claims it owns the
/// teardown of its processes. A claimed pair still counts as live until its
/// owner calls [`ChildRegistry::complete`].
pub struct ChildRegistry {
    entries: Mutex<Entries>,
    /// Registered plus closing pairs, for waiting until the run drains.
    live: watch::Sender<usize>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        let (live, _) = watch::channel(0);
        Self {
            entries: Mutex::new(Entries::default()),
            live,
        }
    }

    /// Insert a pair. Fails if the serial already has a live pair.
    pub fn insert(&self, pair: ProcessPair) -> Result<PairKey, (RunError, ProcessPair)> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.pairs.values().any(|p| p.serial == pair.serial) {
            let err = RunError::AlreadyRunning(pair.serial.clone());
            return Err((err, pair));
        }
        let key = pair.key();
        entries.pairs.insert(key, pair);
        self.live.send_replace(entries.live());
        Ok(key)
    }

    /// Take a pair out for teardown. Returns `None` if it was already taken.
    pub fn claim(&self, key: &PairKey) -> Option<ProcessPair> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let pair = entries.pairs.remove(key)?;
        entries.closing.insert(*key);
        Some(pair)
    }

    /// Mark the teardown of a claimed pair as done.
    pub fn complete(&self, key: &PairKey) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.closing.remove(key) {
            self.live.send_replace(entries.live());
        }
    }

    /// Take every registered pair. The caller tears them down before returning.
    pub fn drain(&self) -> Vec<ProcessPair> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let drained: Vec<ProcessPair> = entries.pairs.drain().map(|(_, pair)| pair).collect();
        self.live.send_replace(entries.live());
        drained
    }

    pub fn keys(&self) -> Vec<PairKey> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.pairs.keys().copied().collect()
    }

    /// Number of registered pairs, not counting ones being torn down.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_serial(&self, serial: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.pairs.values().any(|p| p.serial == serial)
    }

    /// Run `f` against a registered pair.
    pub fn with_pair<T>(&self, key: &PairKey, f: impl FnOnce(&ProcessPair) -> T) -> Option<T> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.pairs.get(key).map(f)
    }

    /// Wait until no pair is registered or being torn down.
    pub async fn wait_until_empty(&self) {
        let mut live = self.live.subscribe();
        let _ = live.wait_for(|count| *count == 0).await;
    }
}

impl Default for ChildRegistry {
    fn default() -> Self {
        Self::new()
    }
}
