//! Registry of handles held by live connections.
//!
//! One registry is shared by every session in the server process. All
//! access goes through a single mutex so the membership check and insert
//! in [`HandleRegistry::try_register`] happen as one step.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Thread-safe set of active handles
#[derive(Debug, Default)]
pub struct HandleRegistry {
    handles: Mutex<BTreeSet<String>>,
}

impl HandleRegistry {
    /// Create an empty registry ready to be shared between sessions
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `handle` if no live connection holds it.
    ///
    /// Returns `false`, leaving the registry untouched, when it is taken.
    pub fn try_register(&self, handle: &str) -> bool {
        let mut handles = self.lock();
        let inserted = handles.insert(handle.to_string());
        if inserted {
            debug!(active = handles.len(), "Handle registered");
        }
        inserted
    }

    /// Release `handle`. Releasing an absent handle does nothing.
    pub fn unregister(&self, handle: &str) {
        let mut handles = self.lock();
        if handles.remove(handle) {
            debug!(active = handles.len(), "Handle released");
        }
    }

    /// Sorted copy of the active handles, for diagnostics
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.lock().contains(handle)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
