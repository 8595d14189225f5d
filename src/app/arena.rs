//! Handle-addressed registry of live application records.
//!
//! Records are shared through `Arc`; the arena only keeps weak references, so
//! "related" and "runtime" links stored as [`AppKey`]s never keep a record
//! alive. Dead slots are reclaimed by [`AppArena::prune`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::app::App;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Stable handle of a record, assigned once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppKey(u64);

impl AppKey {
    pub(crate) fn next() -> Self {
        AppKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Default)]
pub struct AppArena {
    slots: RwLock<HashMap<AppKey, Weak<App>>>,
}

impl AppArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, app: &Arc<App>) {
        self.slots.write().insert(app.key(), Arc::downgrade(app));
    }

    pub fn register_all<'a>(&self, apps: impl IntoIterator<Item = &'a Arc<App>>) {
        let mut slots = self.slots.write();
        for app in apps {
            slots.insert(app.key(), Arc::downgrade(app));
        }
    }

    /// Look up a live record; `None` once every owner has dropped it.
    pub fn resolve(&self, key: AppKey) -> Option<Arc<App>> {
        self.slots.read().get(&key).and_then(Weak::upgrade)
    }

    pub fn resolve_all(&self, keys: &[AppKey]) -> Vec<Arc<App>> {
        let slots = self.slots.read();
        keys.iter()
            .filter_map(|k| slots.get(k).and_then(Weak::upgrade))
            .collect()
    }

    /// Drop slots whose record is gone; returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, weak| weak.strong_count() > 0);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}
