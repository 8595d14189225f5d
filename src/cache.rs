//! Process-wide lookup cache shared by plugins and the loader.
//!
//! Lookups are advisory: a miss is never an error, and concurrent writers to
//! the same key simply replace each other.

use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::RwLock;
use tracing::debug;

use crate::app::App;
use crate::config::Settings;

/// Cache key under which a record is stored by unique id.
pub fn app_cache_key(unique_id: &str) -> String {
    format!("app:{}", unique_id)
}

#[derive(Debug, Clone)]
pub enum CacheEntry {
    App(Arc<App>),
    Value(String),
}

pub struct AppCache {
    inner: RwLock<Cache<String, CacheEntry>>,
}

fn build(settings: &Settings) -> Cache<String, CacheEntry> {
    Cache::builder()
        .max_capacity(settings.cache_capacity)
        .time_to_live(settings.cache_ttl)
        .build()
}

impl AppCache {
    pub fn new(settings: &Settings) -> Self {
        Self {
            inner: RwLock::new(build(settings)),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<App>> {
        match self.inner.read().get(key) {
            Some(CacheEntry::App(app)) => {
                debug!(key = %key, "cache hit");
                Some(app)
            }
            _ => None,
        }
    }

    pub fn lookup_value(&self, key: &str) -> Option<String> {
        match self.inner.read().get(key) {
            Some(CacheEntry::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, app: Arc<App>) {
        self.inner.read().insert(key.into(), CacheEntry::App(app));
    }

    pub fn insert_value(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .read()
            .insert(key.into(), CacheEntry::Value(value.into()));
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.read().invalidate(key);
    }

    pub fn invalidate_all(&self) {
        let cache = self.inner.read();
        cache.invalidate_all();
        cache.run_pending_tasks();
    }

    /// Rebuild with new capacity and TTL. Existing entries are dropped.
    pub fn reload(&self, settings: &Settings) {
        *self.inner.write() = build(settings);
        debug!(
            capacity = settings.cache_capacity,
            ttl_secs = settings.cache_ttl.as_secs(),
            "cache rebuilt"
        );
    }

    pub fn entry_count(&self) -> u64 {
        let cache = self.inner.read();
        cache.run_pending_tasks();
        cache.entry_count()
    }
}
