//! Ordered, deduplicating collection of application records.
//!
//! Every operation takes the internal lock, so a single list can be shared by
//! several plugin tasks of the same job.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Datelike;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::app::App;

/// How [`AppList::filter_duplicates`] decides two records are the same.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupeMode {
    /// Keep every record.
    None,
    /// Full unique id; first seen wins.
    #[default]
    ById,
    /// Base id only; strictly higher priority wins, ties keep the first seen.
    ByPriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupeKey {
    Id(String),
    Object(usize),
}

fn dedupe_key(app: &Arc<App>, mode: DedupeMode) -> DedupeKey {
    match (mode, app.id()) {
        (DedupeMode::ByPriority, Some(id)) => DedupeKey::Id(id.name().to_string()),
        (_, Some(id)) => DedupeKey::Id(id.to_string()),
        (_, None) => DedupeKey::Object(Arc::as_ptr(app) as usize),
    }
}

#[derive(Default)]
struct ListInner {
    apps: Vec<Arc<App>>,
    index: HashMap<String, Arc<App>>,
}

impl ListInner {
    fn rebuild_index(&mut self) {
        self.index.clear();
        for app in &self.apps {
            if let Some(id) = app.unique_id() {
                self.index.entry(id).or_insert_with(|| Arc::clone(app));
            }
        }
    }
}

#[derive(Default)]
pub struct AppList {
    inner: Mutex<ListInner>,
}

impl AppList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_apps(apps: impl IntoIterator<Item = Arc<App>>) -> Self {
        let list = Self::new();
        for app in apps {
            list.add(app);
        }
        list
    }

    /// Insert a record. Records without identity are always appended; a
    /// record whose id is already present is dropped and `false` returned.
    pub fn add(&self, app: Arc<App>) -> bool {
        let mut inner = self.inner.lock();
        match app.unique_id() {
            None => {
                inner.apps.push(app);
                true
            }
            Some(id) => {
                if inner.index.contains_key(&id) {
                    return false;
                }
                inner.index.insert(id, Arc::clone(&app));
                inner.apps.push(app);
                true
            }
        }
    }

    pub fn add_list(&self, other: &AppList) {
        for app in other.snapshot() {
            self.add(app);
        }
    }

    /// Remove one record by object identity.
    pub fn remove(&self, app: &App) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.apps.len();
        inner.apps.retain(|a| !std::ptr::eq(Arc::as_ptr(a), app));
        let removed = before != inner.apps.len();
        if removed {
            inner.rebuild_index();
        }
        removed
    }

    pub fn remove_all(&self) {
        let mut inner = self.inner.lock();
        inner.apps.clear();
        inner.index.clear();
    }

    pub fn lookup(&self, unique_id: &str) -> Option<Arc<App>> {
        self.inner.lock().index.get(unique_id).cloned()
    }

    pub fn contains(&self, app: &App) -> bool {
        self.inner
            .lock()
            .apps
            .iter()
            .any(|a| std::ptr::eq(Arc::as_ptr(a), app))
    }

    pub fn get(&self, idx: usize) -> Option<Arc<App>> {
        self.inner.lock().apps.get(idx).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().apps.is_empty()
    }

    /// The current members, in order.
    pub fn snapshot(&self) -> Vec<Arc<App>> {
        self.inner.lock().apps.clone()
    }

    /// Independent list holding the same records.
    pub fn copy(&self) -> AppList {
        let inner = self.inner.lock();
        AppList {
            inner: Mutex::new(ListInner {
                apps: inner.apps.clone(),
                index: inner.index.clone(),
            }),
        }
    }

    /// Keep only records for which `predicate` holds.
    pub fn filter<F>(&self, mut predicate: F)
    where
        F: FnMut(&App) -> bool,
    {
        let mut inner = self.inner.lock();
        inner.apps.retain(|a| predicate(a.as_ref()));
        inner.rebuild_index();
    }

    /// Keep exactly one record per key, see [`DedupeMode`].
    pub fn filter_duplicates(&self, mode: DedupeMode) {
        if mode == DedupeMode::None {
            return;
        }
        let mut inner = self.inner.lock();
        let mut kept: Vec<Arc<App>> = Vec::with_capacity(inner.apps.len());
        let mut seen: HashMap<DedupeKey, usize> = HashMap::new();

        for app in inner.apps.drain(..) {
            let key = dedupe_key(&app, mode);
            match seen.get(&key) {
                None => {
                    seen.insert(key, kept.len());
                    kept.push(app);
                }
                Some(&pos) => {
                    if mode == DedupeMode::ByPriority && app.priority() > kept[pos].priority() {
                        kept[pos] = app;
                    }
                }
            }
        }

        inner.apps = kept;
        inner.rebuild_index();
    }

    pub fn sort_by<F>(&self, mut compare: F)
    where
        F: FnMut(&App, &App) -> Ordering,
    {
        self.inner
            .lock()
            .apps
            .sort_by(|a, b| compare(a.as_ref(), b.as_ref()));
    }

    pub fn truncate(&self, len: usize) {
        let mut inner = self.inner.lock();
        if inner.apps.len() > len {
            inner.apps.truncate(len);
            inner.rebuild_index();
        }
    }

    /// Shuffle with a seed derived from today's day-of-year, so the order is
    /// stable for the whole calendar day.
    pub fn randomize_daily(&self) {
        let day = chrono::Local::now().ordinal();
        self.randomize_for_day(day);
    }

    /// Shuffle as if today were `day_of_year`. Keys are drawn from one
    /// day-seeded generator in identity order, so the result depends only on
    /// the day and the set of records, not on their current order.
    pub fn randomize_for_day(&self, day_of_year: u32) {
        let mut rng = StdRng::seed_from_u64(u64::from(day_of_year));
        let mut inner = self.inner.lock();
        let mut keyed: Vec<(String, Arc<App>)> = inner
            .apps
            .drain(..)
            .map(|app| (randomize_ident(&app), app))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        let mut keyed: Vec<(u64, String, Arc<App>)> = keyed
            .into_iter()
            .map(|(ident, app)| (rng.gen::<u64>(), ident, app))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        inner.apps = keyed.into_iter().map(|(_, _, app)| app).collect();
    }
}

fn randomize_ident(app: &App) -> String {
    app.unique_id()
        .or_else(|| app.name())
        .unwrap_or_else(|| app.key().to_string())
}

impl fmt::Debug for AppList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot().iter()).finish()
    }
}
