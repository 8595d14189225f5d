pub mod arena;
mod id;
mod state;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

pub use arena::{AppArena, AppKey};
pub use id::{AppId, WILDCARD};
pub use state::{AppField, AppKind, AppQuirks, AppState};

use crate::job::RefineFlags;
use crate::plugin::PluginError;

type ChangeHandler = Arc<dyn Fn(&App, AppField) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Default, Clone)]
struct AppData {
    name: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    version: Option<String>,
    state: AppState,
    kind: AppKind,
    quirks: AppQuirks,
    categories: BTreeSet<String>,
    metadata: BTreeMap<String, String>,
    related: Vec<AppKey>,
    runtime: Option<AppKey>,
    priority: i32,
    management_plugin: Option<String>,
    icon: Option<String>,
    license: Option<String>,
    size_installed: Option<u64>,
    rating: Option<i32>,
    refined: RefineFlags,
}

/// One software item, shared between the loader, plugins and any UI.
///
/// All attributes use interior mutability so plugins can fill them in place
/// while other holders keep their `Arc`. The identity is write-once.
pub struct App {
    key: AppKey,
    id: OnceLock<AppId>,
    data: RwLock<AppData>,
    handlers: Mutex<Vec<(HandlerId, ChangeHandler)>>,
    next_handler: AtomicU64,
}

impl App {
    /// A record whose identity is not known yet.
    pub fn new() -> Arc<App> {
        Arc::new(App {
            key: AppKey::next(),
            id: OnceLock::new(),
            data: RwLock::new(AppData::default()),
            handlers: Mutex::new(Vec::new()),
            next_handler: AtomicU64::new(1),
        })
    }

    pub fn with_id(id: AppId) -> Arc<App> {
        let app = App::new();
        {
            let mut data = app.data.write();
            data.kind = id.kind();
        }
        let _ = app.id.set(id);
        app
    }

    pub fn key(&self) -> AppKey {
        self.key
    }

    pub fn id(&self) -> Option<&AppId> {
        self.id.get()
    }

    pub fn unique_id(&self) -> Option<String> {
        self.id.get().map(|id| id.to_string())
    }

    pub fn base_id(&self) -> Option<&str> {
        self.id.get().map(|id| id.name())
    }

    /// Assign the identity. Re-assigning the same id is a no-op; a different
    /// one is rejected.
    pub fn set_id(&self, id: AppId) -> Result<(), PluginError> {
        if let Some(existing) = self.id.get() {
            if *existing == id {
                return Ok(());
            }
            return Err(PluginError::InvalidArgument(format!(
                "identity of {} already assigned, refusing {}",
                existing, id
            )));
        }
        let kind = id.kind();
        if self.id.set(id).is_err() {
            return Err(PluginError::InvalidArgument(
                "identity assigned concurrently".to_string(),
            ));
        }
        self.update(AppField::Kind, |d| {
            if d.kind == AppKind::Unknown && kind != AppKind::Unknown {
                d.kind = kind;
                true
            } else {
                false
            }
        });
        self.notify(AppField::Id);
        Ok(())
    }

    pub fn name(&self) -> Option<String> {
        self.data.read().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.update(AppField::Name, |d| replace(&mut d.name, Some(name)));
    }

    pub fn summary(&self) -> Option<String> {
        self.data.read().summary.clone()
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        let summary = summary.into();
        self.update(AppField::Summary, |d| replace(&mut d.summary, Some(summary)));
    }

    pub fn description(&self) -> Option<String> {
        self.data.read().description.clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        let description = description.into();
        self.update(AppField::Description, |d| {
            replace(&mut d.description, Some(description))
        });
    }

    pub fn version(&self) -> Option<String> {
        self.data.read().version.clone()
    }

    pub fn set_version(&self, version: impl Into<String>) {
        let version = version.into();
        self.update(AppField::Version, |d| replace(&mut d.version, Some(version)));
    }

    pub fn state(&self) -> AppState {
        self.data.read().state
    }

    pub fn set_state(&self, state: AppState) {
        self.update(AppField::State, |d| replace(&mut d.state, state));
    }

    pub fn kind(&self) -> AppKind {
        self.data.read().kind
    }

    pub fn set_kind(&self, kind: AppKind) {
        self.update(AppField::Kind, |d| replace(&mut d.kind, kind));
    }

    pub fn quirks(&self) -> AppQuirks {
        self.data.read().quirks
    }

    pub fn has_quirk(&self, quirk: AppQuirks) -> bool {
        self.data.read().quirks.contains(quirk)
    }

    pub fn add_quirk(&self, quirk: AppQuirks) {
        self.update(AppField::Quirks, |d| {
            let before = d.quirks;
            d.quirks.insert(quirk);
            before != d.quirks
        });
    }

    pub fn remove_quirk(&self, quirk: AppQuirks) {
        self.update(AppField::Quirks, |d| {
            let before = d.quirks;
            d.quirks.remove(quirk);
            before != d.quirks
        });
    }

    pub fn categories(&self) -> Vec<String> {
        self.data.read().categories.iter().cloned().collect()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.data.read().categories.contains(category)
    }

    pub fn add_category(&self, category: impl Into<String>) {
        let category = category.into();
        self.update(AppField::Categories, |d| d.categories.insert(category));
    }

    pub fn metadata(&self, key: &str) -> Option<String> {
        self.data.read().metadata.get(key).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        self.update(AppField::Metadata, |d| {
            d.metadata.insert(key, value.clone()).as_ref() != Some(&value)
        });
    }

    /// Links another record as related (add-on, extension). Stores the
    /// handle only; resolve it through the [`AppArena`].
    pub fn add_related(&self, other: &App) {
        let key = other.key();
        self.update(AppField::Related, |d| {
            if d.related.contains(&key) {
                false
            } else {
                d.related.push(key);
                true
            }
        });
    }

    pub fn related(&self) -> Vec<AppKey> {
        self.data.read().related.clone()
    }

    pub fn set_runtime(&self, runtime: &App) {
        let key = runtime.key();
        self.update(AppField::Runtime, |d| replace(&mut d.runtime, Some(key)));
    }

    pub fn runtime(&self) -> Option<AppKey> {
        self.data.read().runtime
    }

    pub fn priority(&self) -> i32 {
        self.data.read().priority
    }

    pub fn set_priority(&self, priority: i32) {
        self.update(AppField::Priority, |d| replace(&mut d.priority, priority));
    }

    pub fn management_plugin(&self) -> Option<String> {
        self.data.read().management_plugin.clone()
    }

    /// Claim management ownership. The first claim wins; later claims are
    /// no-ops and return `false`.
    pub fn claim_management(&self, plugin: &str) -> bool {
        self.update(AppField::ManagementPlugin, |d| {
            if d.management_plugin.is_some() {
                return false;
            }
            d.management_plugin = Some(plugin.to_string());
            true
        })
    }

    pub fn icon(&self) -> Option<String> {
        self.data.read().icon.clone()
    }

    pub fn set_icon(&self, icon: impl Into<String>) {
        let icon = icon.into();
        self.update(AppField::Icon, |d| replace(&mut d.icon, Some(icon)));
    }

    pub fn license(&self) -> Option<String> {
        self.data.read().license.clone()
    }

    pub fn set_license(&self, license: impl Into<String>) {
        let license = license.into();
        self.update(AppField::License, |d| replace(&mut d.license, Some(license)));
    }

    pub fn size_installed(&self) -> Option<u64> {
        self.data.read().size_installed
    }

    pub fn set_size_installed(&self, size: u64) {
        self.update(AppField::Size, |d| replace(&mut d.size_installed, Some(size)));
    }

    pub fn rating(&self) -> Option<i32> {
        self.data.read().rating
    }

    pub fn set_rating(&self, rating: i32) {
        self.update(AppField::Rating, |d| replace(&mut d.rating, Some(rating)));
    }

    /// Required-data flags already refined on this record.
    pub fn refined(&self) -> RefineFlags {
        self.data.read().refined
    }

    /// Widen the refined set; flags are never retracted.
    pub fn mark_refined(&self, flags: RefineFlags) {
        self.update(AppField::Refined, |d| {
            let before = d.refined;
            d.refined |= flags;
            before != d.refined
        });
    }

    /// Valid records have a name and either a known state or an identity.
    pub fn is_valid(&self) -> bool {
        let data = self.data.read();
        data.name.as_deref().is_some_and(|n| !n.is_empty())
            && (data.state != AppState::Unknown || self.id.get().is_some())
    }

    /// Register a change handler, called after each attribute change.
    pub fn connect<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&App, AppField) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, AtomicOrdering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        before != handlers.len()
    }

    pub fn snapshot(&self) -> AppSnapshot {
        let data = self.data.read().clone();
        AppSnapshot {
            id: self.unique_id(),
            name: data.name,
            summary: data.summary,
            description: data.description,
            version: data.version,
            state: data.state,
            kind: data.kind,
            quirks: data.quirks,
            categories: data.categories.into_iter().collect(),
            metadata: data.metadata,
            priority: data.priority,
            management_plugin: data.management_plugin,
            icon: data.icon,
            license: data.license,
            size_installed: data.size_installed,
            rating: data.rating,
        }
    }

    /// Case-insensitive name order, unnamed records last, then by unique id.
    pub fn cmp_by_name(a: &App, b: &App) -> Ordering {
        let an = a.name().map(|n| n.to_lowercase());
        let bn = b.name().map(|n| n.to_lowercase());
        let by_name = match (an, bn) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_name.then_with(|| a.id().cmp(&b.id()))
    }

    fn update<F>(&self, field: AppField, f: F) -> bool
    where
        F: FnOnce(&mut AppData) -> bool,
    {
        let changed = {
            let mut data = self.data.write();
            f(&mut data)
        };
        if changed {
            self.notify(field);
        }
        changed
    }

    fn notify(&self, field: AppField) {
        let handlers: Vec<ChangeHandler> =
            self.handlers.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(self, field);
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.read();
        f.debug_struct("App")
            .field("key", &self.key)
            .field("id", &self.id.get().map(|id| id.to_string()))
            .field("name", &data.name)
            .field("state", &data.state)
            .field("priority", &data.priority)
            .field("management_plugin", &data.management_plugin)
            .finish()
    }
}

/// Point-in-time copy of a record, for output.
#[derive(Debug, Clone, Serialize)]
pub struct AppSnapshot {
    pub id: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub state: AppState,
    pub kind: AppKind,
    pub quirks: AppQuirks,
    pub categories: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub priority: i32,
    pub management_plugin: Option<String>,
    pub icon: Option<String>,
    pub license: Option<String>,
    pub size_installed: Option<u64>,
    pub rating: Option<i32>,
}
