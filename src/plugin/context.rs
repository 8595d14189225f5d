use std::sync::Arc;

use crate::app::{App, AppArena, AppId};
use crate::app_list::AppList;
use crate::cache::{app_cache_key, AppCache};
use crate::cancel::Cancellable;
use crate::plugin::PluginError;

/// What the loader hands a plugin for one invocation.
#[derive(Clone)]
pub struct PluginContext {
    plugin: String,
    priority: i32,
    cancellable: Cancellable,
    cache: Arc<AppCache>,
    arena: Arc<AppArena>,
    sink: Option<Arc<AppList>>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin: &str,
        priority: i32,
        cancellable: Cancellable,
        cache: Arc<AppCache>,
        arena: Arc<AppArena>,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            priority,
            cancellable,
            cache,
            arena,
            sink: None,
        }
    }

    pub(crate) fn with_sink(mut self, sink: Arc<AppList>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    pub fn cancellable(&self) -> &Cancellable {
        &self.cancellable
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellable.is_cancelled()
    }

    /// `Err(Cancelled)` once the invocation has been cancelled.
    pub fn check_cancelled(&self) -> Result<(), PluginError> {
        self.cancellable.check()
    }

    pub fn cache(&self) -> &AppCache {
        &self.cache
    }

    pub fn arena(&self) -> &AppArena {
        &self.arena
    }

    /// Report a record into the job's shared result list. Records arriving
    /// after cancellation are discarded; records with priority 0 take the
    /// plugin's priority.
    pub fn add(&self, app: Arc<App>) -> bool {
        if self.cancellable.is_cancelled() {
            return false;
        }
        let Some(sink) = &self.sink else {
            return false;
        };
        if app.priority() == 0 {
            app.set_priority(self.priority);
        }
        self.arena.register(&app);
        sink.add(app)
    }

    /// Link `related` to `parent` and make it resolvable through the arena.
    pub fn relate(&self, parent: &App, related: &Arc<App>) {
        self.arena.register(related);
        parent.add_related(related);
    }

    pub fn set_runtime(&self, app: &App, runtime: &Arc<App>) {
        self.arena.register(runtime);
        app.set_runtime(runtime);
    }

    /// The cached record with this identity, or a fresh one that is cached
    /// from now on.
    pub fn app_for_id(&self, id: AppId) -> Arc<App> {
        let key = app_cache_key(&id.to_string());
        if let Some(app) = self.cache.lookup(&key) {
            return app;
        }
        let app = App::with_id(id);
        self.cache.insert(key, Arc::clone(&app));
        app
    }
}

#[cfg(test)]
impl PluginContext {
    /// A context outside any loader, with its own sink, cache and arena.
    pub(crate) fn detached(plugin: &str) -> (Self, Arc<AppList>) {
        let settings = crate::config::Settings::default();
        let sink = Arc::new(AppList::new());
        let ctx = Self::new(
            plugin,
            0,
            Cancellable::new(),
            Arc::new(AppCache::new(&settings)),
            Arc::new(AppArena::new()),
        )
        .with_sink(Arc::clone(&sink));
        (ctx, sink)
    }
}
