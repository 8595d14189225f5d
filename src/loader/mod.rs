//! The job coordinator.
//!
//! A [`Loader`] owns the plugin registry, the worker pool and the shared
//! cache. Each submitted [`Job`] is coordinated from its own thread, which
//! fans plugin calls out to the pool and merges what comes back; the caller
//! only holds a [`JobHandle`].

mod dispatch;
mod handle;
mod merge;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

pub use handle::{JobHandle, JobId, JobOutput, JobResult, JobState};

use crate::app::{App, AppArena};
use crate::cache::{app_cache_key, AppCache};
use crate::cancel::Cancellable;
use crate::config::Settings;
use crate::error::{JobError, LoaderError, PluginFailure};
use crate::job::{Job, PluginFilter};
use crate::plugin::{Plugin, PluginContext, PluginEntry, PluginError, PluginRegistry};
use dispatch::{guarded, JobRun};
use handle::JobStatus;

pub(crate) struct Shared {
    registry: PluginRegistry,
    pool: ThreadPool,
    cache: Arc<AppCache>,
    arena: Arc<AppArena>,
    settings: RwLock<Settings>,
}

impl Shared {
    fn context(&self, entry: &PluginEntry, cancellable: Cancellable) -> PluginContext {
        PluginContext::new(
            entry.name(),
            entry.priority(),
            cancellable,
            Arc::clone(&self.cache),
            Arc::clone(&self.arena),
        )
    }

    fn plugin_timeout(&self, job: &Job) -> Duration {
        job.timeout()
            .unwrap_or_else(|| self.settings.read().plugin_timeout)
    }

    /// Make finished records resolvable by handle and by unique id.
    fn remember(&self, apps: &[Arc<App>]) {
        self.arena.register_all(apps);
        for app in apps {
            if let Some(id) = app.unique_id() {
                self.cache.insert(app_cache_key(&id), Arc::clone(app));
            }
        }
    }
}

pub struct LoaderBuilder {
    settings: Settings,
    plugins: Vec<Box<dyn Plugin>>,
}

impl LoaderBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            plugins: Vec::new(),
        }
    }

    pub fn plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Box<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Register every plugin, apply rules, order them, start the pool and
    /// run each enabled plugin's setup. Registry errors are fatal; a failed
    /// setup only disables that plugin.
    pub fn build(self) -> Result<Loader, LoaderError> {
        let mut registry = PluginRegistry::new();
        for plugin in self.plugins {
            registry.register(plugin)?;
        }
        registry.apply_rules();
        let order = registry.compute_order()?;

        let filter = PluginFilter {
            allow: self.settings.allowlist.clone(),
            deny: self.settings.denylist.clone(),
        };
        for entry in order.iter() {
            if !filter.permits(entry.name()) {
                entry.set_enabled(false);
                debug!(plugin = %entry.name(), "plugin disabled by settings");
            }
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.settings.worker_threads)
            .thread_name(|i| format!("appfront-worker-{}", i))
            .build()
            .map_err(|e| LoaderError::WorkerPool(e.to_string()))?;

        let shared = Shared {
            registry,
            pool,
            cache: Arc::new(AppCache::new(&self.settings)),
            arena: Arc::new(AppArena::new()),
            settings: RwLock::new(self.settings),
        };

        for entry in order.iter().filter(|e| e.is_enabled()) {
            let ctx = shared.context(entry, Cancellable::new());
            match guarded(|| entry.plugin().setup(&ctx)) {
                Ok(()) => debug!(plugin = %entry.name(), "plugin set up"),
                Err(e) => {
                    entry.set_enabled(false);
                    warn!(plugin = %entry.name(), error = %e, "plugin setup failed, disabling");
                }
            }
        }

        info!(
            plugins = order.len(),
            enabled = order.iter().filter(|e| e.is_enabled()).count(),
            "loader ready"
        );
        Ok(Loader {
            shared: Arc::new(shared),
            next_job: AtomicU64::new(1),
            running: Mutex::new(Vec::new()),
        })
    }
}

pub struct Loader {
    shared: Arc<Shared>,
    next_job: AtomicU64,
    /// Jobs that may still be coordinating, cancelled when the loader goes.
    running: Mutex<Vec<(Cancellable, Weak<JobStatus>)>>,
}

impl Loader {
    pub fn builder(settings: Settings) -> LoaderBuilder {
        LoaderBuilder::new(settings)
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.shared.registry
    }

    /// Plugins in run order.
    pub fn plugins(&self) -> Arc<Vec<Arc<PluginEntry>>> {
        self.shared.registry.ordered()
    }

    pub fn enable_plugin(&self, name: &str, enabled: bool) -> Result<(), LoaderError> {
        self.shared.registry.enable(name, enabled)
    }

    pub fn settings(&self) -> Settings {
        self.shared.settings.read().clone()
    }

    /// Push new settings into the cache layer and every plugin.
    pub fn reload_settings(&self, settings: Settings) {
        self.shared.cache.reload(&settings);
        for entry in self.shared.registry.ordered().iter() {
            let result = guarded(|| {
                entry.plugin().reload(&settings);
                Ok(())
            });
            if let Err(e) = result {
                warn!(plugin = %entry.name(), error = %e, "plugin reload failed");
            }
        }
        *self.shared.settings.write() = settings;
        info!("settings reloaded");
    }

    pub fn cache(&self) -> &AppCache {
        &self.shared.cache
    }

    pub fn arena(&self) -> &AppArena {
        &self.shared.arena
    }

    /// A record seen by an earlier job, by unique id.
    pub fn lookup_app(&self, unique_id: &str) -> Option<Arc<App>> {
        self.shared.cache.lookup(&app_cache_key(unique_id))
    }

    /// Start `job` without blocking.
    pub fn submit(&self, job: Job) -> JobHandle {
        self.spawn(job, None)
    }

    /// Start `job` and hand its result to `callback` on the coordinator
    /// thread, before waiters on the handle are woken.
    pub fn submit_with<F>(&self, job: Job, callback: F) -> JobHandle
    where
        F: FnOnce(Result<JobResult, JobError>) + Send + 'static,
    {
        self.spawn(job, Some(Box::new(callback)))
    }

    /// Run `job` to completion on the calling thread's behalf.
    pub fn run(&self, job: Job) -> Result<JobResult, JobError> {
        self.submit(job).wait()
    }

    fn spawn(&self, job: Job, callback: Option<Callback>) -> JobHandle {
        let id = JobId(self.next_job.fetch_add(1, Ordering::Relaxed));
        let token = Cancellable::new();
        let status = JobStatus::new();
        let handle = JobHandle::new(id, token.clone(), Arc::clone(&status));

        {
            let mut running = self.running.lock();
            running.retain(|(_, s)| s.upgrade().is_some_and(|s| !s.state().is_terminal()));
            running.push((token.clone(), Arc::downgrade(&status)));
        }

        let shared = Arc::clone(&self.shared);
        let job_status = Arc::clone(&status);
        // Coordinators block on their plugins, so they get their own thread
        // rather than a pool slot.
        let spawned = thread::Builder::new()
            .name(format!("appfront-{}", id))
            .spawn(move || {
                let run = JobRun {
                    shared: &shared,
                    id,
                    job: &job,
                    token: &token,
                    status: &job_status,
                };
                let result = run.run();
                let pruned = shared.arena.prune();
                if pruned > 0 {
                    debug!(job = %id, pruned, "released records dropped from the arena");
                }
                if let Some(callback) = callback {
                    callback(result.clone());
                }
                job_status.finish(result);
            });

        if let Err(e) = spawned {
            warn!(job = %id, error = %e, "failed to start job thread");
            status.finish(Err(JobError::Plugin(PluginFailure::new(
                "loader",
                PluginError::failed(format!("cannot start job thread: {}", e)),
            ))));
        }
        handle
    }
}

type Callback = Box<dyn FnOnce(Result<JobResult, JobError>) + Send>;

impl Drop for Loader {
    fn drop(&mut self) {
        let mut cancelled = 0;
        for (token, status) in self.running.lock().drain(..) {
            if status.upgrade().is_some_and(|s| !s.state().is_terminal()) {
                token.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(jobs = cancelled, "cancelled running jobs on shutdown");
        }
    }
}

// Runs once the loader and every coordinator holding the shared state are gone.
impl Drop for Shared {
    fn drop(&mut self) {
        for entry in self.registry.ordered().iter() {
            let result = guarded(|| {
                entry.plugin().destroy();
                Ok(())
            });
            if let Err(e) = result {
                warn!(plugin = %entry.name(), error = %e, "plugin destroy failed");
            }
        }
    }
}
