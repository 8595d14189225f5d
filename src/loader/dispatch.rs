//! Per-job coordination: fan plugin tasks out on the worker pool and collect
//! their outcomes under cancellation and a per-plugin deadline.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::select;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::app::App;
use crate::app_list::AppList;
use crate::cancel::Cancellable;
use crate::category::CategoryList;
use crate::error::{JobError, PluginFailure};
use crate::job::{Action, DispatchMode, FailurePolicy, Job, JobTarget};
use crate::loader::handle::{JobId, JobOutput, JobResult, JobState, JobStatus};
use crate::loader::Shared;
use crate::plugin::{Plugin, PluginContext, PluginEntry, PluginError};

/// One plugin handler call, shared by every task of a dispatch round.
pub(crate) type Invoke =
    Arc<dyn Fn(&dyn Plugin, &PluginContext) -> Result<(), PluginError> + Send + Sync>;

pub(crate) fn handler<F>(f: F) -> Invoke
where
    F: Fn(&dyn Plugin, &PluginContext) -> Result<(), PluginError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub succeeded: usize,
    pub failures: Vec<PluginFailure>,
}

impl Outcome {
    fn absorb(&mut self, other: Outcome) {
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }
}

struct TaskDone {
    idx: usize,
    result: Result<(), PluginError>,
    elapsed: Duration,
}

enum TaskEvent {
    Started { idx: usize, at: Instant },
    Done(TaskDone),
}

enum Event {
    Task(TaskEvent),
    Disconnected,
    Cancelled,
    Deadline,
}

/// Run `f`, turning a panic into [`PluginError::Failed`].
pub(crate) fn guarded<F>(f: F) -> Result<(), PluginError>
where
    F: FnOnce() -> Result<(), PluginError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Failed(format!(
            "plugin panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Everything one coordinator thread needs while running a job.
pub(crate) struct JobRun<'a> {
    pub shared: &'a Shared,
    pub id: JobId,
    pub job: &'a Job,
    pub token: &'a Cancellable,
    pub status: &'a JobStatus,
}

impl JobRun<'_> {
    pub(crate) fn run(&self) -> Result<JobResult, JobError> {
        let started = Instant::now();
        let action = self.job.action();
        let result = self.dispatch();
        match &result {
            Ok(r) => info!(
                job = %self.id,
                action = %action,
                warnings = r.warnings.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job completed"
            ),
            Err(JobError::Cancelled) => debug!(job = %self.id, action = %action, "job cancelled"),
            Err(e) => info!(job = %self.id, action = %action, error = %e, "job failed"),
        }
        result
    }

    fn dispatch(&self) -> Result<JobResult, JobError> {
        self.job.validate().map_err(JobError::InvalidArgument)?;
        self.check_cancelled()?;
        self.status.set_state(JobState::Dispatching);

        let action = self.job.action();
        let plugins = self.shared.registry.applicable(self.job);
        debug!(
            job = %self.id,
            action = %action,
            plugins = %plugins.iter().map(|p| p.name()).collect::<Vec<_>>().join(","),
            "dispatching"
        );
        if plugins.is_empty() {
            return Err(JobError::NotSupported(action));
        }

        match (action.dispatch_mode(), self.job.target()) {
            (DispatchMode::FanOut, _) if action.produces_apps() => self.list(&plugins),
            (DispatchMode::FanOut, _) if action == Action::GetCategories => {
                self.categories(&plugins)
            }
            (DispatchMode::FanOut, JobTarget::Refresh(kind)) => {
                let (kind, age) = (*kind, self.job.cache_age());
                let invoke = handler(move |p, ctx| p.refresh(kind, age, ctx));
                self.success(&plugins, &invoke, DispatchMode::FanOut)
            }
            (DispatchMode::Sequential, JobTarget::App(app)) if action == Action::Refine => {
                self.refine_target(&plugins, app)
            }
            (DispatchMode::Sequential, JobTarget::App(app)) if action.is_app_action() => {
                self.app_action(app)
            }
            (DispatchMode::Sequential, JobTarget::Review(app, review)) => {
                let (app, review) = (Arc::clone(app), review.clone());
                let invoke = handler(move |p, ctx| p.review(&app, &review, ctx));
                self.success(&plugins, &invoke, DispatchMode::Sequential)
            }
            (DispatchMode::Sequential, JobTarget::Auth(provider)) => {
                let provider = provider.clone();
                let invoke = handler(move |p, ctx| p.auth(&provider, ctx));
                self.success(&plugins, &invoke, DispatchMode::Sequential)
            }
            (mode, _) => Err(JobError::InvalidArgument(format!(
                "{} has no {:?} dispatch route",
                action, mode
            ))),
        }
    }

    fn list(&self, plugins: &[Arc<PluginEntry>]) -> Result<JobResult, JobError> {
        let sink = Arc::new(AppList::new());
        self.status.set_state(JobState::Running);
        let outcome = self.fan_out(plugins, Some(&sink), &list_invoke(self.job))?;
        let warnings = self.conclude(outcome)?;

        self.status.set_state(JobState::Merging);
        self.check_cancelled()?;
        let warnings = self.merge(&sink, warnings)?;
        self.check_cancelled()?;
        Ok(JobResult {
            output: JobOutput::Apps(sink),
            warnings,
        })
    }

    fn categories(&self, plugins: &[Arc<PluginEntry>]) -> Result<JobResult, JobError> {
        let categories = Arc::new(CategoryList::new());
        let sink = Arc::clone(&categories);
        let invoke = handler(move |p, ctx| p.list_categories(&sink, ctx));

        self.status.set_state(JobState::Running);
        let outcome = self.fan_out(plugins, None, &invoke)?;
        let warnings = self.conclude(outcome)?;
        self.status.set_state(JobState::Merging);
        self.check_cancelled()?;
        Ok(JobResult {
            output: JobOutput::Categories(categories.sorted()),
            warnings,
        })
    }

    fn refine_target(
        &self,
        plugins: &[Arc<PluginEntry>],
        app: &Arc<App>,
    ) -> Result<JobResult, JobError> {
        let flags = self.job.refine_flags();
        let targets = Arc::new(vec![Arc::clone(app)]);
        let invoke = handler(move |p, ctx| p.refine(&targets, flags, ctx));

        self.status.set_state(JobState::Running);
        let outcome = self.sequential(plugins, None, &invoke)?;
        let mut warnings = self.conclude(outcome)?;
        app.mark_refined(flags);

        self.status.set_state(JobState::Merging);
        warnings.extend(self.refine_related(std::slice::from_ref(app), flags)?);
        self.shared.remember(std::slice::from_ref(app));
        self.check_cancelled()?;
        Ok(JobResult {
            output: JobOutput::App(Arc::clone(app)),
            warnings,
        })
    }

    /// Install, remove, launch and update go to the record's management
    /// plugin only.
    fn app_action(&self, app: &Arc<App>) -> Result<JobResult, JobError> {
        let action = self.job.action();
        if app.management_plugin().is_none() {
            self.adopt(std::slice::from_ref(app));
        }
        let Some(owner) = app.management_plugin() else {
            debug!(job = %self.id, app = ?app.unique_id(), "no management plugin");
            return Err(JobError::NotSupported(action));
        };
        let entry = self
            .shared
            .registry
            .applicable(self.job)
            .into_iter()
            .find(|e| e.name() == owner)
            .ok_or(JobError::NotSupported(action))?;

        let target = Arc::clone(app);
        let invoke = handler(move |p, ctx| match action {
            Action::Install => p.install(&target, ctx),
            Action::Remove => p.remove(&target, ctx),
            Action::Launch => p.launch(&target, ctx),
            Action::Update => p.update(&target, ctx),
            _ => Err(PluginError::NotSupported),
        });
        self.success(std::slice::from_ref(&entry), &invoke, DispatchMode::Sequential)
    }

    fn success(
        &self,
        plugins: &[Arc<PluginEntry>],
        invoke: &Invoke,
        mode: DispatchMode,
    ) -> Result<JobResult, JobError> {
        self.status.set_state(JobState::Running);
        let outcome = match mode {
            DispatchMode::FanOut => self.fan_out(plugins, None, invoke)?,
            DispatchMode::Sequential => self.sequential(plugins, None, invoke)?,
        };
        let warnings = self.conclude(outcome)?;
        self.status.set_state(JobState::Merging);
        self.check_cancelled()?;
        Ok(JobResult {
            output: JobOutput::Success,
            warnings,
        })
    }

    /// A round is a success if at least one plugin handled it. Otherwise
    /// the failures (or the lack of any capable plugin) become the error.
    fn conclude(&self, outcome: Outcome) -> Result<Vec<PluginFailure>, JobError> {
        if outcome.succeeded > 0 {
            return Ok(outcome.failures);
        }
        Err(JobError::from_failures(self.job.action(), outcome.failures))
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), JobError> {
        if self.token.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `plugins` one after another, in the order given.
    pub(crate) fn sequential(
        &self,
        plugins: &[Arc<PluginEntry>],
        sink: Option<&Arc<AppList>>,
        invoke: &Invoke,
    ) -> Result<Outcome, JobError> {
        let mut outcome = Outcome::default();
        for entry in plugins {
            self.check_cancelled()?;
            outcome.absorb(self.fan_out(std::slice::from_ref(entry), sink, invoke)?);
        }
        Ok(outcome)
    }

    /// Run `plugins` concurrently on the worker pool and wait for all of
    /// them or the job's cancellation.
    ///
    /// Each plugin gets `timeout` from the moment its task starts. A task
    /// still queued after `timeout` is moved to its own thread, so calls that
    /// ignore cancellation and keep a pool worker cannot starve the others.
    /// A plugin whose earlier call timed out and is still running fails with
    /// a timeout straight away instead of taking another worker.
    pub(crate) fn fan_out(
        &self,
        plugins: &[Arc<PluginEntry>],
        sink: Option<&Arc<AppList>>,
        invoke: &Invoke,
    ) -> Result<Outcome, JobError> {
        self.check_cancelled()?;
        let timeout = self.shared.plugin_timeout(self.job);
        let fail_fast = self.job.failure_policy() == FailurePolicy::FailFast;
        let (tx, rx) = crossbeam_channel::unbounded::<TaskEvent>();
        let mut pending: BTreeMap<usize, Slot> = BTreeMap::new();
        let mut outcome = Outcome::default();

        for (idx, entry) in plugins.iter().enumerate() {
            if entry.is_stalled() {
                let failure = PluginFailure::new(entry.name(), PluginError::Timeout(timeout));
                if fail_fast {
                    cancel_pending(&pending);
                    return Err(JobError::from(failure));
                }
                warn!(job = %self.id, plugin = %entry.name(), "previous call still running, skipped");
                outcome.failures.push(failure);
                continue;
            }

            let child = self.token.child();
            let mut ctx = self.shared.context(entry, child.clone());
            if let Some(sink) = sink {
                ctx = ctx.with_sink(Arc::clone(sink));
            }
            let tracker = Arc::new(Mutex::new(Tracker::default()));
            let task: Task = {
                let entry = Arc::clone(entry);
                let invoke = Arc::clone(invoke);
                let tracker = Arc::clone(&tracker);
                let tx = tx.clone();
                Box::new(move || {
                    let started = Instant::now();
                    let _ = tx.send(TaskEvent::Started { idx, at: started });
                    let result = if ctx.is_cancelled() {
                        Err(PluginError::Cancelled)
                    } else {
                        guarded(|| invoke(entry.plugin(), &ctx))
                    };
                    tracker.lock().finish(&entry);
                    let _ = tx.send(TaskEvent::Done(TaskDone {
                        idx,
                        result,
                        elapsed: started.elapsed(),
                    }));
                })
            };
            let task = Arc::new(Mutex::new(Some(task)));
            let queued = Arc::clone(&task);
            self.shared.pool.spawn(move || run_once(&queued));
            pending.insert(
                idx,
                Slot {
                    cancel: child,
                    task,
                    tracker,
                    started: None,
                    queued_at: Instant::now(),
                    promoted: false,
                },
            );
        }
        drop(tx);

        let cancelled = self.token.subscribe();
        while !pending.is_empty() {
            let next = pending
                .values()
                .map(|slot| slot.deadline(timeout))
                .min()
                .unwrap_or_else(Instant::now);
            let remaining = next.saturating_duration_since(Instant::now());
            let event = select! {
                recv(rx) -> msg => msg.map_or(Event::Disconnected, Event::Task),
                recv(cancelled) -> _ => Event::Cancelled,
                default(remaining) => Event::Deadline,
            };
            match event {
                Event::Task(TaskEvent::Started { idx, at }) => {
                    if let Some(slot) = pending.get_mut(&idx) {
                        slot.started = Some(at);
                    }
                }
                Event::Task(TaskEvent::Done(done)) => {
                    // Already reported as timed out.
                    if pending.remove(&done.idx).is_none() {
                        continue;
                    }
                    let name = plugins[done.idx].name();
                    match done.result {
                        Ok(()) => {
                            debug!(
                                job = %self.id,
                                plugin = %name,
                                elapsed_ms = done.elapsed.as_millis() as u64,
                                "plugin finished"
                            );
                            outcome.succeeded += 1;
                        }
                        Err(PluginError::NotSupported) => {
                            debug!(job = %self.id, plugin = %name, "plugin declined");
                        }
                        Err(PluginError::Cancelled) => {
                            debug!(job = %self.id, plugin = %name, "plugin cancelled");
                        }
                        Err(error) => {
                            let failure = PluginFailure::new(name, error);
                            if fail_fast {
                                cancel_pending(&pending);
                                return Err(JobError::from(failure));
                            }
                            warn!(job = %self.id, plugin = %name, error = %failure.error, "plugin failed");
                            outcome.failures.push(failure);
                        }
                    }
                }
                Event::Disconnected => break,
                Event::Cancelled => {
                    cancel_pending(&pending);
                    return Err(JobError::Cancelled);
                }
                Event::Deadline => {
                    let now = Instant::now();
                    let expired: Vec<usize> = pending
                        .iter()
                        .filter(|(_, slot)| slot.deadline(timeout) <= now)
                        .map(|(&idx, _)| idx)
                        .collect();
                    for idx in expired {
                        let entry = &plugins[idx];
                        if let Some(slot) = pending.get_mut(&idx) {
                            if slot.started.is_none() && !slot.promoted {
                                slot.promote(self.id, entry.name());
                                continue;
                            }
                        }
                        let Some(slot) = pending.remove(&idx) else {
                            continue;
                        };
                        slot.expire(entry);
                        let failure = PluginFailure::new(entry.name(), PluginError::Timeout(timeout));
                        if fail_fast {
                            cancel_pending(&pending);
                            return Err(JobError::from(failure));
                        }
                        warn!(job = %self.id, plugin = %failure.plugin, "plugin timed out");
                        outcome.failures.push(failure);
                    }
                }
            }
        }

        self.check_cancelled()?;
        Ok(outcome)
    }
}

type Task = Box<dyn FnOnce() + Send>;

/// Run the task unless another thread already took it.
fn run_once(task: &Mutex<Option<Task>>) {
    let task = task.lock().take();
    if let Some(task) = task {
        task();
    }
}

/// Whether a task returned, and whether the coordinator gave up on it first.
#[derive(Default)]
struct Tracker {
    finished: bool,
    abandoned: bool,
}

impl Tracker {
    fn finish(&mut self, entry: &PluginEntry) {
        self.finished = true;
        if self.abandoned {
            entry.clear_stalled();
        }
    }

    fn abandon(&mut self, entry: &PluginEntry) {
        if !self.finished {
            self.abandoned = true;
            entry.mark_stalled();
        }
    }
}

/// Coordinator-side state of one dispatched plugin call.
struct Slot {
    cancel: Cancellable,
    task: Arc<Mutex<Option<Task>>>,
    tracker: Arc<Mutex<Tracker>>,
    started: Option<Instant>,
    queued_at: Instant,
    promoted: bool,
}

impl Slot {
    fn deadline(&self, timeout: Duration) -> Instant {
        self.started.unwrap_or(self.queued_at) + timeout
    }

    /// The pool had no free worker for a whole timeout: run on a fresh thread.
    fn promote(&mut self, job: JobId, plugin: &str) {
        self.promoted = true;
        self.queued_at = Instant::now();
        let task = Arc::clone(&self.task);
        let spawned = thread::Builder::new()
            .name(format!("appfront-{}-{}", job, plugin))
            .spawn(move || run_once(&task));
        match spawned {
            Ok(_) => debug!(job = %job, plugin = %plugin, "worker pool busy, running on own thread"),
            Err(e) => warn!(job = %job, plugin = %plugin, error = %e, "cannot start plugin thread"),
        }
    }

    /// Give up on the call. A call that never started is dropped; one that
    /// is still running marks its plugin stalled until it returns.
    fn expire(self, entry: &PluginEntry) {
        self.cancel.cancel();
        let never_ran = self.task.lock().take().is_some();
        if !never_ran {
            self.tracker.lock().abandon(entry);
        }
    }
}

fn cancel_pending(pending: &BTreeMap<usize, Slot>) {
    for slot in pending.values() {
        slot.cancel.cancel();
    }
}

fn list_invoke(job: &Job) -> Invoke {
    let action = job.action();
    let target = job.target().clone();
    handler(move |p, ctx| match (action, &target) {
        (Action::Search, JobTarget::Query(query)) => p.search(query, ctx),
        (Action::GetInstalled, _) => p.list_installed(ctx),
        (Action::GetUpdates, _) => p.list_updates(ctx),
        (Action::GetDistroUpgrades, _) => p.list_distro_upgrades(ctx),
        (Action::GetSources, _) => p.list_sources(ctx),
        (Action::GetPopular, _) => p.list_popular(ctx),
        (Action::GetFeatured, _) => p.list_featured(ctx),
        (Action::GetCategoryApps, JobTarget::Category(category)) => {
            p.list_category_apps(category, ctx)
        }
        (Action::FileToApp, JobTarget::File(path)) => p.file_to_app(path, ctx),
        (Action::UrlToApp, JobTarget::Url(url)) => p.url_to_app(url, ctx),
        _ => Err(PluginError::NotSupported),
    })
}
