use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use appfront::provider::desktop::DesktopPlugin;
use appfront::provider::popular::PopularPlugin;
use appfront::{
    Action, App, AppId, AppKind, AppQuirks, AppState, Category, CategoryList, DedupeMode,
    FailurePolicy, Job, JobError, JobOutput, JobResult, JobState, Loader, LoaderError, Plugin,
    PluginContext, PluginError, PluginFilter, PluginInfo, RefineFlags, Settings,
};

type Log = Arc<Mutex<Vec<String>>>;
type ListFn = Arc<dyn Fn(&PluginContext) -> Result<(), PluginError> + Send + Sync>;
type RefineFn =
    Arc<dyn Fn(&[Arc<App>], RefineFlags, &PluginContext) -> Result<(), PluginError> + Send + Sync>;

/// A scriptable plugin that records every call it receives.
struct Mock {
    info: PluginInfo,
    log: Log,
    list: Option<ListFn>,
    refine: Option<RefineFn>,
    categories: Vec<Category>,
    claims: bool,
    fail_setup: bool,
}

impl Mock {
    fn new(name: &str, log: &Log) -> Self {
        Self {
            info: PluginInfo::new(name),
            log: Arc::clone(log),
            list: None,
            refine: None,
            categories: Vec::new(),
            claims: false,
            fail_setup: false,
        }
    }

    fn supports(mut self, actions: &[Action]) -> Self {
        self.info = self.info.supports(actions);
        self
    }

    fn info(mut self, f: impl FnOnce(PluginInfo) -> PluginInfo) -> Self {
        self.info = f(self.info);
        self
    }

    fn on_list<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        self.list = Some(Arc::new(f));
        self
    }

    fn on_refine<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Arc<App>], RefineFlags, &PluginContext) -> Result<(), PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.refine = Some(Arc::new(f));
        self
    }

    fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }

    fn claiming(mut self) -> Self {
        self.claims = true;
        self
    }

    fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}:{}", self.info.name, event));
    }

    fn run_list(&self, event: &str, ctx: &PluginContext) -> Result<(), PluginError> {
        self.record(event);
        match &self.list {
            Some(f) => f(ctx),
            None => Err(PluginError::NotSupported),
        }
    }
}

impl Plugin for Mock {
    fn initialize(&self) -> PluginInfo {
        self.info.clone()
    }

    fn setup(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        if self.fail_setup {
            return Err(PluginError::failed("backend missing"));
        }
        Ok(())
    }

    fn destroy(&self) {
        self.record("destroy");
    }

    fn reload(&self, _settings: &Settings) {
        self.record("reload");
    }

    fn adopt_app(&self, app: &App, _ctx: &PluginContext) {
        self.record("adopt");
        if self.claims {
            app.claim_management(&self.info.name);
        }
    }

    fn search(&self, _query: &str, ctx: &PluginContext) -> Result<(), PluginError> {
        self.run_list("search", ctx)
    }

    fn list_installed(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.run_list("installed", ctx)
    }

    fn list_categories(
        &self,
        categories: &CategoryList,
        _ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        self.record("categories");
        for category in &self.categories {
            categories.add(category.clone());
        }
        Ok(())
    }

    fn refine(
        &self,
        apps: &[Arc<App>],
        flags: RefineFlags,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        self.record("refine");
        match &self.refine {
            Some(f) => f(apps, flags, ctx),
            None => Ok(()),
        }
    }

    fn install(&self, _app: &Arc<App>, _ctx: &PluginContext) -> Result<(), PluginError> {
        self.record("install");
        Ok(())
    }
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn calls(log: &Log) -> Vec<String> {
    log.lock().clone()
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.worker_threads = 4;
    settings
}

/// A valid, visible record.
fn record(origin: &str, name: &str, display: &str) -> Arc<App> {
    let app = App::with_id(AppId::new(origin, AppKind::Desktop, name));
    app.set_name(display);
    app.set_state(AppState::Available);
    app
}

fn adds(records: Vec<Arc<App>>) -> impl Fn(&PluginContext) -> Result<(), PluginError> {
    move |ctx: &PluginContext| {
        for app in &records {
            ctx.add(Arc::clone(app));
        }
        Ok(())
    }
}

fn block_until_cancelled(ctx: &PluginContext) -> Result<(), PluginError> {
    let until = Instant::now() + Duration::from_secs(5);
    while !ctx.is_cancelled() && Instant::now() < until {
        thread::sleep(Duration::from_millis(5));
    }
    Err(PluginError::Cancelled)
}

fn apps_of(output: &JobOutput) -> Vec<Arc<App>> {
    output.apps().expect("list output").snapshot()
}

fn names_of(output: &JobOutput) -> Vec<String> {
    apps_of(output)
        .iter()
        .map(|a| a.name().unwrap_or_default())
        .collect()
}

#[test]
fn test_search_fans_out_then_refines() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("p1", &log)
                .supports(&[Action::Search, Action::Refine])
                .on_list(adds(vec![record("p1", "app.foo", "Foo")])),
        )
        .plugin(Mock::new("p2", &log).supports(&[Action::Refine]).on_refine(
            |apps, _flags, _ctx| {
                for app in apps {
                    app.set_icon("foo-icon");
                }
                Ok(())
            },
        ))
        .build()
        .unwrap();

    let result = loader
        .run(Job::search("foo").with_refine_flags(RefineFlags::ICON))
        .unwrap();

    let apps = apps_of(&result.output);
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].name().as_deref(), Some("Foo"));
    assert_eq!(apps[0].icon().as_deref(), Some("foo-icon"));
    assert!(apps[0].refined().contains(RefineFlags::ICON));

    let calls = calls(&log);
    assert!(calls.contains(&"p1:search".to_string()));
    assert!(!calls.contains(&"p2:search".to_string()));
    assert!(calls.contains(&"p1:refine".to_string()));
    assert!(calls.contains(&"p2:refine".to_string()));
    assert!(result.warnings.is_empty());
}

#[test]
fn test_search_keeps_named_record_without_state() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("p1", &log)
                .supports(&[Action::Search, Action::Refine])
                .on_list(|ctx: &PluginContext| {
                    let app = App::with_id(AppId::new("p1", AppKind::Desktop, "app.foo"));
                    app.set_name("Foo");
                    ctx.add(app);
                    Ok(())
                }),
        )
        .plugin(Mock::new("p2", &log).supports(&[Action::Refine]))
        .build()
        .unwrap();

    let result = loader.run(Job::search("foo")).unwrap();
    let apps = apps_of(&result.output);
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].name().as_deref(), Some("Foo"));
    assert_eq!(apps[0].state(), AppState::Unknown);
    assert!(!calls(&log).contains(&"p2:search".to_string()));
}

#[test]
fn test_no_refine_pass_without_flags() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("p1", &log)
                .supports(&[Action::Search, Action::Refine])
                .on_list(adds(vec![record("p1", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    loader.run(Job::search("foo")).unwrap();
    assert!(!calls(&log).contains(&"p1:refine".to_string()));
}

#[test]
fn test_results_from_all_plugins_are_merged() {
    let log = new_log();
    let shared = record("common", "app.shared", "Shared");
    let loader = Loader::builder(settings())
        .plugin(Mock::new("a", &log).supports(&[Action::Search]).on_list(adds(vec![
            record("a", "app.one", "One"),
            Arc::clone(&shared),
        ])))
        .plugin(Mock::new("b", &log).supports(&[Action::Search]).on_list(adds(vec![
            record("b", "app.two", "Two"),
            Arc::clone(&shared),
        ])))
        .build()
        .unwrap();

    let result = loader.run(Job::search("app")).unwrap();
    let mut names = names_of(&result.output);
    names.sort();
    assert_eq!(names, vec!["One", "Shared", "Two"]);
}

#[test]
fn test_priority_dedupe_keeps_higher_priority_plugin() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("low", &log)
                .info(|i| i.with_priority(5))
                .supports(&[Action::Search])
                .on_list(adds(vec![record("low-origin", "app.foo", "Foo (low)")])),
        )
        .plugin(
            Mock::new("high", &log)
                .info(|i| i.with_priority(10))
                .supports(&[Action::Search])
                .on_list(adds(vec![record("high-origin", "app.foo", "Foo (high)")])),
        )
        .build()
        .unwrap();

    let result = loader
        .run(Job::search("foo").with_dedupe(DedupeMode::ByPriority))
        .unwrap();
    assert_eq!(names_of(&result.output), vec!["Foo (high)"]);
}

#[test]
fn test_better_than_outranks_named_plugin() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(Mock::new("base", &log).info(|i| i.with_priority(10)))
        .plugin(Mock::new("better", &log).info(|i| i.better_than("base")))
        .build()
        .unwrap();

    let better = loader.registry().get("better").unwrap();
    assert_eq!(better.priority(), 11);
}

#[test]
fn test_first_plugin_in_order_adopts() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .claiming()
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .plugin(Mock::new("b", &log).claiming())
        .build()
        .unwrap();

    let result = loader.run(Job::search("foo")).unwrap();
    let apps = apps_of(&result.output);
    assert_eq!(apps[0].management_plugin().as_deref(), Some("a"));
    assert!(!calls(&log).contains(&"b:adopt".to_string()));
}

#[test]
fn test_adoption_follows_run_order() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .claiming()
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .plugin(Mock::new("b", &log).claiming().info(|i| i.run_before("a")))
        .build()
        .unwrap();

    let result = loader.run(Job::search("foo")).unwrap();
    let apps = apps_of(&result.output);
    assert_eq!(apps[0].management_plugin().as_deref(), Some("b"));
}

#[test]
fn test_refine_runs_in_topological_order() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(Mock::new("a", &log).supports(&[Action::Refine]))
        .plugin(
            Mock::new("b", &log)
                .supports(&[Action::Refine])
                .info(|i| i.run_after("a")),
        )
        .plugin(
            Mock::new("c", &log)
                .supports(&[Action::Refine])
                .info(|i| i.run_before("a")),
        )
        .build()
        .unwrap();

    let order: Vec<String> = loader.plugins().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(order, vec!["c", "a", "b"]);

    let app = record("x", "app.foo", "Foo");
    let result = loader.run(Job::refine(Arc::clone(&app), RefineFlags::ICON)).unwrap();
    assert!(matches!(result.output, JobOutput::App(_)));
    assert_eq!(calls(&log), vec!["c:refine", "a:refine", "b:refine"]);
    assert!(app.refined().contains(RefineFlags::ICON));
}

#[test]
fn test_cycle_fails_build() {
    let log = new_log();
    let err = Loader::builder(settings())
        .plugin(Mock::new("a", &log).info(|i| i.run_before("b")))
        .plugin(Mock::new("b", &log).info(|i| i.run_before("a")))
        .build()
        .err()
        .unwrap();
    assert_eq!(
        err,
        LoaderError::CyclicConstraint(vec!["a".to_string(), "b".to_string()])
    );
}

#[test]
fn test_duplicate_plugin_fails_build() {
    let log = new_log();
    let err = Loader::builder(settings())
        .plugin(Mock::new("a", &log))
        .plugin(Mock::new("a", &log))
        .build()
        .err()
        .unwrap();
    assert_eq!(err, LoaderError::DuplicatePlugin("a".to_string()));
}

#[test]
fn test_failed_setup_disables_plugin() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("broken", &log)
                .supports(&[Action::Search])
                .failing_setup(),
        )
        .plugin(
            Mock::new("ok", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    assert!(!loader.registry().get("broken").unwrap().is_enabled());
    let result = loader.run(Job::search("foo")).unwrap();
    assert_eq!(result.output.apps().unwrap().len(), 1);
    assert!(!calls(&log).contains(&"broken:search".to_string()));
}

#[test]
fn test_cancel_running_job() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("slow", &log)
                .supports(&[Action::Search])
                .on_list(block_until_cancelled),
        )
        .build()
        .unwrap();

    let handle = loader.submit(Job::search("foo"));
    assert!(handle.wait_timeout(Duration::from_millis(50)).is_none());
    assert!(!handle.is_finished());

    handle.cancel();
    handle.cancel();
    assert_eq!(handle.wait().err(), Some(JobError::Cancelled));
    assert_eq!(handle.state(), JobState::Cancelled);
    assert!(handle.is_finished());
}

#[test]
fn test_fail_fast_aborts_job() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("bad", &log)
                .supports(&[Action::Search])
                .on_list(|_ctx: &PluginContext| Err(PluginError::failed("broken"))),
        )
        .plugin(
            Mock::new("slow", &log)
                .supports(&[Action::Search])
                .on_list(block_until_cancelled),
        )
        .build()
        .unwrap();

    let started = Instant::now();
    let err = loader
        .run(Job::search("foo").with_failure_policy(FailurePolicy::FailFast))
        .err()
        .unwrap();
    match err {
        JobError::Plugin(failure) => {
            assert_eq!(failure.plugin, "bad");
            assert_eq!(failure.error, PluginError::failed("broken"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_continue_collects_warnings() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("bad", &log)
                .supports(&[Action::Search])
                .on_list(|_ctx: &PluginContext| Err(PluginError::failed("broken"))),
        )
        .plugin(
            Mock::new("good", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    let result = loader.run(Job::search("foo")).unwrap();
    assert_eq!(names_of(&result.output), vec!["Foo"]);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].plugin, "bad");
}

#[test]
fn test_all_plugins_failing_fails_job() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .on_list(|_ctx: &PluginContext| Err(PluginError::failed("x"))),
        )
        .plugin(
            Mock::new("b", &log)
                .supports(&[Action::Search])
                .on_list(|_ctx: &PluginContext| Err(PluginError::failed("y"))),
        )
        .build()
        .unwrap();

    match loader.run(Job::search("foo")).err().unwrap() {
        JobError::Multiple(failures) => assert_eq!(failures.len(), 2),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_timeout_becomes_warning() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("slow", &log)
                .supports(&[Action::Search])
                .on_list(block_until_cancelled),
        )
        .plugin(
            Mock::new("fast", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    let result = loader
        .run(Job::search("foo").with_timeout(Duration::from_millis(100)))
        .unwrap();
    assert_eq!(names_of(&result.output), vec!["Foo"]);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].plugin, "slow");
    assert!(matches!(result.warnings[0].error, PluginError::Timeout(_)));
}

#[test]
fn test_timeout_of_only_plugin_fails_job() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("slow", &log)
                .supports(&[Action::Search])
                .on_list(block_until_cancelled),
        )
        .build()
        .unwrap();

    let err = loader
        .run(Job::search("foo").with_timeout(Duration::from_millis(50)))
        .err()
        .unwrap();
    assert_eq!(
        err,
        JobError::Timeout {
            plugin: "slow".to_string()
        }
    );
}

fn stuck(_ctx: &PluginContext) -> Result<(), PluginError> {
    thread::sleep(Duration::from_secs(3));
    Ok(())
}

fn stuck_loader(workers: usize, log: &Log) -> Loader {
    let mut settings = settings();
    settings.worker_threads = workers;
    Loader::builder(settings)
        .plugin(Mock::new("stuck", log).supports(&[Action::Search]).on_list(stuck))
        .plugin(
            Mock::new("healthy", log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap()
}

fn assert_only_stuck_timed_out(result: &JobResult) {
    assert_eq!(names_of(&result.output), vec!["Foo"]);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].plugin, "stuck");
    assert!(matches!(result.warnings[0].error, PluginError::Timeout(_)));
}

#[test]
fn test_plugin_ignoring_cancel_does_not_starve_later_jobs() {
    let log = new_log();
    let loader = stuck_loader(2, &log);

    for _ in 0..3 {
        let started = Instant::now();
        let result = loader
            .run(Job::search("foo").with_timeout(Duration::from_millis(300)))
            .unwrap();
        assert_only_stuck_timed_out(&result);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
    let searches = calls(&log).iter().filter(|c| *c == "stuck:search").count();
    assert_eq!(searches, 1);
    assert!(loader.registry().get("stuck").unwrap().is_stalled());
}

#[test]
fn test_queued_plugin_moves_off_busy_pool() {
    let log = new_log();
    let loader = stuck_loader(1, &log);

    for _ in 0..2 {
        let started = Instant::now();
        let result = loader
            .run(Job::search("foo").with_timeout(Duration::from_millis(300)))
            .unwrap();
        assert_only_stuck_timed_out(&result);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

#[test]
fn test_stalled_plugin_recovers_once_call_returns() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("sleepy", &log)
                .supports(&[Action::Search])
                .on_list(|_ctx: &PluginContext| {
                    thread::sleep(Duration::from_millis(400));
                    Ok(())
                }),
        )
        .plugin(
            Mock::new("healthy", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    let job = || Job::search("foo").with_timeout(Duration::from_millis(100));
    loader.run(job()).unwrap();
    let sleepy = loader.registry().get("sleepy").unwrap();
    assert!(sleepy.is_stalled());

    let until = Instant::now() + Duration::from_secs(5);
    while sleepy.is_stalled() && Instant::now() < until {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!sleepy.is_stalled());
    loader.run(job()).unwrap();
    let searches = calls(&log).iter().filter(|c| *c == "sleepy:search").count();
    assert_eq!(searches, 2);
}

#[test]
fn test_panicking_plugin_is_isolated() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("panicky", &log)
                .supports(&[Action::Search])
                .on_list(|_ctx: &PluginContext| panic!("boom")),
        )
        .plugin(
            Mock::new("good", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    for _ in 0..2 {
        let result = loader.run(Job::search("foo")).unwrap();
        assert_eq!(names_of(&result.output), vec!["Foo"]);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].error.to_string().contains("plugin panicked"));
    }
}

#[test]
fn test_unsupported_action_fails() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(Mock::new("a", &log).supports(&[Action::Search]))
        .build()
        .unwrap();

    assert_eq!(
        loader.run(Job::new(Action::GetUpdates)).err(),
        Some(JobError::NotSupported(Action::GetUpdates))
    );
}

#[test]
fn test_app_action_goes_to_owner_only() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(Mock::new("other", &log).supports(&[Action::Install]))
        .plugin(
            Mock::new("owner", &log)
                .supports(&[Action::Install])
                .claiming(),
        )
        .build()
        .unwrap();

    let app = record("x", "app.foo", "Foo");
    let result = loader.run(Job::app_action(Action::Install, app)).unwrap();
    assert!(matches!(result.output, JobOutput::Success));

    let calls = calls(&log);
    assert!(calls.contains(&"owner:install".to_string()));
    assert!(!calls.contains(&"other:install".to_string()));
}

#[test]
fn test_app_action_without_owner_not_supported() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(Mock::new("a", &log).supports(&[Action::Install]))
        .build()
        .unwrap();

    let app = record("x", "app.foo", "Foo");
    assert_eq!(
        loader.run(Job::app_action(Action::Install, app)).err(),
        Some(JobError::NotSupported(Action::Install))
    );
    assert!(!calls(&log).contains(&"a:install".to_string()));
}

#[test]
fn test_disabled_plugin_is_skipped() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.a", "A")])),
        )
        .plugin(
            Mock::new("b", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.b", "B")])),
        )
        .build()
        .unwrap();

    loader.enable_plugin("b", false).unwrap();
    let result = loader.run(Job::search("app")).unwrap();
    assert_eq!(names_of(&result.output), vec!["A"]);
    assert!(!calls(&log).contains(&"b:search".to_string()));

    assert_eq!(
        loader.enable_plugin("missing", false),
        Err(LoaderError::UnknownPlugin("missing".to_string()))
    );
}

#[test]
fn test_job_filter_narrows_plugins() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.a", "A")])),
        )
        .plugin(
            Mock::new("b", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.b", "B")])),
        )
        .build()
        .unwrap();

    let deny_b = PluginFilter {
        allow: Vec::new(),
        deny: vec!["b".to_string()],
    };
    let result = loader.run(Job::search("app").with_filter(deny_b)).unwrap();
    assert_eq!(names_of(&result.output), vec!["A"]);

    let only_b = PluginFilter {
        allow: vec!["b".to_string()],
        deny: Vec::new(),
    };
    let result = loader.run(Job::search("app").with_filter(only_b)).unwrap();
    assert_eq!(names_of(&result.output), vec!["B"]);
}

#[test]
fn test_settings_denylist_disables_plugin() {
    let log = new_log();
    let mut settings = settings();
    settings.denylist = vec!["b".to_string()];
    let loader = Loader::builder(settings)
        .plugin(Mock::new("a", &log))
        .plugin(Mock::new("b", &log))
        .build()
        .unwrap();

    assert!(loader.registry().get("a").unwrap().is_enabled());
    assert!(!loader.registry().get("b").unwrap().is_enabled());
}

#[test]
fn test_hidden_and_invalid_records_filtered() {
    let log = new_log();
    let hidden = record("x", "app.hidden", "Hidden");
    hidden.add_quirk(AppQuirks::HIDE_EVERYWHERE);
    let invalid = App::with_id(AppId::new("x", AppKind::Desktop, "app.invalid"));
    invalid.set_state(AppState::Available);

    let loader = Loader::builder(settings())
        .plugin(Mock::new("a", &log).supports(&[Action::Search]).on_list(adds(vec![
            record("x", "app.visible", "Visible"),
            hidden,
            invalid,
        ])))
        .build()
        .unwrap();

    let result = loader.run(Job::search("app")).unwrap();
    assert_eq!(names_of(&result.output), vec!["Visible"]);

    let result = loader.run(Job::search("app").including_hidden()).unwrap();
    let mut names = names_of(&result.output);
    names.sort();
    assert_eq!(names, vec!["Hidden", "Visible"]);
}

#[test]
fn test_max_results_truncates() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(Mock::new("a", &log).supports(&[Action::Search]).on_list(adds(vec![
            record("x", "app.one", "One"),
            record("x", "app.two", "Two"),
            record("x", "app.three", "Three"),
        ])))
        .build()
        .unwrap();

    let result = loader.run(Job::search("app").with_max_results(2)).unwrap();
    assert_eq!(result.output.apps().unwrap().len(), 2);
}

#[test]
fn test_related_records_refined_one_level() {
    let log = new_log();
    let addon = record("x", "app.addon", "Addon");
    let held = Arc::clone(&addon);
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search, Action::Refine])
                .on_list(move |ctx: &PluginContext| {
                    let parent = record("x", "app.parent", "Parent");
                    ctx.relate(&parent, &held);
                    ctx.add(parent);
                    Ok(())
                }),
        )
        .build()
        .unwrap();

    let flags = RefineFlags::ICON | RefineFlags::RELATED;
    let result = loader
        .run(Job::search("parent").with_refine_flags(flags))
        .unwrap();

    let apps = apps_of(&result.output);
    assert_eq!(apps.len(), 1);
    assert!(apps[0].refined().contains(flags));
    assert_eq!(addon.refined(), RefineFlags::ICON);
}

#[test]
fn test_finished_records_can_be_looked_up() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    assert!(loader.lookup_app("x/desktop/app.foo/*/*").is_none());
    loader.run(Job::search("foo")).unwrap();
    let found = loader.lookup_app("x/desktop/app.foo/*/*").unwrap();
    assert_eq!(found.name().as_deref(), Some("Foo"));
}

#[test]
fn test_arena_releases_records_of_finished_jobs() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .on_list(|ctx: &PluginContext| {
                    let shown = App::new();
                    shown.set_name("Anon");
                    shown.set_state(AppState::Available);
                    ctx.add(shown);
                    ctx.add(App::new());
                    Ok(())
                }),
        )
        .build()
        .unwrap();

    for _ in 0..50 {
        let result = loader.run(Job::search("anon")).unwrap();
        assert_eq!(names_of(&result.output), vec!["Anon"]);
    }
    assert!(loader.arena().len() <= 2, "arena holds {}", loader.arena().len());
}

#[test]
fn test_categories_are_merged() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::GetCategories])
                .with_categories(vec![Category::new("Game", "Game").with_size(2)]),
        )
        .plugin(
            Mock::new("b", &log)
                .supports(&[Action::GetCategories])
                .with_categories(vec![
                    Category::new("Game", "Game").with_size(3),
                    Category::new("Audio", "Audio").with_size(1),
                ]),
        )
        .build()
        .unwrap();

    let result = loader.run(Job::new(Action::GetCategories)).unwrap();
    let JobOutput::Categories(categories) = result.output else {
        panic!("expected categories");
    };
    let summary: Vec<(String, u32)> = categories.iter().map(|c| (c.id.clone(), c.size)).collect();
    assert_eq!(
        summary,
        vec![("Audio".to_string(), 1), ("Game".to_string(), 5)]
    );
}

#[test]
fn test_submit_with_runs_callback() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    let (tx, rx) = crossbeam_channel::bounded(1);
    let handle = loader.submit_with(Job::search("foo"), move |result| {
        let count = result.map(|r| r.output.apps().map_or(0, |a| a.len()));
        tx.send(count).unwrap();
    });

    let count = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(count, Ok(1));
    assert!(handle.wait().is_ok());
    assert_eq!(handle.state(), JobState::Completed);
}

#[test]
fn test_concurrent_jobs_have_distinct_ids() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("a", &log)
                .supports(&[Action::Search])
                .on_list(adds(vec![record("x", "app.foo", "Foo")])),
        )
        .build()
        .unwrap();

    let handles: Vec<_> = (0..4).map(|_| loader.submit(Job::search("foo"))).collect();
    let mut ids: Vec<_> = handles.iter().map(|h| h.id()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    for handle in handles {
        assert_eq!(handle.wait().unwrap().output.apps().unwrap().len(), 1);
    }
}

#[test]
fn test_reload_settings_reaches_plugins() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(Mock::new("a", &log))
        .build()
        .unwrap();

    let mut next = settings();
    next.plugin_timeout = Duration::from_secs(7);
    loader.reload_settings(next);

    assert!(calls(&log).contains(&"a:reload".to_string()));
    assert_eq!(loader.settings().plugin_timeout, Duration::from_secs(7));
}

#[test]
fn test_plugins_destroyed_on_drop() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(Mock::new("a", &log))
        .build()
        .unwrap();
    drop(loader);
    assert_eq!(calls(&log), vec!["a:destroy"]);
}

#[test]
fn test_drop_cancels_running_jobs_before_destroy() {
    let log = new_log();
    let loader = Loader::builder(settings())
        .plugin(
            Mock::new("slow", &log)
                .supports(&[Action::Search])
                .on_list(block_until_cancelled),
        )
        .build()
        .unwrap();

    let handle = loader.submit(Job::search("foo"));
    assert!(handle.wait_timeout(Duration::from_millis(50)).is_none());
    drop(loader);
    assert_eq!(handle.wait().err(), Some(JobError::Cancelled));

    let until = Instant::now() + Duration::from_secs(5);
    while !calls(&log).contains(&"slow:destroy".to_string()) && Instant::now() < until {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(calls(&log), vec!["slow:search", "slow:destroy"]);
}

#[test]
fn test_popular_wildcards_resolve_to_desktop_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("org.example.App.desktop"),
        "[Desktop Entry]\nType=Application\nName=Example App\nExec=true\n",
    )
    .unwrap();

    let mut settings = settings();
    settings.popular = vec!["org.example.App".to_string(), "org.missing.App".to_string()];
    let loader = Loader::builder(settings.clone())
        .plugin(DesktopPlugin::with_dirs(vec![dir.path().to_path_buf()]))
        .plugin(PopularPlugin::new(&settings))
        .build()
        .unwrap();

    let result = loader.run(Job::new(Action::GetPopular)).unwrap();
    let apps = apps_of(&result.output);
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].name().as_deref(), Some("Example App"));
    assert!(!apps[0].has_quirk(AppQuirks::IS_WILDCARD));
    assert_eq!(apps[0].management_plugin().as_deref(), Some("desktop"));
}
