mod cli;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::info;
use tracing_subscriber::EnvFilter;

use appfront::app::{App, AppId};
use appfront::config::Settings;
use appfront::job::{Action, FailurePolicy, Job, JobTarget, PluginFilter};
use appfront::loader::{JobOutput, JobResult, Loader};
use appfront::output::{Formatter, PluginRow};
use appfront::provider::default_plugins;
use cli::{Cli, Command};

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("APPFRONT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Apply the global flags to a job.
fn configure(cli: &Cli, job: Job) -> Job {
    let mut job = job
        .with_refine_flags(cli.refine)
        .with_filter(PluginFilter {
            allow: cli.allow.clone(),
            deny: cli.deny.clone(),
        });
    if cli.fail_fast {
        job = job.with_failure_policy(FailurePolicy::FailFast);
    }
    if let Some(secs) = cli.timeout {
        job = job.with_timeout(Duration::from_secs(secs));
    }
    if let Some(max) = cli.max_results {
        job = job.with_max_results(max);
    }
    job
}

/// Run `job` `repeat` times and keep the last result.
fn run_repeated(loader: &Loader, job: Job, repeat: u32) -> Result<JobResult> {
    let mut last = None;
    for iteration in 1..=repeat {
        let started = Instant::now();
        let result = loader.run(job.clone())?;
        info!(
            iteration,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        );
        last = Some(result);
    }
    last.context("job was never run")
}

/// Find the record a command-line id refers to: a record seen earlier, an
/// installed record with that unique or base id, or a fresh record for a
/// well-formed unique id.
fn resolve_app(loader: &Loader, cli: &Cli, id: &str) -> Result<Arc<App>> {
    if let Some(app) = loader.lookup_app(id) {
        return Ok(app);
    }

    let parsed = id.parse::<AppId>().ok();
    let installed = loader.run(configure(cli, Job::new(Action::GetInstalled)).without_refine());
    if let Ok(JobResult {
        output: JobOutput::Apps(apps),
        ..
    }) = installed
    {
        let found = apps.snapshot().into_iter().find(|app| match (&parsed, app.id()) {
            (Some(wanted), Some(have)) => wanted.matches(have),
            (None, Some(have)) => have.name() == id,
            _ => false,
        });
        if let Some(app) = found {
            return Ok(app);
        }
    }

    match parsed {
        Some(app_id) => Ok(App::with_id(app_id)),
        None => bail!("application '{}' not found", id),
    }
}

fn print_output(formatter: &Formatter, result: &JobResult) -> Result<()> {
    let stdout = &mut std::io::stdout();
    match &result.output {
        JobOutput::Apps(apps) => {
            let snapshots: Vec<_> = apps.snapshot().iter().map(|a| a.snapshot()).collect();
            formatter.format_apps(&snapshots, stdout)?;
        }
        JobOutput::App(app) => formatter.format_app(&app.snapshot(), stdout)?,
        JobOutput::Categories(categories) => formatter.format_categories(categories, stdout)?,
        JobOutput::Success => {}
    }
    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "appfront", &mut std::io::stdout());
        return Ok(());
    }

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_default()?,
    };
    let plugins = default_plugins(&settings);
    let loader = Loader::builder(settings).plugins(plugins).build()?;
    let formatter = Formatter::new(cli.format, cli.no_color);

    let job = match &cli.command {
        Command::Installed => Job::new(Action::GetInstalled),
        Command::Search { query } => Job::search(query),
        Command::Updates => Job::new(Action::GetUpdates),
        Command::Upgrades => Job::new(Action::GetDistroUpgrades),
        Command::Sources => Job::new(Action::GetSources),
        Command::Popular => Job::new(Action::GetPopular),
        Command::Featured => Job::new(Action::GetFeatured),
        Command::GetCategories => Job::new(Action::GetCategories),
        Command::GetCategoryApps { category } => Job::category_apps(category),
        Command::Refine { id } => {
            let app = resolve_app(&loader, &cli, id)?;
            Job::refine(app, cli.refine)
        }
        Command::Launch { id } => Job::app_action(Action::Launch, resolve_app(&loader, &cli, id)?),
        Command::Install { id } => {
            Job::app_action(Action::Install, resolve_app(&loader, &cli, id)?)
        }
        Command::Remove { id } => Job::app_action(Action::Remove, resolve_app(&loader, &cli, id)?),
        Command::Update { id } => Job::app_action(Action::Update, resolve_app(&loader, &cli, id)?),
        Command::FilenameToApp { path } => {
            Job::new(Action::FileToApp).with_target(JobTarget::File(path.clone()))
        }
        Command::UrlToApp { url } => {
            Job::new(Action::UrlToApp).with_target(JobTarget::Url(url.clone()))
        }
        Command::Refresh { kind, cache_age } => {
            Job::refresh((*kind).into(), Duration::from_secs(*cache_age))
        }
        Command::Plugins => {
            let rows: Vec<PluginRow> = loader
                .plugins()
                .iter()
                .map(|entry| PluginRow::from_entry(entry))
                .collect();
            formatter.format_plugins(&rows, &mut std::io::stdout())?;
            return Ok(());
        }
        Command::Completions { .. } => return Ok(()),
    };

    let result = run_repeated(&loader, configure(&cli, job), cli.repeat)?;
    print_output(&formatter, &result)?;
    Ok(())
}
