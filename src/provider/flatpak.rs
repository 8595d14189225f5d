use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::app::{App, AppId, AppKind, AppState};
use crate::job::{Action, RefreshKind};
use crate::plugin::{Plugin, PluginContext, PluginError, PluginInfo};
use crate::provider::{has_tool, ProviderError};

const NAME: &str = "flatpak";
const TOOL: &str = "flatpak";

/// Columns requested from `flatpak list` and `flatpak remote-ls`.
const LIST_COLUMNS: &[Column] = &[
    Column::Name,
    Column::Application,
    Column::Version,
    Column::Origin,
    Column::Branch,
    Column::Arch,
    Column::Description,
];

/// Columns requested from `flatpak search`, which knows remotes rather than
/// an origin and reports no architecture.
const SEARCH_COLUMNS: &[Column] = &[
    Column::Name,
    Column::Application,
    Column::Version,
    Column::Origin,
    Column::Branch,
    Column::Description,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Name,
    Application,
    Version,
    Origin,
    Branch,
    Arch,
    Description,
}

impl Column {
    fn list_name(&self) -> &'static str {
        match self {
            Column::Name => "name",
            Column::Application => "application",
            Column::Version => "version",
            Column::Origin => "origin",
            Column::Branch => "branch",
            Column::Arch => "arch",
            Column::Description => "description",
        }
    }

    fn search_name(&self) -> &'static str {
        match self {
            Column::Origin => "remotes",
            other => other.list_name(),
        }
    }
}

fn columns_arg(columns: &[Column], search: bool) -> String {
    let names: Vec<&str> = columns
        .iter()
        .map(|c| if search { c.search_name() } else { c.list_name() })
        .collect();
    format!("--columns={}", names.join(","))
}

/// One row of flatpak's tab-separated output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatpakRef {
    pub name: String,
    pub application: String,
    pub version: Option<String>,
    pub origin: String,
    pub branch: Option<String>,
    pub arch: Option<String>,
    pub description: Option<String>,
}

impl FlatpakRef {
    fn id(&self) -> AppId {
        let mut id = AppId::new(&self.origin, AppKind::Desktop, &self.application);
        if let Some(arch) = &self.arch {
            id = id.with_arch(arch);
        }
        if let Some(branch) = &self.branch {
            id = id.with_branch(branch);
        }
        id
    }
}

/// Apps and runtimes managed by the `flatpak` command-line tool.
pub struct FlatpakPlugin {
    last_refresh: Mutex<Option<Instant>>,
}

impl Default for FlatpakPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatpakPlugin {
    pub fn new() -> Self {
        Self {
            last_refresh: Mutex::new(None),
        }
    }

    fn run(args: &[&str]) -> Result<String, ProviderError> {
        debug!(args = %args.join(" "), "running flatpak");
        let output = Command::new(TOOL)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(ProviderError::CommandFailed {
                tool: TOOL.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_output(output: &str, columns: &[Column]) -> Vec<FlatpakRef> {
        let mut refs = Vec::new();

        for line in output.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
            let mut row = FlatpakRef::default();
            for (column, value) in columns.iter().zip(parts.iter()) {
                let value = value.to_string();
                let optional = Some(value.clone()).filter(|v| !v.is_empty());
                match column {
                    Column::Name => row.name = value,
                    Column::Application => row.application = value,
                    // `remotes` may list several, the first is preferred.
                    Column::Origin => {
                        row.origin = value.split(',').next().unwrap_or_default().trim().to_string()
                    }
                    Column::Version => row.version = optional,
                    Column::Branch => row.branch = optional,
                    Column::Arch => row.arch = optional,
                    Column::Description => row.description = optional,
                }
            }

            if row.name.is_empty() || row.application.is_empty() {
                continue;
            }
            if row.origin.is_empty() {
                row.origin = "flatpak".to_string();
            }
            refs.push(row);
        }

        refs
    }

    fn report(refs: &[FlatpakRef], state: AppState, ctx: &PluginContext) -> Result<(), PluginError> {
        for flatpak_ref in refs {
            ctx.check_cancelled()?;
            let app = ctx.app_for_id(flatpak_ref.id());
            app.set_name(&flatpak_ref.name);
            if let Some(version) = &flatpak_ref.version {
                app.set_version(version);
            }
            if let Some(description) = &flatpak_ref.description {
                app.set_summary(description);
            }
            app.set_state(state);
            app.set_metadata("flatpak::ref", &flatpak_ref.application);
            ctx.add(app);
        }
        Ok(())
    }

    fn flatpak_ref(app: &App) -> Result<String, PluginError> {
        app.metadata("flatpak::ref")
            .ok_or_else(|| PluginError::InvalidArgument("record has no flatpak ref".to_string()))
    }

    /// Run a state-changing command, moving the record through `during`
    /// and ending in `after`, or restoring its state on failure.
    fn transact(
        app: &App,
        args: &[&str],
        during: AppState,
        after: AppState,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        ctx.check_cancelled()?;
        let before = app.state();
        app.set_state(during);
        match Self::run(args) {
            Ok(_) => {
                app.set_state(after);
                Ok(())
            }
            Err(e) => {
                app.set_state(before);
                Err(e.into())
            }
        }
    }
}

impl Plugin for FlatpakPlugin {
    fn initialize(&self) -> PluginInfo {
        PluginInfo::new(NAME)
            .with_priority(10)
            .better_than("desktop")
            .supports(&[
                Action::Search,
                Action::GetInstalled,
                Action::GetUpdates,
                Action::Install,
                Action::Remove,
                Action::Launch,
                Action::Update,
                Action::Refresh,
            ])
    }

    fn setup(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        if !has_tool(TOOL) {
            return Err(ProviderError::ToolNotAvailable(TOOL.to_string()).into());
        }
        Ok(())
    }

    fn adopt_app(&self, app: &App, _ctx: &PluginContext) {
        if app.metadata("flatpak::ref").is_some() {
            app.claim_management(NAME);
        }
    }

    fn search(&self, query: &str, ctx: &PluginContext) -> Result<(), PluginError> {
        let columns = columns_arg(SEARCH_COLUMNS, true);
        let output = Self::run(&["search", &columns, query])?;
        let refs = Self::parse_output(&output, SEARCH_COLUMNS);
        Self::report(&refs, AppState::Available, ctx)
    }

    fn list_installed(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let columns = columns_arg(LIST_COLUMNS, false);
        let output = Self::run(&["list", "--app", &columns])?;
        let refs = Self::parse_output(&output, LIST_COLUMNS);
        Self::report(&refs, AppState::Installed, ctx)
    }

    fn list_updates(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let columns = columns_arg(LIST_COLUMNS, false);
        let output = Self::run(&["remote-ls", "--updates", "--app", &columns])?;
        let refs = Self::parse_output(&output, LIST_COLUMNS);
        Self::report(&refs, AppState::Updatable, ctx)
    }

    fn install(&self, app: &Arc<App>, ctx: &PluginContext) -> Result<(), PluginError> {
        let flatpak_ref = Self::flatpak_ref(app)?;
        let origin = app
            .id()
            .map(|id| id.origin().to_string())
            .unwrap_or_default();
        Self::transact(
            app,
            &["install", "-y", "--noninteractive", &origin, &flatpak_ref],
            AppState::Installing,
            AppState::Installed,
            ctx,
        )
    }

    fn remove(&self, app: &Arc<App>, ctx: &PluginContext) -> Result<(), PluginError> {
        let flatpak_ref = Self::flatpak_ref(app)?;
        Self::transact(
            app,
            &["uninstall", "-y", "--noninteractive", &flatpak_ref],
            AppState::Removing,
            AppState::Available,
            ctx,
        )
    }

    fn update(&self, app: &Arc<App>, ctx: &PluginContext) -> Result<(), PluginError> {
        let flatpak_ref = Self::flatpak_ref(app)?;
        Self::transact(
            app,
            &["update", "-y", "--noninteractive", &flatpak_ref],
            AppState::Installing,
            AppState::Installed,
            ctx,
        )
    }

    fn launch(&self, app: &Arc<App>, ctx: &PluginContext) -> Result<(), PluginError> {
        ctx.check_cancelled()?;
        let flatpak_ref = Self::flatpak_ref(app)?;
        Command::new(TOOL)
            .args(["run", &flatpak_ref])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }

    /// Metadata refresh updates appstream data, skipped while the last one
    /// is younger than `cache_age`.
    fn refresh(
        &self,
        kind: RefreshKind,
        cache_age: Duration,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        if !kind.includes_metadata() {
            return Ok(());
        }
        let mut last = self.last_refresh.lock();
        if last.is_some_and(|at| at.elapsed() < cache_age) {
            debug!("flatpak metadata fresh enough, skipping refresh");
            return Ok(());
        }
        ctx.check_cancelled()?;
        if let Err(e) = Self::run(&["update", "--appstream", "-y", "--noninteractive"]) {
            warn!(error = %e, "flatpak appstream refresh failed");
            return Err(e.into());
        }
        *last = Some(Instant::now());
        Ok(())
    }
}
