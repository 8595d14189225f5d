use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use configparser::ini::Ini;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::app::{App, AppId, AppKind, AppState};
use crate::category::{Category, CategoryList};
use crate::job::{Action, RefineFlags, RefreshKind};
use crate::plugin::{Plugin, PluginContext, PluginError, PluginInfo};
use crate::provider::{split_command, ProviderError};

const NAME: &str = "desktop";
const ORIGIN: &str = "system";

/// One parsed `.desktop` application entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntry {
    /// Desktop file id, the file name without `.desktop`.
    pub id: String,
    pub name: String,
    pub exec: String,
    pub icon: Option<String>,
    pub categories: Vec<String>,
    pub comment: Option<String>,
    pub path: PathBuf,
}

/// Installed applications from XDG desktop entries.
pub struct DesktopPlugin {
    dirs: Option<Vec<PathBuf>>,
    entries: RwLock<Vec<DesktopEntry>>,
}

impl Default for DesktopPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DesktopPlugin {
    pub fn new() -> Self {
        Self {
            dirs: None,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Scan `dirs` instead of the XDG application directories.
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs: Some(dirs),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// `$XDG_DATA_HOME/applications` followed by each
    /// `$XDG_DATA_DIRS/applications`, highest precedence first.
    pub fn xdg_app_dirs() -> Vec<PathBuf> {
        let mut dirs = Vec::new();

        if let Some(data_home) = std::env::var_os("XDG_DATA_HOME") {
            dirs.push(PathBuf::from(data_home).join("applications"));
        } else if let Some(home) = dirs::home_dir() {
            dirs.push(home.join(".local/share/applications"));
        }

        let data_dirs = std::env::var("XDG_DATA_DIRS")
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "/usr/local/share:/usr/share".to_string());
        for dir in data_dirs.split(':') {
            if !dir.is_empty() {
                let app_dir = PathBuf::from(dir).join("applications");
                if !dirs.contains(&app_dir) {
                    dirs.push(app_dir);
                }
            }
        }

        dirs
    }

    fn scan(&self) -> Vec<DesktopEntry> {
        let dirs = self.dirs.clone().unwrap_or_else(Self::xdg_app_dirs);
        let mut entries = Vec::new();
        let mut seen_ids = HashSet::new();

        for dir in dirs {
            if !dir.is_dir() {
                continue;
            }

            let listing = match fs::read_dir(&dir) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot read application directory");
                    continue;
                }
            };

            let mut paths: Vec<PathBuf> = listing.flatten().map(|e| e.path()).collect();
            paths.sort();
            for path in paths {
                if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
                    continue;
                }
                match Self::parse_desktop_file(&path) {
                    // Earlier directories shadow later ones.
                    Ok(Some(entry)) => {
                        if seen_ids.insert(entry.id.clone()) {
                            entries.push(entry);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping desktop entry"),
                }
            }
        }

        entries
    }

    fn rescan(&self) {
        let entries = self.scan();
        debug!(entries = entries.len(), "desktop entries loaded");
        *self.entries.write() = entries;
    }

    fn entry(&self, id: &str) -> Option<DesktopEntry> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    fn parse_desktop_file(path: &Path) -> Result<Option<DesktopEntry>, ProviderError> {
        let content = fs::read_to_string(path)?;
        Self::parse_desktop_content(&content, path)
    }

    /// Parse desktop entry content. Non-applications, hidden entries and
    /// entries without a name or command yield `None`.
    pub fn parse_desktop_content(
        content: &str,
        path: &Path,
    ) -> Result<Option<DesktopEntry>, ProviderError> {
        let mut config = Ini::new_cs();
        config.set_comment_symbols(&['#']);
        config
            .read(content.to_string())
            .map_err(|e| ProviderError::ParseError(format!("{}: {}", path.display(), e)))?;

        let section = "Desktop Entry";

        let entry_type = config.get(section, "Type").unwrap_or_default();
        if entry_type.to_lowercase() != "application" {
            return Ok(None);
        }

        for key in ["NoDisplay", "Hidden"] {
            if config.get(section, key).unwrap_or_default().to_lowercase() == "true" {
                return Ok(None);
            }
        }

        let name = match config.get(section, "Name") {
            Some(n) if !n.is_empty() => n,
            _ => return Ok(None),
        };

        let exec = match config.get(section, "Exec") {
            Some(e) if !e.is_empty() => strip_field_codes(&e),
            _ => return Ok(None),
        };

        let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
        else {
            return Ok(None);
        };

        let categories = config
            .get(section, "Categories")
            .map(|c| {
                c.split(';')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(DesktopEntry {
            id: id.to_string(),
            name,
            exec,
            icon: config.get(section, "Icon").filter(|s| !s.is_empty()),
            categories,
            comment: config.get(section, "Comment").filter(|s| !s.is_empty()),
            path: path.to_path_buf(),
        }))
    }

    fn app_for(entry: &DesktopEntry, ctx: &PluginContext) -> Arc<App> {
        let app = ctx.app_for_id(AppId::new(ORIGIN, AppKind::Desktop, &entry.id));
        app.set_name(&entry.name);
        if let Some(comment) = &entry.comment {
            app.set_summary(comment);
        }
        if let Some(icon) = &entry.icon {
            app.set_icon(icon);
        }
        for category in &entry.categories {
            app.add_category(category);
        }
        if app.state() == AppState::Unknown {
            app.set_state(AppState::Installed);
        }
        app.set_metadata("desktop::exec", &entry.exec);
        app.set_metadata("desktop::path", entry.path.to_string_lossy());
        app
    }

    fn add_all<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a DesktopEntry>,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        for entry in entries {
            ctx.check_cancelled()?;
            ctx.add(Self::app_for(entry, ctx));
        }
        Ok(())
    }
}

/// Strip XDG field codes from an Exec string.
pub fn strip_field_codes(exec: &str) -> String {
    let codes = [
        "%f", "%F", "%u", "%U", "%d", "%D", "%n", "%N", "%i", "%c", "%k", "%v", "%m",
    ];
    let mut result = exec.to_string();
    for code in &codes {
        result = result.replace(code, "");
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Plugin for DesktopPlugin {
    fn initialize(&self) -> PluginInfo {
        PluginInfo::new(NAME).supports(&[
            Action::Search,
            Action::GetInstalled,
            Action::GetCategories,
            Action::GetCategoryApps,
            Action::FileToApp,
            Action::UrlToApp,
            Action::Refine,
            Action::Launch,
            Action::Refresh,
        ])
    }

    fn setup(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        self.rescan();
        Ok(())
    }

    fn adopt_app(&self, app: &App, _ctx: &PluginContext) {
        if let Some(id) = app.id() {
            if id.origin() == ORIGIN && id.kind() == AppKind::Desktop {
                app.claim_management(NAME);
            }
        }
    }

    fn search(&self, query: &str, ctx: &PluginContext) -> Result<(), PluginError> {
        let matcher = SkimMatcherV2::default();
        let entries = self.entries.read().clone();
        let mut scored: Vec<(i64, &DesktopEntry)> = entries
            .iter()
            .filter_map(|entry| {
                let score = [Some(&entry.name), entry.comment.as_ref(), Some(&entry.id)]
                    .into_iter()
                    .flatten()
                    .filter_map(|text| matcher.fuzzy_match(text, query))
                    .max()
                    .unwrap_or(0);
                (score > 0).then_some((score, entry))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        self.add_all(scored.into_iter().map(|(_, entry)| entry), ctx)
    }

    fn list_installed(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let entries = self.entries.read().clone();
        self.add_all(&entries, ctx)
    }

    fn list_categories(
        &self,
        categories: &CategoryList,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for entry in self.entries.read().iter() {
            for category in &entry.categories {
                *counts.entry(category.clone()).or_insert(0) += 1;
            }
        }
        ctx.check_cancelled()?;
        for (id, size) in counts {
            categories.add(Category::new(id.clone(), id).with_size(size));
        }
        Ok(())
    }

    fn list_category_apps(&self, category: &str, ctx: &PluginContext) -> Result<(), PluginError> {
        let entries: Vec<DesktopEntry> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.categories.iter().any(|c| c.eq_ignore_ascii_case(category)))
            .cloned()
            .collect();
        self.add_all(&entries, ctx)
    }

    fn file_to_app(&self, path: &Path, ctx: &PluginContext) -> Result<(), PluginError> {
        if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
            return Err(PluginError::NotSupported);
        }
        match Self::parse_desktop_file(path)? {
            Some(entry) => {
                ctx.add(Self::app_for(&entry, ctx));
                Ok(())
            }
            None => Err(PluginError::InvalidArgument(format!(
                "{} is not a launchable application",
                path.display()
            ))),
        }
    }

    /// Resolves `appstream:<id>` and `appstream://<id>` against installed
    /// entries.
    fn url_to_app(&self, url: &str, ctx: &PluginContext) -> Result<(), PluginError> {
        let Some(rest) = url
            .strip_prefix("appstream://")
            .or_else(|| url.strip_prefix("appstream:"))
        else {
            return Err(PluginError::NotSupported);
        };
        let id = rest.trim_end_matches('/').trim_end_matches(".desktop");
        if let Some(entry) = self.entry(id) {
            ctx.add(Self::app_for(&entry, ctx));
        }
        Ok(())
    }

    fn refine(
        &self,
        apps: &[Arc<App>],
        flags: RefineFlags,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        for app in apps {
            ctx.check_cancelled()?;
            let Some(entry) = app.base_id().and_then(|id| self.entry(id)) else {
                continue;
            };
            // Fill gaps only; a package source may own these values.
            if app.name().is_none() {
                app.set_name(&entry.name);
            }
            if app.summary().is_none() {
                if let Some(comment) = &entry.comment {
                    app.set_summary(comment);
                }
            }
            if flags.contains(RefineFlags::ICON) && app.icon().is_none() {
                if let Some(icon) = &entry.icon {
                    app.set_icon(icon);
                }
            }
            if flags.contains(RefineFlags::CATEGORIES) {
                for category in &entry.categories {
                    app.add_category(category);
                }
            }
            if app.state() == AppState::Unknown {
                app.set_state(AppState::Installed);
            }
            if app.metadata("desktop::exec").is_none() {
                app.set_metadata("desktop::exec", &entry.exec);
            }
        }
        Ok(())
    }

    fn refine_wildcard(
        &self,
        wildcard: &App,
        _flags: RefineFlags,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        if let Some(entry) = wildcard.base_id().and_then(|id| self.entry(id)) {
            ctx.add(Self::app_for(&entry, ctx));
        }
        Ok(())
    }

    fn launch(&self, app: &Arc<App>, ctx: &PluginContext) -> Result<(), PluginError> {
        ctx.check_cancelled()?;
        let exec = app
            .metadata("desktop::exec")
            .or_else(|| app.base_id().and_then(|id| self.entry(id)).map(|e| e.exec))
            .ok_or_else(|| PluginError::InvalidArgument("no command to launch".to_string()))?;
        let (program, args) = split_command(&exec)
            .ok_or_else(|| PluginError::InvalidArgument("empty command".to_string()))?;

        debug!(program = %program, "launching");
        Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }

    fn refresh(
        &self,
        kind: RefreshKind,
        _cache_age: Duration,
        _ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        if kind.includes_metadata() {
            self.rescan();
        }
        Ok(())
    }
}
