//! Immutable descriptions of one requested operation.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::app::App;
use crate::app_list::DedupeMode;

/// Operation kinds a plugin may declare support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Search,
    GetInstalled,
    GetUpdates,
    GetDistroUpgrades,
    GetSources,
    GetPopular,
    GetFeatured,
    GetCategories,
    GetCategoryApps,
    FileToApp,
    UrlToApp,
    Refine,
    Install,
    Remove,
    Launch,
    Update,
    ReviewAction,
    AuthAction,
    Refresh,
}

/// How the coordinator runs the applicable plugins for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Concurrent fan-out into a shared collection.
    FanOut,
    /// One plugin after another against the same target.
    Sequential,
}

impl Action {
    pub const ALL: [Action; 19] = [
        Action::Search,
        Action::GetInstalled,
        Action::GetUpdates,
        Action::GetDistroUpgrades,
        Action::GetSources,
        Action::GetPopular,
        Action::GetFeatured,
        Action::GetCategories,
        Action::GetCategoryApps,
        Action::FileToApp,
        Action::UrlToApp,
        Action::Refine,
        Action::Install,
        Action::Remove,
        Action::Launch,
        Action::Update,
        Action::ReviewAction,
        Action::AuthAction,
        Action::Refresh,
    ];

    pub fn dispatch_mode(&self) -> DispatchMode {
        match self {
            Action::Refine
            | Action::Install
            | Action::Remove
            | Action::Launch
            | Action::Update
            | Action::ReviewAction
            | Action::AuthAction => DispatchMode::Sequential,
            _ => DispatchMode::FanOut,
        }
    }

    /// True for actions whose result is a list of application records.
    pub fn produces_apps(&self) -> bool {
        matches!(
            self,
            Action::Search
                | Action::GetInstalled
                | Action::GetUpdates
                | Action::GetDistroUpgrades
                | Action::GetSources
                | Action::GetPopular
                | Action::GetFeatured
                | Action::GetCategoryApps
                | Action::FileToApp
                | Action::UrlToApp
        )
    }

    /// Actions dispatched to the record's management plugin only.
    pub fn is_app_action(&self) -> bool {
        matches!(
            self,
            Action::Install | Action::Remove | Action::Launch | Action::Update
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Search => "search",
            Action::GetInstalled => "get-installed",
            Action::GetUpdates => "get-updates",
            Action::GetDistroUpgrades => "get-distro-upgrades",
            Action::GetSources => "get-sources",
            Action::GetPopular => "get-popular",
            Action::GetFeatured => "get-featured",
            Action::GetCategories => "get-categories",
            Action::GetCategoryApps => "get-category-apps",
            Action::FileToApp => "file-to-app",
            Action::UrlToApp => "url-to-app",
            Action::Refine => "refine",
            Action::Install => "install",
            Action::Remove => "remove",
            Action::Launch => "launch",
            Action::Update => "update",
            Action::ReviewAction => "review-action",
            Action::AuthAction => "auth-action",
            Action::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes a caller needs populated before the result is returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RefineFlags(u64);

impl RefineFlags {
    pub const NONE: RefineFlags = RefineFlags(0);
    pub const LICENSE: RefineFlags = RefineFlags(1 << 0);
    pub const URL: RefineFlags = RefineFlags(1 << 1);
    pub const DESCRIPTION: RefineFlags = RefineFlags(1 << 2);
    pub const SIZE: RefineFlags = RefineFlags(1 << 3);
    pub const RATING: RefineFlags = RefineFlags(1 << 4);
    pub const VERSION: RefineFlags = RefineFlags(1 << 5);
    pub const ORIGIN: RefineFlags = RefineFlags(1 << 6);
    pub const ICON: RefineFlags = RefineFlags(1 << 7);
    pub const CATEGORIES: RefineFlags = RefineFlags(1 << 8);
    pub const PROVENANCE: RefineFlags = RefineFlags(1 << 9);
    pub const RELATED: RefineFlags = RefineFlags(1 << 10);
    pub const RUNTIME: RefineFlags = RefineFlags(1 << 11);
    pub const ADDONS: RefineFlags = RefineFlags(1 << 12);
    pub const SETUP_ACTION: RefineFlags = RefineFlags(1 << 13);

    /// Flags that pull linked records into the refine pass.
    pub const RECURSIVE: RefineFlags =
        RefineFlags(Self::RELATED.0 | Self::RUNTIME.0 | Self::ADDONS.0);

    const NAMES: [(RefineFlags, &'static str); 14] = [
        (RefineFlags::LICENSE, "license"),
        (RefineFlags::URL, "url"),
        (RefineFlags::DESCRIPTION, "description"),
        (RefineFlags::SIZE, "size"),
        (RefineFlags::RATING, "rating"),
        (RefineFlags::VERSION, "version"),
        (RefineFlags::ORIGIN, "origin"),
        (RefineFlags::ICON, "icon"),
        (RefineFlags::CATEGORIES, "categories"),
        (RefineFlags::PROVENANCE, "provenance"),
        (RefineFlags::RELATED, "related"),
        (RefineFlags::RUNTIME, "runtime"),
        (RefineFlags::ADDONS, "addons"),
        (RefineFlags::SETUP_ACTION, "setup-action"),
    ];

    pub fn contains(&self, other: RefineFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: RefineFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn without(self, other: RefineFlags) -> RefineFlags {
        RefineFlags(self.0 & !other.0)
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(_, n)| *n)
            .collect()
    }
}

impl BitOr for RefineFlags {
    type Output = RefineFlags;

    fn bitor(self, rhs: RefineFlags) -> RefineFlags {
        RefineFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for RefineFlags {
    fn bitor_assign(&mut self, rhs: RefineFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for RefineFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

impl FromStr for RefineFlags {
    type Err = String;

    /// Parses a comma-separated list such as `icon,license`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = RefineFlags::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let flag = Self::NAMES
                .iter()
                .find(|(_, n)| n.eq_ignore_ascii_case(part))
                .map(|(f, _)| *f)
                .ok_or_else(|| {
                    let valid: Vec<&str> = Self::NAMES.iter().map(|(_, n)| *n).collect();
                    format!("invalid refine flag '{}': expected one of {}", part, valid.join(", "))
                })?;
            flags |= flag;
        }
        Ok(flags)
    }
}

/// What to do when one plugin invocation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log, record a warning and keep the other plugins' results.
    #[default]
    Continue,
    /// Cancel the siblings and surface the first error.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshKind {
    Metadata,
    Payload,
    All,
}

impl RefreshKind {
    pub fn includes_metadata(&self) -> bool {
        matches!(self, RefreshKind::Metadata | RefreshKind::All)
    }

    pub fn includes_payload(&self) -> bool {
        matches!(self, RefreshKind::Payload | RefreshKind::All)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    Submit { rating: i32, summary: String, text: String },
    Upvote,
    Downvote,
    Report,
    Remove,
}

/// The object a job operates on.
#[derive(Debug, Clone, Default)]
pub enum JobTarget {
    #[default]
    None,
    Query(String),
    Category(String),
    App(Arc<App>),
    File(PathBuf),
    Url(String),
    Review(Arc<App>, ReviewAction),
    Auth(String),
    Refresh(RefreshKind),
}

impl JobTarget {
    pub fn app(&self) -> Option<&Arc<App>> {
        match self {
            JobTarget::App(app) | JobTarget::Review(app, _) => Some(app),
            _ => None,
        }
    }
}

/// Caller-supplied allow/deny list narrowing the applicable plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginFilter {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl PluginFilter {
    pub fn permits(&self, name: &str) -> bool {
        if self.deny.iter().any(|d| d == name) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|a| a == name)
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// One requested operation. Build with the `with_*` methods, then submit;
/// the loader takes its own copy so a submitted job never changes.
#[derive(Debug, Clone)]
pub struct Job {
    action: Action,
    target: JobTarget,
    refine_flags: RefineFlags,
    failure_policy: FailurePolicy,
    dedupe: DedupeMode,
    filter: PluginFilter,
    timeout: Option<Duration>,
    max_results: Option<usize>,
    cache_age: Duration,
    skip_refine: bool,
    include_hidden: bool,
}

impl Job {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            target: JobTarget::None,
            refine_flags: RefineFlags::NONE,
            failure_policy: FailurePolicy::Continue,
            dedupe: DedupeMode::ById,
            filter: PluginFilter::default(),
            timeout: None,
            max_results: None,
            cache_age: Duration::MAX,
            skip_refine: false,
            include_hidden: false,
        }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self::new(Action::Search).with_target(JobTarget::Query(query.into()))
    }

    pub fn refine(app: Arc<App>, flags: RefineFlags) -> Self {
        Self::new(Action::Refine)
            .with_target(JobTarget::App(app))
            .with_refine_flags(flags)
    }

    pub fn app_action(action: Action, app: Arc<App>) -> Self {
        Self::new(action).with_target(JobTarget::App(app))
    }

    pub fn category_apps(category: impl Into<String>) -> Self {
        Self::new(Action::GetCategoryApps).with_target(JobTarget::Category(category.into()))
    }

    pub fn refresh(kind: RefreshKind, cache_age: Duration) -> Self {
        Self::new(Action::Refresh)
            .with_target(JobTarget::Refresh(kind))
            .with_cache_age(cache_age)
    }

    pub fn with_target(mut self, target: JobTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_refine_flags(mut self, flags: RefineFlags) -> Self {
        self.refine_flags |= flags;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_dedupe(mut self, mode: DedupeMode) -> Self {
        self.dedupe = mode;
        self
    }

    pub fn with_filter(mut self, filter: PluginFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Per-plugin invocation timeout, overriding the loader default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn with_cache_age(mut self, age: Duration) -> Self {
        self.cache_age = age;
        self
    }

    /// Skip the post-merge refine pass of list jobs.
    pub fn without_refine(mut self) -> Self {
        self.skip_refine = true;
        self
    }

    pub fn including_hidden(mut self) -> Self {
        self.include_hidden = true;
        self
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn target(&self) -> &JobTarget {
        &self.target
    }

    pub fn refine_flags(&self) -> RefineFlags {
        self.refine_flags
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn dedupe(&self) -> DedupeMode {
        self.dedupe
    }

    pub fn filter(&self) -> &PluginFilter {
        &self.filter
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_results(&self) -> Option<usize> {
        self.max_results
    }

    pub fn cache_age(&self) -> Duration {
        self.cache_age
    }

    pub fn skip_refine(&self) -> bool {
        self.skip_refine
    }

    pub fn include_hidden(&self) -> bool {
        self.include_hidden
    }

    /// Check the target matches what the action needs.
    pub fn validate(&self) -> Result<(), String> {
        let ok = match (self.action, &self.target) {
            (Action::Search, JobTarget::Query(q)) => !q.trim().is_empty(),
            (Action::GetCategoryApps, JobTarget::Category(c)) => !c.is_empty(),
            (Action::FileToApp, JobTarget::File(_)) => true,
            (Action::UrlToApp, JobTarget::Url(u)) => !u.is_empty(),
            (Action::Refine, JobTarget::App(_)) => true,
            (a, JobTarget::App(_)) if a.is_app_action() => true,
            (Action::ReviewAction, JobTarget::Review(..)) => true,
            (Action::AuthAction, JobTarget::Auth(_)) => true,
            (Action::Refresh, JobTarget::Refresh(_)) => true,
            (
                Action::GetInstalled
                | Action::GetUpdates
                | Action::GetDistroUpgrades
                | Action::GetSources
                | Action::GetPopular
                | Action::GetFeatured
                | Action::GetCategories,
                JobTarget::None,
            ) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "{} cannot take target {:?}",
                self.action,
                TargetKind(&self.target)
            ))
        }
    }
}

struct TargetKind<'a>(&'a JobTarget);

impl fmt::Debug for TargetKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.0 {
            JobTarget::None => "none",
            JobTarget::Query(q) if q.trim().is_empty() => "empty query",
            JobTarget::Query(_) => "query",
            JobTarget::Category(_) => "category",
            JobTarget::App(_) => "app",
            JobTarget::File(_) => "file",
            JobTarget::Url(_) => "url",
            JobTarget::Review(..) => "review",
            JobTarget::Auth(_) => "auth",
            JobTarget::Refresh(_) => "refresh",
        };
        f.write_str(s)
    }
}
