//! Backend plugin contract.
//!
//! A plugin declares what it can do in [`Plugin::initialize`] and implements
//! one handler per action kind. Every handler defaults to
//! [`PluginError::NotSupported`], so a plugin only overrides what it declares.

mod context;
mod registry;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use context::PluginContext;
pub use registry::{PluginEntry, PluginRegistry};

use crate::app::App;
use crate::category::CategoryList;
use crate::config::Settings;
use crate::job::{Action, RefineFlags, RefreshKind, ReviewAction};

/// Outcome of a single plugin invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("not supported")]
    NotSupported,
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Failed(String),
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        PluginError::Failed(message.into())
    }
}

impl From<std::io::Error> for PluginError {
    fn from(e: std::io::Error) -> Self {
        PluginError::Failed(format!("io error: {}", e))
    }
}

/// Ordering and exclusion constraints between plugins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginRule {
    RunBefore(String),
    RunAfter(String),
    /// Only one of the two may stay enabled.
    Conflicts(String),
    /// Results from this plugin outrank the named one.
    BetterThan(String),
}

/// What a plugin declares about itself at initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub priority: i32,
    pub actions: BTreeSet<Action>,
    pub rules: Vec<PluginRule>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            actions: BTreeSet::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn supports(mut self, actions: &[Action]) -> Self {
        self.actions.extend(actions.iter().copied());
        self
    }

    pub fn run_before(mut self, name: impl Into<String>) -> Self {
        self.rules.push(PluginRule::RunBefore(name.into()));
        self
    }

    pub fn run_after(mut self, name: impl Into<String>) -> Self {
        self.rules.push(PluginRule::RunAfter(name.into()));
        self
    }

    pub fn conflicts(mut self, name: impl Into<String>) -> Self {
        self.rules.push(PluginRule::Conflicts(name.into()));
        self
    }

    pub fn better_than(mut self, name: impl Into<String>) -> Self {
        self.rules.push(PluginRule::BetterThan(name.into()));
        self
    }

    pub fn has_action(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }
}

/// A capability provider for one software source.
///
/// List handlers report records through [`PluginContext::add`], which is
/// safe to call from concurrently running plugins of the same job.
pub trait Plugin: Send + Sync {
    /// Declare name, capabilities, priority and ordering rules.
    fn initialize(&self) -> PluginInfo;

    /// One-time setup, may perform I/O. An error disables the plugin.
    fn setup(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn destroy(&self) {}

    /// New settings were loaded.
    fn reload(&self, _settings: &Settings) {}

    /// Offered every record without a management plugin, in registry order.
    /// Claim it with [`App::claim_management`].
    fn adopt_app(&self, _app: &App, _ctx: &PluginContext) {}

    fn search(&self, _query: &str, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn list_installed(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn list_updates(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn list_distro_upgrades(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn list_sources(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn list_popular(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn list_featured(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn list_categories(
        &self,
        _categories: &CategoryList,
        _ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn list_category_apps(&self, _category: &str, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn file_to_app(&self, _path: &Path, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn url_to_app(&self, _url: &str, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    /// Fill in attributes on `apps`. Every refine-capable plugin runs, so
    /// a plugin should leave alone data it is not authoritative for.
    fn refine(
        &self,
        _apps: &[Arc<App>],
        _flags: RefineFlags,
        _ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    /// Add concrete records matching a wildcard placeholder.
    fn refine_wildcard(
        &self,
        _wildcard: &App,
        _flags: RefineFlags,
        _ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn install(&self, _app: &Arc<App>, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn remove(&self, _app: &Arc<App>, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn launch(&self, _app: &Arc<App>, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn update(&self, _app: &Arc<App>, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn review(
        &self,
        _app: &Arc<App>,
        _action: &ReviewAction,
        _ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn auth(&self, _provider: &str, _ctx: &PluginContext) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }

    fn refresh(
        &self,
        _kind: RefreshKind,
        _cache_age: Duration,
        _ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        Err(PluginError::NotSupported)
    }
}
