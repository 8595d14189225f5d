//! Plugin loader and job coordinator for an application-store front-end.
//!
//! Backends implement [`Plugin`]; a [`Loader`] registers them, orders them by
//! their declared rules and runs [`Job`]s against them concurrently, merging
//! the records they report into one [`AppList`].

pub mod app;
pub mod app_list;
pub mod cache;
pub mod cancel;
pub mod category;
pub mod config;
pub mod error;
pub mod job;
pub mod loader;
pub mod output;
pub mod plugin;
pub mod provider;

pub use app::{App, AppId, AppKind, AppQuirks, AppSnapshot, AppState};
pub use app_list::{AppList, DedupeMode};
pub use cancel::Cancellable;
pub use category::{Category, CategoryList};
pub use config::Settings;
pub use error::{JobError, LoaderError, PluginFailure};
pub use job::{Action, FailurePolicy, Job, JobTarget, PluginFilter, RefineFlags, RefreshKind};
pub use loader::{JobHandle, JobId, JobOutput, JobResult, JobState, Loader, LoaderBuilder};
pub use plugin::{Plugin, PluginContext, PluginError, PluginInfo, PluginRule};
