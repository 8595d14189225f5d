use std::fmt;

use thiserror::Error;

use crate::job::Action;
use crate::plugin::PluginError;

/// Startup and registry errors. Any of these keeps the loader from becoming
/// ready.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("plugin '{0}' registered twice")]
    DuplicatePlugin(String),

    #[error("plugin ordering rules form a cycle involving: {}", .0.join(", "))]
    CyclicConstraint(Vec<String>),

    #[error("no plugin named '{0}'")]
    UnknownPlugin(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

/// A plugin error tagged with the plugin that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFailure {
    pub plugin: String,
    pub error: PluginError,
}

impl PluginFailure {
    pub fn new(plugin: impl Into<String>, error: PluginError) -> Self {
        Self {
            plugin: plugin.into(),
            error,
        }
    }
}

impl fmt::Display for PluginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}': {}", self.plugin, self.error)
    }
}

/// Terminal failure of a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job cancelled")]
    Cancelled,

    #[error("no plugin supports {0}")]
    NotSupported(Action),

    #[error("invalid job: {0}")]
    InvalidArgument(String),

    #[error("plugin '{plugin}' timed out")]
    Timeout { plugin: String },

    #[error("{0}")]
    Plugin(PluginFailure),

    #[error("{} plugins failed: {}", .0.len(), join_failures(.0))]
    Multiple(Vec<PluginFailure>),
}

impl JobError {
    /// Collapse a set of failures into the most specific error.
    pub fn from_failures(action: Action, mut failures: Vec<PluginFailure>) -> JobError {
        match failures.len() {
            0 => JobError::NotSupported(action),
            1 => JobError::from(failures.remove(0)),
            _ => JobError::Multiple(failures),
        }
    }
}

impl From<PluginFailure> for JobError {
    fn from(failure: PluginFailure) -> Self {
        match failure.error {
            PluginError::Cancelled => JobError::Cancelled,
            PluginError::Timeout(_) => JobError::Timeout {
                plugin: failure.plugin,
            },
            PluginError::InvalidArgument(msg) => JobError::InvalidArgument(msg),
            _ => JobError::Plugin(failure),
        }
    }
}

fn join_failures(failures: &[PluginFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_message_names_plugins() {
        let err = LoaderError::CyclicConstraint(vec!["a".into(), "b".into()]);
        assert_eq!(
            err.to_string(),
            "plugin ordering rules form a cycle involving: a, b"
        );
    }

    #[test]
    fn test_from_failures() {
        assert_eq!(
            JobError::from_failures(Action::Install, Vec::new()),
            JobError::NotSupported(Action::Install)
        );

        let one = vec![PluginFailure::new("flatpak", PluginError::failed("no network"))];
        let err = JobError::from_failures(Action::Search, one);
        assert_eq!(err.to_string(), "plugin 'flatpak': no network");

        let timeout = vec![PluginFailure::new(
            "slow",
            PluginError::Timeout(std::time::Duration::from_secs(1)),
        )];
        assert_eq!(
            JobError::from_failures(Action::Search, timeout),
            JobError::Timeout {
                plugin: "slow".into()
            }
        );

        let two = vec![
            PluginFailure::new("a", PluginError::failed("x")),
            PluginFailure::new("b", PluginError::failed("y")),
        ];
        let msg = JobError::from_failures(Action::Search, two).to_string();
        assert!(msg.starts_with("2 plugins failed"));
        assert!(msg.contains("plugin 'b': y"));
    }
}
