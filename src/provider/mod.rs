//! Bundled backend plugins.

pub mod blocklist;
pub mod desktop;
pub mod flatpak;
pub mod popular;
pub mod provenance;

use thiserror::Error;

use crate::config::Settings;
use crate::plugin::{Plugin, PluginError};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("tool not available: {0}")]
    ToolNotAvailable(String),
    #[error("{tool} exited with {status}: {stderr}")]
    CommandFailed {
        tool: String,
        status: i32,
        stderr: String,
    },
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProviderError> for PluginError {
    fn from(e: ProviderError) -> Self {
        PluginError::Failed(e.to_string())
    }
}

/// The plugins the command-line front-end registers, in registration order.
pub fn default_plugins(settings: &Settings) -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(desktop::DesktopPlugin::new()),
        Box::new(flatpak::FlatpakPlugin::new()),
        Box::new(popular::PopularPlugin::new(settings)),
        Box::new(provenance::ProvenancePlugin::new(settings)),
        Box::new(blocklist::BlocklistPlugin::new(settings)),
    ]
}

/// Whether `tool` resolves on `PATH`.
pub(crate) fn has_tool(tool: &str) -> bool {
    std::process::Command::new("which")
        .arg(tool)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Split an `Exec`-style command line into program and arguments.
pub(crate) fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}
