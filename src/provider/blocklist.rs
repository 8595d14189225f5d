use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use crate::app::{App, AppQuirks};
use crate::config::Settings;
use crate::job::{Action, RefineFlags};
use crate::plugin::{Plugin, PluginContext, PluginError, PluginInfo};

const NAME: &str = "blocklist";

/// Hides records whose base id matches a configured glob.
pub struct BlocklistPlugin {
    patterns: RwLock<Vec<Regex>>,
}

/// `*` matches any run of characters; everything else is literal.
fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(glob).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped))
}

fn compile(globs: &[String]) -> Vec<Regex> {
    globs
        .iter()
        .filter_map(|glob| match glob_to_regex(glob) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %glob, error = %e, "ignoring blocklist pattern");
                None
            }
        })
        .collect()
}

impl BlocklistPlugin {
    pub fn new(settings: &Settings) -> Self {
        Self {
            patterns: RwLock::new(compile(&settings.blocklist)),
        }
    }

    fn is_blocked(&self, base_id: &str) -> bool {
        self.patterns.read().iter().any(|re| re.is_match(base_id))
    }
}

impl Plugin for BlocklistPlugin {
    fn initialize(&self) -> PluginInfo {
        PluginInfo::new(NAME)
            .supports(&[Action::Refine])
            .run_after("desktop")
            .run_after("flatpak")
    }

    fn reload(&self, settings: &Settings) {
        *self.patterns.write() = compile(&settings.blocklist);
    }

    fn refine(
        &self,
        apps: &[Arc<App>],
        _flags: RefineFlags,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        if self.patterns.read().is_empty() {
            return Ok(());
        }
        for app in apps {
            ctx.check_cancelled()?;
            if let Some(base_id) = app.base_id() {
                if self.is_blocked(base_id) {
                    debug!(app = %base_id, "blocklisted");
                    app.add_quirk(AppQuirks::HIDE_EVERYWHERE);
                }
            }
        }
        Ok(())
    }
}
