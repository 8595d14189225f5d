use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::app::{App, AppQuirks};
use crate::config::Settings;
use crate::job::{Action, RefineFlags};
use crate::plugin::{Plugin, PluginContext, PluginError, PluginInfo};

const NAME: &str = "provenance";

/// Marks records from trusted origins with the provenance quirk.
pub struct ProvenancePlugin {
    sources: RwLock<HashSet<String>>,
}

impl ProvenancePlugin {
    pub fn new(settings: &Settings) -> Self {
        Self {
            sources: RwLock::new(settings.provenance_sources.iter().cloned().collect()),
        }
    }
}

impl Plugin for ProvenancePlugin {
    fn initialize(&self) -> PluginInfo {
        PluginInfo::new(NAME)
            .supports(&[Action::Refine])
            .run_after("desktop")
            .run_after("flatpak")
    }

    fn reload(&self, settings: &Settings) {
        *self.sources.write() = settings.provenance_sources.iter().cloned().collect();
    }

    fn refine(
        &self,
        apps: &[Arc<App>],
        flags: RefineFlags,
        ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        if !flags.contains(RefineFlags::PROVENANCE) {
            return Ok(());
        }
        let sources = self.sources.read();
        for app in apps {
            ctx.check_cancelled()?;
            if app.has_quirk(AppQuirks::PROVENANCE) {
                continue;
            }
            if app.id().is_some_and(|id| sources.contains(id.origin())) {
                app.add_quirk(AppQuirks::PROVENANCE);
            }
        }
        Ok(())
    }
}
