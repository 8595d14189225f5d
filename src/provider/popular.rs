use parking_lot::RwLock;
use tracing::debug;

use crate::app::{App, AppId, AppQuirks};
use crate::config::Settings;
use crate::job::Action;
use crate::plugin::{Plugin, PluginContext, PluginError, PluginInfo};

const NAME: &str = "popular";

/// Curated popular and featured picks, reported as wildcards that the
/// refine plugins turn into concrete records.
pub struct PopularPlugin {
    popular: RwLock<Vec<String>>,
    featured: RwLock<Vec<String>>,
}

impl PopularPlugin {
    pub fn new(settings: &Settings) -> Self {
        Self {
            popular: RwLock::new(settings.popular.clone()),
            featured: RwLock::new(settings.featured.clone()),
        }
    }

    fn add_wildcards(ids: &[String], ctx: &PluginContext) -> Result<(), PluginError> {
        for id in ids {
            ctx.check_cancelled()?;
            let app = App::with_id(AppId::wildcard(id));
            app.add_quirk(AppQuirks::IS_WILDCARD);
            ctx.add(app);
        }
        Ok(())
    }
}

impl Plugin for PopularPlugin {
    fn initialize(&self) -> PluginInfo {
        PluginInfo::new(NAME).supports(&[Action::GetPopular, Action::GetFeatured])
    }

    fn reload(&self, settings: &Settings) {
        *self.popular.write() = settings.popular.clone();
        *self.featured.write() = settings.featured.clone();
        debug!(
            popular = settings.popular.len(),
            featured = settings.featured.len(),
            "popular lists reloaded"
        );
    }

    fn list_popular(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let ids = self.popular.read().clone();
        Self::add_wildcards(&ids, ctx)
    }

    fn list_featured(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        let ids = self.featured.read().clone();
        Self::add_wildcards(&ids, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(popular: &[&str]) -> Settings {
        let mut settings = Settings::default();
        settings.popular = popular.iter().map(|s| s.to_string()).collect();
        settings
    }

    #[test]
    fn test_popular_are_wildcards() {
        let plugin = PopularPlugin::new(&settings(&["org.gnome.Maps", "org.gimp.GIMP"]));
        let (ctx, sink) = PluginContext::detached(NAME);
        plugin.list_popular(&ctx).unwrap();
        assert_eq!(sink.len(), 2);
        for app in sink.snapshot() {
            assert!(app.has_quirk(AppQuirks::IS_WILDCARD));
            assert!(app.id().unwrap().is_wildcard());
        }
        assert_eq!(sink.get(0).unwrap().base_id(), Some("org.gnome.Maps"));
    }

    #[test]
    fn test_featured_empty_by_default() {
        let plugin = PopularPlugin::new(&Settings::default());
        let (ctx, sink) = PluginContext::detached(NAME);
        plugin.list_featured(&ctx).unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_reload_replaces_ids() {
        let plugin = PopularPlugin::new(&settings(&["a"]));
        plugin.reload(&settings(&["b", "c"]));
        let (ctx, sink) = PluginContext::detached(NAME);
        plugin.list_popular(&ctx).unwrap();
        let names: Vec<_> = sink
            .snapshot()
            .iter()
            .filter_map(|a| a.base_id().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
