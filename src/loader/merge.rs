//! Fan-in post-processing of list results.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::{App, AppQuirks};
use crate::app_list::AppList;
use crate::error::{JobError, PluginFailure};
use crate::job::{Action, RefineFlags};
use crate::loader::dispatch::{guarded, handler, JobRun};

impl JobRun<'_> {
    /// Wildcards, adoption, dedup, refine, filtering, ordering, truncation.
    pub(crate) fn merge(
        &self,
        sink: &Arc<AppList>,
        mut warnings: Vec<PluginFailure>,
    ) -> Result<Vec<PluginFailure>, JobError> {
        warnings.extend(self.resolve_wildcards(sink)?);
        self.adopt(&sink.snapshot());
        sink.filter_duplicates(self.job.dedupe());
        warnings.extend(self.refine_pass(&sink.snapshot())?);

        let include_hidden = self.job.include_hidden();
        sink.filter(|app| {
            let hidden = !include_hidden && app.has_quirk(AppQuirks::HIDE_EVERYWHERE);
            if hidden || !app.is_valid() {
                debug!(
                    job = %self.id,
                    app = %app.unique_id().unwrap_or_else(|| app.key().to_string()),
                    hidden,
                    "dropping record from results"
                );
                return false;
            }
            true
        });

        match self.job.action() {
            Action::GetPopular | Action::GetFeatured => sink.randomize_daily(),
            Action::GetUpdates | Action::GetDistroUpgrades | Action::GetSources => {
                sink.sort_by(App::cmp_by_name)
            }
            _ => {}
        }

        if let Some(max) = self.job.max_results() {
            sink.truncate(max);
        }
        self.shared.remember(&sink.snapshot());
        debug!(job = %self.id, apps = sink.len(), "merged");
        Ok(warnings)
    }

    /// Offer every record without a management plugin to the enabled
    /// plugins in run order; the first claim wins.
    pub(crate) fn adopt(&self, apps: &[Arc<App>]) {
        let mut unowned: Vec<&Arc<App>> = apps
            .iter()
            .filter(|a| a.management_plugin().is_none())
            .collect();
        if unowned.is_empty() {
            return;
        }
        for entry in self.shared.registry.ordered().iter() {
            if !entry.is_enabled() {
                continue;
            }
            let ctx = self.shared.context(entry, self.token.child());
            for app in &unowned {
                let result = guarded(|| {
                    entry.plugin().adopt_app(app, &ctx);
                    Ok(())
                });
                if let Err(e) = result {
                    warn!(job = %self.id, plugin = %entry.name(), error = %e, "adopt failed");
                }
            }
            unowned.retain(|a| a.management_plugin().is_none());
            if unowned.is_empty() {
                break;
            }
        }
    }

    /// Replace wildcard placeholders with the concrete records refine
    /// plugins resolve them to. Unresolved wildcards are dropped.
    fn resolve_wildcards(&self, sink: &Arc<AppList>) -> Result<Vec<PluginFailure>, JobError> {
        let wildcards: Vec<Arc<App>> = sink
            .snapshot()
            .into_iter()
            .filter(|a| a.has_quirk(AppQuirks::IS_WILDCARD))
            .collect();
        if wildcards.is_empty() {
            return Ok(Vec::new());
        }

        let plugins = self
            .shared
            .registry
            .applicable_for(Action::Refine, self.job.filter());
        let resolved = Arc::new(AppList::new());
        let flags = self.job.refine_flags();
        let targets = Arc::new(wildcards.clone());
        let invoke = handler(move |p, ctx| {
            for wildcard in targets.iter() {
                p.refine_wildcard(wildcard, flags, ctx)?;
            }
            Ok(())
        });
        let outcome = self.sequential(&plugins, Some(&resolved), &invoke)?;

        for wildcard in &wildcards {
            sink.remove(wildcard);
        }
        debug!(
            job = %self.id,
            wildcards = wildcards.len(),
            resolved = resolved.len(),
            "wildcards resolved"
        );
        sink.add_list(&resolved);
        Ok(outcome.failures)
    }

    /// Refine records whose refined set does not cover the job's flags.
    fn refine_pass(&self, apps: &[Arc<App>]) -> Result<Vec<PluginFailure>, JobError> {
        let flags = self.job.refine_flags();
        if flags.is_empty() || self.job.skip_refine() {
            return Ok(Vec::new());
        }
        let pending: Vec<Arc<App>> = apps
            .iter()
            .filter(|a| !a.refined().contains(flags))
            .cloned()
            .collect();
        let mut warnings = self.refine_apps(&pending, flags)?;
        warnings.extend(self.refine_related(apps, flags)?);
        Ok(warnings)
    }

    /// Refine the related and runtime records of `apps` without the
    /// recursion flags, so the walk stops one level down.
    pub(crate) fn refine_related(
        &self,
        apps: &[Arc<App>],
        flags: RefineFlags,
    ) -> Result<Vec<PluginFailure>, JobError> {
        let stripped = flags.without(RefineFlags::RECURSIVE);
        if !flags.intersects(RefineFlags::RECURSIVE) || stripped.is_empty() {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let mut related = Vec::new();
        for app in apps {
            let mut keys = app.related();
            keys.extend(app.runtime());
            for other in self.shared.arena.resolve_all(&keys) {
                if seen.insert(other.key()) && !other.refined().contains(stripped) {
                    related.push(other);
                }
            }
        }
        self.refine_apps(&related, stripped)
    }

    fn refine_apps(
        &self,
        apps: &[Arc<App>],
        flags: RefineFlags,
    ) -> Result<Vec<PluginFailure>, JobError> {
        if apps.is_empty() {
            return Ok(Vec::new());
        }
        let plugins = self
            .shared
            .registry
            .applicable_for(Action::Refine, self.job.filter());
        let targets = Arc::new(apps.to_vec());
        let invoke = handler(move |p, ctx| p.refine(&targets, flags, ctx));
        let outcome = self.sequential(&plugins, None, &invoke)?;
        for app in apps {
            app.mark_refined(flags);
        }
        debug!(job = %self.id, apps = apps.len(), flags = %flags, "refined");
        Ok(outcome.failures)
    }
}
