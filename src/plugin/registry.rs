//! Registered plugins and their run order.
//!
//! The order is computed once at startup with Kahn's algorithm; the ready set
//! is keyed by registration index so unconstrained plugins keep the order they
//! were registered in. Enabling and disabling only flips an atomic flag on the
//! entry, so it is safe while jobs are resolving their plugin lists.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::LoaderError;
use crate::job::{Action, Job, PluginFilter};
use crate::plugin::{Plugin, PluginInfo, PluginRule};

pub struct PluginEntry {
    plugin: Box<dyn Plugin>,
    info: PluginInfo,
    index: usize,
    priority: AtomicI32,
    enabled: AtomicBool,
    /// Calls that outlived their deadline and are still running.
    stalled: AtomicUsize,
}

impl PluginEntry {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// Position in registration order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Declared priority, raised by `better-than` rules.
    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn supports(&self, action: Action) -> bool {
        self.info.has_action(action)
    }

    /// True while a call that timed out has not returned yet. Such a plugin
    /// is not dispatched again until it does.
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire) > 0
    }

    pub(crate) fn mark_stalled(&self) {
        self.stalled.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn clear_stalled(&self) {
        self.stalled.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.info.name)
            .field("index", &self.index)
            .field("priority", &self.priority())
            .field("enabled", &self.is_enabled())
            .field("stalled", &self.is_stalled())
            .finish()
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<Arc<PluginEntry>>,
    by_name: HashMap<String, usize>,
    order: RwLock<Option<Arc<Vec<Arc<PluginEntry>>>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and register a plugin. Names must be unique.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<(), LoaderError> {
        let info = plugin.initialize();
        if self.by_name.contains_key(&info.name) {
            return Err(LoaderError::DuplicatePlugin(info.name));
        }
        let index = self.entries.len();
        debug!(plugin = %info.name, priority = info.priority, "registered plugin");
        self.by_name.insert(info.name.clone(), index);
        self.entries.push(Arc::new(PluginEntry {
            priority: AtomicI32::new(info.priority),
            plugin,
            info,
            index,
            enabled: AtomicBool::new(true),
            stalled: AtomicUsize::new(0),
        }));
        *self.order.write() = None;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginEntry>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.entries[i]))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply `better-than` then `conflicts` rules. Rules naming plugins that
    /// are not registered are skipped.
    pub fn apply_rules(&self) {
        for entry in &self.entries {
            for rule in &entry.info.rules {
                if let PluginRule::BetterThan(other) = rule {
                    let Some(other) = self.get(other) else {
                        debug!(plugin = %entry.name(), other = %other, "better-than names unknown plugin");
                        continue;
                    };
                    let floor = other.priority() + 1;
                    if entry.priority() < floor {
                        entry.priority.store(floor, Ordering::Relaxed);
                        debug!(plugin = %entry.name(), priority = floor, "priority raised");
                    }
                }
            }
        }

        for entry in &self.entries {
            for rule in &entry.info.rules {
                if let PluginRule::Conflicts(other) = rule {
                    let Some(other) = self.get(other) else {
                        debug!(plugin = %entry.name(), other = %other, "conflict names unknown plugin");
                        continue;
                    };
                    if !entry.is_enabled() || !other.is_enabled() {
                        continue;
                    }
                    let (loser, winner) = if entry.priority() < other.priority() {
                        (entry, &other)
                    } else {
                        (&other, entry)
                    };
                    loser.set_enabled(false);
                    info!(
                        plugin = %loser.name(),
                        conflicts_with = %winner.name(),
                        "plugin disabled by conflict rule"
                    );
                }
            }
        }
    }

    /// Topologically sort all plugins over their run-before / run-after
    /// rules. Fails without a partial order when the rules form a cycle.
    pub fn compute_order(&self) -> Result<Vec<Arc<PluginEntry>>, LoaderError> {
        let n = self.entries.len();
        let mut in_degree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];

        for entry in &self.entries {
            for rule in &entry.info.rules {
                let (from, to) = match rule {
                    PluginRule::RunBefore(other) => match self.by_name.get(other) {
                        Some(&o) => (entry.index, o),
                        None => continue,
                    },
                    PluginRule::RunAfter(other) => match self.by_name.get(other) {
                        Some(&o) => (o, entry.index),
                        None => continue,
                    },
                    _ => continue,
                };
                if !successors[from].contains(&to) {
                    successors[from].push(to);
                    in_degree[to] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            order.push(Arc::clone(&self.entries[next]));
            for &succ in &successors[next] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }

        if order.len() != n {
            let mut in_cycle: Vec<String> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.entries[i].info.name.clone())
                .collect();
            in_cycle.sort();
            return Err(LoaderError::CyclicConstraint(in_cycle));
        }

        *self.order.write() = Some(Arc::new(order.clone()));
        Ok(order)
    }

    /// The computed run order, or registration order before
    /// [`compute_order`](Self::compute_order) has succeeded.
    pub fn ordered(&self) -> Arc<Vec<Arc<PluginEntry>>> {
        match &*self.order.read() {
            Some(order) => Arc::clone(order),
            None => Arc::new(self.entries.clone()),
        }
    }

    pub fn applicable(&self, job: &Job) -> Vec<Arc<PluginEntry>> {
        self.applicable_for(job.action(), job.filter())
    }

    /// Enabled plugins supporting `action` and permitted by `filter`, in run
    /// order.
    pub fn applicable_for(&self, action: Action, filter: &PluginFilter) -> Vec<Arc<PluginEntry>> {
        self.ordered()
            .iter()
            .filter(|e| e.is_enabled() && e.supports(action) && filter.permits(e.name()))
            .cloned()
            .collect()
    }

    pub fn enable(&self, name: &str, enabled: bool) -> Result<(), LoaderError> {
        let entry = self
            .get(name)
            .ok_or_else(|| LoaderError::UnknownPlugin(name.to_string()))?;
        entry.set_enabled(enabled);
        debug!(plugin = %name, enabled, "plugin toggled");
        Ok(())
    }

    /// Unknown plugins report `false`.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.is_enabled())
    }
}
