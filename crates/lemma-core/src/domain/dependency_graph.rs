//! Module dependency graph.
//!
//! Forward edges (module -> required modules) are owned by the requiring
//! module. The reverse index (module -> dependents) is derived from them
//! and only used to walk invalidation cascades.

use std::collections::{BTreeSet, HashMap};

use crate::types::ModuleAddress;

/// Required-module edges plus their reverse index, keyed by address
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    required: HashMap<ModuleAddress, Vec<ModuleAddress>>,
    dependents: HashMap<ModuleAddress, BTreeSet<ModuleAddress>>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Modules `module` requires, in declaration order
    pub fn required(&self, module: &ModuleAddress) -> Vec<ModuleAddress> {
        self.required.get(module).cloned().unwrap_or_default()
    }

    /// Modules that list `module` as required
    pub fn dependents(&self, module: &ModuleAddress) -> Vec<ModuleAddress> {
        self.dependents
            .get(module)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Does `module` list `target` as required?
    pub fn requires(&self, module: &ModuleAddress, target: &ModuleAddress) -> bool {
        self.required
            .get(module)
            .map(|list| list.contains(target))
            .unwrap_or(false)
    }

    /// Replace the required list of `module`, returning the previous one.
    ///
    /// Duplicates are dropped, first occurrence wins.
    pub fn set_required(
        &mut self,
        module: &ModuleAddress,
        required: Vec<ModuleAddress>,
    ) -> Vec<ModuleAddress> {
        let previous = self.clear_required(module);

        let mut seen = BTreeSet::new();
        let required: Vec<ModuleAddress> = required
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect();

        for target in &required {
            self.dependents
                .entry(target.clone())
                .or_default()
                .insert(module.clone());
        }
        if !required.is_empty() {
            self.required.insert(module.clone(), required);
        }
        previous
    }

    /// Remove the required list of `module` and its reverse entries
    pub fn clear_required(&mut self, module: &ModuleAddress) -> Vec<ModuleAddress> {
        let previous = self.required.remove(module).unwrap_or_default();
        for target in &previous {
            if let Some(set) = self.dependents.get_mut(target) {
                set.remove(module);
                if set.is_empty() {
                    self.dependents.remove(target);
                }
            }
        }
        previous
    }

    /// Detach and return the dependents of `module`.
    ///
    /// Only the reverse side is removed; each dependent still lists `module`
    /// until it is reset.
    pub fn take_dependents(&mut self, module: &ModuleAddress) -> Vec<ModuleAddress> {
        self.dependents
            .remove(module)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// Every module that requires `module` directly or indirectly
    pub fn transitive_dependents(&self, module: &ModuleAddress) -> BTreeSet<ModuleAddress> {
        let mut result = BTreeSet::new();
        let mut stack = vec![module.clone()];
        while let Some(current) = stack.pop() {
            if let Some(set) = self.dependents.get(&current) {
                for dependent in set {
                    if dependent != module && result.insert(dependent.clone()) {
                        stack.push(dependent.clone());
                    }
                }
            }
        }
        result
    }

    /// Number of modules with a non-empty required list
    pub fn len(&self) -> usize {
        self.required.len()
    }

    /// True if no module requires anything
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }
}
