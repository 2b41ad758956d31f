use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::store::is_within;

/// Edges from a source entry to the entries whose rules read it, keyed by canonical
/// name so they survive item reordering.
#[derive(Clone, Debug, Default)]
pub(super) struct DependencyGraph {
    rule_sources: BTreeMap<String, BTreeSet<String>>,
    explicit: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub(super) fn replace_rule_links(&mut self, dependent: &str, sources: BTreeSet<String>) {
        if sources.is_empty() {
            self.rule_sources.remove(dependent);
        } else {
            self.rule_sources.insert(dependent.to_owned(), sources);
        }
    }

    pub(super) fn link(&mut self, source: &str, dependent: &str) {
        self.explicit
            .entry(source.to_owned())
            .or_default()
            .insert(dependent.to_owned());
    }

    pub(super) fn forget(&mut self, prefix: &str) {
        self.rule_sources
            .retain(|dependent, _| !is_within(dependent, prefix));
        for sources in self.rule_sources.values_mut() {
            sources.retain(|source| !is_within(source, prefix));
        }
        self.rule_sources.retain(|_, sources| !sources.is_empty());

        self.explicit.retain(|source, _| !is_within(source, prefix));
        for dependents in self.explicit.values_mut() {
            dependents.retain(|dependent| !is_within(dependent, prefix));
        }
        self.explicit.retain(|_, dependents| !dependents.is_empty());
    }

    fn direct_dependents(&self, source: &str) -> BTreeSet<String> {
        let mut dependents = self
            .rule_sources
            .iter()
            .filter(|(_, sources)| sources.contains(source))
            .map(|(dependent, _)| dependent.clone())
            .collect::<BTreeSet<_>>();
        if let Some(explicit) = self.explicit.get(source) {
            dependents.extend(explicit.iter().cloned());
        }
        dependents
    }

    /// Every entry reachable from `sources`, each listed once, sources excluded.
    /// Cycles terminate because visited entries are never queued again.
    pub(super) fn fan_out(&self, sources: &[String]) -> Vec<String> {
        let mut visited = sources.iter().cloned().collect::<BTreeSet<_>>();
        let mut queue = sources.iter().cloned().collect::<VecDeque<_>>();
        let mut reached = Vec::new();
        while let Some(current) = queue.pop_front() {
            for dependent in self.direct_dependents(&current) {
                if visited.insert(dependent.clone()) {
                    reached.push(dependent.clone());
                    queue.push_back(dependent);
                }
            }
        }
        reached
    }
}
