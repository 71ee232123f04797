//! Greedy partition of mutants into dependency-independent groups.

use std::collections::{HashSet, VecDeque};

use super::graph::{DependencyGraph, Discovery};
use super::resolver::DependencyResolver;
use crate::mutant::Mutant;

/// Partitions mutants so that no two files in one group depend on each other, directly or
/// transitively. Mutants sharing a file always end up in different groups.
pub struct GroupBuilder<'r> {
    resolver: &'r dyn DependencyResolver,
}

impl<'r> GroupBuilder<'r> {
    /// Builder resolving file dependencies through `resolver`.
    pub fn new(resolver: &'r dyn DependencyResolver) -> Self {
        Self { resolver }
    }

    /// Partition `mutants`. Every mutant appears in exactly one non-empty group.
    ///
    /// Mutants whose files cannot be resolved are placed in singleton groups after the rest.
    pub fn build(&self, mutants: &[Mutant]) -> Vec<Vec<Mutant>> {
        let mut roots: Vec<&str> = Vec::new();
        for mutant in mutants {
            if !roots.contains(&mutant.file_name.as_str()) {
                roots.push(&mutant.file_name);
            }
        }
        let Discovery { graph, unresolved } =
            DependencyGraph::discover(roots.iter().copied(), self.resolver);

        let mut buckets: Vec<VecDeque<Mutant>> = vec![VecDeque::new(); graph.len()];
        let mut singletons: Vec<Vec<Mutant>> = Vec::new();
        for mutant in mutants {
            match graph.index_of(&mutant.file_name) {
                Some(idx) if !unresolved.contains(&mutant.file_name) => {
                    buckets[idx].push_back(mutant.clone())
                }
                _ => singletons.push(vec![mutant.clone()]),
            }
        }
        if !singletons.is_empty() {
            log::warn!(
                "Could not resolve dependencies of {} mutant(s); checking them on their own.",
                singletons.len()
            );
        }

        // Only files hosting mutants ever join a group, so only they need closures.
        let closure_of = |closure: fn(&DependencyGraph, usize) -> HashSet<usize>| -> Vec<HashSet<usize>> {
            (0..graph.len())
                .map(|idx| {
                    if buckets[idx].is_empty() {
                        HashSet::new()
                    } else {
                        closure(&graph, idx)
                    }
                })
                .collect()
        };
        let dependencies = closure_of(DependencyGraph::all_dependencies);
        let dependents = closure_of(DependencyGraph::all_imports);

        let mut groups = Vec::new();
        loop {
            let mut used = vec![false; graph.len()];
            let mut emitted = false;

            for active in 0..graph.len() {
                if used[active] {
                    continue;
                }
                let Some(seed) = buckets[active].pop_front() else {
                    continue;
                };
                used[active] = true;

                let mut group = vec![seed];
                let mut excluded = dependencies[active].clone();
                let mut importers = dependents[active].clone();

                for search in 0..graph.len() {
                    if used[search] || buckets[search].is_empty() || excluded.contains(&search) {
                        continue;
                    }
                    // `search` requires a member, directly or transitively.
                    if importers.contains(&search) {
                        continue;
                    }
                    let Some(next) = buckets[search].pop_front() else {
                        continue;
                    };
                    used[search] = true;
                    group.push(next);
                    excluded.extend(dependencies[search].iter().copied());
                    importers.extend(dependents[search].iter().copied());
                }

                groups.push(group);
                emitted = true;
            }

            if !emitted {
                break;
            }
        }

        groups.extend(singletons);
        groups
    }
}
