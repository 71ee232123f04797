//! File dependency graph.

use std::collections::{HashMap, HashSet};

use super::resolver::DependencyResolver;

/// One file in a [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    /// File path as reported by the resolver.
    pub file_name: String,
    /// Indices of the files this file requires.
    pub dependencies: Vec<usize>,
    /// Indices of the files that require this file.
    pub imports: Vec<usize>,
}

/// Arena of files linked by direct dependency edges. Cycles are allowed.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    index: HashMap<String, usize>,
}

/// Result of [`DependencyGraph::discover`].
#[derive(Debug, Default)]
pub struct Discovery {
    /// The populated graph.
    pub graph: DependencyGraph,
    /// Files whose direct dependencies could not be resolved.
    pub unresolved: HashSet<String>,
}

impl DependencyGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every root and, transitively, everything it requires.
    ///
    /// Each file is resolved at most once. A file whose resolution fails is kept as a node with no
    /// dependencies and reported in [`Discovery::unresolved`].
    pub fn discover<'a, I>(roots: I, resolver: &dyn DependencyResolver) -> Discovery
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut graph = Self::new();
        let mut unresolved = HashSet::new();
        let mut expanded: HashSet<usize> = HashSet::new();

        for root in roots {
            let mut stack = vec![graph.insert(root)];
            while let Some(current) = stack.pop() {
                if !expanded.insert(current) {
                    continue;
                }
                let file = graph.nodes[current].file_name.clone();
                match resolver.resolve_dependencies(&file) {
                    Ok(deps) => {
                        let mut next = Vec::with_capacity(deps.len());
                        for dep in deps {
                            let target = graph.insert(&dep);
                            graph.add_edge(current, target);
                            next.push(target);
                        }
                        // Reverse so the first dependency is expanded first.
                        stack.extend(next.into_iter().rev());
                    }
                    Err(err) => {
                        log::debug!("treating {file} as having no dependencies: {err}");
                        unresolved.insert(file);
                    }
                }
            }
        }

        Discovery { graph, unresolved }
    }

    /// Index of `file_name`, inserting a new node when absent.
    pub fn insert(&mut self, file_name: &str) -> usize {
        if let Some(&idx) = self.index.get(file_name) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(DependencyNode {
            file_name: file_name.to_string(),
            dependencies: Vec::new(),
            imports: Vec::new(),
        });
        self.index.insert(file_name.to_string(), idx);
        idx
    }

    /// Record that `from` requires `to`.
    pub fn add_edge(&mut self, from: usize, to: usize) {
        if !self.nodes[from].dependencies.contains(&to) {
            self.nodes[from].dependencies.push(to);
            self.nodes[to].imports.push(from);
        }
    }

    /// Index of `file_name`, if present.
    pub fn index_of(&self, file_name: &str) -> Option<usize> {
        self.index.get(file_name).copied()
    }

    /// Node at `idx`.
    pub fn node(&self, idx: usize) -> &DependencyNode {
        &self.nodes[idx]
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no files.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    /// Everything `idx` requires, directly or transitively.
    ///
    /// Contains `idx` itself only when it sits on a cycle.
    pub fn all_dependencies(&self, idx: usize) -> HashSet<usize> {
        self.closure(idx, |node| &node.dependencies)
    }

    /// Everything that requires `idx`, directly or transitively.
    ///
    /// Contains `idx` itself only when it sits on a cycle.
    pub fn all_imports(&self, idx: usize) -> HashSet<usize> {
        self.closure(idx, |node| &node.imports)
    }

    fn closure<F>(&self, start: usize, edges: F) -> HashSet<usize>
    where
        F: Fn(&DependencyNode) -> &Vec<usize>,
    {
        let mut visited = HashSet::new();
        let mut stack: Vec<usize> = edges(&self.nodes[start]).clone();
        while let Some(next) = stack.pop() {
            if visited.insert(next) {
                stack.extend(edges(&self.nodes[next]).iter().copied());
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::resolver::StaticDependencies;

    fn names(graph: &DependencyGraph, set: &HashSet<usize>) -> Vec<String> {
        let mut out: Vec<String> = set
            .iter()
            .map(|&i| graph.node(i).file_name.clone())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn discovers_transitive_files_in_depth_first_order() {
        let deps = StaticDependencies::new()
            .with_file("a.js", ["b.js", "c.js"])
            .with_file("b.js", ["d.js"])
            .with_file("c.js", Vec::<String>::new())
            .with_file("d.js", Vec::<String>::new());
        let Discovery { graph, unresolved } = DependencyGraph::discover(["a.js"], &deps);

        assert!(unresolved.is_empty());
        let order: Vec<&str> = graph.nodes().iter().map(|n| n.file_name.as_str()).collect();
        assert_eq!(order, vec!["a.js", "b.js", "c.js", "d.js"]);

        let a = graph.index_of("a.js").expect("a present");
        let d = graph.index_of("d.js").expect("d present");
        assert_eq!(names(&graph, &graph.all_dependencies(a)), vec!["b.js", "c.js", "d.js"]);
        assert!(graph.all_dependencies(d).is_empty());
        assert_eq!(names(&graph, &graph.all_imports(d)), vec!["a.js", "b.js"]);
    }

    #[test]
    fn cycles_terminate() {
        let deps = StaticDependencies::new()
            .with_file("a.js", ["b.js"])
            .with_file("b.js", ["c.js"])
            .with_file("c.js", ["a.js"]);
        let Discovery { graph, .. } = DependencyGraph::discover(["a.js", "c.js"], &deps);

        assert_eq!(graph.len(), 3);
        let a = graph.index_of("a.js").expect("a present");
        assert_eq!(
            names(&graph, &graph.all_dependencies(a)),
            vec!["a.js", "b.js", "c.js"]
        );
    }

    #[test]
    fn unresolved_files_become_leaves() {
        let deps = StaticDependencies::new().with_file("a.js", ["gone.js"]);
        let Discovery { graph, unresolved } = DependencyGraph::discover(["a.js", "x.js"], &deps);

        let gone = graph.index_of("gone.js").expect("gone present");
        assert!(graph.node(gone).dependencies.is_empty());
        let mut missing: Vec<_> = unresolved.into_iter().collect();
        missing.sort();
        assert_eq!(missing, vec!["gone.js".to_string(), "x.js".to_string()]);
    }

    #[test]
    fn duplicate_edges_are_recorded_once() {
        let mut graph = DependencyGraph::new();
        let a = graph.insert("a");
        let b = graph.insert("b");
        graph.add_edge(a, b);
        graph.add_edge(a, b);
        assert_eq!(graph.node(a).dependencies, vec![b]);
        assert_eq!(graph.node(b).imports, vec![a]);
        assert_eq!(graph.insert("a"), a);
    }
}
