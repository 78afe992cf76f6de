//! Link dependency graph.
//!
//! Links live in an arena indexed by their position in the definition.
//! Edges are stored both ways: `dependencies[b]` lists the links `b` waits
//! on, `dependents[a]` lists the links waiting on `a`. An edge `a -> b`
//! means "b depends on a".

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use super::types::ChainDefinition;
use crate::error::{Error, Result};

/// Resolved dependency graph of one chain.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    layers: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl DependencyGraph {
    /// Build the graph for a chain.
    ///
    /// Fails with [`Error::UnknownDependency`] when a `dependsOn` entry names a
    /// link that is not in the chain, and with [`Error::CyclicDependency`]
    /// when the dependencies form a cycle.
    pub fn build(chain: &ChainDefinition) -> Result<Self> {
        let mut ids = Vec::with_capacity(chain.links.len());
        let mut index = HashMap::with_capacity(chain.links.len());

        for (i, link) in chain.links.iter().enumerate() {
            if index.insert(link.request.id.clone(), i).is_some() {
                return Err(Error::validation(format!(
                    "Duplicate request id: {}",
                    link.request.id
                )));
            }
            ids.push(link.request.id.clone());
        }

        let mut dependencies = vec![Vec::new(); ids.len()];
        let mut dependents = vec![Vec::new(); ids.len()];

        for (i, link) in chain.links.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &link.depends_on {
                let Some(&dep_idx) = index.get(dep) else {
                    return Err(Error::UnknownDependency {
                        link: link.request.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                if seen.insert(dep_idx) {
                    dependencies[i].push(dep_idx);
                    dependents[dep_idx].push(i);
                }
            }
        }

        let mut graph = Self {
            ids,
            dependencies,
            dependents,
            layers: Vec::new(),
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::CyclicDependency {
                links: cycle.into_iter().map(|i| graph.ids[i].clone()).collect(),
            });
        }

        graph.layers = graph.compute_layers();
        Ok(graph)
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the graph has no links.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Request id of the link at `idx`.
    pub fn id(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    /// Links that `idx` waits on.
    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    /// Links waiting on `idx`.
    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Execution layers. Layer 0 holds links without dependencies; layer k
    /// holds links whose dependencies all sit in layers below k. Each layer
    /// is sorted by definition order.
    pub fn layers(&self) -> &[Vec<usize>] {
        &self.layers
    }

    /// Layers as request ids.
    pub fn layer_ids(&self) -> Vec<Vec<String>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&i| self.ids[i].clone()).collect())
            .collect()
    }

    /// Sequential execution order.
    ///
    /// Definition order whenever it already satisfies the dependencies;
    /// otherwise the topological order that picks the earliest-defined ready
    /// link at every step.
    pub fn execution_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &dependent in &self.dependents[idx] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
        order
    }

    /// All links that transitively depend on `idx`, in ascending index order.
    pub fn descendants(&self, idx: usize) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut queue: VecDeque<usize> = self.dependents[idx].iter().copied().collect();
        let mut result = Vec::new();

        while let Some(next) = queue.pop_front() {
            if seen[next] {
                continue;
            }
            seen[next] = true;
            result.push(next);
            queue.extend(self.dependents[next].iter().copied());
        }

        result.sort_unstable();
        result
    }

    /// Simple text rendering of the layers, one line per layer.
    pub fn to_text(&self) -> String {
        self.layers
            .iter()
            .enumerate()
            .map(|(depth, layer)| {
                let entries: Vec<String> = layer
                    .iter()
                    .map(|&i| {
                        if self.dependencies[i].is_empty() {
                            self.ids[i].clone()
                        } else {
                            let deps: Vec<&str> = self.dependencies[i]
                                .iter()
                                .map(|&d| self.ids[d].as_str())
                                .collect();
                            format!("{} <- [{}]", self.ids[i], deps.join(", "))
                        }
                    })
                    .collect();
                format!("layer {}: {}", depth, entries.join("  "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Depth-first search with a white/gray/black colour map. Returns the
    /// cycle as a closed path (first id repeated at the end).
    fn find_cycle(&self) -> Option<Vec<usize>> {
        let mut colors = vec![Color::White; self.len()];
        let mut stack = Vec::new();

        for start in 0..self.len() {
            if colors[start] == Color::White {
                if let Some(cycle) = self.visit(start, &mut colors, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        node: usize,
        colors: &mut [Color],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        colors[node] = Color::Gray;
        stack.push(node);

        for &dep in &self.dependencies[node] {
            match colors[dep] {
                Color::White => {
                    if let Some(cycle) = self.visit(dep, colors, stack) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }

        stack.pop();
        colors[node] = Color::Black;
        None
    }

    fn compute_layers(&self) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; self.len()];
        for idx in self.execution_order() {
            depth[idx] = self.dependencies[idx]
                .iter()
                .map(|&d| depth[d] + 1)
                .max()
                .unwrap_or(0);
        }

        let layer_count = depth.iter().copied().max().map(|d| d + 1).unwrap_or(0);
        let mut layers = vec![Vec::new(); layer_count];
        for (idx, &d) in depth.iter().enumerate() {
            layers[d].push(idx);
        }
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::parse_chain;

    fn chain_with(links: &[(&str, &[&str])]) -> ChainDefinition {
        let mut yaml = String::from("id: test\nname: Test\nconfig:\n  maxChainLength: 50\nlinks:\n");
        for (id, deps) in links {
            yaml.push_str(&format!(
                "  - request: {{id: {id}, method: GET, url: \"https://example.com/{id}\"}}\n"
            ));
            if !deps.is_empty() {
                yaml.push_str(&format!("    dependsOn: [{}]\n", deps.join(", ")));
            }
        }
        parse_chain(&yaml).unwrap()
    }

    fn assert_respects_dependencies(chain: &ChainDefinition, order: &[String]) {
        for link in &chain.links {
            let pos = order.iter().position(|id| id == link.id()).unwrap();
            for dep in &link.depends_on {
                let dep_pos = order.iter().position(|id| id == dep).unwrap();
                assert!(dep_pos < pos, "{} must run before {}", dep, link.id());
            }
        }
    }

    #[test]
    fn test_diamond_layers() {
        let chain = chain_with(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let graph = DependencyGraph::build(&chain).unwrap();

        assert_eq!(
            graph.layer_ids(),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn test_layer_depth_uses_longest_path() {
        let chain = chain_with(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"]), ("x", &[])]);
        let graph = DependencyGraph::build(&chain).unwrap();

        assert_eq!(
            graph.layer_ids(),
            vec![vec!["a", "x"], vec!["b"], vec!["c"]]
        );
    }

    #[test]
    fn test_execution_order_keeps_definition_order_when_valid() {
        let chain = chain_with(&[("a", &[]), ("b", &["a"]), ("x", &[]), ("c", &["b"])]);
        let graph = DependencyGraph::build(&chain).unwrap();
        let order: Vec<&str> = graph.execution_order().iter().map(|&i| graph.id(i)).collect();
        assert_eq!(order, vec!["a", "b", "x", "c"]);
    }

    #[test]
    fn test_execution_order_fixes_forward_references() {
        let chain = chain_with(&[("c", &["a", "b"]), ("a", &[]), ("b", &["a"])]);
        let graph = DependencyGraph::build(&chain).unwrap();
        let order: Vec<String> = graph
            .execution_order()
            .iter()
            .map(|&i| graph.id(i).to_string())
            .collect();

        assert_eq!(order, vec!["a", "b", "c"]);
        assert_respects_dependencies(&chain, &order);
    }

    #[test]
    fn test_order_respects_dependencies_for_wide_graph() {
        let chain = chain_with(&[
            ("e", &["d", "a"]),
            ("d", &["b", "c"]),
            ("c", &["a"]),
            ("b", &["a"]),
            ("a", &[]),
            ("f", &[]),
            ("g", &["f", "e"]),
        ]);
        let graph = DependencyGraph::build(&chain).unwrap();
        let order: Vec<String> = graph
            .execution_order()
            .iter()
            .map(|&i| graph.id(i).to_string())
            .collect();

        assert_eq!(order.len(), 7);
        assert_respects_dependencies(&chain, &order);

        let flattened: Vec<String> = graph.layer_ids().into_iter().flatten().collect();
        assert_respects_dependencies(&chain, &flattened);
    }

    #[test]
    fn test_two_node_cycle() {
        let chain = chain_with(&[("a", &["b"]), ("b", &["a"])]);
        let err = DependencyGraph::build(&chain).unwrap_err();

        match err {
            Error::CyclicDependency { links } => {
                assert_eq!(links, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let chain = chain_with(&[("a", &["a"])]);
        let err = DependencyGraph::build(&chain).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { ref links } if links == &["a", "a"]));
    }

    #[test]
    fn test_cycle_names_only_involved_links() {
        let chain = chain_with(&[("root", &[]), ("x", &["root", "z"]), ("y", &["x"]), ("z", &["y"])]);
        let err = DependencyGraph::build(&chain).unwrap_err();

        let Error::CyclicDependency { links } = err else {
            panic!("expected cycle error");
        };
        assert!(!links.contains(&"root".to_string()));
        assert_eq!(links.first(), links.last());
        for id in ["x", "y", "z"] {
            assert!(links.contains(&id.to_string()));
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let chain = chain_with(&[("a", &[]), ("b", &["ghost"])]);
        let err = DependencyGraph::build(&chain).unwrap_err();

        match err {
            Error::UnknownDependency { link, dependency } => {
                assert_eq!(link, "b");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected unknown dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_descendants_are_transitive() {
        let chain = chain_with(&[
            ("login", &[]),
            ("profile", &["login"]),
            ("orders", &["profile"]),
            ("health", &[]),
            ("report", &["orders", "health"]),
        ]);
        let graph = DependencyGraph::build(&chain).unwrap();
        let names: Vec<&str> = graph
            .descendants(0)
            .iter()
            .map(|&i| graph.id(i))
            .collect();
        assert_eq!(names, vec!["profile", "orders", "report"]);
    }

    #[test]
    fn test_duplicate_dependency_entries_are_collapsed() {
        let chain = chain_with(&[("a", &[]), ("b", &["a", "a"])]);
        let graph = DependencyGraph::build(&chain).unwrap();
        assert_eq!(graph.dependencies(1), &[0]);
        assert_eq!(graph.dependents(0), &[1]);
    }

    #[test]
    fn test_to_text() {
        let chain = chain_with(&[("a", &[]), ("b", &["a"])]);
        let graph = DependencyGraph::build(&chain).unwrap();
        let text = graph.to_text();
        assert!(text.contains("layer 0: a"));
        assert!(text.contains("layer 1: b <- [a]"));
    }
}
