//! Dependency graph - ordering of sections for commits
//!
//! Sections declare the keys they depend on (`depends_on` for adapter-backed
//! sections, `inputs` for derived ones). Commits walk the graph in
//! topological order so every section observes fully-updated inputs.

use std::collections::{HashMap, VecDeque};

use accord_core::{AccordError, AccordResult};

/// Section dependency graph
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Nodes in insertion order with their dependencies
    nodes: Vec<(String, Vec<String>)>,
    /// Node key -> position in `nodes`
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its dependency list
    pub fn add_node(&mut self, key: &str, depends_on: &[String]) -> AccordResult<()> {
        if self.index.contains_key(key) {
            return Err(AccordError::DuplicateSectionKey(key.to_string()));
        }
        self.index.insert(key.to_string(), self.nodes.len());
        self.nodes.push((key.to_string(), depends_on.to_vec()));
        Ok(())
    }

    /// Get node count
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dependencies of a node
    pub fn dependencies(&self, key: &str) -> &[String] {
        self.index
            .get(key)
            .map(|&i| self.nodes[i].1.as_slice())
            .unwrap_or(&[])
    }

    /// Kahn-style topological sort.
    ///
    /// Stable for identical input: roots are seeded in insertion order and
    /// dependents are released in the order their edges were added.
    pub fn topological_order(&self) -> AccordResult<Vec<String>> {
        let mut indegree: Vec<usize> = Vec::with_capacity(self.nodes.len());
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];

        for (pos, (_, deps)) in self.nodes.iter().enumerate() {
            indegree.push(deps.len());
            for dep in deps {
                let Some(&from) = self.index.get(dep) else {
                    return Err(AccordError::UnknownSection(dep.clone()));
                };
                outgoing[from].push(pos);
            }
        }

        let mut queue: VecDeque<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(pos, _)| pos)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            order.push(current);
            for &child in &outgoing[current] {
                indegree[child] -= 1;
                if indegree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let keys = indegree
                .iter()
                .enumerate()
                .filter(|(_, &count)| count > 0)
                .map(|(pos, _)| self.nodes[pos].0.clone())
                .collect();
            return Err(AccordError::DependencyCycle { keys });
        }

        Ok(order
            .into_iter()
            .map(|pos| self.nodes[pos].0.clone())
            .collect())
    }
}
