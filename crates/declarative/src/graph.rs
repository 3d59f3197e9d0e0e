//! Dependency graph over resource declarations

use crate::error::{Error, Result};
use crate::types::{Resource, ResourceId};
use std::collections::{BTreeSet, HashMap};

/// A validated, acyclic dependency graph.
///
/// Nodes are indexed in declaration order. An edge `consumer -> producer`
/// exists for every reference and every `depends_on` entry.
#[derive(Debug, Clone)]
pub struct Graph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    /// producers of each node
    producers: Vec<Vec<usize>>,
    /// consumers of each node
    consumers: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl Graph {
    /// Build the graph, rejecting duplicates, dangling references and cycles.
    pub fn build(resources: Vec<Resource>) -> Result<Self> {
        let mut index = HashMap::with_capacity(resources.len());
        for (i, resource) in resources.iter().enumerate() {
            if index.insert(resource.id.clone(), i).is_some() {
                return Err(Error::PlanConflict {
                    identity: resource.id.clone(),
                });
            }
        }

        let mut producers = vec![Vec::new(); resources.len()];
        let mut consumers = vec![Vec::new(); resources.len()];
        for (i, resource) in resources.iter().enumerate() {
            for dep in resource.dependencies() {
                let Some(&j) = index.get(&dep) else {
                    return Err(Error::UnresolvedReference {
                        consumer: resource.id.clone(),
                        producer: dep,
                    });
                };
                producers[i].push(j);
                consumers[j].push(i);
            }
        }

        let mut graph = Self {
            resources,
            index,
            producers,
            consumers,
            order: Vec::new(),
        };
        graph.check_acyclic()?;
        graph.order = graph.topological_sort();
        log::debug!(
            "Built dependency graph with {} nodes",
            graph.resources.len()
        );
        Ok(graph)
    }

    /// DFS with recursion-stack tracking; reports the first cycle found.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.resources.len()];
        let mut stack: Vec<usize> = Vec::new();

        for root in 0..self.resources.len() {
            if marks[root] != Mark::New {
                continue;
            }
            // (node, next producer to visit)
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::Active;
            stack.push(root);

            while let Some(frame) = frames.last_mut() {
                let (node, cursor) = *frame;
                if let Some(&next) = self.producers[node].get(cursor) {
                    frame.1 += 1;
                    match marks[next] {
                        Mark::New => {
                            marks[next] = Mark::Active;
                            stack.push(next);
                            frames.push((next, 0));
                        }
                        Mark::Active => {
                            let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                            let mut path: Vec<ResourceId> = stack[start..]
                                .iter()
                                .map(|&n| self.resources[n].id.clone())
                                .collect();
                            path.push(self.resources[next].id.clone());
                            return Err(Error::Cycle { path });
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    frames.pop();
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm, ties broken by declaration order.
    fn topological_sort(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.producers.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.resources.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &consumer in &self.consumers[node] {
                remaining[consumer] -= 1;
                if remaining[consumer] == 0 {
                    ready.insert(consumer);
                }
            }
        }
        order
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Check if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Get a declaration by identity
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    /// Check whether an identity is declared
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Declarations in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Declarations in dependency order (producers first)
    pub fn in_order(&self) -> impl Iterator<Item = &Resource> {
        self.order.iter().map(|&i| &self.resources[i])
    }

    /// Identities in dependency order (producers first)
    pub fn topological_order(&self) -> Vec<ResourceId> {
        self.in_order().map(|r| r.id.clone()).collect()
    }

    /// Direct producers of a node
    pub fn producers_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.index
            .get(id)
            .map(|&i| {
                self.producers[i]
                    .iter()
                    .map(|&p| &self.resources[p].id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All edges as `(consumer, producer)` pairs
    pub fn edges(&self) -> Vec<(&ResourceId, &ResourceId)> {
        self.producers
            .iter()
            .enumerate()
            .flat_map(|(c, ps)| {
                ps.iter()
                    .map(move |&p| (&self.resources[c].id, &self.resources[p].id))
            })
            .collect()
    }

    /// Render the graph in Graphviz DOT format
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph {\n  rankdir = \"RL\";\n");
        for resource in self.in_order() {
            out.push_str(&format!("  \"{}\";\n", resource.id));
        }
        for (consumer, producer) in self.edges() {
            out.push_str(&format!("  \"{consumer}\" -> \"{producer}\";\n"));
        }
        out.push_str("}\n");
        out
    }
}
