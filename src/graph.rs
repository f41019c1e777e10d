//! Static task graph
//!
//! Built from the configuration with petgraph to reject cycles before any
//! work starts and to render `list` and `graph` output. Only edges between
//! defined tasks are recorded; file dependencies are not part of the graph.

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

use crate::config::{Config, TaskKind, NAME_PLACEHOLDER};
use crate::error::{MkrunError, Result};

/// A node in the task graph
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub name: String,
    pub desc: Option<String>,
    pub kind: TaskKind,
}

/// The task dependency graph
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl TaskGraph {
    /// Build a task graph from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        let mut order = Vec::new();

        for task in &config.tasks {
            for name in task.names() {
                let idx = graph.add_node(TaskNode {
                    name: name.clone(),
                    desc: task.desc.clone(),
                    kind: task.kind,
                });
                name_to_index.insert(name, idx);
                order.push(idx);
            }
        }

        for task in &config.tasks {
            for name in task.names() {
                let task_idx = name_to_index[&name];

                // Edge goes from dependency TO dependent (dep must be built first)
                for dep in &task.depends {
                    let dep = dep.replace(NAME_PLACEHOLDER, &name);
                    if let Some(&dep_idx) = name_to_index.get(&dep) {
                        graph.update_edge(dep_idx, task_idx, ());
                    }
                }

                if let Some(target) = &task.target {
                    let target_idx =
                        name_to_index
                            .get(target)
                            .ok_or_else(|| MkrunError::TaskNotFound {
                                name: target.clone(),
                                available: config.task_names(),
                            })?;
                    graph.update_edge(*target_idx, task_idx, ());
                }
            }
        }

        let graph = Self {
            graph,
            name_to_index,
            order,
        };

        if is_cyclic_directed(&graph.graph) {
            return Err(MkrunError::CyclicDependency {
                cycle: graph.find_cycle_description(),
            });
        }

        Ok(graph)
    }

    fn not_found(&self, name: &str) -> MkrunError {
        MkrunError::TaskNotFound {
            name: name.to_string(),
            available: self.task_names().map(str::to_string).collect(),
        }
    }

    /// Get build order for a specific task (including dependencies)
    pub fn execution_order(&self, task_name: &str) -> Result<Vec<&TaskNode>> {
        let target_idx = *self
            .name_to_index
            .get(task_name)
            .ok_or_else(|| self.not_found(task_name))?;

        let required = self.ancestors(target_idx);

        Ok(self
            .sorted()?
            .into_iter()
            .filter(|idx| required.contains(idx))
            .map(|idx| &self.graph[idx])
            .collect())
    }

    /// Get all tasks in dependency order
    pub fn all_tasks_ordered(&self) -> Result<Vec<&TaskNode>> {
        Ok(self
            .sorted()?
            .into_iter()
            .map(|idx| &self.graph[idx])
            .collect())
    }

    fn sorted(&self) -> Result<Vec<NodeIndex>> {
        toposort(&self.graph, None).map_err(|cycle| MkrunError::CyclicDependency {
            cycle: self.graph[cycle.node_id()].name.clone(),
        })
    }

    /// The node and everything it transitively depends on
    fn ancestors(&self, target: NodeIndex) -> HashSet<NodeIndex> {
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, target);
        let mut ancestors = HashSet::new();

        while let Some(node) = bfs.next(reversed) {
            ancestors.insert(node);
        }

        ancestors
    }

    /// Find a human-readable description of a cycle
    fn find_cycle_description(&self) -> String {
        for &idx in &self.order {
            let mut visited = HashSet::new();
            let mut path = vec![self.graph[idx].name.clone()];

            if self.dfs_find_cycle(idx, idx, &mut visited, &mut path) {
                return path.join(" -> ");
            }
        }

        "Unknown cycle".to_string()
    }

    fn dfs_find_cycle(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<String>,
    ) -> bool {
        for neighbor in self.graph.neighbors(current) {
            if neighbor == target {
                path.push(self.graph[target].name.clone());
                return true;
            }

            if visited.insert(neighbor) {
                path.push(self.graph[neighbor].name.clone());
                if self.dfs_find_cycle(neighbor, target, visited, path) {
                    return true;
                }
                path.pop();
            }
        }

        false
    }

    /// Check if a task exists
    pub fn has_task(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get a task by name
    pub fn get_task(&self, name: &str) -> Option<&TaskNode> {
        self.name_to_index.get(name).map(|&idx| &self.graph[idx])
    }

    /// All task names in definition order
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|&idx| self.graph[idx].name.as_str())
    }

    /// Get direct task dependencies of a task
    pub fn dependencies(&self, name: &str) -> Option<Vec<&str>> {
        self.name_to_index.get(name).map(|&idx| {
            let mut deps: Vec<_> = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep_idx| self.graph[dep_idx].name.as_str())
                .collect();
            deps.sort_unstable();
            deps
        })
    }
}
