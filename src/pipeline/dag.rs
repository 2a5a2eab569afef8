//! Dependency graph of activities within one scope.
//!
//! Nodes are activities, edges run from an activity to each predecessor
//! named in its `dependsOn`. The graph is validated on construction:
//! dangling predecessors, empty condition sets and cycles are rejected.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};

use super::types::{Activity, Dependency, DependencyCondition};
use crate::error::{Error, Result};

/// A validated, acyclic dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// Per node: predecessors with merged condition sets, sorted by name
    predecessors: Vec<Vec<(usize, Vec<DependencyCondition>)>>,
    successors: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build and validate the graph of one activity list.
    pub fn build(activities: &[Activity]) -> Result<Self> {
        let mut index = HashMap::new();
        let mut names = Vec::with_capacity(activities.len());
        for (i, activity) in activities.iter().enumerate() {
            if index.insert(activity.name.clone(), i).is_some() {
                return Err(Error::DuplicateName {
                    namespace: "activity".into(),
                    name: activity.name.clone(),
                });
            }
            names.push(activity.name.clone());
        }

        let mut predecessors = vec![Vec::new(); activities.len()];
        let mut successors = vec![Vec::new(); activities.len()];

        for (i, activity) in activities.iter().enumerate() {
            let mut merged: HashMap<usize, BTreeSet<DependencyCondition>> = HashMap::new();
            for dep in &activity.depends_on {
                let target = *index.get(&dep.activity).ok_or_else(|| Error::DanglingDependency {
                    activity: activity.name.clone(),
                    missing: dep.activity.clone(),
                })?;
                if dep.dependency_conditions.is_empty() {
                    return Err(Error::InvalidDependency {
                        activity: activity.name.clone(),
                        reason: format!("dependency on '{}' has no conditions", dep.activity),
                    });
                }
                merged
                    .entry(target)
                    .or_default()
                    .extend(dep.dependency_conditions.iter().copied());
            }

            let mut preds: Vec<(usize, Vec<DependencyCondition>)> = merged
                .into_iter()
                .map(|(target, conditions)| (target, conditions.into_iter().collect()))
                .collect();
            preds.sort_by(|a, b| names[a.0].cmp(&names[b.0]));
            for (target, _) in &preds {
                successors[*target].push(i);
            }
            predecessors[i] = preds;
        }

        for succ in &mut successors {
            succ.sort_unstable();
        }

        let graph = Self {
            names,
            index,
            predecessors,
            successors,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::CyclicDependency { cycle });
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// `(dependent, predecessor)` pairs.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges = Vec::new();
        for (i, preds) in self.predecessors.iter().enumerate() {
            for (p, _) in preds {
                edges.push((self.names[i].as_str(), self.names[*p].as_str()));
            }
        }
        edges
    }

    /// Merged, canonically ordered `dependsOn` entries of an activity.
    pub fn dependencies_of(&self, name: &str) -> Vec<Dependency> {
        let Some(&i) = self.index.get(name) else {
            return Vec::new();
        };
        self.predecessors[i]
            .iter()
            .map(|(p, conditions)| Dependency {
                activity: self.names[*p].clone(),
                dependency_conditions: conditions.clone(),
            })
            .collect()
    }

    /// Activities that depend directly on `name`, in declaration order.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                self.successors[i]
                    .iter()
                    .map(|s| self.names[*s].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Transitive predecessors of `name`.
    pub fn ancestors(&self, name: &str) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index.get(name) else {
            return seen;
        };

        let mut queue: VecDeque<usize> = self.predecessors[start].iter().map(|(p, _)| *p).collect();
        while let Some(node) = queue.pop_front() {
            if seen.insert(self.names[node].as_str()) {
                queue.extend(self.predecessors[node].iter().map(|(p, _)| *p));
            }
        }
        seen
    }

    /// Whether `activity` runs strictly after `predecessor` on every path.
    pub fn is_ordered_after(&self, activity: &str, predecessor: &str) -> bool {
        self.ancestors(activity).contains(predecessor)
    }

    /// Topological order; ties break by declaration order.
    pub fn topological_order(&self) -> Vec<&str> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(|p| p.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.names[node].as_str());
            for &succ in &self.successors[node] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.push(Reverse(succ));
                }
            }
        }
        order
    }

    /// Activities nothing else depends on, in declaration order.
    pub fn terminals(&self) -> Vec<&str> {
        (0..self.names.len())
            .filter(|i| self.successors[*i].is_empty())
            .map(|i| self.names[i].as_str())
            .collect()
    }

    /// Render the graph as an indented dependency tree, one tree per
    /// terminal activity.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        let mut visited = HashSet::new();

        for terminal in self.terminals() {
            if let Some(&i) = self.index.get(terminal) {
                self.format_node(i, None, 0, &mut visited, &mut lines);
            }
        }

        lines.join("\n")
    }

    fn format_node(
        &self,
        node: usize,
        conditions: Option<&[DependencyCondition]>,
        depth: usize,
        visited: &mut HashSet<usize>,
        lines: &mut Vec<String>,
    ) {
        let indent = "  ".repeat(depth);
        let marker = if depth == 0 { "" } else { "└─ " };
        let label = match conditions {
            Some(c) if c != [DependencyCondition::Succeeded] => {
                let names: Vec<String> = c.iter().map(|c| format!("{:?}", c)).collect();
                format!("{} [{}]", self.names[node], names.join("|"))
            }
            _ => self.names[node].clone(),
        };

        if !visited.insert(node) {
            lines.push(format!("{}{}{}  (already shown)", indent, marker, label));
            return;
        }
        lines.push(format!("{}{}{}", indent, marker, label));

        for (pred, conds) in &self.predecessors[node] {
            self.format_node(*pred, Some(conds), depth + 1, visited, lines);
        }
    }

    /// Three-color DFS along predecessor edges, driven by an explicit
    /// stack so long chains cannot overflow. Returns the cycle path with
    /// the first member repeated at the end.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors = vec![Color::White; self.names.len()];
        // (node, index of the next predecessor to visit)
        let mut frames: Vec<(usize, usize)> = Vec::new();

        for root in 0..self.names.len() {
            if colors[root] != Color::White {
                continue;
            }
            colors[root] = Color::Gray;
            frames.push((root, 0));

            while let Some(frame) = frames.last_mut() {
                let (node, next) = *frame;
                let Some((pred, _)) = self.predecessors[node].get(next) else {
                    colors[node] = Color::Black;
                    frames.pop();
                    continue;
                };
                frame.1 += 1;
                let pred = *pred;

                match colors[pred] {
                    Color::Gray => {
                        let start = frames.iter().position(|(n, _)| *n == pred).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            frames[start..].iter().map(|(n, _)| self.names[*n].clone()).collect();
                        cycle.push(self.names[pred].clone());
                        return Some(cycle);
                    }
                    Color::White => {
                        colors[pred] = Color::Gray;
                        frames.push((pred, 0));
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }
}
