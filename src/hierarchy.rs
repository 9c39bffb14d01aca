use crate::errors::{AppError, AppResult};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// In-memory view of the parent -> child relation table.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    parents_of: BTreeMap<i64, Vec<i64>>,
    children_of: BTreeMap<i64, Vec<i64>>,
}

impl RelationGraph {
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        let mut graph = Self::default();
        for (parent, child) in edges {
            graph.parents_of.entry(child).or_default().push(parent);
            graph.children_of.entry(parent).or_default().push(child);
        }
        graph
    }

    pub fn parents(&self, node: i64) -> &[i64] {
        self.parents_of.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children(&self, node: i64) -> &[i64] {
        self.children_of.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when adding `parent -> child` would close a loop.
    pub fn would_create_cycle(&self, parent: i64, child: i64) -> bool {
        if parent == child {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut stack = vec![child];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            for &next in self.children(node) {
                if next == parent {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }

    /// Every indicator reachable by walking up from `start`, excluding `start`.
    pub fn ancestors(&self, start: i64) -> BTreeSet<i64> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<i64> = self.parents(start).to_vec();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend_from_slice(self.parents(node));
            }
        }
        seen
    }

    /// Ancestors of `start` ordered so each one comes after all of its
    /// descendants inside the ancestor set. Each ancestor appears once.
    pub fn propagation_order(&self, start: i64) -> AppResult<Vec<i64>> {
        let order = self.refresh_order(self.parents(start))?;
        if order.contains(&start) {
            return Err(AppError::Internal(format!(
                "relation cycle detected through indicator {start}"
            )));
        }
        Ok(order)
    }

    /// `dirty` plus all of their ancestors, bottom-up.
    pub fn refresh_order(&self, dirty: &[i64]) -> AppResult<Vec<i64>> {
        let mut members: BTreeSet<i64> = dirty.iter().copied().collect();
        for &node in dirty {
            members.extend(self.ancestors(node));
        }

        let mut pending: BTreeMap<i64, usize> = members
            .iter()
            .map(|&node| {
                let waiting = self
                    .children(node)
                    .iter()
                    .filter(|child| members.contains(child))
                    .count();
                (node, waiting)
            })
            .collect();

        let mut ready: VecDeque<i64> = pending
            .iter()
            .filter(|(_, waiting)| **waiting == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(members.len());
        while let Some(done) = ready.pop_front() {
            order.push(done);
            for &parent in self.parents(done) {
                let Some(waiting) = pending.get_mut(&parent) else {
                    continue;
                };
                *waiting -= 1;
                if *waiting == 0 {
                    ready.push_back(parent);
                }
            }
        }

        if order.len() != members.len() {
            return Err(AppError::Internal(
                "relation cycle detected while ordering indicator refresh".to_string(),
            ));
        }
        Ok(order)
    }
}
