//! Action tree reconstruction and the step → snapshot map.

use std::collections::{HashMap, HashSet};

use crate::Action;

/// Parent/child structure over actions, rebuilt from `parentId`. The tree
/// root is synthetic; actions with a missing or unknown parent attach there,
/// and cyclic parent chains re-root at their earliest member.
#[derive(Debug)]
pub struct ActionTree {
    pub roots: Vec<ActionNode>,
}

#[derive(Debug)]
pub struct ActionNode {
    /// Index into the model's action list.
    pub index: usize,
    pub children: Vec<ActionNode>,
}

impl ActionTree {
    /// Build the tree over all actions, or only those of one class when
    /// `class` is given (the timeline renders `Test` actions only).
    pub fn build(actions: &[Action], class: Option<&str>) -> ActionTree {
        let selected: Vec<usize> = actions
            .iter()
            .enumerate()
            .filter(|(_, a)| class.is_none_or(|c| a.class == c))
            .map(|(i, _)| i)
            .collect();
        let known: HashMap<&str, usize> = selected
            .iter()
            .map(|&i| (actions[i].call_id.as_str(), i))
            .collect();

        let mut children_of: HashMap<Option<usize>, Vec<usize>> = HashMap::new();
        for &i in &selected {
            let parent = actions[i]
                .parent_id
                .as_deref()
                .and_then(|p| known.get(p).copied())
                // Self-parenting is malformed; re-root.
                .filter(|&p| p != i);
            children_of.entry(parent).or_default().push(i);
        }

        let mut placed = HashSet::new();
        let mut roots = assemble(actions, &children_of, None, &mut placed);

        // A cyclic parent chain never reaches the synthetic root; re-root its
        // earliest member so no action is lost from the tree.
        let mut leftover: Vec<usize> = selected
            .iter()
            .copied()
            .filter(|i| !placed.contains(i))
            .collect();
        leftover.sort_by(|&a, &b| actions[a].start_time.total_cmp(&actions[b].start_time));
        for i in leftover {
            if placed.insert(i) {
                roots.push(ActionNode {
                    index: i,
                    children: assemble(actions, &children_of, Some(i), &mut placed),
                });
            }
        }
        roots.sort_by(|a, b| {
            actions[a.index]
                .start_time
                .total_cmp(&actions[b.index].start_time)
        });

        ActionTree { roots }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn assemble(
    actions: &[Action],
    children_of: &HashMap<Option<usize>, Vec<usize>>,
    parent: Option<usize>,
    placed: &mut HashSet<usize>,
) -> Vec<ActionNode> {
    let Some(indices) = children_of.get(&parent) else {
        return Vec::new();
    };
    let mut indices: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|i| placed.insert(*i))
        .collect();
    indices.sort_by(|&a, &b| actions[a].start_time.total_cmp(&actions[b].start_time));
    indices
        .into_iter()
        .map(|i| ActionNode {
            index: i,
            children: assemble(actions, children_of, Some(i), placed),
        })
        .collect()
}

/// Snapshot names an API-level action recorded on behalf of a user-level
/// step. Lets a `Test` action without snapshots of its own link to the ones
/// its first API child captured.
#[derive(Debug, Default, Clone)]
pub struct StepSnapshots {
    pub before: Option<String>,
    pub after: Option<String>,
}

/// `stepId → {before?, after?}`, filled from non-`Test` actions in start-time
/// order; the first action carrying a snapshot wins each slot.
pub fn build_step_snapshot_map(actions: &[Action]) -> HashMap<String, StepSnapshots> {
    let mut map: HashMap<String, StepSnapshots> = HashMap::new();
    for action in actions {
        if action.class == "Test" {
            continue;
        }
        let Some(step_id) = &action.step_id else {
            continue;
        };
        if action.before_snapshot.is_none() && action.after_snapshot.is_none() {
            continue;
        }
        let entry = map.entry(step_id.clone()).or_default();
        if entry.before.is_none() {
            entry.before = action.before_snapshot.clone();
        }
        if entry.after.is_none() {
            entry.after = action.after_snapshot.clone();
        }
    }
    map
}
