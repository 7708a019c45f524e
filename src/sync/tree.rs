#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityWarning {
    Cycle { task_id: String },
    DepthCapExceeded { task_id: String, cap: usize },
    DanglingParent { task_id: String, parent_id: String },
    DuplicateId { task_id: String },
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub task: Task,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Forest {
    nodes: Vec<TreeNode>,
    roots: Vec<usize>,
    index: HashMap<String, usize>,
    warnings: Vec<IntegrityWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row<'a> {
    pub task: &'a Task,
    pub depth: usize,
    pub has_children: bool,
    pub expanded: bool,
}

impl Forest {
    /// Build a forest from `tasks`. Sibling order follows input order.
    #[must_use]
    pub fn build(tasks: &[Task], max_depth: usize) -> Self {
        let max_depth = max_depth.max(1);
        let mut warnings = Vec::new();

        let mut index: HashMap<String, usize> = HashMap::with_capacity(tasks.len());
        let mut kept: Vec<&Task> = Vec::with_capacity(tasks.len());
        for t in tasks {
            if index.contains_key(&t.id) {
                warnings.push(IntegrityWarning::DuplicateId {
                    task_id: t.id.clone(),
                });
                continue;
            }
            index.insert(t.id.clone(), kept.len());
            kept.push(t);
        }

        let n = kept.len();
        let mut parent: Vec<Option<usize>> = Vec::with_capacity(n);
        for t in &kept {
            let p = match t.parent_task_id.as_deref() {
                None => None,
                Some(pid) => match index.get(pid) {
                    Some(&p) => Some(p),
                    None => {
                        warnings.push(IntegrityWarning::DanglingParent {
                            task_id: t.id.clone(),
                            parent_id: pid.to_owned(),
                        });
                        None
                    }
                },
            };
            parent.push(p);
        }

        let depth = resolve_depths(&kept, &mut parent, max_depth, &mut warnings);

        let mut nodes: Vec<TreeNode> = kept
            .iter()
            .enumerate()
            .map(|(i, t)| TreeNode {
                task: (*t).clone(),
                parent: parent[i],
                children: Vec::new(),
                depth: depth[i],
            })
            .collect();
        let mut roots = Vec::new();
        for i in 0..n {
            match parent[i] {
                Some(p) => nodes[p].children.push(i),
                None => roots.push(i),
            }
        }

        for w in &warnings {
            warn!(?w, "task hierarchy integrity problem");
        }

        Self {
            nodes,
            roots,
            index,
            warnings,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    #[must_use]
    pub fn node(&self, idx: usize) -> Option<&TreeNode> {
        self.nodes.get(idx)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TreeNode> {
        self.index.get(id).and_then(|&i| self.nodes.get(i))
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn warnings(&self) -> &[IntegrityWarning] {
        &self.warnings
    }

    #[must_use]
    pub fn root_ids(&self) -> Vec<&str> {
        self.roots
            .iter()
            .map(|&i| self.nodes[i].task.id.as_str())
            .collect()
    }

    #[must_use]
    pub fn child_ids(&self, id: &str) -> Vec<&str> {
        self.get(id)
            .map(|n| {
                n.children
                    .iter()
                    .map(|&c| self.nodes[c].task.id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn preorder(&self) -> Vec<&TreeNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            out.push(node);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    #[must_use]
    pub fn descendant_ids(&self, id: &str) -> Vec<String> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[start].children.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            out.push(self.nodes[i].task.id.clone());
            stack.extend(self.nodes[i].children.iter().rev().copied());
        }
        out
    }

    #[must_use]
    pub fn visible_rows(&self, expansion: &ExpansionState) -> Vec<Row<'_>> {
        let mut rows = Vec::new();
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            let expanded = expansion.is_expanded(&node.task.id);
            rows.push(Row {
                task: &node.task,
                depth: node.depth,
                has_children: !node.children.is_empty(),
                expanded,
            });
            if expanded {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        rows
    }
}

fn resolve_depths(
    tasks: &[&Task],
    parent: &mut [Option<usize>],
    max_depth: usize,
    warnings: &mut Vec<IntegrityWarning>,
) -> Vec<usize> {
    let n = tasks.len();
    let mut depth: Vec<Option<usize>> = vec![None; n];
    // Generation stamp per walk, so membership in the current chain is O(1).
    let mut on_chain: Vec<usize> = vec![0; n];
    let mut chain: Vec<usize> = Vec::new();

    for start in 0..n {
        if depth[start].is_some() {
            continue;
        }
        let generation = start + 1;
        chain.clear();
        let mut cur = start;
        loop {
            if depth[cur].is_some() {
                break;
            }
            if on_chain[cur] == generation {
                if let Some(&last) = chain.last() {
                    parent[last] = None;
                    warnings.push(IntegrityWarning::Cycle {
                        task_id: tasks[last].id.clone(),
                    });
                }
                break;
            }
            on_chain[cur] = generation;
            chain.push(cur);
            match parent[cur] {
                Some(p) => cur = p,
                None => break,
            }
        }

        for &i in chain.iter().rev() {
            let mut d = match parent[i] {
                Some(p) => depth[p].map_or(0, |pd| pd + 1),
                None => 0,
            };
            if d >= max_depth {
                parent[i] = None;
                d = 0;
                warnings.push(IntegrityWarning::DepthCapExceeded {
                    task_id: tasks[i].id.clone(),
                    cap: max_depth,
                });
            }
            depth[i] = Some(d);
        }
    }

    depth.into_iter().map(|d| d.unwrap_or(0)).collect()
}

#[derive(Debug, Clone, Default)]
pub struct ExpansionState {
    expanded: HashSet<String>,
}

impl ExpansionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    pub fn expand(&mut self, id: &str) {
        self.expanded.insert(id.to_owned());
    }

    pub fn collapse(&mut self, id: &str) {
        self.expanded.remove(id);
    }

    pub fn toggle(&mut self, id: &str) -> bool {
        if self.expanded.remove(id) {
            false
        } else {
            self.expanded.insert(id.to_owned());
            true
        }
    }

    pub fn retain_known(&mut self, forest: &Forest) {
        self.expanded.retain(|id| forest.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str, parent: Option<&str>) -> Task {
        serde_json::from_value(json!({ "id": id, "name": id, "parentTaskId": parent })).unwrap()
    }

    #[test]
    fn links_children_in_input_order() {
        let tasks = vec![
            task("c", Some("a")),
            task("a", None),
            task("b", Some("a")),
            task("d", Some("b")),
            task("e", None),
        ];
        let f = Forest::build(&tasks, 64);
        assert_eq!(f.root_ids(), vec!["a", "e"]);
        assert_eq!(f.child_ids("a"), vec!["c", "b"]);
        assert_eq!(f.get("d").unwrap().depth, 2);
        assert!(f.warnings().is_empty());

        let order: Vec<&str> = f.preorder().iter().map(|n| n.task.id.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b", "d", "e"]);
        assert_eq!(f.descendant_ids("a"), vec!["c", "b", "d"]);
    }

    #[test]
    fn every_node_appears_exactly_once() {
        let mut tasks = Vec::new();
        for i in 0..200 {
            let parent = if i == 0 { None } else { Some(format!("t{}", i / 3)) };
            tasks.push(task(&format!("t{i}"), parent.as_deref()));
        }
        let f = Forest::build(&tasks, 64);
        let mut seen: Vec<&str> = f.preorder().iter().map(|n| n.task.id.as_str()).collect();
        assert_eq!(seen.len(), 200);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn cycle_is_cut_and_reported() {
        let tasks = vec![task("a", Some("c")), task("b", Some("a")), task("c", Some("b"))];
        let f = Forest::build(&tasks, 64);
        assert_eq!(f.len(), 3);
        assert_eq!(f.roots().len(), 1);
        assert_eq!(f.preorder().len(), 3);
        assert!(matches!(f.warnings(), [IntegrityWarning::Cycle { .. }]));
    }

    #[test]
    fn self_parent_becomes_root() {
        let f = Forest::build(&[task("a", Some("a"))], 64);
        assert_eq!(f.root_ids(), vec!["a"]);
        assert_eq!(f.warnings().len(), 1);
    }

    #[test]
    fn deep_chain_is_capped() {
        let mut tasks = vec![task("t0", None)];
        for i in 1..10 {
            tasks.push(task(&format!("t{i}"), Some(&format!("t{}", i - 1))));
        }
        let f = Forest::build(&tasks, 4);
        assert!(f.preorder().iter().all(|n| n.depth < 4));
        assert_eq!(f.preorder().len(), 10);
        assert!(
            f.warnings()
                .iter()
                .any(|w| matches!(w, IntegrityWarning::DepthCapExceeded { .. }))
        );
    }

    #[test]
    fn dangling_parent_is_a_root() {
        let f = Forest::build(&[task("a", Some("gone"))], 64);
        assert_eq!(f.root_ids(), vec!["a"]);
        assert_eq!(
            f.warnings(),
            [IntegrityWarning::DanglingParent {
                task_id: "a".to_owned(),
                parent_id: "gone".to_owned()
            }]
        );
    }

    #[test]
    fn visible_rows_follow_expansion() {
        let tasks = vec![task("a", None), task("b", Some("a")), task("c", Some("b"))];
        let f = Forest::build(&tasks, 64);
        let mut exp = ExpansionState::new();
        assert_eq!(f.visible_rows(&exp).len(), 1);
        assert!(exp.toggle("a"));
        let rows = f.visible_rows(&exp);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].has_children);
        assert!(!rows[1].expanded);
        exp.expand("b");
        assert_eq!(f.visible_rows(&exp).len(), 3);
        exp.collapse("a");
        assert_eq!(f.visible_rows(&exp).len(), 1);
    }
}
