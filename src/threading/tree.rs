//! Reply hierarchy of a single thread.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::mail::{cmp_oldest_first, IndexEntry};
use crate::threading::resolver::normalize_id;

/// A message with links to its parent and direct replies.
///
/// Links are positions in [`ThreadTree::nodes`]; the tree is flat, so deep
/// reply chains never recurse when walked, serialized or dropped.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub entry: IndexEntry,
    pub parent: Option<usize>,
    /// Replies, oldest first.
    pub children: Vec<usize>,
}

/// All members of one thread arranged as a forest.
///
/// `nodes` is ordered oldest first; `roots` holds the positions of the
/// messages without a parent in the thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadTree {
    pub thread_id: String,
    pub nodes: Vec<TreeNode>,
    pub roots: Vec<usize>,
}

impl ThreadTree {
    /// Total number of messages in the tree.
    pub fn message_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.roots.iter().map(|&i| &self.nodes[i].entry)
    }

    /// Pre-order `(entry, depth)` pairs, suitable for indented display.
    pub fn flatten(&self) -> Vec<(&IndexEntry, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&r| (r, 0)).collect();
        while let Some((idx, depth)) = stack.pop() {
            let node = &self.nodes[idx];
            out.push((&node.entry, depth));
            stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Unvisited,
    InProgress,
    Done,
}

/// Arrange the members of one thread into parent/child trees.
///
/// A message's parent is its `In-Reply-To` target when that is a member,
/// otherwise the last `References` id that is a member. Messages whose parent
/// is absent become roots. A reference cycle is broken at the message whose
/// parent is already on the current upward walk; it becomes an extra root.
pub fn build_tree(thread_id: String, members: Vec<IndexEntry>) -> ThreadTree {
    let mut members = members;
    members.sort_by(cmp_oldest_first);

    let mut position: HashMap<String, usize> = HashMap::with_capacity(members.len());
    for (i, entry) in members.iter().enumerate() {
        position.entry(normalize_id(&entry.message_id)).or_insert(i);
    }

    let mut parent: Vec<Option<usize>> = members
        .iter()
        .enumerate()
        .map(|(i, entry)| find_parent(entry, &position).filter(|&p| p != i))
        .collect();

    cut_cycles(&mut parent);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); members.len()];
    let mut roots = Vec::new();
    // Members are already sorted, so child lists come out oldest first
    for (i, p) in parent.iter().enumerate() {
        match p {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    let nodes = members
        .into_iter()
        .zip(parent)
        .zip(children)
        .map(|((entry, parent), children)| TreeNode {
            entry,
            parent,
            children,
        })
        .collect();

    ThreadTree {
        thread_id,
        nodes,
        roots,
    }
}

fn find_parent(entry: &IndexEntry, position: &HashMap<String, usize>) -> Option<usize> {
    let in_reply_to = entry
        .in_reply_to
        .as_deref()
        .and_then(|id| position.get(&normalize_id(id)).copied());
    if in_reply_to.is_some() {
        return in_reply_to;
    }
    entry
        .references
        .iter()
        .rev()
        .find_map(|id| position.get(&normalize_id(id)).copied())
}

fn cut_cycles(parent: &mut [Option<usize>]) {
    let mut state = vec![Walk::Unvisited; parent.len()];
    let mut path = Vec::new();

    for start in 0..parent.len() {
        if state[start] != Walk::Unvisited {
            continue;
        }
        let mut cur = start;
        loop {
            state[cur] = Walk::InProgress;
            path.push(cur);
            match parent[cur] {
                Some(p) if state[p] == Walk::Unvisited => cur = p,
                Some(p) if state[p] == Walk::InProgress => {
                    tracing::debug!(node = cur, parent = p, "Breaking reply cycle");
                    parent[cur] = None;
                    break;
                }
                _ => break,
            }
        }
        for node in path.drain(..) {
            state[node] = Walk::Done;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mail::ParsedHeaders;
    use chrono::{Duration, TimeZone, Utc};

    fn make_entry(
        id: u64,
        message_id: &str,
        in_reply_to: Option<&str>,
        references: Vec<&str>,
        hour: Option<u32>,
    ) -> IndexEntry {
        let headers = ParsedHeaders {
            message_id: message_id.to_string(),
            in_reply_to: in_reply_to.map(String::from),
            references: references.into_iter().map(String::from).collect(),
            date: hour.map(|h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()),
            ..Default::default()
        };
        IndexEntry::from_headers(id, id * 1000, 500, headers, "t".into())
    }

    fn tree(members: Vec<IndexEntry>) -> ThreadTree {
        build_tree("t".into(), members)
    }

    fn shape(tree: &ThreadTree) -> Vec<(u64, usize)> {
        tree.flatten().into_iter().map(|(e, d)| (e.id, d)).collect()
    }

    fn root_ids(tree: &ThreadTree) -> Vec<u64> {
        tree.root_entries().map(|e| e.id).collect()
    }

    #[test]
    fn test_reply_and_reference_chain() {
        let t = tree(vec![
            make_entry(3, "<m3@x>", None, vec!["<m1@x>", "<m2@x>"], Some(12)),
            make_entry(1, "<m1@x>", None, vec![], Some(10)),
            make_entry(2, "<m2@x>", Some("<m1@x>"), vec![], Some(11)),
        ]);
        assert_eq!(root_ids(&t), vec![1]);
        assert_eq!(shape(&t), vec![(1, 0), (2, 1), (3, 2)]);
        assert_eq!(t.nodes[2].parent, Some(1));
    }

    #[test]
    fn test_siblings_sorted_by_date() {
        let t = tree(vec![
            make_entry(1, "<a@x>", None, vec![], Some(8)),
            make_entry(2, "<late@x>", Some("<a@x>"), vec![], Some(15)),
            make_entry(3, "<early@x>", Some("<a@x>"), vec![], Some(9)),
        ]);
        assert_eq!(shape(&t), vec![(1, 0), (3, 1), (2, 1)]);
    }

    #[test]
    fn test_missing_parent_makes_a_root() {
        let t = tree(vec![
            make_entry(1, "<b@x>", Some("<gone@x>"), vec![], Some(10)),
            make_entry(2, "<c@x>", Some("<gone@x>"), vec![], Some(11)),
        ]);
        assert_eq!(root_ids(&t), vec![1, 2]);
        assert_eq!(shape(&t), vec![(1, 0), (2, 0)]);
    }

    #[test]
    fn test_cycle_is_broken() {
        let t = tree(vec![
            make_entry(1, "<p@x>", Some("<q@x>"), vec![], Some(10)),
            make_entry(2, "<q@x>", Some("<p@x>"), vec![], Some(11)),
        ]);
        assert_eq!(t.roots.len(), 1);
        // Walking up from the oldest message, q's link back to p closes the loop
        assert_eq!(shape(&t), vec![(2, 0), (1, 1)]);
    }

    #[test]
    fn test_unknown_dates_sort_last() {
        let t = tree(vec![
            make_entry(1, "<a@x>", None, vec![], None),
            make_entry(2, "<b@x>", None, vec![], Some(10)),
        ]);
        assert_eq!(shape(&t), vec![(2, 0), (1, 0)]);
    }

    #[test]
    fn test_thread_tree_counts() {
        let t = tree(vec![
            make_entry(1, "<a@x>", None, vec![], Some(1)),
            make_entry(2, "<b@x>", Some("<a@x>"), vec![], Some(2)),
        ]);
        assert_eq!(t.thread_id, "t");
        assert_eq!(t.message_count(), 2);
        assert_eq!(t.flatten().len(), 2);
    }

    #[test]
    fn test_long_reply_chain() {
        const LEN: u64 = 60_000;
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let members: Vec<IndexEntry> = (1..=LEN)
            .map(|id| {
                let headers = ParsedHeaders {
                    message_id: format!("<m{id}@x>"),
                    in_reply_to: (id > 1).then(|| format!("<m{}@x>", id - 1)),
                    date: Some(start + Duration::seconds(id as i64)),
                    ..Default::default()
                };
                IndexEntry::from_headers(id, id * 100, 100, headers, "m1@x".into())
            })
            .collect();

        let t = build_tree("m1@x".into(), members);
        assert_eq!(root_ids(&t), vec![1]);

        let flat = t.flatten();
        assert_eq!(flat.len(), LEN as usize);
        let (last, depth) = flat[flat.len() - 1];
        assert_eq!(last.id, LEN);
        assert_eq!(depth, LEN as usize - 1);

        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"thread_id\":\"m1@x\""));
        drop(t);
    }
}
