//! Thread grouping by connected components of the message-reference graph.
//!
//! Every message is a node keyed by its normalized `Message-ID`. Each
//! `In-Reply-To` and `References` id adds an undirected edge, even when the
//! referenced message is not in the archive. Two messages share a thread iff
//! they are connected, whatever order they were scanned in.

use std::collections::HashMap;

use crate::model::mail::ParsedHeaders;

/// Dense numbering of message ids, grown as new ids are seen.
#[derive(Debug, Default)]
pub struct IdSpace {
    index: HashMap<String, usize>,
    names: Vec<String>,
}

impl IdSpace {
    /// Return the index for `id`, allocating one on first sight.
    pub fn intern(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.names.len();
        self.names.push(id.to_string());
        self.index.insert(id.to_string(), idx);
        idx
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Disjoint-set forest with union by size and path compression.
#[derive(Debug, Default)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    /// Make sure elements `0..n` exist, each new one in its own set.
    pub fn grow_to(&mut self, n: usize) {
        while self.parent.len() < n {
            self.parent.push(self.parent.len());
            self.size.push(1);
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Point every node on the path straight at the root
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`. Returns `false` if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }
}

/// Normalize a Message-ID by stripping angle brackets and whitespace.
pub fn normalize_id(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

/// Compute the thread id of every message, in input order.
///
/// The thread id is the lexicographically smallest normalized id among all
/// nodes of the component, referenced-only ids included, so it depends on the
/// archive content and not on scan order.
pub fn resolve_threads(headers: &[ParsedHeaders]) -> Vec<String> {
    let mut ids = IdSpace::default();
    let mut sets = UnionFind::default();
    let mut nodes = Vec::with_capacity(headers.len());

    for h in headers {
        let node = ids.intern(&normalize_id(&h.message_id));
        sets.grow_to(ids.len());

        for related in h.in_reply_to.iter().chain(h.references.iter()) {
            let related = normalize_id(related);
            if related.is_empty() {
                continue;
            }
            let other = ids.intern(&related);
            sets.grow_to(ids.len());
            sets.union(node, other);
        }
        nodes.push(node);
    }

    // Smallest member per component, indexed by root
    let mut smallest: Vec<usize> = (0..ids.len()).collect();
    for idx in 0..ids.len() {
        let root = sets.find(idx);
        if ids.name(idx) < ids.name(smallest[root]) {
            smallest[root] = idx;
        }
    }

    tracing::debug!(
        messages = headers.len(),
        ids = ids.len(),
        "Resolved threads"
    );

    nodes
        .into_iter()
        .map(|node| {
            let root = sets.find(node);
            ids.name(smallest[root]).to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(id: &str, in_reply_to: Option<&str>, references: &[&str]) -> ParsedHeaders {
        ParsedHeaders {
            message_id: id.to_string(),
            in_reply_to: in_reply_to.map(String::from),
            references: references.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id("<msg001@example.com>"), "msg001@example.com");
        assert_eq!(normalize_id("msg001@example.com"), "msg001@example.com");
        assert_eq!(normalize_id("  <msg@ex.com>  "), "msg@ex.com");
    }

    #[test]
    fn test_union_find_merges_and_compresses() {
        let mut uf = UnionFind::default();
        uf.grow_to(5);
        assert!(uf.union(0, 1));
        assert!(uf.union(2, 3));
        assert!(uf.union(1, 3));
        assert!(!uf.union(0, 2));
        assert_eq!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(0), uf.find(4));
    }

    #[test]
    fn test_reply_chain_is_one_thread() {
        let input = vec![
            headers("<m1@x>", None, &[]),
            headers("<m2@x>", Some("<m1@x>"), &[]),
            headers("<m3@x>", None, &["<m1@x>", "<m2@x>"]),
        ];
        let threads = resolve_threads(&input);
        assert_eq!(threads, vec!["m1@x", "m1@x", "m1@x"]);
    }

    #[test]
    fn test_transitive_through_missing_message() {
        // b and c both reply to a, which is not in the archive
        let input = vec![
            headers("<c@x>", Some("<a@x>"), &[]),
            headers("<z@x>", None, &[]),
            headers("<b@x>", None, &["<a@x>"]),
        ];
        let threads = resolve_threads(&input);
        assert_eq!(threads[0], "a@x");
        assert_eq!(threads[2], "a@x");
        assert_eq!(threads[1], "z@x");
    }

    #[test]
    fn test_thread_ids_do_not_depend_on_scan_order() {
        let a = headers("<m2@x>", Some("<m1@x>"), &[]);
        let b = headers("<m3@x>", Some("<m2@x>"), &[]);
        let c = headers("<m1@x>", None, &[]);
        let forward = resolve_threads(&[a.clone(), b.clone(), c.clone()]);
        let backward = resolve_threads(&[c, b, a]);
        assert!(forward.iter().all(|t| t == "m1@x"));
        assert!(backward.iter().all(|t| t == "m1@x"));
    }

    #[test]
    fn test_smallest_id_includes_referenced_only_nodes() {
        let input = vec![headers("<zeta@x>", Some("<alpha@x>"), &[])];
        assert_eq!(resolve_threads(&input), vec!["alpha@x"]);
    }

    #[test]
    fn test_reference_cycle_is_harmless() {
        let input = vec![
            headers("<p@x>", Some("<q@x>"), &[]),
            headers("<q@x>", Some("<p@x>"), &[]),
        ];
        assert_eq!(resolve_threads(&input), vec!["p@x", "p@x"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(resolve_threads(&[]).is_empty());
    }
}
