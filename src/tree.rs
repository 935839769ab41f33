//! Arena tree plus a precomputed parent index.
//!
//! Nodes live in a flat arena addressed by `NodeIdx`; the parent of every
//! node is stored in a parallel array built by one level-order pass, so an
//! ancestor walk costs O(depth) instead of a scan over the whole tree.
use std::collections::{HashMap, VecDeque, hash_map::Entry};
use std::iter::FusedIterator;
use std::time::Instant;

use bitvec::{order::Lsb0, vec::BitVec};
use log::{debug, warn};
use newick::{Newick, NodeID, one_from_string};

use crate::error::{Error, Result};

type NwkTree = newick::NewickTree;

pub type NodeIdx = usize;

/// Rooted tree; the root is always node 0.
#[derive(Debug, Clone)]
pub struct Tree {
    names: Vec<Option<String>>,
    children: Vec<Vec<NodeIdx>>,
}

impl Tree {
    pub fn new(root_name: Option<&str>) -> Self {
        Self {
            names: vec![root_name.map(ToOwned::to_owned)],
            children: vec![Vec::new()],
        }
    }

    pub fn add_child(&mut self, parent: NodeIdx, name: Option<&str>) -> NodeIdx {
        let idx = self.names.len();
        self.names.push(name.map(ToOwned::to_owned));
        self.children.push(Vec::new());
        self.children[parent].push(idx);
        idx
    }

    /// Raw arena, node 0 being the root. Only bounds are checked here;
    /// shape violations surface in [`ParentIndex::build`].
    pub fn from_parts(names: Vec<Option<String>>, children: Vec<Vec<NodeIdx>>) -> Result<Self> {
        if names.is_empty() || names.len() != children.len() {
            return Err(Error::MalformedTree {
                node: "#0".into(),
                reason: format!(
                    "arena has {} names for {} child lists",
                    names.len(),
                    children.len()
                ),
            });
        }
        let n = names.len();
        for (v, kids) in children.iter().enumerate() {
            if let Some(&c) = kids.iter().find(|&&c| c >= n) {
                return Err(Error::MalformedTree {
                    node: format!("#{v}"),
                    reason: format!("points at child #{c} outside an arena of {n} nodes"),
                });
            }
        }
        Ok(Self { names, children })
    }

    pub fn from_newick(t: &NwkTree) -> Self {
        Self::from_masked_newick(t, &QuotedLabels::default())
    }

    fn from_masked_newick(t: &NwkTree, quoted: &QuotedLabels) -> Self {
        let mut tree = Tree { names: Vec::new(), children: Vec::new() };
        let mut stack: Vec<(NodeID, Option<NodeIdx>)> = vec![(t.root(), None)];
        while let Some((id, parent)) = stack.pop() {
            let name = t
                .name(id)
                .map(|s| quoted.restore(s).to_string())
                .filter(|s| !s.is_empty());
            let idx = match parent {
                Some(p) => tree.add_child(p, name.as_deref()),
                None => {
                    tree.names.push(name);
                    tree.children.push(Vec::new());
                    0
                }
            };
            // reversed so children keep their file order when popped
            for &c in t[id].children().iter().rev() {
                stack.push((c, Some(idx)));
            }
        }
        tree
    }

    /// Parses Newick text. Quoted labels may hold any text, including the
    /// `'0.998:k__Bacteria; p__Firmicutes'` names of Greengenes-style trees.
    pub fn parse_newick(text: &str) -> Result<Self> {
        let (masked, quoted) = QuotedLabels::mask(text)?;
        let t: NwkTree = one_from_string(&masked).map_err(|e| Error::Newick(e.to_string()))?;
        debug!("newick: {} quoted labels", quoted.labels.len());
        Ok(Self::from_masked_newick(&t, &quoted))
    }

    pub fn read_newick(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_newick(&text).map_err(|e| match e {
            Error::Newick(msg) => Error::Newick(format!("{path}: {msg}")),
            other => other,
        })
    }

    #[inline]
    pub fn root(&self) -> NodeIdx {
        0
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, node: NodeIdx) -> Option<&str> {
        self.names.get(node)?.as_deref()
    }

    pub fn children(&self, node: NodeIdx) -> &[NodeIdx] {
        &self.children[node]
    }

    pub fn is_leaf(&self, node: NodeIdx) -> bool {
        self.children[node].is_empty()
    }

    pub fn leaves(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        (0..self.len()).filter(|&n| self.is_leaf(n))
    }

    fn describe(&self, node: NodeIdx) -> String {
        match self.name(node) {
            Some(name) => format!("{name:?} (#{node})"),
            None => format!("#{node}"),
        }
    }
}

/// Quoted Newick labels swapped for plain tokens the parser accepts, so
/// spaces, `:` and `;` inside quotes survive parsing.
#[derive(Debug, Default)]
struct QuotedLabels {
    token: String,
    labels: Vec<String>,
}

impl QuotedLabels {
    fn mask(text: &str) -> Result<(String, Self)> {
        let mut token = String::from("TAXROLLUPQUOTED");
        while text.contains(&token) {
            token.push('X');
        }

        let mut masked = String::with_capacity(text.len());
        let mut labels = Vec::new();
        let mut chars = text.char_indices().peekable();
        while let Some((pos, c)) = chars.next() {
            if c != '\'' {
                masked.push(c);
                continue;
            }
            let mut label = String::new();
            loop {
                match chars.next() {
                    // '' is an escaped quote
                    Some((_, '\'')) if matches!(chars.peek(), Some((_, '\''))) => {
                        chars.next();
                        label.push('\'');
                    }
                    Some((_, '\'')) => break,
                    Some((_, ch)) => label.push(ch),
                    None => {
                        return Err(Error::Newick(format!(
                            "unterminated quoted label starting at byte {pos}"
                        )));
                    }
                }
            }
            masked.push_str(&token);
            masked.push_str(&labels.len().to_string());
            labels.push(label);
        }
        Ok((masked, Self { token, labels }))
    }

    fn restore<'a>(&'a self, name: &'a str) -> &'a str {
        if self.labels.is_empty() {
            return name;
        }
        name.strip_prefix(self.token.as_str())
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(|i| self.labels.get(i))
            .map_or(name, String::as_str)
    }
}

/// Total child → parent map. The root has no entry.
#[derive(Debug, Clone)]
pub struct ParentIndex {
    parents: Vec<Option<NodeIdx>>,
    root: NodeIdx,
}

impl ParentIndex {
    /// One breadth-first pass over `tree`. Each node must be reached exactly
    /// once, from a single parent.
    pub fn build(tree: &Tree) -> Result<Self> {
        let n = tree.len();
        let root = tree.root();
        let mut parents: Vec<Option<NodeIdx>> = vec![None; n];
        let mut visited: BitVec<u64, Lsb0> = BitVec::repeat(false, n);
        let mut queue = VecDeque::with_capacity(n);

        visited.set(root, true);
        queue.push_back(root);
        let mut reached = 1usize;

        while let Some(v) = queue.pop_front() {
            for &c in tree.children(v) {
                if visited[c] {
                    let reason = match parents[c] {
                        Some(p) if p == v => format!("is listed twice under {}", tree.describe(v)),
                        Some(p) => format!(
                            "has two parents: {} and {}",
                            tree.describe(p),
                            tree.describe(v)
                        ),
                        None => format!("is the root but appears as a child of {}", tree.describe(v)),
                    };
                    return Err(Error::MalformedTree { node: tree.describe(c), reason });
                }
                visited.set(c, true);
                parents[c] = Some(v);
                reached += 1;
                queue.push_back(c);
            }
        }

        if reached < n {
            let orphan = visited.first_zero().unwrap_or(root);
            return Err(Error::MalformedTree {
                node: tree.describe(orphan),
                reason: "is not reachable from the root".into(),
            });
        }
        Ok(Self { parents, root })
    }

    pub fn root(&self) -> NodeIdx {
        self.root
    }

    pub fn parent(&self, node: NodeIdx) -> Option<NodeIdx> {
        self.parents.get(node).copied().flatten()
    }

    /// `node`, its parent, ... up to and including the root.
    pub fn ancestors(&self, node: NodeIdx) -> Ancestors<'_> {
        Ancestors {
            parents: &self.parents,
            next: (node < self.parents.len()).then_some(node),
        }
    }

    pub fn depth(&self, node: NodeIdx) -> usize {
        self.ancestors(node).count().saturating_sub(1)
    }
}

/// Upward walk produced by [`ParentIndex::ancestors`].
pub struct Ancestors<'a> {
    parents: &'a [Option<NodeIdx>],
    next: Option<NodeIdx>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        let current = self.next?;
        self.next = self.parents[current];
        Some(current)
    }
}

impl FusedIterator for Ancestors<'_> {}

/// A tree, its parent index and an exact-name lookup of its leaves.
#[derive(Debug, Clone)]
pub struct TreeIndex {
    tree: Tree,
    parents: ParentIndex,
    leaves: HashMap<String, NodeIdx>,
}

impl TreeIndex {
    pub fn build(tree: Tree) -> Result<Self> {
        let t0 = Instant::now();
        let parents = ParentIndex::build(&tree)?;

        let mut leaves = HashMap::new();
        for leaf in tree.leaves() {
            let Some(name) = tree.name(leaf) else { continue };
            match leaves.entry(name.to_owned()) {
                Entry::Vacant(e) => {
                    e.insert(leaf);
                }
                Entry::Occupied(e) => {
                    warn!("duplicate leaf name {name:?}: keeping #{}, ignoring #{leaf}", e.get());
                }
            }
        }
        debug!(
            "tree index: {} nodes, {} named leaves, {} µs",
            tree.len(),
            leaves.len(),
            t0.elapsed().as_micros()
        );
        Ok(Self { tree, parents, leaves })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn parents(&self) -> &ParentIndex {
        &self.parents
    }

    pub fn find_leaf(&self, name: &str) -> Option<NodeIdx> {
        self.leaves.get(name).copied()
    }

    pub fn ancestors(&self, node: NodeIdx) -> Ancestors<'_> {
        self.parents.ancestors(node)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tree: &Tree, path: impl Iterator<Item = NodeIdx>) -> Vec<String> {
        path.map(|n| tree.name(n).unwrap_or("-").to_owned()).collect()
    }

    #[test]
    fn newick_tree_ancestors_reach_the_root() {
        let tree = Tree::parse_newick("((AAAT,BBB)g__Foo,(CCC)f__Bar)k__Root;").unwrap();
        let index = TreeIndex::build(tree).unwrap();
        let leaf = index.find_leaf("AAAT").unwrap();
        let path = names(index.tree(), index.ancestors(leaf));
        assert_eq!(path, ["AAAT", "g__Foo", "k__Root"]);
        assert_eq!(index.parents().depth(leaf), 2);
        assert_eq!(index.parents().parent(index.tree().root()), None);
        assert_eq!(index.leaf_count(), 3);
    }

    #[test]
    fn children_keep_file_order() {
        let tree = Tree::parse_newick("(A,B,C)R;").unwrap();
        let kids: Vec<_> = tree
            .children(tree.root())
            .iter()
            .map(|&c| tree.name(c).unwrap())
            .collect();
        assert_eq!(kids, ["A", "B", "C"]);
    }

    #[test]
    fn deep_chain_yields_depth_plus_one_nodes() {
        let mut tree = Tree::new(Some("root"));
        let mut node = tree.root();
        for i in 0..2_000 {
            node = tree.add_child(node, Some(&format!("n{i}")));
        }
        let leaf = tree.add_child(node, Some("leaf"));
        let index = ParentIndex::build(&tree).unwrap();
        let path: Vec<_> = index.ancestors(leaf).collect();
        assert_eq!(path.len(), 2_002);
        assert_eq!(*path.last().unwrap(), tree.root());
        assert_eq!(index.depth(leaf), 2_001);
    }

    #[test]
    fn every_non_root_node_has_its_bfs_parent() {
        let mut tree = Tree::new(None);
        let a = tree.add_child(0, Some("a"));
        let b = tree.add_child(0, Some("b"));
        let c = tree.add_child(a, Some("c"));
        let index = ParentIndex::build(&tree).unwrap();
        assert_eq!(index.parent(a), Some(0));
        assert_eq!(index.parent(b), Some(0));
        assert_eq!(index.parent(c), Some(a));
        assert_eq!(index.parent(0), None);
    }

    #[test]
    fn quoted_labels_keep_their_text() {
        let tree = Tree::parse_newick(
            "((OTU1:0.1,OTU2:0.2)'0.998:k__Bacteria; p__Firmicutes; g__[Ruminococcus]':0.3,OTU3:0.5)root;",
        )
        .unwrap();
        let index = TreeIndex::build(tree).unwrap();
        let leaf = index.find_leaf("OTU1").unwrap();
        let path = names(index.tree(), index.ancestors(leaf));
        assert_eq!(
            path,
            ["OTU1", "0.998:k__Bacteria; p__Firmicutes; g__[Ruminococcus]", "root"]
        );

        let tree = Tree::parse_newick("((A,B)'k__Bacteria; p__Firmicutes',C)r;").unwrap();
        assert_eq!(tree.name(tree.children(tree.root())[0]), Some("k__Bacteria; p__Firmicutes"));
    }

    #[test]
    fn quoted_leaves_and_escaped_quotes() {
        let tree = Tree::parse_newick("('OTU 1','it''s',C)'';").unwrap();
        let kids: Vec<_> = tree
            .children(tree.root())
            .iter()
            .map(|&c| tree.name(c).unwrap())
            .collect();
        assert_eq!(kids, ["OTU 1", "it's", "C"]);
        assert_eq!(tree.name(tree.root()), None);
    }

    #[test]
    fn placeholder_never_collides_with_real_names() {
        let tree = Tree::parse_newick("(TAXROLLUPQUOTED0,'x y')r;").unwrap();
        let kids: Vec<_> = tree
            .children(tree.root())
            .iter()
            .map(|&c| tree.name(c).unwrap())
            .collect();
        assert_eq!(kids, ["TAXROLLUPQUOTED0", "x y"]);
    }

    #[test]
    fn unterminated_quote_is_a_newick_error() {
        assert!(matches!(
            Tree::parse_newick("(A,'B)r;"),
            Err(Error::Newick(_))
        ));
    }

    #[test]
    fn child_listed_twice_is_rejected() {
        let tree = Tree::from_parts(
            vec![Some("r".into()), Some("a".into())],
            vec![vec![1, 1], vec![]],
        )
        .unwrap();
        match ParentIndex::build(&tree).unwrap_err() {
            Error::MalformedTree { node, reason } => {
                assert!(node.contains("\"a\""));
                assert!(reason.contains("listed twice"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn node_with_two_parents_is_rejected() {
        let tree = Tree::from_parts(
            vec![Some("r".into()), Some("a".into()), Some("b".into()), Some("x".into())],
            vec![vec![1, 2], vec![3], vec![3], vec![]],
        )
        .unwrap();
        let err = ParentIndex::build(&tree).unwrap_err();
        match err {
            Error::MalformedTree { node, reason } => {
                assert!(node.contains("\"x\""));
                assert!(reason.contains("two parents"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn cycle_back_to_root_is_rejected() {
        let tree = Tree::from_parts(vec![None, None], vec![vec![1], vec![0]]).unwrap();
        assert!(matches!(
            ParentIndex::build(&tree),
            Err(Error::MalformedTree { .. })
        ));
    }

    #[test]
    fn unreachable_node_is_rejected() {
        let tree = Tree::from_parts(vec![None, None, Some("lost".into())], vec![vec![1], vec![], vec![]])
            .unwrap();
        let err = ParentIndex::build(&tree).unwrap_err();
        assert!(err.to_string().contains("lost"));
    }

    #[test]
    fn out_of_range_child_is_rejected() {
        assert!(Tree::from_parts(vec![None], vec![vec![5]]).is_err());
        assert!(Tree::from_parts(vec![], vec![]).is_err());
    }

    #[test]
    fn duplicate_leaf_names_keep_the_first() {
        let mut tree = Tree::new(None);
        let first = tree.add_child(0, Some("dup"));
        tree.add_child(0, Some("dup"));
        let index = TreeIndex::build(tree).unwrap();
        assert_eq!(index.find_leaf("dup"), Some(first));
        assert_eq!(index.find_leaf("missing"), None);
    }
}
