//! The partition tree: arena-allocated nodes threaded on a leaf-order
//! traversal list.
//!
//! Nodes live in a fixed-capacity arena owned by the tree and are never
//! freed individually; detaching a node only unlinks it from the traversal
//! list, which is what lets a rejected proposal re-link the previous
//! subtree instead of rebuilding it.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::param::{ParamDef, ParamType};

/// Index of a node in its tree's arena.
pub type NodeId = usize;

/// How an internal node partitions its parameter.
///
/// A metric node carries `nchildren - 1` non-decreasing cut values dividing
/// the inherited range into half-open intervals `(-inf, c0], (c0, c1], ...`.
/// A nominal node carries a category -> child-index mapping covering the
/// parameter's whole domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Partition {
    Cuts(Vec<f64>),
    Categories(Vec<usize>),
}

/// Range of a node in one metric parameter. `categories` is reserved for
/// nominal parameters and currently always empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub categories: Vec<i64>,
}

impl Range {
    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// A node of the partition tree. A node with no children is a leaf
/// (a segment); `param` and the partition are meaningless for leaves.
#[derive(Debug)]
pub struct Node {
    parent: Option<NodeId>,
    param: usize,
    part: Partition,
    children: Vec<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn param(&self) -> usize {
        self.param
    }

    pub fn partition(&self) -> &Partition {
        &self.part
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Cut values of a metric node; empty for leaves and nominal nodes.
    pub fn cuts(&self) -> &[f64] {
        match &self.part {
            Partition::Cuts(cuts) => cuts,
            Partition::Categories(_) => &[],
        }
    }
}

/// The partition tree.
pub struct Tree<'a> {
    param_def: &'a [ParamDef],
    nodes: Vec<Node>,
    capacity: usize,
    root: NodeId,
    first: Option<NodeId>,
    last: Option<NodeId>,
}

impl<'a> Tree<'a> {
    /// Creates a tree whose arena holds at most `capacity` nodes, rooted at
    /// a single leaf.
    pub fn new(capacity: usize, param_def: &'a [ParamDef]) -> Result<Self> {
        let mut tree = Tree {
            param_def,
            nodes: Vec::new(),
            capacity,
            root: 0,
            first: None,
            last: None,
        };
        let root = tree.new_leaf()?;
        tree.root = root;
        tree.attach(root);
        Ok(tree)
    }

    pub fn param_def(&self) -> &'a [ParamDef] {
        self.param_def
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Number of nodes ever allocated, attached or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn alloc(&mut self, node: Node) -> Result<NodeId> {
        if self.nodes.len() >= self.capacity {
            return Err(Error::OutOfMemory);
        }
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    /// Allocates a detached leaf.
    pub fn new_leaf(&mut self) -> Result<NodeId> {
        self.new_node(0, 0, Partition::Cuts(Vec::new()))
    }

    /// Allocates a detached node splitting `param` into `nchildren` fresh
    /// leaves. For a metric parameter `part` carries the `nchildren - 1`
    /// sorted cuts; for a nominal parameter the full category mapping.
    pub fn new_node(&mut self, param: usize, nchildren: usize, part: Partition) -> Result<NodeId> {
        match &part {
            Partition::Cuts(cuts) => {
                debug_assert_eq!(cuts.len(), nchildren.saturating_sub(1));
            }
            Partition::Categories(categories) => {
                debug_assert_eq!(categories.len(), self.param_def[param].ncategories());
            }
        }
        let id = self.alloc(Node {
            parent: None,
            param,
            part,
            children: Vec::with_capacity(nchildren),
            prev: None,
            next: None,
        })?;
        for _ in 0..nchildren {
            let child = self.new_leaf()?;
            self.nodes[child].parent = Some(id);
            self.nodes[id].children.push(child);
        }
        Ok(id)
    }

    /// Appends `id` and, recursively, its subtree to the tail of the
    /// leaf-order list. The subtree must not already be attached.
    fn attach(&mut self, id: NodeId) {
        self.nodes[id].next = None;
        self.nodes[id].prev = self.last;
        if let Some(last) = self.last {
            self.nodes[last].next = Some(id);
        }
        self.last = Some(id);
        if self.first.is_none() {
            self.first = Some(id);
        }
        for i in 0..self.nodes[id].children.len() {
            let child = self.nodes[id].children[i];
            self.attach(child);
        }
    }

    /// Removes `id` and its subtree from the leaf-order list. The node
    /// stays in the arena with its child links intact.
    fn detach(&mut self, id: NodeId) {
        for i in 0..self.nodes[id].children.len() {
            let child = self.nodes[id].children[i];
            self.detach(child);
        }
        if let Some(prev) = self.nodes[id].prev {
            self.nodes[prev].next = self.nodes[id].next;
        }
        if let Some(next) = self.nodes[id].next {
            self.nodes[next].prev = self.nodes[id].prev;
        }
        if self.last == Some(id) {
            self.last = self.nodes[id].prev;
        }
        if self.first == Some(id) {
            self.first = self.nodes[id].next;
        }
        self.nodes[id].prev = None;
        self.nodes[id].next = None;
    }

    /// Splices `node` in place of `orig` (at `orig`'s parent, or at the
    /// root), detaches `orig`'s subtree and attaches `node`'s.
    pub fn replace(&mut self, orig: NodeId, node: NodeId) -> Result<()> {
        if orig >= self.nodes.len() || node >= self.nodes.len() {
            return Err(Error::InvalidArgument(
                "node does not belong to this tree".to_string(),
            ));
        }
        if let Some(parent) = self.nodes[orig].parent {
            let i = self
                .find_child(parent, orig)
                .expect("a node is listed among its parent's children");
            self.nodes[parent].children[i] = node;
            self.nodes[node].parent = Some(parent);
            self.nodes[orig].parent = None;
        } else {
            self.nodes[node].parent = None;
            self.root = node;
        }
        self.detach(orig);
        self.attach(node);
        Ok(())
    }

    /// Re-points the parent links of `id`'s listed children back at `id`.
    /// Needed when rolling a replace back: the migrated children still
    /// carry the rejected node as their parent.
    pub(crate) fn restore_child_parents(&mut self, id: NodeId) {
        for i in 0..self.nodes[id].children.len() {
            let child = self.nodes[id].children[i];
            self.nodes[child].parent = Some(id);
        }
    }

    pub(crate) fn set_cut(&mut self, id: NodeId, i: usize, value: f64) {
        match &mut self.nodes[id].part {
            Partition::Cuts(cuts) => cuts[i] = value,
            Partition::Categories(_) => unreachable!("cuts of a nominal node"),
        }
    }

    /// Index of `child` among `node`'s children.
    pub fn find_child(&self, node: NodeId, child: NodeId) -> Option<usize> {
        self.nodes[node].children.iter().position(|&c| c == child)
    }

    /// Range of node `id` in parameter `k`: the parameter domain tightened
    /// by every cut an ancestor splitting on `k` imposes on the path down
    /// to `id`. Cuts are inclusive upper bounds on the lower child.
    pub fn node_range(&self, id: NodeId, k: usize) -> Range {
        let pd = &self.param_def[k];
        let mut range = Range {
            min: pd.min.as_f64(),
            max: pd.max.as_f64(),
            categories: Vec::new(),
        };
        let mut child = id;
        let mut ancestor = self.nodes[id].parent;
        while let Some(n) = ancestor {
            if self.nodes[n].param == k {
                match &self.nodes[n].part {
                    Partition::Cuts(cuts) => {
                        let i = self
                            .find_child(n, child)
                            .expect("a node is listed among its parent's children");
                        if i != 0 {
                            range.min = range.min.max(cuts[i - 1]);
                        }
                        if i + 1 != self.nodes[n].children.len() {
                            range.max = range.max.min(cuts[i]);
                        }
                    }
                    Partition::Categories(_) => {
                        // Nominal ranges are not tightened.
                    }
                }
            }
            child = n;
            ancestor = self.nodes[n].parent;
        }
        range
    }

    /// Iterates over the attached nodes in leaf order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.first, move |&id| self.nodes[id].next)
    }

    /// Whether `id` is a segment, i.e. a leaf.
    pub fn is_segment(&self, id: NodeId) -> bool {
        self.nodes[id].is_leaf()
    }

    pub fn count_segments(&self) -> usize {
        self.iter().filter(|&id| self.is_segment(id)).count()
    }

    /// The `s`-th segment in leaf order.
    pub fn select_segment(&self, s: usize) -> Option<NodeId> {
        self.iter().filter(|&id| self.is_segment(id)).nth(s)
    }

    /// Whether `id` is a supersegment: a metric node with two adjacent leaf
    /// children, or a nominal node with at least two leaf children.
    pub fn is_supersegment(&self, id: NodeId) -> bool {
        let node = &self.nodes[id];
        match &node.part {
            Partition::Cuts(_) => node
                .children
                .windows(2)
                .any(|pair| self.is_segment(pair[0]) && self.is_segment(pair[1])),
            Partition::Categories(_) => {
                let segments = node
                    .children
                    .iter()
                    .filter(|&&c| self.is_segment(c))
                    .count();
                segments >= 2
            }
        }
    }

    pub fn count_supersegments(&self) -> usize {
        self.iter().filter(|&id| self.is_supersegment(id)).count()
    }

    /// The `ss`-th supersegment in leaf order.
    pub fn select_supersegment(&self, ss: usize) -> Option<NodeId> {
        self.iter().filter(|&id| self.is_supersegment(id)).nth(ss)
    }

    /// Whether cut `i` of metric node `id` separates two leaves.
    pub fn is_movable_cut(&self, id: NodeId, i: usize) -> bool {
        debug_assert_eq!(self.param_def[self.nodes[id].param].ptype, ParamType::Metric);
        let children = &self.nodes[id].children;
        self.is_segment(children[i]) && self.is_segment(children[i + 1])
    }

    pub fn count_movable_cuts(&self, id: NodeId) -> usize {
        let nchildren = self.nodes[id].children.len();
        (0..nchildren.saturating_sub(1))
            .filter(|&i| self.is_movable_cut(id, i))
            .count()
    }

    /// The index of the `c`-th movable cut of `id`.
    pub fn select_movable_cut(&self, id: NodeId, c: usize) -> Option<usize> {
        let nchildren = self.nodes[id].children.len();
        (0..nchildren.saturating_sub(1))
            .filter(|&i| self.is_movable_cut(id, i))
            .nth(c)
    }

    /// Structural correctness of the whole tree: parent/child links agree
    /// and metric cut vectors are non-decreasing. Used as a debug
    /// assertion, not on the acceptance path.
    pub fn check(&self) -> bool {
        if self.nodes[self.root].parent.is_some() {
            return false;
        }
        if self.first.is_none() || self.last.is_none() {
            return false;
        }
        self.check_subtree(self.root)
    }

    fn check_subtree(&self, id: NodeId) -> bool {
        let node = &self.nodes[id];
        for &child in node.children.iter() {
            if self.nodes[child].parent != Some(id) {
                return false;
            }
            if !self.check_subtree(child) {
                return false;
            }
        }
        if let Partition::Cuts(cuts) = &node.part {
            for pair in cuts.windows(2) {
                if pair[1] < pair[0] {
                    return false;
                }
            }
        }
        true
    }

    fn fmt_node(&self, f: &mut fmt::Formatter, id: NodeId) -> fmt::Result {
        let node = &self.nodes[id];
        write!(f, "({}, [", node.param)?;
        for (i, cut) in node.cuts().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", cut)?;
        }
        write!(f, "], [")?;
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            self.fmt_node(f, child)?;
        }
        write!(f, "])")
    }
}

impl fmt::Display for Tree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_node(f, self.root)
    }
}
