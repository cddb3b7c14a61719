use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::cmp::Reverse;
use std::io;

pub type NodeId = u64;

/// One oriented traversal of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    pub node: NodeId,
    pub is_reverse: bool,
}

/// One endpoint of a node. An edge joins two node sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeSide {
    pub node: NodeId,
    pub is_end: bool,
}

impl Handle {
    pub fn new(node: NodeId, is_reverse: bool) -> Self {
        Handle { node, is_reverse }
    }

    pub fn forward(node: NodeId) -> Self {
        Handle::new(node, false)
    }

    pub fn flip(self) -> Self {
        Handle::new(self.node, !self.is_reverse)
    }

    /// Side through which a walk enters this handle.
    pub fn left_side(self) -> NodeSide {
        NodeSide::new(self.node, self.is_reverse)
    }

    /// Side through which a walk leaves this handle.
    pub fn right_side(self) -> NodeSide {
        NodeSide::new(self.node, !self.is_reverse)
    }
}

impl NodeSide {
    pub fn new(node: NodeId, is_end: bool) -> Self {
        NodeSide { node, is_end }
    }

    pub fn start(node: NodeId) -> Self {
        NodeSide::new(node, false)
    }

    pub fn end(node: NodeId) -> Self {
        NodeSide::new(node, true)
    }

    /// The opposite side of the same node.
    pub fn flip(self) -> Self {
        NodeSide::new(self.node, !self.is_end)
    }

    /// The handle a walk arriving through this side would be on.
    pub fn entering(self) -> Handle {
        Handle::new(self.node, self.is_end)
    }
}

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|b| match b {
            b'A' => b'T',
            b'T' => b'A',
            b'G' => b'C',
            b'C' => b'G',
            b'a' => b't',
            b't' => b'a',
            b'g' => b'c',
            b'c' => b'g',
            b'N' => b'N',
            b'n' => b'n',
            _ => b'N',
        })
        .collect()
}

/// Bidirected sequence graph: an arena of nodes keyed by stable ids, symmetric
/// adjacency between node sides, and named paths.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Vec<u8>>,
    edges: FxHashMap<NodeSide, BTreeSet<NodeSide>>,
    paths: BTreeMap<String, Vec<Handle>>,
    next_id: NodeId,
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            next_id: 1,
            ..Default::default()
        }
    }

    // ---- Nodes ----

    pub fn create_node(&mut self, sequence: Vec<u8>) -> NodeId {
        let id = self.next_id.max(1);
        self.nodes.insert(id, sequence);
        self.next_id = id + 1;
        id
    }

    pub fn create_node_with_id(&mut self, id: NodeId, sequence: Vec<u8>) -> io::Result<()> {
        if id == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Node id 0 is reserved",
            ));
        }
        if self.nodes.insert(id, sequence).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Duplicate node id {}", id),
            ));
        }
        self.next_id = self.next_id.max(id + 1);
        Ok(())
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn sequence(&self, id: NodeId) -> Option<&[u8]> {
        self.nodes.get(&id).map(|s| s.as_slice())
    }

    pub fn node_len(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |s| s.len())
    }

    /// Sequence read along a handle, reverse complemented for reverse handles.
    pub fn handle_sequence(&self, handle: Handle) -> Vec<u8> {
        let seq = self.sequence(handle.node).unwrap_or_default();
        if handle.is_reverse {
            reverse_complement(seq)
        } else {
            seq.to_vec()
        }
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn total_length(&self) -> usize {
        self.nodes.values().map(|s| s.len()).sum()
    }

    // ---- Edges ----

    pub fn create_edge(&mut self, a: NodeSide, b: NodeSide) {
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    /// Connect the walk `from` -> `to`.
    pub fn connect(&mut self, from: Handle, to: Handle) {
        self.create_edge(from.right_side(), to.left_side());
    }

    pub fn has_edge(&self, a: NodeSide, b: NodeSide) -> bool {
        self.edges.get(&a).is_some_and(|set| set.contains(&b))
    }

    pub fn remove_edge(&mut self, a: NodeSide, b: NodeSide) {
        for (x, y) in [(a, b), (b, a)] {
            if let Some(set) = self.edges.get_mut(&x) {
                set.remove(&y);
                if set.is_empty() {
                    self.edges.remove(&x);
                }
            }
        }
    }

    /// Node sides attached to `side`, in sorted order.
    pub fn sides_of(&self, side: NodeSide) -> impl Iterator<Item = NodeSide> + '_ {
        self.edges.get(&side).into_iter().flatten().copied()
    }

    /// Handles reachable in one step after walking `handle`.
    pub fn successors(&self, handle: Handle) -> Vec<Handle> {
        self.sides_of(handle.right_side())
            .map(NodeSide::entering)
            .collect()
    }

    /// Handles that can be walked immediately before `handle`.
    pub fn predecessors(&self, handle: Handle) -> Vec<Handle> {
        self.successors(handle.flip())
            .into_iter()
            .map(Handle::flip)
            .collect()
    }

    /// Number of distinct edges, counting each undirected pair once.
    pub fn edge_count(&self) -> usize {
        self.edges
            .iter()
            .map(|(a, set)| set.iter().filter(|b| a <= *b).count())
            .sum()
    }

    /// All edges as ordered `(a, b)` pairs with `a <= b`.
    pub fn edges(&self) -> Vec<(NodeSide, NodeSide)> {
        let mut out: Vec<(NodeSide, NodeSide)> = self
            .edges
            .iter()
            .flat_map(|(a, set)| set.iter().filter(move |b| a <= *b).map(move |b| (*a, *b)))
            .collect();
        out.sort_unstable();
        out
    }

    // ---- Paths ----

    pub fn add_path(&mut self, name: &str, steps: Vec<Handle>) {
        self.paths.insert(name.to_string(), steps);
    }

    pub fn path(&self, name: &str) -> Option<&[Handle]> {
        self.paths.get(name).map(|p| p.as_slice())
    }

    pub fn has_path(&self, name: &str) -> bool {
        self.paths.contains_key(name)
    }

    pub fn path_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.paths.keys().map(|s| s.as_str())
    }

    pub fn path_sequence(&self, name: &str) -> Option<Vec<u8>> {
        let steps = self.paths.get(name)?;
        let mut seq = Vec::new();
        for &step in steps {
            seq.extend(self.handle_sequence(step));
        }
        Some(seq)
    }

    // ---- Structural edits ----

    /// Split node `id` at the given forward offsets. The first piece keeps the
    /// original id. Edges on the start side stay with the first piece, edges on
    /// the end side move to the last piece, and every path stepping through the
    /// node is rewritten. Returns the pieces in forward order.
    pub fn split_node(&mut self, id: NodeId, offsets: &[usize]) -> Vec<NodeId> {
        let Some(seq) = self.nodes.get(&id).cloned() else {
            return Vec::new();
        };
        let mut cuts: Vec<usize> = offsets
            .iter()
            .copied()
            .filter(|&o| o > 0 && o < seq.len())
            .collect();
        cuts.sort_unstable();
        cuts.dedup();
        if cuts.is_empty() {
            return vec![id];
        }

        let mut bounds = vec![0];
        bounds.extend(&cuts);
        bounds.push(seq.len());

        let mut pieces = vec![id];
        self.nodes.insert(id, seq[bounds[0]..bounds[1]].to_vec());
        for w in bounds[1..].windows(2) {
            pieces.push(self.create_node(seq[w[0]..w[1]].to_vec()));
        }
        let last = pieces[pieces.len() - 1];

        // Move end-side edges onto the last piece
        let old_end = NodeSide::end(id);
        let end_neighbors: Vec<NodeSide> = self.sides_of(old_end).collect();
        for other in &end_neighbors {
            self.remove_edge(old_end, *other);
        }
        for other in end_neighbors {
            let other = if other == old_end {
                NodeSide::end(last)
            } else {
                other
            };
            self.create_edge(NodeSide::end(last), other);
        }

        for w in pieces.windows(2) {
            self.create_edge(NodeSide::end(w[0]), NodeSide::start(w[1]));
        }

        for steps in self.paths.values_mut() {
            if !steps.iter().any(|h| h.node == id) {
                continue;
            }
            let mut rewritten = Vec::with_capacity(steps.len() + pieces.len());
            for &step in steps.iter() {
                if step.node != id {
                    rewritten.push(step);
                } else if step.is_reverse {
                    rewritten.extend(pieces.iter().rev().map(|&p| Handle::new(p, true)));
                } else {
                    rewritten.extend(pieces.iter().map(|&p| Handle::forward(p)));
                }
            }
            *steps = rewritten;
        }

        pieces
    }

    /// Split every node longer than `max_len` into pieces of at most that
    /// length. Returns the number of nodes that were split.
    pub fn dice_nodes(&mut self, max_len: usize) -> usize {
        if max_len == 0 {
            return 0;
        }
        let long: Vec<(NodeId, usize)> = self
            .nodes
            .iter()
            .filter(|(_, s)| s.len() > max_len)
            .map(|(&id, s)| (id, s.len()))
            .collect();
        for &(id, len) in &long {
            let cuts: Vec<usize> = (max_len..len).step_by(max_len).collect();
            self.split_node(id, &cuts);
        }
        long.len()
    }

    // ---- Subgraphs ----

    /// Copy of the nodes in `ids` with every edge between them. Paths are not
    /// carried over.
    pub fn induced_subgraph(&self, ids: &BTreeSet<NodeId>) -> Graph {
        let mut sub = Graph::new();
        for &id in ids {
            if let Some(seq) = self.nodes.get(&id) {
                sub.nodes.insert(id, seq.clone());
            }
        }
        sub.next_id = self.next_id;
        for &id in ids {
            for side in [NodeSide::start(id), NodeSide::end(id)] {
                for other in self.sides_of(side) {
                    if ids.contains(&other.node) {
                        sub.create_edge(side, other);
                    }
                }
            }
        }
        sub
    }

    /// Grow a node set outward from `seeds` by base distance, up to `budget`
    /// bases past each seed. The walk never leaves through a side in
    /// `blocked` and never enters a node for which `forbidden` holds.
    pub fn expand_context<F>(
        &self,
        seeds: &[NodeId],
        budget: usize,
        blocked: &FxHashSet<NodeSide>,
        forbidden: F,
    ) -> BTreeSet<NodeId>
    where
        F: Fn(NodeId) -> bool,
    {
        let mut found: BTreeSet<NodeId> = BTreeSet::new();
        let mut best: FxHashMap<NodeSide, usize> = FxHashMap::default();
        let mut heap = BinaryHeap::new();

        for &id in seeds {
            if !self.has_node(id) {
                continue;
            }
            found.insert(id);
            for side in [NodeSide::start(id), NodeSide::end(id)] {
                heap.push(Reverse((0usize, side)));
            }
        }

        while let Some(Reverse((dist, side))) = heap.pop() {
            if best.get(&side).is_some_and(|&d| d <= dist) {
                continue;
            }
            best.insert(side, dist);
            if blocked.contains(&side) {
                continue;
            }
            for other in self.sides_of(side) {
                if !found.contains(&other.node) && forbidden(other.node) {
                    continue;
                }
                found.insert(other.node);
                // Leaving the reached node through its far side costs its length
                let next = dist + self.node_len(other.node);
                if next <= budget {
                    heap.push(Reverse((next, other.flip())));
                }
            }
        }

        found
    }
}
