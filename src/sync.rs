use crate::alignment::Alignment;
use crate::edit::{apply_alignment, EditSummary};
use crate::graph::{Graph, Handle, NodeId, NodeSide};
use crate::path_index::PathIndex;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

/// Lifecycle of a region lock, reported at debug level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    Requested,
    Rounded,
    Extracted,
    Edited,
    Released,
}

/// A region currently held by some lock.
struct HeldRegion {
    id: u64,
    path: String,
    start: usize,
    end: usize,
    /// Nodes copied into the lock's subgraph; these may be split.
    nodes: FxHashSet<NodeId>,
    /// `nodes` plus the outside nodes whose sides may receive new edges.
    claimed: FxHashSet<NodeId>,
}

impl HeldRegion {
    fn conflicts(
        &self,
        path: &str,
        start: usize,
        end: usize,
        nodes: &FxHashSet<NodeId>,
        claimed: &FxHashSet<NodeId>,
    ) -> bool {
        // Touching ranges share a boundary node side
        let ranges = self.path == path && self.start <= end && start <= self.end;
        ranges || !self.claimed.is_disjoint(nodes) || !self.nodes.is_disjoint(claimed)
    }
}

struct SharedState {
    graph: Graph,
    indexes: FxHashMap<String, Arc<PathIndex>>,
    held: Vec<HeldRegion>,
    next_id: u64,
}

impl SharedState {
    fn index(&mut self, path: &str) -> io::Result<Arc<PathIndex>> {
        if let Some(index) = self.indexes.get(path) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(PathIndex::new(&self.graph, path)?);
        self.indexes.insert(path.to_string(), Arc::clone(&index));
        Ok(index)
    }
}

/// Memoized path sequences. Commits never change the spelled sequence of an
/// existing path, so entries stay valid for the whole run.
#[derive(Default)]
pub struct PathSequenceCache {
    sequences: RwLock<FxHashMap<String, Arc<[u8]>>>,
}

impl PathSequenceCache {
    pub fn get_or_insert_with<F>(&self, path: &str, compute: F) -> io::Result<Arc<[u8]>>
    where
        F: FnOnce() -> io::Result<Vec<u8>>,
    {
        if let Some(seq) = self
            .sequences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(Arc::clone(seq));
        }
        let seq: Arc<[u8]> = compute()?.into();
        self.sequences
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_string())
            .or_insert_with(|| Arc::clone(&seq));
        Ok(seq)
    }
}

/// Owner of the shared graph. Hands out exclusive locks on path regions and
/// merges edits back in.
pub struct GraphSynchronizer {
    state: Mutex<SharedState>,
    released: Condvar,
    sequences: PathSequenceCache,
}

impl GraphSynchronizer {
    pub fn new(graph: Graph) -> Self {
        GraphSynchronizer {
            state: Mutex::new(SharedState {
                graph,
                indexes: FxHashMap::default(),
                held: Vec::new(),
                next_id: 0,
            }),
            released: Condvar::new(),
            sequences: PathSequenceCache::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_graph(self) -> Graph {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .graph
    }

    /// Scoped read access to a path's coordinate index.
    pub fn with_path_index<R>(&self, path: &str, f: impl FnOnce(&PathIndex) -> R) -> io::Result<R> {
        let index = self.state().index(path)?;
        Ok(f(&index))
    }

    /// Full sequence of a named path.
    pub fn path_sequence(&self, path: &str) -> io::Result<Arc<[u8]>> {
        self.sequences.get_or_insert_with(path, || {
            self.state().graph.path_sequence(path).ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("Path '{}' not found", path))
            })
        })
    }

    /// Block until `[start, end)` on `path`, rounded outward to node
    /// boundaries, can be locked exclusively. Never times out.
    pub fn acquire(&self, path: &str, start: usize, end: usize) -> io::Result<RegionLock<'_>> {
        debug!("Lock {:?} on {}:{}-{}", LockState::Requested, path, start, end);
        let mut state = self.state();
        loop {
            let index = state.index(path)?;
            let (start, end) = index.round_outward(start, end);
            debug!("Lock {:?} to {}:{}-{}", LockState::Rounded, path, start, end);

            let ranks = index.steps_in(start, end);
            let (Some(&first), Some(&last)) = (ranks.first(), ranks.last()) else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Empty region {}:{}-{}", path, start, end),
                ));
            };
            let empty = FxHashSet::default();
            if state
                .held
                .iter()
                .any(|h| h.conflicts(path, start, end, &empty, &empty))
            {
                state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            let steps = index.steps();
            let left = steps[first];
            let right = steps[last];
            let seeds: Vec<NodeId> = ranks.iter().map(|&r| steps[r].node).collect();
            let seed_set: FxHashSet<NodeId> = seeds.iter().copied().collect();
            let blocked: FxHashSet<NodeSide> = [left.left_side(), right.right_side()]
                .into_iter()
                .collect();
            let nodes = state.graph.expand_context(&seeds, end - start, &blocked, |id| {
                index.contains_node(id) && !seed_set.contains(&id)
            });

            let mut attachments: BTreeMap<NodeSide, BTreeSet<NodeSide>> = BTreeMap::new();
            for &id in &nodes {
                for side in [NodeSide::start(id), NodeSide::end(id)] {
                    let outside: BTreeSet<NodeSide> = state
                        .graph
                        .sides_of(side)
                        .filter(|other| !nodes.contains(&other.node))
                        .collect();
                    if !outside.is_empty() {
                        attachments.insert(side, outside);
                    }
                }
            }

            let node_set: FxHashSet<NodeId> = nodes.iter().copied().collect();
            let mut claimed = node_set.clone();
            claimed.extend(attachments.values().flatten().map(|side| side.node));
            if state
                .held
                .iter()
                .any(|h| h.conflicts(path, start, end, &node_set, &claimed))
            {
                state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            let subgraph = state.graph.induced_subgraph(&nodes);
            let id = state.next_id;
            state.next_id += 1;
            state.held.push(HeldRegion {
                id,
                path: path.to_string(),
                start,
                end,
                nodes: node_set,
                claimed,
            });
            debug!(
                "Lock {} {:?}: {} nodes, {} bp",
                id,
                LockState::Extracted,
                subgraph.node_count(),
                subgraph.total_length()
            );

            return Ok(RegionLock {
                sync: self,
                id,
                start,
                end,
                left,
                right,
                subgraph,
                attachments,
                state: LockState::Extracted,
            });
        }
    }
}

/// Exclusive hold on a rounded path region, with a private copy of the
/// enclosed subgraph. Dropping the lock releases the region.
pub struct RegionLock<'a> {
    sync: &'a GraphSynchronizer,
    id: u64,
    start: usize,
    end: usize,
    left: Handle,
    right: Handle,
    subgraph: Graph,
    attachments: BTreeMap<NodeSide, BTreeSet<NodeSide>>,
    state: LockState,
}

impl RegionLock<'_> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn subgraph(&self) -> &Graph {
        &self.subgraph
    }

    /// First step of the locked region on its path.
    pub fn left_boundary(&self) -> Handle {
        self.left
    }

    /// Last step of the locked region on its path.
    pub fn right_boundary(&self) -> Handle {
        self.right
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Node sides outside the copy that connect to `side`.
    pub fn peripheral_attachments(&self, side: NodeSide) -> BTreeSet<NodeSide> {
        self.attachments.get(&side).cloned().unwrap_or_default()
    }

    /// Commit `alignment` to the shared graph and release the lock. Path
    /// indexes on paths through split nodes are rebuilt on next use.
    pub fn apply_edit(
        mut self,
        alignment: &Alignment,
        attachments: &BTreeSet<NodeSide>,
    ) -> io::Result<EditSummary> {
        let summary = {
            let mut state = self.sync.state();
            let summary = apply_alignment(&mut state.graph, alignment, attachments)?;
            if !summary.split_nodes.is_empty() {
                state.indexes.retain(|_, index| {
                    !summary.split_nodes.iter().any(|&id| index.contains_node(id))
                });
            }
            summary
        };
        self.state = LockState::Edited;
        debug!(
            "Lock {} {:?}: {} nodes split, {} added, {} edges added",
            self.id,
            self.state,
            summary.split_nodes.len(),
            summary.novel_nodes.len(),
            summary.edges_added
        );
        Ok(summary)
    }
}

impl Drop for RegionLock<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.sync.state();
            state.held.retain(|h| h.id != self.id);
        }
        self.state = LockState::Released;
        debug!("Lock {} {:?}", self.id, self.state);
        self.sync.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{Edit, Mapping, Position};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Four 4 bp nodes on path "chr1", plus an off-path bubble around node 2.
    fn graph() -> Graph {
        let mut g = Graph::new();
        let ids: Vec<NodeId> = ["ACGT", "TTGA", "CCAA", "GGTC"]
            .iter()
            .map(|s| g.create_node(s.as_bytes().to_vec()))
            .collect();
        for w in ids.windows(2) {
            g.connect(Handle::forward(w[0]), Handle::forward(w[1]));
        }
        let alt = g.create_node(b"TAGA".to_vec());
        g.connect(Handle::forward(1), Handle::forward(alt));
        g.connect(Handle::forward(alt), Handle::forward(3));
        g.add_path("chr1", ids.iter().map(|&id| Handle::forward(id)).collect());
        g
    }

    #[test]
    fn test_acquire_rounds_outward() {
        let sync = GraphSynchronizer::new(graph());
        let lock = sync.acquire("chr1", 5, 6).unwrap();
        assert_eq!((lock.start(), lock.end()), (4, 8));
        assert_eq!(lock.left_boundary(), Handle::forward(2));
        assert_eq!(lock.right_boundary(), Handle::forward(2));
        assert_eq!(lock.state(), LockState::Extracted);
    }

    #[test]
    fn test_extraction_and_attachments() {
        let sync = GraphSynchronizer::new(graph());
        let lock = sync.acquire("chr1", 4, 8).unwrap();
        let sub = lock.subgraph();
        assert!(sub.has_node(2));
        assert!(!sub.has_node(1));
        assert!(!sub.has_node(3));
        assert_eq!(
            lock.peripheral_attachments(NodeSide::start(2)),
            [NodeSide::end(1)].into_iter().collect()
        );
        assert_eq!(
            lock.peripheral_attachments(NodeSide::end(2)),
            [NodeSide::start(3)].into_iter().collect()
        );
        drop(lock);

        // A region spanning the bubble pulls in the off-path node
        let lock = sync.acquire("chr1", 0, 12).unwrap();
        assert!(lock.subgraph().has_node(5));
        assert!(lock.peripheral_attachments(NodeSide::end(3)).contains(&NodeSide::start(4)));
    }

    #[test]
    fn test_overlapping_regions_serialize() {
        let sync = Arc::new(GraphSynchronizer::new(graph()));
        let held = sync.acquire("chr1", 0, 4).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&sync);
        let handle = thread::spawn(move || {
            let lock = other.acquire("chr1", 2, 6).unwrap();
            tx.send((lock.start(), lock.end())).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (0, 8));
        handle.join().unwrap();
    }

    #[test]
    fn test_adjacent_regions_serialize() {
        let sync = Arc::new(GraphSynchronizer::new(graph()));
        let held = sync.acquire("chr1", 0, 4).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&sync);
        let handle = thread::spawn(move || {
            let lock = other.acquire("chr1", 4, 8).unwrap();
            tx.send(lock.start()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 4);
        handle.join().unwrap();
    }

    #[test]
    fn test_disjoint_regions_proceed() {
        let sync = Arc::new(GraphSynchronizer::new(graph()));
        let held = sync.acquire("chr1", 0, 4).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&sync);
        let handle = thread::spawn(move || {
            let lock = other.acquire("chr1", 12, 16).unwrap();
            tx.send(lock.start()).unwrap();
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 12);
        drop(held);
        handle.join().unwrap();
    }

    #[test]
    fn test_apply_edit_invalidates_index() {
        let sync = GraphSynchronizer::new(graph());
        assert_eq!(sync.with_path_index("chr1", |i| i.steps().len()).unwrap(), 4);

        let lock = sync.acquire("chr1", 4, 8).unwrap();
        let aln = Alignment {
            sequence: b"TCGA".to_vec(),
            path: vec![Mapping {
                position: Position { node: 2, offset: 0, is_reverse: false },
                edits: vec![Edit::matched(1), Edit::substitution(b"C".to_vec()), Edit::matched(2)],
            }],
            score: 0,
        };
        let summary = lock.apply_edit(&aln, &BTreeSet::new()).unwrap();
        assert_eq!(summary.split_nodes, vec![2]);
        assert_eq!(summary.novel_nodes.len(), 1);

        assert_eq!(sync.with_path_index("chr1", |i| i.steps().len()).unwrap(), 6);
        assert_eq!(&*sync.path_sequence("chr1").unwrap(), b"ACGTTTGACCAAGGTC");
        // Released on commit
        let again = sync.acquire("chr1", 4, 8).unwrap();
        assert_eq!(again.start(), 4);
    }

    #[test]
    fn test_missing_path() {
        let sync = GraphSynchronizer::new(graph());
        let err = sync.acquire("chrZ", 0, 4).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
