use crate::graph::{Graph, Handle, NodeId};
use coitrees::{BasicCOITree, Interval, IntervalTree};
use rustc_hash::FxHashSet;
use std::io;

/// Coordinate index over one named path: step offsets plus an interval tree
/// mapping path positions to steps.
pub struct PathIndex {
    steps: Vec<Handle>,
    offsets: Vec<usize>,
    length: usize,
    tree: BasicCOITree<u32, u32>,
    nodes: FxHashSet<NodeId>,
}

/// Path positions are stored as `i32` in the interval tree.
fn check_coordinates(path: &str, length: usize) -> io::Result<()> {
    if length > i32::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Path '{}' is {} bp, longer than the {} bp the index supports",
                path,
                length,
                i32::MAX
            ),
        ));
    }
    Ok(())
}

impl PathIndex {
    pub fn new(graph: &Graph, path: &str) -> io::Result<Self> {
        let steps = graph
            .path(path)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("Path '{}' not found", path))
            })?
            .to_vec();

        let mut offsets = Vec::with_capacity(steps.len());
        let mut intervals = Vec::with_capacity(steps.len());
        let mut nodes: FxHashSet<NodeId> = FxHashSet::default();
        let total: usize = steps.iter().map(|step| graph.node_len(step.node)).sum();
        check_coordinates(path, total)?;

        let mut length = 0usize;
        for (rank, step) in steps.iter().enumerate() {
            let len = graph.node_len(step.node);
            offsets.push(length);
            if len > 0 {
                intervals.push(Interval {
                    first: length as i32,
                    last: (length + len - 1) as i32,
                    metadata: rank as u32,
                });
            }
            nodes.insert(step.node);
            length += len;
        }

        Ok(PathIndex {
            steps,
            offsets,
            length,
            tree: BasicCOITree::new(intervals.as_slice()),
            nodes,
        })
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn steps(&self) -> &[Handle] {
        &self.steps
    }

    pub fn step_len(&self, rank: usize) -> usize {
        let end = self.offsets.get(rank + 1).copied().unwrap_or(self.length);
        end - self.offsets[rank]
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    /// Step covering path position `pos`, if any.
    pub fn find_position(&self, pos: usize) -> Option<usize> {
        if pos >= self.length {
            return None;
        }
        let mut found = None;
        self.tree.query(pos as i32, pos as i32, |iv| {
            found = Some(iv.metadata.clone() as usize);
        });
        found
    }

    /// Ranks of the steps overlapping `[start, end)`, in path order.
    pub fn steps_in(&self, start: usize, end: usize) -> Vec<usize> {
        if start >= end || start >= self.length {
            return Vec::new();
        }
        let end = end.min(self.length);
        let mut ranks = Vec::new();
        self.tree.query(start as i32, (end - 1) as i32, |iv| {
            ranks.push(iv.metadata.clone() as usize);
        });
        ranks.sort_unstable();
        ranks
    }

    /// Widen `[start, end)` so both ends fall on node boundaries of this path.
    pub fn round_outward(&self, start: usize, end: usize) -> (usize, usize) {
        let start = start.min(self.length);
        let end = end.clamp(start, self.length);
        let rounded_start = self
            .find_position(start)
            .map_or(start, |rank| self.offsets[rank]);
        let rounded_end = if end > start {
            self.find_position(end - 1)
                .map_or(end, |rank| self.offsets[rank] + self.step_len(rank))
        } else {
            end
        };
        (rounded_start, rounded_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_by_four() -> Graph {
        let mut g = Graph::new();
        let ids: Vec<NodeId> = ["ACGT", "TTGA", "CCAA", "GGTC"]
            .iter()
            .map(|s| g.create_node(s.as_bytes().to_vec()))
            .collect();
        for w in ids.windows(2) {
            g.connect(Handle::forward(w[0]), Handle::forward(w[1]));
        }
        g.add_path("chr1", ids.iter().map(|&id| Handle::forward(id)).collect());
        g
    }

    #[test]
    fn test_round_outward() {
        let g = four_by_four();
        let index = PathIndex::new(&g, "chr1").unwrap();
        assert_eq!(index.len(), 16);
        assert_eq!(index.round_outward(5, 6), (4, 8));
        assert_eq!(index.round_outward(4, 8), (4, 8));
        assert_eq!(index.round_outward(3, 9), (0, 12));
        assert_eq!(index.round_outward(0, 100), (0, 16));
    }

    #[test]
    fn test_find_position_and_steps() {
        let g = four_by_four();
        let index = PathIndex::new(&g, "chr1").unwrap();
        assert_eq!(index.find_position(0), Some(0));
        assert_eq!(index.find_position(7), Some(1));
        assert_eq!(index.find_position(16), None);
        assert_eq!(index.steps_in(3, 9), vec![0, 1, 2]);
        assert_eq!(index.steps_in(4, 8), vec![1]);
        assert!(index.contains_node(3));
        assert!(!index.contains_node(5));
    }

    #[test]
    fn test_coordinate_limit() {
        assert!(check_coordinates("chr1", i32::MAX as usize).is_ok());
        let err = check_coordinates("chr1", i32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_missing_path() {
        let g = four_by_four();
        let err = PathIndex::new(&g, "chrX").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
