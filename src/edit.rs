use crate::alignment::Alignment;
use crate::graph::{reverse_complement, Graph, Handle, NodeId, NodeSide};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::io;

/// What committing one alignment changed in the graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EditSummary {
    /// Original ids of nodes that were split.
    pub split_nodes: Vec<NodeId>,
    /// Nodes created to hold novel sequence.
    pub novel_nodes: Vec<NodeId>,
    pub edges_added: usize,
}

/// Node pieces after splitting, as forward start offsets.
struct Pieces {
    by_node: FxHashMap<NodeId, Vec<(usize, NodeId)>>,
}

impl Pieces {
    /// Handles covering forward range `[start, end)` of the original node, in
    /// walk order for the given orientation.
    fn covering(&self, node: NodeId, start: usize, end: usize, is_reverse: bool) -> Vec<Handle> {
        let mut handles: Vec<Handle> = match self.by_node.get(&node) {
            Some(pieces) => pieces
                .iter()
                .filter(|(offset, _)| *offset >= start && *offset < end)
                .map(|&(_, id)| Handle::new(id, is_reverse))
                .collect(),
            None => vec![Handle::new(node, is_reverse)],
        };
        if is_reverse {
            handles.reverse();
        }
        handles
    }

    /// The piece whose forward range starts at `offset`.
    fn starting_at(&self, node: NodeId, offset: usize) -> Option<NodeId> {
        match self.by_node.get(&node) {
            Some(pieces) => pieces.iter().find(|(o, _)| *o == offset).map(|&(_, id)| id),
            None if offset == 0 => Some(node),
            None => None,
        }
    }

    /// The piece whose forward range ends at `offset`.
    fn ending_at(&self, graph: &Graph, node: NodeId, offset: usize) -> Option<NodeId> {
        match self.by_node.get(&node) {
            Some(pieces) => pieces
                .iter()
                .find(|(o, id)| o + graph.node_len(*id) == offset)
                .map(|&(_, id)| id),
            None if offset == graph.node_len(node) => Some(node),
            None => None,
        }
    }
}

fn to_forward(offset: usize, node_len: usize, is_reverse: bool) -> usize {
    if is_reverse {
        node_len - offset
    } else {
        offset
    }
}

/// Embed `aln` in `graph`: split nodes at every edit boundary, create nodes
/// for substituted and inserted sequence, and connect consecutive pieces of
/// the walk. A novel leading segment is attached to `attachments` when the
/// alignment starts at a node start, or to the preceding piece otherwise.
pub fn apply_alignment(
    graph: &mut Graph,
    aln: &Alignment,
    attachments: &BTreeSet<NodeSide>,
) -> io::Result<EditSummary> {
    let mut summary = EditSummary::default();
    if aln.path.is_empty() {
        return Ok(summary);
    }

    // Breakpoints in forward coordinates, strictly inside each node
    let mut cuts: BTreeMap<NodeId, BTreeSet<usize>> = BTreeMap::new();
    for mapping in &aln.path {
        let node = mapping.position.node;
        if !graph.has_node(node) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Alignment refers to missing node {}", node),
            ));
        }
        let len = graph.node_len(node);
        let mut offset = mapping.position.offset;
        if offset + mapping.from_length() > len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Mapping at offset {} spanning {} bp overruns node {} ({} bp)",
                    offset,
                    mapping.from_length(),
                    node,
                    len
                ),
            ));
        }
        let mut boundaries = vec![offset];
        for edit in &mapping.edits {
            offset += edit.from_length;
            boundaries.push(offset);
        }
        for b in boundaries {
            let forward = to_forward(b, len, mapping.position.is_reverse);
            if forward > 0 && forward < len {
                cuts.entry(node).or_default().insert(forward);
            }
        }
    }

    let original_lengths: FxHashMap<NodeId, usize> = aln
        .path
        .iter()
        .map(|m| (m.position.node, graph.node_len(m.position.node)))
        .collect();

    let mut pieces = Pieces {
        by_node: FxHashMap::default(),
    };
    for (node, offsets) in &cuts {
        let offsets: Vec<usize> = offsets.iter().copied().collect();
        let ids = graph.split_node(*node, &offsets);
        let starts = std::iter::once(0).chain(offsets.iter().copied());
        pieces.by_node.insert(*node, starts.zip(ids).collect());
        summary.split_nodes.push(*node);
    }

    // Walk of handles spelled by the alignment
    let mut walk: Vec<Handle> = Vec::new();
    for mapping in &aln.path {
        let node = mapping.position.node;
        let is_reverse = mapping.position.is_reverse;
        let len = original_lengths[&node];
        let mut offset = mapping.position.offset;
        for edit in &mapping.edits {
            if edit.is_match() {
                let a = to_forward(offset, len, is_reverse);
                let b = to_forward(offset + edit.from_length, len, is_reverse);
                let (start, end) = if is_reverse { (b, a) } else { (a, b) };
                walk.extend(pieces.covering(node, start, end, is_reverse));
            } else if edit.to_length > 0 {
                let sequence = if is_reverse {
                    reverse_complement(&edit.sequence)
                } else {
                    edit.sequence.clone()
                };
                let id = graph.create_node(sequence);
                summary.novel_nodes.push(id);
                walk.push(Handle::new(id, is_reverse));
            }
            offset += edit.from_length;
        }
    }

    for pair in walk.windows(2) {
        let (a, b) = (pair[0].right_side(), pair[1].left_side());
        if !graph.has_edge(a, b) {
            graph.create_edge(a, b);
            summary.edges_added += 1;
        }
    }

    let first_mapping = &aln.path[0];
    let leads_with_novel = !aln.first_edit().is_some_and(|e| e.is_match());
    if let (true, Some(&first)) = (leads_with_novel, walk.first()) {
        let node = first_mapping.position.node;
        let is_reverse = first_mapping.position.is_reverse;
        let len = original_lengths[&node];
        if first_mapping.position.offset == 0 {
            for &side in attachments {
                if !graph.has_edge(side, first.left_side()) {
                    graph.create_edge(side, first.left_side());
                    summary.edges_added += 1;
                }
            }
        } else {
            let boundary = to_forward(first_mapping.position.offset, len, is_reverse);
            let previous = if is_reverse {
                pieces
                    .starting_at(node, boundary)
                    .map(|id| Handle::new(id, true))
            } else {
                pieces
                    .ending_at(graph, node, boundary)
                    .map(Handle::forward)
            };
            if let Some(prev) = previous {
                if !graph.has_edge(prev.right_side(), first.left_side()) {
                    graph.connect(prev, first);
                    summary.edges_added += 1;
                }
            }
        }
    }

    let last_mapping = &aln.path[aln.path.len() - 1];
    let trails_with_novel = !aln.last_edit().is_some_and(|e| e.is_match());
    if let (true, Some(&last)) = (trails_with_novel, walk.last()) {
        let node = last_mapping.position.node;
        let is_reverse = last_mapping.position.is_reverse;
        let len = original_lengths[&node];
        let end = last_mapping.position.offset + last_mapping.from_length();
        if end < len {
            let boundary = to_forward(end, len, is_reverse);
            let next = if is_reverse {
                pieces
                    .ending_at(graph, node, boundary)
                    .map(|id| Handle::new(id, true))
            } else {
                pieces.starting_at(node, boundary).map(Handle::forward)
            };
            if let Some(next) = next {
                if !graph.has_edge(last.right_side(), next.left_side()) {
                    graph.connect(last, next);
                    summary.edges_added += 1;
                }
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{Edit, Mapping, Position};

    fn mapping(node: NodeId, offset: usize, is_reverse: bool, edits: Vec<Edit>) -> Mapping {
        Mapping {
            position: Position {
                node,
                offset,
                is_reverse,
            },
            edits,
        }
    }

    fn alignment(seq: &str, path: Vec<Mapping>) -> Alignment {
        Alignment {
            sequence: seq.as_bytes().to_vec(),
            path,
            score: 0,
        }
    }

    #[test]
    fn test_snp_at_node_start() {
        let mut g = Graph::new();
        let prev = g.create_node(b"TT".to_vec());
        let node = g.create_node(b"ACGT".to_vec());
        g.connect(Handle::forward(prev), Handle::forward(node));
        g.add_path("ref", vec![Handle::forward(prev), Handle::forward(node)]);

        let aln = alignment(
            "GCGT",
            vec![mapping(node, 0, false, vec![Edit::substitution(b"G".to_vec()), Edit::matched(3)])],
        );
        let attachments: BTreeSet<NodeSide> = [NodeSide::end(prev)].into_iter().collect();
        let summary = apply_alignment(&mut g, &aln, &attachments).unwrap();

        assert_eq!(summary.split_nodes, vec![node]);
        assert_eq!(summary.novel_nodes.len(), 1);
        let novel = summary.novel_nodes[0];
        let cgt = g.path("ref").unwrap()[2].node;
        assert_eq!(g.sequence(novel), Some(&b"G"[..]));
        assert_eq!(g.sequence(cgt), Some(&b"CGT"[..]));
        assert!(g.has_edge(NodeSide::end(novel), NodeSide::start(cgt)));
        assert!(g.has_edge(NodeSide::end(prev), NodeSide::start(novel)));
        assert_eq!(summary.edges_added, 2);
        assert_eq!(g.path_sequence("ref").unwrap(), b"TTACGT".to_vec());
    }

    #[test]
    fn test_insertion_inside_node() {
        let mut g = Graph::new();
        let node = g.create_node(b"AAAACCCC".to_vec());
        let aln = alignment(
            "AAAATTCCCC",
            vec![mapping(
                node,
                0,
                false,
                vec![Edit::matched(4), Edit::insertion(b"TT".to_vec()), Edit::matched(4)],
            )],
        );
        let summary = apply_alignment(&mut g, &aln, &BTreeSet::new()).unwrap();
        let novel = summary.novel_nodes[0];
        let right = g.successors(Handle::forward(node))
            .into_iter()
            .find(|h| h.node != novel)
            .unwrap();
        assert_eq!(g.sequence(node), Some(&b"AAAA"[..]));
        assert_eq!(g.sequence(right.node), Some(&b"CCCC"[..]));
        assert!(g.has_edge(NodeSide::end(node), NodeSide::start(novel)));
        assert!(g.has_edge(NodeSide::end(novel), NodeSide::start(right.node)));
    }

    #[test]
    fn test_deletion_adds_skip_edge() {
        let mut g = Graph::new();
        let node = g.create_node(b"AACCGG".to_vec());
        let aln = alignment(
            "AAGG",
            vec![mapping(
                node,
                0,
                false,
                vec![Edit::matched(2), Edit::deletion(2), Edit::matched(2)],
            )],
        );
        let summary = apply_alignment(&mut g, &aln, &BTreeSet::new()).unwrap();
        assert!(summary.novel_nodes.is_empty());
        assert_eq!(g.node_count(), 3);
        let last = g
            .node_ids()
            .find(|&id| g.sequence(id) == Some(&b"GG"[..]))
            .unwrap();
        assert!(g.has_edge(NodeSide::end(node), NodeSide::start(last)));
        assert_eq!(summary.edges_added, 1);
    }

    #[test]
    fn test_reverse_mapping_substitution() {
        let mut g = Graph::new();
        let node = g.create_node(b"AACC".to_vec());
        // Reverse strand reads GGTT; substitute the second base
        let aln = alignment(
            "GATT",
            vec![mapping(
                node,
                0,
                true,
                vec![Edit::matched(1), Edit::substitution(b"A".to_vec()), Edit::matched(2)],
            )],
        );
        let summary = apply_alignment(&mut g, &aln, &BTreeSet::new()).unwrap();
        let novel = summary.novel_nodes[0];
        assert_eq!(g.sequence(novel), Some(&b"T"[..]));
        assert_eq!(g.node_count(), 4);
        // Forward pieces: AA (original id), C, C
        assert_eq!(g.sequence(node), Some(&b"AA"[..]));
        let walk_end = Handle::new(node, true);
        assert!(g.predecessors(walk_end).contains(&Handle::new(novel, true)));
    }

    #[test]
    fn test_novel_start_mid_node_attaches_to_previous_piece() {
        let mut g = Graph::new();
        let node = g.create_node(b"AAAACCCC".to_vec());
        let aln = alignment(
            "TCCC",
            vec![mapping(
                node,
                4,
                false,
                vec![Edit::substitution(b"T".to_vec()), Edit::matched(3)],
            )],
        );
        let summary = apply_alignment(&mut g, &aln, &BTreeSet::new()).unwrap();
        let novel = summary.novel_nodes[0];
        assert!(g.has_edge(NodeSide::end(node), NodeSide::start(novel)));
        assert_eq!(g.sequence(node), Some(&b"AAAA"[..]));
    }

    #[test]
    fn test_overrunning_mapping_is_rejected() {
        let mut g = Graph::new();
        let node = g.create_node(b"AC".to_vec());
        let aln = alignment("ACG", vec![mapping(node, 0, false, vec![Edit::matched(3)])]);
        let err = apply_alignment(&mut g, &aln, &BTreeSet::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
