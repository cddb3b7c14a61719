use crate::graph::{reverse_complement, Graph, Handle, NodeId, NodeSide};

/// Oriented position within a node. `offset` counts along the orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub node: NodeId,
    pub offset: usize,
    pub is_reverse: bool,
}

impl Position {
    pub fn handle(&self) -> Handle {
        Handle::new(self.node, self.is_reverse)
    }
}

/// One edit of a mapping: a match has equal lengths and an empty sequence, a
/// substitution equal lengths and a sequence, an insertion `from_length == 0`,
/// a deletion `to_length == 0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edit {
    pub from_length: usize,
    pub to_length: usize,
    pub sequence: Vec<u8>,
}

impl Edit {
    pub fn matched(len: usize) -> Self {
        Edit {
            from_length: len,
            to_length: len,
            sequence: Vec::new(),
        }
    }

    pub fn substitution(sequence: Vec<u8>) -> Self {
        Edit {
            from_length: sequence.len(),
            to_length: sequence.len(),
            sequence,
        }
    }

    pub fn insertion(sequence: Vec<u8>) -> Self {
        Edit {
            from_length: 0,
            to_length: sequence.len(),
            sequence,
        }
    }

    pub fn deletion(len: usize) -> Self {
        Edit {
            from_length: len,
            to_length: 0,
            sequence: Vec::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.from_length == self.to_length && self.sequence.is_empty()
    }

    pub fn is_insertion(&self) -> bool {
        self.from_length == 0 && self.to_length > 0
    }

    pub fn is_deletion(&self) -> bool {
        self.to_length == 0 && self.from_length > 0
    }

    fn same_kind(&self, other: &Edit) -> bool {
        (self.is_match() && other.is_match())
            || (self.is_insertion() && other.is_insertion())
            || (self.is_deletion() && other.is_deletion())
            || (!self.is_match()
                && !other.is_match()
                && self.from_length == self.to_length
                && other.from_length == other.to_length)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub position: Position,
    pub edits: Vec<Edit>,
}

impl Mapping {
    pub fn from_length(&self) -> usize {
        self.edits.iter().map(|e| e.from_length).sum()
    }

    pub fn to_length(&self) -> usize {
        self.edits.iter().map(|e| e.to_length).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Alignment {
    pub sequence: Vec<u8>,
    pub path: Vec<Mapping>,
    pub score: i64,
}

impl Alignment {
    pub fn first_edit(&self) -> Option<&Edit> {
        self.path.first().and_then(|m| m.edits.first())
    }

    pub fn last_edit(&self) -> Option<&Edit> {
        self.path.last().and_then(|m| m.edits.last())
    }

    /// Read bases consumed by the path.
    pub fn to_length(&self) -> usize {
        self.path.iter().map(Mapping::to_length).sum()
    }

    /// Graph bases covered by the path.
    pub fn from_length(&self) -> usize {
        self.path.iter().map(Mapping::from_length).sum()
    }

    /// Side of the graph through which the alignment enters its first node.
    pub fn leading_side(&self) -> Option<NodeSide> {
        self.path.first().map(|m| m.position.handle().left_side())
    }

    /// Whether the alignment starts with a match at the very beginning of the
    /// given handle.
    pub fn starts_with_match_on(&self, handle: Handle) -> bool {
        self.path.first().is_some_and(|m| {
            m.position.handle() == handle
                && m.position.offset == 0
                && m.edits.first().is_some_and(Edit::is_match)
        })
    }

    /// Whether the alignment ends with a match on the last base of the given
    /// handle.
    pub fn ends_with_match_on(&self, graph: &Graph, handle: Handle) -> bool {
        self.path.last().is_some_and(|m| {
            m.position.handle() == handle
                && m.position.offset + m.from_length() == graph.node_len(handle.node)
                && m.edits.last().is_some_and(Edit::is_match)
        })
    }
}

/// Express an alignment of `rc(read)` as an alignment of `read`. Node lengths
/// come from `graph`.
pub fn reverse_complement_alignment(aln: &Alignment, graph: &Graph) -> Alignment {
    let path = aln
        .path
        .iter()
        .rev()
        .map(|m| {
            let node_len = graph.node_len(m.position.node);
            let edits = m
                .edits
                .iter()
                .rev()
                .map(|e| Edit {
                    from_length: e.from_length,
                    to_length: e.to_length,
                    sequence: reverse_complement(&e.sequence),
                })
                .collect();
            Mapping {
                position: Position {
                    node: m.position.node,
                    offset: node_len - m.position.offset - m.from_length(),
                    is_reverse: !m.position.is_reverse,
                },
                edits,
            }
        })
        .collect();
    Alignment {
        sequence: reverse_complement(&aln.sequence),
        path,
        score: aln.score,
    }
}

/// Drop the first `n` read bases from the alignment, along with any graph
/// bases consumed only by them.
pub fn strip_from_start(aln: &Alignment, n: usize) -> Alignment {
    let mut remaining = n;
    let mut path = Vec::new();
    for mapping in &aln.path {
        if remaining == 0 && !path.is_empty() {
            path.push(mapping.clone());
            continue;
        }
        let mut offset = mapping.position.offset;
        let mut edits = Vec::new();
        for edit in &mapping.edits {
            if remaining == 0 {
                if edits.is_empty() && edit.to_length == 0 {
                    // Leading deletions left over after the cut are dropped
                    offset += edit.from_length;
                    continue;
                }
                edits.push(edit.clone());
                continue;
            }
            if edit.to_length <= remaining {
                remaining -= edit.to_length;
                offset += edit.from_length;
                continue;
            }
            // Cut lands inside this edit
            let keep = edit.to_length - remaining;
            let consumed_from = if edit.from_length == edit.to_length {
                remaining
            } else {
                0
            };
            let from_length = edit.from_length - consumed_from;
            offset += consumed_from;
            let sequence = if edit.sequence.is_empty() {
                Vec::new()
            } else {
                edit.sequence[remaining..].to_vec()
            };
            remaining = 0;
            edits.push(Edit {
                from_length,
                to_length: keep,
                sequence,
            });
        }
        if !edits.is_empty() {
            path.push(Mapping {
                position: Position {
                    offset,
                    ..mapping.position
                },
                edits,
            });
        }
    }
    Alignment {
        sequence: aln.sequence[n.min(aln.sequence.len())..].to_vec(),
        path,
        score: aln.score,
    }
}

/// Drop the last `n` read bases from the alignment.
pub fn strip_from_end(aln: &Alignment, n: usize, graph: &Graph) -> Alignment {
    let flipped = reverse_complement_alignment(aln, graph);
    reverse_complement_alignment(&strip_from_start(&flipped, n), graph)
}

/// Join two alignments end to end. Scores add.
pub fn merge(left: &Alignment, right: &Alignment) -> Alignment {
    let mut sequence = left.sequence.clone();
    sequence.extend_from_slice(&right.sequence);
    let mut path = left.path.clone();
    path.extend(right.path.iter().cloned());
    simplify(&Alignment {
        sequence,
        path,
        score: left.score + right.score,
    })
}

/// Merge adjacent edits of the same kind and adjacent mappings that continue
/// on the same node. Empty edits and mappings are removed.
pub fn simplify(aln: &Alignment) -> Alignment {
    let mut path: Vec<Mapping> = Vec::with_capacity(aln.path.len());
    for mapping in &aln.path {
        let mut edits: Vec<Edit> = Vec::with_capacity(mapping.edits.len());
        for edit in &mapping.edits {
            if edit.from_length == 0 && edit.to_length == 0 {
                continue;
            }
            match edits.last_mut() {
                Some(prev) if prev.same_kind(edit) => {
                    prev.from_length += edit.from_length;
                    prev.to_length += edit.to_length;
                    prev.sequence.extend_from_slice(&edit.sequence);
                }
                _ => edits.push(edit.clone()),
            }
        }
        if edits.is_empty() {
            continue;
        }
        let mapping = Mapping {
            position: mapping.position,
            edits,
        };
        match path.last_mut() {
            Some(prev)
                if prev.position.node == mapping.position.node
                    && prev.position.is_reverse == mapping.position.is_reverse
                    && prev.position.offset + prev.from_length() == mapping.position.offset =>
            {
                for edit in mapping.edits {
                    match prev.edits.last_mut() {
                        Some(last) if last.same_kind(&edit) => {
                            last.from_length += edit.from_length;
                            last.to_length += edit.to_length;
                            last.sequence.extend_from_slice(&edit.sequence);
                        }
                        _ => prev.edits.push(edit),
                    }
                }
            }
            _ => path.push(mapping),
        }
    }
    Alignment {
        sequence: aln.sequence.clone(),
        path,
        score: aln.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_graph() -> Graph {
        let mut g = Graph::new();
        let a = g.create_node(b"ACGT".to_vec());
        let b = g.create_node(b"GGCC".to_vec());
        g.connect(Handle::forward(a), Handle::forward(b));
        g
    }

    fn exact(node: NodeId, offset: usize, len: usize) -> Mapping {
        Mapping {
            position: Position {
                node,
                offset,
                is_reverse: false,
            },
            edits: vec![Edit::matched(len)],
        }
    }

    #[test]
    fn test_edit_kinds() {
        assert!(Edit::matched(3).is_match());
        assert!(!Edit::substitution(b"A".to_vec()).is_match());
        assert!(Edit::insertion(b"AC".to_vec()).is_insertion());
        assert!(Edit::deletion(2).is_deletion());
    }

    #[test]
    fn test_reverse_complement_alignment() {
        let g = two_node_graph();
        let aln = Alignment {
            sequence: b"CGTGG".to_vec(),
            path: vec![exact(1, 1, 3), exact(2, 0, 2)],
            score: 5,
        };
        let rc = reverse_complement_alignment(&aln, &g);
        assert_eq!(rc.sequence, b"CCACG".to_vec());
        assert_eq!(rc.path[0].position, Position { node: 2, offset: 2, is_reverse: true });
        assert_eq!(rc.path[1].position, Position { node: 1, offset: 0, is_reverse: true });
        assert_eq!(reverse_complement_alignment(&rc, &g), aln);
    }

    #[test]
    fn test_strip_from_start_and_end() {
        let g = two_node_graph();
        let aln = Alignment {
            sequence: b"ACGTGGCC".to_vec(),
            path: vec![exact(1, 0, 4), exact(2, 0, 4)],
            score: 8,
        };
        let head = strip_from_start(&aln, 5);
        assert_eq!(head.sequence, b"GCC".to_vec());
        assert_eq!(head.path, vec![exact(2, 1, 3)]);

        let tail = strip_from_end(&aln, 2, &g);
        assert_eq!(tail.sequence, b"ACGTGG".to_vec());
        assert_eq!(tail.path, vec![exact(1, 0, 4), exact(2, 0, 2)]);
    }

    #[test]
    fn test_strip_drops_dangling_deletion() {
        let aln = Alignment {
            sequence: b"AT".to_vec(),
            path: vec![Mapping {
                position: Position { node: 1, offset: 0, is_reverse: false },
                edits: vec![Edit::matched(1), Edit::deletion(2), Edit::matched(1)],
            }],
            score: 0,
        };
        let stripped = strip_from_start(&aln, 1);
        assert_eq!(stripped.path[0].position.offset, 3);
        assert_eq!(stripped.path[0].edits, vec![Edit::matched(1)]);
    }

    #[test]
    fn test_merge_joins_contiguous_mappings() {
        let left = Alignment {
            sequence: b"AC".to_vec(),
            path: vec![exact(1, 0, 2)],
            score: 2,
        };
        let right = Alignment {
            sequence: b"GT".to_vec(),
            path: vec![exact(1, 2, 2)],
            score: 2,
        };
        let merged = merge(&left, &right);
        assert_eq!(merged.sequence, b"ACGT".to_vec());
        assert_eq!(merged.path, vec![exact(1, 0, 4)]);
        assert_eq!(merged.score, 4);
    }

    #[test]
    fn test_end_checks() {
        let g = two_node_graph();
        let aln = Alignment {
            sequence: b"ACGTGGCC".to_vec(),
            path: vec![exact(1, 0, 4), exact(2, 0, 4)],
            score: 8,
        };
        assert!(aln.starts_with_match_on(Handle::forward(1)));
        assert!(aln.ends_with_match_on(&g, Handle::forward(2)));
        assert!(!aln.ends_with_match_on(&g, Handle::forward(1)));
        assert_eq!(aln.to_length(), 8);
        assert_eq!(aln.leading_side(), Some(NodeSide::start(1)));
    }
}
