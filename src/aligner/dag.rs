use super::{AlignOutcome, Band, GraphAligner, Pin, ScoringParams};
use crate::alignment::{simplify, Alignment, Edit, Mapping, Position};
use crate::graph::{Graph, Handle, NodeId};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

const NEG: i32 = i32::MIN / 4;

/// Base-level view of a graph in a single orientation, topologically sorted.
/// Edges that would reverse orientation, or that close a cycle, are dropped.
pub struct BaseDag {
    handles: Vec<Handle>,
    handle_of: Vec<usize>,
    offset_of: Vec<usize>,
    bases: Vec<u8>,
    preds: Vec<Vec<usize>>,
    succs: Vec<Vec<usize>>,
    min_dist: Vec<usize>,
    max_dist: Vec<usize>,
    starts: Vec<bool>,
    ends: Vec<bool>,
}

impl BaseDag {
    pub fn build(graph: &Graph, pin: Pin, max_span: usize) -> Self {
        let oriented = match pin {
            Pin::None => orient_all(graph),
            Pin::Start(h) => orient_from(graph, h, max_span, true),
            Pin::End(h) => orient_from(graph, h, max_span, false),
        };

        // Handle-level adjacency restricted to the chosen orientation
        let mut candidates: Vec<Handle> = oriented
            .iter()
            .map(|(&node, &is_reverse)| Handle::new(node, is_reverse))
            .collect();
        candidates.sort_unstable();
        if let Pin::Start(h) = pin {
            if let Some(pos) = candidates.iter().position(|&c| c == h) {
                let pinned = candidates.remove(pos);
                candidates.insert(0, pinned);
            }
        }
        let succ_of: FxHashMap<Handle, Vec<Handle>> = candidates
            .iter()
            .map(|&h| {
                let next: Vec<Handle> = graph
                    .successors(h)
                    .into_iter()
                    .filter(|s| *s != h && oriented.get(&s.node) == Some(&s.is_reverse))
                    .collect();
                (h, next)
            })
            .collect();

        let order = topological_order(&candidates, &succ_of);
        let rank: FxHashMap<Handle, usize> =
            order.iter().enumerate().map(|(r, &h)| (h, r)).collect();

        let mut handle_preds: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
        let mut has_forward_succ = vec![false; order.len()];
        for (r, h) in order.iter().enumerate() {
            for s in &succ_of[h] {
                let sr = rank[s];
                if sr > r {
                    handle_preds[sr].push(r);
                    has_forward_succ[r] = true;
                }
            }
        }

        let mut dag = BaseDag {
            handles: order.clone(),
            handle_of: Vec::new(),
            offset_of: Vec::new(),
            bases: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            min_dist: Vec::new(),
            max_dist: Vec::new(),
            starts: Vec::new(),
            ends: Vec::new(),
        };

        let mut last_base: Vec<Option<usize>> = vec![None; order.len()];
        for (r, &h) in order.iter().enumerate() {
            let seq = graph.handle_sequence(h);
            let len = seq.len();
            for (offset, base) in seq.into_iter().enumerate() {
                let idx = dag.bases.len();
                let preds: Vec<usize> = if offset > 0 {
                    vec![idx - 1]
                } else {
                    handle_preds[r].iter().filter_map(|&p| last_base[p]).collect()
                };
                let is_source = handle_preds[r].is_empty();
                let is_sink = !has_forward_succ[r];
                let start = match pin {
                    Pin::None => offset == 0 && is_source,
                    Pin::Start(p) => offset == 0 && h == p,
                    Pin::End(_) => true,
                };
                let end = match pin {
                    Pin::None => offset + 1 == len && is_sink,
                    Pin::Start(_) => true,
                    Pin::End(p) => offset + 1 == len && h == p,
                };
                let (min_d, max_d) = if preds.is_empty() {
                    (0, 0)
                } else {
                    (
                        preds.iter().map(|&p| dag.min_dist[p] + 1).min().unwrap_or(0),
                        preds.iter().map(|&p| dag.max_dist[p] + 1).max().unwrap_or(0),
                    )
                };
                dag.handle_of.push(r);
                dag.offset_of.push(offset);
                dag.bases.push(base);
                dag.preds.push(preds);
                dag.min_dist.push(min_d);
                dag.max_dist.push(max_d);
                dag.starts.push(start);
                dag.ends.push(end);
            }
            if len > 0 {
                last_base[r] = Some(dag.bases.len() - 1);
            }
        }

        dag.succs = vec![Vec::new(); dag.bases.len()];
        for (j, preds) in dag.preds.iter().enumerate() {
            for &p in preds {
                dag.succs[p].push(j);
            }
        }
        dag
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn base(&self, j: usize) -> u8 {
        self.bases[j]
    }

    pub fn successors(&self, j: usize) -> &[usize] {
        &self.succs[j]
    }

    /// Fewest graph bases preceding `j` on any walk from a source.
    pub fn min_dist(&self, j: usize) -> usize {
        self.min_dist[j]
    }

    /// Shortest and longest source-to-sink walk lengths, in bases.
    pub fn total_lengths(&self) -> (usize, usize) {
        let mut min_total = usize::MAX;
        let mut max_total = 0;
        for j in (0..self.len()).filter(|&j| self.ends[j]) {
            min_total = min_total.min(self.min_dist[j] + 1);
            max_total = max_total.max(self.max_dist[j] + 1);
        }
        if min_total == usize::MAX {
            (0, 0)
        } else {
            (min_total, max_total)
        }
    }

    fn position(&self, j: usize) -> Position {
        let handle = self.handles[self.handle_of[j]];
        Position {
            node: handle.node,
            offset: self.offset_of[j],
            is_reverse: handle.is_reverse,
        }
    }
}

/// Orientation for every node, propagated outward from the lowest id of each
/// connected component. The first orientation reached wins.
fn orient_all(graph: &Graph) -> FxHashMap<NodeId, bool> {
    let mut oriented: FxHashMap<NodeId, bool> = FxHashMap::default();
    for id in graph.node_ids() {
        if oriented.contains_key(&id) {
            continue;
        }
        oriented.insert(id, false);
        let mut queue = VecDeque::from([Handle::forward(id)]);
        while let Some(h) = queue.pop_front() {
            for next in graph
                .successors(h)
                .into_iter()
                .chain(graph.predecessors(h))
            {
                if !oriented.contains_key(&next.node) {
                    oriented.insert(next.node, next.is_reverse);
                    queue.push_back(next);
                }
            }
        }
    }
    oriented
}

/// Nodes reachable from `pin` (forward when `downstream`, else upstream)
/// within `max_span` bases, each with the orientation it was reached in.
fn orient_from(
    graph: &Graph,
    pin: Handle,
    max_span: usize,
    downstream: bool,
) -> FxHashMap<NodeId, bool> {
    let mut oriented: FxHashMap<NodeId, bool> = FxHashMap::default();
    let mut dist: FxHashMap<NodeId, usize> = FxHashMap::default();
    if !graph.has_node(pin.node) {
        return oriented;
    }
    oriented.insert(pin.node, pin.is_reverse);
    dist.insert(pin.node, 0);
    let mut heap = BinaryHeap::from([Reverse((0usize, pin))]);

    while let Some(Reverse((d, h))) = heap.pop() {
        if dist.get(&h.node).is_some_and(|&best| best < d) {
            continue;
        }
        let next_dist = d + graph.node_len(h.node);
        if next_dist > max_span {
            continue;
        }
        let neighbors = if downstream {
            graph.successors(h)
        } else {
            graph.predecessors(h)
        };
        for next in neighbors {
            match oriented.get(&next.node) {
                Some(&rev) if rev != next.is_reverse => continue,
                _ => {}
            }
            if dist.get(&next.node).is_some_and(|&best| best <= next_dist) {
                continue;
            }
            oriented.insert(next.node, next.is_reverse);
            dist.insert(next.node, next_dist);
            heap.push(Reverse((next_dist, next)));
        }
    }
    oriented
}

/// Kahn's algorithm. When only cycles remain, the first unplaced candidate is
/// forced into the order and its remaining incoming edges become back edges.
fn topological_order(
    candidates: &[Handle],
    succ_of: &FxHashMap<Handle, Vec<Handle>>,
) -> Vec<Handle> {
    let mut indegree: FxHashMap<Handle, usize> = candidates.iter().map(|&h| (h, 0)).collect();
    for h in candidates {
        for s in &succ_of[h] {
            if let Some(d) = indegree.get_mut(s) {
                *d += 1;
            }
        }
    }

    let mut placed: FxHashMap<Handle, bool> = FxHashMap::default();
    let mut ready: VecDeque<Handle> = candidates
        .iter()
        .copied()
        .filter(|h| indegree[h] == 0)
        .collect();
    let mut order = Vec::with_capacity(candidates.len());
    let mut cursor = 0;

    while order.len() < candidates.len() {
        let h = match ready.pop_front() {
            Some(h) => h,
            None => {
                while placed.contains_key(&candidates[cursor]) {
                    cursor += 1;
                }
                candidates[cursor]
            }
        };
        if placed.insert(h, true).is_some() {
            continue;
        }
        order.push(h);
        for s in &succ_of[&h] {
            if placed.contains_key(s) {
                continue;
            }
            if let Some(d) = indegree.get_mut(s) {
                *d = d.saturating_sub(1);
                if *d == 0 {
                    ready.push_back(*s);
                }
            }
        }
    }
    order
}

/// One column of the DP: rows `lo..lo + h.len()` of the three Gotoh matrices
/// for a single graph base.
struct Column {
    lo: usize,
    h: Vec<i32>,
    e: Vec<i32>,
    f: Vec<i32>,
}

impl Column {
    fn get(&self, v: &[i32], i: usize) -> i32 {
        if i < self.lo {
            return NEG;
        }
        v.get(i - self.lo).copied().unwrap_or(NEG)
    }

    fn h(&self, i: usize) -> i32 {
        self.get(&self.h, i)
    }

    fn e(&self, i: usize) -> i32 {
        self.get(&self.e, i)
    }

    fn f(&self, i: usize) -> i32 {
        self.get(&self.f, i)
    }
}

enum Op {
    Aligned(usize, usize),
    Insert(usize),
    Delete(usize),
}

#[derive(Clone, Copy)]
enum State {
    H,
    E,
    F,
}

/// Gotoh alignment over a `BaseDag`. Traceback prefers diagonal moves, then
/// insertions, then deletions, which places gaps leftmost.
pub struct DagAligner;

impl DagAligner {
    pub fn align_to_dag(
        &self,
        dag: &BaseDag,
        read: &[u8],
        band: Band,
        scoring: &ScoringParams,
    ) -> AlignOutcome {
        let n = read.len();
        if n == 0 || dag.is_empty() {
            return AlignOutcome::NoPathInBand;
        }
        let open = scoring.gap_open;
        let ext = scoring.gap_extension;
        let source = |i: usize| -> i32 {
            if i == 0 {
                0
            } else {
                (-scoring.gap(i)).max(NEG as i64) as i32
            }
        };

        let (lo, hi) = match band {
            Band::Unbanded => (i64::MIN / 2, i64::MAX / 2),
            Band::Padded(pad) => {
                let (min_total, max_total) = dag.total_lengths();
                let pad = pad as i64;
                (
                    -(pad + (max_total as i64 - n as i64).max(0)),
                    pad + (n as i64 - min_total as i64).max(0),
                )
            }
            Band::Offsets { lo, hi } => (lo, hi),
        };

        let mut columns: Vec<Column> = Vec::with_capacity(dag.len());
        for j in 0..dag.len() {
            let raw_first = dag.min_dist[j] as i64 + 1 + lo;
            let raw_last = dag.max_dist[j] as i64 + 1 + hi;
            if raw_first > n as i64 || raw_last < 0 || raw_first > raw_last {
                columns.push(Column { lo: 0, h: Vec::new(), e: Vec::new(), f: Vec::new() });
                continue;
            }
            let first = raw_first.max(0) as usize;
            let last = raw_last.min(n as i64) as usize;
            let width = last - first + 1;
            let mut col = Column {
                lo: first,
                h: vec![NEG; width],
                e: vec![NEG; width],
                f: vec![NEG; width],
            };
            for i in first..=last {
                let k = i - first;
                let e = if i > 0 && k > 0 {
                    (col.h[k - 1] - open).max(col.e[k - 1] - ext)
                } else {
                    NEG
                };
                let mut f = NEG;
                for &p in &dag.preds[j] {
                    f = f.max(columns[p].h(i) - open).max(columns[p].f(i) - ext);
                }
                if dag.starts[j] {
                    f = f.max(source(i) - open);
                }
                let mut m = NEG;
                if i > 0 {
                    let s = scoring.substitution(read[i - 1], dag.bases[j]);
                    for &p in &dag.preds[j] {
                        m = m.max(columns[p].h(i - 1) + s);
                    }
                    if dag.starts[j] {
                        m = m.max(source(i - 1) + s);
                    }
                }
                col.e[k] = e.max(NEG);
                col.f[k] = f.max(NEG);
                col.h[k] = m.max(e).max(f).max(NEG);
            }
            columns.push(col);
        }

        let mut best: Option<(i32, usize)> = None;
        for j in (0..dag.len()).filter(|&j| dag.ends[j]) {
            let score = columns[j].h(n);
            if score > NEG / 2 && best.map_or(true, |(b, _)| score > b) {
                best = Some((score, j));
            }
        }
        let Some((score, end)) = best else {
            return AlignOutcome::NoPathInBand;
        };

        let ops = traceback(dag, &columns, read, end, scoring);
        AlignOutcome::Found(build_alignment(dag, read, &ops, score as i64))
    }
}

fn traceback(
    dag: &BaseDag,
    columns: &[Column],
    read: &[u8],
    end: usize,
    scoring: &ScoringParams,
) -> Vec<Op> {
    let open = scoring.gap_open;
    let ext = scoring.gap_extension;
    let source = |i: usize| -> i32 {
        if i == 0 {
            0
        } else {
            (-scoring.gap(i)).max(NEG as i64) as i32
        }
    };

    let mut ops = Vec::new();
    let (mut i, mut j, mut state) = (read.len(), end, State::H);
    let leading;
    loop {
        match state {
            State::H => {
                let h = columns[j].h(i);
                if i > 0 {
                    let s = scoring.substitution(read[i - 1], dag.bases[j]);
                    if let Some(&p) = dag.preds[j]
                        .iter()
                        .find(|&&p| columns[p].h(i - 1) > NEG / 2 && columns[p].h(i - 1) + s == h)
                    {
                        ops.push(Op::Aligned(j, i - 1));
                        i -= 1;
                        j = p;
                        continue;
                    }
                    if dag.starts[j] && source(i - 1) + s == h {
                        ops.push(Op::Aligned(j, i - 1));
                        leading = i - 1;
                        break;
                    }
                }
                state = if i > 0 && h == columns[j].e(i) {
                    State::E
                } else {
                    State::F
                };
            }
            State::E => {
                let e = columns[j].e(i);
                ops.push(Op::Insert(i - 1));
                state = if e == columns[j].h(i - 1) - open {
                    State::H
                } else {
                    State::E
                };
                i -= 1;
            }
            State::F => {
                let f = columns[j].f(i);
                ops.push(Op::Delete(j));
                let mut next = None;
                for &p in &dag.preds[j] {
                    if columns[p].h(i) > NEG / 2 && columns[p].h(i) - open == f {
                        next = Some((p, State::H));
                        break;
                    }
                    if columns[p].f(i) > NEG / 2 && columns[p].f(i) - ext == f {
                        next = Some((p, State::F));
                        break;
                    }
                }
                match next {
                    Some((p, s)) => {
                        j = p;
                        state = s;
                    }
                    None => {
                        leading = i;
                        break;
                    }
                }
            }
        }
    }
    for r in (0..leading).rev() {
        ops.push(Op::Insert(r));
    }
    ops.reverse();
    ops
}

fn build_alignment(dag: &BaseDag, read: &[u8], ops: &[Op], score: i64) -> Alignment {
    let mut path: Vec<Mapping> = Vec::new();
    let mut pending: Vec<Edit> = Vec::new();
    let mut last_base: Option<usize> = None;

    for op in ops {
        let (j, edit) = match *op {
            Op::Insert(r) => {
                let edit = Edit::insertion(vec![read[r]]);
                match path.last_mut() {
                    Some(mapping) => mapping.edits.push(edit),
                    None => pending.push(edit),
                }
                continue;
            }
            Op::Aligned(j, r) => {
                if read[r].eq_ignore_ascii_case(&dag.bases[j]) {
                    (j, Edit::matched(1))
                } else {
                    (j, Edit::substitution(vec![read[r]]))
                }
            }
            Op::Delete(j) => (j, Edit::deletion(1)),
        };
        let contiguous = last_base
            .is_some_and(|prev| j == prev + 1 && dag.handle_of[j] == dag.handle_of[prev]);
        if contiguous {
            if let Some(mapping) = path.last_mut() {
                mapping.edits.push(edit);
            }
        } else {
            let mut edits = std::mem::take(&mut pending);
            edits.push(edit);
            path.push(Mapping {
                position: dag.position(j),
                edits,
            });
        }
        last_base = Some(j);
    }

    simplify(&Alignment {
        sequence: read.to_vec(),
        path,
        score,
    })
}

impl GraphAligner for DagAligner {
    fn align(
        &self,
        sequence: &[u8],
        graph: &Graph,
        pin: Pin,
        band: Band,
        max_span: usize,
        scoring: &ScoringParams,
    ) -> AlignOutcome {
        let dag = BaseDag::build(graph, pin, max_span);
        let band = match pin {
            Pin::None => band,
            _ => Band::Unbanded,
        };
        self.align_to_dag(&dag, sequence, band, scoring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(seq: &str) -> Graph {
        let mut g = Graph::new();
        g.create_node(seq.as_bytes().to_vec());
        g
    }

    fn chain(seqs: &[&str]) -> Graph {
        let mut g = Graph::new();
        let ids: Vec<NodeId> = seqs.iter().map(|s| g.create_node(s.as_bytes().to_vec())).collect();
        for w in ids.windows(2) {
            g.connect(Handle::forward(w[0]), Handle::forward(w[1]));
        }
        g
    }

    fn align(g: &Graph, read: &str, pin: Pin, band: Band) -> AlignOutcome {
        DagAligner.align(read.as_bytes(), g, pin, band, usize::MAX, &ScoringParams::default())
    }

    #[test]
    fn test_exact_match() {
        let g = chain(&["ACGT", "GGCC"]);
        let aln = align(&g, "ACGTGGCC", Pin::None, Band::Unbanded).found().unwrap();
        assert_eq!(aln.score, 8);
        assert_eq!(aln.path.len(), 2);
        assert_eq!(aln.path[0].edits, vec![Edit::matched(4)]);
        assert_eq!(aln.path[1].position.node, 2);
    }

    #[test]
    fn test_insertion() {
        let g = single("AAAACCCCGGGG");
        let aln = align(&g, "AAAACCTCCGGGG", Pin::None, Band::Unbanded).found().unwrap();
        assert_eq!(aln.score, 6);
        assert_eq!(
            aln.path[0].edits,
            vec![Edit::matched(6), Edit::insertion(b"T".to_vec()), Edit::matched(6)]
        );
    }

    #[test]
    fn test_deletion_is_left_shifted() {
        let g = single("AAAACCCCGGGG");
        let aln = align(&g, "AAAACCCGGGG", Pin::None, Band::Unbanded).found().unwrap();
        assert_eq!(aln.score, 5);
        assert_eq!(
            aln.path[0].edits,
            vec![Edit::matched(4), Edit::deletion(1), Edit::matched(7)]
        );
    }

    #[test]
    fn test_bubble_takes_matching_branch() {
        let mut g = Graph::new();
        let a = g.create_node(b"AAAA".to_vec());
        let c = g.create_node(b"C".to_vec());
        let gg = g.create_node(b"G".to_vec());
        let t = g.create_node(b"TTTT".to_vec());
        for (x, y) in [(a, c), (a, gg), (c, t), (gg, t)] {
            g.connect(Handle::forward(x), Handle::forward(y));
        }
        let aln = align(&g, "AAAAGTTTT", Pin::None, Band::Padded(2)).found().unwrap();
        assert_eq!(aln.score, 9);
        let nodes: Vec<NodeId> = aln.path.iter().map(|m| m.position.node).collect();
        assert_eq!(nodes, vec![a, gg, t]);
    }

    #[test]
    fn test_pinned_start_and_end() {
        let g = chain(&["AAAA", "CCGG", "TTTT"]);
        let aln = align(&g, "CCGGT", Pin::Start(Handle::forward(2)), Band::Unbanded)
            .found()
            .unwrap();
        assert_eq!(aln.score, 5);
        assert!(aln.starts_with_match_on(Handle::forward(2)));
        assert_eq!(aln.path[1].position, Position { node: 3, offset: 0, is_reverse: false });

        let aln = align(&g, "AACCGG", Pin::End(Handle::forward(2)), Band::Unbanded)
            .found()
            .unwrap();
        assert_eq!(aln.score, 6);
        assert!(aln.ends_with_match_on(&g, Handle::forward(2)));
        assert_eq!(aln.path[0].position, Position { node: 1, offset: 2, is_reverse: false });
    }

    #[test]
    fn test_pinned_reverse_handle() {
        let g = single("AACC");
        let aln = align(&g, "GGT", Pin::Start(Handle::new(1, true)), Band::Unbanded)
            .found()
            .unwrap();
        assert_eq!(aln.score, 3);
        assert_eq!(aln.path[0].position, Position { node: 1, offset: 0, is_reverse: true });
    }

    #[test]
    fn test_max_span_limits_reach() {
        let g = chain(&["AAAA", "CCGG", "TTTT"]);
        let dag = BaseDag::build(&g, Pin::Start(Handle::forward(2)), 3);
        assert_eq!(dag.len(), 4);
        let dag = BaseDag::build(&g, Pin::Start(Handle::forward(2)), 8);
        assert_eq!(dag.len(), 8);
    }

    #[test]
    fn test_band_too_narrow() {
        let g = single("AAAACCCCGGGG");
        let outcome = align(&g, "AAAACCTTTCCGGGG", Pin::None, Band::Offsets { lo: 0, hi: 0 });
        assert_eq!(outcome, AlignOutcome::NoPathInBand);
        let outcome = align(&g, "AAAACCTTTCCGGGG", Pin::None, Band::Padded(1));
        assert!(outcome.found().is_some());
    }

    #[test]
    fn test_cycle_is_broken() {
        let mut g = chain(&["ACG", "TTT"]);
        g.connect(Handle::forward(2), Handle::forward(1));
        let aln = align(&g, "ACGTTT", Pin::None, Band::Unbanded).found().unwrap();
        assert_eq!(aln.score, 6);
    }
}
