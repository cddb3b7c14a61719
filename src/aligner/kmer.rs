use super::dag::{BaseDag, DagAligner};
use super::{AlignOutcome, Band, FallbackMapper, Pin, ScoringParams};
use crate::alignment::{reverse_complement_alignment, Alignment};
use crate::graph::{reverse_complement, Graph};
use log::debug;
use rustc_hash::FxHashMap;

/// Upper bound on the k-mers enumerated from a single graph base. Walks past
/// this many are abandoned even without edge pruning.
const MAX_KMERS_PER_BASE: usize = 256;

fn encode(base: u8) -> Option<u64> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Disposable k-mer index over a subgraph, used to find the diagonal band a
/// whole sequence should be aligned in.
pub struct KmerMapper {
    /// K-mer length, at most 32.
    pub kmer_size: usize,
    /// Stop a k-mer walk after crossing this many branching bases. 0 disables
    /// pruning.
    pub edge_max: usize,
    /// Padding added around the seeded diagonals.
    pub band_padding: usize,
}

impl Default for KmerMapper {
    fn default() -> Self {
        KmerMapper {
            kmer_size: 16,
            edge_max: 0,
            band_padding: 20,
        }
    }
}

struct KmerIndex {
    hits: FxHashMap<u64, Vec<usize>>,
}

impl KmerMapper {
    fn build_index(&self, dag: &BaseDag) -> KmerIndex {
        let k = self.kmer_size;
        let mut hits: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        for start in 0..dag.len() {
            let Some(first) = encode(dag.base(start)) else {
                continue;
            };
            let mut found = 0usize;
            // (base, depth, code, branches crossed)
            let mut stack = vec![(start, 1usize, first, 0usize)];
            while let Some((j, depth, code, branches)) = stack.pop() {
                if depth == k {
                    hits.entry(code).or_default().push(start);
                    found += 1;
                    if found >= MAX_KMERS_PER_BASE {
                        break;
                    }
                    continue;
                }
                let next = dag.successors(j);
                let branches = branches + usize::from(next.len() > 1);
                if self.edge_max > 0 && branches > self.edge_max {
                    continue;
                }
                for &s in next {
                    if let Some(bits) = encode(dag.base(s)) {
                        stack.push((s, depth + 1, (code << 2) | bits, branches));
                    }
                }
            }
        }
        for starts in hits.values_mut() {
            starts.sort_unstable();
            starts.dedup();
        }
        KmerIndex { hits }
    }

    /// Seeds as `(read offset, graph base)` pairs.
    fn seeds(&self, index: &KmerIndex, read: &[u8]) -> Vec<(usize, usize)> {
        let k = self.kmer_size;
        let mut seeds = Vec::new();
        if read.len() < k {
            return seeds;
        }
        let mask = if k == 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
        let mut code = 0u64;
        let mut valid = 0usize;
        for (i, &b) in read.iter().enumerate() {
            match encode(b) {
                Some(bits) => {
                    code = ((code << 2) | bits) & mask;
                    valid += 1;
                }
                None => {
                    valid = 0;
                    code = 0;
                }
            }
            if valid >= k {
                if let Some(starts) = index.hits.get(&code) {
                    let r = i + 1 - k;
                    seeds.extend(starts.iter().map(|&j| (r, j)));
                }
            }
        }
        seeds
    }
}

impl FallbackMapper for KmerMapper {
    fn map(&self, sequence: &[u8], graph: &Graph, scoring: &ScoringParams) -> Option<Alignment> {
        if self.kmer_size == 0 || self.kmer_size > 32 {
            return None;
        }
        let dag = BaseDag::build(graph, Pin::None, usize::MAX);
        let index = self.build_index(&dag);

        let forward = self.seeds(&index, sequence);
        let rc = reverse_complement(sequence);
        let backward = self.seeds(&index, &rc);
        debug!(
            "K-mer mapper: {} forward and {} reverse seeds over {} bases",
            forward.len(),
            backward.len(),
            dag.len()
        );

        let (read, seeds, is_rc) = if forward.len() >= backward.len() {
            (sequence.to_vec(), forward, false)
        } else {
            (rc, backward, true)
        };
        if seeds.is_empty() {
            return None;
        }

        let diagonals = seeds
            .iter()
            .map(|&(r, j)| r as i64 - dag.min_dist(j) as i64);
        let (lo, hi) = diagonals.fold((0i64, 0i64), |(lo, hi), d| (lo.min(d), hi.max(d)));
        let pad = self.band_padding as i64;
        let band = Band::Offsets {
            lo: lo - pad,
            hi: hi + pad,
        };

        match DagAligner.align_to_dag(&dag, &read, band, scoring) {
            AlignOutcome::Found(aln) if is_rc => Some(reverse_complement_alignment(&aln, graph)),
            AlignOutcome::Found(aln) => Some(aln),
            AlignOutcome::NoPathInBand => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Handle;

    fn chain(seqs: &[&str]) -> Graph {
        let mut g = Graph::new();
        let ids: Vec<u64> = seqs.iter().map(|s| g.create_node(s.as_bytes().to_vec())).collect();
        for w in ids.windows(2) {
            g.connect(Handle::forward(w[0]), Handle::forward(w[1]));
        }
        g
    }

    const LEFT: &str = "ACGTTGCATGCATCGATCGGATC";
    const RIGHT: &str = "TTAGCCGATAGCTAGGCTAACGT";

    #[test]
    fn test_maps_forward_sequence() {
        let g = chain(&[LEFT, RIGHT]);
        let mapper = KmerMapper {
            kmer_size: 8,
            ..Default::default()
        };
        let read = format!("{}{}", LEFT, RIGHT);
        let aln = mapper
            .map(read.as_bytes(), &g, &ScoringParams::default())
            .unwrap();
        assert_eq!(aln.score, read.len() as i64);
        assert!(!aln.path[0].position.is_reverse);
    }

    #[test]
    fn test_maps_reverse_complement_back_to_forward() {
        let g = chain(&[LEFT, RIGHT]);
        let mapper = KmerMapper {
            kmer_size: 8,
            ..Default::default()
        };
        let read = reverse_complement(format!("{}{}", LEFT, RIGHT).as_bytes());
        let aln = mapper.map(&read, &g, &ScoringParams::default()).unwrap();
        assert_eq!(aln.sequence, read);
        assert_eq!(aln.score, read.len() as i64);
        assert!(aln.path.iter().all(|m| m.position.is_reverse));
    }

    #[test]
    fn test_no_seeds() {
        let g = chain(&["AAAAAAAAAAAA"]);
        let mapper = KmerMapper {
            kmer_size: 8,
            ..Default::default()
        };
        assert!(mapper
            .map(b"CCCCCCCCCCCC", &g, &ScoringParams::default())
            .is_none());
    }

    #[test]
    fn test_edge_pruning_limits_index() {
        // Two bubbles in a row: ACGT (A|C) TT (G|C) AAAA
        let mut g = chain(&["ACGT", "A", "TT", "G", "AAAA"]);
        let first_alt = g.create_node(b"C".to_vec());
        g.connect(Handle::forward(1), Handle::forward(first_alt));
        g.connect(Handle::forward(first_alt), Handle::forward(3));
        let second_alt = g.create_node(b"C".to_vec());
        g.connect(Handle::forward(3), Handle::forward(second_alt));
        g.connect(Handle::forward(second_alt), Handle::forward(5));
        let dag = BaseDag::build(&g, Pin::None, usize::MAX);

        let open = KmerMapper { kmer_size: 6, edge_max: 0, band_padding: 0 };
        let pruned = KmerMapper { kmer_size: 6, edge_max: 1, band_padding: 0 };
        let open_count: usize = open.build_index(&dag).hits.values().map(Vec::len).sum();
        let pruned_count: usize = pruned.build_index(&dag).hits.values().map(Vec::len).sum();
        // Walks from the last T of ACGT cross both bubbles
        assert!(pruned_count < open_count);
        assert!(pruned_count > 0);
    }
}
