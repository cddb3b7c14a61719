use crate::aligner::{
    AlignOutcome, Band, DagAligner, FallbackMapper, GraphAligner, KmerMapper, Pin, ScoringParams,
};
use crate::alignment::{
    merge, reverse_complement_alignment, strip_from_end, strip_from_start, Alignment, Edit,
};
use crate::graph::{reverse_complement, Graph, Handle};
use log::debug;
use rustc_hash::FxHashSet;
use std::io;

/// Configuration for choosing how a haplotype sequence is aligned to a
/// locked subgraph.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Sequences and subgraphs under this size are aligned whole, unbanded.
    /// Default: 1024
    pub whole_alignment_cutoff: usize,

    /// Length of the prefix/suffix aligned at each boundary for larger cases.
    /// Default: 200
    pub pinned_tail_size: usize,

    /// Padding around the diagonal for the tightly banded attempt.
    /// Default: 20
    pub band_padding: usize,

    /// Fraction of the perfect score an alignment must exceed to be trusted.
    /// Default: 0.95
    pub min_score_factor: f64,

    /// K-mer length for the fallback index.
    /// Default: 16
    pub kmer_size: usize,

    /// Branch crossings allowed per k-mer (0 for no pruning).
    /// Default: 0
    pub edge_max: usize,

    pub scoring: ScoringParams,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            whole_alignment_cutoff: 1024,
            pinned_tail_size: 200,
            band_padding: 20,
            min_score_factor: 0.95,
            kmer_size: 16,
            edge_max: 0,
            scoring: ScoringParams::default(),
        }
    }
}

/// Which tier produced an alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    Whole,
    Banded,
    Mapped,
    Spliced,
}

pub struct Dispatched {
    pub alignment: Alignment,
    pub strategy: Strategy,
}

/// Lowest score an alignment of a single-variant window can have: every base
/// of the shorter of the two sequences matches and the length difference is
/// one gap. Never positive, so pure substitutions pass.
pub fn min_expected_score(range_len: usize, sequence_len: usize, scoring: &ScoringParams) -> i64 {
    let min_len = range_len.min(sequence_len) as i64;
    let max_len = range_len.max(sequence_len) as i64;
    let score = min_len * scoring.match_score as i64
        - scoring.gap_open as i64
        - (max_len - 1 - min_len) * scoring.gap_extension as i64;
    score.min(0)
}

/// Check the structural guarantees callers rely on before committing an
/// alignment: a non-empty path ending in a match, and starting in a match when
/// there is sequence before the variants.
pub fn check_alignment(aln: &Alignment, has_left_flank: bool) -> io::Result<()> {
    if aln.path.is_empty() {
        return Err(io::Error::other("Alignment has an empty path"));
    }
    if has_left_flank && !aln.first_edit().is_some_and(Edit::is_match) {
        return Err(io::Error::other(format!(
            "Alignment does not start with a match (first edit {:?})",
            aln.first_edit()
        )));
    }
    if !aln.last_edit().is_some_and(Edit::is_match) {
        return Err(io::Error::other(format!(
            "Alignment does not end with a match (last edit {:?})",
            aln.last_edit()
        )));
    }
    Ok(())
}

/// Multi-tier sequence-to-subgraph alignment.
pub struct AlignmentDispatcher<A: GraphAligner, M: FallbackMapper> {
    pub config: DispatchConfig,
    aligner: A,
    mapper: M,
}

impl AlignmentDispatcher<DagAligner, KmerMapper> {
    pub fn new(config: DispatchConfig) -> Self {
        let mapper = KmerMapper {
            kmer_size: config.kmer_size,
            edge_max: config.edge_max,
            band_padding: config.band_padding,
        };
        AlignmentDispatcher {
            config,
            aligner: DagAligner,
            mapper,
        }
    }
}

impl<A: GraphAligner, M: FallbackMapper> AlignmentDispatcher<A, M> {
    pub fn with_engines(config: DispatchConfig, aligner: A, mapper: M) -> Self {
        AlignmentDispatcher {
            config,
            aligner,
            mapper,
        }
    }

    fn threshold(&self, len: usize) -> f64 {
        len as f64 * self.config.scoring.match_score as f64 * self.config.min_score_factor
    }

    /// Align `sequence` to `subgraph`, whose path enters at `left` and leaves
    /// at `right`. `min_score`, when given, is a floor the small-case result
    /// must reach.
    pub fn smart_align(
        &self,
        sequence: &[u8],
        subgraph: &Graph,
        left: Handle,
        right: Handle,
        max_span: usize,
        min_score: Option<i64>,
    ) -> io::Result<Dispatched> {
        let scoring = &self.config.scoring;
        let cutoff = self.config.whole_alignment_cutoff;
        let graph_len = subgraph.total_length();

        if sequence.len() <= cutoff && graph_len < cutoff {
            let forward = self
                .aligner
                .align(sequence, subgraph, Pin::None, Band::Unbanded, max_span, scoring)
                .found();
            let rc = reverse_complement(sequence);
            let backward = self
                .aligner
                .align(&rc, subgraph, Pin::None, Band::Unbanded, max_span, scoring)
                .found();
            let alignment = match (forward, backward) {
                (Some(f), Some(b)) if b.score > f.score => {
                    reverse_complement_alignment(&b, subgraph)
                }
                (Some(f), _) => f,
                (None, Some(b)) => reverse_complement_alignment(&b, subgraph),
                (None, None) => {
                    return Err(io::Error::other(format!(
                        "No alignment of {} bp against a {} bp subgraph",
                        sequence.len(),
                        graph_len
                    )))
                }
            };
            if let Some(min) = min_score {
                if alignment.score < min {
                    return Err(io::Error::other(format!(
                        "Alignment score {} is below the minimum {} for a single variant",
                        alignment.score, min
                    )));
                }
            }
            debug!(
                "Aligned {} bp whole against {} bp, score {}",
                sequence.len(),
                graph_len,
                alignment.score
            );
            return Ok(Dispatched {
                alignment,
                strategy: Strategy::Whole,
            });
        }

        let tail = self.config.pinned_tail_size.min(sequence.len());
        let context_len = tail * 2;
        let left_context = context_around(subgraph, left, context_len);
        let right_context = context_around(subgraph, right, context_len);

        let left_tail = self.align_left_tail(&sequence[..tail], &left_context, left, context_len)?;
        let right_tail = self.align_right_tail(
            &sequence[sequence.len() - tail..],
            &right_context,
            right,
            context_len,
        )?;
        debug!(
            "Tail scores {} and {} for {} bp tails",
            left_tail.score, right_tail.score, tail
        );

        if left_tail.score as f64 > self.threshold(left_tail.sequence.len())
            && right_tail.score as f64 > self.threshold(right_tail.sequence.len())
        {
            let whole = self.threshold(sequence.len());
            match self.aligner.align(
                sequence,
                subgraph,
                Pin::None,
                Band::Padded(self.config.band_padding),
                max_span,
                scoring,
            ) {
                AlignOutcome::Found(aln) if aln.score as f64 > whole => {
                    return Ok(Dispatched {
                        alignment: aln,
                        strategy: Strategy::Banded,
                    });
                }
                AlignOutcome::Found(aln) => {
                    debug!("Banded alignment score {} not accepted", aln.score)
                }
                AlignOutcome::NoPathInBand => debug!("Band too narrow for {} bp", sequence.len()),
            }
            if let Some(aln) = self.mapper.map(sequence, subgraph, scoring) {
                if aln.score as f64 > whole {
                    return Ok(Dispatched {
                        alignment: aln,
                        strategy: Strategy::Mapped,
                    });
                }
                debug!("Mapped alignment score {} not accepted", aln.score);
            }
        }

        Ok(Dispatched {
            alignment: splice(sequence, &left_tail, &right_tail, &left_context),
            strategy: Strategy::Spliced,
        })
    }

    fn align_left_tail(
        &self,
        prefix: &[u8],
        context: &Graph,
        left: Handle,
        span: usize,
    ) -> io::Result<Alignment> {
        let scoring = &self.config.scoring;
        let first = self
            .aligner
            .align(prefix, context, Pin::Start(left), Band::Unbanded, span, scoring)
            .found();
        if let Some(aln) = &first {
            if aln.starts_with_match_on(left) {
                return Ok(aln.clone());
            }
        }
        let retry = self
            .aligner
            .align(
                &reverse_complement(prefix),
                context,
                Pin::End(left.flip()),
                Band::Unbanded,
                span,
                scoring,
            )
            .found()
            .map(|aln| reverse_complement_alignment(&aln, context));
        pick_tail(first, retry, |aln| aln.starts_with_match_on(left), "left")
    }

    fn align_right_tail(
        &self,
        suffix: &[u8],
        context: &Graph,
        right: Handle,
        span: usize,
    ) -> io::Result<Alignment> {
        let scoring = &self.config.scoring;
        let first = self
            .aligner
            .align(suffix, context, Pin::End(right), Band::Unbanded, span, scoring)
            .found();
        if let Some(aln) = &first {
            if aln.ends_with_match_on(context, right) {
                return Ok(aln.clone());
            }
        }
        let retry = self
            .aligner
            .align(
                &reverse_complement(suffix),
                context,
                Pin::Start(right.flip()),
                Band::Unbanded,
                span,
                scoring,
            )
            .found()
            .map(|aln| reverse_complement_alignment(&aln, context));
        pick_tail(first, retry, |aln| aln.ends_with_match_on(context, right), "right")
    }
}

/// The retry wins whenever it lands on the boundary; otherwise the better of
/// the two attempts is kept.
fn pick_tail<F>(
    first: Option<Alignment>,
    retry: Option<Alignment>,
    on_boundary: F,
    side: &str,
) -> io::Result<Alignment>
where
    F: Fn(&Alignment) -> bool,
{
    match (first, retry) {
        (_, Some(b)) if on_boundary(&b) => Ok(b),
        (Some(a), Some(b)) if b.score > a.score => Ok(b),
        (Some(a), _) => Ok(a),
        (None, Some(b)) => Ok(b),
        (None, None) => Err(io::Error::other(format!(
            "Could not align the {} tail to its boundary",
            side
        ))),
    }
}

/// Copy of the part of `subgraph` within `len` bases of `boundary`'s node.
fn context_around(subgraph: &Graph, boundary: Handle, len: usize) -> Graph {
    let nodes = subgraph.expand_context(&[boundary.node], len, &FxHashSet::default(), |_| false);
    subgraph.induced_subgraph(&nodes)
}

/// Combine two tail alignments into one alignment of `sequence`. Overlapping
/// tails are trimmed half from each side; a gap between them becomes an
/// insertion. The score is the sum of the tail scores.
pub fn splice(sequence: &[u8], left: &Alignment, right: &Alignment, graph: &Graph) -> Alignment {
    let overlap = left.sequence.len() as i64 + right.sequence.len() as i64 - sequence.len() as i64;
    if overlap >= 0 {
        let overlap = overlap as usize;
        let left = strip_from_end(left, overlap / 2, graph);
        let right = strip_from_start(right, overlap.div_ceil(2));
        merge(&left, &right)
    } else {
        let middle = &sequence[left.sequence.len()..sequence.len() - right.sequence.len()];
        let mut extended = left.clone();
        extended.sequence.extend_from_slice(middle);
        if let Some(last) = extended.path.last_mut() {
            last.edits.push(Edit::insertion(middle.to_vec()));
        }
        merge(&extended, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{Mapping, Position};

    /// Delegates to the DAG aligner but never finds a path in a padded band.
    struct NarrowBandAligner;

    impl GraphAligner for NarrowBandAligner {
        fn align(
            &self,
            sequence: &[u8],
            graph: &Graph,
            pin: Pin,
            band: Band,
            max_span: usize,
            scoring: &ScoringParams,
        ) -> AlignOutcome {
            match band {
                Band::Padded(_) => AlignOutcome::NoPathInBand,
                _ => DagAligner.align(sequence, graph, pin, band, max_span, scoring),
            }
        }
    }

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
    fn test_min_expected_score() {
        let scoring = ScoringParams::default();
        assert_eq!(min_expected_score(4, 4, &scoring), -1);
        assert_eq!(min_expected_score(1, 1, &scoring), -4);
        assert_eq!(min_expected_score(100, 103, &scoring), 0);
        assert_eq!(min_expected_score(20, 10, &scoring), -5);
    }

    #[test]
    fn test_small_case_snp_at_start() {
        let g = chain(&["ACGT"]);
        let dispatcher = AlignmentDispatcher::new(DispatchConfig::default());
        let min = min_expected_score(4, 4, &dispatcher.config.scoring);
        let result = dispatcher
            .smart_align(b"GCGT", &g, Handle::forward(1), Handle::forward(1), 4, Some(min))
            .unwrap();
        assert_eq!(result.strategy, Strategy::Whole);
        assert_eq!(result.alignment.score, -1);
        assert_eq!(
            result.alignment.path[0].edits,
            vec![Edit::substitution(b"G".to_vec()), Edit::matched(3)]
        );
        assert!(check_alignment(&result.alignment, false).is_ok());
        assert!(check_alignment(&result.alignment, true).is_err());
    }

    #[test]
    fn test_small_case_prefers_reverse_complement() {
        let g = chain(&["AACCGT"]);
        let dispatcher = AlignmentDispatcher::new(DispatchConfig::default());
        let read = reverse_complement(b"AACCGT");
        let result = dispatcher
            .smart_align(&read, &g, Handle::forward(1), Handle::forward(1), 6, None)
            .unwrap();
        assert_eq!(result.alignment.score, 6);
        assert_eq!(result.alignment.sequence, read);
        assert!(result.alignment.path[0].position.is_reverse);
        assert!(check_alignment(&result.alignment, true).is_ok());
    }

    #[test]
    fn test_large_case_banded() {
        let g = chain(&[LEFT, RIGHT]);
        let config = DispatchConfig {
            whole_alignment_cutoff: 8,
            pinned_tail_size: 10,
            ..Default::default()
        };
        let dispatcher = AlignmentDispatcher::new(config);
        let read = format!("{}{}", LEFT, RIGHT);
        let result = dispatcher
            .smart_align(read.as_bytes(), &g, Handle::forward(1), Handle::forward(2), 46, None)
            .unwrap();
        assert_eq!(result.strategy, Strategy::Banded);
        assert_eq!(result.alignment.score, 46);
        assert!(check_alignment(&result.alignment, true).is_ok());
    }

    #[test]
    fn test_large_case_falls_back_to_mapper() {
        let g = chain(&[LEFT, RIGHT]);
        let config = DispatchConfig {
            whole_alignment_cutoff: 8,
            pinned_tail_size: 10,
            kmer_size: 8,
            ..Default::default()
        };
        let mapper = KmerMapper {
            kmer_size: config.kmer_size,
            edge_max: config.edge_max,
            band_padding: config.band_padding,
        };
        let dispatcher = AlignmentDispatcher::with_engines(config, NarrowBandAligner, mapper);
        let read = format!("{}{}", LEFT, RIGHT);
        let result = dispatcher
            .smart_align(read.as_bytes(), &g, Handle::forward(1), Handle::forward(2), 46, None)
            .unwrap();
        assert_eq!(result.strategy, Strategy::Mapped);
        assert_eq!(result.alignment.score, 46);
        assert_eq!(result.alignment.sequence, read.as_bytes().to_vec());
        assert!(check_alignment(&result.alignment, true).is_ok());
    }

    #[test]
    fn test_left_tail_retries_on_reverse_boundary() {
        // The path walks node 1 backwards, spelling ACGTTGCA
        let mut g = Graph::new();
        let id = g.create_node(reverse_complement(b"ACGTTGCA"));
        let left = Handle::new(id, true);
        let dispatcher = AlignmentDispatcher::new(DispatchConfig::default());

        // The extra leading A makes the forward attempt open with an insertion
        let prefix = b"AACGTTGCA";
        let first = dispatcher
            .aligner
            .align(prefix, &g, Pin::Start(left), Band::Unbanded, 18, &dispatcher.config.scoring)
            .found()
            .unwrap();
        assert!(!first.starts_with_match_on(left));

        let tail = dispatcher.align_left_tail(prefix, &g, left, 18).unwrap();
        assert!(tail.starts_with_match_on(left));
        assert_eq!(tail.score, first.score);
        assert_eq!(tail.sequence, prefix.to_vec());
        assert_eq!(
            tail.path[0].edits,
            vec![Edit::matched(1), Edit::insertion(b"A".to_vec()), Edit::matched(7)]
        );
    }

    #[test]
    fn test_pick_tail_prefers_retry_on_boundary() {
        let at = |offset: usize, score: i64| Alignment {
            sequence: b"ACGT".to_vec(),
            path: vec![Mapping {
                position: Position {
                    node: 1,
                    offset,
                    is_reverse: false,
                },
                edits: vec![Edit::matched(4)],
            }],
            score,
        };
        let left = Handle::forward(1);
        let on_boundary = |aln: &Alignment| aln.starts_with_match_on(left);

        let tail = pick_tail(Some(at(2, 4)), Some(at(0, 1)), on_boundary, "left").unwrap();
        assert_eq!(tail.path[0].position.offset, 0);
        let tail = pick_tail(Some(at(2, 4)), Some(at(3, 1)), on_boundary, "left").unwrap();
        assert_eq!(tail.path[0].position.offset, 2);
        assert!(pick_tail(None, None, on_boundary, "left").is_err());
    }

    #[test]
    fn test_large_case_splices_long_insertion() {
        let g = chain(&[LEFT, RIGHT]);
        let config = DispatchConfig {
            whole_alignment_cutoff: 8,
            pinned_tail_size: 8,
            kmer_size: 8,
            ..Default::default()
        };
        let dispatcher = AlignmentDispatcher::new(config);
        let insert = "GGGGGGGGGGCCCCCCCCCCAAAAAAAAAA";
        let read = format!("{}{}{}", LEFT, insert, RIGHT);
        let result = dispatcher
            .smart_align(read.as_bytes(), &g, Handle::forward(1), Handle::forward(2), 76, None)
            .unwrap();
        assert_eq!(result.strategy, Strategy::Spliced);
        assert_eq!(result.alignment.score, 16);
        assert_eq!(result.alignment.sequence, read.as_bytes().to_vec());
        assert_eq!(result.alignment.to_length(), read.len());
        assert!(check_alignment(&result.alignment, true).is_ok());
    }

    #[test]
    fn test_splice_with_overlap() {
        let g = chain(&["ACGTACGTAC"]);
        let exact = |offset: usize, len: usize, seq: &str| Alignment {
            sequence: seq.as_bytes().to_vec(),
            path: vec![Mapping {
                position: Position {
                    node: 1,
                    offset,
                    is_reverse: false,
                },
                edits: vec![Edit::matched(len)],
            }],
            score: len as i64,
        };
        let left = exact(0, 6, "ACGTAC");
        let right = exact(4, 6, "ACGTAC");
        let spliced = splice(b"ACGTACGTAC", &left, &right, &g);
        assert_eq!(spliced.score, 12);
        assert_eq!(spliced.path.len(), 1);
        assert_eq!(spliced.path[0].edits, vec![Edit::matched(10)]);
        assert_eq!(spliced.sequence, b"ACGTACGTAC".to_vec());
    }

    #[test]
    fn test_check_alignment_rejects_empty() {
        assert!(check_alignment(&Alignment::default(), false).is_err());
    }
}
