pub mod dag;
pub mod kmer;

use crate::alignment::Alignment;
use crate::graph::{Graph, Handle};

pub use dag::DagAligner;
pub use kmer::KmerMapper;

/// Affine gap scoring. A gap of length `L` costs `gap_open + (L - 1) * gap_extension`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoringParams {
    pub match_score: i32,
    pub mismatch: i32,
    pub gap_open: i32,
    pub gap_extension: i32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        ScoringParams {
            match_score: 1,
            mismatch: 4,
            gap_open: 6,
            gap_extension: 1,
        }
    }
}

impl ScoringParams {
    /// Score of aligning read base `a` against graph base `b`. `N` scores 0.
    pub fn substitution(&self, a: u8, b: u8) -> i32 {
        let (a, b) = (a.to_ascii_uppercase(), b.to_ascii_uppercase());
        if a == b'N' || b == b'N' {
            0
        } else if a == b {
            self.match_score
        } else {
            -self.mismatch
        }
    }

    pub fn gap(&self, len: usize) -> i64 {
        if len == 0 {
            0
        } else {
            self.gap_open as i64 + (len as i64 - 1) * self.gap_extension as i64
        }
    }
}

/// Where an alignment is anchored in the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pin {
    /// Global: from any source of the graph to any sink.
    None,
    /// Must start on the first base of this handle; free graph end.
    Start(Handle),
    /// Must end on the last base of this handle; free graph start.
    End(Handle),
}

/// Diagonal band limiting the dynamic programming. Only honoured for
/// `Pin::None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Band {
    Unbanded,
    /// Band wide enough for the length difference between the read and the
    /// shortest/longest graph walk, plus padding.
    Padded(usize),
    /// Explicit offsets from the main diagonal, `lo <= 0 <= hi` in practice.
    Offsets { lo: i64, hi: i64 },
}

/// Result of a graph alignment. A band that admits no complete path is an
/// expected outcome, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlignOutcome {
    Found(Alignment),
    NoPathInBand,
}

impl AlignOutcome {
    pub fn found(self) -> Option<Alignment> {
        match self {
            AlignOutcome::Found(aln) => Some(aln),
            AlignOutcome::NoPathInBand => None,
        }
    }
}

/// Sequence-to-graph aligner under affine gap scoring.
pub trait GraphAligner: Sync {
    /// Align `sequence` to `graph`. In pinned modes, nodes further than
    /// `max_span` bases from the pinned handle are not considered.
    fn align(
        &self,
        sequence: &[u8],
        graph: &Graph,
        pin: Pin,
        band: Band,
        max_span: usize,
        scoring: &ScoringParams,
    ) -> AlignOutcome;
}

/// Index-assisted mapper used when banded alignment is not enough. Returns
/// `None` when the sequence cannot be placed.
pub trait FallbackMapper: Sync {
    fn map(&self, sequence: &[u8], graph: &Graph, scoring: &ScoringParams) -> Option<Alignment>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitution_scores() {
        let scoring = ScoringParams::default();
        assert_eq!(scoring.substitution(b'A', b'a'), 1);
        assert_eq!(scoring.substitution(b'A', b'C'), -4);
        assert_eq!(scoring.substitution(b'N', b'C'), 0);
    }

    #[test]
    fn test_gap_cost() {
        let scoring = ScoringParams::default();
        assert_eq!(scoring.gap(0), 0);
        assert_eq!(scoring.gap(1), 6);
        assert_eq!(scoring.gap(4), 9);
    }
}
