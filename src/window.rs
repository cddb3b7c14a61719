use crate::variant::VariantRecord;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// A primary variant with the nearby, mutually non-overlapping variants on
/// each side, in position order.
#[derive(Clone, Debug)]
pub struct VariantWindow {
    pub before: Vec<Arc<VariantRecord>>,
    pub current: Arc<VariantRecord>,
    pub after: Vec<Arc<VariantRecord>>,
}

impl VariantWindow {
    pub fn contig(&self) -> &str {
        &self.current.contig
    }
}

/// Keep variants that overlap neither `current` nor anything kept so far,
/// scanning `candidates` from closest to farthest.
fn select_non_overlapping<'a, I>(current: &VariantRecord, candidates: I) -> Vec<Arc<VariantRecord>>
where
    I: Iterator<Item = &'a Arc<VariantRecord>>,
{
    let mut kept: Vec<Arc<VariantRecord>> = Vec::new();
    for candidate in candidates {
        if candidate.overlaps(current) || kept.iter().any(|k| k.overlaps(candidate)) {
            continue;
        }
        kept.push(Arc::clone(candidate));
    }
    kept
}

/// Turns a position-sorted variant stream into windows: every variant in turn
/// becomes the primary, with context taken from `variant_range` bp either
/// side on the same contig.
pub struct WindowedVariantBuffer<I>
where
    I: Iterator<Item = io::Result<VariantRecord>>,
{
    source: I,
    buffer: VecDeque<Arc<VariantRecord>>,
    cursor: usize,
    variant_range: usize,
    exhausted: bool,
    // Contigs the stream has moved past
    finished: FxHashSet<String>,
}

impl<I> WindowedVariantBuffer<I>
where
    I: Iterator<Item = io::Result<VariantRecord>>,
{
    pub fn new(source: I, variant_range: usize) -> Self {
        WindowedVariantBuffer {
            source,
            buffer: VecDeque::new(),
            cursor: 0,
            variant_range,
            exhausted: false,
            finished: FxHashSet::default(),
        }
    }

    /// Pull one record into the buffer. Returns `false` at end of input.
    fn fill_one(&mut self) -> io::Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        match self.source.next() {
            None => {
                self.exhausted = true;
                Ok(false)
            }
            Some(record) => {
                let record = record?;
                if let Some(last) = self.buffer.back() {
                    if last.contig != record.contig {
                        self.finished.insert(last.contig.clone());
                        if self.finished.contains(&record.contig) {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!(
                                    "Variants are not sorted: contig {} appears again after {}",
                                    record.contig, last.contig
                                ),
                            ));
                        }
                    } else if record.position < last.position {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "Variants are not sorted: {}:{} follows {}:{}",
                                record.contig,
                                record.position + 1,
                                last.contig,
                                last.position + 1
                            ),
                        ));
                    }
                }
                self.buffer.push_back(Arc::new(record));
                Ok(true)
            }
        }
    }

    fn advance(&mut self) -> io::Result<Option<VariantWindow>> {
        while self.cursor >= self.buffer.len() {
            if !self.fill_one()? {
                return Ok(None);
            }
        }
        let current = Arc::clone(&self.buffer[self.cursor]);

        // Read ahead until past the range or onto another contig
        loop {
            let need_more = match self.buffer.back() {
                Some(last) => {
                    last.contig == current.contig
                        && last.position <= current.position + self.variant_range
                }
                None => true,
            };
            if !need_more || !self.fill_one()? {
                break;
            }
        }

        // Drop what can no longer be context for this or any later variant
        while let Some(front) = self.buffer.front() {
            if self.cursor == 0 {
                break;
            }
            if front.contig != current.contig
                || front.position + self.variant_range < current.position
            {
                self.buffer.pop_front();
                self.cursor -= 1;
            } else {
                break;
            }
        }

        let before_candidates = self
            .buffer
            .range(..self.cursor)
            .rev()
            .filter(|v| {
                v.contig == current.contig
                    && v.position + self.variant_range >= current.position
            });
        let mut before = select_non_overlapping(&current, before_candidates);
        before.reverse();

        let after_candidates = self.buffer.range(self.cursor + 1..).filter(|v| {
            v.contig == current.contig && v.position <= current.position + self.variant_range
        });
        let after = select_non_overlapping(&current, after_candidates);

        self.cursor += 1;
        Ok(Some(VariantWindow {
            before,
            current,
            after,
        }))
    }
}

impl<I> Iterator for WindowedVariantBuffer<I>
where
    I: Iterator<Item = io::Result<VariantRecord>>,
{
    type Item = io::Result<VariantWindow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}
