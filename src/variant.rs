use std::sync::OnceLock;

/// Parsed genotype of one sample: one allele index per phase, `None` for a
/// missing call.
pub type Genotype = Vec<Option<usize>>;

/// A single variant site. Allele 0 is the reference.
#[derive(Debug)]
pub struct VariantRecord {
    pub contig: String,
    /// 0-based position of the first reference base.
    pub position: usize,
    pub id: String,
    pub ref_allele: Vec<u8>,
    pub alt_alleles: Vec<Vec<u8>>,
    /// Raw `GT` strings, one per sample.
    pub genotypes: Vec<String>,
    parsed: OnceLock<Vec<Genotype>>,
}

impl VariantRecord {
    pub fn new(
        contig: &str,
        position: usize,
        id: &str,
        ref_allele: &[u8],
        alt_alleles: Vec<Vec<u8>>,
        genotypes: Vec<String>,
    ) -> Self {
        VariantRecord {
            contig: contig.to_string(),
            position,
            id: id.to_string(),
            ref_allele: ref_allele.to_vec(),
            alt_alleles,
            genotypes,
            parsed: OnceLock::new(),
        }
    }

    pub fn allele_count(&self) -> usize {
        1 + self.alt_alleles.len()
    }

    pub fn allele(&self, index: usize) -> Option<&[u8]> {
        if index == 0 {
            Some(&self.ref_allele)
        } else {
            self.alt_alleles.get(index - 1).map(|a| a.as_slice())
        }
    }

    pub fn ref_len(&self) -> usize {
        self.ref_allele.len()
    }

    /// One past the last reference base.
    pub fn end(&self) -> usize {
        self.position + self.ref_allele.len()
    }

    pub fn sample_count(&self) -> usize {
        self.genotypes.len()
    }

    pub fn longest_allele(&self) -> usize {
        self.alt_alleles
            .iter()
            .map(|a| a.len())
            .chain(std::iter::once(self.ref_allele.len()))
            .max()
            .unwrap_or(0)
    }

    /// Whether the reference spans of the two variants share a base.
    pub fn overlaps(&self, other: &VariantRecord) -> bool {
        self.contig == other.contig && self.position < other.end() && other.position < self.end()
    }

    /// Genotypes parsed once and kept with the record.
    pub fn parsed_genotypes(&self) -> &[Genotype] {
        self.parsed
            .get_or_init(|| self.genotypes.iter().map(|g| parse_genotype(g)).collect())
    }
}

/// Parse a `GT` value such as `0|1`, `1/2` or `./.`. Unphased calls are read
/// in the order written.
pub fn parse_genotype(gt: &str) -> Genotype {
    gt.split(['|', '/'])
        .map(|allele| allele.trim().parse::<usize>().ok())
        .collect()
}

/// Source of parsed genotypes that may keep them between calls.
pub trait GenotypeCache {
    fn genotypes<'a>(&'a self, variant: &'a VariantRecord) -> &'a [Genotype];
}

/// Cache backed by the memo stored inside each record.
pub struct RecordGenotypeCache;

impl GenotypeCache for RecordGenotypeCache {
    fn genotypes<'a>(&'a self, variant: &'a VariantRecord) -> &'a [Genotype] {
        variant.parsed_genotypes()
    }
}

/// Half the longest allele, rounded up.
pub fn get_radius(variant: &VariantRecord) -> i64 {
    (variant.longest_allele() as i64 + 1) / 2
}

/// Middle of the reference span, rounded down.
pub fn get_center(variant: &VariantRecord) -> i64 {
    let pos = variant.position as i64;
    (pos + pos + variant.ref_len() as i64 - 1).div_euclid(2)
}

/// Center and radius of an interval covering every variant's own
/// center +/- radius interval.
pub fn get_center_and_radius<'a, I>(variants: I) -> Option<(i64, i64)>
where
    I: IntoIterator<Item = &'a VariantRecord>,
{
    let mut bounds: Option<(i64, i64)> = None;
    for variant in variants {
        let (center, radius) = (get_center(variant), get_radius(variant));
        let (left, right) = (center - radius, center + radius);
        bounds = Some(match bounds {
            Some((l, r)) => (l.min(left), r.max(right)),
            None => (left, right),
        });
    }
    bounds.map(|(left, right)| ((left + right).div_euclid(2), (right - left + 1).div_euclid(2)))
}
