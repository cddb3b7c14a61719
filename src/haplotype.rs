use crate::variant::{get_radius, Genotype, GenotypeCache, VariantRecord};
use crate::window::VariantWindow;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

/// Allele index per window variant; 0 is the reference.
pub type Haplotype = Vec<usize>;

/// Distinct per-phase allele vectors observed across every sample of the
/// window. Missing calls and out-of-range allele indices read as the
/// reference; a phase absent from any variant drops the whole vector.
pub fn extract_haplotypes(
    variants: &[Arc<VariantRecord>],
    cache: Option<&dyn GenotypeCache>,
) -> BTreeSet<Haplotype> {
    let mut haplotypes = BTreeSet::new();
    let Some(first) = variants.first() else {
        return haplotypes;
    };

    for sample in 0..first.sample_count() {
        let mut per_phase: BTreeMap<usize, Haplotype> = BTreeMap::new();

        for variant in variants {
            let owned: Genotype;
            let genotype: &[Option<usize>] = match cache {
                Some(cache) => cache
                    .genotypes(variant)
                    .get(sample)
                    .map(|g| g.as_slice())
                    .unwrap_or(&[]),
                None => {
                    owned = variant
                        .genotypes
                        .get(sample)
                        .map(|g| crate::variant::parse_genotype(g))
                        .unwrap_or_default();
                    &owned
                }
            };

            for (phase, allele) in genotype.iter().enumerate() {
                let mut index = allele.unwrap_or(0);
                if index >= variant.allele_count() {
                    debug!(
                        "Variant {}:{} has allele index {} but only {} alleles; using reference",
                        variant.contig,
                        variant.position + 1,
                        index,
                        variant.allele_count()
                    );
                    index = 0;
                }
                per_phase.entry(phase).or_default().push(index);
            }
        }

        haplotypes.extend(
            per_phase
                .into_values()
                .filter(|haplotype| haplotype.len() == variants.len()),
        );
    }

    haplotypes
}

pub fn is_reference(haplotype: &[usize]) -> bool {
    haplotype.iter().all(|&allele| allele == 0)
}

/// Haplotypes carrying at least one alternate allele.
pub fn non_reference(haplotypes: BTreeSet<Haplotype>) -> Vec<Haplotype> {
    haplotypes
        .into_iter()
        .filter(|haplotype| !is_reference(haplotype))
        .collect()
}

/// Sequence spelled by `haplotype` from the start of the first variant to the
/// end of the last one, taking the bases between variants from
/// `path_sequence`.
pub fn haplotype_to_string(
    haplotype: &[usize],
    variants: &[Arc<VariantRecord>],
    path_sequence: &[u8],
) -> io::Result<Vec<u8>> {
    if haplotype.len() != variants.len() {
        return Err(io::Error::other(format!(
            "Haplotype has {} alleles for {} variants",
            haplotype.len(),
            variants.len()
        )));
    }

    let mut result = Vec::new();
    for (i, (variant, &allele)) in variants.iter().zip(haplotype).enumerate() {
        if i > 0 {
            let separator_start = variants[i - 1].end();
            let separator = path_sequence
                .get(separator_start..variant.position)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "Variant {}:{} lies outside its path or overlaps the previous variant",
                            variant.contig,
                            variant.position + 1
                        ),
                    )
                })?;
            result.extend_from_slice(separator);
        }
        let bases = variant.allele(allele).ok_or_else(|| {
            io::Error::other(format!(
                "Allele {} does not exist at {}:{}",
                allele,
                variant.contig,
                variant.position + 1
            ))
        })?;
        result.extend_from_slice(bases);
    }
    Ok(result)
}

/// Window variants in position order, keeping the primary and any context
/// variant whose radius is within `max_context_radius`.
pub fn filter_local_variants(
    window: &VariantWindow,
    max_context_radius: usize,
) -> Vec<Arc<VariantRecord>> {
    let small = |v: &&Arc<VariantRecord>| get_radius(v) <= max_context_radius as i64;
    let mut local: Vec<Arc<VariantRecord>> = window.before.iter().filter(small).cloned().collect();
    local.push(Arc::clone(&window.current));
    local.extend(window.after.iter().filter(small).cloned());
    local
}
