use crate::augment::{AugmentConfig, AugmentStats, VariantAdder};
use crate::gfa::{read_gfa_file, write_gfa};
use crate::vcf::VcfReader;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::Instant;

/// Add the haplotypes of every sample in `vcf_file` to the graph in
/// `gfa_file`, writing the augmented graph to `output` (stdout when `None`).
pub fn run_augment(
    gfa_file: &str,
    vcf_file: &str,
    output: Option<&str>,
    config: AugmentConfig,
) -> io::Result<AugmentStats> {
    let start = Instant::now();
    info!("Reading graph from {}", gfa_file);
    let graph = read_gfa_file(gfa_file)?;
    info!(
        "Graph has {} nodes, {} edges, {} bp",
        graph.node_count(),
        graph.edge_count(),
        graph.total_length()
    );

    let reader = VcfReader::from_path(vcf_file)?;
    if reader.samples().is_empty() {
        warn!("{} declares no samples; no haplotypes can be derived", vcf_file);
    } else {
        info!("Reading variants for {} samples from {}", reader.samples().len(), vcf_file);
    }

    let adder = VariantAdder::new(graph, config);
    adder.add_variants(reader)?;
    let stats = adder.stats();
    let graph = adder.into_graph();

    match output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            write_gfa(&graph, &mut writer)?;
            writer.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            write_gfa(&graph, &mut writer)?;
            writer.flush()?;
        }
    }

    report(&stats);
    info!("Augmentation finished in {:.2?}", start.elapsed());
    Ok(stats)
}

fn report(stats: &AugmentStats) {
    info!(
        "Processed {} windows, aligned {} haplotypes",
        stats.windows, stats.haplotypes_aligned
    );
    info!(
        "Added {} nodes and {} edges, split {} nodes ({} diced up front)",
        stats.nodes_added, stats.edges_added, stats.nodes_split, stats.nodes_diced
    );
    info!(
        "Alignments: {} whole, {} banded, {} mapped, {} spliced",
        stats.whole, stats.banded, stats.mapped, stats.spliced
    );
    if !stats.skipped_contigs.is_empty() {
        let mut skipped: Vec<&str> = stats.skipped_contigs.iter().map(String::as_str).collect();
        skipped.sort_by(|a, b| natord::compare(a, b));
        warn!("Skipped contigs missing from the graph: {}", skipped.join(", "));
    }
}
