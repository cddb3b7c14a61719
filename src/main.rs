use clap::Parser;
use log::info;
use rayon::ThreadPoolBuilder;
use std::io;
use std::num::NonZeroUsize;
use varadd::aligner::ScoringParams;
use varadd::augment::AugmentConfig;
use varadd::commands::{augment::run_augment, stats::run_stats};
use varadd::dispatch::DispatchConfig;

fn default_threads() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn parse_rename(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((vcf, graph)) if !vcf.is_empty() && !graph.is_empty() => {
            Ok((vcf.to_string(), graph.to_string()))
        }
        _ => Err(format!("expected VCF=GRAPH, got '{}'", s)),
    }
}

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Number of threads for parallel processing.
    #[clap(short = 't', long, value_parser, default_value_t = default_threads())]
    num_threads: NonZeroUsize,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

/// Add variant haplotypes to a sequence graph.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Align every sample haplotype from a VCF to the graph and add the novel sequence
    Augment {
        #[clap(flatten)]
        common: CommonOpts,

        /// Input graph in GFA 1.0 format (plain or BGZF-compressed)
        #[clap(short = 'g', long, value_parser)]
        gfa_file: String,

        /// Variants in VCF format (plain or BGZF-compressed), sorted by position
        #[clap(long = "vcf", value_parser)]
        vcf_file: String,

        /// Output GFA file (stdout if not specified)
        #[clap(short = 'o', long, value_parser)]
        output: Option<String>,

        /// Skip variants on contigs without a graph path instead of failing
        #[clap(short = 'i', long, action)]
        ignore_missing_contigs: bool,

        /// Rename a VCF contig to a graph path name (repeatable)
        #[clap(short = 'r', long = "rename", value_name = "VCF=GRAPH", value_parser = parse_rename)]
        rename: Vec<(String, String)>,

        /// Consider variants within this many bp of each other together
        #[clap(short = 'w', long, value_parser, default_value_t = 50)]
        variant_range: usize,

        /// Reference context in bp taken on each side of a variant group
        #[clap(short = 'f', long, value_parser, default_value_t = 100)]
        flank_range: usize,

        /// Leave out context variants with a larger radius
        #[clap(long, value_parser, default_value_t = 50)]
        max_context_radius: usize,

        /// Split nodes longer than this before adding variants (0 to disable)
        #[clap(long, value_parser, default_value_t = 1024)]
        max_node_length: usize,

        /// Align sequences and subgraphs smaller than this whole
        #[clap(long, value_parser, default_value_t = 1024)]
        whole_alignment_cutoff: usize,

        /// Bases of each end aligned at the region boundaries for large cases
        #[clap(long, value_parser, default_value_t = 200)]
        pinned_tail_size: usize,

        /// Band padding for the banded whole-sequence attempt
        #[clap(long, value_parser, default_value_t = 20)]
        band_padding: usize,

        /// Fraction of a perfect score an alignment must exceed to be accepted
        #[clap(long, value_parser, default_value_t = 0.95)]
        min_score_factor: f64,

        /// K-mer size of the fallback index
        #[clap(short = 'k', long, value_parser, default_value_t = 16)]
        kmer_size: usize,

        /// Maximum branch crossings per k-mer in the fallback index (0 for no limit)
        #[clap(short = 'e', long, value_parser, default_value_t = 0)]
        edge_max: usize,

        /// Score for a matching base
        #[clap(long, value_parser, default_value_t = 1)]
        match_score: i32,

        /// Penalty for a mismatching base
        #[clap(long, value_parser, default_value_t = 4)]
        mismatch: i32,

        /// Penalty for opening a gap
        #[clap(long, value_parser, default_value_t = 6)]
        gap_open: i32,

        /// Penalty for extending a gap
        #[clap(long, value_parser, default_value_t = 1)]
        gap_extension: i32,
    },
    /// Print graph statistics
    Stats {
        #[clap(flatten)]
        common: CommonOpts,

        /// Input graph in GFA 1.0 format
        #[clap(short = 'g', long, value_parser)]
        gfa_file: String,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::Augment {
            common,
            gfa_file,
            vcf_file,
            output,
            ignore_missing_contigs,
            rename,
            variant_range,
            flank_range,
            max_context_radius,
            max_node_length,
            whole_alignment_cutoff,
            pinned_tail_size,
            band_padding,
            min_score_factor,
            kmer_size,
            edge_max,
            match_score,
            mismatch,
            gap_open,
            gap_extension,
        } => {
            initialize(&common)?;
            if kmer_size == 0 || kmer_size > 32 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("K-mer size must be between 1 and 32, got {}", kmer_size),
                ));
            }
            let config = AugmentConfig {
                variant_range,
                flank_range,
                max_context_radius,
                ignore_missing_contigs,
                contig_renames: rename.into_iter().collect(),
                max_node_length,
                batch_size: common.num_threads.get() * 16,
                dispatch: DispatchConfig {
                    whole_alignment_cutoff,
                    pinned_tail_size,
                    band_padding,
                    min_score_factor,
                    kmer_size,
                    edge_max,
                    scoring: ScoringParams {
                        match_score,
                        mismatch,
                        gap_open,
                        gap_extension,
                    },
                },
            };
            run_augment(&gfa_file, &vcf_file, output.as_deref(), config)?;
        }
        Args::Stats { common, gfa_file } => {
            initialize(&common)?;
            run_stats(&gfa_file)?;
        }
    }

    Ok(())
}

fn initialize(common: &CommonOpts) -> io::Result<()> {
    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    // Configure thread pool
    ThreadPoolBuilder::new()
        .num_threads(common.num_threads.into())
        .build_global()
        .map_err(io::Error::other)?;
    info!("Using {} threads", common.num_threads);
    Ok(())
}
