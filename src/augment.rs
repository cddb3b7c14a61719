use crate::aligner::{DagAligner, KmerMapper};
use crate::dispatch::{check_alignment, min_expected_score, AlignmentDispatcher, DispatchConfig, Strategy};
use crate::edit::EditSummary;
use crate::graph::Graph;
use crate::haplotype::{extract_haplotypes, filter_local_variants, haplotype_to_string, non_reference};
use crate::sync::GraphSynchronizer;
use crate::variant::{get_center_and_radius, RecordGenotypeCache, VariantRecord};
use crate::window::{VariantWindow, WindowedVariantBuffer};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::io;
use std::sync::{Mutex, PoisonError};

/// Configuration for adding variant haplotypes to a graph.
#[derive(Clone, Debug)]
pub struct AugmentConfig {
    /// Distance in bp around a variant within which other variants are
    /// considered jointly.
    /// Default: 50
    pub variant_range: usize,

    /// Maximum reference context taken on each side of a variant group.
    /// Default: 100
    pub flank_range: usize,

    /// Context variants with a larger radius are left out of the window.
    /// Default: 50
    pub max_context_radius: usize,

    /// Skip variants on contigs the graph has no path for, warning once per
    /// contig, instead of failing.
    pub ignore_missing_contigs: bool,

    /// VCF contig names mapped to graph path names. Unlisted contigs are
    /// looked up under their own name.
    pub contig_renames: FxHashMap<String, String>,

    /// Nodes longer than this are split before any variant is added (0 keeps
    /// nodes as they are).
    /// Default: 1024
    pub max_node_length: usize,

    /// Windows handed to the thread pool at a time.
    /// Default: 64
    pub batch_size: usize,

    pub dispatch: DispatchConfig,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        AugmentConfig {
            variant_range: 50,
            flank_range: 100,
            max_context_radius: 50,
            ignore_missing_contigs: false,
            contig_renames: FxHashMap::default(),
            max_node_length: 1024,
            batch_size: 64,
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Summary of a run.
#[derive(Clone, Debug, Default)]
pub struct AugmentStats {
    pub windows: usize,
    pub haplotypes_aligned: usize,
    pub nodes_diced: usize,
    pub nodes_split: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
    pub skipped_contigs: BTreeSet<String>,
    pub whole: usize,
    pub banded: usize,
    pub mapped: usize,
    pub spliced: usize,
}

impl AugmentStats {
    fn record(&mut self, strategy: Strategy, summary: &EditSummary) {
        self.haplotypes_aligned += 1;
        self.nodes_split += summary.split_nodes.len();
        self.nodes_added += summary.novel_nodes.len();
        self.edges_added += summary.edges_added;
        match strategy {
            Strategy::Whole => self.whole += 1,
            Strategy::Banded => self.banded += 1,
            Strategy::Mapped => self.mapped += 1,
            Strategy::Spliced => self.spliced += 1,
        }
    }
}

/// Per-window figures for the diagnostic log line.
#[derive(Default)]
struct WindowReport {
    haplotypes: usize,
    sequence_bases: usize,
    graph_bases: usize,
}

/// Adds the haplotypes implied by a stream of variants to a graph.
pub struct VariantAdder {
    sync: GraphSynchronizer,
    dispatcher: AlignmentDispatcher<DagAligner, KmerMapper>,
    config: AugmentConfig,
    path_names: FxHashSet<String>,
    stats: Mutex<AugmentStats>,
}

impl VariantAdder {
    pub fn new(mut graph: Graph, config: AugmentConfig) -> Self {
        let mut stats = AugmentStats::default();
        if config.max_node_length > 0 {
            stats.nodes_diced = graph.dice_nodes(config.max_node_length);
            if stats.nodes_diced > 0 {
                info!(
                    "Diced {} nodes longer than {} bp",
                    stats.nodes_diced, config.max_node_length
                );
            }
        }
        let path_names = graph.path_names().map(str::to_string).collect();
        VariantAdder {
            sync: GraphSynchronizer::new(graph),
            dispatcher: AlignmentDispatcher::new(config.dispatch.clone()),
            config,
            path_names,
            stats: Mutex::new(stats),
        }
    }

    pub fn stats(&self) -> AugmentStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn into_graph(self) -> Graph {
        self.sync.into_graph()
    }

    /// Add every variant from a position-sorted stream. Windows are produced
    /// in order and processed in batches on the rayon pool; the first error
    /// stops the run.
    pub fn add_variants<I>(&self, variants: I) -> io::Result<()>
    where
        I: Iterator<Item = io::Result<VariantRecord>>,
    {
        let variants = variants.map(|record| record.map(|variant| self.rename_contig(variant)));
        let buffer = WindowedVariantBuffer::new(variants, self.config.variant_range);
        let show_progress =
            log::log_enabled!(log::Level::Info) && !log::log_enabled!(log::Level::Debug);
        let mut progress: Option<ProgressBar> = None;
        let mut current_contig = String::new();
        let mut batch: Vec<VariantWindow> = Vec::with_capacity(self.config.batch_size);

        for window in buffer {
            let window = window?;
            if !self.admit(&window, &mut progress)? {
                continue;
            }

            if window.contig() != current_contig {
                // Finish the previous contig before its bar goes away
                self.process_batch(&mut batch)?;
                if let Some(pb) = progress.take() {
                    pb.finish_and_clear();
                }
                current_contig = window.contig().to_string();
                let contig_len = self.sync.path_sequence(&current_contig)?.len();
                info!("Adding variants on contig {}", current_contig);
                if show_progress {
                    progress = Some(contig_progress(&current_contig, contig_len)?);
                }
            }
            if let Some(pb) = &progress {
                pb.set_position(window.current.position as u64);
            }

            batch.push(window);
            if batch.len() >= self.config.batch_size.max(1) {
                self.process_batch(&mut batch)?;
            }
        }
        self.process_batch(&mut batch)?;
        if let Some(pb) = progress.take() {
            pb.finish_and_clear();
        }
        Ok(())
    }

    fn rename_contig(&self, mut variant: VariantRecord) -> VariantRecord {
        if let Some(path) = self.config.contig_renames.get(&variant.contig) {
            variant.contig = path.clone();
        }
        variant
    }

    /// Whether a window can be processed. Missing contigs are skipped or
    /// rejected per configuration; a variant without samples is an error.
    fn admit(&self, window: &VariantWindow, progress: &mut Option<ProgressBar>) -> io::Result<bool> {
        let variant = &window.current;
        if !self.path_names.contains(&variant.contig) {
            if !self.config.ignore_missing_contigs {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "Contig {} mentioned in variants but not found in graph",
                        variant.contig
                    ),
                ));
            }
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            if stats.skipped_contigs.insert(variant.contig.clone()) {
                if let Some(pb) = progress.take() {
                    pb.finish_and_clear();
                }
                warn!("Skipping missing contig {}", variant.contig);
            }
            return Ok(false);
        }
        if variant.sample_count() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "No samples in variant at {}:{}; can't make haplotypes",
                    variant.contig,
                    variant.position + 1
                ),
            ));
        }
        Ok(true)
    }

    fn process_batch(&self, batch: &mut Vec<VariantWindow>) -> io::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let result = batch
            .par_iter()
            .try_for_each(|window| self.process_window(window));
        batch.clear();
        result
    }

    /// Align and commit every non-reference haplotype of one window.
    pub fn process_window(&self, window: &VariantWindow) -> io::Result<()> {
        let path = window.contig();
        let path_sequence = self.sync.path_sequence(path)?;
        let local = filter_local_variants(window, self.config.max_context_radius);

        let group_start = local[0].position;
        let group_end = local.iter().map(|v| v.end()).max().unwrap_or(group_start);
        if group_end > path_sequence.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Variant at {}:{} runs past the end of the {} bp path",
                    path,
                    window.current.position + 1,
                    path_sequence.len()
                ),
            ));
        }

        let left_len = self.config.flank_range.min(group_start);
        let right_len = self.config.flank_range.min(path_sequence.len() - group_end);
        let (context_start, context_end) = self.sync.with_path_index(path, |index| {
            index.round_outward(group_start - left_len, group_end + right_len)
        })?;
        let left_context = &path_sequence[context_start..group_start];
        let right_context = &path_sequence[group_end..context_end];
        if let Some((center, radius)) = get_center_and_radius(local.iter().map(|v| v.as_ref())) {
            let radius = radius
                .max(center - context_start as i64)
                .max(context_end as i64 - center);
            debug!(
                "Group {}:{}-{} centered at {} with radius {}, context {}-{}",
                path, group_start, group_end, center, radius, context_start, context_end
            );
        }

        let haplotypes = non_reference(extract_haplotypes(&local, Some(&RecordGenotypeCache)));
        let mut report = WindowReport {
            haplotypes: haplotypes.len(),
            ..WindowReport::default()
        };

        for haplotype in &haplotypes {
            let middle = haplotype_to_string(haplotype, &local, &path_sequence)?;
            let sequence = [left_context, middle.as_slice(), right_context].concat();
            report.sequence_bases += sequence.len();

            let lock = self.sync.acquire(path, context_start, context_end)?;
            report.graph_bases += lock.subgraph().total_length();
            let range_len = lock.end() - lock.start();
            let max_span = range_len.max(sequence.len());
            let min_score = (local.len() == 1).then(|| {
                min_expected_score(range_len, sequence.len(), &self.dispatcher.config.scoring)
            });

            let dispatched = self.dispatcher.smart_align(
                &sequence,
                lock.subgraph(),
                lock.left_boundary(),
                lock.right_boundary(),
                max_span,
                min_score,
            )?;
            check_alignment(&dispatched.alignment, !left_context.is_empty())?;

            let leading = dispatched
                .alignment
                .leading_side()
                .ok_or_else(|| io::Error::other("Alignment has an empty path"))?;
            let attachments = lock.peripheral_attachments(leading);
            let summary = lock.apply_edit(&dispatched.alignment, &attachments)?;

            self.stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(dispatched.strategy, &summary);
        }

        self.stats.lock().unwrap_or_else(PoisonError::into_inner).windows += 1;
        if report.haplotypes > 0 {
            debug!(
                "{} haplotypes at {}:{}: {} bp vs. {} bp haplotypes vs. graphs average",
                report.haplotypes,
                path,
                window.current.position + 1,
                report.sequence_bases / report.haplotypes,
                report.graph_bases / report.haplotypes
            );
        }
        Ok(())
    }
}

fn contig_progress(contig: &str, len: usize) -> io::Result<ProgressBar> {
    let progress_bar = ProgressBar::new(len as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .map_err(io::Error::other)?
            .progress_chars("#>-"),
    );
    progress_bar.set_message(format!("contig {}", contig));
    Ok(progress_bar)
}
