// lib.rs
pub mod aligner;
pub mod alignment;
pub mod augment;
pub mod commands;
pub mod dispatch;
pub mod edit;
pub mod gfa;
pub mod graph;
pub mod haplotype;
pub mod path_index;
pub mod sync;
pub mod variant;
pub mod vcf;
pub mod window;
