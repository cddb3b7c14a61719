pub mod augment;
pub mod stats;
