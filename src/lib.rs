// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

//! LODE: Local Overlap Discovery Engine
//!
//! Finds all significant local alignments between long, noisy DNA reads
//! held in 2-bit compressed read databases, and manages the resulting
//! binary overlap files.
//!
//! # Pipeline
//!
//! - **Seeding**: each block is scanned into (k-mer, read, position)
//!   tuples, radix-sorted, and frequency-capped; two sorted lists are
//!   stream-merged into candidate seed pairs.
//! - **Filtering**: seeds are binned by diagonal and a pair survives only
//!   if a bin neighborhood covers enough bases.
//! - **Alignment**: surviving seeds are extended by an adaptive wavefront
//!   aligner that trims at a correlation-calibrated statistic and records
//!   trace points for later exact-alignment recovery.
//! - **Overlap files**: records stream to per-worker `.las` files and are
//!   externally sorted, merged, split, and verified by the companion
//!   subcommands.
//!
//! # Example
//!
//! ```rust,no_run
//! use lode_align::pipeline::{align_databases, PipelineParams};
//! use std::path::{Path, PathBuf};
//!
//! let params = PipelineParams {
//!     kmer: 14,
//!     binshift: 6,
//!     hitmin: 35,
//!     suppress: None,
//!     biased: false,
//!     ave_corr: 0.70,
//!     trace_space: 100,
//!     min_over: 1000,
//!     hgap_min: 0,
//!     mem_limit: None,
//!     workers: 4,
//!     masks: Vec::new(),
//!     outdir: PathBuf::from("."),
//! };
//! align_databases(Path::new("READS.1"), &[PathBuf::from("READS.2")], &params).unwrap();
//! ```

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod gather;
pub mod kmers;
pub mod overlap;
pub mod pipeline;
pub mod radix;
pub mod seeds;
pub mod trace;
pub mod wave;

// Re-export commonly used types
pub use db::ReadBlock;
pub use error::{EngineError, Result};
pub use overlap::{LasReader, Overlap, OverlapWriter, Path};
pub use wave::{AlignSpec, AlignWork};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::db::ReadBlock;
    pub use crate::error::{EngineError, Result};
    pub use crate::overlap::{LasReader, Overlap, OverlapWriter, Path};
    pub use crate::pipeline::{align_databases, PipelineParams};
    pub use crate::wave::{AlignSpec, AlignWork};
}
