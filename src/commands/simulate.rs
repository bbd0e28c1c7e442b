//! Synthetic read-block generator for testing and benchmarking.
//!
//! Samples reads from a random reference so that reads overlap one
//! another, applies independent substitution noise, and writes a complete
//! database (stub, index, base pairs).  Fully deterministic for a given
//! seed.

use crate::db::create_db;
use crate::error::{EngineError, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SimulateConfig {
    pub nreads: usize,
    pub min_len: usize,
    pub max_len: usize,
    /// Length of the underlying reference the reads sample.
    pub genome_len: usize,
    /// Per-base substitution probability applied to each read.
    pub error: f64,
    pub seed: u64,
    pub cutoff: i32,
    /// Split the database into blocks of at most this many bases.
    pub block_bases: Option<i64>,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        SimulateConfig {
            nreads: 100,
            min_len: 2000,
            max_len: 12_000,
            genome_len: 100_000,
            error: 0.12,
            seed: 101,
            cutoff: 0,
            block_bases: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulateStats {
    pub nreads: usize,
    pub total_bases: u64,
}

pub fn run(root: &Path, config: &SimulateConfig) -> Result<SimulateStats> {
    if config.min_len == 0 || config.min_len > config.max_len {
        return Err(EngineError::User(format!(
            "bad read length range {}..{}",
            config.min_len, config.max_len
        )));
    }
    if config.genome_len < config.max_len {
        return Err(EngineError::User(
            "reference shorter than the longest read".into(),
        ));
    }
    if !(0.0..0.5).contains(&config.error) {
        return Err(EngineError::User("error rate must be in [0,.5)".into()));
    }

    let mut rng = SmallRng::seed_from_u64(config.seed);
    let genome: Vec<u8> = (0..config.genome_len).map(|_| rng.gen_range(0..4u8)).collect();

    let mut stats = SimulateStats::default();
    let mut reads = Vec::with_capacity(config.nreads);
    for _ in 0..config.nreads {
        let len = rng.gen_range(config.min_len..=config.max_len);
        let start = rng.gen_range(0..=config.genome_len - len);
        let mut read: Vec<u8> = genome[start..start + len].to_vec();
        if config.error > 0.0 {
            for b in read.iter_mut() {
                if rng.gen_bool(config.error) {
                    *b = (*b + rng.gen_range(1..4u8)) & 3;
                }
            }
        }
        stats.total_bases += read.len() as u64;
        reads.push(read);
    }
    stats.nreads = reads.len();

    create_db(root, &reads, config.cutoff, true, config.block_bases)?;
    Ok(stats)
}
