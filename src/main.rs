// Clippy allows
#![allow(clippy::too_many_arguments)]

//! LODE: Local Overlap Discovery Engine
//!
//! Usage: lode <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use lode_align::commands::{check, merge, simulate, sort, split};
use lode_align::commands::{CheckOptions, SimulateConfig, SplitMode};
use lode_align::config;
use lode_align::error::Result;
use lode_align::pipeline::{align_databases, PipelineParams};

#[derive(Parser)]
#[command(name = "lode")]
#[command(author = "Manish Kumar Bobbili")]
#[command(version)]
#[command(about = "LODE: local overlap discovery engine for long, noisy reads", long_about = None)]
struct Cli {
    /// Report progress and statistics
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Number of worker threads (must be a power of two)
    #[arg(long, short = 'T', global = true, default_value = "4")]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find all local alignments between blocks of read databases
    Align {
        /// Subject database or block (root[.k])
        subject: PathBuf,

        /// Target databases or blocks to compare against
        #[arg(required = true)]
        targets: Vec<PathBuf>,

        /// K-mer length for seeding
        #[arg(short = 'k', long, default_value = "14")]
        kmer: usize,

        /// Log2 of the diagonal bin width
        #[arg(short = 'w', long, default_value = "6")]
        binshift: i32,

        /// Minimum covered bases in a diagonal band (bp)
        #[arg(long = "hitmin", default_value = "35")]
        hitmin: i32,

        /// Drop k-mers occurring more than this many times
        #[arg(short = 't', long)]
        suppress: Option<u32>,

        /// Use composition-biased variable-length seeds
        #[arg(short = 'b', long)]
        biased: bool,

        /// Average correlation of sought alignments (1 - 2*error)
        #[arg(short = 'e', long, default_value = "0.70")]
        correlation: f64,

        /// Trace-point spacing in the A read
        #[arg(short = 's', long, default_value = "100")]
        spacing: i32,

        /// Minimum alignment length (bp)
        #[arg(short = 'l', long, default_value = "1000")]
        min_length: i32,

        /// Skip records whose keyed read is shorter than this (bp)
        #[arg(short = 'H', long = "hgap", default_value = "0")]
        hgap: i32,

        /// Memory budget in GiB for the seed-pair buffers
        #[arg(short = 'M', long)]
        memory: Option<u64>,

        /// Interval track to mask before seeding (repeatable)
        #[arg(short = 'm', long = "mask")]
        masks: Vec<String>,

        /// Directory for the output .las files
        #[arg(short = 'o', long, default_value = ".")]
        outdir: PathBuf,
    },

    /// Sort .las files by (aread, bread, comp, abpos)
    Sort {
        /// Input .las files; each is rewritten as <root>.S.las
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Merge sorted .las files into one sorted file
    Merge {
        /// Output .las file
        output: PathBuf,

        /// Sorted input parts (at most 252)
        #[arg(required = true)]
        parts: Vec<PathBuf>,
    },

    /// Split a sorted .las stream into per-block files
    Split {
        /// Output name template; parts become <root>.<k>.las
        output: PathBuf,

        /// Number of equal parts to produce
        #[arg(short = 'p', long, conflicts_with = "db")]
        parts: Option<usize>,

        /// Split at the block boundaries of this database
        #[arg(short = 'd', long)]
        db: Option<PathBuf>,

        /// Input file (stdin when omitted)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,
    },

    /// Verify the integrity of .las files
    Check {
        /// Files to verify
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Require strict sort order
        #[arg(short = 'S', long)]
        sorted: bool,

        /// Validate read ids and lengths against this database
        #[arg(short = 'a', long)]
        db: Option<PathBuf>,
    },

    /// Generate a synthetic read database for testing
    Simulate {
        /// Database root to create
        output: PathBuf,

        /// Number of reads
        #[arg(short = 'n', long, default_value = "100")]
        reads: usize,

        /// Minimum read length
        #[arg(long, default_value = "2000")]
        min_len: usize,

        /// Maximum read length
        #[arg(long, default_value = "12000")]
        max_len: usize,

        /// Reference length the reads sample from
        #[arg(short = 'g', long, default_value = "100000")]
        genome: usize,

        /// Per-base substitution error rate
        #[arg(short = 'e', long, default_value = "0.12")]
        error: f64,

        /// Random seed
        #[arg(short = 's', long, default_value = "101")]
        seed: u64,

        /// Read-length cutoff recorded in the database
        #[arg(short = 'x', long, default_value = "0")]
        cutoff: i32,

        /// Split into blocks of at most this many bases
        #[arg(short = 'B', long)]
        block_bases: Option<i64>,
    },
}

fn main() {
    let cli = Cli::parse();
    config::set_verbose(cli.verbose);

    let result = dispatch(cli);
    if let Err(e) = result {
        eprintln!("lode: {}", e);
        process::exit(e.exit_code());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Align {
            subject,
            targets,
            kmer,
            binshift,
            hitmin,
            suppress,
            biased,
            correlation,
            spacing,
            min_length,
            hgap,
            memory,
            masks,
            outdir,
        } => {
            let params = PipelineParams {
                kmer,
                binshift,
                hitmin,
                suppress,
                biased,
                ave_corr: correlation,
                trace_space: spacing,
                min_over: min_length,
                hgap_min: hgap,
                mem_limit: memory.map(|gb| gb << 30),
                workers: cli.threads,
                masks,
                outdir,
            };
            align_databases(&subject, &targets, &params)
        }

        Commands::Sort { files } => sort::run(&files),

        Commands::Merge { output, parts } => merge::run(&output, &parts),

        Commands::Split {
            output,
            parts,
            db,
            input,
        } => {
            let mode = match (parts, db) {
                (Some(n), None) => SplitMode::Parts(n),
                (None, Some(path)) => SplitMode::Blocks(path),
                _ => {
                    return Err(lode_align::EngineError::User(
                        "split needs exactly one of --parts or --db".into(),
                    ))
                }
            };
            split::run(&output, &mode, input.as_deref())
        }

        Commands::Check { files, sorted, db } => check::run(&files, &CheckOptions { sorted, db }),

        Commands::Simulate {
            output,
            reads,
            min_len,
            max_len,
            genome,
            error,
            seed,
            cutoff,
            block_bases,
        } => {
            let config = SimulateConfig {
                nreads: reads,
                min_len,
                max_len,
                genome_len: genome,
                error,
                seed,
                cutoff,
                block_bases,
            };
            let stats = simulate::run(&output, &config)?;
            if config::is_verbose() {
                println!(
                    "Wrote {} reads, {} bases to {}",
                    stats.nreads,
                    stats.total_bases,
                    output.display()
                );
            }
            Ok(())
        }
    }
}
