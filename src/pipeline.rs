//! Block-comparison pipeline: index, merge, filter, align, emit.
//!
//! For a block pair (X, Y) the engine runs two passes — X forward and X
//! complemented — each of which merges the k-mer indexes, sorts the seed
//! pairs, and fans the (bread, aread) groups out across workers.  Every
//! worker writes its own pair of `.las` files, so no file handle is ever
//! shared.  All state travels in explicit contexts; blocks are immutable
//! once loaded.

use crate::config;
use crate::db::ReadBlock;
use crate::error::{EngineError, Result};
use crate::gather::{gather_worker, DiagScores, GatherParams, GatherStats, PairContext};
use crate::kmers::{sort_kmers, KmerIndex, KmerParams};
use crate::overlap::OverlapWriter;
use crate::radix::RadixSorter;
use crate::seeds::{merge_seeds, pair_sort_plan};
use crate::wave::{AlignSpec, AlignWork};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Full parameter set of an `align` run.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub kmer: usize,
    pub binshift: i32,
    pub hitmin: i32,
    pub suppress: Option<u32>,
    pub biased: bool,
    pub ave_corr: f64,
    pub trace_space: i32,
    pub min_over: i32,
    pub hgap_min: i32,
    pub mem_limit: Option<u64>,
    pub workers: usize,
    pub masks: Vec<String>,
    pub outdir: PathBuf,
}

impl PipelineParams {
    pub fn validate(&self) -> Result<()> {
        if !self.workers.is_power_of_two() {
            return Err(EngineError::User(format!(
                "worker count {} must be a power of two",
                self.workers
            )));
        }
        if !(0.7..1.0).contains(&self.ave_corr) {
            return Err(EngineError::User(format!(
                "average correlation {} must be in [.7,1.)",
                self.ave_corr
            )));
        }
        if self.trace_space < 1 {
            return Err(EngineError::User("trace spacing must be positive".into()));
        }
        if self.min_over < 1 {
            return Err(EngineError::User(
                "minimum overlap length must be positive".into(),
            ));
        }
        KmerParams {
            kmer: self.kmer,
            suppress: self.suppress,
            biased: self.biased,
        }
        .validate()
    }
}

/// Open, trim, mask, and load one block, verifying every retained read can
/// seed at least one k-mer.
pub fn read_block(path: &Path, masks: &[String], kmer: usize) -> Result<ReadBlock> {
    let mut block = ReadBlock::open(path)?;
    block.trim();
    let missing = block.load_masks(masks)?;
    for m in missing {
        eprintln!("Warning: -m{} option given but no track found", m);
    }
    block.load_bases()?;
    if block.cutoff < kmer as i32 {
        for r in &block.reads {
            if (r.rlen as usize) < kmer {
                return Err(EngineError::User(format!(
                    "block {} contains reads shorter than {}bp; repartition with a cutoff",
                    block.root, kmer
                )));
            }
        }
    }
    Ok(block)
}

fn block_name(block: &ReadBlock) -> String {
    if block.part > 0 {
        format!("{}.{}", block.root, block.part)
    } else {
        block.root.clone()
    }
}

/// Compare database (or block) `apath` against each of `bpaths` in both
/// orientations, writing per-worker `.las` files into the output
/// directory.
pub fn align_databases(apath: &Path, bpaths: &[PathBuf], params: &PipelineParams) -> Result<()> {
    params.validate()?;

    let ablock = read_block(apath, &params.masks, params.kmer)?;
    let cblock = ablock.complement();
    let aname = block_name(&ablock);

    let mut hgap = params.hgap_min;
    if ablock.cutoff >= hgap {
        hgap = ablock.cutoff;
    }

    let spec = AlignSpec::new(params.ave_corr, params.trace_space, ablock.freq);
    let sorter = RadixSorter::new(params.workers);
    let kparams = KmerParams {
        kmer: params.kmer,
        suppress: params.suppress,
        biased: params.biased,
    };

    if config::is_verbose() {
        println!("\nBuilding index for {}", aname);
    }
    let aindex = sort_kmers(&ablock, &kparams, &sorter, params.workers)?;
    if config::is_verbose() {
        println!("\nBuilding index for c({})", aname);
    }
    let cindex = sort_kmers(&cblock, &kparams, &sorter, params.workers)?;

    for bpath in bpaths {
        let self_cmp = same_database(apath, bpath);
        if self_cmp {
            match_filter(
                &ablock, &aindex, &ablock, &aindex, &aname, &aname, true, false, &spec, hgap,
                params, &sorter,
            )?;
            match_filter(
                &cblock, &cindex, &ablock, &aindex, &aname, &aname, true, true, &spec, hgap,
                params, &sorter,
            )?;
        } else {
            let bblock = read_block(bpath, &params.masks, params.kmer)?;
            let bname = block_name(&bblock);
            if config::is_verbose() {
                println!("\nBuilding index for {}", bname);
            }
            let bindex = sort_kmers(&bblock, &kparams, &sorter, params.workers)?;
            match_filter(
                &ablock, &aindex, &bblock, &bindex, &aname, &bname, false, false, &spec, hgap,
                params, &sorter,
            )?;
            match_filter(
                &cblock, &cindex, &bblock, &bindex, &aname, &bname, false, true, &spec, hgap,
                params, &sorter,
            )?;
        }
    }
    Ok(())
}

fn same_database(a: &Path, b: &Path) -> bool {
    fn canon(p: &Path) -> PathBuf {
        let mut q = p.to_path_buf();
        if let Some(stem) = p.file_name().and_then(|s| s.to_str()) {
            if let Some(s) = stem.strip_suffix(".db") {
                q.set_file_name(s);
            }
        }
        q
    }
    canon(a) == canon(b)
}

struct WorkerIo {
    beg: usize,
    end: usize,
    out_a: OverlapWriter,
    out_b: Option<OverlapWriter>,
}

/// One comparison pass of the X block (forward or complemented) against
/// the Y block.
#[allow(clippy::too_many_arguments)]
fn match_filter(
    xblock: &ReadBlock,
    xindex: &KmerIndex,
    yblock: &ReadBlock,
    yindex: &KmerIndex,
    xname: &str,
    yname: &str,
    self_cmp: bool,
    comp: bool,
    spec: &AlignSpec,
    hgap: i32,
    params: &PipelineParams,
    sorter: &RadixSorter,
) -> Result<()> {
    let orient = if comp { 'C' } else { 'N' };
    if config::is_verbose() {
        if comp {
            println!("\nComparing c({}) to {}", xname, yname);
        } else {
            println!("\nComparing {} to {}", xname, yname);
        }
    }

    let out_a_path = |w: usize| {
        params
            .outdir
            .join(format!("{}.{}.{}{}.las", xname, yname, orient, w))
    };
    let out_b_path = |w: usize| {
        params
            .outdir
            .join(format!("{}.{}.{}{}.las", yname, xname, orient, w))
    };

    let plan = pair_sort_plan(xblock.maxlen, xblock.nreads(), yblock.nreads());
    let merged = merge_seeds(
        xindex,
        yindex,
        self_cmp,
        &plan,
        params.mem_limit,
        xindex.count + yindex.count,
        sorter,
        params.workers,
    )?;

    let tspace = spec.trace_space;
    let merged = match merged {
        Some(m) => m,
        None => {
            for w in 0..params.workers {
                OverlapWriter::create(&out_a_path(w), tspace)?.finish()?;
                if !self_cmp {
                    OverlapWriter::create(&out_b_path(w), tspace)?.finish()?;
                }
            }
            return Ok(());
        }
    };

    // Fan groups out at bread boundaries so no pair straddles workers.
    let hits = &merged.pairs;
    let nhits = merged.nhits;
    let mut bounds = vec![0usize];
    for w in 1..params.workers {
        let mut p = nhits * w / params.workers;
        if p > 0 {
            let d = hits[p - 1].bread;
            while p < nhits && hits[p].bread == d {
                p += 1;
            }
        }
        let prev = *bounds.last().unwrap();
        bounds.push(prev.max(p));
    }
    bounds.push(nhits);

    let mut ios = Vec::with_capacity(params.workers);
    for w in 0..params.workers {
        ios.push(WorkerIo {
            beg: bounds[w],
            end: bounds[w + 1],
            out_a: OverlapWriter::create(&out_a_path(w), tspace)?,
            out_b: if self_cmp {
                None
            } else {
                Some(OverlapWriter::create(&out_b_path(w), tspace)?)
            },
        });
    }

    let ctx = PairContext {
        ablock: xblock,
        bblock: yblock,
        comp,
        spec,
    };
    let gparams = GatherParams {
        kmer: params.kmer,
        binshift: params.binshift,
        hitmin: params.hitmin,
        min_over: params.min_over,
        hgap_min: hgap,
    };

    let stats: Vec<GatherStats> = ios
        .par_iter_mut()
        .map(|io| {
            let mut scores = DiagScores::new(xblock.maxlen, yblock.maxlen, params.binshift);
            let mut work = AlignWork::new();
            gather_worker(
                &ctx,
                &gparams,
                hits,
                io.beg,
                io.end,
                &mut scores,
                &mut work,
                &mut io.out_a,
                io.out_b.as_mut(),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    for io in ios {
        io.out_a.finish()?;
        if let Some(b) = io.out_b {
            b.finish()?;
        }
    }

    if config::is_verbose() {
        let nfilt: i64 = stats.iter().map(|s| s.nfilt).sum();
        let nconf: i64 = stats.iter().map(|s| s.ahits + s.bhits).sum();
        println!("     {} seed hits ({} k-mer matches)", nfilt, nhits);
        println!("     {} confirmed hits", nconf);
    }
    Ok(())
}
