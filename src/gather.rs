//! Diagonal filtering and alignment dispatch.
//!
//! Seed pairs arrive sorted by (bread, aread, apos), so each candidate
//! read pair is a contiguous group.  Seeds are binned by diagonal at a
//! power-of-two granularity; a bin's score is the number of bases its
//! seeds cover without double-counting overlaps.  Any seed in a bin whose
//! neighborhood score reaches the hit threshold is extended by the
//! wavefront aligner, unless an earlier alignment from the group already
//! covers it.  Surviving alignments stream out as overlap records from
//! both read perspectives.

use crate::db::ReadBlock;
use crate::error::Result;
use crate::overlap::{Overlap, OverlapWriter, COMP_FLAG};
use crate::seeds::SeedPair;
use crate::wave::{local_alignment, AlignInput, AlignSpec, AlignWork, SeqView};

/// Filter thresholds and alignment acceptance parameters.
#[derive(Debug, Clone)]
pub struct GatherParams {
    pub kmer: usize,
    /// Log2 of the diagonal bin width.
    pub binshift: i32,
    /// Minimum covered bases in a bin neighborhood (bp).
    pub hitmin: i32,
    /// Minimum alignment length; an overlap must span at least twice this
    /// across both reads combined.
    pub min_over: i32,
    /// Reads shorter than this produce no record from their perspective.
    pub hgap_min: i32,
}

/// One comparison pass: the X block (A side of the seeds, complemented on
/// a comp pass) against the Y block.
pub struct PairContext<'a> {
    pub ablock: &'a ReadBlock,
    pub bblock: &'a ReadBlock,
    pub comp: bool,
    pub spec: &'a AlignSpec,
}

/// Diagonal-bin scores and last-coverage positions, offset so negative
/// diagonals index directly.
pub struct DiagScores {
    score: Vec<i32>,
    lastp: Vec<i32>,
    off: i32,
}

impl DiagScores {
    pub fn new(amaxlen: i32, bmaxlen: i32, binshift: i32) -> DiagScores {
        let neg = (-bmaxlen) >> binshift;
        let pos = amaxlen >> binshift;
        let width = (pos - neg + 3) as usize;
        DiagScores {
            score: vec![0; width],
            lastp: vec![0; width],
            off: neg - 1,
        }
    }

    #[inline]
    fn idx(&self, d: i32) -> usize {
        (d - self.off) as usize
    }
}

/// Outcome counters of one gather worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatherStats {
    /// Seeds whose bin neighborhood reached the threshold.
    pub nfilt: i64,
    /// Records written keyed by the X read.
    pub ahits: i64,
    /// Records written keyed by the Y read.
    pub bhits: i64,
}

/// Process the seed groups in `hits[beg..end)` (group-aligned), writing
/// overlaps to `out_a` (X-keyed) and `out_b` (Y-keyed; `None` on a self
/// pass, where both perspectives go to `out_a`).
#[allow(clippy::too_many_arguments)]
pub fn gather_worker(
    ctx: &PairContext,
    params: &GatherParams,
    hits: &[SeedPair],
    beg: usize,
    end: usize,
    scores: &mut DiagScores,
    work: &mut AlignWork,
    out_a: &mut OverlapWriter,
    mut out_b: Option<&mut OverlapWriter>,
) -> Result<GatherStats> {
    let mut stats = GatherStats::default();
    let kmer = params.kmer as i32;
    let minhit = ((params.hitmin - 1) / kmer + 1) as usize;
    let afirst = ctx.ablock.tfirst;
    let bfirst = ctx.bblock.tfirst;
    let flags = if ctx.comp { COMP_FLAG } else { 0 };

    let key = |i: usize| (hits[i].aread, hits[i].bread);

    let mut h = beg;
    while h < end {
        let p = key(h);
        if h + minhit - 1 >= hits.len() - 1 || key(h + minhit - 1) != p {
            h += 1;
            while key(h) == p {
                h += 1;
            }
            continue;
        }

        let ar = hits[h].aread as usize;
        let br = hits[h].bread as usize;
        let alen = ctx.ablock.reads[ar].rlen;
        let blen = ctx.bblock.reads[br].rlen;
        if alen < params.hgap_min && blen < params.hgap_min {
            h += 1;
            while key(h) == p {
                h += 1;
            }
            continue;
        }

        // First pass: non-overlapping seed coverage per diagonal bin.
        let g = h;
        loop {
            let apos = hits[h].apos;
            let bpos = hits[h].bpos;
            let d = scores.idx((apos - bpos) >> params.binshift);
            let gain = (apos - scores.lastp[d]).min(kmer);
            scores.score[d] += gain;
            scores.lastp[d] = apos;
            h += 1;
            if key(h) != p {
                break;
            }
        }

        // Second pass: dispatch undominated seeds from surviving bins.
        let mut lasta = -1i32;
        let mut lastd = -(kmer + 1);
        for f in g..h {
            let apos = hits[f].apos;
            let bpos = hits[f].bpos;
            let diag = apos - bpos;
            if (lastd != diag && apos >= lasta) || (lastd == diag && apos > lasta + kmer) {
                let d = scores.idx(diag >> params.binshift);
                if scores.score[d] + scores.score[d + 1] >= params.hitmin
                    || scores.score[d] + scores.score[d - 1] >= params.hitmin
                {
                    stats.nfilt += 1;

                    // The aligner's A role is the Y read so the comp flag
                    // lands on the (possibly complemented) X side.
                    let input = AlignInput {
                        a: SeqView::new(
                            &ctx.bblock.bases,
                            ctx.bblock.reads[br].boff as usize,
                            blen,
                        ),
                        b: SeqView::new(
                            &ctx.ablock.bases,
                            ctx.ablock.reads[ar].boff as usize,
                            alen,
                        ),
                        comp: ctx.comp,
                        same: false,
                    };
                    let (ypath, xpath) = local_alignment(work, ctx.spec, &input, bpos, apos)?;
                    lasta = ypath.bepos;
                    lastd = lasta - ypath.aepos;

                    if (ypath.aepos - ypath.abpos) + (ypath.bepos - ypath.bbpos)
                        >= 2 * params.min_over
                    {
                        if alen >= params.hgap_min {
                            let xovl = Overlap {
                                aread: ar as i32 + afirst,
                                bread: br as i32 + bfirst,
                                alen,
                                blen,
                                flags,
                                path: xpath,
                            };
                            out_a.write(&xovl)?;
                            stats.ahits += 1;
                        }
                        if blen >= params.hgap_min {
                            let yovl = Overlap {
                                aread: br as i32 + bfirst,
                                bread: ar as i32 + afirst,
                                alen: blen,
                                blen: alen,
                                flags,
                                path: ypath,
                            };
                            match out_b.as_deref_mut() {
                                Some(w) => w.write(&yovl)?,
                                None => out_a.write(&yovl)?,
                            }
                            stats.bhits += 1;
                        }
                    }
                }
            }
        }

        // Reset only the bins this group touched.
        for f in g..h {
            let d = scores.idx((hits[f].apos - hits[f].bpos) >> params.binshift);
            scores.score[d] = 0;
            scores.lastp[d] = 0;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_db;
    use crate::overlap::LasReader;
    use std::fs::File;
    use tempfile::tempdir;

    fn pseudo_seq(n: usize, mut state: u64) -> Vec<u8> {
        (0..n)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 3) as u8
            })
            .collect()
    }

    #[test]
    fn test_gather_reports_one_overlap_per_pair() {
        // Two blocks holding the same 2 kb read; a band of synthetic seeds
        // along the main diagonal must yield exactly one spanning overlap
        // in each perspective.
        let dir = tempdir().unwrap();
        let seq = pseudo_seq(2000, 77);

        let aroot = dir.path().join("xa");
        create_db(&aroot, &[seq.clone()], 0, true, None).unwrap();
        let mut ablock = crate::db::ReadBlock::open(&aroot).unwrap();
        ablock.trim();
        ablock.load_bases().unwrap();

        let broot = dir.path().join("yb");
        create_db(&broot, &[seq], 0, true, None).unwrap();
        let mut bblock = crate::db::ReadBlock::open(&broot).unwrap();
        bblock.trim();
        bblock.load_bases().unwrap();

        let spec = AlignSpec::new(0.70, 100, ablock.freq);
        let ctx = PairContext {
            ablock: &ablock,
            bblock: &bblock,
            comp: false,
            spec: &spec,
        };
        let params = GatherParams {
            kmer: 14,
            binshift: 6,
            hitmin: 35,
            min_over: 1000,
            hgap_min: 0,
        };

        // Seeds every 50 bases on the main diagonal, plus the sentinel.
        let mut hits: Vec<SeedPair> = (1..30)
            .map(|i| SeedPair {
                bpos: 50 * i,
                apos: 50 * i,
                aread: 0,
                bread: 0,
            })
            .collect();
        let nhits = hits.len();
        hits.push(SeedPair {
            bpos: i32::MAX,
            apos: 0,
            aread: i32::MAX,
            bread: i32::MAX,
        });

        let out_a_path = dir.path().join("xa.yb.N0.las");
        let out_b_path = dir.path().join("yb.xa.N0.las");
        let mut out_a = OverlapWriter::create(&out_a_path, 100).unwrap();
        let mut out_b = OverlapWriter::create(&out_b_path, 100).unwrap();
        let mut scores = DiagScores::new(ablock.maxlen, bblock.maxlen, 6);
        let mut work = AlignWork::new();

        let stats = gather_worker(
            &ctx,
            &params,
            &hits,
            0,
            nhits,
            &mut scores,
            &mut work,
            &mut out_a,
            Some(&mut out_b),
        )
        .unwrap();
        assert_eq!(stats.ahits, 1);
        assert_eq!(stats.bhits, 1);
        out_a.finish().unwrap();
        out_b.finish().unwrap();

        let mut reader =
            LasReader::new(File::open(&out_a_path).unwrap(), "xa.yb.N0.las").unwrap();
        assert_eq!(reader.novl, 1);
        let ovl = reader.read_overlap().unwrap().unwrap();
        assert_eq!(ovl.aread, 0);
        assert_eq!(ovl.bread, 0);
        assert_eq!(ovl.path.abpos, 0);
        assert_eq!(ovl.path.aepos, 2000);
        crate::overlap::check_trace_points(&ovl, 100, "xa.yb.N0.las").unwrap();
    }

    #[test]
    fn test_sparse_groups_are_skipped() {
        // A group with fewer seeds than ceil(hitmin/kmer) must be skipped
        // before any binning.
        let dir = tempdir().unwrap();
        let seq = pseudo_seq(500, 5);
        let root = dir.path().join("za");
        create_db(&root, &[seq], 0, true, None).unwrap();
        let mut block = crate::db::ReadBlock::open(&root).unwrap();
        block.trim();
        block.load_bases().unwrap();

        let spec = AlignSpec::new(0.70, 100, block.freq);
        let ctx = PairContext {
            ablock: &block,
            bblock: &block,
            comp: false,
            spec: &spec,
        };
        let params = GatherParams {
            kmer: 14,
            binshift: 6,
            hitmin: 35,
            min_over: 100,
            hgap_min: 0,
        };

        let hits = vec![
            SeedPair {
                bpos: 100,
                apos: 100,
                aread: 0,
                bread: 0,
            },
            SeedPair {
                bpos: i32::MAX,
                apos: 0,
                aread: i32::MAX,
                bread: i32::MAX,
            },
        ];

        let out_path = dir.path().join("za.za.N0.las");
        let mut out = OverlapWriter::create(&out_path, 100).unwrap();
        let mut scores = DiagScores::new(block.maxlen, block.maxlen, 6);
        let mut work = AlignWork::new();
        let stats = gather_worker(
            &ctx,
            &params,
            &hits,
            0,
            1,
            &mut scores,
            &mut work,
            &mut out,
            None,
        )
        .unwrap();
        assert_eq!(stats.nfilt, 0);
        assert_eq!(out.finish().unwrap(), 0);
    }
}
