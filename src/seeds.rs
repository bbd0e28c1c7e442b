//! Seed-pair enumeration: stream-merge two sorted k-mer lists and emit the
//! cross product of every shared code, then radix-sort the pairs into
//! (bread, aread, apos) order for the diagonal filter.
//!
//! The merge runs twice: a counting pass sizes the pair buffer and builds a
//! histogram of per-code hit counts, from which the adaptive cap is chosen
//! when a memory budget is in force; the emission pass then fills the
//! buffer, counting the first sort byte as it goes.
//!
//! Self comparisons (same block, same orientation) emit only pairs with
//! `bread > aread`, so each mirror pair is reported once.

use crate::config;
use crate::error::{EngineError, Result};
use crate::kmers::KmerIndex;
use crate::radix::{RadixRecord, RadixSorter};
use rayon::prelude::*;

/// Cap on the per-code hit-count histogram.
pub const MAX_GRAM: usize = 10_000;

/// A seed: positions `apos`/`bpos` of a shared k-mer in reads `aread` and
/// `bread`.  Field order gives a little-endian byte image sorted by
/// (bread, aread, apos) when the radix plan covers apos, aread, bread in
/// that order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedPair {
    pub bpos: i32,
    pub apos: i32,
    pub aread: i32,
    pub bread: i32,
}

impl RadixRecord for SeedPair {
    const WIDTH: usize = 16;

    #[inline]
    fn key_byte(&self, off: usize) -> u8 {
        match off / 4 {
            0 => (self.bpos >> (8 * off)) as u8,
            1 => (self.apos >> (8 * (off - 4))) as u8,
            2 => (self.aread >> (8 * (off - 8))) as u8,
            _ => (self.bread >> (8 * (off - 12))) as u8,
        }
    }
}

/// Sorted seed pairs with a terminating sentinel at `pairs[nhits]`.
pub struct SeedMerge {
    pub pairs: Vec<SeedPair>,
    pub nhits: usize,
    /// Per-code hit cap that was applied (`u32::MAX` when unbounded).
    pub limit: u32,
}

/// Radix byte plan ordering pairs by (bread, aread, apos): only the bytes
/// that can be non-zero for the given block dimensions are visited.
pub fn pair_sort_plan(amaxlen: i32, anreads: usize, bnreads: usize) -> Vec<usize> {
    let mut plan = Vec::new();
    for (base, value) in [
        (4usize, amaxlen as u64),
        (8, anreads as u64),
        (12, bnreads as u64),
    ] {
        let mut nbyte = 0usize;
        let mut powr = 1u64;
        while powr < value {
            nbyte += 1;
            if nbyte == 4 {
                break;
            }
            powr <<= 8;
        }
        for off in base..base + nbyte.max(1) {
            plan.push(off);
        }
    }
    plan
}

/// Smallest index k with `list[k].code >= x` (list is sorted by code).
fn find_tuple(list: &KmerIndex, x: u64) -> usize {
    let a = &list.list[..list.count];
    a.partition_point(|t| t.code < x)
}

struct MergeArg {
    abeg: usize,
    aend: usize,
    bbeg: usize,
    nhits: i64,
    offset: i64,
    hitgram: Vec<i64>,
}

/// Merge two sorted indexes into sorted seed pairs.  Returns `None` when no
/// code is shared.  `resident` is the number of 16-byte records already
/// held (the tuple lists), charged against the memory budget.
pub fn merge_seeds(
    alist: &KmerIndex,
    blist: &KmerIndex,
    self_cmp: bool,
    sort_plan: &[usize],
    mem_limit: Option<u64>,
    resident: usize,
    sorter: &RadixSorter,
    workers: usize,
) -> Result<Option<SeedMerge>> {
    if alist.count == 0 || blist.count == 0 {
        return Ok(None);
    }

    // Partition the A list at code boundaries; each worker starts its B
    // scan at the first tuple of its first code.
    let mut args: Vec<MergeArg> = Vec::with_capacity(workers);
    let mut prev_beg = 0usize;
    let mut prev_bbeg = 0usize;
    for w in 1..=workers {
        let (abeg, bbeg) = if w == workers {
            (alist.count, blist.count)
        } else {
            let mut p = alist.count * w / workers;
            if p > 0 {
                let c = alist.list[p - 1].code;
                while alist.list[p].code == c {
                    p += 1;
                }
            }
            let p = p.max(prev_beg);
            (p, find_tuple(blist, alist.list[p].code))
        };
        args.push(MergeArg {
            abeg: prev_beg,
            aend: abeg,
            bbeg: prev_bbeg,
            nhits: 0,
            offset: 0,
            hitgram: vec![0i64; MAX_GRAM],
        });
        prev_beg = abeg;
        prev_bbeg = bbeg;
    }

    args.par_iter_mut().for_each(|arg| {
        if self_cmp {
            count_self(alist, blist, arg);
        } else {
            count_two(alist, blist, arg);
        }
    });

    // Choose the per-code cap from the histogram when a budget binds.
    let limit: i64 = if let Some(budget) = mem_limit {
        let mut histo = vec![0i64; MAX_GRAM];
        for arg in &args {
            for (h, g) in histo.iter_mut().zip(&arg.hitgram) {
                *h += g;
            }
        }
        let avail = (((budget / 16) as i64 - resident as i64) / 2) as f64 * 0.98;
        let avail = avail.max(0.0) as i64;
        let mut tom = 0i64;
        let mut limit = MAX_GRAM as i64;
        for (j, &h) in histo.iter().enumerate() {
            tom += j as i64 * h;
            if tom > avail {
                limit = j as i64;
                break;
            }
        }
        if limit <= 1 {
            return Err(EngineError::ResourceExhausted(
                "memory budget too small for any seed pairs; reduce block size or raise -M".into(),
            ));
        }
        if limit < 10 {
            eprintln!("Warning: sensitivity hampered by low memory allocation");
        } else if limit < MAX_GRAM as i64 && config::is_verbose() {
            println!(
                "   Capping mutual k-mer matches over {} (effectively -t{})",
                limit,
                (limit as f64).sqrt() as i64
            );
        }
        for arg in args.iter_mut() {
            arg.nhits = arg.hitgram[1..limit as usize]
                .iter()
                .enumerate()
                .map(|(j, &h)| (j + 1) as i64 * h)
                .sum();
        }
        limit
    } else {
        i64::MAX
    };

    let mut nhits = 0i64;
    for arg in args.iter_mut() {
        arg.offset = nhits;
        nhits += arg.nhits;
    }
    let nhits = nhits as usize;

    if config::is_verbose() {
        println!("   Hit count = {}", nhits);
    }
    if nhits == 0 {
        return Ok(None);
    }

    let mut pairs = vec![SeedPair::default(); nhits];
    let scratch = vec![SeedPair::default(); nhits];

    // Emission: workers fill disjoint slices and count the low apos byte
    // for the first radix pass.
    let counts: Vec<[i64; 256]> = {
        let mut chunks: Vec<&mut [SeedPair]> = Vec::with_capacity(workers);
        let mut rest: &mut [SeedPair] = &mut pairs;
        for arg in &args {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(arg.nhits as usize);
            chunks.push(chunk);
            rest = tail;
        }
        args.par_iter()
            .zip(chunks.into_par_iter())
            .map(|(arg, chunk)| {
                let mut kptr = [0i64; 256];
                if self_cmp {
                    emit_self(alist, blist, arg, limit, chunk, &mut kptr);
                } else {
                    emit_two(alist, blist, arg, limit, chunk, &mut kptr);
                }
                kptr
            })
            .collect()
    };

    let segments: Vec<(usize, usize)> = args
        .iter()
        .map(|arg| (arg.offset as usize, (arg.offset + arg.nhits) as usize))
        .collect();
    let (mut sorted, _) = sorter.sort_counted(pairs, scratch, sort_plan, &segments, &counts)?;

    sorted.push(SeedPair {
        bpos: i32::MAX,
        apos: 0,
        aread: i32::MAX,
        bread: i32::MAX,
    });

    Ok(Some(SeedMerge {
        pairs: sorted,
        nhits,
        limit: if limit == i64::MAX {
            u32::MAX
        } else {
            limit as u32
        },
    }))
}

/// Count pass over two distinct lists.
fn count_two(alist: &KmerIndex, blist: &KmerIndex, arg: &mut MergeArg) {
    let asort = &alist.list;
    let bsort = &blist.list;
    let mut ia = arg.abeg;
    let mut ib = arg.bbeg;
    let mut ca = asort[ia].code;
    let mut cb = bsort[ib].code;
    let mut nhits = 0i64;
    loop {
        while cb < ca {
            ib += 1;
            cb = bsort[ib].code;
        }
        while cb > ca {
            ia += 1;
            ca = asort[ia].code;
        }
        if cb == ca {
            if ia >= arg.aend {
                break;
            }
            let ja = ia;
            while asort[ia].code == ca {
                ia += 1;
            }
            let jb = ib;
            while bsort[ib].code == cb {
                ib += 1;
            }
            let ct = (ia - ja) as i64 * (ib - jb) as i64;
            nhits += ct;
            if (ct as usize) < MAX_GRAM {
                arg.hitgram[ct as usize] += 1;
            }
            ca = asort[ia].code;
            cb = bsort[ib].code;
        }
    }
    arg.nhits = nhits;
}

/// Count pass of a self comparison (same block, either orientation): only
/// pairs with `bread > aread` count, so mirror duplicates appear once.
fn count_self(alist: &KmerIndex, blist: &KmerIndex, arg: &mut MergeArg) {
    let asort = &alist.list;
    let bsort = &blist.list;
    let mut ia = arg.abeg;
    let mut ib = arg.bbeg;
    let mut ca = asort[ia].code;
    let mut cb = bsort[ib].code;
    let mut nhits = 0i64;
    loop {
        while cb < ca {
            ib += 1;
            cb = bsort[ib].code;
        }
        while cb > ca {
            ia += 1;
            ca = asort[ia].code;
        }
        if cb == ca {
            if ia >= arg.aend {
                break;
            }
            let ja = ia;
            while asort[ia].code == ca {
                ia += 1;
            }
            let jb = ib;
            while bsort[ib].code == cb {
                ib += 1;
            }
            let mut ct = 0i64;
            let mut lb = jb;
            for a in ja..ia {
                let ar = asort[a].read;
                while lb < ib && bsort[lb].read <= ar {
                    lb += 1;
                }
                ct += (ib - lb) as i64;
            }
            nhits += ct;
            if (ct as usize) < MAX_GRAM {
                arg.hitgram[ct as usize] += 1;
            }
            ca = asort[ia].code;
            cb = bsort[ib].code;
        }
    }
    arg.nhits = nhits;
}

/// Emission pass over two distinct lists.
fn emit_two(
    alist: &KmerIndex,
    blist: &KmerIndex,
    arg: &MergeArg,
    limit: i64,
    out: &mut [SeedPair],
    kptr: &mut [i64; 256],
) {
    let asort = &alist.list;
    let bsort = &blist.list;
    let mut ia = arg.abeg;
    let mut ib = arg.bbeg;
    let mut ca = asort[ia].code;
    let mut cb = bsort[ib].code;
    let mut n = 0usize;
    loop {
        while cb < ca {
            ib += 1;
            cb = bsort[ib].code;
        }
        while cb > ca {
            ia += 1;
            ca = asort[ia].code;
        }
        if cb == ca {
            if ia >= arg.aend {
                break;
            }
            let ja = ia;
            while asort[ia].code == ca {
                ia += 1;
            }
            let jb = ib;
            while bsort[ib].code == cb {
                ib += 1;
            }
            let d = ib - jb;
            if ((ia - ja) as i64 * d as i64) < limit {
                for a in ja..ia {
                    let ap = asort[a].rpos;
                    kptr[(ap & 0xff) as usize] += d as i64;
                    for b in jb..ib {
                        out[n] = SeedPair {
                            bpos: bsort[b].rpos,
                            apos: ap,
                            aread: asort[a].read,
                            bread: bsort[b].read,
                        };
                        n += 1;
                    }
                }
            }
            ca = asort[ia].code;
            cb = bsort[ib].code;
        }
    }
    debug_assert_eq!(n, out.len());
}

/// Emission pass of a self comparison.
fn emit_self(
    alist: &KmerIndex,
    blist: &KmerIndex,
    arg: &MergeArg,
    limit: i64,
    out: &mut [SeedPair],
    kptr: &mut [i64; 256],
) {
    let asort = &alist.list;
    let bsort = &blist.list;
    let mut ia = arg.abeg;
    let mut ib = arg.bbeg;
    let mut ca = asort[ia].code;
    let mut cb = bsort[ib].code;
    let mut n = 0usize;
    loop {
        while cb < ca {
            ib += 1;
            cb = bsort[ib].code;
        }
        while cb > ca {
            ia += 1;
            ca = asort[ia].code;
        }
        if cb == ca {
            if ia >= arg.aend {
                break;
            }
            let ja = ia;
            while asort[ia].code == ca {
                ia += 1;
            }
            let jb = ib;
            while bsort[ib].code == cb {
                ib += 1;
            }
            let mut ct = 0i64;
            let mut lb = jb;
            for a in ja..ia {
                let ar = asort[a].read;
                while lb < ib && bsort[lb].read <= ar {
                    lb += 1;
                }
                ct += (ib - lb) as i64;
            }
            if ct < limit {
                let mut lb = jb;
                for a in ja..ia {
                    let ar = asort[a].read;
                    let ap = asort[a].rpos;
                    while lb < ib && bsort[lb].read <= ar {
                        lb += 1;
                    }
                    if lb < ib {
                        kptr[(ap & 0xff) as usize] += (ib - lb) as i64;
                        for b in lb..ib {
                            out[n] = SeedPair {
                                bpos: bsort[b].rpos,
                                apos: ap,
                                aread: ar,
                                bread: bsort[b].read,
                            };
                            n += 1;
                        }
                    }
                }
            }
            ca = asort[ia].code;
            cb = bsort[ib].code;
        }
    }
    debug_assert_eq!(n, out.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_db, ReadBlock};
    use crate::kmers::{sort_kmers, KmerParams};
    use tempfile::tempdir;

    fn index_of(seqs: &[Vec<u8>], kmer: usize) -> KmerIndex {
        let dir = tempdir().unwrap();
        let root = dir.path().join("sb");
        create_db(&root, seqs, 0, true, None).unwrap();
        let mut b = ReadBlock::open(&root).unwrap();
        b.trim();
        b.load_bases().unwrap();
        let params = KmerParams {
            kmer,
            suppress: None,
            biased: false,
        };
        sort_kmers(&b, &params, &RadixSorter::new(2), 2).unwrap()
    }

    #[test]
    fn test_disjoint_reads_share_nothing() {
        // Poly-A vs poly-T: no common k-mer, no seed pairs.
        let a = index_of(&[vec![0u8; 40]], 8);
        let b = index_of(&[vec![3u8; 40]], 8);
        let merged = merge_seeds(
            &a,
            &b,
            false,
            &pair_sort_plan(40, 1, 1),
            None,
            0,
            &RadixSorter::new(2),
            2,
        )
        .unwrap();
        assert!(merged.is_none());
    }

    #[test]
    fn test_shared_kmer_emits_product() {
        // Two identical 12-base reads across blocks: every window pairs
        // with its counterpart (plus periodic repeats).
        let seq: Vec<u8> = (0..12u8).map(|i| (i * 7 + 3) % 4).collect();
        let a = index_of(&[seq.clone()], 8);
        let b = index_of(&[seq.clone()], 8);
        let merged = merge_seeds(
            &a,
            &b,
            false,
            &pair_sort_plan(12, 1, 1),
            None,
            0,
            &RadixSorter::new(2),
            2,
        )
        .unwrap()
        .unwrap();
        assert!(merged.nhits >= 5);
        // Sorted by (bread, aread, apos).
        for w in merged.pairs[..merged.nhits].windows(2) {
            let ka = (w[0].bread, w[0].aread, w[0].apos);
            let kb = (w[1].bread, w[1].aread, w[1].apos);
            assert!(ka <= kb);
        }
    }

    #[test]
    fn test_self_merge_is_strict() {
        // One read against itself: bread > aread never holds, so a self
        // merge of a single-read block yields nothing.
        let seq: Vec<u8> = [0u8, 1, 2, 3].repeat(50);
        let idx = index_of(&[seq], 14);
        let merged = merge_seeds(
            &idx,
            &idx,
            true,
            &pair_sort_plan(200, 1, 1),
            None,
            0,
            &RadixSorter::new(2),
            2,
        )
        .unwrap();
        assert!(merged.is_none());
    }

    #[test]
    fn test_self_merge_two_reads() {
        let seq: Vec<u8> = vec![0, 1, 1, 3, 2, 0, 3, 1, 2, 3, 0, 2, 1, 0, 0, 2, 3, 3, 1, 2];
        let idx = index_of(&[seq.clone(), seq], 8);
        let merged = merge_seeds(
            &idx,
            &idx,
            true,
            &pair_sort_plan(20, 2, 2),
            None,
            0,
            &RadixSorter::new(2),
            2,
        )
        .unwrap()
        .unwrap();
        for p in &merged.pairs[..merged.nhits] {
            assert!(p.bread > p.aread);
        }
        // Identical reads share all 13 windows.
        assert_eq!(merged.nhits, 13);
    }

    #[test]
    fn test_adaptive_cap_reduces_hits() {
        // A highly repetitive pair of blocks under a tiny budget must cap
        // per-code products instead of overflowing it.
        let seq: Vec<u8> = [0u8, 0, 1, 1].repeat(30);
        let a = index_of(&[seq.clone()], 6);
        let b = index_of(&[seq], 6);
        let unbounded = merge_seeds(
            &a,
            &b,
            false,
            &pair_sort_plan(120, 1, 1),
            None,
            0,
            &RadixSorter::new(2),
            2,
        )
        .unwrap()
        .unwrap();
        let capped = merge_seeds(
            &a,
            &b,
            false,
            &pair_sort_plan(120, 1, 1),
            Some(64 * 1024),
            a.count + b.count,
            &RadixSorter::new(2),
            2,
        )
        .unwrap();
        if let Some(capped) = capped {
            assert!(capped.nhits < unbounded.nhits);
            assert!(capped.limit < u32::MAX);
        }
    }

    #[test]
    fn test_pair_sort_plan_widths() {
        let plan = pair_sort_plan(30_000, 200, 70_000);
        // apos needs 2 bytes, aread 1, bread 3.
        assert_eq!(plan, vec![4, 5, 8, 12, 13, 14]);
    }
}
