//! K-mer tuple index: scan a read block into (code, position, read) tuples,
//! radix-sort them by code, and drop over-frequent k-mers.
//!
//! Two emission modes:
//!
//! * *unbiased* — every window of exactly k bases inside a read;
//! * *biased* — a variable-length window grown until its composition
//!   log-likelihood clears a per-base threshold and shrunk from the left
//!   while it still does, emitted only when the window is discriminating
//!   enough.  Suppresses low-entropy k-mers in skewed genomes.
//!
//! Mask intervals (from repeat tracks) are skipped; the scan resumes after
//! each masked region.  Workers fill disjoint slices of the tuple array and
//! count the first radix byte as they go, so the sorter skips its counting
//! pass.

use crate::config;
use crate::db::ReadBlock;
use crate::error::{EngineError, Result};
use crate::radix::{RadixRecord, RadixSorter};
use rayon::prelude::*;

/// Widest supported k (the code must fit 2k bits with a 4^k sentinel).
pub const KMER_MAX: usize = 31;

/// In biased mode, drop windows with specificity <= 4^-(k - MAX_BIAS).
const MAX_BIAS: usize = 2;

/// Implicit fractional scale of the log-composition scores.
const LOG_SCALE: f64 = 10_000.0;

/// A k-mer occurrence: packed code, end position within the read, read index.
/// Field order gives a little-endian byte image whose low bytes are the
/// code, so a byte-radix sort over them orders tuples by (code, read, pos).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KmerPos {
    pub code: u64,
    pub rpos: i32,
    pub read: i32,
}

impl RadixRecord for KmerPos {
    const WIDTH: usize = 16;

    #[inline]
    fn key_byte(&self, off: usize) -> u8 {
        if off < 8 {
            (self.code >> (8 * off)) as u8
        } else if off < 12 {
            (self.rpos >> (8 * (off - 8))) as u8
        } else {
            (self.read >> (8 * (off - 12))) as u8
        }
    }
}

/// Tuple used to pad a worker's slice when masking or bias drops windows:
/// carries the 4^k sentinel code, which outranks every real code on the
/// sorted bytes, so padding always lands after the live tuples.
#[inline]
fn fill_tuple(kmer: usize) -> KmerPos {
    KmerPos {
        code: 1u64 << (2 * kmer),
        rpos: -1,
        read: -1,
    }
}

/// Index build parameters.
#[derive(Debug, Clone)]
pub struct KmerParams {
    pub kmer: usize,
    /// Drop k-mers occurring more than this many times; `None` keeps all.
    pub suppress: Option<u32>,
    pub biased: bool,
}

impl KmerParams {
    pub fn validate(&self) -> Result<()> {
        if self.kmer < 4 || self.kmer > KMER_MAX {
            return Err(EngineError::User(format!(
                "k-mer length {} outside 4..={}",
                self.kmer, KMER_MAX
            )));
        }
        Ok(())
    }
}

/// A sorted, frequency-capped tuple list.  `list[count]` holds the 4^k
/// sentinel tuple terminating every scan.
pub struct KmerIndex {
    pub list: Vec<KmerPos>,
    pub count: usize,
}

#[inline]
fn sentinel_tuple(kmer: usize) -> KmerPos {
    KmerPos {
        code: 1u64 << (2 * kmer),
        rpos: 0,
        read: 0,
    }
}

/// Build the sorted k-mer index of a loaded block.
pub fn sort_kmers(
    block: &ReadBlock,
    params: &KmerParams,
    sorter: &RadixSorter,
    workers: usize,
) -> Result<KmerIndex> {
    params.validate()?;
    let kmer = params.kmer;
    let kshift = 2 * kmer;
    let kmask = (1u64 << kshift) - 1;

    // Window-count prefix over reads; workers split at read boundaries so
    // each owns a contiguous slice of the tuple array.
    let nreads = block.nreads();
    // Biased mode can emit one tuple per scanned position (short windows
    // are padded to k), so its regions are sized by read length.
    let mut prefix = Vec::with_capacity(nreads + 1);
    prefix.push(0usize);
    for r in &block.reads {
        let w = if params.biased {
            r.rlen as usize
        } else {
            (r.rlen as usize).saturating_sub(kmer - 1)
        };
        prefix.push(prefix.last().unwrap() + w);
    }
    let total = *prefix.last().unwrap();
    if total == 0 {
        return Ok(KmerIndex {
            list: vec![sentinel_tuple(kmer)],
            count: 0,
        });
    }

    let mut bounds = Vec::with_capacity(workers + 1);
    bounds.push(0usize);
    for w in 1..workers {
        let target = total * w / workers;
        let r = prefix.partition_point(|&p| p < target).min(nreads);
        bounds.push((*bounds.last().unwrap()).max(r));
    }
    bounds.push(nreads);

    if config::is_verbose() {
        println!(
            "   Kmer count = {} ({:.2} Gb of tuple space)",
            total,
            (total as f64 * 16.0) / 1e9
        );
    }

    let mut src = vec![KmerPos::default(); total];
    let scratch = vec![KmerPos::default(); total];

    // Log-composition tables for biased mode.
    let lognorm = (LOG_SCALE as i64) * kmer as i64;
    let logthresh = (LOG_SCALE as i64) * (kmer - MAX_BIAS) as i64;
    let scale = -LOG_SCALE / 4f64.ln();
    let logbase: [i64; 4] = {
        let mut t = [0i64; 4];
        for (i, v) in t.iter_mut().enumerate() {
            *v = (scale * (block.freq[i].max(1e-6) as f64).ln()).ceil() as i64;
        }
        t
    };

    // Carve the tuple array into per-worker slices.
    let mut regions: Vec<&mut [KmerPos]> = Vec::with_capacity(workers);
    {
        let mut rest: &mut [KmerPos] = &mut src;
        for w in 0..workers {
            let len = prefix[bounds[w + 1]] - prefix[bounds[w]];
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(len);
            regions.push(chunk);
            rest = tail;
        }
    }

    struct FillOut {
        counts: [i64; 256],
        fill: usize,
    }

    let outs: Vec<FillOut> = regions
        .into_par_iter()
        .enumerate()
        .map(|(w, region)| {
            let mut counts = [0i64; 256];
            let mut n = 0usize;
            for i in bounds[w]..bounds[w + 1] {
                let seq = block.seq(i);
                let segments: Vec<(usize, usize)> = match &block.masks {
                    Some(masks) => unmasked_segments(&masks[i], seq.len()),
                    None => vec![(0, seq.len())],
                };
                for (p0, q) in segments {
                    if params.biased {
                        n += scan_biased(
                            seq, i as i32, p0, q, kmer, kmask, lognorm, logthresh, &logbase,
                            &mut region[n..], &mut counts,
                        );
                    } else {
                        n += scan_unbiased(
                            seq, i as i32, p0, q, kmer, kmask, &mut region[n..], &mut counts,
                        );
                    }
                }
            }
            let fill = region.len() - n;
            let pad = fill_tuple(kmer);
            counts[(pad.code & 0xff) as usize] += fill as i64;
            region[n..].fill(pad);
            FillOut { counts, fill }
        })
        .collect();

    let filled: usize = outs.iter().map(|o| o.fill).sum();
    let counts: Vec<[i64; 256]> = outs.iter().map(|o| o.counts).collect();
    let segments: Vec<(usize, usize)> = (0..workers)
        .map(|w| (prefix[bounds[w]], prefix[bounds[w + 1]]))
        .collect();

    // Key bytes cover the code plus the sentinel bit at position 2k, so
    // padding tuples order strictly after every real code.
    let plan: Vec<usize> = (0..(kshift + 8) / 8).collect();
    let (mut sorted, mut other) = sorter.sort_counted(src, scratch, &plan, &segments, &counts)?;

    let mut count = total - filled;
    set_sentinel(&mut sorted, count, kmer);

    // Frequency cap: drop every occurrence of any code repeated more than
    // the suppression limit, then compact.
    if let Some(limit) = params.suppress {
        let too_frequent = limit as usize;
        let mut begs = vec![0usize; workers + 1];
        begs[workers] = count;
        for w in 1..workers {
            let mut x = count * w / workers;
            if x > 0 && x < count {
                let h = sorted[x - 1].code;
                while sorted[x].code == h {
                    x += 1;
                }
            }
            begs[w] = begs[w - 1].max(x.min(count));
        }

        let kept: Vec<usize> = (0..workers)
            .into_par_iter()
            .map(|w| {
                let mut n = 0usize;
                let mut i = begs[w];
                while i < begs[w + 1] {
                    let h = sorted[i].code;
                    let p = i;
                    i += 1;
                    while sorted[i].code == h {
                        i += 1;
                    }
                    if i - p < too_frequent {
                        n += i - p;
                    }
                }
                n
            })
            .collect();

        let mut offs = vec![0usize; workers + 1];
        for w in 0..workers {
            offs[w + 1] = offs[w] + kept[w];
        }

        {
            let mut chunks: Vec<&mut [KmerPos]> = Vec::with_capacity(workers);
            let mut rest: &mut [KmerPos] = &mut other;
            for w in 0..workers {
                let (chunk, tail) =
                    std::mem::take(&mut rest).split_at_mut(offs[w + 1] - offs[w]);
                chunks.push(chunk);
                rest = tail;
            }
            let sorted_ref = &sorted;
            chunks.into_par_iter().enumerate().for_each(|(w, chunk)| {
                let mut n = 0usize;
                let mut i = begs[w];
                while i < begs[w + 1] {
                    let h = sorted_ref[i].code;
                    let p = i;
                    i += 1;
                    while sorted_ref[i].code == h {
                        i += 1;
                    }
                    if i - p < too_frequent {
                        chunk[n..n + (i - p)].copy_from_slice(&sorted_ref[p..i]);
                        n += i - p;
                    }
                }
            });
        }

        count = offs[workers];
        set_sentinel(&mut other, count, kmer);
        sorted = other;

        if config::is_verbose() {
            println!("   Revised kmer count = {}", count);
        }
    }

    sorted.truncate(count + 1);
    Ok(KmerIndex {
        list: sorted,
        count,
    })
}

fn set_sentinel(list: &mut Vec<KmerPos>, count: usize, kmer: usize) {
    let s = sentinel_tuple(kmer);
    if count < list.len() {
        list[count] = s;
    } else {
        list.push(s);
    }
}

/// Complement of the mask intervals within [0, len).
fn unmasked_segments(masks: &[(i32, i32)], len: usize) -> Vec<(usize, usize)> {
    let mut segs = Vec::with_capacity(masks.len() + 1);
    let mut p = 0usize;
    for &(b, e) in masks {
        let b = b.max(0) as usize;
        let e = (e.max(0) as usize).min(len);
        if b > p {
            segs.push((p, b.min(len)));
        }
        p = p.max(e);
    }
    if p < len {
        segs.push((p, len));
    }
    segs
}

/// Emit every full k-window of seq[p0..q).  Returns the number emitted.
fn scan_unbiased(
    seq: &[u8],
    read: i32,
    p0: usize,
    q: usize,
    kmer: usize,
    kmask: u64,
    out: &mut [KmerPos],
    counts: &mut [i64; 256],
) -> usize {
    if p0 + kmer > q {
        return 0;
    }
    let mut n = 0usize;
    let mut c: u64 = 0;
    for &b in &seq[p0..p0 + kmer - 1] {
        c = (c << 2) | b as u64;
    }
    for p in p0 + kmer - 1..q {
        c = ((c << 2) | seq[p] as u64) & kmask;
        out[n] = KmerPos {
            code: c,
            rpos: p as i32,
            read,
        };
        counts[(c & 0xff) as usize] += 1;
        n += 1;
    }
    n
}

/// Variable-window biased emission over seq[p0..q).  Returns the number
/// emitted.
#[allow(clippy::too_many_arguments)]
fn scan_biased(
    seq: &[u8],
    read: i32,
    p0: usize,
    q: usize,
    kmer: usize,
    kmask: u64,
    lognorm: i64,
    logthresh: i64,
    logbase: &[i64; 4],
    out: &mut [KmerPos],
    counts: &mut [i64; 256],
) -> usize {
    let mut n = 0usize;
    let mut c: u64 = 0;
    let mut a: i64 = 0;
    let mut wlen = 1usize;
    let mut p = p0;
    'scan: while p < q {
        let x = seq[p] as usize;
        a += logbase[x];
        c = (c << 2) | x as u64;
        while a < lognorm && wlen < kmer {
            p += 1;
            if p >= q {
                break 'scan;
            }
            wlen += 1;
            let x = seq[p] as usize;
            a += logbase[x];
            c = (c << 2) | x as u64;
        }
        loop {
            let u = a - logbase[seq[p + 1 - wlen] as usize];
            if u < lognorm {
                break;
            }
            a = u;
            wlen -= 1;
        }
        if a > logthresh {
            let d = (c << (2 * (kmer - wlen))) & kmask;
            out[n] = KmerPos {
                code: d,
                rpos: p as i32,
                read,
            };
            counts[(d & 0xff) as usize] += 1;
            n += 1;
        }
        p += 1;
        if p < q {
            a -= logbase[seq[p - wlen] as usize];
        }
    }
    n
}
