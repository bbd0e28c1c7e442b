//! Adaptive wavefront local aligner.
//!
//! Starting from a seed point in the edit graph of two reads, forward and
//! reverse waves of furthest-reaching points are advanced one edit unit at
//! a time.  Each diagonal carries a 60-column bitvector of its recent
//! alignment history; a precomputed table over the last 30 columns decides
//! the *trim point* — the furthest point whose trailing columns still score
//! non-negatively at the target correlation.  Trace-point pebbles are
//! dropped into an append-only arena whenever a wavefront crosses a
//! trace-spacing boundary in either read, and are walked backward at
//! termination to recover the per-segment (edit count, b-advance) pairs.
//!
//! Coordinates inside the waves are anti-diagonals `2*(a+b)`; diagonals are
//! `a-b`.  The sentinel base value 4 framing every read clips a wave
//! against a sequence end.

use crate::error::{EngineError, Result};
use crate::overlap::Path;

/// Columns of alignment history kept per diagonal.
pub const PATH_LEN: i32 = 60;
const PATH_TOP: u64 = 1 << 60;
const PATH_INT: u64 = PATH_TOP - 1;

/// The trim statistic examines twice this many trailing columns.
pub const TRIM_LEN: u32 = 15;
const TRIM_MASK: u64 = (1 << TRIM_LEN) - 1;

/// How far the last trim point may lag the best point before giving up.
const TRIM_MLAG: i32 = 200;
/// How far a diagonal may lag the best point before being pruned.
const WAVE_LAG: i32 = 30;

/// Implicit fractional scale of the trim-table scores.
const FRACTION: i32 = 1000;

/// Empirical correlation adjustment indexed by minor base frequency.
static BIAS_FACTOR: [f64; 10] = [
    0.690, 0.690, 0.690, 0.690, 0.780, 0.850, 0.900, 0.933, 0.966, 1.000,
];

const DEAD_LO: i32 = -1;
const DEAD_HI: i32 = i32::MAX / 2;
const CLIP_NONE_LO: i32 = i32::MIN / 2;
const CLIP_NONE_HI: i32 = i32::MAX / 2;

/// Alignment acceptance parameters and the derived trim tables, built once
/// per comparison pass and shared read-only across workers.
pub struct AlignSpec {
    pub ave_corr: f64,
    pub trace_space: i32,
    pub freq: [f32; 4],
    ave_path: i32,
    score: Vec<i16>,
    table: Vec<i16>,
}

impl AlignSpec {
    /// `ave_corr` is 1 - 2*error_rate of the sought alignments; `freq` the
    /// block's base composition.
    pub fn new(ave_corr: f64, trace_space: i32, freq: [f32; 4]) -> AlignSpec {
        let mut minor = (freq[0] + freq[3]) as f64;
        if minor > 0.5 {
            minor = 1.0 - minor;
        }
        let mut bias = ((minor + 0.025) * 20.0 - 1.0) as i32;
        if minor < 0.2 {
            eprintln!("Warning: base bias worse than 80/20%");
            bias = 3;
        }
        let factor = BIAS_FACTOR[bias.clamp(0, 9) as usize];

        let ave_path = (PATH_LEN as f64 * (1.0 - factor * (1.0 - ave_corr))) as i32;
        let mscore = (FRACTION as f64 * factor * (1.0 - ave_corr)) as i32;
        let dscore = FRACTION - mscore;

        let size = (TRIM_MASK + 1) as usize;
        let mut score = vec![0i16; size];
        let mut table = vec![0i16; size];
        set_table(0, 0, 0, 0, mscore, dscore, &mut table, &mut score);

        AlignSpec {
            ave_corr,
            trace_space,
            freq,
            ave_path,
            score,
            table,
        }
    }

    #[inline]
    fn trim_ok(&self, bits: u64) -> bool {
        let lo = (bits & TRIM_MASK) as usize;
        let hi = ((bits >> TRIM_LEN) & TRIM_MASK) as usize;
        self.table[lo] >= 0 && self.table[hi] as i32 + self.score[lo] as i32 >= 0
    }
}

/// TABLE[x] >= 0 iff the alignment encoded by x (1 = match) scores
/// non-negatively on every suffix under match = mscore, mismatch = -dscore.
fn set_table(
    bit: u32,
    prefix: usize,
    sc: i32,
    mut max: i32,
    mscore: i32,
    dscore: i32,
    table: &mut [i16],
    score: &mut [i16],
) {
    if bit >= TRIM_LEN {
        table[prefix] = (sc - max) as i16;
        score[prefix] = sc as i16;
    } else {
        if sc > max {
            max = sc;
        }
        set_table(bit + 1, prefix << 1, sc - dscore, max, mscore, dscore, table, score);
        set_table(
            bit + 1,
            (prefix << 1) | 1,
            sc + mscore,
            max,
            mscore,
            dscore,
            table,
            score,
        );
    }
}

/// A sequence inside the sentinel-framed arena.  Out-of-arena probes read
/// as sentinels, so waves clip instead of escaping.
#[derive(Clone, Copy)]
pub struct SeqView<'a> {
    arena: &'a [u8],
    base: usize,
    pub len: i32,
}

impl<'a> SeqView<'a> {
    pub fn new(arena: &'a [u8], base: usize, len: i32) -> SeqView<'a> {
        SeqView { arena, base, len }
    }

    #[inline]
    fn at(&self, i: i32) -> u8 {
        let idx = self.base as i64 + i as i64;
        if idx < 0 || idx >= self.arena.len() as i64 {
            4
        } else {
            self.arena[idx as usize]
        }
    }
}

/// One arena cell: parent link, diagonal, wave number at the crossing, and
/// the coordinate of the trace boundary crossed.
#[derive(Clone, Copy, Debug)]
struct Pebble {
    ptr: i32,
    diag: i32,
    diff: i32,
    mark: i32,
}

/// Per-worker reusable wave storage.
pub struct AlignWork {
    v: Vec<i32>,
    m: Vec<i32>,
    ha: Vec<i32>,
    hb: Vec<i32>,
    na: Vec<i32>,
    nb: Vec<i32>,
    t: Vec<u64>,
    cells: Vec<Pebble>,
}

impl AlignWork {
    pub fn new() -> AlignWork {
        AlignWork {
            v: Vec::new(),
            m: Vec::new(),
            ha: Vec::new(),
            hb: Vec::new(),
            na: Vec::new(),
            nb: Vec::new(),
            t: Vec::new(),
            cells: Vec::new(),
        }
    }

    fn ensure(&mut self, n: usize) {
        if self.v.len() < n {
            self.v.resize(n, 0);
            self.m.resize(n, 0);
            self.ha.resize(n, 0);
            self.hb.resize(n, 0);
            self.na.resize(n, 0);
            self.nb.resize(n, 0);
            self.t.resize(n, 0);
        }
    }

    fn push_cell(&mut self, ptr: i32, diag: i32, diff: i32, mark: i32) -> Result<i32> {
        if self.cells.len() == self.cells.capacity() {
            let grow = self.cells.len() / 5 + 10_000;
            self.cells
                .try_reserve(grow)
                .map_err(|_| EngineError::ResourceExhausted("trace pebble arena".into()))?;
        }
        self.cells.push(Pebble {
            ptr,
            diag,
            diff,
            mark,
        });
        Ok(self.cells.len() as i32 - 1)
    }
}

impl Default for AlignWork {
    fn default() -> Self {
        Self::new()
    }
}

/// The two sequences of a candidate pair.  `comp` marks the B side as a
/// complemented view; `same` guards the self-identity diagonal when a read
/// is aligned against itself.
pub struct AlignInput<'a> {
    pub a: SeqView<'a>,
    pub b: SeqView<'a>,
    pub comp: bool,
    pub same: bool,
}

/// End state of one wave pass.
struct WaveEnd {
    enda: i32, // a-coordinate of the trim point
    endb: i32, // b-coordinate of the trim point
    diffs: i32,
    apairs: Vec<(i32, i32)>,
    bpairs: Vec<(i32, i32)>,
    /// Reverse pass only: the seed-side pair must fuse with the forward
    /// pass's first pair when the seed is off the trace grid.
    aseed: bool,
    bseed: bool,
}

/// Find the longest local alignment through seed point (x, y), returning
/// the paths from the A and the B perspective.  The paths are degenerate
/// (empty extent) when no trim point of acceptable quality was reached.
pub fn local_alignment(
    work: &mut AlignWork,
    spec: &AlignSpec,
    input: &AlignInput,
    x: i32,
    y: i32,
) -> Result<(Path, Path)> {
    let alen = input.a.len;
    let blen = input.b.len;
    work.ensure((alen + blen + 3) as usize);

    let diag = x - y;
    let anti = x + y;

    let fwd = forward_wave(work, spec, input, diag, diag, anti)?;
    let rev = reverse_wave(work, spec, input, diag, diag, anti)?;

    let diffs = fwd.diffs + rev.diffs;
    let apath = Path {
        diffs,
        abpos: rev.enda,
        bbpos: rev.endb,
        aepos: fwd.enda,
        bepos: fwd.endb,
        trace: stitch(&rev.apairs, rev.aseed, &fwd.apairs),
    };

    let (babpos, bbbpos, baepos, bbepos) = if input.comp {
        (
            blen - fwd.endb,
            alen - fwd.enda,
            blen - rev.endb,
            alen - rev.enda,
        )
    } else {
        (rev.endb, rev.enda, fwd.endb, fwd.enda)
    };
    let mut btrace = stitch(&rev.bpairs, rev.bseed, &fwd.bpairs);
    if input.comp {
        reverse_pairs(&mut btrace);
    }
    let bpath = Path {
        diffs,
        abpos: babpos,
        bbpos: bbbpos,
        aepos: baepos,
        bepos: bbepos,
        trace: btrace,
    };

    Ok((apath, bpath))
}

/// Join the reverse (begin -> seed) and forward (seed -> end) segment
/// lists, fusing the two partial segments that share the seed's window.
fn stitch(rev: &[(i32, i32)], seed_partial: bool, fwd: &[(i32, i32)]) -> Vec<u16> {
    let mut out = Vec::with_capacity(2 * (rev.len() + fwd.len()));
    let mut push = |p: (i32, i32)| {
        out.push(p.0.max(0) as u16);
        out.push(p.1.max(0) as u16);
    };
    if seed_partial && !fwd.is_empty() {
        for &p in &rev[..rev.len() - 1] {
            push(p);
        }
        let s = rev[rev.len() - 1];
        push((s.0 + fwd[0].0, s.1 + fwd[0].1));
        for &p in &fwd[1..] {
            push(p);
        }
    } else {
        for &p in rev {
            push(p);
        }
        for &p in fwd {
            push(p);
        }
    }
    out
}

fn reverse_pairs(trace: &mut [u16]) {
    let n = trace.len() / 2;
    for i in 0..n / 2 {
        let j = n - 1 - i;
        trace.swap(2 * i, 2 * j);
        trace.swap(2 * i + 1, 2 * j + 1);
    }
}

fn forward_wave(
    work: &mut AlignWork,
    spec: &AlignSpec,
    input: &AlignInput,
    mind: i32,
    maxd: i32,
    mida: i32,
) -> Result<WaveEnd> {
    let a = input.a;
    let b = input.b;
    let ts = spec.trace_space;
    let path_ave = spec.ave_path;
    let off = b.len + 1;
    let ix = |k: i32| (k + off) as usize;
    let boff = if input.comp { b.len % ts } else { 0 };

    work.cells.clear();

    let mut hgh = maxd;
    let mut low = mind;
    let pos = if input.same { 1 } else { CLIP_NONE_LO };
    let mut dif = 0i32;

    let mut more = true;
    let mut aclip = CLIP_NONE_HI;
    let mut bclip = CLIP_NONE_LO;

    let mut besta = mida;
    let mut trima = mida;
    let mut morea = mida;
    let mut lasta = mida;
    let mut besty = (mida - hgh) >> 1;
    let mut trimy = besty;
    let mut morey = besty;
    let mut trimd = 0i32;
    let mut mored = 0i32;
    let mut trimha = 0i32;
    let mut moreha = 0i32;
    let mut trimhb = 1i32;
    let mut morehb = 1i32;
    let mut morem = -1i32;

    // 0-wave: slide out from the seed anti-diagonal on every diagonal.
    for k in (low..=hgh).rev() {
        let mut y = (mida - k) >> 1;

        let mut na = ((y + k) / ts) * ts;
        let mut ha = work.push_cell(-1, k, 0, na)?;
        na += ts;

        let mut nb = ((y + (ts - boff)) / ts - 1) * ts + boff;
        let mut hb = work.push_cell(-1, k, 0, nb)?;
        nb += ts;

        loop {
            let c = b.at(y);
            if c == 4 {
                more = false;
                if bclip < k {
                    bclip = k;
                }
                break;
            }
            let d = a.at(y + k);
            if c != d {
                if d == 4 {
                    more = false;
                    aclip = k;
                }
                break;
            }
            y += 1;
        }
        let c = (y << 1) + k;

        while y + k >= na {
            ha = work.push_cell(ha, k, 0, na)?;
            na += ts;
        }
        while y >= nb {
            hb = work.push_cell(hb, k, 0, nb)?;
            nb += ts;
        }

        if c > besta {
            besta = c;
            trima = c;
            lasta = c;
            besty = y;
            trimy = y;
            trimha = ha;
            trimhb = hb;
        }

        work.v[ix(k)] = c;
        work.t[ix(k)] = PATH_INT;
        work.m[ix(k)] = PATH_LEN;
        work.ha[ix(k)] = ha;
        work.hb[ix(k)] = hb;
        work.na[ix(k)] = na;
        work.nb[ix(k)] = nb;
    }

    if !more {
        if b.at(besty) != 4 && a.at(besta - besty) != 4 {
            more = true;
        }
        if hgh >= aclip {
            hgh = aclip - 1;
            if morem <= work.m[ix(aclip)] {
                morem = work.m[ix(aclip)];
                morea = work.v[ix(aclip)];
                morey = (morea - aclip) / 2;
                moreha = work.ha[ix(aclip)];
                morehb = work.hb[ix(aclip)];
            }
        }
        if low <= bclip {
            low = bclip + 1;
            if morem <= work.m[ix(bclip)] {
                morem = work.m[ix(bclip)];
                morea = work.v[ix(bclip)];
                morey = (morea - bclip) / 2;
                moreha = work.ha[ix(bclip)];
                morehb = work.hb[ix(bclip)];
            }
        }
        aclip = CLIP_NONE_HI;
        bclip = CLIP_NONE_LO;
    }

    // Successive waves until the trim point lags too far or both ends clip.
    while more && lasta >= besta - TRIM_MLAG {
        hgh += 1;
        if low > pos {
            low -= 1;
            work.na[ix(low)] = work.na[ix(low + 1)];
            work.nb[ix(low)] = work.nb[ix(low + 1)];
            work.v[ix(low)] = DEAD_LO;
        }
        dif += 1;
        work.na[ix(hgh)] = work.na[ix(hgh - 1)];
        work.nb[ix(hgh)] = work.nb[ix(hgh - 1)];

        let mut am = DEAD_LO;
        let mut ac = DEAD_LO;
        work.v[ix(hgh)] = DEAD_LO;
        work.v[ix(hgh + 1)] = DEAD_LO;
        work.v[ix(low - 1)] = DEAD_LO;

        let mut t_save = PATH_INT;
        let mut n_save = PATH_LEN;
        let mut ua = -1i32;
        let mut ub = -1i32;

        for k in (low..=hgh).rev() {
            let ap = ac;
            ac = am;
            am = work.v[ix(k - 1)];

            let (c0, mut m, mut bits, mut ha, mut hb) = if ac < am {
                if am < ap {
                    (ap + 1, n_save, t_save, ua, ub)
                } else {
                    (
                        am + 1,
                        work.m[ix(k - 1)],
                        work.t[ix(k - 1)],
                        work.ha[ix(k - 1)],
                        work.hb[ix(k - 1)],
                    )
                }
            } else if ac < ap {
                (ap + 1, n_save, t_save, ua, ub)
            } else {
                (
                    ac + 2,
                    work.m[ix(k)],
                    work.t[ix(k)],
                    work.ha[ix(k)],
                    work.hb[ix(k)],
                )
            };

            if bits & PATH_TOP != 0 {
                m -= 1;
            }
            bits <<= 1;

            let mut y = (c0 - k) >> 1;
            loop {
                let cb = b.at(y);
                if cb == 4 {
                    more = false;
                    if bclip < k {
                        bclip = k;
                    }
                    break;
                }
                let d = a.at(y + k);
                if cb != d {
                    if d == 4 {
                        more = false;
                        aclip = k;
                    }
                    break;
                }
                y += 1;
                if bits & PATH_TOP == 0 {
                    m += 1;
                }
                bits = (bits << 1) | 1;
            }
            let c = (y << 1) + k;

            while y + k >= work.na[ix(k)] {
                if ha >= 0 && work.cells[ha as usize].mark < work.na[ix(k)] {
                    let mark = work.na[ix(k)];
                    ha = work.push_cell(ha, k, dif, mark)?;
                }
                work.na[ix(k)] += ts;
            }
            while y >= work.nb[ix(k)] {
                if hb >= 0 && work.cells[hb as usize].mark < work.nb[ix(k)] {
                    let mark = work.nb[ix(k)];
                    hb = work.push_cell(hb, k, dif, mark)?;
                }
                work.nb[ix(k)] += ts;
            }

            if c > besta {
                besta = c;
                besty = y;
                if m >= path_ave {
                    lasta = c;
                    if spec.trim_ok(bits) {
                        trima = c;
                        trimy = y;
                        trimd = dif;
                        trimha = ha;
                        trimhb = hb;
                    }
                }
            }

            t_save = work.t[ix(k)];
            n_save = work.m[ix(k)];
            ua = work.ha[ix(k)];
            ub = work.hb[ix(k)];
            work.v[ix(k)] = c;
            work.t[ix(k)] = bits;
            work.m[ix(k)] = m;
            work.ha[ix(k)] = ha;
            work.hb[ix(k)] = hb;
        }

        if !more {
            if b.at(besty) != 4 && a.at(besta - besty) != 4 {
                more = true;
            }
            if hgh >= aclip {
                hgh = aclip - 1;
                if morem <= work.m[ix(aclip)] {
                    morem = work.m[ix(aclip)];
                    morea = work.v[ix(aclip)];
                    morey = (morea - aclip) / 2;
                    mored = dif;
                    moreha = work.ha[ix(aclip)];
                    morehb = work.hb[ix(aclip)];
                }
            }
            if low <= bclip {
                low = bclip + 1;
                if morem <= work.m[ix(bclip)] {
                    morem = work.m[ix(bclip)];
                    morea = work.v[ix(bclip)];
                    morey = (morea - bclip) / 2;
                    mored = dif;
                    moreha = work.ha[ix(bclip)];
                    morehb = work.hb[ix(bclip)];
                }
            }
            aclip = CLIP_NONE_HI;
            bclip = CLIP_NONE_LO;
        }

        let n = besta - WAVE_LAG;
        while hgh >= low {
            if work.v[ix(hgh)] < n {
                hgh -= 1;
            } else {
                while work.v[ix(low)] < n {
                    low += 1;
                }
                break;
            }
        }
    }

    // Adopt the clip-side maximum when the wave ran off a sequence end.
    let (enda, endb) = if morem >= 0 {
        trimy = morey;
        trimd = mored;
        trimha = moreha;
        trimhb = morehb;
        (morea - morey, morey)
    } else {
        (trima - trimy, trimy)
    };

    // A-trace: walk the pebble chain from the seed outward.
    let mut apairs = Vec::new();
    {
        let cells = &mut work.cells;
        let root = reverse_chain(cells, trimha);
        let mut h = root;
        let mut k = cells[h as usize].diag;
        let mut bcur = (mida - k) / 2;
        let mut dprev = 0i32;
        h = cells[h as usize].ptr;
        while h >= 0 {
            k = cells[h as usize].diag;
            let av = cells[h as usize].mark - k;
            apairs.push((cells[h as usize].diff - dprev, av - bcur));
            dprev = cells[h as usize].diff;
            bcur = av;
            h = cells[h as usize].ptr;
        }
        if bcur + k != enda {
            apairs.push((trimd - dprev, trimy - bcur));
        } else if bcur != trimy {
            match apairs.last_mut() {
                Some(last) => {
                    last.0 += trimd - dprev;
                    last.1 += trimy - bcur;
                }
                None => apairs.push((trimd - dprev, trimy - bcur)),
            }
        }
    }

    // B-trace: same walk over the B-boundary chain.
    let mut bpairs = Vec::new();
    {
        let cells = &mut work.cells;
        let root = reverse_chain(cells, trimhb);
        let mut h = root;
        let mut k = cells[h as usize].diag;
        let mut acur = (mida + k) / 2;
        let mut dprev = 0i32;
        h = cells[h as usize].ptr;
        while h >= 0 {
            k = cells[h as usize].diag;
            let av = cells[h as usize].mark + k;
            bpairs.push((cells[h as usize].diff - dprev, av - acur));
            dprev = cells[h as usize].diff;
            acur = av;
            h = cells[h as usize].ptr;
        }
        if acur - k != endb {
            bpairs.push((trimd - dprev, enda - acur));
        } else if acur != enda {
            match bpairs.last_mut() {
                Some(last) => {
                    last.0 += trimd - dprev;
                    last.1 += enda - acur;
                }
                None => bpairs.push((trimd - dprev, enda - acur)),
            }
        }
    }

    Ok(WaveEnd {
        enda,
        endb,
        diffs: trimd,
        apairs,
        bpairs,
        aseed: false,
        bseed: false,
    })
}

fn reverse_wave(
    work: &mut AlignWork,
    spec: &AlignSpec,
    input: &AlignInput,
    mind: i32,
    maxd: i32,
    mida: i32,
) -> Result<WaveEnd> {
    let a = input.a;
    let b = input.b;
    let ts = spec.trace_space;
    let path_ave = spec.ave_path;
    let off = b.len + 1;
    let ix = |k: i32| (k + off) as usize;
    let boff = if input.comp { b.len % ts } else { 0 };

    work.cells.clear();

    let mut hgh = maxd;
    let mut low = mind;
    let pos = if input.same { 1 } else { CLIP_NONE_LO };
    let mut dif = 0i32;

    let mut more = true;
    let mut aclip = CLIP_NONE_LO;
    let mut bclip = CLIP_NONE_HI;

    let mut besta = mida;
    let mut trima = mida;
    let mut morea = mida;
    let mut lasta = mida;
    let mut besty = (mida - hgh) >> 1;
    let mut trimy = besty;
    let mut morey = besty;
    let mut trimd = 0i32;
    let mut mored = 0i32;
    let mut trimha = 0i32;
    let mut moreha = 0i32;
    let mut trimhb = 1i32;
    let mut morehb = 1i32;
    let mut morem = -1i32;

    for k in low..=hgh {
        let mut y = (mida - k) >> 1;

        let mut na = ((y + k - 1) / ts) * ts;
        let mut ha = work.push_cell(-1, k, 0, y + k)?;
        let mut nb = ((y + (ts - boff) - 1) / ts - 1) * ts + boff;
        let mut hb = work.push_cell(-1, k, 0, y)?;

        loop {
            let c = b.at(y - 1);
            if c == 4 {
                more = false;
                if bclip > k {
                    bclip = k;
                }
                break;
            }
            let d = a.at(y + k - 1);
            if c != d {
                if d == 4 {
                    more = false;
                    aclip = k;
                }
                break;
            }
            y -= 1;
        }
        let c = (y << 1) + k;

        while y + k <= na {
            ha = work.push_cell(ha, k, 0, na)?;
            na -= ts;
        }
        while y <= nb {
            hb = work.push_cell(hb, k, 0, nb)?;
            nb -= ts;
        }

        if c < besta {
            besta = c;
            trima = c;
            lasta = c;
            besty = y;
            trimy = y;
            trimha = ha;
            trimhb = hb;
        }

        work.v[ix(k)] = c;
        work.t[ix(k)] = PATH_INT;
        work.m[ix(k)] = PATH_LEN;
        work.ha[ix(k)] = ha;
        work.hb[ix(k)] = hb;
        work.na[ix(k)] = na;
        work.nb[ix(k)] = nb;
    }

    if !more {
        if b.at(besty - 1) != 4 && a.at(besta - besty - 1) != 4 {
            more = true;
        }
        if low <= aclip {
            low = aclip + 1;
            if morem <= work.m[ix(aclip)] {
                morem = work.m[ix(aclip)];
                morea = work.v[ix(aclip)];
                morey = (morea - aclip) / 2;
                moreha = work.ha[ix(aclip)];
                morehb = work.hb[ix(aclip)];
            }
        }
        if hgh >= bclip {
            hgh = bclip - 1;
            if morem <= work.m[ix(bclip)] {
                morem = work.m[ix(bclip)];
                morea = work.v[ix(bclip)];
                morey = (morea - bclip) / 2;
                moreha = work.ha[ix(bclip)];
                morehb = work.hb[ix(bclip)];
            }
        }
        aclip = CLIP_NONE_LO;
        bclip = CLIP_NONE_HI;
    }

    while more && lasta <= besta + TRIM_MLAG {
        hgh += 1;
        let mut ap;
        if low > pos {
            low -= 1;
            work.na[ix(low)] = work.na[ix(low + 1)];
            work.nb[ix(low)] = work.nb[ix(low + 1)];
            work.v[ix(low)] = DEAD_HI;
            ap = DEAD_HI;
        } else {
            ap = work.v[ix(low)];
        }
        dif += 1;
        work.na[ix(hgh)] = work.na[ix(hgh - 1)];
        work.nb[ix(hgh)] = work.nb[ix(hgh - 1)];

        let mut ac = DEAD_HI;
        work.v[ix(hgh)] = DEAD_HI;
        work.v[ix(hgh + 1)] = DEAD_HI;
        work.v[ix(low - 1)] = DEAD_HI;

        let mut t_save = PATH_INT;
        let mut n_save = PATH_LEN;
        let mut ua = -1i32;
        let mut ub = -1i32;

        for k in low..=hgh {
            let am = ac;
            ac = ap;
            ap = work.v[ix(k + 1)];

            let (c0, mut m, mut bits, mut ha, mut hb) = if ac > ap {
                if ap > am {
                    (am - 1, n_save, t_save, ua, ub)
                } else {
                    (
                        ap - 1,
                        work.m[ix(k + 1)],
                        work.t[ix(k + 1)],
                        work.ha[ix(k + 1)],
                        work.hb[ix(k + 1)],
                    )
                }
            } else if ac > am {
                (am - 1, n_save, t_save, ua, ub)
            } else {
                (
                    ac - 2,
                    work.m[ix(k)],
                    work.t[ix(k)],
                    work.ha[ix(k)],
                    work.hb[ix(k)],
                )
            };

            if bits & PATH_TOP != 0 {
                m -= 1;
            }
            bits <<= 1;

            let mut y = (c0 - k) >> 1;
            loop {
                let cb = b.at(y - 1);
                if cb == 4 {
                    more = false;
                    if bclip > k {
                        bclip = k;
                    }
                    break;
                }
                let d = a.at(y + k - 1);
                if cb != d {
                    if d == 4 {
                        more = false;
                        aclip = k;
                    }
                    break;
                }
                y -= 1;
                if bits & PATH_TOP == 0 {
                    m += 1;
                }
                bits = (bits << 1) | 1;
            }
            let c = (y << 1) + k;

            while y + k <= work.na[ix(k)] {
                if ha >= 0 && work.cells[ha as usize].mark > work.na[ix(k)] {
                    let mark = work.na[ix(k)];
                    ha = work.push_cell(ha, k, dif, mark)?;
                }
                work.na[ix(k)] -= ts;
            }
            while y <= work.nb[ix(k)] {
                if hb >= 0 && work.cells[hb as usize].mark > work.nb[ix(k)] {
                    let mark = work.nb[ix(k)];
                    hb = work.push_cell(hb, k, dif, mark)?;
                }
                work.nb[ix(k)] -= ts;
            }

            if c < besta {
                besta = c;
                besty = y;
                if m >= path_ave {
                    lasta = c;
                    if spec.trim_ok(bits) {
                        trima = c;
                        trimy = y;
                        trimd = dif;
                        trimha = ha;
                        trimhb = hb;
                    }
                }
            }

            t_save = work.t[ix(k)];
            n_save = work.m[ix(k)];
            ua = work.ha[ix(k)];
            ub = work.hb[ix(k)];
            work.v[ix(k)] = c;
            work.t[ix(k)] = bits;
            work.m[ix(k)] = m;
            work.ha[ix(k)] = ha;
            work.hb[ix(k)] = hb;
        }

        if !more {
            if b.at(besty - 1) != 4 && a.at(besta - besty - 1) != 4 {
                more = true;
            }
            if low <= aclip {
                low = aclip + 1;
                if morem <= work.m[ix(aclip)] {
                    morem = work.m[ix(aclip)];
                    morea = work.v[ix(aclip)];
                    morey = (morea - aclip) / 2;
                    mored = dif;
                    moreha = work.ha[ix(aclip)];
                    morehb = work.hb[ix(aclip)];
                }
            }
            if hgh >= bclip {
                hgh = bclip - 1;
                if morem <= work.m[ix(bclip)] {
                    morem = work.m[ix(bclip)];
                    morea = work.v[ix(bclip)];
                    morey = (morea - bclip) / 2;
                    mored = dif;
                    moreha = work.ha[ix(bclip)];
                    morehb = work.hb[ix(bclip)];
                }
            }
            aclip = CLIP_NONE_LO;
            bclip = CLIP_NONE_HI;
        }

        let n = besta + WAVE_LAG;
        while hgh >= low {
            if work.v[ix(hgh)] > n {
                hgh -= 1;
            } else {
                while work.v[ix(low)] > n {
                    low += 1;
                }
                break;
            }
        }
    }

    let (enda, endb) = if morem >= 0 {
        trimy = morey;
        trimd = mored;
        trimha = moreha;
        trimhb = morehb;
        (morea - morey, morey)
    } else {
        (trima - trimy, trimy)
    };

    // A-trace: walk from the seed backward; segments come out seed ->
    // begin and are reversed at the end.
    let mut apairs = Vec::new();
    let mut aseed = false;
    {
        let cells = &mut work.cells;
        let root = reverse_chain(cells, trimha);
        let mut h = root;
        let mut k = cells[h as usize].diag;
        let mut bcur = cells[h as usize].mark - k;
        let mut dprev = 0i32;

        if (bcur + k) % ts != 0 {
            h = cells[h as usize].ptr;
            let (av, dv) = if h < 0 {
                (trimy, trimd)
            } else {
                k = cells[h as usize].diag;
                (cells[h as usize].mark - k, cells[h as usize].diff)
            };
            apairs.push((dv - dprev, bcur - av));
            aseed = true;
            dprev = dv;
            bcur = av;
        }
        if h >= 0 {
            let mut hh = cells[h as usize].ptr;
            while hh >= 0 {
                k = cells[hh as usize].diag;
                let av = cells[hh as usize].mark - k;
                apairs.push((cells[hh as usize].diff - dprev, bcur - av));
                dprev = cells[hh as usize].diff;
                bcur = av;
                hh = cells[hh as usize].ptr;
            }
            if bcur + k != enda {
                apairs.push((trimd - dprev, bcur - trimy));
            } else if bcur != trimy {
                match apairs.last_mut() {
                    Some(last) => {
                        last.0 += trimd - dprev;
                        last.1 += bcur - trimy;
                    }
                    None => {
                        apairs.push((trimd - dprev, bcur - trimy));
                        aseed = true;
                    }
                }
            }
        }
        apairs.reverse();
    }

    // B-trace.
    let mut bpairs = Vec::new();
    let mut bseed = false;
    {
        let cells = &mut work.cells;
        let root = reverse_chain(cells, trimhb);
        let mut h = root;
        let mut k = cells[h as usize].diag;
        let mut acur = cells[h as usize].mark + k;
        let mut dprev = 0i32;

        if (acur - k) % ts != boff {
            h = cells[h as usize].ptr;
            let (av, dv) = if h < 0 {
                (enda, trimd)
            } else {
                k = cells[h as usize].diag;
                (cells[h as usize].mark + k, cells[h as usize].diff)
            };
            bpairs.push((dv - dprev, acur - av));
            bseed = true;
            dprev = dv;
            acur = av;
        }
        if h >= 0 {
            let mut hh = cells[h as usize].ptr;
            while hh >= 0 {
                k = cells[hh as usize].diag;
                let av = cells[hh as usize].mark + k;
                bpairs.push((cells[hh as usize].diff - dprev, acur - av));
                dprev = cells[hh as usize].diff;
                acur = av;
                hh = cells[hh as usize].ptr;
            }
            if acur - k != endb {
                bpairs.push((trimd - dprev, acur - enda));
            } else if acur != enda {
                match bpairs.last_mut() {
                    Some(last) => {
                        last.0 += trimd - dprev;
                        last.1 += acur - enda;
                    }
                    None => {
                        bpairs.push((trimd - dprev, acur - enda));
                        bseed = true;
                    }
                }
            }
        }
        bpairs.reverse();
    }

    Ok(WaveEnd {
        enda,
        endb,
        diffs: trimd,
        apairs,
        bpairs,
        aseed,
        bseed,
    })
}

/// Reverse a pebble parent chain in place; returns the old tail (the new
/// walk root).
fn reverse_chain(cells: &mut [Pebble], head: i32) -> i32 {
    let mut prev = -1i32;
    let mut h = head;
    while h >= 0 {
        let next = cells[h as usize].ptr;
        cells[h as usize].ptr = prev;
        prev = h;
        h = next;
    }
    prev
}
