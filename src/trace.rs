//! Exact edit-trace reconstruction between trace points.
//!
//! Given a path with trace points and the two read sequences, rebuild an
//! exact alignment trace: a list of signed integers where -j places a dash
//! before A[j] and +k places a dash before B[k] (1-based), in alignment
//! order.  Two flavors:
//!
//! * `compute_trace_pts` — align each consecutive trace-point segment
//!   independently with an iterative O(np) wave.  Fast, near optimal.
//! * `compute_trace_mid` — locate the midpoint of the optimum between
//!   adjacent segment pairs with a bidirectional wave, then align between
//!   successive midpoints.  Better across segment boundaries at about
//!   twice the cost.
//!
//! Wave rows are pooled in a `TraceWork` reused across calls.

use crate::error::Result;
use crate::overlap::Path;

const UNREACHED: i32 = -2;

/// Pooled wave matrices: furthest-reaching values (`pvf`) and move codes
/// (`phf`) per wave, rows indexed from wave -2.
pub struct TraceWork {
    pvf: Vec<Vec<i32>>,
    phf: Vec<Vec<i32>>,
    rowlen: usize,
    off: i32,
    trace: Vec<i32>,
    mida: i32,
    midb: i32,
}

impl TraceWork {
    pub fn new() -> TraceWork {
        TraceWork {
            pvf: Vec::new(),
            phf: Vec::new(),
            rowlen: 0,
            off: 0,
            trace: Vec::new(),
            mida: 0,
            midb: 0,
        }
    }

    fn setup(&mut self, m: i32, n: i32) {
        self.rowlen = (m + n + 3) as usize;
        self.off = n + 1;
        for row in self.pvf.iter_mut().chain(self.phf.iter_mut()) {
            if row.len() < self.rowlen {
                row.resize(self.rowlen, 0);
            }
        }
    }

    fn ensure_row(&mut self, d: i32) {
        let need = (d + 3) as usize;
        while self.pvf.len() < need {
            self.pvf.push(vec![0; self.rowlen]);
            self.phf.push(vec![0; self.rowlen]);
        }
    }

    #[inline]
    fn pv(&self, d: i32, k: i32) -> i32 {
        self.pvf[(d + 2) as usize][(k + self.off) as usize]
    }

    #[inline]
    fn set_pv(&mut self, d: i32, k: i32, v: i32) {
        let off = self.off;
        self.pvf[(d + 2) as usize][(k + off) as usize] = v;
    }

    #[inline]
    fn ph(&self, d: i32, k: i32) -> i32 {
        self.phf[(d + 2) as usize][(k + self.off) as usize]
    }

    #[inline]
    fn set_ph(&mut self, d: i32, k: i32, v: i32) {
        let off = self.off;
        self.phf[(d + 2) as usize][(k + off) as usize] = v;
    }
}

impl Default for TraceWork {
    fn default() -> Self {
        Self::new()
    }
}

/// Advance the O(np) wave over segment A[0..m) vs B[0..n) until B is
/// consumed on the difference diagonal.  Returns the final wave number.
fn run_wave(work: &mut TraceWork, a: &[u8], m: i32, b: &[u8], n: i32) -> i32 {
    let del = m - n;
    let (mut low, mut hgh) = if del >= 0 { (0, del) } else { (del, 0) };

    work.setup(m, n);
    work.ensure_row(0);
    for k in low - 1..=hgh + 1 {
        work.set_pv(-2, k, UNREACHED);
        work.set_pv(-1, k, UNREACHED);
    }
    work.set_pv(-1, 0, -1);

    low += 1;
    hgh -= 1;

    let slide = |j0: i32, k: i32| -> i32 {
        let bound = n.min(m - k);
        let mut j = j0;
        let lo = 0.max(-k);
        while j >= lo && j < bound && b[j as usize] == a[(k + j) as usize] {
            j += 1;
        }
        j
    };

    let mut d = 0i32;
    loop {
        work.ensure_row(d);
        if d & 1 == 0 {
            hgh += 1;
            low -= 1;
        }
        work.set_pv(d, hgh + 1, UNREACHED);
        work.set_pv(d, low - 1, UNREACHED);

        // Upper diagonals, descending.
        let mut j = UNREACHED;
        for k in (del + 1..=hgh).rev() {
            let ap = j + 1;
            let am = work.pv(d - 2, k - 1);
            let ac = work.pv(d - 1, k) + 1;
            let (e, j0) = if ac < am {
                if ap < am {
                    (-1, am)
                } else {
                    (4, ap)
                }
            } else if ap < ac {
                (0, ac)
            } else {
                (4, ap)
            };
            j = slide(j0, k);
            work.set_ph(d, k, e);
            work.set_pv(d, k, j);
        }

        // Lower diagonals, ascending.
        let mut j = UNREACHED;
        for k in low..del {
            let ap = work.pv(d - 2, k + 1) + 1;
            let am = j;
            let ac = work.pv(d - 1, k) + 1;
            let (e, j0) = if ac < am {
                if ap < am {
                    (2, am)
                } else {
                    (1, ap)
                }
            } else if ap < ac {
                (0, ac)
            } else {
                (1, ap)
            };
            j = slide(j0, k);
            work.set_ph(d, k, e);
            work.set_pv(d, k, j);
        }

        // The difference diagonal itself.
        {
            let ap = work.pv(d, del + 1) + 1;
            let am = j;
            let ac = work.pv(d - 1, del) + 1;
            let (e, j0) = if ac < am {
                if ap < am {
                    (2, am)
                } else {
                    (4, ap)
                }
            } else if ap < ac {
                (0, ac)
            } else {
                (4, ap)
            };
            let j = slide(j0, del);
            work.set_ph(d, del, e);
            work.set_pv(d, del, j);
        }

        if work.pv(d, del) >= n {
            return d;
        }
        d += 1;
    }
}

/// Exact trace of segment A[0..m) vs B[0..n); trace values are emitted in
/// read coordinates using the segment offsets.  Returns the edit count.
fn iter_wave(
    work: &mut TraceWork,
    a: &[u8],
    m: i32,
    b: &[u8],
    n: i32,
    aoff: i32,
    boff: i32,
) -> i32 {
    let del = m - n;
    let mut d = run_wave(work, a, m, b, n);
    let diffs = d + del.abs();

    // Reverse the move chain while normalizing snake starts, leaving
    // forward links terminated by 3.
    let ap_base = -aoff - 1;
    let bp_base = boff + 1;

    work.set_ph(0, 0, 3);
    let mut c = n;
    let mut k = del;
    let mut e = work.ph(d, k);
    work.set_ph(d, k, 3);
    while e != 3 {
        let mut h = k + e;
        if e > 1 {
            h -= 3;
        } else if e == 0 {
            d -= 1;
        } else {
            d -= 2;
        }
        if h < k {
            let lo = if k < 0 { -k } else { 0 };
            if work.pv(d, h) <= c {
                c = work.pv(d, h) - 1;
            }
            while c >= lo && c < n && k + c >= 0 && k + c < m && a[(k + c) as usize] == b[c as usize]
            {
                c -= 1;
            }
            if e < 1 {
                if c <= work.pv(d + 2, k + 1) {
                    e = 4;
                    h = k + 1;
                    d += 2;
                } else if c == work.pv(d + 1, k) {
                    e = 0;
                    h = k;
                    d += 1;
                } else {
                    work.set_pv(d, h, c + 1);
                    let keep = work.ph(d, h);
                    work.set_ph(d, h, e);
                    e = keep;
                    k = h;
                    continue;
                }
            } else {
                let md = if k == del { d } else { d - 2 };
                if c <= work.pv(md, k + 1) {
                    e = if k == del { 4 } else { 1 };
                    h = k + 1;
                    d = md;
                } else if c == work.pv(d - 1, k) {
                    e = 0;
                    h = k;
                    d -= 1;
                } else {
                    work.set_pv(d, h, c + 1);
                    let keep = work.ph(d, h);
                    work.set_ph(d, h, e);
                    e = keep;
                    k = h;
                    continue;
                }
            }
        }
        let keep = work.ph(d, h);
        work.set_ph(d, h, e);
        e = keep;
        k = h;
    }

    // Emit the trace walking the reversed chain forward.
    k = 0;
    d = 0;
    e = work.ph(d, k);
    while e != 3 {
        let mut h = k - e;
        let c = work.pv(d, k);
        if e > 1 {
            h += 3;
        } else if e == 0 {
            d += 1;
        } else {
            d += 2;
        }
        if h > k {
            work.trace.push(bp_base + c);
        } else if h < k {
            work.trace.push(ap_base - (c + k));
        }
        k = h;
        e = work.ph(d, h);
    }

    diffs
}

/// Bidirectional midpoint of the optimum for segment A[0..m) vs B[0..n):
/// runs the forward wave, then walks half the edits back.  Midpoint is
/// stored in read coordinates.
fn middle_wave(
    work: &mut TraceWork,
    a: &[u8],
    m: i32,
    b: &[u8],
    n: i32,
    aoff: i32,
    boff: i32,
) -> bool {
    if m == 0 || n == 0 {
        work.mida = aoff + m / 2;
        work.midb = boff + n / 2;
        return true;
    }
    let del = m - n;
    let mut d = run_wave(work, a, m, b, n);

    let total = d + del.abs();
    let mut c = n;
    let mut k = del;
    let mut dd = total;
    let half = total / 2;
    while dd > half {
        let e = work.ph(d, k);
        let mut h = k + e;
        if e > 1 {
            h -= 3;
        } else if e == 0 {
            d -= 1;
        } else {
            d -= 2;
        }
        if h < k {
            let lo = if k < 0 { -k } else { 0 };
            if work.pv(d, h) <= c {
                c = work.pv(d, h) - 1;
            }
            while c >= lo && c < n && k + c >= 0 && k + c < m && a[(k + c) as usize] == b[c as usize]
            {
                c -= 1;
            }
            if e < 1 {
                if c <= work.pv(d + 2, k + 1) {
                    h = k + 1;
                    d += 2;
                } else if c == work.pv(d + 1, k) {
                    h = k;
                    d += 1;
                } else {
                    work.set_pv(d, h, c + 1);
                }
            } else {
                let md = if k == del { d } else { d - 2 };
                if c <= work.pv(md, k + 1) {
                    h = k + 1;
                    d = md;
                } else if c == work.pv(d - 1, k) {
                    h = k;
                    d -= 1;
                } else {
                    work.set_pv(d, h, c + 1);
                }
            }
        }
        k = h;
        dd -= 1;
    }

    work.midb = boff + work.pv(d, k);
    work.mida = aoff + k + work.pv(d, k);
    true
}

/// Exact trace through the path's trace points, one segment at a time.
/// Returns the signed trace and the exact edit count.
pub fn compute_trace_pts(
    path: &Path,
    aseq: &[u8],
    bseq: &[u8],
    trace_spacing: i32,
    work: &mut TraceWork,
) -> Result<(Vec<i32>, i32)> {
    work.trace.clear();
    let points: Vec<i32> = path.points().map(|(_, b)| b as i32).collect();

    let mut diffs = 0i32;
    let mut ab = path.abpos;
    let mut ae = (ab / trace_spacing) * trace_spacing;
    let mut bb = path.bbpos;
    for i in 0..points.len().saturating_sub(1) {
        ae += trace_spacing;
        let be = bb + points[i];
        diffs += iter_wave(
            work,
            &aseq[ab as usize..ae as usize],
            ae - ab,
            &bseq[bb as usize..be as usize],
            be - bb,
            ab,
            bb,
        );
        ab = ae;
        bb = be;
    }
    let ae = path.aepos;
    let be = path.bepos;
    diffs += iter_wave(
        work,
        &aseq[ab as usize..ae as usize],
        ae - ab,
        &bseq[bb as usize..be as usize],
        be - bb,
        ab,
        bb,
    );

    Ok((std::mem::take(&mut work.trace), diffs))
}

/// Exact trace via segment midpoints: align between the midpoints of the
/// optima of adjacent segment pairs.
pub fn compute_trace_mid(
    path: &Path,
    aseq: &[u8],
    bseq: &[u8],
    trace_spacing: i32,
    work: &mut TraceWork,
) -> Result<(Vec<i32>, i32)> {
    work.trace.clear();
    let points: Vec<i32> = path.points().map(|(_, b)| b as i32).collect();

    let mut diffs = 0i32;
    let mut ab = path.abpos;
    let mut ae = (ab / trace_spacing) * trace_spacing;
    let mut bb = path.bbpos;
    let mut asub = path.abpos;
    let mut bsub = path.bbpos;
    let mut af = path.abpos;
    let mut bf = path.bbpos;
    for i in 0..points.len().saturating_sub(1) {
        ae += trace_spacing;
        let be = bb + points[i];
        if middle_wave(
            work,
            &aseq[ab as usize..ae as usize],
            ae - ab,
            &bseq[bb as usize..be as usize],
            be - bb,
            ab,
            bb,
        ) {
            af = work.mida;
            bf = work.midb;
            diffs += iter_wave(
                work,
                &aseq[asub as usize..af as usize],
                af - asub,
                &bseq[bsub as usize..bf as usize],
                bf - bsub,
                asub,
                bsub,
            );
            ab = ae;
            bb = be;
            asub = af;
            bsub = bf;
        }
    }
    let ae = path.aepos;
    let be = path.bepos;
    if middle_wave(
        work,
        &aseq[ab as usize..ae as usize],
        ae - ab,
        &bseq[bb as usize..be as usize],
        be - bb,
        ab,
        bb,
    ) {
        af = work.mida;
        bf = work.midb;
        diffs += iter_wave(
            work,
            &aseq[asub as usize..af as usize],
            af - asub,
            &bseq[bsub as usize..bf as usize],
            bf - bsub,
            asub,
            bsub,
        );
        asub = af;
        bsub = bf;
    }
    diffs += iter_wave(
        work,
        &aseq[asub as usize..ae as usize],
        ae - asub,
        &bseq[bsub as usize..be as usize],
        be - bsub,
        asub,
        bsub,
    );

    Ok((std::mem::take(&mut work.trace), diffs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iter_pair(a: &[u8], b: &[u8]) -> (Vec<i32>, i32) {
        let mut work = TraceWork::new();
        work.trace.clear();
        let d = iter_wave(&mut work, a, a.len() as i32, b, b.len() as i32, 0, 0);
        (work.trace.clone(), d)
    }

    /// Replay a signed trace, checking consistency and counting columns.
    fn replay(a: &[u8], b: &[u8], trace: &[i32]) -> (usize, usize) {
        let mut i = 0usize; // consumed of a
        let mut j = 0usize; // consumed of b
        let mut dashes_a = 0usize;
        let mut dashes_b = 0usize;
        for &t in trace {
            if t < 0 {
                let pos = (-t - 1) as usize; // dash before A[pos+1], 0-based pos
                while i < pos {
                    i += 1;
                    j += 1;
                }
                dashes_a += 1;
                j += 1;
            } else {
                let pos = (t - 1) as usize;
                while j < pos {
                    i += 1;
                    j += 1;
                }
                dashes_b += 1;
                i += 1;
            }
            assert!(i <= a.len() && j <= b.len());
        }
        (dashes_a, dashes_b)
    }

    #[test]
    fn test_identical_segments() {
        let a = vec![0u8, 1, 2, 3, 0, 1, 2, 3];
        let (trace, d) = iter_pair(&a, &a);
        assert_eq!(d, 0);
        assert!(trace.is_empty());
    }

    #[test]
    fn test_single_substitution() {
        let a = vec![0u8, 1, 2, 3, 0, 1, 2, 3];
        let mut b = a.clone();
        b[3] = 0;
        let (trace, d) = iter_pair(&a, &b);
        assert_eq!(d, 1);
        assert!(trace.is_empty()); // substitutions leave no indel entry
    }

    #[test]
    fn test_single_deletion_in_b() {
        // B lacks A's third base: one dash goes into B.
        let a = vec![0u8, 1, 2, 3];
        let b = vec![0u8, 2, 3];
        let (trace, d) = iter_pair(&a, &b);
        assert_eq!(d, 1);
        assert_eq!(trace.len(), 1);
        assert!(trace[0] > 0);
    }

    #[test]
    fn test_single_insertion_in_b() {
        let a = vec![0u8, 2, 3];
        let b = vec![0u8, 1, 2, 3];
        let (trace, d) = iter_pair(&a, &b);
        assert_eq!(d, 1);
        assert_eq!(trace.len(), 1);
        assert!(trace[0] < 0);
    }

    #[test]
    fn test_indel_balance() {
        let a = vec![0u8, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3];
        let b = vec![0u8, 1, 3, 0, 1, 1, 2, 3, 0, 3, 2, 1, 2];
        let (trace, d) = iter_pair(&a, &b);
        let (da, db) = replay(&a, &b, &trace);
        // Dashes must reconcile the length difference.
        assert_eq!(
            da as i32 - db as i32,
            b.len() as i32 - a.len() as i32
        );
        assert!(d >= (b.len() as i32 - a.len() as i32).abs());
        assert!(d as usize >= da + db);
    }

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

    fn noisy_path() -> (Vec<u8>, Vec<u8>, Path) {
        use crate::wave::{local_alignment, AlignInput, AlignSpec, AlignWork, SeqView};
        let seq = pseudo_seq(1200, 3);
        let mut noisy = seq.clone();
        for i in (10..1200).step_by(60) {
            noisy[i] = (noisy[i] + 1) & 3;
        }
        // Indels every 200 bases.
        noisy.remove(100);
        noisy.insert(700, 2);

        let mut arena = vec![4u8];
        let aoff = arena.len();
        arena.extend_from_slice(&seq);
        arena.push(4);
        let boff = arena.len();
        arena.extend_from_slice(&noisy);
        arena.push(4);

        let spec = AlignSpec::new(0.70, 100, [0.25; 4]);
        let mut work = AlignWork::new();
        let input = AlignInput {
            a: SeqView::new(&arena, aoff, seq.len() as i32),
            b: SeqView::new(&arena, boff, noisy.len() as i32),
            comp: false,
            same: false,
        };
        let (apath, _) = local_alignment(&mut work, &spec, &input, 600, 600).unwrap();
        (seq, noisy, apath)
    }

    #[test]
    fn test_pts_refines_wave_path() {
        let (a, b, path) = noisy_path();
        let mut work = TraceWork::new();
        let (trace, diffs) = compute_trace_pts(&path, &a, &b, 100, &mut work).unwrap();
        // The exact per-segment optimum can't beat the wave's own count.
        assert!(diffs <= path.diffs, "{} > {}", diffs, path.diffs);
        assert!(diffs > 0);
        let (da, db) = replay(&a, &b, &trace);
        let aspan = path.aepos - path.abpos;
        let bspan = path.bepos - path.bbpos;
        assert_eq!(db as i32 - da as i32, aspan - bspan);
    }

    #[test]
    fn test_mid_matches_pts_extent() {
        let (a, b, path) = noisy_path();
        let mut work = TraceWork::new();
        let (_, d_pts) = compute_trace_pts(&path, &a, &b, 100, &mut work).unwrap();
        let (trace, d_mid) = compute_trace_mid(&path, &a, &b, 100, &mut work).unwrap();
        assert!(d_mid <= path.diffs);
        // Both flavors must agree on the indel balance.
        let (da, db) = replay(&a, &b, &trace);
        let aspan = path.aepos - path.abpos;
        let bspan = path.bepos - path.bbpos;
        assert_eq!(db as i32 - da as i32, aspan - bspan);
        assert!((d_mid - d_pts).abs() <= path.diffs / 2);
    }
}
