//! Parallel least-significant-digit radix sort over fixed-width records.
//!
//! The sorter makes one pass per key byte plus one initial counting pass.
//! On every placement pass each worker also counts the byte of the *next*
//! pass, bucketed by the worker that will own the record's destination, so
//! the explicit counting pass happens only once.  The destination worker of
//! an output slot is tracked with running finger thresholds rather than a
//! per-record division.
//!
//! Workers receive disjoint output ranges per (byte value, worker) pair from
//! the global prefix sum, so the scatter into the shared target buffer is
//! race-free.

use crate::error::{EngineError, Result};
use rayon::prelude::*;

/// Fixed-width record whose key bytes can be addressed by offset.
pub trait RadixRecord: Copy + Send + Sync + Default {
    /// Record width in bytes; all key offsets must be below this.
    const WIDTH: usize;

    /// The byte of the record at logical little-endian offset `off`.
    fn key_byte(&self, off: usize) -> u8;
}

/// Per-worker pass state: an input segment, bucket fingers, destination
/// worker tracking, and next-pass counts per destination worker.
struct LexArg {
    beg: usize,
    end: usize,
    tptr: Vec<i64>,       // 256 counts, then fingers
    next: Vec<u32>,       // destination worker owning the current finger
    check: Vec<bool>,     // does this bucket cross a worker boundary?
    thresh: Vec<i64>,     // next boundary the finger will cross
    sptr: Vec<i64>,       // [workers][256] next-pass counts
}

impl LexArg {
    fn new(workers: usize) -> Self {
        LexArg {
            beg: 0,
            end: 0,
            tptr: vec![0; 256],
            next: vec![0; 256],
            check: vec![false; 256],
            thresh: vec![0; 256],
            sptr: vec![0; workers * 256],
        }
    }
}

/// Shared mutable target buffer for the scatter phase.  Writes are disjoint
/// across workers (see module docs), which is the soundness condition.
struct SharedSlice<T> {
    ptr: *mut T,
    len: usize,
}

unsafe impl<T: Send> Sync for SharedSlice<T> {}

impl<T> SharedSlice<T> {
    fn new(slice: &mut [T]) -> Self {
        SharedSlice {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    #[inline]
    unsafe fn write(&self, index: usize, value: T) {
        debug_assert!(index < self.len);
        *self.ptr.add(index) = value;
    }
}

/// Parallel LSD radix sorter with a fixed worker count.
pub struct RadixSorter {
    workers: usize,
}

impl RadixSorter {
    pub fn new(workers: usize) -> Self {
        RadixSorter {
            workers: workers.max(1),
        }
    }

    /// Sort `src` by the key bytes listed in `plan` (least significant
    /// first), using `scratch` as the secondary buffer.  Returns the pair
    /// (sorted, other); buffers swap roles every pass so either may hold
    /// the result.
    pub fn sort<T: RadixRecord>(
        &self,
        src: Vec<T>,
        scratch: Vec<T>,
        plan: &[usize],
    ) -> Result<(Vec<T>, Vec<T>)> {
        let n = src.len();
        let zdiv = (n.max(1) - 1) / self.workers + 1;
        let mut args: Vec<LexArg> = (0..self.workers).map(|_| LexArg::new(self.workers)).collect();
        let mut x = 0usize;
        for arg in args.iter_mut() {
            arg.beg = x;
            x = (x + zdiv).min(n);
            arg.end = x;
        }
        args.last_mut().unwrap().end = n;
        self.sort_with_state(src, scratch, plan, &mut args, false)
    }

    /// Sort with caller-supplied segments and first-pass byte counts.  The
    /// index and merge phases fill per-worker counts of the first key byte
    /// as they emit records, so the initial counting pass is skipped.
    pub fn sort_counted<T: RadixRecord>(
        &self,
        src: Vec<T>,
        scratch: Vec<T>,
        plan: &[usize],
        segments: &[(usize, usize)],
        counts: &[[i64; 256]],
    ) -> Result<(Vec<T>, Vec<T>)> {
        if segments.len() != self.workers || counts.len() != self.workers {
            return Err(EngineError::LogicViolation(format!(
                "radix pre-counts for {} workers, sorter has {}",
                counts.len(),
                self.workers
            )));
        }
        let mut args: Vec<LexArg> = (0..self.workers).map(|_| LexArg::new(self.workers)).collect();
        for (i, arg) in args.iter_mut().enumerate() {
            arg.beg = segments[i].0;
            arg.end = segments[i].1;
            arg.tptr.copy_from_slice(&counts[i]);
        }
        self.sort_with_state(src, scratch, plan, &mut args, true)
    }

    fn sort_with_state<T: RadixRecord>(
        &self,
        src: Vec<T>,
        scratch: Vec<T>,
        plan: &[usize],
        args: &mut [LexArg],
        precounted: bool,
    ) -> Result<(Vec<T>, Vec<T>)> {
        let n = src.len();
        for &off in plan {
            if off >= T::WIDTH {
                return Err(EngineError::LogicViolation(format!(
                    "radix key byte {} outside {}-byte record",
                    off,
                    T::WIDTH
                )));
            }
        }
        if scratch.len() < n {
            return Err(EngineError::LogicViolation(
                "radix scratch buffer shorter than input".into(),
            ));
        }
        if n == 0 || plan.is_empty() {
            return Ok((src, scratch));
        }

        let workers = self.workers;
        let zdiv = ((n - 1) / workers + 1) as i64;
        let mut bufs = [src, scratch];
        let mut cur = 0usize;

        for (pass, &byte) in plan.iter().enumerate() {
            let next_byte = plan.get(pass + 1).copied();

            if pass == 0 && !precounted {
                let (a, _) = bufs.split_at_mut(1);
                let src_ref: &[T] = &a[0];
                args.par_iter_mut().for_each(|arg| {
                    for rec in &src_ref[arg.beg..arg.end] {
                        arg.tptr[rec.key_byte(byte) as usize] += 1;
                    }
                });
            } else if pass > 0 {
                // Refresh segments to the zdiv grid and gather counts from
                // the previous pass's destination-worker accounting.
                let mut x = 0usize;
                for arg in args.iter_mut() {
                    arg.beg = x;
                    x = (x + zdiv as usize).min(n);
                    arg.end = x;
                    arg.tptr.iter_mut().for_each(|c| *c = 0);
                }
                args.last_mut().unwrap().end = n;
                for w in 0..workers {
                    for z in 0..workers {
                        let zptr = &args[z].sptr[w * 256..w * 256 + 256];
                        let sums: Vec<i64> = zptr.to_vec();
                        for (j, s) in sums.into_iter().enumerate() {
                            args[w].tptr[j] += s;
                        }
                    }
                }
            }

            for arg in args.iter_mut() {
                arg.sptr.iter_mut().for_each(|c| *c = 0);
            }

            // Counts become fingers; record which destination worker owns
            // each finger start and where the next boundary falls.
            {
                let mut thr = zdiv;
                let mut nxt: u32 = 0;
                let mut x: i64 = 0;
                for j in 0..256usize {
                    for arg in args.iter_mut() {
                        let y = arg.tptr[j];
                        arg.tptr[j] = x;
                        x += y;
                        arg.next[j] = nxt;
                        if x < thr {
                            arg.check[j] = false;
                        } else {
                            arg.check[j] = true;
                            arg.thresh[j] = thr;
                            while x >= thr {
                                thr += zdiv;
                                nxt += 1;
                            }
                        }
                    }
                }
            }

            // Scatter pass.
            {
                let (left, right) = bufs.split_at_mut(1);
                let (src_buf, trg_buf): (&[T], &mut [T]) = if cur == 0 {
                    (&left[0], &mut right[0])
                } else {
                    (&right[0], &mut left[0])
                };
                let target = SharedSlice::new(trg_buf);
                let target = &target;
                args.par_iter_mut().for_each(|arg| {
                    match next_byte {
                        None => {
                            for rec in &src_buf[arg.beg..arg.end] {
                                let d = rec.key_byte(byte) as usize;
                                let x = arg.tptr[d];
                                arg.tptr[d] += 1;
                                unsafe { target.write(x as usize, *rec) };
                            }
                        }
                        Some(nb) => {
                            for rec in &src_buf[arg.beg..arg.end] {
                                let d = rec.key_byte(byte) as usize;
                                let x = arg.tptr[d];
                                arg.tptr[d] += 1;
                                unsafe { target.write(x as usize, *rec) };
                                if arg.check[d] && x >= arg.thresh[d] {
                                    arg.next[d] += 1;
                                    arg.thresh[d] += zdiv;
                                }
                                let slot = arg.next[d] as usize * 256 + rec.key_byte(nb) as usize;
                                arg.sptr[slot] += 1;
                            }
                        }
                    }
                });
            }

            cur = 1 - cur;
        }

        let [a, b] = bufs;
        if cur == 0 {
            Ok((a, b))
        } else {
            Ok((b, a))
        }
    }
}
