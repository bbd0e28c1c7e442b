//! K-way merge of sorted `.las` files.
//!
//! Up to 252 sorted inputs are pumped through a min-heap keyed by
//! (aread, bread, comp, abpos).  Every stream carries its own input
//! buffer; the output is buffered once and the total record count is
//! known up front, so the header needs no backpatch.

use crate::config;
use crate::error::{EngineError, Result};
use crate::overlap::{trace_bytes, write_file_header, write_overlap, LasReader, Overlap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Maximum merge fan-in.
pub const MERGE_FAN_MAX: usize = 252;

/// Total buffer budget shared by the input streams and the output.
const MERGE_MEMORY: usize = 1 << 30;

pub fn run(output: &Path, parts: &[PathBuf]) -> Result<()> {
    if parts.is_empty() {
        return Err(EngineError::User("no input files to merge".into()));
    }
    if parts.len() > MERGE_FAN_MAX {
        return Err(EngineError::User(format!(
            "exceeded maximum fan-in ({}) of merge",
            MERGE_FAN_MAX
        )));
    }

    let bsize = MERGE_MEMORY / (parts.len() + 1);
    let mut streams = Vec::with_capacity(parts.len());
    let mut totl = 0i64;
    let mut tspace = 0i32;
    for (i, part) in parts.iter().enumerate() {
        let fname = part.display().to_string();
        let file =
            File::open(part).map_err(|_| EngineError::User(format!("cannot open {}", fname)))?;
        let cap = bsize.min(file.metadata()?.len() as usize + 1).max(1 << 16);
        let reader = LasReader::new(BufReader::with_capacity(cap, file), &fname)?;
        totl += reader.novl;
        if i == 0 {
            tspace = reader.tspace;
        } else if tspace != reader.tspace {
            return Err(EngineError::User(format!(
                "{}: trace-point spacing conflict ({} vs {})",
                fname, tspace, reader.tspace
            )));
        }
        streams.push(reader);
    }

    if config::is_verbose() {
        println!("Merging {} files totalling {} records", parts.len(), totl);
    }

    let out_file = File::create(output)?;
    let mut out = BufWriter::with_capacity(bsize.max(1 << 16), out_file);
    write_file_header(&mut out, totl, tspace)?;
    let tbytes = trace_bytes(tspace);

    // Heap over stream ids, 1-based as a classic array heap.
    let mut cur: Vec<Option<Overlap>> = Vec::with_capacity(streams.len());
    let mut heap = vec![usize::MAX; streams.len() + 1];
    let mut hsize = 0usize;
    for (i, s) in streams.iter_mut().enumerate() {
        let first = s.read_overlap()?;
        if first.is_some() {
            hsize += 1;
            heap[hsize] = i;
        }
        cur.push(first);
    }
    if hsize > 1 {
        for s in (1..=hsize / 2).rev() {
            reheap(s, &mut heap, hsize, &cur);
        }
    }

    let mut written = 0i64;
    while hsize > 0 {
        reheap(1, &mut heap, hsize, &cur);
        let i = heap[1];
        let ovl = cur[i].take().unwrap();
        write_overlap(&mut out, &ovl, tbytes)?;
        written += 1;

        cur[i] = streams[i].read_overlap()?;
        if cur[i].is_none() {
            heap[1] = heap[hsize];
            hsize -= 1;
        }
    }
    out.flush()?;

    if written != totl {
        return Err(EngineError::LogicViolation(format!(
            "merged {} records, headers promised {}",
            written, totl
        )));
    }
    Ok(())
}

/// Sift the heap entry at `s` down to its place.
fn reheap(s: usize, heap: &mut [usize], hsize: usize, cur: &[Option<Overlap>]) {
    let key = |i: usize| {
        let o = cur[i].as_ref().unwrap();
        o.key()
    };
    let mut c = s;
    let hs = heap[s];
    while 2 * c <= hsize {
        let l = 2 * c;
        let r = l + 1;
        let hl = heap[l];
        let pick_left = r > hsize || key(heap[r]) > key(hl);
        if pick_left {
            if key(hs) > key(hl) {
                heap[c] = hl;
                c = l;
            } else {
                break;
            }
        } else {
            let hr = heap[r];
            if key(hs) > key(hr) {
                heap[c] = hr;
                c = r;
            } else {
                break;
            }
        }
    }
    if c != s {
        heap[c] = hs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlap::{OverlapWriter, Path as OvlPath};
    use tempfile::tempdir;

    fn record(aread: i32, bread: i32) -> Overlap {
        Overlap {
            aread,
            bread,
            alen: 400,
            blen: 400,
            flags: 0,
            path: OvlPath {
                diffs: 1,
                abpos: 0,
                bbpos: 0,
                aepos: 90,
                bepos: 90,
                trace: vec![1, 90],
            },
        }
    }

    #[test]
    fn test_three_way_merge_order() {
        // Single-record files keyed (5,3), (5,7), (2,9) merge into
        // (2,9), (5,3), (5,7) with novl = 3.
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, (a, b)) in [(5, 3), (5, 7), (2, 9)].iter().enumerate() {
            let p = dir.path().join(format!("part{}.las", i));
            let mut w = OverlapWriter::create(&p, 100).unwrap();
            w.write(&record(*a, *b)).unwrap();
            w.finish().unwrap();
            paths.push(p);
        }

        let out = dir.path().join("merged.las");
        run(&out, &paths).unwrap();

        let mut r = LasReader::new(File::open(&out).unwrap(), "merged.las").unwrap();
        assert_eq!(r.novl, 3);
        let mut keys = Vec::new();
        while let Some(ovl) = r.read_overlap().unwrap() {
            keys.push((ovl.aread, ovl.bread));
        }
        assert_eq!(keys, vec![(2, 9), (5, 3), (5, 7)]);
    }

    #[test]
    fn test_merge_interleaves_streams() {
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..4 {
            let p = dir.path().join(format!("s{}.las", i));
            let mut w = OverlapWriter::create(&p, 100).unwrap();
            for a in (i..40).step_by(4) {
                w.write(&record(a as i32, 0)).unwrap();
            }
            w.finish().unwrap();
            paths.push(p);
        }

        let out = dir.path().join("all.las");
        run(&out, &paths).unwrap();

        let mut r = LasReader::new(File::open(&out).unwrap(), "all.las").unwrap();
        assert_eq!(r.novl, 40);
        let mut prev = -1;
        while let Some(ovl) = r.read_overlap().unwrap() {
            assert!(ovl.aread > prev);
            prev = ovl.aread;
        }
        assert_eq!(prev, 39);
    }

    #[test]
    fn test_merge_rejects_spacing_conflict() {
        let dir = tempdir().unwrap();
        let p1 = dir.path().join("a.las");
        let p2 = dir.path().join("b.las");
        OverlapWriter::create(&p1, 100).unwrap().finish().unwrap();
        OverlapWriter::create(&p2, 126).unwrap().finish().unwrap();
        let out = dir.path().join("out.las");
        assert!(run(&out, &[p1, p2]).is_err());
    }

    #[test]
    fn test_merge_with_empty_parts() {
        let dir = tempdir().unwrap();
        let p1 = dir.path().join("a.las");
        let p2 = dir.path().join("b.las");
        let mut w = OverlapWriter::create(&p1, 100).unwrap();
        w.write(&record(1, 2)).unwrap();
        w.finish().unwrap();
        OverlapWriter::create(&p2, 100).unwrap().finish().unwrap();

        let out = dir.path().join("out.las");
        run(&out, &[p1, p2]).unwrap();
        let mut r = LasReader::new(File::open(&out).unwrap(), "out.las").unwrap();
        assert_eq!(r.novl, 1);
    }
}
