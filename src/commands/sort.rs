//! External sort of `.las` files.
//!
//! Each input is loaded whole (memory-mapped when native-endian), an
//! offset permutation is sorted by (aread, bread, comp, abpos), and the
//! records are rewritten to `<root>.S.las` through a large output buffer.
//! Variable-length traces are never copied during the sort; only at the
//! final write.

use crate::config;
use crate::error::{EngineError, Result};
use crate::overlap::{
    trace_bytes, write_file_header, write_overlap, LasReader, FILE_HEADER_BYTES, OVL_HEADER_BYTES,
};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Output buffering target; clamped to the file size.
const SORT_BUFFER: usize = 1 << 30;

/// Sort each file independently, writing `<root>.S.las` beside it.
pub fn run(files: &[PathBuf]) -> Result<()> {
    for file in files {
        sort_file(file)?;
    }
    Ok(())
}

fn output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let root = stem.strip_suffix(".las").unwrap_or(&stem);
    input.with_file_name(format!("{}.S.las", root))
}

fn sort_file(path: &Path) -> Result<()> {
    let fname = path.display().to_string();
    let file =
        File::open(path).map_err(|_| EngineError::User(format!("cannot open {}", fname)))?;
    let flen = file.metadata()?.len() as usize;

    // Sniff the header; a foreign-endian file takes the record-converting
    // path instead of the zero-copy one.
    let swapped = {
        let probe = LasReader::new(&file, &fname)?;
        probe.swapped
    };
    if swapped {
        return sort_converting(path, &fname);
    }

    let mmap = unsafe { Mmap::map(&file)? };
    let data = &mmap[..flen];
    let novl = i64::from_ne_bytes(data[0..8].try_into().unwrap());
    let tspace = i32::from_ne_bytes(data[8..12].try_into().unwrap());
    let tbytes = trace_bytes(tspace);

    let i32_at = |o: usize| i32::from_ne_bytes(data[o..o + 4].try_into().unwrap());

    // Record offsets.
    let mut offsets = Vec::with_capacity(novl.max(0) as usize);
    let mut o = FILE_HEADER_BYTES;
    for _ in 0..novl {
        if o + OVL_HEADER_BYTES > flen {
            return Err(EngineError::corrupt(&fname, "record overruns file"));
        }
        let tlen = i32_at(o + 20);
        if tlen < 0 {
            return Err(EngineError::corrupt(&fname, "negative trace length"));
        }
        let size = OVL_HEADER_BYTES + 2 * tlen as usize * tbytes;
        if o + size > flen {
            return Err(EngineError::corrupt(&fname, "trace overruns file"));
        }
        offsets.push(o);
        o += size;
    }

    if config::is_verbose() {
        println!(
            "  {}: {} records, {} trace bytes",
            fname,
            novl,
            flen - FILE_HEADER_BYTES - novl as usize * OVL_HEADER_BYTES
        );
    }

    // Indirection sort; the offset itself breaks full-key ties so equal
    // records keep their input order.
    offsets.par_sort_unstable_by_key(|&o| {
        (
            i32_at(o),
            i32_at(o + 4),
            i32_at(o + 16) & 1,
            i32_at(o + 28),
            o,
        )
    });

    let out_file = File::create(output_path(path))?;
    let mut out = BufWriter::with_capacity(SORT_BUFFER.min(flen + 4096), out_file);
    write_file_header(&mut out, novl, tspace)?;
    for &o in &offsets {
        let tlen = i32_at(o + 20);
        let size = OVL_HEADER_BYTES + 2 * tlen as usize * tbytes;
        out.write_all(&data[o..o + size])?;
    }
    out.flush()?;
    Ok(())
}

/// Fallback for foreign-endian inputs: decode every record, sort in
/// memory, and rewrite native.
fn sort_converting(path: &Path, fname: &str) -> Result<()> {
    let file = File::open(path)?;
    let mut reader = LasReader::new(std::io::BufReader::new(file), fname)?;
    let tspace = reader.tspace;
    let mut ovls = Vec::with_capacity(reader.novl.max(0) as usize);
    while let Some(ovl) = reader.read_overlap()? {
        ovls.push(ovl);
    }
    let mut perm: Vec<usize> = (0..ovls.len()).collect();
    perm.sort_by_key(|&i| {
        let o = &ovls[i];
        (o.aread, o.bread, o.flags & 1, o.path.abpos, i)
    });

    let out_file = File::create(output_path(path))?;
    let mut out = BufWriter::new(out_file);
    write_file_header(&mut out, ovls.len() as i64, tspace)?;
    let tbytes = trace_bytes(tspace);
    for &i in &perm {
        write_overlap(&mut out, &ovls[i], tbytes)?;
    }
    out.flush()?;
    Ok(())
}
