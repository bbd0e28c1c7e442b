//! Overlap records and the `.las` binary format.
//!
//! A file is `novl: i64, tspace: i32` followed by `novl` records.  Each
//! record is a 44-byte fixed header (aread, bread, alen, blen, flags, then
//! the path: tlen, diffs, abpos, bbpos, aepos, bepos — all i32) followed by
//! the trace: `tlen` trace points of two values each (segment edit count,
//! then segment b-advance), one byte per value when `0 < tspace <= 125`,
//! two otherwise.
//!
//! Files are written host-native.  The reader detects a foreign-endian file
//! by the implausibility of its tspace field and byte-swaps throughout.

use crate::error::{EngineError, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path as FsPath, PathBuf};

/// Trace spacings at or below this value store one byte per trace value.
pub const TRACE_XOVR: i32 = 125;

/// B-sequence is complemented.
pub const COMP_FLAG: u32 = 0x1;
/// Chain role flags (preserved by the codec, not produced by the engine).
pub const CHAIN_START: u32 = 0x4;
pub const CHAIN_NEXT: u32 = 0x8;
pub const CHAIN_BEST: u32 = 0x10;

#[inline]
pub fn is_comp(flags: u32) -> bool {
    flags & COMP_FLAG != 0
}

/// Bytes per trace value for a spacing.
#[inline]
pub fn trace_bytes(tspace: i32) -> usize {
    if tspace > 0 && tspace <= TRACE_XOVR {
        1
    } else {
        2
    }
}

/// A local alignment: endpoints in both reads, edit count, and trace
/// points.  `trace` holds (diff, delta_b) pairs flattened in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
    pub diffs: i32,
    pub abpos: i32,
    pub bbpos: i32,
    pub aepos: i32,
    pub bepos: i32,
    pub trace: Vec<u16>,
}

impl Path {
    /// Number of trace points.
    #[inline]
    pub fn tlen(&self) -> i32 {
        (self.trace.len() / 2) as i32
    }

    /// Iterator over (diff, delta_b) pairs.
    pub fn points(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.trace.chunks_exact(2).map(|c| (c[0], c[1]))
    }
}

/// An overlap between two reads identified by block-relative plus first-read
/// offsets, with the path from the A-read perspective.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overlap {
    pub aread: i32,
    pub bread: i32,
    pub alen: i32,
    pub blen: i32,
    pub flags: u32,
    pub path: Path,
}

impl Overlap {
    /// Sort key shared by the external sorter and the merger.
    #[inline]
    pub fn key(&self) -> (i32, i32, u32, i32) {
        (
            self.aread,
            self.bread,
            self.flags & COMP_FLAG,
            self.path.abpos,
        )
    }
}

/// Fixed record-header size on disk.
pub const OVL_HEADER_BYTES: usize = 44;
/// File-header size on disk.
pub const FILE_HEADER_BYTES: usize = 12;

/// Narrow a 16-bit trace to bytes; every value must fit.
pub fn compress_trace_to8(trace: &[u16]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(trace.len());
    for &v in trace {
        if v > 255 {
            return Err(EngineError::corrupt(
                "trace",
                format!("value {} exceeds 8-bit trace range", v),
            ));
        }
        out.push(v as u8);
    }
    Ok(out)
}

/// Widen an 8-bit trace back to 16 bits.
pub fn decompress_trace_to16(trace: &[u8]) -> Vec<u16> {
    trace.iter().map(|&v| v as u16).collect()
}

/// Validate the trace points of an overlap against its path extent:
/// point count must match the A-interval, b-advances must sum to the
/// B-interval, and segment edits must sum to the recorded diff count.
pub fn check_trace_points(ovl: &Overlap, tspace: i32, fname: &str) -> Result<()> {
    if tspace <= 0 {
        return Err(EngineError::corrupt(fname, "non-positive trace spacing"));
    }
    let span = (ovl.path.aepos - 1) / tspace - ovl.path.abpos / tspace;
    if span != ovl.path.tlen() - 1 {
        return Err(EngineError::corrupt(
            fname,
            format!(
                "wrong number of trace points ({} for [{},{}))",
                ovl.path.tlen(),
                ovl.path.abpos,
                ovl.path.aepos
            ),
        ));
    }
    let mut bsum = 0i32;
    let mut dsum = 0i32;
    for (d, b) in ovl.path.points() {
        bsum += b as i32;
        dsum += d as i32;
    }
    if bsum != ovl.path.bepos - ovl.path.bbpos {
        return Err(EngineError::corrupt(
            fname,
            "trace point sum != aligned interval",
        ));
    }
    if dsum != ovl.path.diffs {
        return Err(EngineError::corrupt(
            fname,
            "trace diff sum != path diff count",
        ));
    }
    Ok(())
}

/// Write the `.las` file header.
pub fn write_file_header<W: Write>(w: &mut W, novl: i64, tspace: i32) -> Result<()> {
    w.write_all(&novl.to_ne_bytes())?;
    w.write_all(&tspace.to_ne_bytes())?;
    Ok(())
}

/// Write one overlap record with `tbytes` bytes per trace value.
pub fn write_overlap<W: Write>(w: &mut W, ovl: &Overlap, tbytes: usize) -> Result<()> {
    let mut head = [0u8; OVL_HEADER_BYTES];
    let fields = [
        ovl.aread,
        ovl.bread,
        ovl.alen,
        ovl.blen,
        ovl.flags as i32,
        ovl.path.tlen(),
        ovl.path.diffs,
        ovl.path.abpos,
        ovl.path.bbpos,
        ovl.path.aepos,
        ovl.path.bepos,
    ];
    for (i, f) in fields.iter().enumerate() {
        head[4 * i..4 * i + 4].copy_from_slice(&f.to_ne_bytes());
    }
    w.write_all(&head)?;
    if tbytes == 1 {
        let bytes = compress_trace_to8(&ovl.path.trace)?;
        w.write_all(&bytes)?;
    } else {
        let mut bytes = Vec::with_capacity(ovl.path.trace.len() * 2);
        for &v in &ovl.path.trace {
            bytes.extend_from_slice(&v.to_ne_bytes());
        }
        w.write_all(&bytes)?;
    }
    Ok(())
}

/// Streaming `.las` reader.
pub struct LasReader<R: Read> {
    input: R,
    pub novl: i64,
    pub tspace: i32,
    pub tbytes: usize,
    pub swapped: bool,
    fname: String,
    remaining: i64,
}

impl<R: Read> LasReader<R> {
    /// Open a reader over a stream, validating the header.  Accepts files
    /// written on a machine of either byte order.
    pub fn new(mut input: R, fname: &str) -> Result<Self> {
        let mut head = [0u8; FILE_HEADER_BYTES];
        input
            .read_exact(&mut head)
            .map_err(|_| EngineError::corrupt(fname, "short file header"))?;
        let mut novl = i64::from_ne_bytes(head[0..8].try_into().unwrap());
        let mut tspace = i32::from_ne_bytes(head[8..12].try_into().unwrap());
        let mut swapped = false;
        if !(0..=1 << 20).contains(&tspace) || novl < 0 {
            novl = novl.swap_bytes();
            tspace = tspace.swap_bytes();
            swapped = true;
            if !(0..=1 << 20).contains(&tspace) || novl < 0 {
                return Err(EngineError::corrupt(fname, "unrecognizable file header"));
            }
        }
        Ok(LasReader {
            input,
            novl,
            tspace,
            tbytes: trace_bytes(tspace),
            swapped,
            fname: fname.to_string(),
            remaining: novl,
        })
    }

    /// Read the next record, or `None` after the last.
    pub fn read_overlap(&mut self) -> Result<Option<Overlap>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let mut head = [0u8; OVL_HEADER_BYTES];
        self.input
            .read_exact(&mut head)
            .map_err(|_| EngineError::corrupt(&self.fname, "short overlap record"))?;
        let mut f = [0i32; 11];
        for (i, v) in f.iter_mut().enumerate() {
            *v = i32::from_ne_bytes(head[4 * i..4 * i + 4].try_into().unwrap());
            if self.swapped {
                *v = v.swap_bytes();
            }
        }
        let [aread, bread, alen, blen, flags, tlen, diffs, abpos, bbpos, aepos, bepos] = f;
        if tlen < 0 {
            return Err(EngineError::corrupt(&self.fname, "negative trace length"));
        }

        let nvals = tlen as usize * 2;
        let mut raw = vec![0u8; nvals * self.tbytes];
        self.input
            .read_exact(&mut raw)
            .map_err(|_| EngineError::corrupt(&self.fname, "short trace"))?;
        let trace = if self.tbytes == 1 {
            decompress_trace_to16(&raw)
        } else {
            raw.chunks_exact(2)
                .map(|c| {
                    let v = u16::from_ne_bytes(c.try_into().unwrap());
                    if self.swapped {
                        v.swap_bytes()
                    } else {
                        v
                    }
                })
                .collect()
        };

        Ok(Some(Overlap {
            aread,
            bread,
            alen,
            blen,
            flags: flags as u32,
            path: Path {
                diffs,
                abpos,
                bbpos,
                aepos,
                bepos,
                trace,
            },
        }))
    }
}

/// Streaming `.las` writer: a zero record count goes out first and is
/// patched once the final count is known.
pub struct OverlapWriter {
    out: BufWriter<File>,
    path: PathBuf,
    pub tspace: i32,
    tbytes: usize,
    count: i64,
}

impl OverlapWriter {
    pub fn create(path: &FsPath, tspace: i32) -> Result<OverlapWriter> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        write_file_header(&mut out, 0, tspace)?;
        Ok(OverlapWriter {
            out,
            path: path.to_path_buf(),
            tspace,
            tbytes: trace_bytes(tspace),
            count: 0,
        })
    }

    pub fn write(&mut self, ovl: &Overlap) -> Result<()> {
        write_overlap(&mut self.out, ovl, self.tbytes)?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    /// Flush, rewrite the record count, and close.  Returns the count.
    pub fn finish(mut self) -> Result<i64> {
        self.out.flush()?;
        let mut file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.count.to_ne_bytes())?;
        file.write_all(&self.tspace.to_ne_bytes())?;
        Ok(self.count)
    }

    pub fn path(&self) -> &FsPath {
        &self.path
    }
}
