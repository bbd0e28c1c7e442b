//! Read-block access: the compressed read database consumed by the engine.
//!
//! A block lives in three files sharing a root name `R`:
//!
//! * `R.db`  — text stub: source files, block partition, trim parameters.
//! * `R.idx` — binary index: an 88-byte block header followed by one
//!   48-byte record per read.
//! * `R.bps` — packed 2-bit base stream, 4 bases per byte, MSB first.
//!
//! Reads are loaded into a sentinel-framed arena: numeric base codes
//! 0..=3 with the value 4 before and after every read, so alignment code
//! can probe one position past either end without bounds checks of its own.
//!
//! Optional mask tracks (`R.<name>.anno` + `R.<name>.data`) carry intervals
//! to exclude from seeding; multiple tracks are union-merged per read.

use crate::error::{EngineError, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Flag bits stored with each read.
pub const DB_QV: u32 = 0x03ff;
pub const DB_CSS: u32 = 0x0400;
pub const DB_BEST: u32 = 0x0800;

/// Terminator value framing every read in the base arena.
pub const BASE_SENTINEL: u8 = 4;

const IDX_HEADER_BYTES: u64 = 88;
const IDX_RECORD_BYTES: u64 = 48;

/// Per-read index record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadEntry {
    pub origin: i32,
    pub rlen: i32,
    pub fpulse: i32,
    /// Byte offset into `.bps` on disk; rewritten to the arena offset of the
    /// first base once sequences are loaded.
    pub boff: i64,
    pub coff: i64,
    pub flags: u32,
}

/// An opened (and possibly trimmed) block of reads.
pub struct ReadBlock {
    pub root: String,
    pub path: PathBuf,
    pub part: i32,

    pub ureads: i32,
    pub treads: i32,
    pub cutoff: i32,
    pub all: bool,
    pub freq: [f32; 4],
    pub maxlen: i32,
    pub totlen: i64,

    pub trimmed: bool,
    pub ufirst: i32,
    pub tfirst: i32,

    pub reads: Vec<ReadEntry>,
    /// Untrimmed global index of each retained read (drives track loading).
    pub uindex: Vec<i32>,
    /// Sentinel-framed numeric bases; empty until `load_bases`.
    pub bases: Vec<u8>,
    /// Merged mask intervals per retained read, if any tracks were loaded.
    pub masks: Option<Vec<Vec<(i32, i32)>>>,
}

impl ReadBlock {
    /// Open a database or one block of it.  `name` may be a root, a root
    /// with `.db` extension, or `root.<k>` for block k of a partitioned
    /// database.
    pub fn open(name: &Path) -> Result<ReadBlock> {
        let (dir, root, part) = resolve_root(name)?;
        let stub = Stub::parse(&dir.join(format!("{}.db", root)))?;

        let (ufirst, ulast, tfirst) = if part == 0 {
            (0, stub.ublocks[stub.nblocks as usize], 0)
        } else {
            if part > stub.nblocks {
                return Err(EngineError::User(format!(
                    "block {} out of range ({} has {} blocks)",
                    part, root, stub.nblocks
                )));
            }
            let p = part as usize;
            (stub.ublocks[p - 1], stub.ublocks[p], stub.tblocks[p - 1])
        };

        let idx_path = dir.join(format!("{}.idx", root));
        let mut idx = File::open(&idx_path)
            .map_err(|_| EngineError::User(format!("cannot open {}", idx_path.display())))?;
        let header = IdxHeader::read(&mut idx, &idx_path)?;

        let nreads = (ulast - ufirst) as usize;
        idx.seek(SeekFrom::Start(
            IDX_HEADER_BYTES + ufirst as u64 * IDX_RECORD_BYTES,
        ))?;
        let mut reads = Vec::with_capacity(nreads);
        let mut rec = [0u8; IDX_RECORD_BYTES as usize];
        for _ in 0..nreads {
            idx.read_exact(&mut rec).map_err(|_| {
                EngineError::corrupt(idx_path.display().to_string(), "short read record")
            })?;
            reads.push(ReadEntry {
                origin: i32::from_le_bytes(rec[0..4].try_into().unwrap()),
                rlen: i32::from_le_bytes(rec[4..8].try_into().unwrap()),
                fpulse: i32::from_le_bytes(rec[8..12].try_into().unwrap()),
                boff: i64::from_le_bytes(rec[16..24].try_into().unwrap()),
                coff: i64::from_le_bytes(rec[24..32].try_into().unwrap()),
                flags: u32::from_le_bytes(rec[32..36].try_into().unwrap()),
            });
        }

        let uindex = (ufirst..ulast).collect();
        let mut maxlen = 0;
        let mut totlen = 0i64;
        for r in &reads {
            maxlen = maxlen.max(r.rlen);
            totlen += r.rlen as i64;
        }

        Ok(ReadBlock {
            root,
            path: dir,
            part,
            ureads: header.ureads,
            treads: header.treads,
            cutoff: stub.cutoff,
            all: stub.all,
            freq: header.freq,
            maxlen,
            totlen,
            trimmed: false,
            ufirst,
            tfirst,
            reads,
            uindex,
            bases: Vec::new(),
            masks: None,
        })
    }

    /// Number of reads currently visible.
    #[inline]
    pub fn nreads(&self) -> usize {
        self.reads.len()
    }

    /// Drop reads below the length cutoff and, unless `all` is set, reads
    /// that are not the best of their well.  Idempotent.
    pub fn trim(&mut self) {
        if self.trimmed {
            return;
        }
        let cutoff = self.cutoff;
        let all = self.all;
        let mut kept = Vec::with_capacity(self.reads.len());
        let mut uindex = Vec::with_capacity(self.reads.len());
        for (i, r) in self.reads.iter().enumerate() {
            if r.rlen >= cutoff && (all || r.flags & DB_BEST != 0) {
                kept.push(*r);
                uindex.push(self.uindex[i]);
            }
        }
        self.reads = kept;
        self.uindex = uindex;
        self.maxlen = self.reads.iter().map(|r| r.rlen).max().unwrap_or(0);
        self.totlen = self.reads.iter().map(|r| r.rlen as i64).sum();
        self.trimmed = true;
    }

    /// Load all sequences of the visible reads into the sentinel-framed
    /// arena, rewriting `boff` to arena offsets.
    pub fn load_bases(&mut self) -> Result<()> {
        let bps_path = self.path.join(format!("{}.bps", self.root));
        let mut bps = File::open(&bps_path)
            .map_err(|_| EngineError::User(format!("cannot open {}", bps_path.display())))?;

        let mut arena = Vec::with_capacity(self.totlen as usize + self.nreads() + 1);
        arena.push(BASE_SENTINEL);
        let mut packed = Vec::new();
        for r in self.reads.iter_mut() {
            let clen = compressed_len(r.rlen as usize);
            packed.resize(clen, 0);
            bps.seek(SeekFrom::Start(r.boff as u64))?;
            bps.read_exact(&mut packed).map_err(|_| {
                EngineError::corrupt(bps_path.display().to_string(), "short base stream")
            })?;
            r.boff = arena.len() as i64;
            unpack_bases(&packed, r.rlen as usize, &mut arena);
            arena.push(BASE_SENTINEL);
        }
        self.bases = arena;
        Ok(())
    }

    /// Numeric base codes of read `i` (no sentinels).
    #[inline]
    pub fn seq(&self, i: usize) -> &[u8] {
        let beg = self.reads[i].boff as usize;
        &self.bases[beg..beg + self.reads[i].rlen as usize]
    }

    /// Load the named mask tracks and union-merge their intervals per read.
    pub fn load_masks(&mut self, names: &[String]) -> Result<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut missing = Vec::new();
        let mut per_read: Vec<Vec<(i32, i32)>> = vec![Vec::new(); self.nreads()];
        let mut found = FxHashMap::default();
        for name in names {
            let anno_path = self.path.join(format!("{}.{}.anno", self.root, name));
            let data_path = self.path.join(format!("{}.{}.data", self.root, name));
            if !anno_path.exists() || !data_path.exists() {
                missing.push(name.clone());
                continue;
            }
            found.insert(name.clone(), ());
            let anno = read_i64_file(&anno_path)?;
            if anno.len() != self.ureads as usize + 1 {
                return Err(EngineError::corrupt(
                    anno_path.display().to_string(),
                    format!("expected {} offsets, found {}", self.ureads + 1, anno.len()),
                ));
            }
            let data = read_i32_file(&data_path)?;
            for (i, &g) in self.uindex.iter().enumerate() {
                let beg = (anno[g as usize] / 4) as usize;
                let end = (anno[g as usize + 1] / 4) as usize;
                if end > data.len() || beg > end || (end - beg) % 2 != 0 {
                    return Err(EngineError::corrupt(
                        data_path.display().to_string(),
                        "interval data out of range",
                    ));
                }
                for pair in data[beg..end].chunks_exact(2) {
                    per_read[i].push((pair[0], pair[1]));
                }
            }
        }
        if !found.is_empty() {
            for ivs in per_read.iter_mut() {
                merge_intervals(ivs);
            }
            self.masks = Some(per_read);
        }
        Ok(missing)
    }

    /// A reverse-complemented view of the block: complemented base arena,
    /// A<->T / C<->G frequency swap, and mirrored mask intervals.
    pub fn complement(&self) -> ReadBlock {
        let mut bases = self.bases.clone();
        for r in &self.reads {
            let beg = r.boff as usize;
            complement_in_place(&mut bases[beg..beg + r.rlen as usize]);
        }
        let masks = self.masks.as_ref().map(|per_read| {
            per_read
                .iter()
                .zip(&self.reads)
                .map(|(ivs, r)| {
                    let mut out: Vec<(i32, i32)> = ivs
                        .iter()
                        .rev()
                        .map(|&(b, e)| (r.rlen - e, r.rlen - b))
                        .collect();
                    merge_intervals(&mut out);
                    out
                })
                .collect()
        });
        ReadBlock {
            root: self.root.clone(),
            path: self.path.clone(),
            part: self.part,
            ureads: self.ureads,
            treads: self.treads,
            cutoff: self.cutoff,
            all: self.all,
            freq: [self.freq[3], self.freq[2], self.freq[1], self.freq[0]],
            maxlen: self.maxlen,
            totlen: self.totlen,
            trimmed: self.trimmed,
            ufirst: self.ufirst,
            tfirst: self.tfirst,
            reads: self.reads.clone(),
            uindex: self.uindex.clone(),
            bases,
            masks,
        }
    }

}

/// Reverse-complement a numeric sequence in place.  An involution.
pub fn complement_in_place(seq: &mut [u8]) {
    let mut s = 0;
    let mut t = seq.len();
    while s + 1 < t {
        t -= 1;
        let c = seq[s];
        seq[s] = 3 - seq[t];
        seq[t] = 3 - c;
        s += 1;
    }
    if s < t {
        seq[s] = 3 - seq[s];
    }
}

/// Bytes needed for a packed read of `len` bases.
#[inline]
pub fn compressed_len(len: usize) -> usize {
    (len + 3) >> 2
}

fn unpack_bases(packed: &[u8], len: usize, out: &mut Vec<u8>) {
    for i in 0..len {
        let byte = packed[i >> 2];
        out.push((byte >> (6 - 2 * (i & 3))) & 0x3);
    }
}

fn pack_bases(seq: &[u8], out: &mut Vec<u8>) {
    for chunk in seq.chunks(4) {
        let mut byte = 0u8;
        for (j, &b) in chunk.iter().enumerate() {
            byte |= (b & 0x3) << (6 - 2 * j);
        }
        out.push(byte);
    }
}

/// Union-merge a list of (beg, end) intervals in place.
pub fn merge_intervals(ivs: &mut Vec<(i32, i32)>) {
    if ivs.len() < 2 {
        return;
    }
    ivs.sort_unstable();
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(ivs.len());
    for &(b, e) in ivs.iter() {
        match out.last_mut() {
            Some(last) if b <= last.1 => last.1 = last.1.max(e),
            _ => out.push((b, e)),
        }
    }
    *ivs = out;
}

fn resolve_root(name: &Path) -> Result<(PathBuf, String, i32)> {
    let dir = name
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut stem = name
        .file_name()
        .ok_or_else(|| EngineError::User(format!("bad database name {}", name.display())))?
        .to_string_lossy()
        .to_string();
    if let Some(s) = stem.strip_suffix(".db") {
        stem = s.to_string();
    }
    if dir.join(format!("{}.db", stem)).exists() {
        return Ok((dir, stem, 0));
    }
    if let Some(dot) = stem.rfind('.') {
        if let Ok(part) = stem[dot + 1..].parse::<i32>() {
            let root = stem[..dot].to_string();
            if part > 0 && dir.join(format!("{}.db", root)).exists() {
                return Ok((dir, root, part));
            }
        }
    }
    Err(EngineError::User(format!(
        "database {} not found",
        name.display()
    )))
}

/// Parsed `.db` stub.
struct Stub {
    cutoff: i32,
    all: bool,
    nblocks: i32,
    ublocks: Vec<i32>,
    tblocks: Vec<i32>,
}

impl Stub {
    fn parse(path: &Path) -> Result<Stub> {
        let file = File::open(path)
            .map_err(|_| EngineError::User(format!("cannot open {}", path.display())))?;
        let mut lines = BufReader::new(file).lines();
        let mut next = |what: &str| -> Result<String> {
            lines
                .next()
                .transpose()?
                .ok_or_else(|| EngineError::corrupt(path.display().to_string(), format!("missing {}", what)))
        };

        let nfiles: usize = field_after(&next("file count")?, "files")
            .ok_or_else(|| EngineError::corrupt(path.display().to_string(), "bad files line"))?;
        for _ in 0..nfiles {
            next("file entry")?;
        }
        let nblocks: i32 = field_after(&next("block count")?, "blocks")
            .ok_or_else(|| EngineError::corrupt(path.display().to_string(), "bad blocks line"))?;
        let params = next("size parameters")?;
        let cutoff: i32 = field_after(&params, "cutoff")
            .ok_or_else(|| EngineError::corrupt(path.display().to_string(), "bad cutoff"))?;
        let all: i32 = field_after(&params, "all")
            .ok_or_else(|| EngineError::corrupt(path.display().to_string(), "bad all flag"))?;

        let mut ublocks = Vec::with_capacity(nblocks as usize + 1);
        let mut tblocks = Vec::with_capacity(nblocks as usize + 1);
        for _ in 0..=nblocks {
            let line = next("block entry")?;
            let mut it = line.split_whitespace();
            let u: i32 = it
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| EngineError::corrupt(path.display().to_string(), "bad block entry"))?;
            let t: i32 = it
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| EngineError::corrupt(path.display().to_string(), "bad block entry"))?;
            ublocks.push(u);
            tblocks.push(t);
        }
        Ok(Stub {
            cutoff,
            all: all != 0,
            nblocks,
            ublocks,
            tblocks,
        })
    }
}

/// Parse the numeric token following `key =` on a stub line.
fn field_after<T: std::str::FromStr>(line: &str, key: &str) -> Option<T> {
    let at = line.find(key)?;
    let rest = line[at + key.len()..].trim_start().strip_prefix('=')?;
    rest.split_whitespace().next()?.parse().ok()
}

/// Block header of the `.idx` file.
struct IdxHeader {
    ureads: i32,
    treads: i32,
    freq: [f32; 4],
}

impl IdxHeader {
    fn read(file: &mut File, path: &Path) -> Result<IdxHeader> {
        let mut buf = [0u8; IDX_HEADER_BYTES as usize];
        file.read_exact(&mut buf)
            .map_err(|_| EngineError::corrupt(path.display().to_string(), "short index header"))?;
        let i32_at = |o: usize| i32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
        let f32_at = |o: usize| f32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
        let header = IdxHeader {
            ureads: i32_at(0),
            treads: i32_at(4),
            freq: [f32_at(16), f32_at(20), f32_at(24), f32_at(28)],
        };
        if header.ureads < 0 || header.treads < 0 || header.treads > header.ureads {
            return Err(EngineError::corrupt(
                path.display().to_string(),
                "inconsistent read counts",
            ));
        }
        Ok(header)
    }
}

/// Write a database from numeric sequences.  Produces the stub, index, and
/// base-pair files; splits into blocks of at most `block_bases` total bases
/// when given.  Flags every read best-of-well.
pub fn create_db(
    root_path: &Path,
    seqs: &[Vec<u8>],
    cutoff: i32,
    all: bool,
    block_bases: Option<i64>,
) -> Result<()> {
    let dir = root_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut root = root_path
        .file_name()
        .ok_or_else(|| EngineError::User("bad database name".into()))?
        .to_string_lossy()
        .to_string();
    if let Some(s) = root.strip_suffix(".db") {
        root = s.to_string();
    }

    let nreads = seqs.len() as i32;
    let mut totlen = 0i64;
    let mut maxlen = 0i32;
    let mut counts = [0u64; 4];
    for s in seqs {
        totlen += s.len() as i64;
        maxlen = maxlen.max(s.len() as i32);
        for &b in s {
            counts[(b & 3) as usize] += 1;
        }
    }
    let total = totlen.max(1) as f64;
    let freq = [
        (counts[0] as f64 / total) as f32,
        (counts[1] as f64 / total) as f32,
        (counts[2] as f64 / total) as f32,
        (counts[3] as f64 / total) as f32,
    ];

    // Base-pair file and per-read records.
    let mut packed = Vec::new();
    let mut records = Vec::with_capacity(seqs.len());
    for (i, s) in seqs.iter().enumerate() {
        records.push(ReadEntry {
            origin: i as i32,
            rlen: s.len() as i32,
            fpulse: 0,
            boff: packed.len() as i64,
            coff: -1,
            flags: DB_BEST,
        });
        pack_bases(s, &mut packed);
    }
    std::fs::write(dir.join(format!("{}.bps", root)), &packed)?;

    // Block partition by cumulative base count.
    let mut ublocks = vec![0i32];
    let mut tblocks = vec![0i32];
    if let Some(cap) = block_bases {
        let mut acc = 0i64;
        let mut tcount = 0i32;
        for (i, s) in seqs.iter().enumerate() {
            if acc > 0 && acc + s.len() as i64 > cap {
                ublocks.push(i as i32);
                tblocks.push(tcount);
                acc = 0;
            }
            acc += s.len() as i64;
            if s.len() as i32 >= cutoff {
                tcount += 1;
            }
        }
        ublocks.push(nreads);
        tblocks.push(seqs.iter().filter(|s| s.len() as i32 >= cutoff).count() as i32);
    } else {
        ublocks.push(nreads);
        tblocks.push(seqs.iter().filter(|s| s.len() as i32 >= cutoff).count() as i32);
    }
    let nblocks = ublocks.len() as i32 - 1;

    // Stub.
    {
        let mut stub = BufWriter::new(File::create(dir.join(format!("{}.db", root)))?);
        writeln!(stub, "files = {:9}", 1)?;
        writeln!(stub, "  {:9} {} {}", nreads, root, root)?;
        writeln!(stub, "blocks = {:9}", nblocks)?;
        writeln!(
            stub,
            "size = {:9} cutoff = {:9} all = {:1}",
            block_bases.unwrap_or(totlen),
            cutoff,
            if all { 1 } else { 0 }
        )?;
        for i in 0..ublocks.len() {
            writeln!(stub, " {:9} {:9}", ublocks[i], tblocks[i])?;
        }
        stub.flush()?;
    }

    // Index.
    {
        let mut idx = BufWriter::new(File::create(dir.join(format!("{}.idx", root)))?);
        let treads = *tblocks.last().unwrap();
        let mut header = Vec::with_capacity(IDX_HEADER_BYTES as usize);
        header.extend_from_slice(&nreads.to_le_bytes());
        header.extend_from_slice(&treads.to_le_bytes());
        header.extend_from_slice(&cutoff.to_le_bytes());
        header.extend_from_slice(&(all as i32).to_le_bytes());
        for f in freq {
            header.extend_from_slice(&f.to_le_bytes());
        }
        header.extend_from_slice(&maxlen.to_le_bytes());
        header.extend_from_slice(&0i32.to_le_bytes());
        header.extend_from_slice(&totlen.to_le_bytes());
        header.extend_from_slice(&nreads.to_le_bytes()); // visible reads
        header.extend_from_slice(&0i32.to_le_bytes()); // trimmed flag
        header.extend_from_slice(&0i32.to_le_bytes()); // part
        header.extend_from_slice(&0i32.to_le_bytes()); // ufirst
        header.extend_from_slice(&0i32.to_le_bytes()); // tfirst
        header.extend_from_slice(&1i32.to_le_bytes()); // sentinel spacing
        header.extend_from_slice(&[0u8; 16]); // reserved
        debug_assert_eq!(header.len(), IDX_HEADER_BYTES as usize);
        idx.write_all(&header)?;

        for r in &records {
            let mut rec = Vec::with_capacity(IDX_RECORD_BYTES as usize);
            rec.extend_from_slice(&r.origin.to_le_bytes());
            rec.extend_from_slice(&r.rlen.to_le_bytes());
            rec.extend_from_slice(&r.fpulse.to_le_bytes());
            rec.extend_from_slice(&0i32.to_le_bytes());
            rec.extend_from_slice(&r.boff.to_le_bytes());
            rec.extend_from_slice(&r.coff.to_le_bytes());
            rec.extend_from_slice(&r.flags.to_le_bytes());
            rec.extend_from_slice(&0i32.to_le_bytes());
            rec.extend_from_slice(&0i64.to_le_bytes());
            debug_assert_eq!(rec.len(), IDX_RECORD_BYTES as usize);
            idx.write_all(&rec)?;
        }
        idx.flush()?;
    }
    Ok(())
}

/// Write a mask track over the untrimmed read space of a database.
pub fn write_mask_track(
    root_path: &Path,
    name: &str,
    intervals: &[Vec<(i32, i32)>],
) -> Result<()> {
    let dir = root_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut root = root_path
        .file_name()
        .ok_or_else(|| EngineError::User("bad database name".into()))?
        .to_string_lossy()
        .to_string();
    if let Some(s) = root.strip_suffix(".db") {
        root = s.to_string();
    }

    let mut anno = BufWriter::new(File::create(
        dir.join(format!("{}.{}.anno", root, name)),
    )?);
    let mut data = BufWriter::new(File::create(
        dir.join(format!("{}.{}.data", root, name)),
    )?);
    let mut off = 0i64;
    anno.write_all(&off.to_le_bytes())?;
    for ivs in intervals {
        for &(b, e) in ivs {
            data.write_all(&b.to_le_bytes())?;
            data.write_all(&e.to_le_bytes())?;
            off += 8;
        }
        anno.write_all(&off.to_le_bytes())?;
    }
    anno.flush()?;
    data.flush()?;
    Ok(())
}

/// The trimmed first-read index of every block boundary of a database
/// (length nblocks + 1), for partitioning sorted overlap streams.
pub fn block_partition(name: &Path) -> Result<Vec<i32>> {
    let (dir, root, _) = resolve_root(name)?;
    let stub = Stub::parse(&dir.join(format!("{}.db", root)))?;
    Ok(stub.tblocks)
}

fn read_i64_file(path: &Path) -> Result<Vec<i64>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 8 != 0 {
        return Err(EngineError::corrupt(
            path.display().to_string(),
            "size not a multiple of 8",
        ));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

fn read_i32_file(path: &Path) -> Result<Vec<i32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(EngineError::corrupt(
            path.display().to_string(),
            "size not a multiple of 4",
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}
