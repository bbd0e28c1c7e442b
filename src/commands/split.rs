//! Partition a sorted `.las` stream into per-block files.
//!
//! The inverse of merge: records are bucketed either into `parts` files of
//! roughly equal record count (never splitting an a-read across files) or
//! by the a-read ranges of a database's block partition.

use crate::db::block_partition;
use crate::error::{EngineError, Result};
use crate::overlap::{LasReader, OverlapWriter};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// How the stream is bucketed.
pub enum SplitMode {
    /// Equal record counts across this many files.
    Parts(usize),
    /// By the block partition of this database.
    Blocks(PathBuf),
}

/// Split the stream `input` (a path, or stdin when `None`) into files
/// named `<root>.<k>.las` for k = 1...
pub fn run(template: &Path, mode: &SplitMode, input: Option<&Path>) -> Result<()> {
    match input {
        Some(path) => {
            let fname = path.display().to_string();
            let file = File::open(path)
                .map_err(|_| EngineError::User(format!("cannot open {}", fname)))?;
            split_stream(template, mode, BufReader::new(file), &fname)
        }
        None => {
            let stdin = std::io::stdin();
            split_stream(template, mode, stdin.lock(), "<stdin>")
        }
    }
}

fn part_path(template: &Path, k: usize) -> PathBuf {
    let stem = template
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let root = stem.strip_suffix(".las").unwrap_or(&stem);
    template.with_file_name(format!("{}.{}.las", root, k))
}

fn split_stream<R: Read>(
    template: &Path,
    mode: &SplitMode,
    input: R,
    fname: &str,
) -> Result<()> {
    let mut reader = LasReader::new(input, fname)?;
    let novl = reader.novl;
    let tspace = reader.tspace;

    let (nparts, table) = match mode {
        SplitMode::Parts(n) => {
            if *n == 0 {
                return Err(EngineError::User("cannot split into zero parts".into()));
            }
            (*n, None)
        }
        SplitMode::Blocks(db) => {
            let tblocks = block_partition(db)?;
            if tblocks.len() < 2 {
                return Err(EngineError::User(format!(
                    "{} has no block partition",
                    db.display()
                )));
            }
            (tblocks.len() - 1, Some(tblocks))
        }
    };

    let mut k = 1usize;
    let mut writer = OverlapWriter::create(&part_path(template, k), tspace)?;
    let mut written = 0i64;
    let mut last_aread = -1i32;
    while let Some(ovl) = reader.read_overlap()? {
        let advance = match &table {
            Some(tblocks) => k < nparts && ovl.aread >= tblocks[k],
            None => {
                k < nparts
                    && written >= (novl * k as i64) / nparts as i64
                    && ovl.aread != last_aread
            }
        };
        if advance {
            writer.finish()?;
            k += 1;
            writer = OverlapWriter::create(&part_path(template, k), tspace)?;
            // A block table may skip several empty blocks at once.
            if let Some(tblocks) = &table {
                while k < nparts && ovl.aread >= tblocks[k] {
                    writer.finish()?;
                    k += 1;
                    writer = OverlapWriter::create(&part_path(template, k), tspace)?;
                }
            }
        }
        writer.write(&ovl)?;
        written += 1;
        last_aread = ovl.aread;
    }
    writer.finish()?;
    while k < nparts {
        k += 1;
        OverlapWriter::create(&part_path(template, k), tspace)?.finish()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlap::{Overlap, Path as OvlPath};
    use tempfile::tempdir;

    fn record(aread: i32) -> Overlap {
        Overlap {
            aread,
            bread: 0,
            alen: 300,
            blen: 300,
            flags: 0,
            path: OvlPath {
                diffs: 0,
                abpos: 0,
                bbpos: 0,
                aepos: 50,
                bepos: 50,
                trace: vec![0, 50],
            },
        }
    }

    fn write_sorted(path: &Path, areads: &[i32]) {
        let mut w = OverlapWriter::create(path, 100).unwrap();
        for &a in areads {
            w.write(&record(a)).unwrap();
        }
        w.finish().unwrap();
    }

    fn read_areads(path: &Path) -> Vec<i32> {
        let mut r = LasReader::new(File::open(path).unwrap(), "part").unwrap();
        let mut out = Vec::new();
        while let Some(ovl) = r.read_overlap().unwrap() {
            out.push(ovl.aread);
        }
        out
    }

    #[test]
    fn test_equal_split_keeps_aread_whole() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("all.las");
        write_sorted(&input, &[0, 0, 0, 1, 1, 2, 3, 3]);

        run(
            &dir.path().join("out.las"),
            &SplitMode::Parts(2),
            Some(&input),
        )
        .unwrap();

        let p1 = read_areads(&dir.path().join("out.1.las"));
        let p2 = read_areads(&dir.path().join("out.2.las"));
        assert_eq!(p1.len() + p2.len(), 8);
        // No a-read straddles the boundary.
        if let (Some(last), Some(first)) = (p1.last(), p2.first()) {
            assert!(last < first);
        }
    }

    #[test]
    fn test_split_by_block_table() {
        let dir = tempdir().unwrap();
        // A 6-read database in 3 blocks of 2 reads each.
        let seqs: Vec<Vec<u8>> = (0..6).map(|i| vec![(i % 4) as u8; 40]).collect();
        let root = dir.path().join("db6");
        crate::db::create_db(&root, &seqs, 0, true, Some(80)).unwrap();

        let input = dir.path().join("all.las");
        write_sorted(&input, &[0, 1, 1, 3, 4, 5, 5]);

        run(
            &dir.path().join("blk.las"),
            &SplitMode::Blocks(root),
            Some(&input),
        )
        .unwrap();

        assert_eq!(read_areads(&dir.path().join("blk.1.las")), vec![0, 1, 1]);
        assert_eq!(read_areads(&dir.path().join("blk.2.las")), vec![3]);
        assert_eq!(read_areads(&dir.path().join("blk.3.las")), vec![4, 5, 5]);
    }

    #[test]
    fn test_split_creates_trailing_empties() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("one.las");
        write_sorted(&input, &[0]);
        run(
            &dir.path().join("p.las"),
            &SplitMode::Parts(3),
            Some(&input),
        )
        .unwrap();
        assert_eq!(read_areads(&dir.path().join("p.1.las")), vec![0]);
        assert!(read_areads(&dir.path().join("p.2.las")).is_empty());
        assert!(read_areads(&dir.path().join("p.3.las")).is_empty());
    }
}
