//! `.las` integrity verifier.
//!
//! Validates each file's header, every record's coordinates and trace
//! points, optionally the strict (aread, bread, comp, abpos) sort order,
//! and — when a database is supplied — read ids and lengths.  A corrupt
//! file is reported and checking continues with the next one.

use crate::db::ReadBlock;
use crate::error::{EngineError, Result};
use crate::overlap::{check_trace_points, LasReader};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub struct CheckOptions {
    /// Require strict sort order (no duplicate full keys).
    pub sorted: bool,
    /// Validate read ids and lengths against this database.
    pub db: Option<PathBuf>,
}

/// Check every file; returns an error naming how many failed (exit 1)
/// while individual problems go to stderr.
pub fn run(files: &[PathBuf], options: &CheckOptions) -> Result<()> {
    let block = match &options.db {
        Some(path) => {
            let mut b = ReadBlock::open(path)?;
            b.trim();
            Some(b)
        }
        None => None,
    };

    let mut bad = 0usize;
    for file in files {
        if let Err(e) = check_file(file, options, block.as_ref()) {
            eprintln!("  {}", e);
            bad += 1;
        }
    }
    if bad > 0 {
        return Err(EngineError::User(format!(
            "{} of {} files failed checks",
            bad,
            files.len()
        )));
    }
    Ok(())
}

fn check_file(path: &Path, options: &CheckOptions, block: Option<&ReadBlock>) -> Result<()> {
    let fname = path.display().to_string();
    let file =
        File::open(path).map_err(|_| EngineError::User(format!("cannot open {}", fname)))?;
    let mut reader = LasReader::new(BufReader::new(file), &fname)?;
    let tspace = reader.tspace;
    if tspace <= 0 {
        return Err(EngineError::corrupt(&fname, "non-positive trace spacing"));
    }

    let mut prev_key = None;
    let mut n = 0i64;
    while let Some(ovl) = reader.read_overlap()? {
        n += 1;
        if ovl.aread < 0 || ovl.bread < 0 {
            return Err(EngineError::corrupt(&fname, "negative read index"));
        }
        if let Some(b) = block {
            let nreads = b.nreads() as i32;
            if ovl.aread >= nreads || ovl.bread >= nreads {
                return Err(EngineError::corrupt(
                    &fname,
                    format!("read index out of range ({}, {})", ovl.aread, ovl.bread),
                ));
            }
            if ovl.alen != b.reads[ovl.aread as usize].rlen
                || ovl.blen != b.reads[ovl.bread as usize].rlen
            {
                return Err(EngineError::corrupt(
                    &fname,
                    format!("read lengths disagree with database on record {}", n),
                ));
            }
        }
        let p = &ovl.path;
        if !(0 <= p.abpos && p.abpos <= p.aepos && p.aepos <= ovl.alen)
            || !(0 <= p.bbpos && p.bbpos <= p.bepos && p.bepos <= ovl.blen)
        {
            return Err(EngineError::corrupt(
                &fname,
                format!("alignment coordinates out of range on record {}", n),
            ));
        }
        check_trace_points(&ovl, tspace, &fname)?;

        if options.sorted {
            let key = ovl.key();
            if let Some(prev) = prev_key {
                if key <= prev {
                    return Err(EngineError::corrupt(
                        &fname,
                        format!("records are not strictly sorted at record {}", n),
                    ));
                }
            }
            prev_key = Some(key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlap::{Overlap, OverlapWriter, Path as OvlPath};
    use tempfile::tempdir;

    fn record(aread: i32, abpos: i32) -> Overlap {
        // Spans 150 bases from abpos in [0,100), crossing one trace
        // boundary: two points.
        Overlap {
            aread,
            bread: 0,
            alen: 500,
            blen: 500,
            flags: 0,
            path: OvlPath {
                diffs: 3,
                abpos,
                bbpos: abpos,
                aepos: abpos + 150,
                bepos: abpos + 150,
                trace: vec![1, 50, 2, 100],
            },
        }
    }

    #[test]
    fn test_valid_file_passes() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("ok.las");
        let mut w = OverlapWriter::create(&p, 100).unwrap();
        w.write(&record(0, 50)).unwrap();
        w.write(&record(1, 20)).unwrap();
        w.finish().unwrap();

        run(
            &[p],
            &CheckOptions {
                sorted: true,
                db: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_unsorted_file_fails_strict_check() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("uns.las");
        let mut w = OverlapWriter::create(&p, 100).unwrap();
        w.write(&record(1, 0)).unwrap();
        w.write(&record(0, 0)).unwrap();
        w.finish().unwrap();

        assert!(run(
            &[p.clone()],
            &CheckOptions {
                sorted: true,
                db: None
            }
        )
        .is_err());
        // Without the sort requirement the file is fine.
        run(
            &[p],
            &CheckOptions {
                sorted: false,
                db: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("dup.las");
        let mut w = OverlapWriter::create(&p, 100).unwrap();
        w.write(&record(0, 50)).unwrap();
        w.write(&record(0, 50)).unwrap();
        w.finish().unwrap();

        assert!(run(
            &[p],
            &CheckOptions {
                sorted: true,
                db: None
            }
        )
        .is_err());
    }

    #[test]
    fn test_bad_trace_sum_reported() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("bad.las");
        let mut w = OverlapWriter::create(&p, 100).unwrap();
        let mut ovl = record(0, 50);
        ovl.path.trace[1] = 49; // breaks the b-interval sum
        w.write(&ovl).unwrap();
        w.finish().unwrap();

        assert!(run(
            &[p],
            &CheckOptions {
                sorted: false,
                db: None
            }
        )
        .is_err());
    }

    #[test]
    fn test_db_length_validation() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("vdb");
        crate::db::create_db(&root, &[vec![0u8; 500], vec![1u8; 500]], 0, true, None).unwrap();

        let p = dir.path().join("withdb.las");
        let mut w = OverlapWriter::create(&p, 100).unwrap();
        w.write(&record(0, 50)).unwrap();
        w.finish().unwrap();

        run(
            &[p.clone()],
            &CheckOptions {
                sorted: false,
                db: Some(root.clone()),
            },
        )
        .unwrap();

        // A record naming a read the database does not have fails.
        let p2 = dir.path().join("oob.las");
        let mut w = OverlapWriter::create(&p2, 100).unwrap();
        w.write(&record(7, 50)).unwrap();
        w.finish().unwrap();
        assert!(run(
            &[p2],
            &CheckOptions {
                sorted: false,
                db: Some(root)
            }
        )
        .is_err());
    }
}
