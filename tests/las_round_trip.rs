//! Sort / merge / split / check round trips over pipeline output.

use lode_align::commands::check::{self, CheckOptions};
use lode_align::commands::{merge, sort, split, SplitMode};
use lode_align::db::{block_partition, create_db};
use lode_align::overlap::{LasReader, Overlap};
use lode_align::pipeline::{align_databases, PipelineParams};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn random_seq(n: usize, seed: u64) -> Vec<u8> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0..4u8)).collect()
}

fn read_all(path: &Path) -> Vec<Overlap> {
    let mut out = Vec::new();
    let mut reader =
        LasReader::new(File::open(path).unwrap(), &path.display().to_string()).unwrap();
    while let Some(ovl) = reader.read_overlap().unwrap() {
        out.push(ovl);
    }
    out
}

/// Simulated multi-block database plus a full comparison run.
fn pipeline_outputs(dir: &Path, workers: usize) -> (PathBuf, Vec<PathBuf>) {
    let mut rng = SmallRng::seed_from_u64(17);
    let genome = random_seq(20_000, 0x5eed);
    let mut reads = Vec::new();
    for _ in 0..18 {
        let len = rng.gen_range(1500..3000usize);
        let start = rng.gen_range(0..genome.len() - len);
        let mut read = genome[start..start + len].to_vec();
        for b in read.iter_mut() {
            if rng.gen_bool(0.03) {
                *b = (*b + rng.gen_range(1..4u8)) & 3;
            }
        }
        reads.push(read);
    }
    let root = dir.join("rt");
    create_db(&root, &reads, 0, true, Some(15_000)).unwrap();

    let params = PipelineParams {
        kmer: 14,
        binshift: 6,
        hitmin: 35,
        suppress: None,
        biased: false,
        ave_corr: 0.70,
        trace_space: 100,
        min_over: 1000,
        hgap_min: 0,
        mem_limit: None,
        workers,
        masks: Vec::new(),
        outdir: dir.to_path_buf(),
    };
    align_databases(&root, &[root.clone()], &params).unwrap();

    let mut outputs = Vec::new();
    for orient in ['N', 'C'] {
        for w in 0..workers {
            outputs.push(dir.join(format!("rt.rt.{}{}.las", orient, w)));
        }
    }
    (root, outputs)
}

#[test]
fn test_sort_merge_split_check_round_trip() {
    let dir = tempdir().unwrap();
    let (root, outputs) = pipeline_outputs(dir.path(), 4);

    let total_raw: i64 = outputs
        .iter()
        .map(|p| {
            LasReader::new(File::open(p).unwrap(), "raw")
                .unwrap()
                .novl
        })
        .sum();
    assert!(total_raw > 0, "simulation produced no overlaps");

    // Sort every worker file.
    sort::run(&outputs).unwrap();
    let sorted: Vec<PathBuf> = outputs
        .iter()
        .map(|p| {
            let stem = p.file_name().unwrap().to_string_lossy().to_string();
            let root = stem.strip_suffix(".las").unwrap();
            p.with_file_name(format!("{}.S.las", root))
        })
        .collect();
    for p in &sorted {
        check::run(
            &[p.clone()],
            &CheckOptions {
                sorted: true,
                db: Some(root.clone()),
            },
        )
        .unwrap();
    }

    // Merge them into one file; record count is conserved and the result
    // is strictly sorted.
    let merged = dir.path().join("rt.merged.las");
    merge::run(&merged, &sorted).unwrap();
    {
        let reader = LasReader::new(File::open(&merged).unwrap(), "merged").unwrap();
        assert_eq!(reader.novl, total_raw);
    }
    check::run(
        &[merged.clone()],
        &CheckOptions {
            sorted: true,
            db: Some(root.clone()),
        },
    )
    .unwrap();

    // Split by the database's block partition; parts concatenate back to
    // the merged stream.
    split::run(
        &dir.path().join("rt.block.las"),
        &SplitMode::Blocks(root.clone()),
        Some(&merged),
    )
    .unwrap();

    let tblocks = block_partition(&root).unwrap();
    let nblocks = tblocks.len() - 1;
    assert!(nblocks >= 2, "expected a multi-block database");

    let mut rebuilt = Vec::new();
    for k in 1..=nblocks {
        let part = dir.path().join(format!("rt.block.{}.las", k));
        let records = read_all(&part);
        for ovl in &records {
            assert!(ovl.aread >= tblocks[k - 1] && ovl.aread < tblocks[k]);
        }
        rebuilt.extend(records);
    }
    let merged_records = read_all(&merged);
    assert_eq!(rebuilt.len(), merged_records.len());
    assert_eq!(rebuilt, merged_records);
}

#[test]
fn test_equal_split_conserves_records() {
    let dir = tempdir().unwrap();
    let (_, outputs) = pipeline_outputs(dir.path(), 1);

    sort::run(&[outputs[0].clone()]).unwrap();
    let sorted = dir.path().join("rt.rt.N0.S.las");
    let original = read_all(&sorted);
    if original.is_empty() {
        return;
    }

    split::run(
        &dir.path().join("rt.eq.las"),
        &SplitMode::Parts(3),
        Some(&sorted),
    )
    .unwrap();

    let mut rebuilt = Vec::new();
    for k in 1..=3 {
        rebuilt.extend(read_all(&dir.path().join(format!("rt.eq.{}.las", k))));
    }
    assert_eq!(rebuilt, original);
}
