//! End-to-end pipeline tests over real database files.

use lode_align::commands::check::{self, CheckOptions};
use lode_align::db::create_db;
use lode_align::overlap::{LasReader, Overlap};
use lode_align::pipeline::{align_databases, PipelineParams};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::path::Path;
use tempfile::tempdir;

fn params(workers: usize, outdir: &Path) -> PipelineParams {
    PipelineParams {
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
        outdir: outdir.to_path_buf(),
    }
}

fn read_all(path: &Path) -> Vec<Overlap> {
    let mut out = Vec::new();
    if let Ok(file) = File::open(path) {
        let mut reader = LasReader::new(file, &path.display().to_string()).unwrap();
        while let Some(ovl) = reader.read_overlap().unwrap() {
            out.push(ovl);
        }
    }
    out
}

fn collect_outputs(dir: &Path, name: &str, workers: usize) -> Vec<Overlap> {
    let mut all = Vec::new();
    for orient in ['N', 'C'] {
        for w in 0..workers {
            let p = dir.join(format!("{}.{}.{}{}.las", name, name, orient, w));
            all.extend(read_all(&p));
        }
    }
    all
}

fn random_seq(n: usize, seed: u64) -> Vec<u8> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0..4u8)).collect()
}

#[test]
fn test_periodic_self_read_yields_nothing() {
    // A single read compared against itself: the strict bread > aread
    // rule suppresses the mirror pair, so nothing comes out even though
    // the read is perfectly self-similar.
    let dir = tempdir().unwrap();
    let seq: Vec<u8> = [0u8, 1, 2, 3].repeat(2000); // "ACGTACGT"... x 1000
    let root = dir.path().join("peri");
    create_db(&root, &[seq], 0, true, None).unwrap();

    align_databases(&root, &[root.clone()], &params(1, dir.path())).unwrap();

    let all = collect_outputs(dir.path(), "peri", 1);
    assert!(all.is_empty());

    // The empty files still carry valid headers.
    let n0 = dir.path().join("peri.peri.N0.las");
    let reader = LasReader::new(File::open(&n0).unwrap(), "peri.peri.N0.las").unwrap();
    assert_eq!(reader.novl, 0);
    assert_eq!(reader.tspace, 100);
}

#[test]
fn test_mutated_pair_spans_with_expected_diffs() {
    // Two 2 kb reads identical except for 300 random substitutions: one
    // overlap in each perspective, covering at least 1800 columns per
    // read, with an edit count close to the substitution count.
    let dir = tempdir().unwrap();
    let seq = random_seq(2000, 7);
    let mut mutated = seq.clone();
    let mut rng = SmallRng::seed_from_u64(13);
    let mut placed = 0;
    while placed < 300 {
        let i = rng.gen_range(0..2000);
        if mutated[i] == seq[i] {
            mutated[i] = (seq[i] + rng.gen_range(1..4u8)) & 3;
            placed += 1;
        }
    }

    let root = dir.path().join("pair");
    create_db(&root, &[seq, mutated], 0, true, None).unwrap();
    align_databases(&root, &[root.clone()], &params(1, dir.path())).unwrap();

    let fwd = read_all(&dir.path().join("pair.pair.N0.las"));
    assert_eq!(fwd.len(), 2, "one record per perspective: {:?}", fwd.len());
    for ovl in &fwd {
        assert!(ovl.path.aepos - ovl.path.abpos >= 1800, "{:?}", ovl.path);
        assert!(ovl.path.bepos - ovl.path.bbpos >= 1800);
        assert!(
            ovl.path.diffs >= 280 && ovl.path.diffs <= 320,
            "diffs {}",
            ovl.path.diffs
        );
    }
    assert_eq!((fwd[0].aread, fwd[0].bread), (0, 1));
    assert_eq!((fwd[1].aread, fwd[1].bread), (1, 0));

    // Outputs satisfy the verifier, including strict order and the
    // database cross-check.
    check::run(
        &[dir.path().join("pair.pair.N0.las")],
        &CheckOptions {
            sorted: true,
            db: Some(root),
        },
    )
    .unwrap();
}

#[test]
fn test_unrelated_reads_yield_nothing() {
    // No shared 14-mer worth 35 bp of diagonal coverage: no overlaps in
    // either orientation.
    let dir = tempdir().unwrap();
    let a = random_seq(2000, 21);
    let b = random_seq(2000, 22);
    let root = dir.path().join("far");
    create_db(&root, &[a, b], 0, true, None).unwrap();

    align_databases(&root, &[root.clone()], &params(1, dir.path())).unwrap();
    assert!(collect_outputs(dir.path(), "far", 1).is_empty());
}

fn simulate_overlapping_db(root: &Path, seed: u64) {
    // Reads sampled from a shared reference with light noise overlap one
    // another heavily.
    let mut rng = SmallRng::seed_from_u64(seed);
    let genome = random_seq(30_000, seed ^ 0xabcd);
    let mut reads = Vec::new();
    for _ in 0..24 {
        let len = rng.gen_range(1500..3500usize);
        let start = rng.gen_range(0..genome.len() - len);
        let mut read = genome[start..start + len].to_vec();
        for b in read.iter_mut() {
            if rng.gen_bool(0.04) {
                *b = (*b + rng.gen_range(1..4u8)) & 3;
            }
        }
        reads.push(read);
    }
    create_db(root, &reads, 0, true, None).unwrap();
}

fn normalized(mut ovls: Vec<Overlap>) -> Vec<(i32, i32, u32, i32, i32, i32, i32, i32)> {
    let mut keys: Vec<_> = ovls
        .drain(..)
        .map(|o| {
            (
                o.aread,
                o.bread,
                o.flags,
                o.path.abpos,
                o.path.aepos,
                o.path.bbpos,
                o.path.bepos,
                o.path.diffs,
            )
        })
        .collect();
    keys.sort();
    keys
}

#[test]
fn test_worker_count_invariance() {
    // The same block pair under 1 and 4 workers produces the same record
    // set; only the distribution across the per-worker files may differ.
    let dir1 = tempdir().unwrap();
    let dir4 = tempdir().unwrap();
    let root1 = dir1.path().join("inv");
    let root4 = dir4.path().join("inv");
    simulate_overlapping_db(&root1, 31);
    simulate_overlapping_db(&root4, 31);

    align_databases(&root1, &[root1.clone()], &params(1, dir1.path())).unwrap();
    align_databases(&root4, &[root4.clone()], &params(4, dir4.path())).unwrap();

    let set1 = normalized(collect_outputs(dir1.path(), "inv", 1));
    let set4 = normalized(collect_outputs(dir4.path(), "inv", 4));
    assert!(!set1.is_empty(), "expected overlaps from the simulation");
    assert_eq!(set1, set4);
}

#[test]
fn test_cross_database_comparison() {
    // Two databases sampling the same reference must produce symmetric
    // outputs: X-keyed files for X reads, Y-keyed files for Y reads.
    let dir = tempdir().unwrap();
    let genome = random_seq(8_000, 99);
    let mut rng = SmallRng::seed_from_u64(3);
    let make = |rng: &mut SmallRng, n: usize| -> Vec<Vec<u8>> {
        (0..n)
            .map(|_| {
                let len = 2000;
                let start = rng.gen_range(0..genome.len() - len);
                genome[start..start + len].to_vec()
            })
            .collect()
    };
    let xroot = dir.path().join("xdb");
    let yroot = dir.path().join("ydb");
    create_db(&xroot, &make(&mut rng, 8), 0, true, None).unwrap();
    create_db(&yroot, &make(&mut rng, 8), 0, true, None).unwrap();

    align_databases(&xroot, &[yroot.clone()], &params(2, dir.path())).unwrap();

    let mut x_keyed = Vec::new();
    let mut y_keyed = Vec::new();
    for orient in ['N', 'C'] {
        for w in 0..2 {
            x_keyed.extend(read_all(
                &dir.path().join(format!("xdb.ydb.{}{}.las", orient, w)),
            ));
            y_keyed.extend(read_all(
                &dir.path().join(format!("ydb.xdb.{}{}.las", orient, w)),
            ));
        }
    }
    assert!(!x_keyed.is_empty());
    assert_eq!(x_keyed.len(), y_keyed.len());
    // Every X-keyed record has a Y-keyed twin with transposed extents.
    let mut xs: Vec<_> = x_keyed
        .iter()
        .map(|o| (o.aread, o.bread, o.flags, o.path.diffs))
        .collect();
    let mut ys: Vec<_> = y_keyed
        .iter()
        .map(|o| (o.bread, o.aread, o.flags, o.path.diffs))
        .collect();
    xs.sort();
    ys.sort();
    assert_eq!(xs, ys);
}

#[test]
fn test_reverse_complement_pair_is_found() {
    // The second read is the reverse complement of the first: only the
    // complement pass can find it, and it must flag the record.
    let dir = tempdir().unwrap();
    let seq = random_seq(2000, 55);
    let mut rc = seq.clone();
    rc.reverse();
    for b in rc.iter_mut() {
        *b = 3 - *b;
    }
    let root = dir.path().join("rc");
    create_db(&root, &[seq, rc], 0, true, None).unwrap();

    align_databases(&root, &[root.clone()], &params(1, dir.path())).unwrap();

    let fwd = read_all(&dir.path().join("rc.rc.N0.las"));
    assert!(fwd.is_empty(), "no same-orientation overlap expected");

    let comp = read_all(&dir.path().join("rc.rc.C0.las"));
    assert_eq!(comp.len(), 2);
    for ovl in &comp {
        assert_eq!(ovl.flags & 1, 1, "complement flag must be set");
        assert!(ovl.path.aepos - ovl.path.abpos >= 1900, "{:?}", ovl.path);
        assert_eq!(ovl.path.diffs, 0);
    }

    // Complemented records still satisfy every trace-point invariant.
    check::run(
        &[dir.path().join("rc.rc.C0.las")],
        &CheckOptions {
            sorted: true,
            db: Some(root),
        },
    )
    .unwrap();
}

#[test]
fn test_masked_pair_is_suppressed() {
    // Masking the whole of read 0 removes every seed it could produce.
    let dir = tempdir().unwrap();
    let seq = random_seq(2000, 70);
    let root = dir.path().join("msk");
    create_db(&root, &[seq.clone(), seq], 0, true, None).unwrap();
    lode_align::db::write_mask_track(&root, "rep", &[vec![(0, 2000)], vec![]]).unwrap();

    let mut p = params(1, dir.path());
    align_databases(&root, &[root.clone()], &p).unwrap();
    let unmasked = collect_outputs(dir.path(), "msk", 1);
    assert_eq!(unmasked.len(), 2);

    let dir2 = tempdir().unwrap();
    let root2 = dir2.path().join("msk");
    let seq2 = random_seq(2000, 70);
    create_db(&root2, &[seq2.clone(), seq2], 0, true, None).unwrap();
    lode_align::db::write_mask_track(&root2, "rep", &[vec![(0, 2000)], vec![]]).unwrap();
    p.masks = vec!["rep".to_string()];
    p.outdir = dir2.path().to_path_buf();
    align_databases(&root2, &[root2.clone()], &p).unwrap();
    assert!(collect_outputs(dir2.path(), "msk", 1).is_empty());
}

#[test]
fn test_min_length_filter() {
    // Identical 800 bp reads overlap fully, but below -l nothing is
    // reported.
    let dir = tempdir().unwrap();
    let seq = random_seq(800, 44);
    let root = dir.path().join("short");
    create_db(&root, &[seq.clone(), seq], 0, true, None).unwrap();

    align_databases(&root, &[root.clone()], &params(1, dir.path())).unwrap();
    assert!(collect_outputs(dir.path(), "short", 1).is_empty());

    let dir2 = tempdir().unwrap();
    let root2 = dir2.path().join("short");
    let seq2 = random_seq(800, 44);
    create_db(&root2, &[seq2.clone(), seq2], 0, true, None).unwrap();
    let mut p = params(1, dir2.path());
    p.min_over = 500;
    align_databases(&root2, &[root2.clone()], &p).unwrap();
    assert_eq!(collect_outputs(dir2.path(), "short", 1).len(), 2);
}

#[test]
fn test_hgap_filters_short_perspective() {
    // With -H above one read's length, only the longer read's perspective
    // is reported.
    let dir = tempdir().unwrap();
    let long = random_seq(4000, 91);
    let short = long[500..2500].to_vec();
    let root = dir.path().join("hg");
    create_db(&root, &[long, short], 0, true, None).unwrap();

    let mut p = params(1, dir.path());
    p.hgap_min = 3000;
    align_databases(&root, &[root.clone()], &p).unwrap();

    let all = collect_outputs(dir.path(), "hg", 1);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].aread, 0);
    assert_eq!(all[0].bread, 1);
    assert!(all[0].alen >= 3000);
}
