mod common;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use common::{Fixture, PAIRED_AB};
use proptest::prelude::*;
use rnaseq_bulk::dispatch::{DispatchError, Dispatcher, SchedulerContext};
use rnaseq_bulk::samples::{group, Pairing};

#[test]
fn mate_removed_after_grouping_fails_dispatch() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    let samples = group(&fx.indir, None, None).unwrap();
    fs::remove_file(fx.indir.join("sampleB_R2.fastq.gz")).unwrap();

    let dispatcher = Dispatcher::new(&samples);
    assert!(dispatcher.resolve(0).is_ok());
    match dispatcher.resolve(1).unwrap_err() {
        DispatchError::MissingMate { sample, path } => {
            assert_eq!(sample, "sampleB");
            assert_eq!(path, fx.indir.join("sampleB_R2.fastq.gz"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn explicit_reverse_read_is_kept_at_dispatch() {
    let fx = Fixture::new();
    fx.touch_reads(&["a_R1.fastq.gz", "a_R2.fastq.gz"]);
    let elsewhere = fx.root.join("other");
    fs::create_dir_all(&elsewhere).unwrap();
    let reverse = elsewhere.join("a_R2.fastq.gz");
    fs::write(&reverse, b"@r\n").unwrap();

    let samples = group(&fx.indir, Some(Path::new("a_R1.fastq.gz")), Some(&reverse)).unwrap();
    let sample = Dispatcher::new(&samples).resolve(0).unwrap();
    assert_eq!(sample.pairing, Pairing::Explicit);
    assert_eq!(sample.reverse.as_deref(), Some(reverse.as_path()));

    fs::remove_file(fx.indir.join("a_R2.fastq.gz")).unwrap();
    let sample = Dispatcher::new(&samples).resolve(0).unwrap();
    assert_eq!(sample.reverse.as_deref(), Some(reverse.as_path()));

    fs::remove_file(&reverse).unwrap();
    match Dispatcher::new(&samples).resolve(0).unwrap_err() {
        DispatchError::MissingMate { path, .. } => assert_eq!(path, reverse),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn scheduler_task_id_selects_the_sample() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    let samples = group(&fx.indir, None, None).unwrap();
    let ctx = SchedulerContext::from_vars([("SLURM_ARRAY_TASK_ID", "1")]);

    let sample = Dispatcher::new(&samples)
        .resolve(ctx.task_index.unwrap())
        .unwrap();
    assert_eq!(sample.name, "sampleB");
    assert!(sample.is_paired());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn indices_map_one_to_one_onto_samples(count in 1usize..10) {
        let fx = Fixture::new();
        for i in 0..count {
            let forward = format!("s{i:02}_R1.fastq.gz");
            let reverse = format!("s{i:02}_R2.fastq.gz");
            fx.touch_reads(&[forward.as_str(), reverse.as_str()]);
        }
        let samples = group(&fx.indir, None, None).unwrap();
        let dispatcher = Dispatcher::new(&samples);

        let mut seen = HashSet::new();
        for index in 0..count {
            let sample = dispatcher.resolve(index).unwrap();
            prop_assert_eq!(&sample.name, &format!("s{index:02}"));
            prop_assert!(seen.insert(sample.name));
        }
        let out_of_range = matches!(
            dispatcher.resolve(count),
            Err(DispatchError::IndexOutOfRange { .. })
        );
        prop_assert!(out_of_range);
    }
}
