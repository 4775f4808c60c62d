mod common;

use std::fs;
use std::path::PathBuf;

use common::{files_under, FakeToolRunner, Fixture, PAIRED_AB};
use rnaseq_bulk::launcher::{self, run_local};
use rnaseq_bulk::pipeline::{ArtifactKind, RunRequest, RunState, Step, StepError, StepRunner, StepSet};
use rnaseq_bulk::samples::group;
use rnaseq_bulk::{DispatchError, PipelineError};

fn request(steps: &[&str]) -> RunRequest {
    RunRequest {
        steps: StepSet::parse(steps).unwrap(),
        alignment: None,
    }
}

#[test]
fn task_one_runs_sample_b_end_to_end() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("save_files: False");
    let samples = group(&fx.indir, None, None).unwrap();
    let names: Vec<_> = samples.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["sampleA", "sampleB"]);

    let workspace = fx.workspace(&config);
    let mut tools = FakeToolRunner::default();
    let result = launcher::run_task(
        &config,
        &workspace,
        &samples,
        1,
        &RunRequest::default(),
        &mut tools,
    )
    .unwrap();

    assert_eq!(result.sample, "sampleB");
    assert_eq!(result.state, RunState::Done);
    assert_eq!(
        result.history,
        vec![
            RunState::Pending,
            RunState::Trimming,
            RunState::Aligning,
            RunState::Counting,
            RunState::Done
        ]
    );
    assert_eq!(result.completed, vec![Step::Trim, Step::Align, Step::Count]);
    assert_eq!(
        tools.labels(),
        vec![
            "fastp",
            "STAR_align",
            "flagstat_raw",
            "samtools_sort",
            "flagstat_sorted",
            "samtools_filter",
            "flagstat_filtered",
            "featureCounts"
        ]
    );

    // Only the count table survives; scratch is gone.
    assert_eq!(
        files_under(&workspace.data_dir()),
        vec![
            PathBuf::from("sampleB/sampleB_counts.txt"),
            PathBuf::from("sampleB/sampleB_counts.txt.summary"),
        ]
    );
    assert!(files_under(&workspace.run_dir().join("scratch")).is_empty());
    assert_eq!(
        result.counts,
        Some(workspace.data_dir().join("sampleB/sampleB_counts.txt"))
    );

    // Raw reads are kept by default.
    assert!(fx.indir.join("sampleB_R1.fastq.gz").is_file());

    let log = fs::read_to_string(workspace.logs_dir().join("sampleB/subprocess_log.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 8);
}

#[test]
fn trimmed_reads_feed_the_aligner() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);
    let mut tools = FakeToolRunner::default();
    launcher::run_task(&config, &workspace, &samples, 0, &request(&["trim", "align"]), &mut tools)
        .unwrap();

    let star = tools.find("STAR_align").unwrap();
    let reads: Vec<String> = star
        .display_args()
        .into_iter()
        .skip_while(|arg| arg != "--readFilesIn")
        .skip(1)
        .take(2)
        .collect();
    assert!(reads[0].ends_with("trim/sampleA_R1_trimmed.fastq.gz"));
    assert!(reads[1].ends_with("trim/sampleA_R2_trimmed.fastq.gz"));
}

#[test]
fn skipped_count_keeps_the_alignment() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("save_files: False");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);
    let mut tools = FakeToolRunner::default();
    let result = launcher::run_task(
        &config,
        &workspace,
        &samples,
        0,
        &request(&["align", "trim"]),
        &mut tools,
    )
    .unwrap();

    assert_eq!(result.completed, vec![Step::Trim, Step::Align]);
    assert_eq!(
        files_under(&workspace.data_dir()),
        vec![
            PathBuf::from("sampleA/sampleA_filtered.bam"),
            PathBuf::from("sampleA/sampleA_filtered.bam.bai"),
        ]
    );
    assert!(result.counts.is_none());
}

#[test]
fn save_files_persists_one_artifact_per_step() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("save_files: True");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);
    let mut tools = FakeToolRunner::default();
    launcher::run_task(&config, &workspace, &samples, 0, &RunRequest::default(), &mut tools)
        .unwrap();

    assert_eq!(
        files_under(&workspace.data_dir()),
        vec![
            PathBuf::from("sampleA/sampleA_R1_trimmed.fastq.gz"),
            PathBuf::from("sampleA/sampleA_R2_trimmed.fastq.gz"),
            PathBuf::from("sampleA/sampleA_counts.txt"),
            PathBuf::from("sampleA/sampleA_counts.txt.summary"),
            PathBuf::from("sampleA/sampleA_filtered.bam"),
            PathBuf::from("sampleA/sampleA_filtered.bam.bai"),
        ]
    );
}

#[test]
fn cram_save_type_recompresses_and_copies_reference() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("save_files: True\n  save_type: cram");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);
    let mut tools = FakeToolRunner::default();
    launcher::run_task(&config, &workspace, &samples, 1, &request(&["align"]), &mut tools)
        .unwrap();

    assert_eq!(
        files_under(&workspace.data_dir()),
        vec![
            PathBuf::from("sampleB/sampleB_filtered.cram"),
            PathBuf::from("sampleB/sampleB_filtered.cram.crai"),
        ]
    );
    assert!(workspace.reference_dir().join("genome.fa").is_file());
    let cram = tools.find("samtools_cram").unwrap();
    assert_eq!(
        cram.arg_after("-T").unwrap(),
        fx.root.join("refs/genome.fa").as_os_str()
    );
}

#[test]
fn count_only_uses_supplied_alignment_without_touching_it() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    let external = fx.root.join("existing.bam");
    fs::write(&external, b"bam").unwrap();
    let config = fx.config("save_files: False");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);

    let mut tools = FakeToolRunner::default();
    let request = RunRequest {
        steps: StepSet::parse(&["count"]).unwrap(),
        alignment: Some(external.clone()),
    };
    let result =
        launcher::run_task(&config, &workspace, &samples, 0, &request, &mut tools).unwrap();

    assert_eq!(tools.labels(), vec!["featureCounts"]);
    let counted = tools.calls[0].display_args().last().cloned().unwrap();
    assert_eq!(PathBuf::from(counted), external);
    assert!(external.is_file());
    assert_eq!(result.completed, vec![Step::Count]);
}

#[test]
fn count_only_without_alignment_fails_immediately() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    let config = fx.config("");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);
    let scratch = workspace.scratch_for(0).unwrap();

    let mut runner = StepRunner::new(&config, &workspace, FakeToolRunner::default());
    let err = runner
        .run(samples.get(0).unwrap(), &request(&["count"]), &scratch)
        .unwrap_err();

    assert!(matches!(
        err,
        StepError::MissingArtifact {
            step: Step::Count,
            needed: ArtifactKind::Alignment,
            path: None,
            ..
        }
    ));
    assert_eq!(runner.state(), RunState::Failed);
    assert!(runner.into_tools().calls.is_empty());
}

#[test]
fn tool_failure_removes_partial_outputs_and_keeps_prior_step() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("save_files: False");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);
    let scratch = workspace.scratch_for(0).unwrap();

    let mut runner = StepRunner::new(
        &config,
        &workspace,
        FakeToolRunner::failing("samtools_sort", 3),
    );
    let err = runner
        .run(samples.get(0).unwrap(), &RunRequest::default(), &scratch)
        .unwrap_err();

    match &err {
        StepError::ToolFailed {
            sample,
            step,
            tool,
            exit_code,
            stderr_tail,
        } => {
            assert_eq!(sample, "sampleA");
            assert_eq!(*step, Step::Align);
            assert_eq!(tool, "samtools_sort");
            assert_eq!(*exit_code, Some(3));
            assert_eq!(stderr_tail, "samtools_sort crashed");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(
        runner.history(),
        &[
            RunState::Pending,
            RunState::Trimming,
            RunState::Aligning,
            RunState::Failed
        ]
    );

    // Nothing half-written from the align step remains in scratch.
    assert!(files_under(&scratch.join("align"))
        .iter()
        .all(|file| !file.to_string_lossy().ends_with(".bam")));
    // The completed trim output is preserved.
    assert_eq!(
        files_under(&workspace.data_dir()),
        vec![
            PathBuf::from("sampleA/sampleA_R1_trimmed.fastq.gz"),
            PathBuf::from("sampleA/sampleA_R2_trimmed.fastq.gz"),
        ]
    );
}

#[test]
fn missing_star_index_is_generated_once() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    let config = fx.config("");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);

    let mut tools = FakeToolRunner::default();
    let summary = run_local(&config, &workspace, &samples, &request(&["align"]), &mut tools);
    assert!(summary.all_succeeded());

    let builds = tools.labels().iter().filter(|l| **l == "STAR_index").count();
    assert_eq!(builds, 1);
    assert!(fx.root.join("refs/star_index/SA").is_file());
    let leftovers: Vec<_> = fs::read_dir(fx.root.join("refs"))
        .unwrap()
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().contains("staging"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn raw_reads_are_dropped_when_not_saved() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    let yaml = common::config_yaml("") + "  fastp:\n    save_inputs: F\n";
    let config = rnaseq_bulk::RunConfig::from_yaml_str(&yaml, &fx.root).unwrap();
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);

    let mut tools = FakeToolRunner::default();
    launcher::run_task(&config, &workspace, &samples, 0, &request(&["trim"]), &mut tools).unwrap();

    assert!(!fx.indir.join("sampleA_R1.fastq.gz").exists());
    assert!(!fx.indir.join("sampleA_R2.fastq.gz").exists());
    assert!(fx.indir.join("sampleB_R1.fastq.gz").exists());
}

#[test]
fn local_run_continues_past_failed_tasks() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);

    let mut tools = FakeToolRunner::default();
    tools.fail("featureCounts", Some("sampleA"), 1);
    let summary = run_local(&config, &workspace, &samples, &RunRequest::default(), &mut tools);

    assert!(!summary.all_succeeded());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].task_index, 0);
    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.completed[0].sample, "sampleB");
}

#[test]
fn out_of_range_task_is_rejected() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    let config = fx.config("");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);

    let err = launcher::run_task(
        &config,
        &workspace,
        &samples,
        2,
        &RunRequest::default(),
        FakeToolRunner::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Dispatch(DispatchError::IndexOutOfRange { index: 2, len: 2 })
    ));
}

#[test]
fn trim_and_count_without_alignment_fails_before_trimming() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    let config = fx.config("save_files: False");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);
    let scratch = workspace.scratch_for(0).unwrap();

    let mut runner = StepRunner::new(&config, &workspace, FakeToolRunner::default());
    let err = runner
        .run(samples.get(0).unwrap(), &request(&["trim", "count"]), &scratch)
        .unwrap_err();

    assert!(matches!(
        err,
        StepError::MissingArtifact {
            step: Step::Count,
            needed: ArtifactKind::Alignment,
            path: None,
            ..
        }
    ));
    assert!(runner.state().is_terminal());
    assert_eq!(runner.history(), &[RunState::Pending, RunState::Failed]);
    assert!(runner.into_tools().calls.is_empty());
    assert!(files_under(&workspace.data_dir()).is_empty());
}

#[test]
fn failed_cram_index_keeps_the_alignment() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("save_type: cram");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);

    let mut tools = FakeToolRunner::default();
    tools.fail("samtools_index", Some(".cram"), 1);
    let err = launcher::run_task(&config, &workspace, &samples, 0, &request(&["align"]), &mut tools)
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Step(StepError::ToolFailed { ref tool, .. }) if tool == "samtools_index"
    ));
    assert_eq!(
        files_under(&workspace.data_dir()),
        vec![PathBuf::from("sampleA/sampleA_filtered.bam")]
    );
    assert!(files_under(&workspace.run_dir().join("scratch")).is_empty());
}

#[test]
fn failed_cram_conversion_keeps_completed_outputs() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("save_files: True\n  save_type: cram");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);

    let mut tools = FakeToolRunner::failing("samtools_cram", 1);
    let err = launcher::run_task(&config, &workspace, &samples, 0, &RunRequest::default(), &mut tools)
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Step(StepError::ToolFailed { ref tool, .. }) if tool == "samtools_cram"
    ));
    assert!(tools.labels().contains(&"featureCounts"));
    assert_eq!(
        files_under(&workspace.data_dir()),
        vec![
            PathBuf::from("sampleA/sampleA_R1_trimmed.fastq.gz"),
            PathBuf::from("sampleA/sampleA_R2_trimmed.fastq.gz"),
            PathBuf::from("sampleA/sampleA_counts.txt"),
            PathBuf::from("sampleA/sampleA_counts.txt.summary"),
            PathBuf::from("sampleA/sampleA_filtered.bam"),
        ]
    );
}

#[test]
fn repeated_runs_leave_the_same_outputs() {
    let policies = [
        (
            "save_files: False",
            vec![
                PathBuf::from("sampleA/sampleA_counts.txt"),
                PathBuf::from("sampleA/sampleA_counts.txt.summary"),
            ],
        ),
        (
            "save_files: True",
            vec![
                PathBuf::from("sampleA/sampleA_R1_trimmed.fastq.gz"),
                PathBuf::from("sampleA/sampleA_R2_trimmed.fastq.gz"),
                PathBuf::from("sampleA/sampleA_counts.txt"),
                PathBuf::from("sampleA/sampleA_counts.txt.summary"),
                PathBuf::from("sampleA/sampleA_filtered.bam"),
                PathBuf::from("sampleA/sampleA_filtered.bam.bai"),
            ],
        ),
    ];
    for (project_extra, expected) in policies {
        let fx = Fixture::new();
        fx.touch_reads(&PAIRED_AB);
        fx.star_index();
        let config = fx.config(project_extra);
        let samples = group(&fx.indir, None, None).unwrap();
        let workspace = fx.workspace(&config);

        for _ in 0..2 {
            let mut tools = FakeToolRunner::default();
            launcher::run_task(&config, &workspace, &samples, 0, &RunRequest::default(), &mut tools)
                .unwrap();
            assert_eq!(files_under(&workspace.data_dir()), expected, "{project_extra}");
            assert!(files_under(&workspace.run_dir().join("scratch")).is_empty());
        }
    }
}

#[test]
fn interrupted_alignment_drops_partial_outputs() {
    let fx = Fixture::new();
    fx.touch_reads(&PAIRED_AB);
    fx.star_index();
    let config = fx.config("save_files: False");
    let samples = group(&fx.indir, None, None).unwrap();
    let workspace = fx.workspace(&config);
    let scratch = workspace.scratch_for(0).unwrap();

    let mut tools = FakeToolRunner::default();
    tools.interrupt("samtools_filter");
    let mut runner = StepRunner::new(&config, &workspace, tools);
    let err = runner
        .run(samples.get(0).unwrap(), &RunRequest::default(), &scratch)
        .unwrap_err();

    match &err {
        StepError::Interrupted { sample, step } => {
            assert_eq!(sample, "sampleA");
            assert_eq!(*step, Step::Align);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(runner.state().is_terminal());
    assert_eq!(runner.state(), RunState::Failed);
    assert!(files_under(&scratch.join("align"))
        .iter()
        .all(|file| !file.to_string_lossy().ends_with(".bam")));
    assert_eq!(
        files_under(&workspace.data_dir()),
        vec![
            PathBuf::from("sampleA/sampleA_R1_trimmed.fastq.gz"),
            PathBuf::from("sampleA/sampleA_R2_trimmed.fastq.gz"),
        ]
    );
}
