mod common;

use std::path::Path;

use common::config_yaml;
use rnaseq_bulk::config::{coerce_bool, ConfigError, RunConfig, SaveType};
use test_case::test_case;

fn resolve(project_extra: &str) -> Result<RunConfig, ConfigError> {
    RunConfig::from_yaml_str(&config_yaml(project_extra), Path::new("/pipeline"))
}

#[test_case("True", true ; "title case")]
#[test_case("true", true ; "lower case")]
#[test_case("TRUE", true ; "upper case")]
#[test_case("T", true ; "letter t")]
#[test_case("False", false ; "false title case")]
#[test_case("faLse", false ; "false mixed case")]
#[test_case("f", false ; "letter f")]
fn save_files_accepts_bool_spellings(text: &str, expected: bool) {
    let config = resolve(&format!("save_files: \"{text}\"")).unwrap();
    assert_eq!(config.project.save_files, expected);
}

#[test_case("tru" ; "truncated word")]
#[test_case("" ; "empty string")]
#[test_case("1" ; "digit")]
#[test_case("yes" ; "other word")]
fn save_files_rejects_non_bools(text: &str) {
    let err = resolve(&format!("save_files: \"{text}\"")).unwrap_err();
    match err {
        ConfigError::InvalidBoolean { field, value } => {
            assert_eq!(field, "project.save_files");
            assert_eq!(value, format!("{text:?}"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn yaml_native_booleans_are_accepted() {
    assert!(resolve("save_files: true").unwrap().project.save_files);
    assert!(!resolve("save_files: false").unwrap().project.save_files);
}

#[test_case("T", Some(true))]
#[test_case("False", Some(false))]
#[test_case("Tru", None)]
fn coercion_rule(text: &str, expected: Option<bool>) {
    assert_eq!(coerce_bool(text), expected);
}

#[test]
fn cram_needs_an_uncompressed_reference() {
    let yaml = "
project: {name: demo, save_type: cram}
reference: {ref_dir: refs, genome_fasta: genome.fa.gz}
";
    let err = RunConfig::from_yaml_str(yaml, Path::new("/pipeline")).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidCombination(_)));

    let config = resolve("save_type: CRAM").unwrap();
    assert_eq!(config.project.save_type, SaveType::Cram);
}

#[test]
fn reference_paths_resolve_against_root() {
    let config = resolve("").unwrap();
    assert_eq!(config.reference.ref_dir, Path::new("/pipeline/refs"));
    assert_eq!(
        config.reference.star_index,
        Path::new("/pipeline/refs/star_index")
    );
}

#[test]
fn missing_project_name_is_required() {
    let err = RunConfig::from_yaml_str("reference: {ref_dir: refs}", Path::new("/")).unwrap_err();
    assert!(matches!(err, ConfigError::MissingRequired("project.name")));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RunConfig::load(&dir.path().join("config.yaml"), dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn cleanup_override_inverts_save_files() {
    let config = resolve("save_files: True").unwrap().with_save_files(false);
    assert!(!config.project.save_files);
}
