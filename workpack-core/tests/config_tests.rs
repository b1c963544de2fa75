//! Configuration loading: file errors, parse context, and a full round of
//! rule resolution from a file on disk.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use predicates::Predicate;
use workpack_core::{
    types::{Row, TableName, Value},
    Config, ConfigError,
};

// ---------------------------------------------------------------------------
// 1. Load errors
// ---------------------------------------------------------------------------

#[test]
fn missing_file_returns_io_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("workpack.yml");
    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {err}");
    assert!(err.to_string().contains("workpack.yml"));
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("workpack.yml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(
        predicate::str::contains("workpack.yml").eval(&err.to_string()),
        "must contain file path, got: {err}"
    );
}

#[test]
fn table_without_filter_column_name_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("workpack.yml");
    file.write_str(
        "file: data.gpkg\nwork-packages: []\ntables:\n  - { name: farms, method: filter-column }\n",
    )
    .expect("write");

    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::MissingFilterColumn { .. }), "got: {err}");
}

#[test]
fn unknown_method_is_a_parse_error() {
    let yaml = "file: data.gpkg\ntables:\n  - { name: farms, method: filter-sql }\n";
    let err = Config::from_yaml_str(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Rules resolved from a file
// ---------------------------------------------------------------------------

#[test]
fn rules_from_file_filter_rows() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("workpack.yml");
    file.write_str(
        r#"
file: farms.gpkg
work-packages:
  - name: Kyle
    value: Kyle
    project: org/kyle
  - name: Emma
    value: [Emma, Emily]
    project: org/emma
tables:
  - name: farms
    method: filter-column
    filter-column-name: owner
"#,
    )
    .expect("write");
    let config = Config::load(file.path()).expect("load");
    let kyle = &config.work_packages[0];
    let rule = kyle.rule_for(&TableName::from("farms")).expect("farms rule");

    let owned = Row::from([("owner".to_string(), Value::from("Kyle"))]);
    let other = Row::from([("owner".to_string(), Value::from("Emma"))]);
    assert!(rule.belongs_to(&owned));
    assert!(!rule.belongs_to(&other));

    let emma = config.work_packages[1]
        .rule_for(&TableName::from("farms"))
        .expect("farms rule");
    assert!(emma.belongs_to(&other));
    assert!(!emma.belongs_to(&owned));
}
