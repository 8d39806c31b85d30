mod common;

use std::{
    fs,
    path::Path,
    process::{Command, Output},
};

use cifar100::dataset::cifar100::DATA_DIR;

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cifar100"))
        .args(args)
        .env_remove("CIFAR100_CONFIG")
        .env_remove("SEED")
        .output()
        .unwrap()
}

#[test]
fn no_arguments_prints_usage() {
    let out = run(&[]);

    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Usage"));
}

#[test]
fn too_many_arguments_prints_usage() {
    let out = run(&["download", "now"]);

    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Usage"));
}

#[test]
fn unknown_command() {
    let out = run(&["foo"]);

    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Unknown command foo"));
}

const UNREACHABLE_URL: &str = "http://127.0.0.1:9/unreachable.tar.gz";

fn download(root: &Path, seed: Option<&str>) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_cifar100"));
    command
        .arg("download")
        .env_remove("CIFAR100_CONFIG")
        .env_remove("SEED")
        .env("CIFAR100_DATA_DIR", root)
        .env("CIFAR100_URL", UNREACHABLE_URL);
    if let Some(seed) = seed {
        command.env("SEED", seed);
    }
    command.output().unwrap()
}

#[test]
fn download_with_warm_cache() {
    let dir = tempfile::tempdir().unwrap();
    common::write_archive(dir.path(), b"already here").unwrap();
    fs::create_dir_all(dir.path().join(DATA_DIR)).unwrap();

    let out = download(dir.path(), None);

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn download_extracts_a_present_archive() {
    let dir = tempfile::tempdir().unwrap();
    common::write_archive(dir.path(), &common::dataset_archive(2, 1).unwrap()).unwrap();

    let out = download(dir.path(), None);

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(dir.path().join(DATA_DIR).join("train").is_file());
    assert!(dir.path().join(DATA_DIR).join("test").is_file());
}

#[test]
fn download_fails_when_the_archive_is_unreachable() {
    let dir = tempfile::tempdir().unwrap();

    let out = download(dir.path(), None);

    assert!(!out.status.success());
    assert!(!dir.path().join(DATA_DIR).exists());
}

#[test]
fn download_ignores_an_unparsable_seed() {
    let dir = tempfile::tempdir().unwrap();
    common::write_archive(dir.path(), &common::dataset_archive(1, 1).unwrap()).unwrap();

    let out = download(dir.path(), Some("not-a-number"));

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(dir.path().join(DATA_DIR).join("train").is_file());
}
