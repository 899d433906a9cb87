use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::NamedTempFile;

mod common;

#[test]
fn test_batch_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let file = NamedTempFile::new()?;
    common::write_batch(
        file.path(),
        &[
            ("purchase", "tx-1", "100"),
            ("purchase", "tx-2", "50"),
            ("capture", "tx-1", "30"),
            ("capture", "tx-1", "30"),
            ("capture", "tx-1", "40"),
            ("capture", "tx-2", "20"),
        ],
    )?;

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("batch").arg(file.path()).arg("--concurrency").arg("4");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "transaction_id,amount,status,captured,refunded",
        ))
        .stdout(predicate::str::contains("tx-1,100,captured,100,0"))
        .stdout(predicate::str::contains("tx-2,50,partial_capturing,20,0"));

    Ok(())
}

#[test]
fn test_batch_reports_bad_rows_and_rejections() -> Result<(), Box<dyn std::error::Error>> {
    let file = NamedTempFile::new()?;
    common::write_batch(
        file.path(),
        &[
            ("purchase", "tx-1", "100"),
            ("void", "tx-1", "10"),
            ("capture", "tx-1", "-5"),
            ("capture", "tx-1", "101"),
            ("capture", "missing", "10"),
            ("refund", "tx-1", "25"),
        ],
    )?;

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("batch").arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading operation"))
        .stderr(predicate::str::contains("exceed the authorized amount"))
        .stderr(predicate::str::contains("invoice missing not found"))
        .stdout(predicate::str::contains("tx-1,100,partial_refunding,0,25"))
        .stdout(predicate::str::contains("missing").not());

    Ok(())
}

#[test]
fn test_batch_runs_on_every_lock_backend() -> Result<(), Box<dyn std::error::Error>> {
    let file = NamedTempFile::new()?;
    common::write_batch(
        file.path(),
        &[
            ("purchase", "tx-1", "10"),
            ("capture", "tx-1", "10"),
            ("refund", "tx-1", "4"),
        ],
    )?;

    for lock in ["queue", "advisory", "session-advisory"] {
        let mut cmd = Command::new(cargo_bin!());
        cmd.arg("batch")
            .arg(file.path())
            .arg("--concurrency")
            .arg("1")
            .arg("--lock")
            .arg(lock)
            .arg("--retry-interval-ms")
            .arg("5");
        cmd.assert()
            .success()
            .stdout(predicate::str::contains("tx-1,10,"));
    }

    Ok(())
}

#[test]
fn test_unknown_invoice_fails() {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("invoice").arg("tx-404");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invoice tx-404 not found"));
}

#[test]
fn test_invalid_amount_rejected_by_parser() {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("purchase").arg("tx-1").arg("0");

    cmd.assert().failure();
}
