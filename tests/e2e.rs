use std::path::Path;
use std::process::Command;

use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

struct Run {
    stdout: String,
    stderr: String,
    success: bool,
}

fn run(db: &Path, args: &[&str]) -> Run {
    let output = Command::new(env!("CARGO_BIN_EXE_loyalty-points"))
        .arg("-d")
        .arg(format!("sqlite://{}", db.display()))
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("ACCRUAL_SYSTEM_ADDRESS")
        .output()
        .expect("failed to run binary");

    Run {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    }
}

#[test]
fn import_reconcile_and_report() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("loyalty.db");
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/orders/79927398713");
        then.status(200).json_body(json!({
            "order": "79927398713",
            "status": "PROCESSED",
            "accrual": 100.5
        }));
    });

    let out = run(&db, &["import", "tests/fixtures/uploads.csv"]);
    assert!(out.success, "{}", out.stderr);
    // user 2 tried to claim user 1's order
    assert!(out.stderr.contains("upload rejected"));

    let base_url = server.base_url();
    let out = run(&db, &["-r", &base_url, "reconcile", "--once"]);
    assert!(out.success, "{}", out.stderr);
    mock.assert();

    let out = run(&db, &["import", "tests/fixtures/withdrawals.csv"]);
    assert!(out.success, "{}", out.stderr);
    assert!(out.stderr.is_empty(), "{}", out.stderr);

    let out = run(&db, &["balance", "--user", "1"]);
    assert!(out.success);
    let lines: Vec<&str> = out.stdout.lines().collect();
    assert_eq!(lines, ["user,current,withdrawn", "1,50.5,50"]);

    let out = run(&db, &["orders", "--user", "1"]);
    let lines: Vec<&str> = out.stdout.lines().collect();
    assert_eq!(lines[0], "number,status,accrual,uploaded_at");
    assert!(lines[1].starts_with("79927398713,PROCESSED,100.5,"));
    assert_eq!(lines.len(), 2);

    let out = run(&db, &["withdrawals", "--user", "1"]);
    let lines: Vec<&str> = out.stdout.lines().collect();
    assert_eq!(lines[0], "order,sum,processed_at");
    assert!(lines[1].starts_with("12345678903,50,"));
}

#[test]
fn errors_warn_but_do_not_block() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("loyalty.db");

    let out = run(&db, &["import", "tests/fixtures/with_errors.csv"]);
    assert!(out.success);
    assert!(out.stderr.contains("unrecognized request type"));
    assert!(out.stderr.contains("withdraw missing sum"));
    assert!(out.stderr.contains("upload rejected"));

    let out = run(&db, &["orders", "--user", "1"]);
    let lines: Vec<&str> = out.stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("12345678903,NEW,,"));

    let out = run(&db, &["balance", "--user", "1"]);
    assert_eq!(out.stdout.lines().nth(1), Some("1,0,0"));
}

#[test]
fn reconcile_needs_an_accrual_address() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("loyalty.db");

    let out = run(&db, &["reconcile", "--once"]);
    assert!(!out.success);
    assert!(out.stderr.contains("accrual system address is required"));
}
