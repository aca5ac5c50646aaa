//! Integration test: scenario runs produce a valid log and a report that
//! pins it by hash.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use mpibridge_core::structured_log::validate_log_text;
use mpibridge_core::{LogLevel, Operation, Transition};
use mpibridge_harness::{HarnessError, HarnessReport, ShutdownPath, run_all, run_scenario};
use sha2::Digest;

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn sha256_hex(path: &Path) -> String {
    let bytes = std::fs::read(path).expect("read artifact for sha");
    let digest = sha2::Sha256::digest(&bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn all_paths_pass_and_log_is_pinned() {
    let dir = unique_tmp_dir("mpibridge-harness");
    let log = dir.join("lifecycle.jsonl");
    std::fs::File::create(&log).unwrap();

    let outcomes = run_all(&ShutdownPath::ALL, Some(&log)).unwrap();
    let mut report = HarnessReport::new("it", outcomes);
    report.attach_log(&log).unwrap();

    assert!(report.passed);
    assert_eq!(report.summary.scenarios, 4);
    assert!(report.summary.log_entries > 0);
    assert_eq!(report.artifacts.len(), 1);
    assert_eq!(report.artifacts[0].sha256, sha256_hex(&log));
    assert_eq!(report.artifacts[0].kind, "jsonl_log");
}

#[test]
fn log_records_each_path() {
    let dir = unique_tmp_dir("mpibridge-harness-log");
    let log = dir.join("lifecycle.jsonl");

    for path in ShutdownPath::ALL {
        run_scenario(path, Some(&log)).unwrap();
    }
    let entries = validate_log_text(&std::fs::read_to_string(&log).unwrap()).unwrap();

    let finalize: Vec<_> = entries
        .iter()
        .filter(|e| e.trace_id.starts_with("harness-finalize::"))
        .collect();
    assert!(finalize.iter().any(|e| e.event == "lifecycle.finalize_callback"));
    assert!(finalize.iter().any(|e| {
        e.event == "lifecycle.cleanup" && e.transition == Some(Transition::Performed)
    }));
    assert!(finalize.iter().any(|e| {
        e.event == "lifecycle.cleanup" && e.transition == Some(Transition::AlreadyDone)
    }));

    let degraded: Vec<_> = entries
        .iter()
        .filter(|e| e.trace_id.starts_with("harness-degraded::"))
        .collect();
    let failed_sets = degraded
        .iter()
        .filter(|e| {
            e.event == "lifecycle.step_failed"
                && e.symbol.as_deref() == Some("MPI_Comm_set_errhandler")
        })
        .count();
    assert_eq!(failed_sets, 4);
    assert!(degraded.iter().any(|e| {
        e.event == "lifecycle.startup"
            && e.level == LogLevel::Warn
            && e.operation == Some(Operation::StartUp)
    }));

    assert!(
        entries
            .iter()
            .filter(|e| e.trace_id.starts_with("harness-exit::"))
            .all(|e| e.operation != Some(Operation::CleanUp))
    );
}

#[test]
fn corrupt_log_fails_the_report() {
    let dir = unique_tmp_dir("mpibridge-harness-bad");
    let log = dir.join("bad.jsonl");
    std::fs::write(&log, "{\"timestamp\":\"t\",\"level\":\"info\"}\n").unwrap();

    let outcomes = run_all(&[ShutdownPath::Explicit], None).unwrap();
    let mut report = HarnessReport::new("it", outcomes);
    let err = report.attach_log(&log).unwrap_err();
    assert!(matches!(err, HarnessError::LogValidation(_)));
    assert!(!report.passed);
    assert!(report.artifacts.is_empty());
}
