//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep to wait for state.
//! Time-based waits are allowed only where time is the point:
//! retry backoff in the gateway and the rate limiter's token queue.
//!
//! `std::thread::sleep` is never allowed; it blocks a runtime worker.

use architectural_enforcement::{production_files, report, SourceFile, Violation};

/// `(file name, function)` pairs allowed to call `tokio::time::sleep`
const ALLOWED_SLEEPS: &[(&str, &str)] = &[
    // Retry backoff, raced against cancellation
    ("gateway.rs", "sleep_unless_cancelled"),
    // Token bucket wait queue
    ("rate_limit.rs", "acquire"),
];

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations: Vec<Violation> = production_files()
        .iter()
        .flat_map(thread_sleep_violations)
        .collect();

    report(
        "CRITICAL: std::thread::sleep found in production code!",
        &violations,
        &[
            "Blocking sleeps stall the tokio worker thread.",
            "Use tokio::time::interval for periodic work, or await the event itself.",
        ],
    );
}

#[test]
fn test_async_sleep_only_for_backoff_and_queueing() {
    let violations: Vec<Violation> = production_files()
        .iter()
        .flat_map(async_sleep_violations)
        .collect();

    report(
        "Unapproved tokio::time::sleep found in production code!",
        &violations,
        &[
            "Allowed: retry backoff (gateway.rs) and rate-limit queueing (rate_limit.rs).",
            "Use tokio::time::interval, a channel, or a CancellationToken instead.",
        ],
    );
}

fn thread_sleep_violations(file: &SourceFile) -> Vec<Violation> {
    file.code_lines()
        .into_iter()
        .filter(|line| line.code.contains("thread::sleep"))
        .map(|line| file.violation(&line, "Blocking sleep"))
        .collect()
}

fn async_sleep_violations(file: &SourceFile) -> Vec<Violation> {
    let name = file.file_name();
    file.code_lines()
        .into_iter()
        .filter(|line| line.code.contains("time::sleep(") || line.code.contains("sleep_until("))
        .filter(|line| {
            !ALLOWED_SLEEPS
                .iter()
                .any(|(allowed_file, allowed_fn)| {
                    *allowed_file == name && line.function == Some(*allowed_fn)
                })
        })
        .map(|line| file.violation(&line, "Async sleep outside backoff"))
        .collect()
}

#[test]
fn test_detector_flags_polling_sleep() {
    let file = SourceFile {
        path: "gateway/daemon/src/server.rs".into(),
        text: "async fn run() {\n    loop {\n        tokio::time::sleep(d).await;\n    }\n}\n"
            .to_string(),
    };
    let violations = async_sleep_violations(&file);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].line, 3);
}

#[test]
fn test_detector_allows_backoff_sleep() {
    let file = SourceFile {
        path: "gateway/core/src/gateway.rs".into(),
        text: "async fn sleep_unless_cancelled(d: Duration) -> bool {\n    tokio::time::sleep(d).await;\n    true\n}\n"
            .to_string(),
    };
    assert!(async_sleep_violations(&file).is_empty());
}

#[test]
fn test_detector_ignores_test_module() {
    let file = SourceFile {
        path: "gateway/core/src/registry.rs".into(),
        text: "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    async fn t() {\n        std::thread::sleep(d);\n    }\n}\n"
            .to_string(),
    };
    assert!(thread_sleep_violations(&file).is_empty());
}
