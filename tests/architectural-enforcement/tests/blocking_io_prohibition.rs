//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the gateway MUST NOT block the runtime.
//! **Required**: Use `tokio::fs`, `tokio::io`, `tokio::net`, `tokio::process`
//!
//! Plain `fn` bodies are exempt (config loading runs before the runtime
//! starts serving), as is test code.

use architectural_enforcement::{production_files, report, FnContext, SourceFile, Violation};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations: Vec<Violation> = production_files()
        .iter()
        .flat_map(blocking_io_violations)
        .collect();

    report(
        "CRITICAL: Blocking I/O calls found in async production code!",
        &violations,
        &[
            "❌ FORBIDDEN in async fn:",
            "  - std::fs::*, std::net::*, std::process::Command",
            "  - std::io::stdin(), std::io::stdout()",
            "  - reqwest::blocking::*",
            "✅ REQUIRED:",
            "  - tokio::fs::read_to_string().await, tokio::fs::OpenOptions",
            "  - tokio::io::stdin() with AsyncBufReadExt",
            "✅ ACCEPTABLE:",
            "  - Non-async functions, test code",
        ],
    );
}

/// Test that the blocking HTTP client never appears, async or not
#[test]
fn test_no_blocking_http_client() {
    let violations: Vec<Violation> = production_files()
        .iter()
        .flat_map(|file| {
            file.code_lines()
                .into_iter()
                .filter(|line| line.code.contains("reqwest::blocking"))
                .map(|line| file.violation(&line, "Blocking HTTP client"))
                .collect::<Vec<_>>()
        })
        .collect();

    report(
        "CRITICAL: reqwest::blocking used in production code!",
        &violations,
        &["Provider adapters share one async reqwest::Client."],
    );
}

fn blocking_io_violations(file: &SourceFile) -> Vec<Violation> {
    let mut violations = Vec::new();

    for line in file.code_lines() {
        if line.context != FnContext::Async {
            continue;
        }
        let code = line.code;

        if code.contains("std::fs::") {
            violations.push(file.violation(&line, "Blocking file I/O"));
        }
        if code.contains("std::net::") {
            violations.push(file.violation(&line, "Blocking network I/O"));
        }
        if code.contains("std::process::Command") {
            violations.push(file.violation(&line, "Blocking process I/O"));
        }
        if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
            violations.push(file.violation(&line, "Blocking stdin/stdout in async"));
        }
    }

    violations
}

#[test]
fn test_detector_flags_std_fs_in_async_fn() {
    let file = SourceFile {
        path: "fake.rs".into(),
        text: "async fn load() {\n    let t = std::fs::read_to_string(p);\n}\n".to_string(),
    };
    let violations = blocking_io_violations(&file);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].line, 2);
}

#[test]
fn test_detector_allows_std_fs_in_sync_fn() {
    let file = SourceFile {
        path: "fake.rs".into(),
        text: "pub fn load_config_from_path() {\n    std::fs::read_to_string(p);\n}\n"
            .to_string(),
    };
    assert!(blocking_io_violations(&file).is_empty());
}

#[test]
fn test_production_tree_is_scanned() {
    let files = production_files();
    assert!(
        files.iter().any(|f| f.file_name() == "gateway.rs"),
        "gateway core sources not found"
    );
    assert!(
        files.iter().any(|f| f.file_name() == "server.rs"),
        "gateway daemon sources not found"
    );
}
