//! Integration Test: Error Handling Policy
//!
//! **Policy**:
//! - Production code propagates errors with `?`; no `.unwrap()` or `.expect()`
//! - `gateway-core` is a library and reports typed `thiserror` enums; `anyhow`
//!   belongs to the daemon binary only

use architectural_enforcement::{production_files, report, rust_files, workspace_root, Violation};

#[test]
fn test_no_unwrap_in_production_code() {
    let violations: Vec<Violation> = production_files()
        .iter()
        .flat_map(|file| {
            file.code_lines()
                .into_iter()
                .filter(|line| line.code.contains(".unwrap()") || line.code.contains(".expect("))
                .map(|line| file.violation(&line, "Panicking unwrap"))
                .collect::<Vec<_>>()
        })
        .collect();

    report(
        "unwrap()/expect() found in production code!",
        &violations,
        &[
            "Propagate with `?` and a typed error, or use unwrap_or / unwrap_or_default.",
            "unwrap() is fine in #[cfg(test)] modules and tests/.",
        ],
    );
}

#[test]
fn test_core_library_does_not_use_anyhow() {
    let violations: Vec<Violation> = rust_files("gateway/core/src")
        .iter()
        .flat_map(|file| {
            file.code_lines()
                .into_iter()
                .filter(|line| line.code.contains("anyhow"))
                .map(|line| file.violation(&line, "anyhow in library crate"))
                .collect::<Vec<_>>()
        })
        .collect();

    report(
        "anyhow used in gateway-core!",
        &violations,
        &["Use GatewayError, ConfigError or ProviderError instead."],
    );
}

#[test]
fn test_core_manifest_has_no_anyhow_dependency() {
    let manifest = std::fs::read_to_string(workspace_root().join("gateway/core/Cargo.toml"))
        .expect("gateway/core/Cargo.toml should be readable");

    let in_dependencies = manifest
        .split("[dev-dependencies]")
        .next()
        .unwrap_or_default();
    assert!(
        !in_dependencies
            .lines()
            .any(|l| l.trim_start().starts_with("anyhow")),
        "gateway-core must not depend on anyhow"
    );
}
