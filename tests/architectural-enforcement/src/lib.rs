//! Architectural Enforcement Integration Tests
//!
//! Shared source scanning for the tests in `tests/`, which enforce:
//! - No blocking I/O inside async code
//! - No sleeping outside retry backoff and rate-limit waits
//! - No `unwrap()`/`expect()` in production code
//! - Library crates report errors with typed enums, not `anyhow`
//!
//! The scan is line based. Everything from the first `#[cfg(test)]` onward
//! is treated as test code and skipped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees checked by every rule, relative to the workspace root
pub const PRODUCTION_DIRS: [&str; 2] = ["gateway/core/src", "gateway/daemon/src"];

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File, relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub rule: &'static str,
    /// The trimmed source line
    pub source: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.source
        )
    }
}

/// Kind of function a line sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnContext {
    /// Inside `async fn`
    Async,
    /// Inside a plain `fn`
    Sync,
    /// Not inside any function seen so far
    None,
}

/// A production line with comments stripped
#[derive(Debug, Clone)]
pub struct CodeLine<'a> {
    /// 1-based line number
    pub number: usize,
    /// Code before any `//` comment
    pub code: &'a str,
    /// Original line, trimmed
    pub source: &'a str,
    /// Innermost enclosing function kind
    pub context: FnContext,
    /// Name of the innermost enclosing function, if any
    pub function: Option<&'a str>,
}

/// A loaded source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Full file text
    pub text: String,
}

impl SourceFile {
    /// File name, e.g. `gateway.rs`
    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }

    /// Production lines: comments stripped, test module excluded
    pub fn code_lines(&self) -> Vec<CodeLine<'_>> {
        let mut out = Vec::new();
        let mut context = FnContext::None;
        let mut function = None;

        for (idx, raw) in self.text.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.starts_with("#[cfg(test)]") {
                break;
            }
            if trimmed.starts_with("//") {
                continue;
            }

            let code = strip_comment(raw);
            if let Some((is_async, name)) = fn_header(code) {
                context = if is_async { FnContext::Async } else { FnContext::Sync };
                function = Some(name);
            }

            out.push(CodeLine {
                number: idx + 1,
                code,
                source: trimmed,
                context,
                function,
            });
        }
        out
    }

    /// Record a violation for `line`
    pub fn violation(&self, line: &CodeLine<'_>, rule: &'static str) -> Violation {
        Violation {
            path: self.path.clone(),
            line: line.number,
            rule,
            source: line.source.to_string(),
        }
    }
}

/// Code before a `//` comment, ignoring `//` inside string literals
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut prev = '\0';
    for (i, c) in line.char_indices() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '/' if !in_string && prev == '/' => return &line[..i - 1],
            _ => {}
        }
        prev = c;
    }
    line
}

/// `(is_async, name)` when the line opens a function
fn fn_header(code: &str) -> Option<(bool, &str)> {
    let idx = code.find("fn ")?;
    // Must be a keyword, not the tail of an identifier
    if idx > 0 && !code[..idx].ends_with(' ') && !code[..idx].ends_with('(') {
        return None;
    }
    let prefix = &code[..idx];
    if prefix.contains('"') || prefix.contains('=') || prefix.contains('|') {
        return None;
    }
    let rest = &code[idx + 3..];
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some((prefix.contains("async"), &rest[..end]))
}

/// Every `.rs` file under `dir` (relative to the workspace root)
pub fn rust_files(dir: &str) -> Vec<SourceFile> {
    let root = workspace_root();
    let base = root.join(dir);
    if !base.exists() {
        return Vec::new();
    }

    let mut files: Vec<SourceFile> = walkdir::WalkDir::new(&base)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|e| {
            let text = fs::read_to_string(e.path()).ok()?;
            let path = e
                .path()
                .strip_prefix(&root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| e.path().to_path_buf());
            Some(SourceFile { path, text })
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Every production source file
pub fn production_files() -> Vec<SourceFile> {
    PRODUCTION_DIRS.iter().flat_map(|d| rust_files(d)).collect()
}

/// Print violations and fail the test
///
/// # Panics
///
/// Always, when `violations` is non-empty.
pub fn report(title: &str, violations: &[Violation], guidance: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    if !guidance.is_empty() {
        eprintln!();
        for line in guidance {
            eprintln!("  {line}");
        }
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(text: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from("x.rs"),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_fn_context_tracking() {
        let src = file(
            "pub async fn load() {\n    read();\n}\n\nfn parse() {\n    go();\n}\n",
        );
        let lines = src.code_lines();
        assert_eq!(lines[1].context, FnContext::Async);
        assert_eq!(lines[1].function, Some("load"));
        assert_eq!(lines[5].context, FnContext::Sync);
        assert_eq!(lines[5].function, Some("parse"));
    }

    #[test]
    fn test_test_module_is_skipped() {
        let src = file("fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n");
        assert_eq!(src.code_lines().len(), 1);
    }

    #[test]
    fn test_comment_stripping() {
        assert_eq!(strip_comment("let a = 1; // note"), "let a = 1; ");
        assert_eq!(strip_comment(r#"let u = "http://x";"#), r#"let u = "http://x";"#);
    }

    #[test]
    fn test_fn_header_ignores_identifiers() {
        assert_eq!(fn_header("pub(crate) async fn go(x: u8)"), Some((true, "go")));
        assert_eq!(fn_header("let f = move |x| x;"), None);
        assert_eq!(fn_header("    .map(Self::from_fn)"), None);
        assert_eq!(fn_header("impl Fn(&str) -> bool"), None);
    }

    #[test]
    fn test_workspace_root_holds_gateway() {
        assert!(workspace_root().join("gateway/core/src/lib.rs").exists());
    }
}
