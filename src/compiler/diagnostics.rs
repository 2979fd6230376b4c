//! Structured compile failures

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static ARROW_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-->\s*(\S+?):(\d+):(\d+)").expect("valid location pattern"));
static BARE_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":(\d+):(\d+)").expect("valid location pattern"));
static ERROR_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^error(\[E\d+\])?:").expect("valid header pattern"));

/// Where the toolchain says the first problem is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    /// 1-based
    pub line: usize,
    /// 1-based
    pub column: usize,
}

impl SourceLocation {
    /// First `--> file:line:col` after the first `error` header, else the
    /// first one anywhere, else any `:line:col`
    ///
    /// Warnings printed ahead of the error do not supply the location.
    pub fn find(diagnostics: &str) -> Option<Self> {
        let error_at = ERROR_HEADER.find(diagnostics).map_or(0, |m| m.start());
        let arrow = ARROW_LOCATION
            .captures(&diagnostics[error_at..])
            .or_else(|| ARROW_LOCATION.captures(diagnostics));
        if let Some(caps) = arrow {
            return Some(SourceLocation {
                file: Some(caps[1].to_string()),
                line: caps[2].parse().ok()?,
                column: caps[3].parse().ok()?,
            });
        }
        let caps = BARE_LOCATION.captures(diagnostics)?;
        Some(SourceLocation {
            file: None,
            line: caps[1].parse().ok()?,
            column: caps[2].parse().ok()?,
        })
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "line {}, column {}", self.line, self.column),
        }
    }
}

/// Diagnostic substrings and the hint each one earns
const HINTS: &[(&[&str], &str)] = &[
    (
        &[
            "unclosed delimiter",
            "unexpected closing delimiter",
            "mismatched closing delimiter",
        ],
        "unbalanced delimiter: check that every opening brace, bracket and parenthesis is closed",
    ),
    (
        &["mismatched types"],
        "mismatched types: exported functions must return exactly their declared type",
    ),
    (
        &[
            "unresolved import",
            "can't find crate",
            "use of undeclared crate",
            "use of unresolved module",
        ],
        "missing crate: declare it in a `// cargo-deps:` line or a `//! ```cargo` block",
    ),
    (
        &["cannot find value", "cannot find function", "cannot find type"],
        "unknown name: check spelling and `use` declarations",
    ),
    (
        &["expected one of"],
        "syntax error: look just before the reported location",
    ),
];

/// A build the toolchain rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileFailure {
    pub message: String,
    /// Captured standard error
    pub diagnostics: String,
    pub stdout: String,
    /// The source text that was compiled
    pub source: String,
    pub command: String,
    pub location: Option<SourceLocation>,
    pub context: BTreeMap<String, String>,
}

impl CompileFailure {
    pub fn new(
        message: impl Into<String>,
        diagnostics: impl Into<String>,
        stdout: impl Into<String>,
        source: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        let diagnostics = diagnostics.into();
        Self {
            message: message.into(),
            location: SourceLocation::find(&diagnostics),
            diagnostics,
            stdout: stdout.into(),
            source: source.into(),
            command: command.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    pub fn line(&self) -> Option<usize> {
        self.location.as_ref().map(|l| l.line)
    }

    /// Hints matched from the diagnostics, most specific first
    pub fn hints(&self) -> Vec<&'static str> {
        HINTS
            .iter()
            .filter(|(needles, _)| needles.iter().any(|n| self.diagnostics.contains(n)))
            .map(|(_, hint)| *hint)
            .collect()
    }

    /// Numbered source lines around the failure; the failing line is marked `>`
    pub fn source_context(&self, radius: usize) -> Option<String> {
        let line = self.line()?;
        let lines: Vec<&str> = self.source.lines().collect();
        if line == 0 || line > lines.len() {
            return None;
        }

        let first = line.saturating_sub(radius).max(1);
        let last = (line + radius).min(lines.len());
        let width = last.to_string().len();

        let mut out = String::new();
        for n in first..=last {
            let marker = if n == line { '>' } else { ' ' };
            out.push_str(&format!("{} {:>width$} | {}\n", marker, n, lines[n - 1], width = width));
        }
        Some(out)
    }

    /// Context map as `key=value` lines
    pub fn render_context(&self) -> String {
        self.context
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full human-readable report
    pub fn render(&self) -> String {
        let mut out = self.to_string();
        out.push('\n');
        if let Some(context) = self.source_context(2) {
            out.push('\n');
            out.push_str(&context);
        }
        if !self.diagnostics.trim().is_empty() {
            out.push('\n');
            out.push_str(self.diagnostics.trim_end());
            out.push('\n');
        }
        for hint in self.hints() {
            out.push_str("hint: ");
            out.push_str(hint);
            out.push('\n');
        }
        out.push_str("command: ");
        out.push_str(&self.command);
        out.push('\n');
        out
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compilation failed: {}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    const UNCLOSED: &str = "error: this file contains an unclosed delimiter\n --> /tmp/nc/lib.rs:4:3\n  |\n1 | fn f() {\n  |        - unclosed delimiter\n";

    fn failure(diagnostics: &str) -> CompileFailure {
        CompileFailure::new(
            "rustc exited with status 1",
            diagnostics,
            "",
            "fn f() {\n    let x = 1;\n    x\n  \n",
            "rustc lib.rs",
        )
    }

    #[test]
    fn test_location_from_arrow() {
        let f = failure(UNCLOSED);
        let loc = f.location().unwrap();
        assert_eq!(loc.file.as_deref(), Some("/tmp/nc/lib.rs"));
        assert_eq!((loc.line, loc.column), (4, 3));
    }

    #[test]
    fn test_location_skips_leading_warnings() {
        let diagnostics = "\
warning: unused variable: `x`
 --> /tmp/nc/lib.rs:2:9
  |
2 |     let x = 1;
  |         ^ help: if this is intentional, prefix it with an underscore: `_x`

error[E0308]: mismatched types
 --> /tmp/nc/lib.rs:7:5
  |
7 |     \"text\"
  |     ^^^^^^ expected `i32`, found `&str`
";
        let loc = SourceLocation::find(diagnostics).unwrap();
        assert_eq!((loc.line, loc.column), (7, 5));

        let only_warning =
            "warning: unused\n --> lib.rs:3:1\nerror: aborting due to 1 previous error\n";
        assert_eq!(SourceLocation::find(only_warning).unwrap().line, 3);
    }

    #[test]
    fn test_location_bare_fallback() {
        let loc = SourceLocation::find("lib.rs:12:5: something odd").unwrap();
        assert_eq!(loc.file, None);
        assert_eq!(loc.line, 12);
        assert!(SourceLocation::find("no location here").is_none());
    }

    #[test]
    fn test_delimiter_hint() {
        let hints = failure(UNCLOSED).hints();
        assert_eq!(hints.len(), 1);
        assert!(hints[0].starts_with("unbalanced delimiter"));
        assert!(failure("error: linking failed").hints().is_empty());
    }

    #[test]
    fn test_source_context_marks_line() {
        let f = failure(UNCLOSED);
        let context = f.source_context(1).unwrap();
        assert_eq!(context.lines().count(), 2);
        assert!(context.lines().any(|l| l.starts_with("> 4 |")));
    }

    #[test]
    fn test_render_and_display() {
        let f = failure(UNCLOSED).with_context("crate", "nc_abc");
        assert!(f.to_string().contains("at /tmp/nc/lib.rs:4:3"));
        let report = f.render();
        assert!(report.contains("hint: unbalanced delimiter"));
        assert!(report.contains("command: rustc lib.rs"));
        assert_eq!(f.render_context(), "crate=nc_abc");
    }
}
