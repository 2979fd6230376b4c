//! Dependency declarations embedded in source text
//!
//! Two forms are recognised:
//!
//! ```text
//! //! ```cargo
//! //! [dependencies]
//! //! serde = { version = "1", features = ["derive"] }
//! //! ```
//!
//! // cargo-deps: itoa, rand=0.8
//! ```

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::dependency::DependencySpec;
use super::ProjectError;

const PRAGMA: &str = "// cargo-deps:";

static BLANK_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("valid blank-line pattern"));

#[derive(Debug, Default, Deserialize)]
struct EmbeddedManifest {
    #[serde(default)]
    dependencies: BTreeMap<String, EmbeddedDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddedDependency {
    Version(String),
    Detailed {
        version: Option<String>,
        #[serde(default)]
        features: Vec<String>,
        git: Option<String>,
        path: Option<String>,
    },
}

/// Body of a `//! ```cargo` fence, with the doc-comment prefix removed
fn doc_comment_body(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("//!")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Line classification used by both parsing and stripping
enum Line<'a> {
    Code(&'a str),
    FenceOpen,
    FenceBody(&'a str),
    FenceClose,
    Pragma(&'a str),
}

fn classify(source: &str) -> Vec<Line<'_>> {
    let mut in_fence = false;
    source
        .lines()
        .map(|line| {
            let body = doc_comment_body(line);
            if in_fence {
                match body {
                    Some(b) if b.trim() == "```" => {
                        in_fence = false;
                        Line::FenceClose
                    }
                    Some(b) => Line::FenceBody(b),
                    // an unterminated fence ends at the first non-doc line
                    None => {
                        in_fence = false;
                        Line::Code(line)
                    }
                }
            } else if body.map_or(false, |b| b.trim() == "```cargo") {
                in_fence = true;
                Line::FenceOpen
            } else if let Some(list) = line.trim_start().strip_prefix(PRAGMA) {
                Line::Pragma(list)
            } else {
                Line::Code(line)
            }
        })
        .collect()
}

/// Whether the source declares any dependencies
pub fn has_embedded_dependencies(source: &str) -> bool {
    classify(source)
        .iter()
        .any(|l| matches!(l, Line::FenceOpen | Line::Pragma(_)))
}

/// Read embedded declarations into dependency specs
pub fn parse_embedded_dependencies(source: &str) -> Result<Vec<DependencySpec>, ProjectError> {
    let mut toml_text = String::new();
    let mut deps = Vec::new();

    for line in classify(source) {
        match line {
            Line::FenceBody(body) => {
                toml_text.push_str(body);
                toml_text.push('\n');
            }
            Line::Pragma(list) => {
                for item in list.split(',').map(str::trim).filter(|i| !i.is_empty()) {
                    deps.push(DependencySpec::parse(item)?);
                }
            }
            _ => {}
        }
    }

    if !toml_text.trim().is_empty() {
        let manifest: EmbeddedManifest = toml::from_str(&toml_text)?;
        for (name, entry) in manifest.dependencies {
            let spec = match entry {
                EmbeddedDependency::Version(version) => DependencySpec::new(name).with_version(version),
                EmbeddedDependency::Detailed {
                    version,
                    features,
                    git,
                    path,
                } => DependencySpec {
                    name,
                    version,
                    features: features.into_iter().collect(),
                    git,
                    path,
                },
            };
            spec.validate()?;
            deps.push(spec);
        }
    }

    Ok(deps)
}

/// Remove embedded declarations, collapse runs of blank lines and trim
pub fn strip_embedded_dependencies(source: &str) -> String {
    let kept: Vec<&str> = classify(source)
        .into_iter()
        .filter_map(|line| match line {
            Line::Code(code) => Some(code),
            _ => None,
        })
        .collect();
    let joined = kept.join("\n");
    BLANK_RUNS.replace_all(&joined, "\n\n").trim().to_string()
}
