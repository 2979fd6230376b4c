//! Dependency descriptors and their canonical form

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ProjectError;

/// One declared crate dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Kept sorted so feature order never matters
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub features: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl DependencySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            features: BTreeSet::new(),
            git: None,
            path: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.extend(features.into_iter().map(Into::into));
        self
    }

    pub fn with_git(mut self, url: impl Into<String>) -> Self {
        self.git = Some(url.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Parse `name[=version][+feature]...`
    ///
    /// ```text
    /// rand
    /// rand=0.8
    /// serde=1+derive+rc
    /// ```
    pub fn parse(text: &str) -> Result<Self, ProjectError> {
        let mut parts = text.trim().split('+');
        let head = parts.next().unwrap_or_default().trim();
        let (name, version) = match head.split_once('=') {
            Some((name, version)) => (name.trim(), Some(version.trim().trim_matches('"'))),
            None => (head, None),
        };

        let mut spec = DependencySpec::new(name);
        if let Some(version) = version.filter(|v| !v.is_empty()) {
            spec = spec.with_version(version);
        }
        spec = spec.with_features(parts.map(str::trim).filter(|f| !f.is_empty()));
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.name.trim().is_empty() {
            return Err(ProjectError::EmptyDependencyName);
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProjectError::InvalidDependency(self.name.clone()));
        }
        Ok(())
    }

    /// `name[:version][:[f1,f2]][:git=url][:path=p]`
    pub fn canonical(&self) -> String {
        let mut out = self.name.clone();
        if let Some(version) = &self.version {
            out.push(':');
            out.push_str(version);
        }
        if !self.features.is_empty() {
            let features: Vec<&str> = self.features.iter().map(String::as_str).collect();
            out.push_str(&format!(":[{}]", features.join(",")));
        }
        if let Some(git) = &self.git {
            out.push_str(":git=");
            out.push_str(git);
        }
        if let Some(path) = &self.path {
            out.push_str(":path=");
            out.push_str(path);
        }
        out
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Canonical string of a dependency set: sorted by name, joined with `|`
pub fn canonical_dependencies(dependencies: &[DependencySpec]) -> String {
    let mut canonical: Vec<(&str, String)> = dependencies
        .iter()
        .map(|d| (d.name.as_str(), d.canonical()))
        .collect();
    canonical.sort();
    canonical
        .into_iter()
        .map(|(_, c)| c)
        .collect::<Vec<_>>()
        .join("|")
}

/// Lowercase hex SHA-256 of [`canonical_dependencies`]
pub fn hash_dependencies(dependencies: &[DependencySpec]) -> String {
    hex::encode(Sha256::digest(canonical_dependencies(dependencies).as_bytes()))
}
