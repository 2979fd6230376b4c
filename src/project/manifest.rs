//! Generated Cargo.toml

use std::collections::BTreeMap;

use serde::Serialize;

use super::builder::ProjectDescriptor;
use super::dependency::DependencySpec;
use super::ProjectError;

#[derive(Debug, Serialize)]
struct CargoManifest<'a> {
    package: Package<'a>,
    lib: Lib,
    dependencies: BTreeMap<&'a str, DependencyEntry<'a>>,
    profile: Profile,
}

#[derive(Debug, Serialize)]
struct Package<'a> {
    name: &'a str,
    version: &'a str,
    edition: &'a str,
}

#[derive(Debug, Serialize)]
struct Lib {
    #[serde(rename = "crate-type")]
    crate_type: Vec<&'static str>,
    path: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum DependencyEntry<'a> {
    Simple(&'a str),
    Detailed(DetailedDependency<'a>),
}

#[derive(Debug, Default, Serialize)]
struct DetailedDependency<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    git: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    features: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct Profile {
    release: ReleaseProfile,
}

#[derive(Debug, Serialize)]
struct ReleaseProfile {
    #[serde(rename = "opt-level")]
    opt_level: u8,
    lto: bool,
}

/// Source priority: git, then path, then version, then any version
fn entry(dep: &DependencySpec) -> DependencyEntry<'_> {
    let features: Vec<&str> = dep.features.iter().map(String::as_str).collect();

    let mut detailed = DetailedDependency {
        features,
        ..Default::default()
    };
    if let Some(git) = &dep.git {
        detailed.git = Some(git);
    } else if let Some(path) = &dep.path {
        detailed.path = Some(path);
    } else {
        let version = dep.version.as_deref().unwrap_or("*");
        if detailed.features.is_empty() {
            return DependencyEntry::Simple(version);
        }
        detailed.version = Some(version);
    }
    DependencyEntry::Detailed(detailed)
}

/// Render the manifest for a project
pub fn render_manifest(project: &ProjectDescriptor) -> Result<String, ProjectError> {
    let manifest = CargoManifest {
        package: Package {
            name: &project.name,
            version: &project.version,
            edition: &project.edition,
        },
        lib: Lib {
            crate_type: vec!["cdylib"],
            path: "src/lib.rs",
        },
        dependencies: project
            .dependencies
            .iter()
            .map(|d| (d.name.as_str(), entry(d)))
            .collect(),
        profile: Profile {
            release: ReleaseProfile {
                opt_level: 3,
                lto: true,
            },
        },
    };
    Ok(toml::to_string(&manifest)?)
}
