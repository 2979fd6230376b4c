//! External toolchain invocation

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{BuildMode, BuildUnit, CompileFailure};
use crate::config::ToolchainSettings;
use crate::error::{Error, Result};
use crate::ffi::library_filename;
use crate::project::ProjectDescriptor;

/// Cargo messages that mean a dependency could not be fetched or resolved
static DEPENDENCY_FAILURES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"no matching package named `([^`]+)` found",
        r"failed to get `([^`]+)` as a dependency",
        r"failed to select a version for the requirement `([^`\s=]+)",
        r"failed to load source for dependency `([^`]+)`",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid dependency pattern"))
    .collect()
});

/// Result of a single-file build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub artifact: PathBuf,
    pub ir: Option<PathBuf>,
    /// Warnings printed by a successful build
    pub warnings: String,
}

/// Handle to `rustc` and `cargo`
#[derive(Debug)]
pub struct Toolchain {
    rustc: String,
    cargo: String,
    emit_ir: bool,
    invocations: AtomicUsize,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::new("rustc", "cargo")
    }
}

impl Toolchain {
    pub fn new(rustc: impl Into<String>, cargo: impl Into<String>) -> Self {
        Self {
            rustc: rustc.into(),
            cargo: cargo.into(),
            emit_ir: false,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn from_settings(settings: &ToolchainSettings) -> Self {
        Self::new(settings.rustc.clone(), settings.cargo.clone())
    }

    /// Also write LLVM IR next to single-file artifacts
    pub fn with_emit_ir(mut self, emit_ir: bool) -> Self {
        self.emit_ir = emit_ir;
        self
    }

    /// Number of toolchain processes started so far
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn resolve(&self, program: &str) -> Result<PathBuf> {
        which::which(program).map_err(|e| Error::Spawn {
            program: program.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, e.to_string()),
        })
    }

    fn run(&self, program: &str, mut cmd: Command) -> Result<Output> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        debug!("running {}", render_command(&cmd));
        cmd.output().map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })
    }

    /// Arguments for `rustc`, plus where the artifact and IR will land
    pub fn rustc_args(
        &self,
        unit: &BuildUnit,
        source_path: &Path,
        out_dir: &Path,
    ) -> (Vec<OsString>, PathBuf, Option<PathBuf>) {
        let crate_name = unit.crate_name();
        let artifact = out_dir.join(library_filename(&crate_name));
        let ir = self
            .emit_ir
            .then(|| out_dir.join(format!("{}.ll", crate_name)));

        let config = &unit.config;
        let mut args: Vec<OsString> = vec![
            "--crate-type".into(),
            "cdylib".into(),
            "--crate-name".into(),
            crate_name.into(),
            "--edition".into(),
            config.edition.clone().into(),
            "-C".into(),
            format!("opt-level={}", config.opt_level).into(),
            "-C".into(),
            format!("debuginfo={}", if config.debug_info { 2 } else { 0 }).into(),
        ];
        if let Some(target) = &config.target_triple {
            args.push("--target".into());
            args.push(target.into());
        }
        args.push("--color".into());
        args.push("never".into());

        let mut emit = OsString::from("--emit=link=");
        emit.push(&artifact);
        if let Some(ir) = &ir {
            emit.push(",llvm-ir=");
            emit.push(ir);
        }
        args.push(emit);
        args.push(source_path.into());

        (args, artifact, ir)
    }

    /// Compile one source file into a cdylib inside `out_dir`
    pub fn compile_single_file(&self, unit: &BuildUnit, out_dir: &Path) -> Result<BuildOutput> {
        let program = self.resolve(&self.rustc)?;
        let source_path = out_dir.join(format!("{}.rs", unit.crate_name()));
        fs::write(&source_path, &unit.source)?;

        let (args, artifact, ir) = self.rustc_args(unit, &source_path, out_dir);
        let mut cmd = Command::new(&program);
        cmd.args(&args).current_dir(out_dir);
        let command = render_command(&cmd);

        let output = self.run(&self.rustc, cmd)?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let failure = CompileFailure::new(
                format!("rustc exited with {}", output.status),
                stderr,
                String::from_utf8_lossy(&output.stdout),
                unit.source.clone(),
                command,
            )
            .with_context("crate", unit.crate_name())
            .with_context("target", unit.config.target())
            .with_context("opt_level", unit.config.opt_level.to_string());
            return Err(failure.into());
        }

        if !artifact.exists() {
            return Err(Error::ArtifactMissing { path: artifact });
        }
        info!("compiled {}", artifact.display());

        Ok(BuildOutput {
            artifact,
            ir: ir.filter(|p| p.exists()),
            warnings: stderr,
        })
    }

    /// Run `cargo build` in a materialized project and return its cdylib
    pub fn compile_project(&self, project: &ProjectDescriptor, mode: BuildMode) -> Result<PathBuf> {
        let program = self.resolve(&self.cargo)?;
        let target_dir = project.root.join("target");

        let mut cmd = Command::new(&program);
        cmd.arg("build");
        if mode == BuildMode::Release {
            cmd.arg("--release");
        }
        cmd.arg("--target-dir")
            .arg(&target_dir)
            .current_dir(&project.root)
            .env("CARGO_TERM_COLOR", "never");
        let command = render_command(&cmd);

        let output = self.run(&self.cargo, cmd)?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            if let Some(dependency) = failed_dependency(&stderr) {
                return Err(Error::DependencyResolution {
                    dependency,
                    message: stderr,
                });
            }
            let source = fs::read_to_string(project.source_path()).unwrap_or_default();
            let failure = CompileFailure::new(
                format!("cargo build exited with {}", output.status),
                stderr,
                String::from_utf8_lossy(&output.stdout),
                source,
                command,
            )
            .with_context("project", project.name.clone())
            .with_context("mode", mode.to_string());
            return Err(failure.into());
        }

        let artifact = target_dir
            .join(mode.dir_name())
            .join(library_filename(&project.lib_name()));
        if !artifact.exists() {
            return Err(Error::ArtifactMissing { path: artifact });
        }
        info!("built project {} ({})", project.name, mode);
        Ok(artifact)
    }
}

/// Name of the dependency cargo could not resolve, if that is why it failed
pub(crate) fn failed_dependency(stderr: &str) -> Option<String> {
    DEPENDENCY_FAILURES
        .iter()
        .find_map(|re| re.captures(stderr))
        .map(|caps| caps[1].to_string())
}

fn render_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}
