//! ncall - compile Rust snippets and call their exports
//!
//! Thin CLI over [`nativecall::Session`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nativecall::cache::{content_digest, CacheManager, PROJECTS_NAMESPACE};
use nativecall::project::{has_embedded_dependencies, parse_embedded_dependencies};
use nativecall::{CompiledUnit, DependencySpec, NativecallConfig, Session, SignatureExtractor};

#[derive(Parser)]
#[command(name = "ncall")]
#[command(version)]
#[command(about = "Compile Rust source on demand and call its exported functions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the exported signatures of a source file as JSON
    Signatures {
        /// Rust source file
        file: PathBuf,
    },

    /// Compile a source file into the cache
    Build {
        /// Rust source file
        file: PathBuf,

        /// Extra dependency, e.g. `serde=1.0+derive` (repeatable)
        #[arg(long = "dep", value_name = "SPEC")]
        deps: Vec<String>,
    },

    /// Compile a source file and call one of its functions
    Call {
        /// Rust source file
        file: PathBuf,

        /// Function to call
        function: String,

        /// Arguments, parsed by the declared parameter types
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Inspect or maintain the artifact cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show the cache location and size
    Info,

    /// List cached entries
    List,

    /// Remove old entries, then shrink to a size limit
    Prune {
        /// Maximum entry age in days (config default when omitted)
        #[arg(long)]
        days: Option<u64>,

        /// Size limit in megabytes (config default when omitted)
        #[arg(long = "max-mb")]
        max_mb: Option<u64>,
    },

    /// Remove every entry
    Clear,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = NativecallConfig::load_from_cwd().context("failed to load nativecall.toml")?;

    match cli.command {
        Commands::Signatures { file } => cmd_signatures(&config, &file),
        Commands::Build { file, deps } => cmd_build(&config, &file, &deps),
        Commands::Call {
            file,
            function,
            args,
        } => cmd_call(&config, &file, &function, &args),
        Commands::Cache { action } => cmd_cache(&config, action),
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn cmd_signatures(config: &NativecallConfig, file: &Path) -> Result<()> {
    let source = read_source(file)?;
    let extractor = SignatureExtractor::with_markers(config.exports.markers.iter().cloned());
    let items = extractor.extract_items(&source);

    let json = serde_json::json!({
        "functions": items.functions,
        "structs": items.structs,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Compile `source`, merging `extra` dependencies with any it embeds
fn compile(session: &Session, source: &str, extra: &[String]) -> Result<CompiledUnit> {
    if extra.is_empty() {
        return Ok(session.compile_auto(source)?);
    }

    let mut dependencies = if has_embedded_dependencies(source) {
        parse_embedded_dependencies(source).context("invalid embedded dependencies")?
    } else {
        Vec::new()
    };
    for text in extra {
        let spec =
            DependencySpec::parse(text).with_context(|| format!("invalid --dep `{}`", text))?;
        dependencies.retain(|d| d.name != spec.name);
        dependencies.push(spec);
    }

    let name = format!("nc_{}", &content_digest(source)[..12]);
    let mode = session.config().build_mode();
    Ok(session.compile_with_dependencies(&name, source, &dependencies, mode)?)
}

fn cmd_build(config: &NativecallConfig, file: &Path, deps: &[String]) -> Result<()> {
    let source = read_source(file)?;
    let session = Session::new(config.clone());
    let unit = compile(&session, &source, deps)
        .with_context(|| format!("failed to build {}", file.display()))?;

    println!(
        "{} {} ({})",
        if unit.from_cache { "cached" } else { "built" },
        unit.artifact.display(),
        unit.key.short()
    );
    for name in session.functions() {
        if let Some(sig) = session.signature(&name) {
            let params: Vec<String> = sig
                .params
                .iter()
                .map(|p| format!("{}: {}", p.name, p.ty))
                .collect();
            println!("  fn {}({}) -> {}", sig.name, params.join(", "), sig.return_type);
        }
    }
    Ok(())
}

fn cmd_call(config: &NativecallConfig, file: &Path, function: &str, args: &[String]) -> Result<()> {
    let source = read_source(file)?;
    let session = Session::new(config.clone());
    compile(&session, &source, &[])
        .with_context(|| format!("failed to build {}", file.display()))?;

    let value = session
        .call_with_strings(function, args)
        .with_context(|| format!("call to `{}` failed", function))?;
    println!("{}", value);
    Ok(())
}

fn cmd_cache(config: &NativecallConfig, action: CacheAction) -> Result<()> {
    let cache = CacheManager::new(config.cache_root());

    match action {
        CacheAction::Info => {
            let projects = cache.namespace(PROJECTS_NAMESPACE).entries().len();
            let entries = cache.entries().len();
            println!("root:     {}", cache.root().display());
            println!("entries:  {} ({} project)", entries, projects);
            println!("size:     {:.2} MiB", cache.size_bytes() as f64 / (1024.0 * 1024.0));
            println!("max age:  {} days", config.cache.max_age_days);
        }
        CacheAction::List => {
            let mut entries = cache.entries();
            entries.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));
            for entry in entries {
                println!(
                    "{}  {}  {}  [{}]",
                    entry.key.short(),
                    entry.metadata.created_at,
                    entry.metadata.compiler_config,
                    entry.metadata.functions.join(", ")
                );
            }
        }
        CacheAction::Prune { days, max_mb } => {
            let max_age = match days {
                Some(days) => Duration::from_secs(days * 24 * 60 * 60),
                None => config.cache.max_age(),
            };
            let mut removed = cache.prune(max_age);

            let limit = max_mb
                .map(|mb| mb * 1024 * 1024)
                .or_else(|| config.cache.max_size_bytes());
            if let Some(limit) = limit {
                removed += cache.prune_to_size(limit);
            }
            println!("removed {} entr{}", removed, if removed == 1 { "y" } else { "ies" });
        }
        CacheAction::Clear => {
            cache.clear();
            println!("cleared {}", cache.root().display());
        }
    }
    Ok(())
}
