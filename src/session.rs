//! Session
//!
//! The context object tying the pipeline together:
//!
//! ```text
//! source ─► extract signatures ─► cache key ─► lookup ──hit──┐
//!                                                │ miss      │
//!                                                ▼           │
//!                                   lower ─► toolchain ─► store
//!                                                            │
//!                                                            ▼
//!                                     load ─► dispatch table ─► call
//! ```
//!
//! Builds of the same key inside one process are serialized; across
//! processes the cache's atomic renames make the last writer win.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::cache::{
    content_digest, project_inputs, CacheEntry, CacheKey, CacheManager, CacheMetadata,
    PROJECTS_NAMESPACE,
};
use crate::compiler::{
    helper_signatures, lower_exports, ownership_helpers, BuildConfig, BuildMode, BuildUnit,
    Toolchain, HOST_TARGET,
};
use crate::config::NativecallConfig;
use crate::error::{Error, Result};
use crate::ffi::{DispatchTable, FunctionDescriptor, LibraryHandle, LibraryRegistry};
use crate::project::{
    create_project, has_embedded_dependencies, parse_embedded_dependencies, DependencySpec,
};
use crate::signature::{ExtractedItems, FunctionSignature, SignatureExtractor, StructSignature};
use crate::types::Value;

/// A compiled and loaded source
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub key: CacheKey,
    /// Cached artifact the library was loaded from
    pub artifact: PathBuf,
    pub library: LibraryHandle,
    pub functions: Vec<FunctionSignature>,
    pub structs: Vec<StructSignature>,
    /// Served from the cache without invoking the toolchain
    pub from_cache: bool,
}

impl CompiledUnit {
    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Toolchain processes started
    pub builds: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub loaded_libraries: usize,
    /// Callable functions in the dispatch table
    pub functions: usize,
}

pub struct Session {
    config: NativecallConfig,
    extractor: SignatureExtractor,
    cache: CacheManager,
    toolchain: Toolchain,
    registry: RwLock<LibraryRegistry>,
    dispatch: RwLock<DispatchTable>,
    /// Declared signatures per loaded library id
    signatures: RwLock<HashMap<u64, Vec<FunctionSignature>>>,
    build_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(NativecallConfig::default())
    }
}

impl Session {
    pub fn new(config: NativecallConfig) -> Self {
        let cache = CacheManager::new(config.cache_root());
        let toolchain = Toolchain::from_settings(&config.toolchain).with_emit_ir(config.build.emit_ir);
        let extractor = SignatureExtractor::with_markers(config.exports.markers.iter().cloned());
        debug!("session cache at {}", cache.root().display());

        Self {
            config,
            extractor,
            cache,
            toolchain,
            registry: RwLock::new(LibraryRegistry::new()),
            dispatch: RwLock::new(DispatchTable::new()),
            signatures: RwLock::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &NativecallConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    // =========================================================================
    // Compilation
    // =========================================================================

    /// Compile a single source file, load it and register its exports
    pub fn compile(&self, source: &str) -> Result<CompiledUnit> {
        let items = self.exported_items(source);
        let unit = BuildUnit::new(source, self.config.build_config());
        let key = CacheKey::for_unit(&unit);

        let (artifact, from_cache) =
            self.cached_or_build(&self.cache, &key, || self.build_single(&unit, &key, &items))?;
        self.register(key, artifact, items, from_cache)
    }

    /// Compile as a cargo project with `dependencies`
    pub fn compile_with_dependencies(
        &self,
        name: &str,
        source: &str,
        dependencies: &[DependencySpec],
        mode: BuildMode,
    ) -> Result<CompiledUnit> {
        let items = self.exported_items(source);
        let projects = self.cache.namespace(PROJECTS_NAMESPACE);
        let config = self.config.build_config();
        let key = CacheKey::for_project(source, dependencies, mode, &config);

        let (artifact, from_cache) = self.cached_or_build(&projects, &key, || {
            self.build_project(&projects, &key, name, source, dependencies, mode, &config, &items)
        })?;
        self.register(key, artifact, items, from_cache)
    }

    /// Project mode when the source declares its own dependencies
    pub fn compile_auto(&self, source: &str) -> Result<CompiledUnit> {
        if !has_embedded_dependencies(source) {
            return self.compile(source);
        }
        let dependencies = parse_embedded_dependencies(source)?;
        let name = format!("nc_{}", &content_digest(source)[..12]);
        self.compile_with_dependencies(&name, source, &dependencies, self.config.build_mode())
    }

    fn cached_or_build(
        &self,
        cache: &CacheManager,
        key: &CacheKey,
        build: impl FnOnce() -> Result<PathBuf>,
    ) -> Result<(PathBuf, bool)> {
        if let Some(artifact) = cache.lookup(key) {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            return Ok((artifact, true));
        }

        let lock = self.build_lock(key);
        let result = {
            let _guard = lock.lock();

            // another thread may have finished the same build while we waited
            if let Some(artifact) = cache.lookup(key) {
                self.cache_hits.fetch_add(1, Ordering::SeqCst);
                Ok((artifact, true))
            } else {
                self.cache_misses.fetch_add(1, Ordering::SeqCst);
                info!("building {}", key.short());
                build().map(|artifact| (artifact, false))
            }
        };
        self.release_build_lock(key, lock);
        result
    }

    fn build_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.build_locks
            .lock()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Drop `key`'s lock from the map once no other thread holds or waits on it
    fn release_build_lock(&self, key: &CacheKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.build_locks.lock();
        drop(lock);
        if locks.get(key).map_or(false, |l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    /// Marked items plus the ownership helpers when they are enabled
    fn exported_items(&self, source: &str) -> ExtractedItems {
        let mut items = self.extractor.extract_items(source);
        if self.config.exports.ownership_helpers {
            items.functions.extend(helper_signatures());
        }
        items
    }

    fn lower(&self, source: &str, config: &BuildConfig) -> String {
        let mut lowered = match lower_exports(source, &config.markers, &config.edition) {
            Ok(lowered) => {
                debug!("lowered {} export(s)", lowered.exports);
                lowered.source
            }
            Err(e) => {
                debug!("compiling source as written, lowering failed: {}", e);
                source.to_string()
            }
        };
        if config.ownership_helpers {
            lowered.push_str(&ownership_helpers(&config.edition));
        }
        lowered
    }

    fn build_single(
        &self,
        unit: &BuildUnit,
        key: &CacheKey,
        items: &ExtractedItems,
    ) -> Result<PathBuf> {
        let scratch = tempfile::Builder::new()
            .prefix("nativecall-build-")
            .tempdir()?;
        let lowered = BuildUnit::new(self.lower(&unit.source, &unit.config), unit.config.clone());

        let output = match self.toolchain.compile_single_file(&lowered, scratch.path()) {
            Ok(output) => output,
            Err(Error::Compile(mut failure)) => {
                // report against the text the caller wrote
                failure.source = unit.source.clone();
                return Err(Error::Compile(failure));
            }
            Err(e) => return Err(e),
        };
        if !output.warnings.trim().is_empty() {
            debug!("rustc warnings for {}:\n{}", key.short(), output.warnings);
        }

        let metadata = CacheMetadata::new(
            key,
            &content_digest(&unit.source),
            unit.config.canonical(),
            unit.config.target(),
        )
        .with_functions(items.function_names());
        let entry = self.cache.store(key, &output.artifact, &metadata)?;
        if let Some(ir) = &output.ir {
            self.cache.store_ir(key, ir)?;
        }
        Ok(entry.artifact_path)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_project(
        &self,
        projects: &CacheManager,
        key: &CacheKey,
        name: &str,
        source: &str,
        dependencies: &[DependencySpec],
        mode: BuildMode,
        config: &BuildConfig,
        items: &ExtractedItems,
    ) -> Result<PathBuf> {
        let project = create_project(name, dependencies, &config.edition, None)?;

        let result = (|| -> Result<CacheEntry> {
            project.write_manifest()?;
            project.write_source(&self.lower(source, config))?;
            let artifact = self.toolchain.compile_project(&project, mode)?;

            let metadata = CacheMetadata::new(
                key,
                &content_digest(source),
                project_inputs(dependencies, mode, config),
                HOST_TARGET,
            )
            .with_functions(items.function_names());
            Ok(projects.store(key, &artifact, &metadata)?)
        })();

        if let Err(e) = project.cleanup() {
            warn!("project {} left behind: {}", project.root.display(), e);
        }
        Ok(result?.artifact_path)
    }

    fn register(
        &self,
        key: CacheKey,
        artifact: PathBuf,
        items: ExtractedItems,
        from_cache: bool,
    ) -> Result<CompiledUnit> {
        let library = {
            let mut registry = self.registry.write();
            let handle = registry.load(&artifact)?;
            self.dispatch
                .write()
                .register_library(&registry, &handle, &items.functions)?;
            self.signatures
                .write()
                .insert(handle.id(), items.functions.clone());
            handle
        };

        Ok(CompiledUnit {
            key,
            artifact,
            library,
            functions: items.functions,
            structs: items.structs,
            from_cache,
        })
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call a registered function
    ///
    /// The registry stays read-locked for the whole native call, so a
    /// concurrent `unload` waits for it to return.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let registry = self.registry.read();
        let dispatch = self.dispatch.read();
        dispatch.call(&registry, name, args)
    }

    /// Parse textual arguments by the declared parameter types, then call
    pub fn call_with_strings(&self, name: &str, args: &[String]) -> Result<Value> {
        let descriptor = self.descriptor(name)?;
        if descriptor.arity() != args.len() {
            return Err(Error::ArityMismatch {
                function: name.to_string(),
                expected: descriptor.arity(),
                got: args.len(),
            });
        }
        let values = descriptor
            .params
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (ty, text))| {
                Value::parse(text, *ty).map_err(|reason| Error::ArgumentType {
                    function: name.to_string(),
                    index,
                    expected: ty.to_string(),
                    got: reason,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.call(name, &values)
    }

    /// Dispatch descriptor for a callable function
    pub fn descriptor(&self, name: &str) -> Result<FunctionDescriptor> {
        let dispatch = self.dispatch.read();
        match dispatch.get(name) {
            Some(descriptor) => Ok(descriptor.clone()),
            None => Err(match dispatch.rejected(name) {
                Some(reason) => Error::UnsupportedSignature {
                    function: name.to_string(),
                    reason: reason.to_string(),
                },
                None => Error::FunctionNotFound(name.to_string()),
            }),
        }
    }

    /// Declared signature of a registered function, as exported by the
    /// library currently answering to `name`
    pub fn signature(&self, name: &str) -> Option<FunctionSignature> {
        let library = self.dispatch.read().owner(name)?;
        self.signatures
            .read()
            .get(&library)?
            .iter()
            .find(|f| f.name == name)
            .cloned()
    }

    /// Callable function names, sorted
    pub fn functions(&self) -> Vec<String> {
        self.dispatch
            .read()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Unload a unit's library and forget its functions
    pub fn unload(&self, unit: CompiledUnit) -> Result<()> {
        let mut registry = self.registry.write();
        let mut dispatch = self.dispatch.write();

        let removed = dispatch.remove_library(unit.library.id());
        self.signatures.write().remove(&unit.library.id());
        debug!("unloading {} ({} function(s))", unit.key.short(), removed);
        registry.unload(unit.library)
    }

    /// Remove cache entries older than `max_age`
    pub fn prune(&self, max_age: Duration) -> usize {
        self.cache.prune(max_age)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            builds: self.toolchain.invocations(),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            cache_misses: self.cache_misses.load(Ordering::SeqCst),
            loaded_libraries: self.registry.read().len(),
            functions: self.dispatch.read().len(),
        }
    }
}
