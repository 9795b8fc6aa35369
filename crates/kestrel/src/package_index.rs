// package_index.rs - Installed package discovery and function signature lookup
//
// Library roots are enumerated once per scan; each package's metadata
// (DESCRIPTION, NAMESPACE and the signatures of functions defined under R/)
// is loaded lazily on first use and then served immutably from a cache keyed
// by package name. Loading is idempotent, so concurrent first lookups may race
// without harm. A rescan keeps loaded metadata only for packages whose
// install directory and source files are unchanged, and every scan bumps a
// generation counter so results computed against the previous package set are
// never cached after it.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use indexmap::{IndexMap, IndexSet};
use lru::LruCache;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::config::PackagesConfig;
use crate::namespace_parser::{self, NamespaceDirectives};
use crate::perf::{self, TimingGuard};
use crate::signature::{extract_signatures, FunctionSignature};

/// Packages R attaches in a fresh session, in search-path order.
pub const DEFAULT_ATTACHED_PACKAGES: &[&str] = &[
    "base",
    "stats",
    "graphics",
    "grDevices",
    "utils",
    "datasets",
    "methods",
];

const DEFAULT_LOOKUP_CACHE_SIZE: usize = 512;

/// An installed package as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    /// Package directory. Empty for packages registered in memory.
    pub install_path: PathBuf,
}

/// Everything the index knows about one package once it has been loaded.
#[derive(Debug, Clone, Default)]
pub struct PackageMetadata {
    pub name: String,
    /// `Description` (or `Title`) from the DESCRIPTION file.
    pub description: Option<String>,
    pub depends: Vec<String>,
    /// Exported names, including exports with no known signature.
    pub exports: HashSet<String>,
    /// Functions defined by the package, exported or not.
    pub functions: IndexMap<String, FunctionSignature>,
}

impl PackageMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add an exported function.
    pub fn with_function(mut self, signature: FunctionSignature) -> Self {
        self.exports.insert(signature.name.clone());
        self.add_function(signature);
        self
    }

    fn add_function(&mut self, signature: FunctionSignature) {
        let signature = signature.with_package(self.name.clone());
        self.functions.insert(signature.name.clone(), signature);
    }

    pub fn is_exported(&self, name: &str) -> bool {
        self.exports.contains(name)
    }

    /// Signature of an exported function.
    pub fn exported_signature(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.get(name).filter(|_| self.is_exported(name))
    }
}

/// Newest modification time and total size of the files metadata is read
/// from. Two equal stamps mean the package was not reinstalled or edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceStamp {
    modified: SystemTime,
    bytes: u64,
    files: usize,
}

/// A loaded package together with where and when it was read.
#[derive(Debug)]
struct CachedMetadata {
    /// Empty for packages registered in memory.
    install_path: PathBuf,
    stamp: Option<SourceStamp>,
    metadata: Arc<PackageMetadata>,
}

impl CachedMetadata {
    fn is_registered(&self) -> bool {
        self.install_path.as_os_str().is_empty()
    }
}

/// Index of installed packages and the signatures of their functions.
pub struct PackageIndex {
    lib_paths: Vec<PathBuf>,
    /// Discovered packages in discovery order.
    packages: RwLock<IndexMap<String, PackageInfo>>,
    /// Loaded metadata, populated lazily.
    metadata: RwLock<HashMap<String, CachedMetadata>>,
    /// Memoised `lookup_signatures` results.
    lookups: Mutex<LruCache<String, Vec<FunctionSignature>>>,
    /// Bumped by every scan, while the metadata lock is held.
    generation: AtomicU64,
}

impl PackageIndex {
    pub fn new(lib_paths: Vec<PathBuf>) -> Self {
        Self::with_cache_size(lib_paths, DEFAULT_LOOKUP_CACHE_SIZE)
    }

    pub fn with_cache_size(lib_paths: Vec<PathBuf>, lookup_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(lookup_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            lib_paths,
            packages: RwLock::new(IndexMap::new()),
            metadata: RwLock::new(HashMap::new()),
            lookups: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
        }
    }

    /// An index with no library roots. Lookups only see registered packages.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Build an index from configuration. A disabled index has no roots.
    pub fn from_config(config: &PackagesConfig) -> Self {
        let lib_paths = if config.enabled {
            default_library_paths(config)
        } else {
            Vec::new()
        };
        Self::with_cache_size(lib_paths, config.lookup_cache_size)
    }

    pub fn lib_paths(&self) -> &[PathBuf] {
        &self.lib_paths
    }

    /// Enumerate the library roots, replacing the known package list.
    /// Returns the number of packages found. Missing or unreadable roots
    /// contribute nothing.
    pub async fn scan(&self) -> usize {
        let start = Instant::now();
        let paths = self.lib_paths.clone();
        let loaded: Vec<(String, PathBuf, Option<SourceStamp>)> = self
            .metadata
            .read()
            .await
            .iter()
            .filter(|(_, cached)| !cached.is_registered())
            .map(|(name, cached)| (name.clone(), cached.install_path.clone(), cached.stamp))
            .collect();
        let scanned = tokio::task::spawn_blocking(move || {
            let found = scan_library_paths(&paths);
            let unchanged = unchanged_packages(&found, &loaded);
            (found, unchanged)
        })
        .await;
        let (found, unchanged) = match scanned {
            Ok(scanned) => scanned,
            Err(e) => {
                log::warn!("Package scan task failed: {}", e);
                (IndexMap::new(), HashSet::new())
            }
        };
        let count = found.len();

        {
            let mut packages = self.packages.write().await;
            // In-memory registrations survive a rescan unless a real package
            // with the same name now exists on disk.
            let registered: Vec<PackageInfo> = packages
                .values()
                .filter(|info| info.install_path.as_os_str().is_empty())
                .filter(|info| !found.contains_key(&info.name))
                .cloned()
                .collect();
            *packages = found;
            for info in registered {
                packages.insert(info.name.clone(), info);
            }

            let mut metadata = self.metadata.write().await;
            let before = metadata.len();
            metadata.retain(|name, cached| {
                if cached.is_registered() {
                    packages
                        .get(name)
                        .is_some_and(|info| info.install_path.as_os_str().is_empty())
                } else {
                    unchanged.contains(name)
                }
            });
            log::trace!(
                "Rescan kept {} of {} loaded packages",
                metadata.len(),
                before
            );
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.clear_lookup_cache();

        perf::record_package_scan(start.elapsed(), count);
        log::trace!(
            "Scanned {} library paths, found {} packages",
            self.lib_paths.len(),
            count
        );
        count
    }

    /// Known package names in discovery order.
    pub async fn package_names(&self) -> Vec<String> {
        self.packages.read().await.keys().cloned().collect()
    }

    pub async fn package(&self, name: &str) -> Option<PackageInfo> {
        self.packages.read().await.get(name).cloned()
    }

    pub async fn package_count(&self) -> usize {
        self.packages.read().await.len()
    }

    /// Metadata for `name`, loading it from disk on first request.
    pub async fn get_metadata(&self, name: &str) -> Option<Arc<PackageMetadata>> {
        let generation = self.generation();
        if let Some(cached) = self.metadata.read().await.get(name) {
            log::trace!("Package '{}' metadata found in cache", name);
            return Some(Arc::clone(&cached.metadata));
        }

        let info = self.package(name).await?;
        log::trace!("Loading metadata for package '{}' from {:?}", name, info.install_path);

        let install_path = info.install_path.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            // Stamp first, so a write during loading shows up on the next scan.
            let stamp = source_stamp(&info.install_path);
            (stamp, load_metadata(&info))
        })
        .await;
        let (stamp, loaded) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                log::warn!("Metadata load for package '{}' failed: {}", name, e);
                (None, PackageMetadata::new(name))
            }
        };

        Some(
            self.cache_loaded(name, generation, install_path, stamp, loaded)
                .await,
        )
    }

    /// Insert freshly loaded metadata unless a scan ran since `generation`
    /// was read, in which case the result is returned without being cached.
    async fn cache_loaded(
        &self,
        name: &str,
        generation: u64,
        install_path: PathBuf,
        stamp: Option<SourceStamp>,
        loaded: PackageMetadata,
    ) -> Arc<PackageMetadata> {
        let mut metadata = self.metadata.write().await;
        if self.generation() != generation {
            log::trace!("Not caching '{}' metadata loaded before a rescan", name);
            return Arc::new(loaded);
        }
        let entry = metadata
            .entry(name.to_string())
            .or_insert_with(|| CachedMetadata {
                install_path,
                stamp,
                metadata: Arc::new(loaded),
            });
        Arc::clone(&entry.metadata)
    }

    /// Metadata already in the cache, without loading.
    pub async fn cached_metadata(&self, name: &str) -> Option<Arc<PackageMetadata>> {
        self.metadata
            .read()
            .await
            .get(name)
            .map(|cached| Arc::clone(&cached.metadata))
    }

    /// Register a package held in memory, replacing any loaded metadata for
    /// the same name.
    pub async fn register_package(&self, metadata: PackageMetadata) {
        let name = metadata.name.clone();
        {
            let mut packages = self.packages.write().await;
            packages.entry(name.clone()).or_insert_with(|| PackageInfo {
                name: name.clone(),
                install_path: PathBuf::new(),
            });
        }
        self.metadata.write().await.insert(
            name.clone(),
            CachedMetadata {
                install_path: PathBuf::new(),
                stamp: None,
                metadata: Arc::new(metadata),
            },
        );
        self.clear_lookup_cache();
        log::trace!("Registered package '{}'", name);
    }

    /// Candidate signatures for `function_name`, which may be qualified as
    /// `pkg::fun` or `pkg:::fun`. Unknown names yield an empty list.
    ///
    /// Unqualified names are searched in the default attached packages
    /// first, then in discovery order; only exported functions match.
    pub async fn lookup_signatures(&self, function_name: &str) -> Vec<FunctionSignature> {
        let generation = self.generation();
        if let Some(cached) = self.cached_signatures(function_name) {
            return cached;
        }

        let _guard = TimingGuard::with_threshold("package_index.lookup_signatures", 50);
        let signatures = match split_qualified(function_name) {
            Some((package, name, internal)) => self
                .get_metadata(package)
                .await
                .and_then(|meta| {
                    if internal {
                        meta.functions.get(name).cloned()
                    } else {
                        meta.exported_signature(name).cloned()
                    }
                })
                .into_iter()
                .collect(),
            None => {
                let mut signatures = Vec::new();
                for package in self.search_order().await {
                    if let Some(meta) = self.get_metadata(&package).await {
                        if let Some(signature) = meta.exported_signature(function_name) {
                            signatures.push(signature.clone());
                        }
                    }
                }
                signatures
            }
        };

        log::trace!(
            "Found {} signatures for '{}'",
            signatures.len(),
            function_name
        );
        self.memoise_lookup(function_name, generation, &signatures);
        signatures
    }

    /// Cache a lookup result unless a scan ran since `generation` was read.
    /// Scans bump the generation before clearing the cache, so checking under
    /// the cache lock is enough.
    fn memoise_lookup(
        &self,
        function_name: &str,
        generation: u64,
        signatures: &[FunctionSignature],
    ) {
        let mut lookups = self.lock_lookups();
        if self.generation() != generation {
            log::trace!("Not caching lookup of '{}' computed before a rescan", function_name);
            return;
        }
        lookups.put(function_name.to_string(), signatures.to_vec());
    }

    /// Memoised result of an earlier `lookup_signatures` call.
    pub fn cached_signatures(&self, function_name: &str) -> Option<Vec<FunctionSignature>> {
        self.lock_lookups().get(function_name).cloned()
    }

    /// Package names in lookup order.
    pub async fn search_order(&self) -> Vec<String> {
        let packages = self.packages.read().await;
        let attached = DEFAULT_ATTACHED_PACKAGES
            .iter()
            .filter(|name| packages.contains_key(**name))
            .map(|name| name.to_string());
        let rest = packages
            .keys()
            .filter(|name| !DEFAULT_ATTACHED_PACKAGES.contains(&name.as_str()))
            .cloned();
        attached.chain(rest).collect()
    }

    /// Load metadata for every known package.
    pub async fn populate_all(&self) {
        let _guard = TimingGuard::new("package_index.populate_all");
        for name in self.package_names().await {
            self.get_metadata(&name).await;
        }
        perf::index_metrics()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .log_summary();
    }

    /// Scan and warm the whole index on the tokio runtime.
    pub fn spawn_population(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let index = Arc::clone(self);
        tokio::spawn(async move {
            index.scan().await;
            index.populate_all().await;
        })
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn clear_lookup_cache(&self) {
        self.lock_lookups().clear();
    }

    fn lock_lookups(&self) -> MutexGuard<'_, LruCache<String, Vec<FunctionSignature>>> {
        self.lookups.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageIndex")
            .field("lib_paths", &self.lib_paths)
            .finish_non_exhaustive()
    }
}

/// `("pkg", "fun", internal)` for `pkg::fun` / `pkg:::fun`.
fn split_qualified(name: &str) -> Option<(&str, &str, bool)> {
    if let Some((package, function)) = name.split_once(":::") {
        return Some((package, function, true));
    }
    name.split_once("::")
        .map(|(package, function)| (package, function, false))
}

/// Package directories under each root. The first root containing a name wins.
fn scan_library_paths(paths: &[PathBuf]) -> IndexMap<String, PackageInfo> {
    let mut packages = IndexMap::new();
    for root in paths {
        if !root.is_dir() {
            log::trace!("Skipping missing library path {:?}", root);
            continue;
        }
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
        {
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.starts_with('.') || name.starts_with("00LOCK") {
                continue;
            }
            packages
                .entry(name.to_string())
                .or_insert_with(|| PackageInfo {
                    name: name.to_string(),
                    install_path: entry.path().to_path_buf(),
                });
        }
    }
    packages
}

/// Names in `loaded` still found at the same install path with an unchanged
/// source stamp.
fn unchanged_packages(
    found: &IndexMap<String, PackageInfo>,
    loaded: &[(String, PathBuf, Option<SourceStamp>)],
) -> HashSet<String> {
    loaded
        .iter()
        .filter(|(name, path, stamp)| {
            found.get(name).is_some_and(|info| &info.install_path == path)
                && stamp.is_some()
                && source_stamp(path) == *stamp
        })
        .map(|(name, _, _)| name.clone())
        .collect()
}

/// Stamp of DESCRIPTION, NAMESPACE, the `R/` directory and its sources.
/// `None` for packages without an install directory.
fn source_stamp(dir: &Path) -> Option<SourceStamp> {
    if dir.as_os_str().is_empty() {
        return None;
    }
    let r_dir = dir.join("R");
    let mut paths = vec![dir.join("DESCRIPTION"), dir.join("NAMESPACE"), r_dir.clone()];
    paths.extend(r_source_files(&r_dir));

    let mut stamp = SourceStamp {
        modified: SystemTime::UNIX_EPOCH,
        bytes: 0,
        files: 0,
    };
    for path in paths {
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        if let Ok(modified) = meta.modified() {
            stamp.modified = stamp.modified.max(modified);
        }
        if meta.is_file() {
            stamp.bytes += meta.len();
            stamp.files += 1;
        }
    }
    Some(stamp)
}

/// Read a package's metadata from its install directory. Unreadable parts
/// are logged and left empty.
fn load_metadata(info: &PackageInfo) -> PackageMetadata {
    let start = Instant::now();
    let mut metadata = PackageMetadata::new(&info.name);
    let dir = &info.install_path;

    let description_path = dir.join("DESCRIPTION");
    if description_path.is_file() {
        match namespace_parser::read_description(&description_path) {
            Ok(description) => {
                metadata.description = description.summary().map(String::from);
                metadata.depends = description.depends();
            }
            Err(e) => log::trace!("Failed to read DESCRIPTION for '{}': {:#}", info.name, e),
        }
    }

    for path in r_source_files(&dir.join("R")) {
        match std::fs::read_to_string(&path) {
            Ok(source) => {
                for signature in extract_signatures(&source) {
                    metadata.add_function(signature);
                }
            }
            Err(e) => log::trace!("Failed to read {:?}: {}", path, e),
        }
    }

    let namespace_path = dir.join("NAMESPACE");
    let namespace = if namespace_path.is_file() {
        match namespace_parser::read_namespace(&namespace_path) {
            Ok(namespace) => Some(namespace),
            Err(e) => {
                log::trace!("Failed to read NAMESPACE for '{}': {:#}", info.name, e);
                None
            }
        }
    } else {
        None
    };
    metadata.exports = resolve_exports(namespace.as_ref(), &metadata.functions);

    log::trace!(
        "Loaded package '{}': {} functions, {} exports, {} depends",
        info.name,
        metadata.functions.len(),
        metadata.exports.len(),
        metadata.depends.len()
    );
    perf::record_metadata_load(start.elapsed());
    metadata
}

/// Exported names: explicit exports, S3 methods and defined functions
/// matching an export pattern. Without a NAMESPACE every function whose name
/// does not start with `.` is exported.
fn resolve_exports(
    namespace: Option<&NamespaceDirectives>,
    functions: &IndexMap<String, FunctionSignature>,
) -> HashSet<String> {
    let Some(namespace) = namespace else {
        return functions
            .keys()
            .filter(|name| !name.starts_with('.'))
            .cloned()
            .collect();
    };
    let patterns = namespace.compiled_patterns();
    namespace
        .exports
        .iter()
        .chain(&namespace.s3_methods)
        .cloned()
        .chain(
            functions
                .keys()
                .filter(|name| namespace.is_exported(name, &patterns))
                .cloned(),
        )
        .collect()
}

/// `*.R` / `*.r` files directly inside `dir`, sorted by name.
fn r_source_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("r"))
        })
        .collect()
}

/// Library roots for `config`: configured paths, then `R_LIBS` and
/// `R_LIBS_USER`, then the platform fallbacks that exist. Duplicates are
/// dropped, keeping the first occurrence.
pub fn default_library_paths(config: &PackagesConfig) -> Vec<PathBuf> {
    let mut paths: IndexSet<PathBuf> = config.library_paths.iter().cloned().collect();
    if config.use_default_library_paths {
        for var in ["R_LIBS", "R_LIBS_USER"] {
            if let Some(value) = std::env::var_os(var) {
                paths.extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
            }
        }
        paths.extend(fallback_library_paths().into_iter().filter(|p| p.is_dir()));
    }
    paths.into_iter().collect()
}

/// Common R library locations per platform.
pub fn fallback_library_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from(
            "/Library/Frameworks/R.framework/Versions/Current/Resources/library",
        ));
        if let Ok(home) = std::env::var("HOME") {
            for arch in ["x86_64", "arm64"] {
                for version in ["4.4", "4.3"] {
                    paths.push(PathBuf::from(format!(
                        "{}/Library/R/{}/{}/library",
                        home, arch, version
                    )));
                }
            }
        }
        paths.push(PathBuf::from("/opt/homebrew/lib/R/library"));
        paths.push(PathBuf::from("/usr/local/lib/R/library"));
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/lib/R/library"));
        paths.push(PathBuf::from("/usr/local/lib/R/library"));
        paths.push(PathBuf::from("/usr/lib64/R/library"));
        if let Ok(home) = std::env::var("HOME") {
            for version in ["4.4", "4.3"] {
                paths.push(PathBuf::from(format!(
                    "{}/R/x86_64-pc-linux-gnu-library/{}",
                    home, version
                )));
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from("C:\\Program Files\\R\\R-4.4.0\\library"));
        paths.push(PathBuf::from("C:\\Program Files\\R\\R-4.3.0\\library"));
        if let Ok(profile) = std::env::var("USERPROFILE") {
            for version in ["4.4", "4.3"] {
                paths.push(PathBuf::from(format!(
                    "{}\\Documents\\R\\win-library\\{}",
                    profile, version
                )));
            }
        }
    }

    paths
}
