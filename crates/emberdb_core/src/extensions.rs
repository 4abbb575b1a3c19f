//! Process-global static extension registry.
//!
//! Replaces the engine's dynamic-loader lookup path with a table of
//! statically linked extensions. Registrations are process-wide and survive
//! session shutdown and re-initialization; a library's init callback runs at
//! most once per process, on the first successful symbol lookup into it.

use emberdb_engine::{
    EngineError, EngineResult, ExtensionFn, FnInfoFn, FunctionLoader, LibraryHandle,
    LoadedFunction, ResolvedSymbol, FNINFO_PREFIX,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A logical file served from memory: extension metadata the resource
/// resolver intercepts instead of hitting the filesystem.
#[derive(Debug, Clone)]
pub struct EmbeddedFile {
    /// Logical file name, matched as a path suffix against open requests.
    pub name: String,
    /// File contents; shared, never copied on open.
    pub bytes: Arc<[u8]>,
}

impl EmbeddedFile {
    /// Creates an embedded file.
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Init callback run at most once per library, on first symbol resolution.
pub type InitCallback = fn();

/// One statically linked extension library, described for registration.
///
/// ```
/// use emberdb_core::StaticExtension;
/// use emberdb_engine::{CellValue, EngineResult};
///
/// fn noop(_args: &[CellValue]) -> EngineResult<CellValue> {
///     Ok(CellValue::Null)
/// }
///
/// let ext = StaticExtension::new("demo")
///     .function("noop", noop)
///     .control_file(b"default_version = '1.0'\n".as_slice())
///     .script_file(b"CREATE FUNCTION noop AS '$libdir/demo', 'noop';".as_slice());
/// emberdb_core::register_static_extension(ext);
/// ```
#[derive(Clone)]
pub struct StaticExtension {
    name: String,
    functions: Vec<(String, ExtensionFn)>,
    fninfo: Vec<(String, FnInfoFn)>,
    resources: Vec<EmbeddedFile>,
    init: Option<InitCallback>,
}

impl StaticExtension {
    /// Starts describing an extension library with the given bare name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            fninfo: Vec::new(),
            resources: Vec::new(),
            init: None,
        }
    }

    /// Adds an exported function under `symbol`.
    #[must_use]
    pub fn function(mut self, symbol: impl Into<String>, func: ExtensionFn) -> Self {
        self.functions.push((symbol.into(), func));
        self
    }

    /// Adds an introspection record for `symbol` (served to the engine as
    /// the `fninfo_`-prefixed companion lookup).
    #[must_use]
    pub fn introspection(mut self, symbol: impl Into<String>, info: FnInfoFn) -> Self {
        self.fninfo.push((symbol.into(), info));
        self
    }

    /// Attaches the library's control file as `<name>.control`.
    #[must_use]
    pub fn control_file(mut self, bytes: impl Into<Arc<[u8]>>) -> Self {
        let name = format!("{}.control", self.name);
        self.resources.push(EmbeddedFile::new(name, bytes));
        self
    }

    /// Attaches the library's install script as `<name>.sql`.
    #[must_use]
    pub fn script_file(mut self, bytes: impl Into<Arc<[u8]>>) -> Self {
        let name = format!("{}.sql", self.name);
        self.resources.push(EmbeddedFile::new(name, bytes));
        self
    }

    /// Sets the init callback, invoked lazily at most once per process.
    #[must_use]
    pub fn on_init(mut self, init: InitCallback) -> Self {
        self.init = Some(init);
        self
    }
}

struct Entry {
    ext: StaticExtension,
    handle: u64,
    init_called: bool,
}

static REGISTRY: Mutex<Vec<Entry>> = Mutex::new(Vec::new());
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Registers a static extension library.
///
/// Insertion is at the head of the lookup order, so registering a library
/// under an already-used name shadows the earlier registration. Nothing is
/// ever unregistered.
pub fn register_static_extension(ext: StaticExtension) {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(library = %ext.name, handle, "static extension registered");
    REGISTRY.lock().insert(
        0,
        Entry {
            ext,
            handle,
            init_called: false,
        },
    );
}

/// Reduces a loader-style library reference to a bare library name:
/// strips the `$libdir/` install prefix, any directory components, and a
/// platform shared-library suffix.
#[must_use]
pub fn normalize_library_name(reference: &str) -> &str {
    let name = reference.strip_prefix("$libdir/").unwrap_or(reference);
    let name = match name.rsplit(['/', '\\']).next() {
        Some(base) => base,
        None => name,
    };
    for suffix in [".so", ".dll", ".dylib"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            return stripped;
        }
    }
    name
}

fn lookup_symbol(ext: &StaticExtension, symbol: &str) -> Option<ResolvedSymbol> {
    if let Some(bare) = symbol.strip_prefix(FNINFO_PREFIX) {
        if let Some((_, info)) = ext.fninfo.iter().find(|(name, _)| name == bare) {
            return Some(ResolvedSymbol::FnInfo(*info));
        }
    }
    ext.functions
        .iter()
        .find(|(name, _)| name == symbol)
        .map(|(_, func)| ResolvedSymbol::Function(*func))
}

/// Resolves `symbol` out of the library named by `reference`.
///
/// A missing library is always an error; a missing symbol yields `None`.
/// The library's init callback fires here, outside the registry lock, the
/// first time any lookup into it succeeds or fails past the library check.
fn resolve_in_library(
    reference: &str,
    symbol: &str,
) -> EngineResult<(Option<ResolvedSymbol>, LibraryHandle)> {
    let name = normalize_library_name(reference);
    let (resolved, handle, init) = {
        let mut registry = REGISTRY.lock();
        let entry = registry
            .iter_mut()
            .find(|entry| entry.ext.name == name)
            .ok_or_else(|| {
                EngineError::undefined_object(format!(
                    "could not access library \"{reference}\": no such static extension"
                ))
            })?;
        let init = if entry.init_called {
            None
        } else {
            entry.init_called = true;
            entry.ext.init
        };
        (
            lookup_symbol(&entry.ext, symbol),
            LibraryHandle::new(entry.handle),
            init,
        )
    };
    if let Some(init) = init {
        tracing::debug!(library = %name, "running extension init callback");
        init();
    }
    Ok((resolved, handle))
}

/// Resolves an additional symbol from an already-resolved library.
///
/// This is the handle-rebind step of the loader contract: callers use it to
/// fetch the `fninfo_`-prefixed introspection record without renormalizing
/// the library reference. Stale handles yield `None`.
#[must_use]
pub fn resolve_from_handle(handle: LibraryHandle, symbol: &str) -> Option<ResolvedSymbol> {
    let registry = REGISTRY.lock();
    let entry = registry.iter().find(|entry| entry.handle == handle.raw())?;
    lookup_symbol(&entry.ext, symbol)
}

/// Scans every registered library's embedded files for a suffix match.
pub(crate) fn find_embedded(requested: &str) -> Option<EmbeddedFile> {
    let registry = REGISTRY.lock();
    for entry in registry.iter() {
        for file in &entry.ext.resources {
            if requested.ends_with(file.name.as_str()) {
                return Some(file.clone());
            }
        }
    }
    None
}

/// The [`FunctionLoader`] the lifecycle manager injects into the engine:
/// every dynamic-loader call the engine makes lands in the static registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryLoader;

impl FunctionLoader for RegistryLoader {
    fn load(
        &self,
        library_ref: &str,
        symbol: &str,
        must_exist: bool,
    ) -> EngineResult<Option<LoadedFunction>> {
        let (resolved, handle) = resolve_in_library(library_ref, symbol)?;
        match resolved {
            Some(ResolvedSymbol::Function(func)) => Ok(Some(LoadedFunction { func, handle })),
            Some(ResolvedSymbol::FnInfo(_)) | None => {
                if must_exist {
                    Err(EngineError::undefined_function(format!(
                        "could not find function \"{symbol}\" in library \"{library_ref}\""
                    )))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn rebind(&self, handle: LibraryHandle, symbol: &str) -> Option<ResolvedSymbol> {
        resolve_from_handle(handle, symbol)
    }
}
