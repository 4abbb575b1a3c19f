//! The engine contract driven by the embedding shim.
//!
//! The engine behind this trait is a black box: the shim never reaches into
//! its internals. Everything the shim needs - bring-up, teardown hooks,
//! transaction and snapshot bracketing, the execution interface, and
//! notification delivery - crosses this seam. The two companion traits,
//! [`FunctionLoader`] and [`ResourceOpener`], are implemented by the shim and
//! injected at startup so the engine never touches a dynamic loader or reads
//! extension metadata straight from disk.

use crate::error::EngineResult;
use crate::exec::{CellValue, ExecStatus, TupleBuffer};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hook invoked when a committed notification is delivered.
///
/// Arguments: channel, payload, originating process id.
pub type PublishHook = Arc<dyn Fn(&str, &str, u32) + Send + Sync>;

/// A statically linked extension function.
///
/// Extension functions take the engine's typed cell values and return one;
/// faults propagate as engine errors.
pub type ExtensionFn = fn(&[CellValue]) -> EngineResult<CellValue>;

/// Introspection record exported by an extension next to each function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FnInfoRecord {
    /// Call-convention version the function was built against.
    pub api_version: u32,
}

/// An introspection-record function.
pub type FnInfoFn = fn() -> FnInfoRecord;

/// Symbol prefix distinguishing introspection records from callables.
pub const FNINFO_PREFIX: &str = "fninfo_";

/// The call-convention version this engine contract expects.
pub const FNINFO_API_VERSION: u32 = 1;

/// Opaque handle binding a call site to a resolved library.
///
/// Returned alongside a resolved function so follow-up symbol lookups
/// (notably `fninfo_`-prefixed introspection records) can go back to the
/// same library without re-normalizing its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryHandle(u64);

impl LibraryHandle {
    /// Wraps a raw handle token.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle token.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A function resolved from a registered library, plus the handle for
/// follow-up lookups against the same library.
#[derive(Clone, Copy)]
pub struct LoadedFunction {
    /// The resolved callable.
    pub func: ExtensionFn,
    /// Handle for [`FunctionLoader::rebind`].
    pub handle: LibraryHandle,
}

/// A symbol resolved through a library handle.
#[derive(Clone, Copy)]
pub enum ResolvedSymbol {
    /// An ordinary extension function.
    Function(ExtensionFn),
    /// An introspection record.
    FnInfo(FnInfoFn),
}

/// The dynamic-loader replacement the shim injects at startup.
///
/// `library_ref` is whatever the engine would have handed to a dynamic
/// loader (install-path prefix, directory components, and platform suffix
/// included); implementations normalize it to a bare library name.
pub trait FunctionLoader: Send + Sync {
    /// Resolves `symbol` from the library named by `library_ref`.
    ///
    /// # Errors
    ///
    /// A missing library is always an error, regardless of `must_exist`.
    /// A missing symbol is an error only when `must_exist` is set; otherwise
    /// `Ok(None)` is returned so the engine can probe optional symbols.
    fn load(
        &self,
        library_ref: &str,
        symbol: &str,
        must_exist: bool,
    ) -> EngineResult<Option<LoadedFunction>>;

    /// Resolves an additional symbol from an already-resolved library.
    ///
    /// Symbols starting with [`FNINFO_PREFIX`] are served from the library's
    /// introspection table; everything else from its function table. A stale
    /// or unknown handle yields `None`.
    fn rebind(&self, handle: LibraryHandle, symbol: &str) -> Option<ResolvedSymbol>;
}

/// The file-open replacement the shim injects at startup.
///
/// Lookups are satisfied from registered in-memory buffers when one matches,
/// falling back to ordinary filesystem access otherwise.
pub trait ResourceOpener: Send + Sync {
    /// Opens `path` as a read-only stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the path matches no embedded buffer and the
    /// filesystem open fails.
    fn open(&self, path: &Path) -> EngineResult<Box<dyn Read + Send>>;

    /// Whether `path` resolves to an embedded buffer or an existing file.
    fn exists(&self, path: &Path) -> bool;

    /// Reads the full contents of `path`.
    ///
    /// Returns `Ok(None)` when the path matches neither an embedded buffer
    /// nor an existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if a filesystem read fails.
    fn read_all(&self, path: &Path) -> EngineResult<Option<Vec<u8>>>;
}

/// Identifier of an active consistency snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Wraps a raw snapshot number.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw snapshot number.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Parameters for one engine bring-up.
#[derive(Clone)]
pub struct StartupOptions {
    /// Cluster data directory (already validated and locked by the shim).
    pub data_dir: PathBuf,
    /// Database to connect to.
    pub database: String,
    /// User the session runs as.
    pub user: String,
    /// Whether table files are synced on commit.
    pub fsync: bool,
    /// Whether commits wait for durable storage.
    pub synchronous_commit: bool,
    /// Whether full-page images are written on first touch.
    pub full_page_writes: bool,
    /// Whether catalog (`sys_`-prefixed) tables may be modified.
    pub allow_catalog_edits: bool,
    /// Loader for statically registered extension functions.
    pub loader: Arc<dyn FunctionLoader>,
    /// Opener for embedded control/script/locale buffers.
    pub opener: Arc<dyn ResourceOpener>,
}

/// A cleanup callback registered during startup.
///
/// Callbacks receive the engine so they can flush and detach; the shim runs
/// them in reverse registration order at shutdown and then discards them.
pub type CleanupFn = Box<dyn FnMut(&mut dyn EngineCore) -> EngineResult<()> + Send>;

/// The process-exit-hook replacement handed to [`EngineCore::startup`].
///
/// The engine expects to register teardown work with the platform's exit
/// registry and then terminate the process; here the registrations land in a
/// growable ordered list the shim replays - in reverse order - on every
/// shutdown, so they can be re-armed by the next bring-up.
#[derive(Default)]
pub struct StartupHooks {
    hooks: Vec<CleanupFn>,
}

impl StartupHooks {
    /// Creates an empty hook list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cleanup callback. Registration order is preserved.
    pub fn on_shutdown(&mut self, hook: CleanupFn) {
        self.hooks.push(hook);
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Consumes the list, yielding callbacks in registration order.
    #[must_use]
    pub fn into_inner(self) -> Vec<CleanupFn> {
        self.hooks
    }
}

/// The internal execution interface of the embedded engine.
///
/// # Calling discipline
///
/// The shim brackets every statement the same way: transaction open (if
/// none), snapshot push, connect, `run`, tuple-buffer copy, disconnect,
/// snapshot pop, transaction close. Implementations are free to fault on
/// out-of-order calls; [`crate::MiniEngine`] does, which keeps the shim's
/// bracketing honest under test.
pub trait EngineCore: Send {
    /// Brings up the engine against an initialized cluster.
    ///
    /// Cleanup work is registered through `hooks` rather than performed in a
    /// `Drop` impl so the shim can replay it in reverse order at shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster is missing, has a version mismatch,
    /// or the target database does not exist.
    fn startup(&mut self, opts: &StartupOptions, hooks: &mut StartupHooks) -> EngineResult<()>;

    /// Whether a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open.
    fn start_transaction(&mut self) -> EngineResult<()>;

    /// Commits the open transaction, making its effects durable and
    /// releasing its queued notifications for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or persistence fails.
    fn commit_transaction(&mut self) -> EngineResult<()>;

    /// Aborts the open transaction, discarding its effects.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open.
    fn abort_transaction(&mut self) -> EngineResult<()>;

    /// Acquires a consistency snapshot for the next statement.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a transaction.
    fn push_snapshot(&mut self) -> EngineResult<SnapshotId>;

    /// Releases a snapshot. Must match the most recently pushed one.
    ///
    /// # Errors
    ///
    /// Returns an error on mismatched or missing snapshots.
    fn pop_snapshot(&mut self, snapshot: SnapshotId) -> EngineResult<()>;

    /// Connects to the execution interface.
    ///
    /// # Errors
    ///
    /// Returns an error if already connected.
    fn connect(&mut self) -> EngineResult<()>;

    /// Executes `sql` (possibly several `;`-separated statements).
    ///
    /// The returned status describes the last statement; if it produced a
    /// result set, [`EngineCore::tuple_buffer`] exposes it until the next
    /// `run` call.
    ///
    /// # Errors
    ///
    /// Returns an error on parse or execution failure, or when called
    /// without an open transaction, active snapshot, and connection.
    fn run(&mut self, sql: &str) -> EngineResult<ExecStatus>;

    /// The result set of the most recent `run`, if it produced one.
    ///
    /// Invalidated by the next `run` call; callers must copy.
    fn tuple_buffer(&self) -> Option<&TupleBuffer>;

    /// Disconnects from the execution interface.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected.
    fn disconnect(&mut self) -> EngineResult<()>;

    /// Subscribes this session to `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error outside a transaction.
    fn listen(&mut self, channel: &str) -> EngineResult<()>;

    /// Unsubscribes from `channel`, or from all channels when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error outside a transaction.
    fn unlisten(&mut self, channel: Option<&str>) -> EngineResult<()>;

    /// Queues a notification; delivered at commit to listening sessions.
    ///
    /// # Errors
    ///
    /// Returns an error outside a transaction.
    fn notify(&mut self, channel: &str, payload: &str) -> EngineResult<()>;

    /// Installs or removes the publish hook notifications are delivered to.
    fn set_publish_hook(&mut self, hook: Option<PublishHook>);

    /// Processes pending notification interrupts, pushing any committed
    /// notifications through the publish hook.
    ///
    /// # Errors
    ///
    /// Returns an error if interrupt processing fails.
    fn pump_notifications(&mut self) -> EngineResult<()>;

    /// Flushes all in-memory state to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    fn flush(&mut self) -> EngineResult<()>;
}
