//! Session lifecycle manager.

use crate::bootstrap;
use crate::bridge;
use crate::config::PreinitConfig;
use crate::error::{ShimError, ShimResult};
use crate::extensions::RegistryLoader;
use crate::notify::{Notification, NotificationRelay};
use crate::resources::EmbeddedResources;
use crate::result::QueryResult;
use crate::runtime::{self, CleanupRegistry, RuntimeState};
use emberdb_engine::{layout, EngineCore, MiniEngine, StartupHooks, StartupOptions};
use fs2::FileExt;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

type EngineFactory = Box<dyn Fn() -> Box<dyn EngineCore> + Send>;

/// The embedded session: one in-process engine instance, restartable.
///
/// A `Session` starts uninitialized. [`initialize`](Session::initialize)
/// brings the engine up against an existing cluster directory;
/// [`shutdown`](Session::shutdown) tears everything back down to the
/// pristine pre-init state, after which a new `initialize` behaves exactly
/// like the first one in the process. At most one session may be live per
/// process at a time.
///
/// ```no_run
/// use emberdb_core::Session;
///
/// let mut session = Session::new();
/// session.init_fresh("/tmp/cluster", "admin", "UTF8", "C")?;
/// session.initialize("/tmp/cluster", "main", "admin")?;
/// let result = session.execute("CREATE TABLE t (id int)")?;
/// assert!(!result.is_fault());
/// session.shutdown();
/// # Ok::<(), emberdb_core::ShimError>(())
/// ```
pub struct Session {
    state: Option<RuntimeState>,
    preinit: PreinitConfig,
    last_error: String,
    engine_factory: EngineFactory,
}

impl Session {
    /// Creates an uninitialized session backed by the reference engine.
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine_factory(|| Box::new(MiniEngine::new()))
    }

    /// Creates an uninitialized session that builds its engine through
    /// `factory` on every `initialize`.
    pub fn with_engine_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn EngineCore> + Send + 'static,
    {
        Self {
            state: None,
            preinit: PreinitConfig::new(),
            last_error: String::new(),
            engine_factory: Box::new(factory),
        }
    }

    /// Whether the session is live.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Database the live session is connected to.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.database.as_str())
    }

    /// User the live session runs as.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.user.as_str())
    }

    /// Message of the most recent failing operation; empty if none failed
    /// yet. Overwritten by every failure, so read it promptly.
    #[must_use]
    pub fn last_error_message(&self) -> &str {
        &self.last_error
    }

    /// Replaces the durability configuration applied at the next
    /// `initialize`. Rejected once the session is live.
    pub fn set_preinit_config(&mut self, config: PreinitConfig) -> ShimResult<()> {
        if self.state.is_some() {
            return Err(self.fail(ShimError::ConfigAfterInit));
        }
        self.preinit = config;
        Ok(())
    }

    /// Brings the engine up against an existing cluster directory.
    ///
    /// Idempotent: calling this on an already-initialized session is a
    /// successful no-op. On failure the session stays uninitialized; engine
    /// globals are discarded best-effort, not rolled back.
    pub fn initialize(
        &mut self,
        data_dir: impl AsRef<Path>,
        database: &str,
        user: &str,
    ) -> ShimResult<()> {
        self.initialize_with(data_dir.as_ref(), database, user, false)
    }

    pub(crate) fn initialize_with(
        &mut self,
        data_dir: &Path,
        database: &str,
        user: &str,
        allow_catalog_edits: bool,
    ) -> ShimResult<()> {
        if self.state.is_some() {
            return Ok(());
        }
        if database.is_empty() {
            return Err(self.fail(ShimError::invalid_argument("database name must not be empty")));
        }
        if user.is_empty() {
            return Err(self.fail(ShimError::invalid_argument("user name must not be empty")));
        }
        let data_dir = match fs::canonicalize(data_dir) {
            Ok(dir) => dir,
            Err(e) => {
                return Err(self.fail(ShimError::startup(format!(
                    "data directory \"{}\" is not accessible: {e}",
                    data_dir.display()
                ))))
            }
        };
        if !layout::version_path(&data_dir).is_file() {
            return Err(self.fail(ShimError::startup(format!(
                "\"{}\" is not a valid cluster (missing version marker)",
                data_dir.display()
            ))));
        }
        if !runtime::acquire_process_slot() {
            return Err(self.fail(ShimError::SessionActive));
        }
        match self.bring_up(data_dir, database, user, allow_catalog_edits) {
            Ok(state) => {
                tracing::info!(
                    database = %state.database,
                    user = %state.user,
                    pid = state.process_id,
                    data_dir = %state.data_dir.display(),
                    "session initialized"
                );
                self.state = Some(state);
                Ok(())
            }
            Err(e) => {
                runtime::release_process_slot();
                Err(self.fail(e))
            }
        }
    }

    fn bring_up(
        &mut self,
        data_dir: PathBuf,
        database: &str,
        user: &str,
        allow_catalog_edits: bool,
    ) -> ShimResult<RuntimeState> {
        let original_cwd = env::current_dir()?;

        let lock_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(layout::lock_path(&data_dir))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(ShimError::startup(format!(
                "data directory \"{}\" is locked by another process",
                data_dir.display()
            )));
        }

        // The engine expects to run from inside the data directory; the
        // captured cwd is restored at teardown.
        if let Err(e) = env::set_current_dir(&data_dir) {
            let _ = lock_file.unlock();
            return Err(e.into());
        }

        let mut engine = (self.engine_factory)();
        let mut hooks = StartupHooks::new();
        let options = StartupOptions {
            data_dir: data_dir.clone(),
            database: database.to_string(),
            user: user.to_string(),
            fsync: self.preinit.fsync_enabled(),
            synchronous_commit: self.preinit.synchronous_commit_enabled(),
            full_page_writes: self.preinit.full_page_writes_enabled(),
            allow_catalog_edits,
            loader: std::sync::Arc::new(RegistryLoader),
            opener: std::sync::Arc::new(EmbeddedResources),
        };
        if let Err(fault) = engine.startup(&options, &mut hooks) {
            let _ = env::set_current_dir(&original_cwd);
            let _ = lock_file.unlock();
            return Err(ShimError::startup(fault.to_string()));
        }

        let relay = NotificationRelay::new();
        engine.set_publish_hook(Some(relay.hook()));

        Ok(RuntimeState {
            engine,
            cleanup: CleanupRegistry::from_hooks(hooks),
            relay,
            data_dir,
            original_cwd,
            lock_file,
            database: database.to_string(),
            user: user.to_string(),
            process_id: std::process::id(),
            started_at: SystemTime::now(),
        })
    }

    /// Bootstraps a brand-new cluster directory, then leaves the session
    /// uninitialized and the directory ready for [`initialize`].
    ///
    /// Idempotent: an existing version marker makes this a successful
    /// no-op. A failure partway leaves the partial directory in place.
    pub fn init_fresh(
        &mut self,
        data_dir: impl AsRef<Path>,
        user: &str,
        encoding: &str,
        locale: &str,
    ) -> ShimResult<()> {
        let outcome = bootstrap::init_fresh(self, data_dir.as_ref(), user, encoding, locale);
        self.record(outcome)
    }

    /// Runs one statement (or a `;`-separated script) and returns the
    /// fully owned result.
    ///
    /// Usage errors (not initialized, empty text) come back as `Err`.
    /// Engine faults come back as `Ok` with a negative status; the fault
    /// text is available from [`last_error_message`](Self::last_error_message).
    pub fn execute(&mut self, sql: &str) -> ShimResult<QueryResult> {
        let outcome = self.execute_inner(sql);
        self.record(outcome)
    }

    fn execute_inner(&mut self, sql: &str) -> ShimResult<QueryResult> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(ShimError::EmptyStatement);
        }
        let state = self.state.as_mut().ok_or(ShimError::NotInitialized)?;
        match bridge::run_statement(state.engine.as_mut(), sql) {
            Ok(result) => Ok(result),
            Err(fault) => {
                tracing::debug!(error = %fault, "statement faulted");
                self.last_error = fault.to_string();
                Ok(QueryResult::fault())
            }
        }
    }

    /// Opens an explicit transaction. Fails if one is already open.
    pub fn begin(&mut self) -> ShimResult<()> {
        let outcome = self.begin_inner();
        self.record(outcome)
    }

    fn begin_inner(&mut self) -> ShimResult<()> {
        let state = self.state.as_mut().ok_or(ShimError::NotInitialized)?;
        if state.engine.in_transaction() {
            return Err(ShimError::AlreadyInTransaction);
        }
        state.engine.start_transaction()?;
        Ok(())
    }

    /// Commits the open explicit transaction. Fails if none is open.
    pub fn commit(&mut self) -> ShimResult<()> {
        let outcome = self.commit_inner();
        self.record(outcome)
    }

    fn commit_inner(&mut self) -> ShimResult<()> {
        let state = self.state.as_mut().ok_or(ShimError::NotInitialized)?;
        if !state.engine.in_transaction() {
            return Err(ShimError::NotInTransaction);
        }
        state.engine.commit_transaction()?;
        Ok(())
    }

    /// Rolls back the open explicit transaction. Fails if none is open.
    pub fn rollback(&mut self) -> ShimResult<()> {
        let outcome = self.rollback_inner();
        self.record(outcome)
    }

    fn rollback_inner(&mut self) -> ShimResult<()> {
        let state = self.state.as_mut().ok_or(ShimError::NotInitialized)?;
        if !state.engine.in_transaction() {
            return Err(ShimError::NotInTransaction);
        }
        state.engine.abort_transaction()?;
        Ok(())
    }

    /// Subscribes the session to a notification channel.
    pub fn listen(&mut self, channel: &str) -> ShimResult<()> {
        let outcome = self.listen_inner(channel);
        self.record(outcome)
    }

    fn listen_inner(&mut self, channel: &str) -> ShimResult<()> {
        let channel = validated_channel(channel)?;
        let state = self.state.as_mut().ok_or(ShimError::NotInitialized)?;
        bridge::with_implicit_txn(state.engine.as_mut(), |e| e.listen(channel))?;
        Ok(())
    }

    /// Unsubscribes from one channel, or from all when `channel` is `None`.
    pub fn unlisten(&mut self, channel: Option<&str>) -> ShimResult<()> {
        let outcome = self.unlisten_inner(channel);
        self.record(outcome)
    }

    fn unlisten_inner(&mut self, channel: Option<&str>) -> ShimResult<()> {
        let channel = match channel {
            Some(channel) => Some(validated_channel(channel)?),
            None => None,
        };
        let state = self.state.as_mut().ok_or(ShimError::NotInitialized)?;
        bridge::with_implicit_txn(state.engine.as_mut(), |e| e.unlisten(channel))?;
        Ok(())
    }

    /// Publishes a notification; delivery happens at commit. A missing
    /// payload is sent as the empty string.
    pub fn notify(&mut self, channel: &str, payload: Option<&str>) -> ShimResult<()> {
        let outcome = self.notify_inner(channel, payload);
        self.record(outcome)
    }

    fn notify_inner(&mut self, channel: &str, payload: Option<&str>) -> ShimResult<()> {
        let channel = validated_channel(channel)?;
        let payload = payload.unwrap_or("");
        let state = self.state.as_mut().ok_or(ShimError::NotInitialized)?;
        bridge::with_implicit_txn(state.engine.as_mut(), |e| e.notify(channel, payload))?;
        Ok(())
    }

    /// Returns the oldest pending notification, if any.
    ///
    /// Pumps the engine's pending notification interrupts first, so
    /// notifies from already-committed transactions surface before the
    /// queue is read.
    pub fn poll_notification(&mut self) -> ShimResult<Option<Notification>> {
        let outcome = self.poll_inner();
        self.record(outcome)
    }

    fn poll_inner(&mut self) -> ShimResult<Option<Notification>> {
        let state = self.state.as_mut().ok_or(ShimError::NotInitialized)?;
        state.engine.pump_notifications()?;
        Ok(state.relay.poll_next())
    }

    /// Tears the live session down; a no-op when uninitialized.
    ///
    /// Cleanup callbacks run in reverse registration order, the relay
    /// queue is drained, the lock is released, and the working directory
    /// captured at `initialize` is restored. Faults during teardown are
    /// logged and swallowed.
    pub fn shutdown(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::info!(database = %state.database, "shutting down session");
            state.teardown();
        }
    }

    fn fail(&mut self, error: ShimError) -> ShimError {
        self.last_error = error.to_string();
        error
    }

    fn record<T>(&mut self, outcome: ShimResult<T>) -> ShimResult<T> {
        match outcome {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(e)),
        }
    }
}

fn validated_channel(channel: &str) -> Result<&str, ShimError> {
    if channel.trim().is_empty() {
        return Err(ShimError::invalid_argument("channel name must not be empty"));
    }
    Ok(channel)
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("initialized", &self.state.is_some())
            .field("database", &self.database())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::session_gate;
    use emberdb_engine::layout;
    use tempfile::tempdir;

    #[test]
    fn usage_errors_before_initialization() {
        let mut session = Session::new();
        assert!(matches!(
            session.execute("SELECT 1"),
            Err(ShimError::NotInitialized)
        ));
        assert!(matches!(session.begin(), Err(ShimError::NotInitialized)));
        assert!(matches!(session.commit(), Err(ShimError::NotInitialized)));
        assert!(matches!(
            session.poll_notification(),
            Err(ShimError::NotInitialized)
        ));
        assert!(!session.last_error_message().is_empty());
    }

    #[test]
    fn initialize_rejects_missing_cluster() {
        let _gate = session_gate();
        let dir = tempdir().unwrap();
        let mut session = Session::new();
        // Directory exists but carries no version marker.
        let result = session.initialize(dir.path(), "main", "tester");
        assert!(matches!(result, Err(ShimError::Startup { .. })));
        assert!(!session.is_initialized());
        assert!(session.last_error_message().contains("version marker"));
    }

    #[test]
    fn initialize_is_idempotent_and_restores_cwd() {
        let _gate = session_gate();
        let dir = tempdir().unwrap();
        let before = env::current_dir().unwrap();

        let mut session = Session::new();
        session
            .init_fresh(dir.path(), "tester", "UTF8", "C")
            .unwrap();
        session.initialize(dir.path(), "main", "tester").unwrap();
        // Second call is a successful no-op.
        session.initialize(dir.path(), "main", "tester").unwrap();
        assert_eq!(session.database(), Some("main"));
        assert_eq!(session.user(), Some("tester"));
        assert_eq!(
            env::current_dir().unwrap(),
            fs::canonicalize(dir.path()).unwrap()
        );

        session.shutdown();
        assert_eq!(env::current_dir().unwrap(), before);
        session.shutdown();
        assert!(!session.is_initialized());
    }

    #[test]
    fn only_one_live_session_per_process() {
        let _gate = session_gate();
        let dir = tempdir().unwrap();
        let mut first = Session::new();
        first.init_fresh(dir.path(), "tester", "UTF8", "C").unwrap();
        first.initialize(dir.path(), "main", "tester").unwrap();

        let other_dir = tempdir().unwrap();
        let mut second = Session::new();
        second
            .init_fresh(other_dir.path(), "tester", "UTF8", "C")
            .unwrap();
        let result = second.initialize(other_dir.path(), "main", "tester");
        assert!(matches!(result, Err(ShimError::SessionActive)));

        first.shutdown();
        second
            .initialize(other_dir.path(), "main", "tester")
            .unwrap();
    }

    #[test]
    fn preinit_config_is_frozen_once_live() {
        let _gate = session_gate();
        let dir = tempdir().unwrap();
        let mut session = Session::new();
        session
            .set_preinit_config(PreinitConfig::new().fsync(false))
            .unwrap();
        session
            .init_fresh(dir.path(), "tester", "UTF8", "C")
            .unwrap();
        session.initialize(dir.path(), "main", "tester").unwrap();
        let result = session.set_preinit_config(PreinitConfig::new());
        assert!(matches!(result, Err(ShimError::ConfigAfterInit)));
        session.shutdown();
        session.set_preinit_config(PreinitConfig::new()).unwrap();
    }

    #[test]
    fn engine_faults_surface_as_negative_status() {
        let _gate = session_gate();
        let dir = tempdir().unwrap();
        let mut session = Session::new();
        session
            .init_fresh(dir.path(), "tester", "UTF8", "C")
            .unwrap();
        session.initialize(dir.path(), "main", "tester").unwrap();

        let result = session.execute("SELECT * FROM missing").unwrap();
        assert!(result.is_fault());
        assert!(session.last_error_message().contains("missing"));
        // The failing statement is isolated; the session stays ready.
        let result = session.execute("CREATE TABLE t (id int)").unwrap();
        assert!(!result.is_fault());
    }

    #[test]
    fn transaction_preconditions() {
        let _gate = session_gate();
        let dir = tempdir().unwrap();
        let mut session = Session::new();
        session
            .init_fresh(dir.path(), "tester", "UTF8", "C")
            .unwrap();
        session.initialize(dir.path(), "main", "tester").unwrap();

        assert!(matches!(session.commit(), Err(ShimError::NotInTransaction)));
        assert!(matches!(
            session.rollback(),
            Err(ShimError::NotInTransaction)
        ));
        session.begin().unwrap();
        assert!(matches!(
            session.begin(),
            Err(ShimError::AlreadyInTransaction)
        ));
        session.rollback().unwrap();
    }

    #[test]
    fn empty_statement_and_empty_channel_are_usage_errors() {
        let _gate = session_gate();
        let dir = tempdir().unwrap();
        let mut session = Session::new();
        session
            .init_fresh(dir.path(), "tester", "UTF8", "C")
            .unwrap();
        session.initialize(dir.path(), "main", "tester").unwrap();

        assert!(matches!(
            session.execute("   "),
            Err(ShimError::EmptyStatement)
        ));
        assert!(matches!(
            session.listen(""),
            Err(ShimError::InvalidArgument { .. })
        ));
        assert!(matches!(
            session.notify(" ", Some("x")),
            Err(ShimError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn dropping_a_live_session_shuts_it_down() {
        let _gate = session_gate();
        let dir = tempdir().unwrap();
        let before = env::current_dir().unwrap();
        {
            let mut session = Session::new();
            session
                .init_fresh(dir.path(), "tester", "UTF8", "C")
                .unwrap();
            session.initialize(dir.path(), "main", "tester").unwrap();
        }
        assert_eq!(env::current_dir().unwrap(), before);
        // The slot was released; a new session can come up.
        let mut next = Session::new();
        next.initialize(dir.path(), "main", "tester").unwrap();
        assert!(layout::version_path(dir.path()).is_file());
        next.shutdown();
    }
}
