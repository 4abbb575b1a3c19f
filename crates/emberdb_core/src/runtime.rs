//! Live-session state and teardown.

use crate::notify::NotificationRelay;
use emberdb_engine::{CleanupFn, EngineCore, StartupHooks};
use fs2::FileExt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Claims the one live-session slot this process has.
pub(crate) fn acquire_process_slot() -> bool {
    ACTIVE
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Releases the live-session slot.
pub(crate) fn release_process_slot() {
    ACTIVE.store(false, Ordering::Release);
}

/// The cleanup callbacks the engine registered during bring-up.
///
/// The engine hands these over expecting process-exit semantics; the
/// lifecycle manager stores them instead and replays them in reverse
/// registration order on every shutdown, so each cycle re-arms them.
pub(crate) struct CleanupRegistry {
    hooks: Vec<CleanupFn>,
}

impl CleanupRegistry {
    pub(crate) fn from_hooks(hooks: StartupHooks) -> Self {
        Self {
            hooks: hooks.into_inner(),
        }
    }

    /// Runs and discards every callback, newest first. Faults are logged
    /// and swallowed; shutdown is best-effort.
    pub(crate) fn run_reverse(&mut self, engine: &mut dyn EngineCore) {
        while let Some(mut hook) = self.hooks.pop() {
            if let Err(e) = hook(engine) {
                tracing::warn!(error = %e, "cleanup callback faulted during shutdown");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.hooks.len()
    }
}

/// Everything a live session owns, reconstructed wholesale on each
/// `initialize` and dropped wholesale on each `shutdown`.
///
/// Modeling the engine's process-wide singletons as fields of one struct is
/// the reset discipline: there is no field-by-field cleanup to get wrong,
/// only the teardown sequence below followed by a drop.
pub(crate) struct RuntimeState {
    pub(crate) engine: Box<dyn EngineCore>,
    pub(crate) cleanup: CleanupRegistry,
    pub(crate) relay: NotificationRelay,
    pub(crate) data_dir: PathBuf,
    pub(crate) original_cwd: PathBuf,
    pub(crate) lock_file: File,
    pub(crate) database: String,
    pub(crate) user: String,
    pub(crate) process_id: u32,
    pub(crate) started_at: SystemTime,
}

impl RuntimeState {
    /// Tears the session down: cleanup callbacks in reverse order, relay
    /// drain, lock release, working-directory restore, slot release. Every
    /// step is best-effort; faults are logged, never propagated.
    pub(crate) fn teardown(mut self) {
        self.cleanup.run_reverse(self.engine.as_mut());
        self.relay.reset();
        if let Err(e) = self.lock_file.unlock() {
            tracing::warn!(error = %e, "failed to release data directory lock");
        }
        if let Err(e) = std::env::set_current_dir(&self.original_cwd) {
            tracing::warn!(
                error = %e,
                cwd = %self.original_cwd.display(),
                "failed to restore working directory"
            );
        }
        release_process_slot();
        tracing::debug!(
            database = %self.database,
            user = %self.user,
            pid = self.process_id,
            data_dir = %self.data_dir.display(),
            uptime = ?self.started_at.elapsed().ok(),
            "session torn down"
        );
    }
}
