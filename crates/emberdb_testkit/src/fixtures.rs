//! Cluster and session fixtures.

use emberdb_core::Session;
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use tempfile::TempDir;

static GATE: Mutex<()> = Mutex::new(());

/// User name every fixture bootstraps and connects with.
pub const TEST_USER: &str = "tester";

/// Serializes tests that bring up sessions.
///
/// Hold the returned guard for the whole test: initialization claims the
/// process-wide session slot and switches the working directory, so two
/// concurrently live sessions in one test binary interfere.
pub fn session_gate() -> MutexGuard<'static, ()> {
    GATE.lock()
}

/// A bootstrapped throwaway cluster, removed from disk on drop.
#[derive(Debug)]
pub struct TestCluster {
    dir: TempDir,
}

impl TestCluster {
    /// The cluster's data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Bootstraps a fresh cluster with the standard test identity.
///
/// Call with the [`session_gate`] held: bootstrap itself runs short-lived
/// sessions.
#[must_use]
pub fn fresh_cluster() -> TestCluster {
    let dir = tempfile::tempdir().expect("create temp cluster dir");
    let mut session = Session::new();
    session
        .init_fresh(dir.path(), TEST_USER, "UTF8", "C")
        .expect("bootstrap test cluster");
    TestCluster { dir }
}

/// Runs `body` against a live session on a fresh cluster's default
/// database, taking the gate and shutting the session down afterwards.
pub fn with_ready_session<T>(body: impl FnOnce(&mut Session, &TestCluster) -> T) -> T {
    let _gate = session_gate();
    let cluster = fresh_cluster();
    let mut session = Session::new();
    session
        .initialize(cluster.path(), "main", TEST_USER)
        .expect("initialize test session");
    let out = body(&mut session, &cluster);
    session.shutdown();
    out
}
