//! Query execution bridge.
//!
//! Wraps one engine execution in the full statement protocol: implicit
//! transaction, snapshot, connection, run, mandatory deep copy of the tuple
//! buffer, then release in reverse order. On a fault only the resources this
//! call acquired are unwound.

use crate::result::QueryResult;
use emberdb_engine::{EngineCore, EngineError, EngineResult, SnapshotId};

/// Runs one statement through the engine and returns an owned result.
///
/// The returned error is the engine's fault; the caller maps it to a
/// negative-status result and the last-error slot. Usage validation happens
/// before this function is reached.
pub(crate) fn run_statement(
    engine: &mut dyn EngineCore,
    sql: &str,
) -> Result<QueryResult, EngineError> {
    let implicit = !engine.in_transaction();
    let mut snapshot: Option<SnapshotId> = None;
    let mut connected = false;

    let outcome = (|| -> EngineResult<QueryResult> {
        if implicit {
            engine.start_transaction()?;
        }
        snapshot = Some(engine.push_snapshot()?);
        engine.connect()?;
        connected = true;

        let status = engine.run(sql)?;
        // The tuple buffer is only valid until the next run call, so the
        // copy into owned strings happens before anything is released.
        let result = QueryResult::from_engine(status, engine.tuple_buffer());

        engine.disconnect()?;
        connected = false;
        if let Some(id) = snapshot.take() {
            engine.pop_snapshot(id)?;
        }
        if implicit {
            engine.commit_transaction()?;
        }
        Ok(result)
    })();

    match outcome {
        Ok(result) => Ok(result),
        Err(fault) => {
            if let Some(id) = snapshot.take() {
                let _ = engine.pop_snapshot(id);
            }
            if connected {
                let _ = engine.disconnect();
            }
            if implicit && engine.in_transaction() {
                let _ = engine.abort_transaction();
            }
            Err(fault)
        }
    }
}

/// Brackets `op` in a transaction when none is open, committing on success
/// and aborting on failure. Used by the listen/unlisten/notify surface,
/// which mirrors statement execution without the snapshot/connection steps.
pub(crate) fn with_implicit_txn<T>(
    engine: &mut dyn EngineCore,
    op: impl FnOnce(&mut dyn EngineCore) -> EngineResult<T>,
) -> EngineResult<T> {
    let implicit = !engine.in_transaction();
    if implicit {
        engine.start_transaction()?;
    }
    match op(engine) {
        Ok(value) => {
            if implicit {
                engine.commit_transaction()?;
            }
            Ok(value)
        }
        Err(fault) => {
            if implicit && engine.in_transaction() {
                let _ = engine.abort_transaction();
            }
            Err(fault)
        }
    }
}
