//! # emberdb engine contract
//!
//! This crate defines the seam between the embedding shim (`emberdb_core`)
//! and the relational engine it drives:
//!
//! - [`EngineCore`] - the internal execution interface (startup, transactions,
//!   snapshots, statement execution, notifications)
//! - [`FunctionLoader`] / [`ResourceOpener`] - the hooks the shim injects to
//!   replace dynamic-library loading and on-disk extension metadata
//! - [`TupleBuffer`] / [`CellValue`] - the engine-internal result
//!   representation, valid only until the next statement
//! - [`layout`] - the on-disk cluster layout contract
//! - [`MiniEngine`] - a deliberately small reference engine used by tests,
//!   the testkit, and the demo program

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod core;
mod error;
mod exec;
pub mod layout;
mod mini;

pub use crate::core::{
    CleanupFn, EngineCore, ExtensionFn, FnInfoFn, FnInfoRecord, FunctionLoader, LibraryHandle,
    LoadedFunction, PublishHook, ResolvedSymbol, ResourceOpener, SnapshotId, StartupHooks,
    StartupOptions, FNINFO_API_VERSION, FNINFO_PREFIX,
};
pub use error::{EngineError, EngineResult};
pub use exec::{CellValue, ColumnMeta, ColumnType, ExecStatus, StatementKind, TupleBuffer};
pub use mini::MiniEngine;
