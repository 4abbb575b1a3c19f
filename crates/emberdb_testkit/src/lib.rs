//! Test fixtures and sample extension payloads for emberdb.
//!
//! The shim is process-global in two ways that matter to tests: at most one
//! session may be live at a time, and a live session runs with the process
//! working directory switched into its cluster. [`fixtures::session_gate`]
//! serializes tests around both; every fixture that touches a session
//! documents whether it expects the gate to be held.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod sample_ext;

pub use fixtures::{fresh_cluster, session_gate, with_ready_session, TestCluster};
pub use sample_ext::register_sample_extension;
