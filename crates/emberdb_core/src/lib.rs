//! Embedded runtime lifecycle and static extension shim.
//!
//! `emberdb_core` makes a start-once engine repeatedly startable inside one
//! process. It owns the lifecycle state machine (initialize, execute,
//! shutdown, re-initialize), replaces the engine's dynamic-library extension
//! loading with a process-global static registry, serves extension metadata
//! from in-memory buffers, and turns the engine's push-style notification
//! delivery into a poll-based queue.
//!
//! The entry point is [`Session`]:
//!
//! ```no_run
//! use emberdb_core::Session;
//!
//! let mut session = Session::new();
//! session.init_fresh("./cluster", "admin", "UTF8", "C")?;
//! session.initialize("./cluster", "main", "admin")?;
//!
//! session.execute("CREATE TABLE users (id int, name text)")?;
//! session.execute("INSERT INTO users VALUES (1, 'Alice')")?;
//! let result = session.execute("SELECT * FROM users")?;
//! assert_eq!(result.value(0, 1), Some("Alice"));
//!
//! session.shutdown();
//! // The process is back in its pre-init state; initialize works again.
//! session.initialize("./cluster", "main", "admin")?;
//! # Ok::<(), emberdb_core::ShimError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bootstrap;
mod bridge;
mod config;
mod error;
mod extensions;
mod notify;
mod resources;
mod result;
mod runtime;
mod session;

pub use config::PreinitConfig;
pub use error::{ShimError, ShimResult};
pub use extensions::{
    normalize_library_name, register_static_extension, resolve_from_handle, EmbeddedFile,
    InitCallback, RegistryLoader, StaticExtension,
};
pub use notify::Notification;
pub use resources::EmbeddedResources;
pub use result::{QueryResult, STATUS_FAULT};
pub use session::Session;
