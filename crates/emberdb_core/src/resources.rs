//! Embedded resource resolver.
//!
//! Intercepts the file-open requests the engine issues for extension
//! control/script files and locale data. Requests that suffix-match a
//! registered in-memory buffer are served straight from that buffer;
//! everything else falls through to the real filesystem.

use crate::extensions::{self, EmbeddedFile};
use emberdb_engine::{EngineResult, ResourceOpener};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

/// The one built-in buffer that is not tied to an extension: default locale
/// data the engine reads during bring-up.
const LOCALE_FILE: &str = "locale.default";
const LOCALE_BYTES: &[u8] = b"C\n";

fn lookup(requested: &Path) -> Option<EmbeddedFile> {
    let requested = requested.to_string_lossy();
    if requested.ends_with(LOCALE_FILE) {
        return Some(EmbeddedFile::new(LOCALE_FILE, LOCALE_BYTES));
    }
    extensions::find_embedded(&requested)
}

/// The [`ResourceOpener`] the lifecycle manager injects into the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedResources;

impl ResourceOpener for EmbeddedResources {
    fn open(&self, path: &Path) -> EngineResult<Box<dyn Read + Send>> {
        if let Some(file) = lookup(path) {
            tracing::debug!(path = %path.display(), "serving embedded resource");
            // Cursor over the shared bytes; the buffer itself is not copied.
            let stream: Cursor<Arc<[u8]>> = Cursor::new(file.bytes);
            return Ok(Box::new(stream));
        }
        let file = fs::File::open(path)?;
        Ok(Box::new(file))
    }

    fn exists(&self, path: &Path) -> bool {
        lookup(path).is_some() || path.exists()
    }

    fn read_all(&self, path: &Path) -> EngineResult<Option<Vec<u8>>> {
        if let Some(file) = lookup(path) {
            return Ok(Some(file.bytes.to_vec()));
        }
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
