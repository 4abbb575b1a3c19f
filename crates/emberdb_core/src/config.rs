//! Pre-initialization durability configuration.

/// Durability knobs applied to the engine during bring-up.
///
/// All toggles default to on. The configuration is only consulted by
/// [`crate::Session::initialize`]; changing it afterwards is rejected, so a
/// running session always reflects the configuration it started with.
///
/// ```
/// use emberdb_core::PreinitConfig;
///
/// let config = PreinitConfig::new().fsync(false).full_page_writes(false);
/// assert!(!config.fsync_enabled());
/// assert!(config.synchronous_commit_enabled());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreinitConfig {
    fsync: bool,
    synchronous_commit: bool,
    full_page_writes: bool,
}

impl PreinitConfig {
    /// Creates the default configuration with every durability toggle on.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fsync: true,
            synchronous_commit: true,
            full_page_writes: true,
        }
    }

    /// Sets whether the engine fsyncs table files on commit.
    #[must_use]
    pub const fn fsync(mut self, enabled: bool) -> Self {
        self.fsync = enabled;
        self
    }

    /// Sets whether commits wait for durable storage acknowledgement.
    #[must_use]
    pub const fn synchronous_commit(mut self, enabled: bool) -> Self {
        self.synchronous_commit = enabled;
        self
    }

    /// Sets whether the engine writes full pages after checkpoints.
    #[must_use]
    pub const fn full_page_writes(mut self, enabled: bool) -> Self {
        self.full_page_writes = enabled;
        self
    }

    /// Whether fsync is enabled.
    #[must_use]
    pub const fn fsync_enabled(&self) -> bool {
        self.fsync
    }

    /// Whether synchronous commit is enabled.
    #[must_use]
    pub const fn synchronous_commit_enabled(&self) -> bool {
        self.synchronous_commit
    }

    /// Whether full page writes are enabled.
    #[must_use]
    pub const fn full_page_writes_enabled(&self) -> bool {
        self.full_page_writes
    }
}

impl Default for PreinitConfig {
    fn default() -> Self {
        Self::new()
    }
}
