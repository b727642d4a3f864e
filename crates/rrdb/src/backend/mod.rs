//! Pluggable byte-addressable storage backends.
//!
//! A backend is a random-access byte store identified by a URI. The engine
//! performs all persistence through the [`RrdBackend`] trait; concrete
//! stores are produced by [`RrdBackendFactory`] implementations resolved
//! from the URI scheme.
//!
//! Two factories ship with the crate:
//!
//! - `FILE` (scheme `file`): plain filesystem storage, validates the header
//!   signature on open.
//! - `MEMORY` (scheme `mem`): process-global byte buffers, reopenable by
//!   URI within the process; no signature validation.
//!
//! The process-wide default factory resolves scheme-less paths. It can be
//! replaced with [`set_default_factory`] until the first database is
//! created or opened; after that the registry is locked.

pub mod file;
pub mod memory;

pub use file::FileBackendFactory;
pub use memory::MemoryBackendFactory;

use crate::error::{Result, RrdError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// Byte-addressable random-access storage for one database.
///
/// Implementations must document their buffering policy: an update is
/// considered durable once the backend write returns, modulo that policy.
pub trait RrdBackend: Send {
    /// Fills `buf` from the bytes starting at `offset`.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` at `offset`.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Sets the total length of the store in bytes.
    fn set_length(&mut self, length: u64) -> Result<()>;

    /// Current length of the store in bytes.
    fn length(&mut self) -> Result<u64>;

    /// Reads the entire store.
    fn read_all(&mut self) -> Result<Vec<u8>>;

    /// Flushes and releases the store. Further operations fail.
    fn close(&mut self) -> Result<()>;

    /// Storage path without the scheme.
    fn path(&self) -> &str;

    /// Full URI identifying this store.
    fn uri(&self) -> &str;

    /// Whether the store was opened read-only.
    fn read_only(&self) -> bool;
}

/// Produces [`RrdBackend`] instances for one URI scheme.
pub trait RrdBackendFactory: Send + Sync {
    /// Factory name used with [`set_default_factory`] (for example
    /// `"FILE"`).
    fn name(&self) -> &'static str;

    /// URI scheme served by this factory (for example `"file"`).
    fn scheme(&self) -> &'static str;

    /// Opens (or, in read-write mode, creates) the store behind `uri`.
    fn open(&self, uri: &str, read_only: bool) -> Result<Box<dyn RrdBackend>>;

    /// Whether a store already exists behind `uri`.
    fn exists(&self, uri: &str) -> Result<bool>;

    /// Whether databases opened from this factory should validate the
    /// header signature.
    fn should_validate_header(&self, uri: &str) -> bool;

    /// Qualifies a plain path with this factory's scheme.
    fn uri_for_path(&self, path: &str) -> String {
        format!("{}://{}", self.scheme(), path)
    }

    /// Strips this factory's scheme from a URI, yielding the plain path.
    fn path_of<'a>(&self, uri: &'a str) -> &'a str {
        uri.strip_prefix(self.scheme())
            .and_then(|rest| rest.strip_prefix("://"))
            .unwrap_or(uri)
    }
}

struct Registry {
    factories: Vec<Arc<dyn RrdBackendFactory>>,
    default_index: usize,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
static LOCKED: AtomicBool = AtomicBool::new(false);

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            factories: vec![
                Arc::new(FileBackendFactory),
                Arc::new(MemoryBackendFactory),
            ],
            default_index: 0,
        })
    })
}

/// Resolves the factory for a URI.
///
/// A URI with a `scheme://` prefix selects the factory registered for that
/// scheme; a plain path selects the default factory.
///
/// # Errors
///
/// Returns [`RrdError::Backend`] if no factory serves the scheme.
pub fn find_factory(uri: &str) -> Result<Arc<dyn RrdBackendFactory>> {
    let reg = registry().read().unwrap_or_else(|e| e.into_inner());
    match uri.split_once("://") {
        Some((scheme, _)) => reg
            .factories
            .iter()
            .find(|f| f.scheme() == scheme)
            .cloned()
            .ok_or_else(|| {
                RrdError::Backend(format!("no backend factory for scheme {:?}", scheme))
            }),
        None => Ok(reg.factories[reg.default_index].clone()),
    }
}

/// Resolves a factory by its registered name.
///
/// # Errors
///
/// Returns [`RrdError::Backend`] if the name is unknown.
pub fn factory_by_name(name: &str) -> Result<Arc<dyn RrdBackendFactory>> {
    let reg = registry().read().unwrap_or_else(|e| e.into_inner());
    reg.factories
        .iter()
        .find(|f| f.name() == name)
        .cloned()
        .ok_or_else(|| RrdError::Backend(format!("no backend factory named {:?}", name)))
}

/// Replaces the process-wide default factory.
///
/// Must be called before any database is created or opened; once the first
/// database exists the registry is locked and this fails.
///
/// # Errors
///
/// Returns [`RrdError::Backend`] if the registry is already locked or the
/// name is unknown.
pub fn set_default_factory(name: &str) -> Result<()> {
    if LOCKED.load(Ordering::Acquire) {
        return Err(RrdError::Backend(
            "default backend factory cannot change after the first database use".to_string(),
        ));
    }
    let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
    let index = reg
        .factories
        .iter()
        .position(|f| f.name() == name)
        .ok_or_else(|| RrdError::Backend(format!("no backend factory named {:?}", name)))?;
    reg.default_index = index;
    Ok(())
}

/// Qualifies a path with the default factory's scheme unless it already
/// carries one.
pub fn build_generic_uri(path: &str) -> String {
    if path.contains("://") {
        path.to_string()
    } else {
        let reg = registry().read().unwrap_or_else(|e| e.into_inner());
        reg.factories[reg.default_index].uri_for_path(path)
    }
}

/// Locks the registry; called on first database creation or open.
pub(crate) fn lock_registry() {
    LOCKED.store(true, Ordering::Release);
}
