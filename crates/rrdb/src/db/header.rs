//! Fixed database header.

use crate::backend::RrdBackend;
use crate::cell::{IntCell, RrdAllocator, StringCell};
use crate::def::{RrdDef, FORMAT_VERSION, INFO_CAPACITY, SIGNATURE_CAPACITY};
use crate::error::{Result, RrdError};

/// Signature prefix; the trailing integer is the format version.
pub(crate) const SIGNATURE_PREFIX: &str = "RRDB, version ";

/// Header cells, in declaration order: signature, step, datasource count,
/// archive count, last update time, info string.
pub(crate) struct Header {
    signature: StringCell,
    step: IntCell,
    ds_count: IntCell,
    arc_count: IntCell,
    last_update_time: IntCell,
    info: StringCell,
}

impl Header {
    /// Binds the header cells at the allocator's cursor.
    pub fn bind(alloc: &mut RrdAllocator) -> Self {
        Self {
            signature: StringCell::allocate(alloc, SIGNATURE_CAPACITY),
            step: IntCell::allocate(alloc),
            ds_count: IntCell::allocate(alloc),
            arc_count: IntCell::allocate(alloc),
            last_update_time: IntCell::allocate(alloc),
            info: StringCell::allocate(alloc, INFO_CAPACITY),
        }
    }

    /// Writes the initial header values for a fresh database.
    pub fn init(&self, backend: &mut dyn RrdBackend, def: &RrdDef) -> Result<()> {
        self.signature
            .set(backend, &format!("{}{}", SIGNATURE_PREFIX, def.version()))?;
        self.step.set(backend, def.step())?;
        self.ds_count
            .set(backend, def.datasources().len() as i64)?;
        self.arc_count.set(backend, def.archives().len() as i64)?;
        self.last_update_time.set(backend, def.start_time())?;
        self.info.set(backend, "")?;
        Ok(())
    }

    /// Checks the stored signature against the supported format version.
    pub fn validate_signature(&self, backend: &mut dyn RrdBackend) -> Result<()> {
        let signature = self.signature.get(backend)?;
        let version = signature
            .strip_prefix(SIGNATURE_PREFIX)
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or_else(|| {
                RrdError::Backend(format!("invalid RRD signature {:?}", signature))
            })?;
        if version != FORMAT_VERSION {
            return Err(RrdError::Backend(format!(
                "unsupported RRD format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn signature(&self, backend: &mut dyn RrdBackend) -> Result<String> {
        self.signature.get(backend)
    }

    /// Format version parsed out of the signature.
    pub fn version(&self, backend: &mut dyn RrdBackend) -> Result<i32> {
        let signature = self.signature.get(backend)?;
        signature
            .strip_prefix(SIGNATURE_PREFIX)
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or_else(|| RrdError::Backend(format!("invalid RRD signature {:?}", signature)))
    }

    pub fn step(&self, backend: &mut dyn RrdBackend) -> Result<i64> {
        self.step.get(backend)
    }

    pub fn ds_count(&self, backend: &mut dyn RrdBackend) -> Result<i64> {
        self.ds_count.get(backend)
    }

    pub fn arc_count(&self, backend: &mut dyn RrdBackend) -> Result<i64> {
        self.arc_count.get(backend)
    }

    pub fn last_update_time(&self, backend: &mut dyn RrdBackend) -> Result<i64> {
        self.last_update_time.get(backend)
    }

    pub fn set_last_update_time(&self, backend: &mut dyn RrdBackend, time: i64) -> Result<()> {
        self.last_update_time.set(backend, time)
    }

    pub fn info(&self, backend: &mut dyn RrdBackend) -> Result<String> {
        self.info.get(backend)
    }

    pub fn set_info(&self, backend: &mut dyn RrdBackend, info: &str) -> Result<()> {
        self.info.set(backend, info)
    }

    /// Copies mutable header state (the last update time) to another header.
    pub fn copy_state_to(
        &self,
        backend: &mut dyn RrdBackend,
        other: &Header,
        other_backend: &mut dyn RrdBackend,
    ) -> Result<()> {
        other.set_last_update_time(other_backend, self.last_update_time(backend)?)
    }

    /// Renders the header state for [`crate::RrdDb::dump`].
    pub fn dump(&self, backend: &mut dyn RrdBackend) -> Result<String> {
        Ok(format!(
            "== HEADER ==\nsignature:{:?} step:{} dsCount:{} arcCount:{} lastUpdate:{}\ninfo:{:?}\n",
            self.signature.get(backend)?,
            self.step.get(backend)?,
            self.ds_count.get(backend)?,
            self.arc_count.get(backend)?,
            self.last_update_time.get(backend)?,
            self.info.get(backend)?,
        ))
    }
}
