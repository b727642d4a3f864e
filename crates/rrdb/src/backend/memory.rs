//! In-memory storage backend.
//!
//! Buffers are keyed by URI in a process-global table, so a database
//! created under `mem://name` can be reopened under the same URI for as
//! long as the process lives. Useful in environments that prohibit disk
//! use and for tests.

use crate::backend::{RrdBackend, RrdBackendFactory};
use crate::error::{Result, RrdError};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, OnceLock};

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

static STORE: OnceLock<Mutex<HashMap<String, SharedBuffer>>> = OnceLock::new();

fn store() -> &'static Mutex<HashMap<String, SharedBuffer>> {
    STORE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Byte store held in process memory.
///
/// Writes are immediately visible to subsequent reads; nothing survives
/// the process.
pub struct MemoryBackend {
    buffer: SharedBuffer,
    path: String,
    uri: String,
    read_only: bool,
    closed: bool,
}

impl MemoryBackend {
    /// Creates a private scratch buffer that is not registered in the
    /// process-global table.
    pub fn anonymous(name: &str) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            path: name.to_string(),
            uri: format!("mem://{}", name),
            read_only: false,
            closed: false,
        }
    }

    fn open_shared(path: &str, uri: &str, read_only: bool) -> Self {
        let buffer = store()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(uri.to_string())
            .or_default()
            .clone();
        Self {
            buffer,
            path: path.to_string(),
            uri: uri.to_string(),
            read_only,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RrdError::Closed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(RrdError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "backend is read-only",
            )));
        }
        Ok(())
    }
}

impl RrdBackend for MemoryBackend {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        let bytes = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let start = offset as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            return Err(RrdError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {}..{} beyond length {}", start, end, bytes.len()),
            )));
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let mut bytes = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn set_length(&mut self, length: u64) -> Result<()> {
        self.ensure_writable()?;
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resize(length as usize, 0);
        Ok(())
    }

    fn length(&mut self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len() as u64)
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        Ok(self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

/// Factory for [`MemoryBackend`] stores (name `MEMORY`, scheme `mem`).
pub struct MemoryBackendFactory;

impl MemoryBackendFactory {
    /// Drops the buffer behind `uri` from the process-global table.
    pub fn forget(uri: &str) {
        store()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uri);
    }
}

impl RrdBackendFactory for MemoryBackendFactory {
    fn name(&self) -> &'static str {
        "MEMORY"
    }

    fn scheme(&self) -> &'static str {
        "mem"
    }

    fn open(&self, uri: &str, read_only: bool) -> Result<Box<dyn RrdBackend>> {
        let path = self.path_of(uri);
        Ok(Box::new(MemoryBackend::open_shared(path, uri, read_only)))
    }

    fn exists(&self, uri: &str) -> Result<bool> {
        Ok(store()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(uri))
    }

    fn should_validate_header(&self, _uri: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_buffer_reopens() {
        let factory = MemoryBackendFactory;
        let uri = "mem://reopen-test.rrd";

        let mut backend = factory.open(uri, false).unwrap();
        backend.set_length(8).unwrap();
        backend.write(0, &42u64.to_be_bytes()).unwrap();
        backend.close().unwrap();

        assert!(factory.exists(uri).unwrap());
        let mut reopened = factory.open(uri, true).unwrap();
        let mut buf = [0u8; 8];
        reopened.read(0, &mut buf).unwrap();
        assert_eq!(u64::from_be_bytes(buf), 42);

        MemoryBackendFactory::forget(uri);
        assert!(!factory.exists(uri).unwrap());
    }

    #[test]
    fn test_read_beyond_length_fails() {
        let mut backend = MemoryBackend::anonymous("short");
        backend.set_length(4).unwrap();
        let mut buf = [0u8; 8];
        assert!(backend.read(0, &mut buf).is_err());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let factory = MemoryBackendFactory;
        let uri = "mem://ro-test.rrd";
        factory.open(uri, false).unwrap().set_length(8).unwrap();

        let mut backend = factory.open(uri, true).unwrap();
        assert!(backend.write(0, &[1]).is_err());
        assert!(backend.set_length(16).is_err());
        MemoryBackendFactory::forget(uri);
    }
}
