//! Filesystem storage backend.

use crate::backend::{RrdBackend, RrdBackendFactory};
use crate::error::{Result, RrdError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Byte store backed by a plain file.
///
/// Reads and writes go straight to the file handle; durability of an
/// update is whatever the OS page cache provides until [`close`] syncs.
///
/// [`close`]: RrdBackend::close
pub struct FileBackend {
    file: Option<File>,
    path: String,
    uri: String,
    read_only: bool,
}

impl FileBackend {
    fn open(path: &str, uri: &str, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)?;
        Ok(Self {
            file: Some(file),
            path: path.to_string(),
            uri: uri.to_string(),
            read_only,
        })
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(RrdError::Closed)
    }
}

impl RrdBackend for FileBackend {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn set_length(&mut self, length: u64) -> Result<()> {
        self.file()?.set_len(length)?;
        Ok(())
    }

    fn length(&mut self) -> Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            if !self.read_only {
                file.sync_all()?;
            }
        }
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

/// Factory for [`FileBackend`] stores (name `FILE`, scheme `file`).
pub struct FileBackendFactory;

impl RrdBackendFactory for FileBackendFactory {
    fn name(&self) -> &'static str {
        "FILE"
    }

    fn scheme(&self) -> &'static str {
        "file"
    }

    fn open(&self, uri: &str, read_only: bool) -> Result<Box<dyn RrdBackend>> {
        let path = self.path_of(uri);
        Ok(Box::new(FileBackend::open(path, uri, read_only)?))
    }

    fn exists(&self, uri: &str) -> Result<bool> {
        Ok(Path::new(self.path_of(uri)).exists())
    }

    fn should_validate_header(&self, _uri: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_backend_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backend.rrd");
        let uri = format!("file://{}", path.display());

        let factory = FileBackendFactory;
        assert!(!factory.exists(&uri).unwrap());

        let mut backend = factory.open(&uri, false).unwrap();
        backend.set_length(16).unwrap();
        backend.write(8, &7u64.to_be_bytes()).unwrap();

        let mut buf = [0u8; 8];
        backend.read(8, &mut buf).unwrap();
        assert_eq!(u64::from_be_bytes(buf), 7);
        assert_eq!(backend.length().unwrap(), 16);
        backend.close().unwrap();

        // Closed backends refuse further I/O.
        assert!(backend.read(0, &mut buf).is_err());
        assert!(factory.exists(&uri).unwrap());
    }

    #[test]
    fn test_read_only_open_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.rrd");
        let uri = format!("file://{}", path.display());

        let factory = FileBackendFactory;
        let mut backend = factory.open(&uri, false).unwrap();
        backend.set_length(8).unwrap();
        backend.close().unwrap();

        let mut backend = factory.open(&uri, true).unwrap();
        assert!(backend.read_only());
        assert!(backend.write(0, &[1, 2, 3]).is_err());
    }
}
