//! The round-robin database orchestrator.
//!
//! [`RrdDb`] ties the header, datasources and archives together over one
//! exclusively-owned backend and implements the public operations: update,
//! fetch planning, structural introspection, state copying and lifecycle.
//!
//! # Update flow
//!
//! ```text
//! Sample -> RrdDb::update -> Datasource::process (per datasource)
//!        -> on window close: Archive::archive (per archive)
//!        -> header last-update-time advances
//! ```
//!
//! # Fetch flow
//!
//! ```text
//! FetchRequest -> RrdDb::find_matching_archive -> Archive::fetch_data
//!              -> FetchData
//! ```

pub(crate) mod archive;
pub(crate) mod datasource;
pub mod fetch;
pub(crate) mod header;
pub mod sample;

use crate::backend::{self, RrdBackend, RrdBackendFactory};
use crate::cell::RrdAllocator;
use crate::db::archive::Archive;
use crate::db::datasource::Datasource;
use crate::db::fetch::{FetchData, FetchRequest};
use crate::db::header::Header;
use crate::db::sample::Sample;
use crate::def::{ArcDef, ConsolFun, DsDef, RrdDef};
use crate::error::{Result, RrdError};
use tracing::{debug, warn};

/// Rounds `time` down to a multiple of `step`.
pub(crate) fn normalize(time: i64, step: i64) -> i64 {
    time - time.rem_euclid(step)
}

/// A round-robin database.
///
/// Exclusively owns its backend. Every operation takes `&mut self`; that
/// borrow is the per-database guard required by the single-writer model,
/// including for reads (a cell may span backend buffering, so even
/// read-only access must not interleave). Closed databases reject every
/// operation with [`RrdError::Closed`].
pub struct RrdDb {
    backend: Box<dyn RrdBackend>,
    header: Header,
    datasources: Vec<Datasource>,
    archives: Vec<Archive>,
    closed: bool,
}

impl RrdDb {
    /// Creates a new database from a definition.
    ///
    /// The backend factory is resolved from the definition's path: an
    /// explicit `scheme://` prefix selects that factory, a plain path the
    /// process default.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::InvalidDefinition`] for a structurally invalid
    /// definition and [`RrdError::Io`] for backend failures. If the
    /// backend was already open when a later step failed, it is closed
    /// before the error surfaces.
    pub fn create(def: &RrdDef) -> Result<Self> {
        let uri = backend::build_generic_uri(def.path());
        let factory = backend::find_factory(&uri)?;
        Self::create_with(def, factory.as_ref())
    }

    /// Creates a new database with an explicit backend factory.
    pub fn create_with(def: &RrdDef, factory: &dyn RrdBackendFactory) -> Result<Self> {
        def.validate()?;
        let uri = qualify(def.path(), factory);
        backend::lock_registry();
        let mut store = factory.open(&uri, false)?;
        match Self::build_create(store.as_mut(), def) {
            Ok((header, datasources, archives)) => {
                debug!("created RRD database at {}", uri);
                Ok(Self {
                    backend: store,
                    header,
                    datasources,
                    archives,
                    closed: false,
                })
            }
            Err(e) => {
                let _ = store.close();
                Err(e)
            }
        }
    }

    /// Opens an existing database.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::NotFound`] if the URI does not exist and
    /// [`RrdError::Backend`] if signature validation fails for a factory
    /// that requests it.
    pub fn open(path: &str, read_only: bool) -> Result<Self> {
        let uri = backend::build_generic_uri(path);
        let factory = backend::find_factory(&uri)?;
        Self::open_with(path, read_only, factory.as_ref())
    }

    /// Opens an existing database with an explicit backend factory.
    pub fn open_with(
        path: &str,
        read_only: bool,
        factory: &dyn RrdBackendFactory,
    ) -> Result<Self> {
        let uri = qualify(path, factory);
        backend::lock_registry();
        if !factory.exists(&uri)? {
            return Err(RrdError::NotFound(uri));
        }
        let mut store = factory.open(&uri, read_only)?;
        let validate = factory.should_validate_header(&uri);
        match Self::build_open(store.as_mut(), validate) {
            Ok((header, datasources, archives)) => {
                debug!("opened RRD database at {} (read_only={})", uri, read_only);
                Ok(Self {
                    backend: store,
                    header,
                    datasources,
                    archives,
                    closed: false,
                })
            }
            Err(e) => {
                let _ = store.close();
                Err(e)
            }
        }
    }

    /// Allocates and initializes every cell in declaration order.
    fn build_create(
        store: &mut dyn RrdBackend,
        def: &RrdDef,
    ) -> Result<(Header, Vec<Datasource>, Vec<Archive>)> {
        store.set_length(def.byte_size())?;
        let mut alloc = RrdAllocator::new();

        let header = Header::bind(&mut alloc);
        header.init(store, def)?;

        let mut datasources = Vec::with_capacity(def.datasources().len());
        for ds_def in def.datasources() {
            let ds = Datasource::bind(&mut alloc);
            ds.init(store, ds_def, def.start_time(), def.step())?;
            datasources.push(ds);
        }

        let ds_count = datasources.len();
        let mut archives = Vec::with_capacity(def.archives().len());
        for arc_def in def.archives() {
            archives.push(Archive::create(&mut alloc, store, ds_count, arc_def)?);
        }

        Ok((header, datasources, archives))
    }

    /// Binds every cell in the identical declaration order, writing
    /// nothing.
    fn build_open(
        store: &mut dyn RrdBackend,
        validate: bool,
    ) -> Result<(Header, Vec<Datasource>, Vec<Archive>)> {
        let mut alloc = RrdAllocator::new();

        let header = Header::bind(&mut alloc);
        if validate {
            header.validate_signature(store)?;
        }
        let ds_count = header.ds_count(store)?;
        let arc_count = header.arc_count(store)?;
        if ds_count <= 0 || arc_count <= 0 {
            return Err(RrdError::Backend(format!(
                "corrupt header: {} datasources, {} archives",
                ds_count, arc_count
            )));
        }

        let datasources = (0..ds_count)
            .map(|_| Datasource::bind(&mut alloc))
            .collect::<Vec<_>>();

        let mut archives = Vec::with_capacity(arc_count as usize);
        for _ in 0..arc_count {
            archives.push(Archive::open(&mut alloc, store, ds_count as usize)?);
        }

        Ok((header, datasources, archives))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RrdError::Closed);
        }
        Ok(())
    }

    /// Stores one sample, advancing every datasource pipeline and archive
    /// over the interval since the previous update.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::InvalidTimestamp`] if the sample is not
    /// strictly after the last update; the database is left unchanged.
    /// Update-path I/O errors surface immediately with no partial-success
    /// reporting.
    pub fn update(&mut self, sample: &Sample) -> Result<()> {
        self.ensure_open()?;
        let store = &mut *self.backend;
        let last_update = self.header.last_update_time(store)?;
        if sample.time() <= last_update {
            return Err(RrdError::InvalidTimestamp {
                time: sample.time(),
                last_update,
            });
        }
        if sample.values().len() != self.datasources.len() {
            return Err(RrdError::InvalidRequest(format!(
                "sample carries {} values for {} datasources",
                sample.values().len(),
                self.datasources.len()
            )));
        }

        let step = self.header.step(store)?;
        for (i, ds) in self.datasources.iter().enumerate() {
            let outcome = ds.process(store, step, last_update, sample.time(), sample.values()[i])?;
            if let Some((pdp, elapsed_steps)) = outcome {
                for arc in &self.archives {
                    arc.archive(store, i, pdp, elapsed_steps, step, last_update)?;
                }
            }
        }
        self.header.set_last_update_time(store, sample.time())?;
        Ok(())
    }

    /// Fetches consolidated values for the request from the best-matching
    /// archive.
    pub fn fetch(&mut self, request: &FetchRequest) -> Result<FetchData> {
        let index = self.find_matching_archive(request)?;
        let store = &mut *self.backend;
        let step = self.header.step(store)?;
        let last_update = self.header.last_update_time(store)?;
        let mut ds_names = Vec::with_capacity(self.datasources.len());
        for ds in &self.datasources {
            ds_names.push(ds.name(store)?);
        }
        self.archives[index].fetch_data(store, step, last_update, request, ds_names)
    }

    /// Picks the archive serving a request: among archives with the
    /// requested consolidation function, a full match (covering the range
    /// start) with the step closest to the requested resolution wins;
    /// otherwise the partial match covering the most of the range, ties
    /// broken by step distance and then declaration order. Deterministic
    /// for a fixed archive set.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::NoMatchingArchive`] if no archive has the
    /// requested consolidation function.
    pub fn find_matching_archive(&mut self, request: &FetchRequest) -> Result<usize> {
        self.ensure_open()?;
        request.validate()?;
        let store = &mut *self.backend;
        let step = self.header.step(store)?;
        let last_update = self.header.last_update_time(store)?;

        let mut best_full: Option<(usize, i64)> = None;
        let mut best_partial: Option<(usize, i64, i64)> = None;
        for (index, arc) in self.archives.iter().enumerate() {
            if arc.consol_fun(store)? != request.consol_fun {
                continue;
            }
            let arc_step = arc.arc_step(store, step)?;
            let arc_start = arc.start_time(store, step, last_update)? - arc_step;
            let step_diff = (arc_step - request.resolution).abs();
            if arc_start <= request.start {
                if best_full.map_or(true, |(_, best_diff)| step_diff < best_diff) {
                    best_full = Some((index, step_diff));
                }
            } else {
                let coverage = request.end - arc_start;
                let better = best_partial.map_or(true, |(_, best_cov, best_diff)| {
                    coverage > best_cov || (coverage == best_cov && step_diff < best_diff)
                });
                if better {
                    best_partial = Some((index, coverage, step_diff));
                }
            }
        }

        best_full
            .map(|(index, _)| index)
            .or(best_partial.map(|(index, _, _)| index))
            .ok_or(RrdError::NoMatchingArchive(request.consol_fun))
    }

    /// Number of datasources.
    pub fn datasource_count(&self) -> usize {
        self.datasources.len()
    }

    /// Number of archives.
    pub fn archive_count(&self) -> usize {
        self.archives.len()
    }

    /// Creates a sample at `time` sized for this database, all values
    /// unknown.
    pub fn create_sample(&self, time: i64) -> Sample {
        Sample::new(time, self.datasources.len())
    }

    /// Datasource names in declaration order.
    pub fn ds_names(&mut self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let store = &mut *self.backend;
        let mut names = Vec::with_capacity(self.datasources.len());
        for ds in &self.datasources {
            names.push(ds.name(store)?);
        }
        Ok(names)
    }

    /// Index of the named datasource.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::UnknownDatasource`] if no datasource has the
    /// name.
    pub fn ds_index(&mut self, name: &str) -> Result<usize> {
        self.ensure_open()?;
        let store = &mut *self.backend;
        for (index, ds) in self.datasources.iter().enumerate() {
            if ds.name(store)? == name {
                return Ok(index);
            }
        }
        Err(RrdError::UnknownDatasource(name.to_string()))
    }

    /// Whether the named datasource exists.
    pub fn contains_ds(&mut self, name: &str) -> Result<bool> {
        match self.ds_index(name) {
            Ok(_) => Ok(true),
            Err(RrdError::UnknownDatasource(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Index of the archive with the given consolidation function and
    /// steps.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::UnknownArchive`] if no archive matches.
    pub fn archive_index(&mut self, consol_fun: ConsolFun, steps: i64) -> Result<usize> {
        self.ensure_open()?;
        let store = &mut *self.backend;
        for (index, arc) in self.archives.iter().enumerate() {
            if arc.consol_fun(store)? == consol_fun && arc.steps(store)? == steps {
                return Ok(index);
            }
        }
        Err(RrdError::UnknownArchive { consol_fun, steps })
    }

    /// Time of the last successful update (seconds).
    pub fn last_update_time(&mut self) -> Result<i64> {
        self.ensure_open()?;
        self.header.last_update_time(&mut *self.backend)
    }

    /// Latest end time over all archives; unlike
    /// [`last_update_time`](Self::last_update_time) this only advances
    /// when a row is actually written.
    pub fn last_archive_update_time(&mut self) -> Result<i64> {
        self.ensure_open()?;
        let store = &mut *self.backend;
        let step = self.header.step(store)?;
        let last_update = self.header.last_update_time(store)?;
        let mut last = 0;
        for arc in &self.archives {
            last = last.max(arc.end_time(store, step, last_update)?);
        }
        Ok(last)
    }

    /// Last raw value stored by each datasource, in declaration order.
    pub fn last_datasource_values(&mut self) -> Result<Vec<f64>> {
        self.ensure_open()?;
        let store = &mut *self.backend;
        let mut values = Vec::with_capacity(self.datasources.len());
        for ds in &self.datasources {
            values.push(ds.last_value(store)?);
        }
        Ok(values)
    }

    /// Last raw value stored by the named datasource.
    pub fn last_datasource_value(&mut self, name: &str) -> Result<f64> {
        let index = self.ds_index(name)?;
        self.datasources[index].last_value(&mut *self.backend)
    }

    /// The header info string.
    pub fn info(&mut self) -> Result<String> {
        self.ensure_open()?;
        self.header.info(&mut *self.backend)
    }

    /// Replaces the header info string.
    pub fn set_info(&mut self, info: &str) -> Result<()> {
        self.ensure_open()?;
        self.header.set_info(&mut *self.backend, info)
    }

    /// A textual rendering of the complete internal state, stable for an
    /// unchanged database across reopens.
    pub fn dump(&mut self) -> Result<String> {
        self.ensure_open()?;
        let store = &mut *self.backend;
        let step = self.header.step(store)?;
        let last_update = self.header.last_update_time(store)?;
        let mut out = self.header.dump(store)?;
        for ds in &self.datasources {
            out.push_str(&ds.dump(store)?);
        }
        for arc in &self.archives {
            out.push_str(&arc.dump(store, step, last_update)?);
        }
        Ok(out)
    }

    /// Rebuilds the definition this database was created from, with the
    /// start time set to the current last update time.
    ///
    /// Fix up the path with [`RrdDef::set_path`] to create an empty,
    /// structurally identical database elsewhere.
    pub fn rrd_def(&mut self) -> Result<RrdDef> {
        self.ensure_open()?;
        let path = self.backend.path().to_string();
        let store = &mut *self.backend;
        let step = self.header.step(store)?;
        let version = self.header.version(store)?;
        let start_time = self.header.last_update_time(store)?;

        let mut def = RrdDef::with_version(path, start_time, step, version);
        for ds in &self.datasources {
            def.add_datasource(DsDef::new(
                ds.name(store)?,
                ds.ds_type(store)?,
                ds.heartbeat(store)?,
                ds.min_value(store)?,
                ds.max_value(store)?,
            ));
        }
        for arc in &self.archives {
            def.add_archive(ArcDef::new(
                arc.consol_fun(store)?,
                arc.xff(store)?,
                arc.steps(store)?,
                arc.rows(store)?,
            ));
        }
        Ok(def)
    }

    /// Copies mutable state into another database: the header last-update
    /// time, datasource state matched by name, archive state matched by
    /// (consolidation function, steps). Unmatched entities are skipped
    /// silently.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::IncompatibleCopy`] if the target's format
    /// signature differs.
    pub fn copy_state_to(&mut self, other: &mut RrdDb) -> Result<()> {
        self.ensure_open()?;
        other.ensure_open()?;
        let store = &mut *self.backend;
        let other_store = &mut *other.backend;

        let signature = self.header.signature(store)?;
        let other_signature = other.header.signature(other_store)?;
        if signature != other_signature {
            return Err(RrdError::IncompatibleCopy(format!(
                "signature {:?} does not match {:?}",
                other_signature, signature
            )));
        }

        self.header.copy_state_to(store, &other.header, other_store)?;

        let mut names = Vec::with_capacity(self.datasources.len());
        for ds in &self.datasources {
            names.push(ds.name(store)?);
        }
        let mut other_names = Vec::with_capacity(other.datasources.len());
        for ds in &other.datasources {
            other_names.push(ds.name(other_store)?);
        }
        let ds_map: Vec<Option<usize>> = names
            .iter()
            .map(|name| other_names.iter().position(|n| n == name))
            .collect();

        for (i, ds) in self.datasources.iter().enumerate() {
            if let Some(j) = ds_map[i] {
                ds.copy_state_to(store, &other.datasources[j], other_store)?;
            }
        }

        let mut other_keys = Vec::with_capacity(other.archives.len());
        for arc in &other.archives {
            other_keys.push((arc.consol_fun(other_store)?, arc.steps(other_store)?));
        }
        for arc in &self.archives {
            let key = (arc.consol_fun(store)?, arc.steps(store)?);
            if let Some(j) = other_keys.iter().position(|k| *k == key) {
                arc.copy_state_to(store, &other.archives[j], other_store, &ds_map)?;
            }
        }
        Ok(())
    }

    /// The complete backing bytes of the database.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.backend.read_all()
    }

    /// Storage path without the scheme.
    pub fn path(&self) -> &str {
        self.backend.path()
    }

    /// Full URI of the backing store.
    pub fn uri(&self) -> &str {
        self.backend.uri()
    }

    /// Whether the database has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the database. Idempotent; the backend is closed exactly
    /// once and every later operation fails with [`RrdError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.backend.close()?;
            debug!("closed RRD database at {}", self.backend.uri());
        }
        Ok(())
    }
}

impl Drop for RrdDb {
    fn drop(&mut self) {
        // Best effort; an explicit close is the durable path.
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.backend.close() {
                warn!("failed to close RRD backend on drop: {}", e);
            }
        }
    }
}

fn qualify(path: &str, factory: &dyn RrdBackendFactory) -> String {
    if path.contains("://") {
        path.to_string()
    } else {
        factory.uri_for_path(path)
    }
}
