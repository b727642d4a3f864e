//! Database structure definitions.
//!
//! An [`RrdDef`] describes the complete structure of a round-robin database:
//! the base step, the datasources ([`DsDef`]) and the archives ([`ArcDef`]).
//! The definition fixes the on-disk layout: every field of every entity is
//! allocated in declaration order, so two databases created from equal
//! definitions are byte-compatible.

use crate::error::{Result, RrdError};
use std::fmt;

/// Byte capacity of the fixed header signature cell.
pub const SIGNATURE_CAPACITY: usize = 24;

/// Byte capacity of the fixed header info cell.
pub const INFO_CAPACITY: usize = 128;

/// Byte capacity of a datasource name cell.
pub const DS_NAME_CAPACITY: usize = 20;

/// Byte capacity of a datasource-type or consolidation-function tag cell.
pub const TAG_CAPACITY: usize = 8;

/// On-disk format version understood by this crate.
pub const FORMAT_VERSION: i32 = 1;

/// Datasource type: how raw sample values are turned into rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsType {
    /// The sample value is already a rate-like reading.
    Gauge,
    /// Monotonically increasing counter; wraps at 2^32 / 2^64 are corrected.
    ///
    /// The wrap policy is fixed for this type: a decrease is first treated
    /// as a 32-bit wrap, then as a 64-bit wrap, and only yields an unknown
    /// rate if both corrections still leave a negative delta.
    Counter,
    /// Like [`DsType::Counter`] but signed: no wrap correction is applied.
    Derive,
    /// A count accumulated since the previous sample; divided by the
    /// interval length to form the rate.
    Absolute,
}

impl DsType {
    /// The fixed on-disk tag for this type.
    pub fn as_tag(self) -> &'static str {
        match self {
            DsType::Gauge => "GAUGE",
            DsType::Counter => "COUNTER",
            DsType::Derive => "DERIVE",
            DsType::Absolute => "ABSOLUTE",
        }
    }

    /// Parses an on-disk tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "GAUGE" => Ok(DsType::Gauge),
            "COUNTER" => Ok(DsType::Counter),
            "DERIVE" => Ok(DsType::Derive),
            "ABSOLUTE" => Ok(DsType::Absolute),
            other => Err(RrdError::Backend(format!(
                "unknown datasource type tag {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for DsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Consolidation function: how primary data points fold into archive rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolFun {
    /// Arithmetic mean of the known PDPs in the window.
    Average,
    /// Smallest known PDP in the window.
    Min,
    /// Largest known PDP in the window.
    Max,
    /// Most recent known PDP in the window.
    Last,
    /// First known PDP in the window.
    First,
    /// Sum of the known PDPs in the window.
    Total,
}

impl ConsolFun {
    /// The fixed on-disk tag for this function.
    pub fn as_tag(self) -> &'static str {
        match self {
            ConsolFun::Average => "AVERAGE",
            ConsolFun::Min => "MIN",
            ConsolFun::Max => "MAX",
            ConsolFun::Last => "LAST",
            ConsolFun::First => "FIRST",
            ConsolFun::Total => "TOTAL",
        }
    }

    /// Parses an on-disk tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "AVERAGE" => Ok(ConsolFun::Average),
            "MIN" => Ok(ConsolFun::Min),
            "MAX" => Ok(ConsolFun::Max),
            "LAST" => Ok(ConsolFun::Last),
            "FIRST" => Ok(ConsolFun::First),
            "TOTAL" => Ok(ConsolFun::Total),
            other => Err(RrdError::Backend(format!(
                "unknown consolidation function tag {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for ConsolFun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Definition of a single datasource.
#[derive(Debug, Clone)]
pub struct DsDef {
    /// Datasource name, unique within the database.
    pub name: String,
    /// Datasource type.
    pub ds_type: DsType,
    /// Maximum tolerated gap between samples (seconds) before the covering
    /// primary data point becomes unknown.
    pub heartbeat: i64,
    /// Smallest acceptable rate; NaN means unbounded.
    pub min_value: f64,
    /// Largest acceptable rate; NaN means unbounded.
    pub max_value: f64,
}

impl DsDef {
    /// Creates a datasource definition.
    pub fn new(
        name: impl Into<String>,
        ds_type: DsType,
        heartbeat: i64,
        min_value: f64,
        max_value: f64,
    ) -> Self {
        Self {
            name: name.into(),
            ds_type,
            heartbeat,
            min_value,
            max_value,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RrdError::InvalidDefinition(
                "datasource name must not be empty".to_string(),
            ));
        }
        if self.name.len() > DS_NAME_CAPACITY {
            return Err(RrdError::InvalidDefinition(format!(
                "datasource name {:?} exceeds {} bytes",
                self.name, DS_NAME_CAPACITY
            )));
        }
        if self.heartbeat <= 0 {
            return Err(RrdError::InvalidDefinition(format!(
                "heartbeat must be positive, got {}",
                self.heartbeat
            )));
        }
        if !self.min_value.is_nan() && !self.max_value.is_nan() && self.min_value >= self.max_value
        {
            return Err(RrdError::InvalidDefinition(format!(
                "min value {} must be below max value {}",
                self.min_value, self.max_value
            )));
        }
        Ok(())
    }
}

impl PartialEq for DsDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.ds_type == other.ds_type
            && self.heartbeat == other.heartbeat
            && nan_eq(self.min_value, other.min_value)
            && nan_eq(self.max_value, other.max_value)
    }
}

/// Definition of a single round-robin archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcDef {
    /// Consolidation function for this archive.
    pub consol_fun: ConsolFun,
    /// X-files factor: the fraction of unknown PDPs in a consolidation
    /// window at which the emitted row becomes unknown. In `[0, 1)`.
    pub xff: f64,
    /// Number of primary data points per consolidated row.
    pub steps: i64,
    /// Ring length: number of consolidated rows kept.
    pub rows: i64,
}

impl ArcDef {
    /// Creates an archive definition.
    pub fn new(consol_fun: ConsolFun, xff: f64, steps: i64, rows: i64) -> Self {
        Self {
            consol_fun,
            xff,
            steps,
            rows,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.xff >= 0.0 && self.xff < 1.0) {
            return Err(RrdError::InvalidDefinition(format!(
                "xff must be in [0, 1), got {}",
                self.xff
            )));
        }
        if self.steps <= 0 {
            return Err(RrdError::InvalidDefinition(format!(
                "archive steps must be positive, got {}",
                self.steps
            )));
        }
        if self.rows <= 0 {
            return Err(RrdError::InvalidDefinition(format!(
                "archive rows must be positive, got {}",
                self.rows
            )));
        }
        Ok(())
    }
}

/// Complete definition of a round-robin database.
#[derive(Debug, Clone, PartialEq)]
pub struct RrdDef {
    path: String,
    start_time: i64,
    step: i64,
    version: i32,
    datasources: Vec<DsDef>,
    archives: Vec<ArcDef>,
}

impl RrdDef {
    /// Creates a definition with the given path, start time (seconds since
    /// epoch) and base step (seconds).
    ///
    /// The path may be a plain filesystem path or a URI with an explicit
    /// backend scheme (for example `mem://scratch.rrd`).
    pub fn new(path: impl Into<String>, start_time: i64, step: i64) -> Self {
        Self {
            path: path.into(),
            start_time,
            step,
            version: FORMAT_VERSION,
            datasources: Vec::new(),
            archives: Vec::new(),
        }
    }

    /// Creates a definition with an explicit on-disk format version.
    pub fn with_version(
        path: impl Into<String>,
        start_time: i64,
        step: i64,
        version: i32,
    ) -> Self {
        let mut def = Self::new(path, start_time, step);
        def.version = version;
        def
    }

    /// Adds a datasource. Declaration order fixes the on-disk layout.
    pub fn add_datasource(&mut self, ds: DsDef) -> &mut Self {
        self.datasources.push(ds);
        self
    }

    /// Adds an archive. Declaration order fixes the on-disk layout.
    pub fn add_archive(&mut self, arc: ArcDef) -> &mut Self {
        self.archives.push(arc);
        self
    }

    /// The storage path or URI.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Replaces the storage path, keeping the structure.
    ///
    /// Useful to recreate an empty, structurally identical database at a
    /// different location from the definition returned by
    /// [`crate::RrdDb::rrd_def`].
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Initial last-update time of the database (seconds since epoch).
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Base sampling step (seconds).
    pub fn step(&self) -> i64 {
        self.step
    }

    /// On-disk format version.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// The declared datasources, in declaration order.
    pub fn datasources(&self) -> &[DsDef] {
        &self.datasources
    }

    /// The declared archives, in declaration order.
    pub fn archives(&self) -> &[ArcDef] {
        &self.archives
    }

    /// Checks the full definition against the creation invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::InvalidDefinition`] for a non-positive step,
    /// missing datasources or archives, duplicate datasource names,
    /// duplicate `(consolidation function, steps)` archive pairs, an
    /// unsupported version, or any invalid member definition.
    pub fn validate(&self) -> Result<()> {
        if self.step <= 0 {
            return Err(RrdError::InvalidDefinition(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        if self.start_time < 0 {
            return Err(RrdError::InvalidDefinition(format!(
                "start time must not be negative, got {}",
                self.start_time
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(RrdError::InvalidDefinition(format!(
                "unsupported format version {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        if self.datasources.is_empty() {
            return Err(RrdError::InvalidDefinition(
                "at least one datasource is required".to_string(),
            ));
        }
        if self.archives.is_empty() {
            return Err(RrdError::InvalidDefinition(
                "at least one archive is required".to_string(),
            ));
        }
        for (i, ds) in self.datasources.iter().enumerate() {
            ds.validate()?;
            if self.datasources[..i].iter().any(|d| d.name == ds.name) {
                return Err(RrdError::InvalidDefinition(format!(
                    "duplicate datasource name {:?}",
                    ds.name
                )));
            }
        }
        for (i, arc) in self.archives.iter().enumerate() {
            arc.validate()?;
            if self.archives[..i]
                .iter()
                .any(|a| a.consol_fun == arc.consol_fun && a.steps == arc.steps)
            {
                return Err(RrdError::InvalidDefinition(format!(
                    "duplicate archive {}/{}",
                    arc.consol_fun, arc.steps
                )));
            }
        }
        Ok(())
    }

    /// Exact byte size of a database created from this definition.
    ///
    /// The size is the sum of the widths of every cell in declaration
    /// order; the backend is sized to exactly this length at creation.
    pub fn byte_size(&self) -> u64 {
        let ds_count = self.datasources.len() as u64;
        // Header: signature, step, ds count, arc count, last update, info.
        let header = (SIGNATURE_CAPACITY + INFO_CAPACITY) as u64 + 4 * 8;
        // Datasource: name, type tag, heartbeat, min, max, last value,
        // accumulated value, unknown seconds.
        let per_ds = (DS_NAME_CAPACITY + TAG_CAPACITY) as u64 + 6 * 8;
        // Archive: cf tag, rows, steps, xff, per-datasource state pair,
        // per-datasource robin (values plus write pointer).
        let arcs: u64 = self
            .archives
            .iter()
            .map(|arc| {
                let rows = arc.rows as u64;
                TAG_CAPACITY as u64 + 3 * 8 + ds_count * 2 * 8 + ds_count * (rows * 8 + 8)
            })
            .sum();
        header + ds_count * per_ds + arcs
    }
}

fn nan_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}
