//! rrdb - Round-Robin Database storage engine
//!
//! This crate provides a fixed-size, self-contained time-series store whose
//! on-disk footprint never grows after creation. A database holds a header,
//! one or more datasources (the signals being measured) and one or more
//! round-robin archives that keep consolidated samples at different
//! resolutions.
//!
//! # Components
//!
//! - [`RrdDb`]: create, open, update and fetch round-robin databases
//! - [`RrdDef`] / [`DsDef`] / [`ArcDef`]: database structure definitions
//! - [`Sample`], [`FetchRequest`], [`FetchData`]: value objects across the
//!   update and query boundaries
//! - [`backend`]: pluggable byte-addressable storage (file, in-memory)
//!
//! # Example
//!
//! ```rust,ignore
//! use rrdb::{ArcDef, ConsolFun, DsDef, DsType, FetchRequest, RrdDb, RrdDef};
//!
//! // Describe the database: one gauge, one averaging archive.
//! let mut def = RrdDef::new("speed.rrd", 0, 300);
//! def.add_datasource(DsDef::new("speed", DsType::Gauge, 600, 0.0, f64::NAN));
//! def.add_archive(ArcDef::new(ConsolFun::Average, 0.5, 1, 600));
//!
//! // Create it, feed samples, read back consolidated values.
//! let mut db = RrdDb::create(&def)?;
//! let mut sample = db.create_sample(300);
//! sample.set_value(0, 42.0)?;
//! db.update(&sample)?;
//!
//! let data = db.fetch(&FetchRequest::new(ConsolFun::Average, 0, 900))?;
//! println!("{:?}", data.values(0));
//! db.close()?;
//! ```
//!
//! # Concurrency
//!
//! A database is a single-writer structure: every operation takes `&mut
//! self`, which is the exclusive per-database guard. Wrap an [`RrdDb`] in a
//! `Mutex` to share it between threads. The backend is owned exclusively by
//! one database instance; opening the same URI twice concurrently is the
//! caller's responsibility.

#![deny(missing_docs)]

pub mod backend;
pub mod cell;
pub mod db;
pub mod def;
pub mod error;

pub use db::fetch::{FetchData, FetchRequest};
pub use db::sample::Sample;
pub use db::RrdDb;
pub use def::{ArcDef, ConsolFun, DsDef, DsType, RrdDef};
pub use error::{Result, RrdError};
