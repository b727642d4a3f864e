//! Integration tests for database lifecycle: creation, reopening, dump
//! stability, definition round-trips, state copying and close semantics.

use rrdb::backend::memory::MemoryBackendFactory;
use rrdb::backend::{self, RrdBackendFactory};
use rrdb::{ArcDef, ConsolFun, DsDef, DsType, FetchRequest, RrdDb, RrdDef, RrdError};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

static NEXT_DB: AtomicU64 = AtomicU64::new(0);

fn mem_path(tag: &str) -> String {
    format!("mem://life-{}-{}.rrd", tag, NEXT_DB.fetch_add(1, Ordering::Relaxed))
}

fn speed_def(path: &str) -> RrdDef {
    let mut def = RrdDef::new(path, 0, 300);
    def.add_datasource(DsDef::new("speed", DsType::Gauge, 600, 0.0, f64::NAN));
    def.add_archive(ArcDef::new(ConsolFun::Average, 0.5, 1, 10));
    def.add_archive(ArcDef::new(ConsolFun::Average, 0.5, 6, 10));
    def
}

fn feed(db: &mut RrdDb) {
    for (i, value) in [10.0, 20.0, 30.0].iter().enumerate() {
        let mut sample = db.create_sample((i as i64 + 1) * 300);
        sample.set_value(0, *value).unwrap();
        db.update(&sample).unwrap();
    }
}

#[test]
fn test_reopen_binds_identical_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reopen.rrd");
    let path = path.to_str().unwrap();

    let mut db = RrdDb::create(&speed_def(path)).unwrap();
    feed(&mut db);
    db.close().unwrap();

    let mut db = RrdDb::open(path, false).unwrap();
    assert_eq!(db.last_update_time().unwrap(), 900);
    assert_eq!(db.ds_names().unwrap(), vec!["speed".to_string()]);

    let data = db
        .fetch(&FetchRequest::new(ConsolFun::Average, 0, 900).with_resolution(300))
        .unwrap();
    let values = data.values(0);
    assert!(values[0].is_nan());
    assert_eq!(&values[1..], &[10.0, 20.0, 30.0]);

    // The reopened database keeps accepting samples where it left off.
    let mut sample = db.create_sample(1200);
    sample.set_value(0, 40.0).unwrap();
    db.update(&sample).unwrap();
    assert_eq!(db.last_update_time().unwrap(), 1200);
    db.close().unwrap();
}

#[test]
fn test_dump_is_stable_across_reopens() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dump.rrd");
    let path = path.to_str().unwrap();

    let mut db = RrdDb::create(&speed_def(path)).unwrap();
    feed(&mut db);
    let before = db.dump().unwrap();
    db.close().unwrap();

    let mut db = RrdDb::open(path, true).unwrap();
    let after = db.dump().unwrap();
    assert_eq!(before, after);

    // And once more, to rule out drift in the dump itself.
    assert_eq!(db.dump().unwrap(), after);
    db.close().unwrap();
}

#[test]
fn test_rrd_def_roundtrip() {
    let path = mem_path("roundtrip");
    let def = speed_def(&path);
    let mut db = RrdDb::create(&def).unwrap();

    let mut rebuilt = db.rrd_def().unwrap();
    rebuilt.set_path(def.path());
    assert_eq!(rebuilt, def);

    // The rebuilt definition creates a structurally identical database.
    let copy_path = mem_path("roundtrip-copy");
    rebuilt.set_path(&copy_path);
    let mut copy = RrdDb::create(&rebuilt).unwrap();
    assert_eq!(copy.datasource_count(), db.datasource_count());
    assert_eq!(copy.archive_count(), db.archive_count());
    assert_eq!(copy.bytes().unwrap().len() as u64, rebuilt.byte_size());

    copy.close().unwrap();
    db.close().unwrap();
    MemoryBackendFactory::forget(&path);
    MemoryBackendFactory::forget(&copy_path);
}

#[test]
fn test_copy_state_matches_archives_by_function_and_steps() {
    let path_a = mem_path("copy-a");
    let path_b = mem_path("copy-b");

    let mut def_a = RrdDef::new(&path_a, 0, 300);
    def_a.add_datasource(DsDef::new("speed", DsType::Gauge, 600, 0.0, f64::NAN));
    def_a.add_archive(ArcDef::new(ConsolFun::Average, 0.5, 1, 10));
    def_a.add_archive(ArcDef::new(ConsolFun::Max, 0.5, 1, 10));

    // Same structure with the archive declaration order reversed.
    let mut def_b = RrdDef::new(&path_b, 0, 300);
    def_b.add_datasource(DsDef::new("speed", DsType::Gauge, 600, 0.0, f64::NAN));
    def_b.add_archive(ArcDef::new(ConsolFun::Max, 0.5, 1, 10));
    def_b.add_archive(ArcDef::new(ConsolFun::Average, 0.5, 1, 10));

    let mut db_a = RrdDb::create(&def_a).unwrap();
    let mut db_b = RrdDb::create(&def_b).unwrap();
    feed(&mut db_a);

    db_a.copy_state_to(&mut db_b).unwrap();
    assert_eq!(db_b.last_update_time().unwrap(), 900);

    for consol_fun in [ConsolFun::Average, ConsolFun::Max] {
        let request = FetchRequest::new(consol_fun, 0, 900).with_resolution(300);
        let from_a = db_a.fetch(&request).unwrap();
        let from_b = db_b.fetch(&request).unwrap();
        assert_eq!(from_a.timestamps(), from_b.timestamps());
        for (x, y) in from_a.values(0).iter().zip(from_b.values(0)) {
            assert!(x == y || (x.is_nan() && y.is_nan()));
        }
    }

    db_a.close().unwrap();
    db_b.close().unwrap();
    MemoryBackendFactory::forget(&path_a);
    MemoryBackendFactory::forget(&path_b);
}

#[test]
fn test_copy_to_foreign_signature_is_incompatible() {
    let path_a = mem_path("sig-a");
    let path_b = mem_path("sig-b");

    let mut db_a = RrdDb::create(&speed_def(&path_a)).unwrap();
    let mut db_b = RrdDb::create(&speed_def(&path_b)).unwrap();
    db_b.close().unwrap();

    // Rewrite the target's signature bytes behind its back; the memory
    // factory does not validate headers on open.
    let factory = MemoryBackendFactory;
    let mut raw = factory.open(&path_b, false).unwrap();
    raw.write(0, b"XXDB").unwrap();
    raw.close().unwrap();

    let mut db_b = RrdDb::open(&path_b, false).unwrap();
    assert!(matches!(
        db_a.copy_state_to(&mut db_b),
        Err(RrdError::IncompatibleCopy(_))
    ));

    db_a.close().unwrap();
    db_b.close().unwrap();
    MemoryBackendFactory::forget(&path_a);
    MemoryBackendFactory::forget(&path_b);
}

#[test]
fn test_closed_database_rejects_operations() {
    let path = mem_path("closed");
    let mut db = RrdDb::create(&speed_def(&path)).unwrap();
    feed(&mut db);
    db.close().unwrap();
    assert!(db.is_closed());

    let sample = db.create_sample(1200);
    assert!(matches!(db.update(&sample), Err(RrdError::Closed)));
    assert!(matches!(
        db.fetch(&FetchRequest::new(ConsolFun::Average, 0, 900)),
        Err(RrdError::Closed)
    ));
    assert!(matches!(db.dump(), Err(RrdError::Closed)));
    assert!(matches!(db.rrd_def(), Err(RrdError::Closed)));
    assert!(matches!(db.info(), Err(RrdError::Closed)));
    assert!(matches!(db.set_info("x"), Err(RrdError::Closed)));
    assert!(matches!(db.bytes(), Err(RrdError::Closed)));
    assert!(matches!(db.ds_names(), Err(RrdError::Closed)));

    // Close is idempotent.
    db.close().unwrap();
    MemoryBackendFactory::forget(&path);
}

#[test]
fn test_open_missing_database_not_found() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.rrd");
    assert!(matches!(
        RrdDb::open(path.to_str().unwrap(), false),
        Err(RrdError::NotFound(_))
    ));
}

#[test]
fn test_file_factory_validates_signature() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corrupt.rrd");
    let path = path.to_str().unwrap();

    let mut db = RrdDb::create(&speed_def(path)).unwrap();
    db.close().unwrap();

    // Stomp the signature on disk.
    let mut bytes = std::fs::read(path).unwrap();
    bytes[0] = b'X';
    std::fs::write(path, bytes).unwrap();

    assert!(matches!(
        RrdDb::open(path, false),
        Err(RrdError::Backend(_))
    ));
}

#[test]
fn test_read_only_open_serves_fetches_but_not_updates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("readonly.rrd");
    let path = path.to_str().unwrap();

    let mut db = RrdDb::create(&speed_def(path)).unwrap();
    feed(&mut db);
    db.close().unwrap();

    let mut db = RrdDb::open(path, true).unwrap();
    let data = db
        .fetch(&FetchRequest::new(ConsolFun::Average, 0, 900).with_resolution(300))
        .unwrap();
    assert_eq!(data.values(0)[3], 30.0);

    let mut sample = db.create_sample(1200);
    sample.set_value(0, 40.0).unwrap();
    assert!(db.update(&sample).is_err());
    db.close().unwrap();
}

#[test]
fn test_info_string_persists() {
    let path = mem_path("info");
    let mut db = RrdDb::create(&speed_def(&path)).unwrap();
    assert_eq!(db.info().unwrap(), "");
    db.set_info("collected by probe 7").unwrap();
    assert_eq!(db.info().unwrap(), "collected by probe 7");

    // Beyond the fixed capacity the setter refuses.
    assert!(db.set_info(&"x".repeat(200)).is_err());
    db.close().unwrap();

    let mut db = RrdDb::open(&path, false).unwrap();
    assert_eq!(db.info().unwrap(), "collected by probe 7");
    db.close().unwrap();
    MemoryBackendFactory::forget(&path);
}

#[test]
fn test_bytes_matches_definition_size() {
    let path = mem_path("size");
    let def = speed_def(&path);
    let mut db = RrdDb::create(&def).unwrap();
    assert_eq!(db.bytes().unwrap().len() as u64, def.byte_size());
    db.close().unwrap();
    MemoryBackendFactory::forget(&path);
}

#[test]
fn test_structure_queries() {
    let path = mem_path("queries");
    let mut db = RrdDb::create(&speed_def(&path)).unwrap();

    assert_eq!(db.datasource_count(), 1);
    assert_eq!(db.archive_count(), 2);
    assert_eq!(db.ds_index("speed").unwrap(), 0);
    assert!(db.contains_ds("speed").unwrap());
    assert!(!db.contains_ds("rpm").unwrap());
    assert!(matches!(
        db.ds_index("rpm"),
        Err(RrdError::UnknownDatasource(_))
    ));
    assert_eq!(db.archive_index(ConsolFun::Average, 6).unwrap(), 1);
    assert!(matches!(
        db.archive_index(ConsolFun::Max, 1),
        Err(RrdError::UnknownArchive { .. })
    ));
    assert_eq!(db.uri(), path);
    assert_eq!(format!("mem://{}", db.path()), path);

    db.close().unwrap();
    MemoryBackendFactory::forget(&path);
}

#[test]
fn test_last_archive_update_time_tracks_rows() {
    let path = mem_path("arc-time");
    let mut db = RrdDb::create(&speed_def(&path)).unwrap();
    feed(&mut db);

    // The fine archive has written up to 900; the six-step archive has
    // not completed a window yet.
    assert_eq!(db.last_archive_update_time().unwrap(), 900);
    assert_eq!(db.last_update_time().unwrap(), 900);

    db.close().unwrap();
    MemoryBackendFactory::forget(&path);
}

#[test]
fn test_default_factory_locked_after_first_database() {
    let path = mem_path("lock");
    let db = RrdDb::create(&speed_def(&path)).unwrap();
    assert!(matches!(
        backend::set_default_factory("MEMORY"),
        Err(RrdError::Backend(_))
    ));
    drop(db);
    MemoryBackendFactory::forget(&path);
}
