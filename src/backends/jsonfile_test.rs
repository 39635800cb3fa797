use super::jsonfile::JsonFileBackend;
use super::Backend;
use super::Loaded;
use super::Store;
use crate::config::JsonBackendConfig;
use crate::config::PathsConfig;
use crate::errors::Error;
use crate::errors::StorageError;
use crate::records::Machine;
use crate::records::MachineStatus;

fn backend_in(dir: &std::path::Path) -> JsonFileBackend {
    let mut paths = PathsConfig::default();
    paths.json_dir = dir.join("state");
    let backend = JsonFileBackend::new(&paths, &JsonBackendConfig::default());
    assert!(backend.initialize().expect("initialize"));
    backend
}

fn machine(
    mid: u32,
    hostname: &str,
) -> Machine {
    Machine {
        mid,
        hostname: hostname.to_owned(),
        ether: String::new(),
        expiry: None,
        status: MachineStatus::Unknown,
        backend: String::new(),
    }
}

#[test]
fn missing_document_loads_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = backend_in(dir.path());

    let Loaded {
        records,
        needs_rewrite,
    } = Store::<Machine>::load(&backend).expect("load");

    assert!(records.is_empty());
    assert!(!needs_rewrite);
}

#[test]
fn machines_round_trip_sorted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = backend_in(dir.path());

    let machines = vec![machine(2, "beta"), machine(1, "alpha")];
    Store::<Machine>::save(&backend, &machines).expect("save");

    let Loaded { records, .. } = Store::<Machine>::load(&backend).expect("load");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].mid, 1);
    assert_eq!(records[0].hostname, "alpha");
    // Ownership is stamped on load.
    assert_eq!(records[0].backend, "jsonfile");
}

#[test]
fn registry_resolves_by_kind_and_name() {
    use std::sync::Arc;

    use super::BackendRegistry;
    use super::ShadowBackend;
    use crate::records::Kind;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut paths = PathsConfig::default();
    paths.json_dir = dir.path().join("state");

    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(ShadowBackend::new(&paths)));
    registry.register(Arc::new(JsonFileBackend::new(
        &paths,
        &JsonBackendConfig::default(),
    )));

    let machine_capable = registry.find_compatibles(Kind::Machines);
    assert_eq!(machine_capable.len(), 1);
    assert_eq!(machine_capable[0].name(), "jsonfile");
    assert_eq!(registry.find_compatibles(Kind::Users).len(), 2);

    registry.set_enabled("jsonfile", false).expect("disable");
    assert!(!registry.find("jsonfile").expect("find").is_enabled());
    assert!(registry.set_enabled("nosuch", true).is_err());
}

#[test]
fn garbage_document_reports_corrupt_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = backend_in(dir.path());
    std::fs::write(dir.path().join("state/machines.json"), "{not json").expect("seed");

    match Store::<Machine>::load(&backend) {
        Err(Error::Storage(StorageError::CorruptData { .. })) => {}
        other => panic!("expected CorruptData, got {other:?}"),
    }
}
