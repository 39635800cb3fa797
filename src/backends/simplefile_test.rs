use super::simplefile::SimpleFileBackend;
use super::Backend;
use super::Loaded;
use super::Store;
use crate::config::PathsConfig;
use crate::errors::Error;
use crate::errors::StorageError;
use crate::records::Keyword;
use crate::records::Privilege;

fn backend_in(dir: &std::path::Path) -> SimpleFileBackend {
    let mut paths = PathsConfig::default();
    paths.privileges = dir.join("privileges-whitelist.conf");
    paths.keywords = dir.join("keywords.conf");
    let backend = SimpleFileBackend::new(&paths);
    assert!(backend.initialize().expect("initialize"));
    backend
}

#[test]
fn privileges_skip_comments_and_blanks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = backend_in(dir.path());
    std::fs::write(
        dir.path().join("privileges-whitelist.conf"),
        "# administrative groups\n\nadm\nsudo\n",
    )
    .expect("seed");

    let Loaded { records, .. } = Store::<Privilege>::load(&backend).expect("load");
    let names: Vec<&str> = records.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["adm", "sudo"]);
}

#[test]
fn privileges_save_is_sorted_one_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = backend_in(dir.path());

    let records = vec![
        Privilege {
            name: "sudo".to_owned(),
            backend: "simplefile".to_owned(),
        },
        Privilege {
            name: "adm".to_owned(),
            backend: "simplefile".to_owned(),
        },
    ];
    Store::<Privilege>::save(&backend, &records).expect("save");

    let raw = std::fs::read_to_string(dir.path().join("privileges-whitelist.conf"))
        .expect("read");
    assert_eq!(raw, "adm\nsudo\n");
}

#[test]
fn keywords_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = backend_in(dir.path());

    let records = vec![
        Keyword {
            name: "projects".to_owned(),
            parent: String::new(),
            description: "Project trees".to_owned(),
            backend: "simplefile".to_owned(),
        },
        Keyword {
            name: "acme".to_owned(),
            parent: "projects".to_owned(),
            description: String::new(),
            backend: "simplefile".to_owned(),
        },
    ];
    Store::<Keyword>::save(&backend, &records).expect("save");

    let Loaded { records: loaded, .. } = Store::<Keyword>::load(&backend).expect("load");
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].name, "acme");
    assert_eq!(loaded[0].parent, "projects");
    assert_eq!(loaded[1].description, "Project trees");
}

#[test]
fn malformed_keyword_line_is_corrupt_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = backend_in(dir.path());
    std::fs::write(dir.path().join("keywords.conf"), "only-a-name\n").expect("seed");

    match Store::<Keyword>::load(&backend) {
        Err(Error::Storage(StorageError::CorruptData { record, .. })) => {
            assert_eq!(record, "only-a-name");
        }
        other => panic!("expected CorruptData, got {other:?}"),
    }
}
