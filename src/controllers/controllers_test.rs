use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::AddGroup;
use super::AddMachine;
use super::AddUser;
use super::GroupsController;
use super::KeywordsController;
use super::MachinesController;
use super::PrivilegesController;
use super::UsersController;
use crate::backends::verify_password;
use crate::backends::Backend;
use crate::backends::JsonFileBackend;
use crate::backends::ShadowBackend;
use crate::backends::SimpleFileBackend;
use crate::backends::Store;
use crate::config::JsonBackendConfig;
use crate::config::PathsConfig;
use crate::errors::EntityError;
use crate::errors::Error;
use crate::errors::StorageError;
use crate::events::EventDispatcher;
use crate::locking::LockRegistry;
use crate::records::MachineStatus;
use crate::records::User;

fn paths_in(dir: &Path) -> PathsConfig {
    let paths = PathsConfig {
        passwd: dir.join("passwd"),
        shadow: dir.join("shadow"),
        group: dir.join("group"),
        gshadow: dir.join("gshadow"),
        group_ext: dir.join("group-ext"),
        privileges: dir.join("privileges"),
        keywords: dir.join("keywords"),
        json_dir: dir.join("json"),
    };
    for file in [
        &paths.passwd,
        &paths.shadow,
        &paths.group,
        &paths.gshadow,
        &paths.group_ext,
    ] {
        std::fs::write(file, "").expect("seed file");
    }
    paths
}

struct Env {
    _dir: tempfile::TempDir,
    paths: PathsConfig,
    locks: Arc<LockRegistry>,
    events: Arc<EventDispatcher>,
    shadow: Arc<ShadowBackend>,
    jsonfile: Arc<JsonFileBackend>,
    simplefile: Arc<SimpleFileBackend>,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(dir.path());
        let shadow = Arc::new(ShadowBackend::new(&paths));
        let jsonfile = Arc::new(JsonFileBackend::new(&paths, &JsonBackendConfig::default()));
        let simplefile = Arc::new(SimpleFileBackend::new(&paths));
        std::fs::create_dir_all(&paths.json_dir).expect("json dir");
        Self {
            _dir: dir,
            paths,
            locks: Arc::new(LockRegistry::new()),
            events: Arc::new(EventDispatcher::new()),
            shadow,
            jsonfile,
            simplefile,
        }
    }

    fn users(&self) -> UsersController {
        UsersController::new(
            &self.locks,
            vec![Arc::clone(&self.shadow) as Arc<dyn Store<User>>],
            Arc::clone(&self.events),
        )
    }

    fn groups(&self) -> GroupsController {
        GroupsController::new(
            &self.locks,
            vec![Arc::clone(&self.shadow) as _],
            Arc::clone(&self.events),
        )
    }

    fn machines(&self) -> MachinesController {
        MachinesController::new(
            Arc::clone(&self.locks),
            vec![Arc::clone(&self.jsonfile) as _],
            Arc::clone(&self.events),
        )
    }

    fn privileges(&self) -> PrivilegesController {
        PrivilegesController::new(
            &self.locks,
            vec![Arc::clone(&self.simplefile) as _],
            Arc::clone(&self.events),
        )
    }

    fn keywords(&self) -> KeywordsController {
        KeywordsController::new(
            &self.locks,
            vec![Arc::clone(&self.simplefile) as _],
            Arc::clone(&self.events),
        )
    }
}

#[test]
fn add_user_allocates_and_persists() {
    let env = Env::new();
    let users = env.users();
    users.core().load().expect("load");

    let user = users
        .add_user(AddUser {
            login: "alice".to_owned(),
            gecos: "Alice".to_owned(),
            ..AddUser::default()
        })
        .expect("add user");

    assert_eq!(user.uid, 1000);
    assert_eq!(user.home, "/home/alice");
    assert_eq!(user.backend, "shadow");
    assert_eq!(user.password, "!");

    let passwd = std::fs::read_to_string(&env.paths.passwd).expect("read passwd");
    assert!(passwd.contains("alice:x:1000:1000:Alice:/home/alice:/bin/bash"));

    // A fresh controller over the same files sees the account.
    let reread = env.users();
    reread.core().load().expect("reload");
    assert!(reread.by_login("alice").is_some());
}

#[test]
fn duplicate_login_and_uid_are_rejected() {
    let env = Env::new();
    let users = env.users();
    users.core().load().expect("load");

    users
        .add_user(AddUser {
            login: "alice".to_owned(),
            uid: Some(1500),
            ..AddUser::default()
        })
        .expect("add user");

    let by_login = users.add_user(AddUser {
        login: "alice".to_owned(),
        ..AddUser::default()
    });
    assert!(by_login.expect_err("duplicate login").is_already_exists());

    let by_uid = users.add_user(AddUser {
        login: "bob".to_owned(),
        uid: Some(1500),
        ..AddUser::default()
    });
    assert!(by_uid.expect_err("duplicate uid").is_already_exists());
}

#[test]
fn system_accounts_allocate_below_the_floor() {
    let env = Env::new();
    let users = env.users();
    users.core().load().expect("load");

    let daemon = users
        .add_user(AddUser {
            login: "svc-backup".to_owned(),
            system: true,
            ..AddUser::default()
        })
        .expect("add system user");

    assert!(daemon.uid >= 100 && daemon.uid < 1000);
    assert!(daemon.is_system());
}

#[test]
fn invalid_login_is_rejected_up_front() {
    let env = Env::new();
    let users = env.users();
    users.core().load().expect("load");

    let result = users.add_user(AddUser {
        login: "no:colons".to_owned(),
        ..AddUser::default()
    });
    match result {
        Err(Error::Entity(EntityError::InvalidName { .. })) => {}
        other => panic!("expected InvalidName, got {other:?}"),
    }
}

#[test]
fn delete_user_removes_and_reports_missing() {
    let env = Env::new();
    let users = env.users();
    users.core().load().expect("load");

    users
        .add_user(AddUser {
            login: "alice".to_owned(),
            ..AddUser::default()
        })
        .expect("add user");
    users.delete_user("alice").expect("delete");
    assert!(users.by_login("alice").is_none());

    let missing = users.delete_user("alice");
    match missing {
        Err(Error::Entity(EntityError::DoesNotExist { .. })) => {}
        other => panic!("expected DoesNotExist, got {other:?}"),
    }

    let passwd = std::fs::read_to_string(&env.paths.passwd).expect("read passwd");
    assert!(!passwd.contains("alice"));
}

#[test]
fn change_password_stores_a_verifiable_hash() {
    let env = Env::new();
    let users = env.users();
    users.core().load().expect("load");

    users
        .add_user(AddUser {
            login: "alice".to_owned(),
            ..AddUser::default()
        })
        .expect("add user");
    users
        .change_password("alice", "correct horse")
        .expect("change password");

    let user = users.by_login("alice").expect("alice");
    assert!(user.password.starts_with("$6$"));
    assert!(verify_password("correct horse", &user.password).expect("verify"));
    assert!(!verify_password("wrong", &user.password).expect("verify"));
    assert!(!verify_password("correct horse", "not-a-crypt-hash").expect("verify"));
}

#[test]
fn lock_and_unlock_toggle_the_hash_prefix() {
    let env = Env::new();
    let users = env.users();
    users.core().load().expect("load");

    users
        .add_user(AddUser {
            login: "alice".to_owned(),
            password: Some("secret".to_owned()),
            ..AddUser::default()
        })
        .expect("add user");

    users.set_locked("alice", true).expect("lock");
    assert!(users.by_login("alice").expect("alice").password.starts_with("!$6$"));

    users.set_locked("alice", false).expect("unlock");
    assert!(users.by_login("alice").expect("alice").password.starts_with("$6$"));
}

#[test]
fn group_membership_add_and_remove_skip_gracefully() {
    let env = Env::new();
    let groups = env.groups();
    groups.core().load().expect("load");

    groups
        .add_group(AddGroup {
            name: "staff".to_owned(),
            members: vec!["alice".to_owned()],
            ..AddGroup::default()
        })
        .expect("add group");

    let added = groups
        .add_users_in_group("staff", &["alice".to_owned(), "bob".to_owned()])
        .expect("add members");
    assert_eq!(added, vec!["bob".to_owned()]);

    let removed = groups
        .delete_users_from_group("staff", &["alice".to_owned(), "ghost".to_owned()])
        .expect("remove members");
    assert_eq!(removed, vec!["alice".to_owned()]);

    let staff = groups.by_name("staff").expect("staff");
    assert_eq!(staff.members, vec!["bob".to_owned()]);
}

#[test]
fn concurrent_disjoint_member_additions_yield_the_union() {
    let env = Env::new();
    let groups = Arc::new(env.groups());
    groups.core().load().expect("load");
    groups
        .add_group(AddGroup {
            name: "staff".to_owned(),
            ..AddGroup::default()
        })
        .expect("add group");

    let first = {
        let groups = Arc::clone(&groups);
        std::thread::spawn(move || {
            groups.add_users_in_group("staff", &["alice".to_owned(), "bob".to_owned()])
        })
    };
    let second = {
        let groups = Arc::clone(&groups);
        std::thread::spawn(move || {
            groups.add_users_in_group("staff", &["carol".to_owned(), "dave".to_owned()])
        })
    };
    first.join().expect("thread").expect("add members");
    second.join().expect("thread").expect("add members");

    let mut members = groups.by_name("staff").expect("staff").members;
    members.sort();
    assert_eq!(
        members,
        vec![
            "alice".to_owned(),
            "bob".to_owned(),
            "carol".to_owned(),
            "dave".to_owned()
        ]
    );
}

#[test]
fn purge_member_sweeps_every_group() {
    let env = Env::new();
    let groups = env.groups();
    groups.core().load().expect("load");

    for name in ["staff", "audio"] {
        groups
            .add_group(AddGroup {
                name: name.to_owned(),
                members: vec!["alice".to_owned()],
                ..AddGroup::default()
            })
            .expect("add group");
    }

    let mut purged = groups.purge_member("alice").expect("purge");
    purged.sort();
    assert_eq!(purged, vec!["audio".to_owned(), "staff".to_owned()]);
    assert!(groups.by_name("staff").expect("staff").members.is_empty());
}

#[test]
fn machines_crud_with_status_updates() {
    let env = Env::new();
    let machines = env.machines();
    machines.core().load().expect("load");

    let machine = machines
        .add_machine(AddMachine {
            hostname: "workstation-1".to_owned(),
            ether: "aa:bb:cc:dd:ee:ff".to_owned(),
            expiry: Some(100),
        })
        .expect("add machine");
    assert_eq!(machine.mid, 1);
    assert_eq!(machine.status, MachineStatus::Unknown);

    machines
        .update_status(machine.mid, MachineStatus::Online)
        .expect("update status");
    assert_eq!(
        machines.by_mid(machine.mid).expect("machine").status,
        MachineStatus::Online
    );

    assert_eq!(machines.expired(200).len(), 1);
    assert!(machines.expired(50).is_empty());

    machines.delete_machine(machine.mid).expect("delete");
    assert!(machines.by_mid(machine.mid).is_none());
}

#[test]
fn status_updates_do_not_wait_on_the_giant() {
    let env = Env::new();
    let machines = Arc::new(env.machines());
    machines.core().load().expect("load");
    let mid = machines
        .add_machine(AddMachine {
            hostname: "workstation-1".to_owned(),
            ether: String::new(),
            expiry: None,
        })
        .expect("add machine")
        .mid;

    // Hold the giant; an attribute update must still get through on its
    // per-machine lock.
    let _giant = machines.core().acquire();

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let worker = {
        let machines = Arc::clone(&machines);
        std::thread::spawn(move || {
            machines
                .update_status(mid, MachineStatus::Online)
                .expect("update status");
            done_tx.send(()).ok();
        })
    };

    done_rx
        .recv_timeout(std::time::Duration::from_secs(2))
        .expect("attribute update blocked on the giant");
    worker.join().expect("thread");
    assert_eq!(
        machines.by_mid(mid).expect("machine").status,
        MachineStatus::Online
    );
}

#[test]
fn privileges_whitelist_round_trip() {
    let env = Env::new();
    let privileges = env.privileges();
    privileges.core().load().expect("load");

    privileges.add_privilege("adm").expect("add");
    assert!(privileges.is_whitelisted("adm"));
    assert!(!privileges.is_whitelisted("root"));
    assert!(privileges
        .add_privilege("adm")
        .expect_err("duplicate")
        .is_already_exists());

    privileges.delete_privilege("adm").expect("delete");
    assert!(!privileges.is_whitelisted("adm"));
}

#[test]
fn keywords_validate_parents_and_reparent_on_delete() {
    let env = Env::new();
    let keywords = env.keywords();
    keywords.core().load().expect("load");

    keywords
        .add_keyword("projects", "", "Project trees")
        .expect("add root");
    keywords
        .add_keyword("acme", "projects", "")
        .expect("add child");
    keywords
        .add_keyword("acme-docs", "acme", "")
        .expect("add grandchild");

    let orphan = keywords.add_keyword("lost", "nonexistent", "");
    match orphan {
        Err(Error::Entity(EntityError::DoesNotExist { .. })) => {}
        other => panic!("expected DoesNotExist, got {other:?}"),
    }

    // Deleting the middle keyword hangs its children off "projects".
    keywords.delete_keyword("acme").expect("delete");
    assert_eq!(
        keywords.by_name("acme-docs").expect("grandchild").parent,
        "projects"
    );
}

#[test]
fn preferred_backend_election_follows_priority() {
    let env = Env::new();
    let users = UsersController::new(
        &env.locks,
        vec![
            Arc::clone(&env.shadow) as Arc<dyn Store<User>>,
            Arc::clone(&env.jsonfile) as Arc<dyn Store<User>>,
        ],
        Arc::clone(&env.events),
    );

    // shadow (1) beats jsonfile (0).
    assert_eq!(
        users.core().find_preferred_backend().expect("elect").name(),
        "shadow"
    );

    // Disabling the champion hands the election to the runner-up.
    env.shadow.set_enabled(false);
    assert_eq!(
        users.core().find_preferred_backend().expect("elect").name(),
        "jsonfile"
    );

    env.jsonfile.set_enabled(false);
    match users.core().find_preferred_backend() {
        Err(Error::Storage(StorageError::NoWritableBackend { controller })) => {
            assert_eq!(controller, "users");
        }
        other => panic!("expected NoWritableBackend, got {:?}", other.map(|s| s.name())),
    }
}

#[test]
fn mutations_emit_lifecycle_events() {
    let env = Env::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);
    env.events.register(
        "user_added",
        Arc::new(move |event| {
            assert_eq!(event.subject, "alice");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    let users = env.users();
    users.core().load().expect("load");
    users
        .add_user(AddUser {
            login: "alice".to_owned(),
            ..AddUser::default()
        })
        .expect("add user");

    // Dispatcher has no worker pool here, delivery is inline.
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_mutations_do_not_emit() {
    let env = Env::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);
    env.events.register(
        "user_deleted",
        Arc::new(move |_event| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    let users = env.users();
    users.core().load().expect("load");
    assert!(users.delete_user("ghost").is_err());

    assert_eq!(counter.load(Ordering::SeqCst), 0);
}
