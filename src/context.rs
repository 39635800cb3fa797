//! Composition root.
//!
//! `CoreContext::bootstrap` wires the whole core in dependency order:
//! lock registry, event dispatcher, backends, controllers, then (server
//! role only) the change watcher with its reload callbacks. There is no
//! global state; everything hangs off the context the caller holds.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;
use tracing::info;

use crate::backends::Backend;
use crate::backends::BackendRegistry;
use crate::backends::JsonFileBackend;
use crate::backends::ShadowBackend;
use crate::backends::SimpleFileBackend;
use crate::backends::Store;
use crate::config::Settings;
use crate::controllers::GroupsController;
use crate::controllers::KeywordsController;
use crate::controllers::MachinesController;
use crate::controllers::PrivilegesController;
use crate::controllers::UsersController;
use crate::errors::Result;
use crate::events::EventDispatcher;
use crate::locking::LockRegistry;
use crate::records::Group;
use crate::records::Keyword;
use crate::records::Machine;
use crate::records::Privilege;
use crate::records::User;
use crate::watcher::ChangeWatcher;
use crate::watcher::ReloadFn;

pub struct CoreContext {
    pub settings: Settings,
    pub locks: Arc<LockRegistry>,
    pub backends: BackendRegistry,
    pub events: Arc<EventDispatcher>,
    pub users: Arc<UsersController>,
    pub groups: Arc<GroupsController>,
    pub machines: Arc<MachinesController>,
    pub privileges: Arc<PrivilegesController>,
    pub keywords: Arc<KeywordsController>,
    watcher: Option<ChangeWatcher>,
}

impl CoreContext {
    pub fn bootstrap(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let locks = Arc::new(LockRegistry::new());

        let events = Arc::new(EventDispatcher::new());
        if settings.is_server() {
            events.start(settings.dispatcher.workers);
        }

        let shadow = Arc::new(ShadowBackend::new(&settings.paths));
        let jsonfile = Arc::new(JsonFileBackend::new(
            &settings.paths,
            &settings.backends.jsonfile,
        ));
        let simplefile = Arc::new(SimpleFileBackend::new(&settings.paths));

        shadow.initialize()?;
        jsonfile.initialize()?;
        simplefile.initialize()?;

        let mut backends = BackendRegistry::new();
        backends.register(Arc::clone(&shadow) as Arc<dyn Backend>);
        backends.register(Arc::clone(&jsonfile) as Arc<dyn Backend>);
        backends.register(Arc::clone(&simplefile) as Arc<dyn Backend>);

        let users = Arc::new(UsersController::new(
            &locks,
            vec![
                Arc::clone(&shadow) as Arc<dyn Store<User>>,
                Arc::clone(&jsonfile) as Arc<dyn Store<User>>,
            ],
            Arc::clone(&events),
        ));
        let groups = Arc::new(GroupsController::new(
            &locks,
            vec![
                Arc::clone(&shadow) as Arc<dyn Store<Group>>,
                Arc::clone(&jsonfile) as Arc<dyn Store<Group>>,
            ],
            Arc::clone(&events),
        ));
        let machines = Arc::new(MachinesController::new(
            Arc::clone(&locks),
            vec![Arc::clone(&jsonfile) as Arc<dyn Store<Machine>>],
            Arc::clone(&events),
        ));
        let privileges = Arc::new(PrivilegesController::new(
            &locks,
            vec![Arc::clone(&simplefile) as Arc<dyn Store<Privilege>>],
            Arc::clone(&events),
        ));
        let keywords = Arc::new(KeywordsController::new(
            &locks,
            vec![Arc::clone(&simplefile) as Arc<dyn Store<Keyword>>],
            Arc::clone(&events),
        ));

        // Watches go in before the first load: a load that heals data saves
        // it back, and that save's hint pre-charge must be consumed by the
        // watcher or the counters drift.
        let watcher = if settings.is_server() {
            let watcher =
                ChangeWatcher::new(Duration::from_millis(settings.watcher.settle_delay_ms))?;

            let users_reload = reload_of("users", &users, |c| c.core().reload());
            let groups_reload = reload_of("groups", &groups, |c| c.core().reload());
            let machines_reload = reload_of("machines", &machines, |c| c.core().reload());
            let privileges_reload = reload_of("privileges", &privileges, |c| c.core().reload());
            let keywords_reload = reload_of("keywords", &keywords, |c| c.core().reload());

            shadow.install_watches(&watcher, users_reload.clone(), groups_reload.clone())?;
            jsonfile.install_watches(&watcher, users_reload, groups_reload, machines_reload)?;
            simplefile.install_watches(&watcher, privileges_reload, keywords_reload)?;
            Some(watcher)
        } else {
            None
        };

        users.core().load()?;
        groups.core().load()?;
        machines.core().load()?;
        privileges.core().load()?;
        keywords.core().load()?;

        info!(
            role = if settings.is_server() { "server" } else { "client" },
            "directory core ready"
        );
        Ok(Self {
            settings,
            locks,
            backends,
            events,
            users,
            groups,
            machines,
            privileges,
            keywords,
            watcher,
        })
    }

    /// Orderly teardown: stop watching first so our own final writes do not
    /// schedule reloads, then drain the dispatcher.
    pub fn shutdown(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.stop();
        }
        self.events.stop();
        info!("directory core stopped");
    }
}

fn reload_of<C: Send + Sync + 'static>(
    name: &'static str,
    controller: &Arc<C>,
    reload: impl Fn(&C) -> Result<()> + Send + Sync + 'static,
) -> ReloadFn {
    let controller = Arc::clone(controller);
    Arc::new(move || {
        if let Err(err) = reload(&controller) {
            error!(controller = name, error = %err, "reload failed");
        }
    })
}
