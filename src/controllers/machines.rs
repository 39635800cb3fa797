//! Machine controller.
//!
//! Unlike the account controllers, machine mutations are frequent (status
//! flips reported by monitoring) and touch one record at a time. Attribute
//! updates therefore run under the machine's own registry lock and skip the
//! giant entirely; only structural changes (add, delete) take it.

use std::sync::Arc;

use tracing::info;

use super::CoreController;
use crate::backends::Store;
use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;
use crate::events::EventDispatcher;
use crate::locking::LockRegistry;
use crate::records::Kind;
use crate::records::Machine;
use crate::records::MachineStatus;

#[derive(Debug, Clone, Default)]
pub struct AddMachine {
    pub hostname: String,
    pub ether: String,
    pub expiry: Option<i64>,
}

pub struct MachinesController {
    core: CoreController<Machine>,
    locks: Arc<LockRegistry>,
}

impl MachinesController {
    pub fn new(
        locks: Arc<LockRegistry>,
        stores: Vec<Arc<dyn Store<Machine>>>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            core: CoreController::new(&locks, stores, events),
            locks,
        }
    }

    pub fn core(&self) -> &CoreController<Machine> {
        &self.core
    }

    pub fn by_mid(
        &self,
        mid: u32,
    ) -> Option<Machine> {
        self.core.get(&mid)
    }

    pub fn by_hostname(
        &self,
        hostname: &str,
    ) -> Option<Machine> {
        self.core.get_by_name(hostname)
    }

    pub fn add_machine(
        &self,
        request: AddMachine,
    ) -> Result<Machine> {
        if request.hostname.is_empty() {
            return Err(Error::invalid_name(
                Kind::Machines,
                &request.hostname,
                "empty",
            ));
        }
        let preferred = self.core.find_preferred_backend()?;

        let event = Event::new("machine_added")
            .with_kind(Kind::Machines)
            .with_subject(&request.hostname);

        let machine = self.core.mutate(Some(event), |state| {
            if state.contains_name(&request.hostname) {
                return Err(Error::already_exists(Kind::Machines, &request.hostname));
            }
            let mid = state.keys().max().map(|mid| mid + 1).unwrap_or(1);

            let machine = Machine {
                mid,
                hostname: request.hostname.clone(),
                ether: request.ether.clone(),
                expiry: request.expiry,
                status: MachineStatus::Unknown,
                backend: preferred.name().to_owned(),
            };
            state.insert(machine.clone());
            Ok(machine)
        })?;

        info!(hostname = %machine.hostname, mid = machine.mid, "machine added");
        Ok(machine)
    }

    pub fn delete_machine(
        &self,
        mid: u32,
    ) -> Result<Machine> {
        let entity = self.locks.entity("machines", &mid.to_string());
        let _entity = entity.lock();

        let event = Event::new("machine_deleted")
            .with_kind(Kind::Machines)
            .with_subject(mid.to_string());

        let machine = self.core.mutate(Some(event), |state| {
            state
                .remove(&mid)
                .ok_or_else(|| Error::does_not_exist(Kind::Machines, mid))
        })?;

        self.locks.forget_entity("machines", &mid.to_string());
        info!(hostname = %machine.hostname, mid, "machine deleted");
        Ok(machine)
    }

    /// Record a status report for one machine.
    pub fn update_status(
        &self,
        mid: u32,
        status: MachineStatus,
    ) -> Result<()> {
        let entity = self.locks.entity("machines", &mid.to_string());
        let _entity = entity.lock();

        let event = Event::new("machine_status_changed")
            .with_kind(Kind::Machines)
            .with_subject(mid.to_string())
            .with_data(serde_json::to_value(status).unwrap_or_default());

        self.core.mutate_entity(Some(event), |state| {
            match state.get_mut(&mid) {
                Some(machine) => {
                    machine.status = status;
                    Ok(())
                }
                None => Err(Error::does_not_exist(Kind::Machines, mid)),
            }
        })
    }

    /// Update the recorded hardware address, e.g. after a NIC swap.
    pub fn update_ether(
        &self,
        mid: u32,
        ether: &str,
    ) -> Result<()> {
        let entity = self.locks.entity("machines", &mid.to_string());
        let _entity = entity.lock();

        let event = Event::new("machine_ether_changed")
            .with_kind(Kind::Machines)
            .with_subject(mid.to_string());

        self.core.mutate_entity(Some(event), |state| {
            match state.get_mut(&mid) {
                Some(machine) => {
                    machine.ether = ether.to_owned();
                    Ok(())
                }
                None => Err(Error::does_not_exist(Kind::Machines, mid)),
            }
        })
    }

    /// Machines whose lease or registration expired before `now`.
    pub fn expired(
        &self,
        now: i64,
    ) -> Vec<Machine> {
        self.core
            .all()
            .into_iter()
            .filter(|machine| machine.expiry.map(|expiry| expiry < now).unwrap_or(false))
            .collect()
    }
}
