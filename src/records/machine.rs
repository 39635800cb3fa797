use serde::Deserialize;
use serde::Serialize;

use super::Kind;
use super::Record;

/// Reachability status of a machine record. Discovery itself lives outside
/// the core; controllers only store what callers report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineStatus {
    Online,
    Asleep,
    Offline,
    Unknown,
}

/// One known machine. Keyed by a stable numeric id so renames and DHCP
/// address changes do not break references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub mid: u32,
    pub hostname: String,
    /// Hardware address, empty when never observed.
    pub ether: String,
    /// Lease/registration expiry as a unix timestamp.
    pub expiry: Option<i64>,
    pub status: MachineStatus,
    pub backend: String,
}

impl Record for Machine {
    type Key = u32;

    const KIND: Kind = Kind::Machines;

    fn key(&self) -> u32 {
        self.mid
    }

    fn index_name(&self) -> &str {
        &self.hostname
    }

    fn backend(&self) -> &str {
        &self.backend
    }

    fn set_backend(
        &mut self,
        name: &str,
    ) {
        self.backend = name.to_owned();
    }
}
