use serde::Deserialize;
use serde::Serialize;

use super::Kind;
use super::Record;
use crate::constants::STANDARD_ID_FLOOR;

/// One group record, mirroring `group(5)` + `gshadow(5)` plus the extended
/// metadata file (`name:description:skeleton`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub password: String,
    pub members: Vec<String>,
    pub description: String,
    pub skel: String,
    pub backend: String,
}

impl Group {
    pub fn is_system(&self) -> bool {
        self.gid < STANDARD_ID_FLOOR
    }

    pub fn has_member(
        &self,
        login: &str,
    ) -> bool {
        self.members.iter().any(|m| m == login)
    }
}

impl Record for Group {
    type Key = u32;

    const KIND: Kind = Kind::Groups;

    fn key(&self) -> u32 {
        self.gid
    }

    fn index_name(&self) -> &str {
        &self.name
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
