use serde::Deserialize;
use serde::Serialize;

use super::Kind;
use super::Record;

/// One whitelisted system privilege: a group name ordinary administrators
/// may hand out. Persisted one name per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Privilege {
    pub name: String,
    pub backend: String,
}

impl Record for Privilege {
    type Key = String;

    const KIND: Kind = Kind::Privileges;

    fn key(&self) -> String {
        self.name.clone()
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
