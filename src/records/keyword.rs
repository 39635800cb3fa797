use serde::Deserialize;
use serde::Serialize;

use super::Kind;
use super::Record;

/// One classification keyword (`name:parent:description` on disk).
/// Keywords form a flat forest: `parent` is empty for roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub name: String,
    pub parent: String,
    pub description: String,
    pub backend: String,
}

impl Record for Keyword {
    type Key = String;

    const KIND: Kind = Kind::Keywords;

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
