use serde::Deserialize;
use serde::Serialize;

use super::Kind;
use super::Record;
use crate::constants::SHADOW_DEFAULT_MAX;
use crate::constants::SHADOW_DEFAULT_WARNING;

/// One account record, mirroring the `passwd(5)` + `shadow(5)` field sets.
///
/// The shadow aging fields are optional: `None` round-trips to an empty
/// field on disk, which is not the same thing as an explicit `0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
    /// Crypt hash from the shadow file, or a locked marker such as `!`.
    pub password: String,
    pub last_change: Option<i64>,
    pub min_days: Option<i64>,
    pub max_days: Option<i64>,
    pub warn_days: Option<i64>,
    pub inactive_days: Option<i64>,
    pub expire_date: Option<i64>,
    pub flag: Option<i64>,
    pub backend: String,
}

impl User {
    /// Shadow aging defaults applied when an entry has to be synthesized
    /// because the shadow file is missing its counterpart line.
    pub fn with_default_aging(mut self) -> Self {
        self.last_change = Some(0);
        self.min_days = Some(0);
        self.max_days = Some(SHADOW_DEFAULT_MAX);
        self.warn_days = Some(SHADOW_DEFAULT_WARNING);
        self
    }

    pub fn is_system(&self) -> bool {
        self.uid < crate::constants::STANDARD_ID_FLOOR
    }
}

impl Record for User {
    type Key = u32;

    const KIND: Kind = Kind::Users;

    fn key(&self) -> u32 {
        self.uid
    }

    fn index_name(&self) -> &str {
        &self.login
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
