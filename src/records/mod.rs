//! Entity records held by the controllers.
//!
//! Every record kind carries its own attributes plus the name of the
//! backend currently owning its persistence; records of one controller may
//! be split across several backends at the same time.

mod group;
mod keyword;
mod machine;
mod privilege;
mod user;

pub use group::*;
pub use keyword::*;
pub use machine::*;
pub use privilege::*;
pub use user::*;

use std::fmt;
use std::fmt::Display;
use std::hash::Hash;

/// The entity kinds the core manages. This is the explicit dispatch tag
/// used wherever a backend or controller is selected by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Users,
    Groups,
    Machines,
    Privileges,
    Keywords,
}

impl Kind {
    /// Name of the controller serving this kind, also the lock registry key.
    pub fn controller_name(&self) -> &'static str {
        match self {
            Kind::Users => "users",
            Kind::Groups => "groups",
            Kind::Machines => "machines",
            Kind::Privileges => "privileges",
            Kind::Keywords => "keywords",
        }
    }

    fn singular(&self) -> &'static str {
        match self {
            Kind::Users => "user",
            Kind::Groups => "group",
            Kind::Machines => "machine",
            Kind::Privileges => "privilege",
            Kind::Keywords => "keyword",
        }
    }
}

impl Display for Kind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.singular())
    }
}

/// Common shape of an entity record.
///
/// The key is unique within the owning controller for the record's
/// lifetime; `index_name` feeds the controller's secondary lookup cache
/// (login for users, name for the string-keyed kinds).
pub trait Record: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Ord + Display + Send + Sync;

    const KIND: Kind;

    fn key(&self) -> Self::Key;

    fn index_name(&self) -> &str;

    /// Name of the backend owning persistence for this record.
    fn backend(&self) -> &str;

    fn set_backend(
        &mut self,
        name: &str,
    );
}
