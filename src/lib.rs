//! System directory core: users, groups, machines, privileges and keywords
//! over pluggable storage backends.
//!
//! The crate is organized around three layers:
//!
//! - [`backends`]: serialized storage (the shadow file family, JSON
//!   documents, flat lists) behind the `Backend`/`Store` traits.
//! - [`controllers`]: in-memory registries with typed CRUD operations,
//!   giant-lock concurrency and lifecycle events.
//! - [`context`]: the composition root tying locks, backends, controllers,
//!   the change watcher and the event dispatcher together.
//!
//! ```no_run
//! use sysdir::config::Settings;
//! use sysdir::CoreContext;
//!
//! fn main() -> sysdir::Result<()> {
//!     let context = CoreContext::bootstrap(Settings::load(None)?)?;
//!     for user in context.users.core().all() {
//!         println!("{} ({})", user.login, user.uid);
//!     }
//!     context.shutdown();
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod context;
pub mod controllers;
pub mod errors;
pub mod events;
pub mod locking;
pub mod records;
pub mod watcher;

pub use context::CoreContext;
pub use errors::Error;
pub use errors::Result;
