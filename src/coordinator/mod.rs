//! Coordinator: request dispatch, era updates and worker registration.
//!
//! - `Coordinator`: serves worker requests, publishes eras
//! - `EntryService`: assigns roles to remote worker hosts

pub mod dispatcher;
pub mod entry;


pub use dispatcher::{congress_size, Coordinator, CoordinatorConfig, SnapshotSource};
pub use entry::{request_entry, EntryService, RoleAssigner};
