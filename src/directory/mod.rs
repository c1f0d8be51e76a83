//! Worker Directory
//!
//! The replicated, eventually-consistent mapping from worker name to
//! `(address, key range)`.
//!
//! The master owns the authoritative copy ([`MasterDirectory`]): it allocates
//! names, remembers who it has heard from, and keeps a needs-push flag per
//! worker so list changes fan out through the do-list. Workers keep a cache
//! ([`WorkerDirectory`]) fed by the master's name-list pushes and per-name
//! record fetches; the cache is what request routing consults and it may lag
//! the master.

pub mod master_list;
pub mod types;
pub mod worker_list;

#[cfg(test)]
mod tests;

pub use master_list::{MasterDirectory, MasterEntry};
pub use types::{NetworkAddress, WorkerRecord};
pub use worker_list::{WorkerDirectory, WorkerEntry};
