//! Distributed Key-Range Directory Cluster Library
//!
//! This library crate defines the core modules that make up the distributed
//! key-range directory. It serves as the foundation for the role binaries
//! (`master`, `worker`, `client`).
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems:
//!
//! - **`codec`**: The framed wire codec. Length-prefixed typed elements and a
//!   message envelope, serialized over a bounded byte buffer in network byte
//!   order.
//! - **`protocol`**: Message kinds, status codes, and the payload structures
//!   exchanged between master, workers, and clients.
//! - **`transport`**: The UDP layer. One socket per process, a receive loop
//!   that dispatches datagrams by message kind, and a bounded command pool so
//!   handler work never runs on the I/O task.
//! - **`dolist`**: The cooperative maintenance scheduler. Registration, list
//!   refresh, and retry commands all re-arm through it.
//! - **`keyspace`**: A worker's slice of the keyspace: the owned string range
//!   and the in-memory key map with first-writer-wins inserts.
//! - **`directory`**: The replicated worker directory. The master owns the
//!   authoritative copy; workers cache what they need for request routing.
//! - **`master`**: The master controller. Registration, name allocation, and
//!   periodic worker-list pushes.
//! - **`worker`**: A worker process. Serves inserts and lookups for keys in
//!   its range and forwards everything else to the rightful owner.
//! - **`client`**: The client collaborator. Submits inserts and lookups and
//!   retries them until the cluster acknowledges.

pub mod client;
pub mod codec;
pub mod directory;
pub mod dolist;
pub mod keyspace;
pub mod master;
pub mod protocol;
pub mod transport;
pub mod worker;
