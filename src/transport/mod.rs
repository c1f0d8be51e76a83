//! UDP Transport
//!
//! One socket per process. The receive loop reads each datagram into a fresh
//! buffer, parses the envelope, and hands the rest to the role's
//! [`MsgHandler`] on the shared [`CommandPool`] so that handler work never
//! blocks the I/O task.
//!
//! Replies returned by a handler go to the sender named *inside* the
//! envelope, not to the datagram's UDP source: a forwarded request answers
//! the node that originally built it.

pub mod pool;
pub mod server;


pub use pool::{Command, CommandPool, DEFAULT_POOL_WORKERS};
pub use server::{MsgHandler, UdpServer};
