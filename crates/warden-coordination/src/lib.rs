//! `warden-coordination` provides the coordination-service capabilities the
//! scheduler consumes: a durable path-addressed byte store and a
//! leader-election primitive.
//!
//! # Backends
//!
//! | Type                   | Capability        | Scope                              |
//! |------------------------|-------------------|------------------------------------|
//! | [`MemoryStore`]        | store             | single process, tests              |
//! | [`SqliteStore`]        | store             | every process sharing the DB file  |
//! | [`LocalElection`]      | leader election   | candidates within one process      |
//! | [`SqliteLeaseElection`]| leader election   | every process sharing the DB file  |

pub mod db;
pub mod election;
pub mod error;
pub mod lease;
pub mod sqlite_store;
pub mod store;

pub use election::{
    LeaderElection, LeadershipListener, ListenerError, LocalElection, LocalElectionRegistry,
};
pub use error::{CoordinationError, Result};
pub use lease::SqliteLeaseElection;
pub use sqlite_store::SqliteStore;
pub use store::{CoordinationStore, MemoryStore};
