//! Durable state for the Vigil tracker (`PostgreSQL`).
//!
//! The tracker keeps one current-state row per entity plus an append-only
//! transition history. All writes go through the [`StateStore`] trait so the
//! tracker can run against `PostgreSQL` in production and an in-memory store
//! in tests.
//!
//! # Architecture
//!
//! ```text
//! Tracker rivers
//!     |
//!     +-- StateStore ----> PgStateStore     (pool, migrations/)
//!                     +--> MemoryStateStore (tests, local runs)
//! ```
//!
//! # Modules
//!
//! - [`store`] -- the [`StateStore`] trait and its value types
//! - [`pg_store`] -- connection settings, conditional upserts and history queries
//! - [`memory`] -- in-memory store with the same semantics
//! - [`error`] -- Shared error types

pub mod error;
pub mod memory;
pub mod pg_store;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStateStore;
pub use pg_store::{PgStateStore, PostgresConfig};
pub use store::{
    EntityStateRecord, PriorState, SnapshotState, StateChange, StateStore, TransitionOutcome,
    TransitionPair,
};
