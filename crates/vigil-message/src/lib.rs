//! Decoded rapid messages and the rules rivers use to select them.
//!
//! Every record on the rapid is decoded once into an immutable [`Message`].
//! A river describes what it wants with a [`Rules`] set and receives a
//! [`Verdict`] for each message:
//!
//! ```text
//! Message --> Rules::evaluate --> Accepted(Packet)
//!                             --> NotInterested(reason)   (silent)
//!                             --> Malformed(Problems)     (reported)
//! ```
//!
//! # Modules
//!
//! - [`message`] -- the decoded document and typed three-way accessors
//! - [`rules`] -- demand/require predicates and their evaluation
//! - [`packet`] -- the accepted view handed to listeners
//! - [`error`] -- decode and field access errors

pub mod error;
pub mod message;
pub mod packet;
pub mod rules;

pub use error::{DecodeError, FieldError};
pub use message::{Message, Node, ValueKind};
pub use packet::Packet;
pub use rules::{Problems, Rules, Verdict};
