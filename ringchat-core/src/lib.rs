//! Wire protocol, identifiers, and ambient types shared by every peer.
//!
//! This crate has no network or concurrency code of its own; it is the pure
//! vocabulary (`NodeId`, `Relation`, `Message`/`Verb`, `LogicalClock`,
//! `RingConfig`) that `ringchat-node` builds the connection state machine
//! out of.

mod clock;
pub use clock::LogicalClock;

mod id;
pub use id::NodeId;

mod relation;
pub use relation::Relation;

pub mod message;
pub use message::{Message, Verb, MAGIC};

pub mod error;
pub use error::{Error, ProtocolError, Result};

pub mod config;
pub use config::RingConfig;
