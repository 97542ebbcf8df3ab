//! veidemann-store — read-only access to Veidemann crawl state.
//!
//! Wraps the RethinkDB database the crawler writes to and hands out typed
//! records and ordered changefeeds.
//!
//! # Architecture
//!
//! ```text
//! DocumentStore (trait)
//!   ├── RethinkStore  ← JSON wire protocol V1_0 + SCRAM-SHA-256
//!   └── MemoryStore   ← in-process double for tests
//!
//! raw JSON document ──► records::*::from_document ──► typed record
//! ```
//!
//! Documents are decoded exactly once, at this boundary. Optional fields of
//! the wrong type read as absent; a document that is not an object is a
//! [`StoreError::MalformedRecord`].

pub mod error;
pub mod memory;
pub mod records;
pub mod rethinkdb;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use records::*;
pub use rethinkdb::{ConnectOptions, RethinkStore};
pub use store::{CHANGEFEED_BUFFER, ChangeStream, DocumentStore, REQUIRED_TABLES};
