//! TinyDb: an embedded document database in a single file.
//!
//! Documents are BSON, held in fixed-size pages behind an LRU cache.
//! Durability comes from a page-image write-ahead log; multi-operation
//! transactions buffer in an overlay the query pipeline merges; queries run
//! through a cost-ranked planner that picks between primary-key lookup,
//! index seek, index range scan and a table scan with byte-level predicate
//! pushdown.
//!
//! ```no_run
//! use tinydb::{Engine, EngineOptions};
//! use bson::doc;
//!
//! # fn main() -> tinydb::Result<()> {
//! let engine = Engine::open("app.db", EngineOptions::default())?;
//! let users = engine.collection("users")?;
//! users.insert(doc! { "_id": "u1", "name": "Ana", "age": 30 })?;
//! for doc in users.find(Some("age >= 21"))? {
//!     println!("{}", doc?);
//! }
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod collection;
pub mod engine;
pub mod errors;
pub mod index;
pub mod mapper;
pub mod options;
pub mod query;
pub mod raw;
pub mod storage;
pub mod transaction;

pub use engine::{
    CollectionHandle, CredentialScheme, Engine, EngineStats, FindOptions, Pbkdf2Sha256,
    Transaction, TypedCollection,
};
pub use errors::{Error, NotFoundKind, Result};
pub use mapper::{BsonMapper, EntityMapper};
pub use options::{EngineOptions, WriteConcern};
pub use query::{ExecutionPlan, Expr, Strategy, field, val};
pub use storage::header::SecurityMetadata;

// The value model is the `bson` crate's; re-export it for callers.
pub use bson;
