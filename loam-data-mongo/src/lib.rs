//! # loam-data-mongo — document-store backend for the Loam data layer
//!
//! This crate executes the backend-neutral queries of [`loam_data`] against a
//! MongoDB-style document store. It depends on [`loam_data`] for the stored
//! and prepared query model, and adds query decoration, option building,
//! result conversion, and the blocking and non-blocking repository operations
//! that drive an actual driver.
//!
//! # What's in this crate
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MongoStoredQuery`] | Decorated stored query: database, codec and command flavor resolved once |
//! | [`MongoPreparedQuery`] | Decorated prepared query for one invocation |
//! | [`MongoCommand`] | Tagged command flavor (find, aggregate, update, delete, insert) |
//! | [`MongoOperationsCore`] | Pure decoration, filter-building and conversion core shared by both adapters |
//! | [`MongoRepositoryOperations`] | Blocking repository operations over a [`MongoDriver`] |
//! | [`ReactiveMongoRepositoryOperations`] | Non-blocking repository operations over an [`AsyncMongoDriver`] |
//! | [`RepoDatabaseConfig`] | Startup-built repository-to-database map |
//! | [`ConversionService`] | Scalar conversion with numeric widening/narrowing fallbacks |
//! | [`CodecRegistry`] | Per-database entity codec |
//! | [`MemoryDriver`] | In-process driver implementing both driver traits, for tests |
//!
//! # Quick start
//!
//! ```ignore
//! use loam_data::prelude::*;
//! use loam_data_mongo::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let entities = EntityRegistry::new();
//! let repositories = RepositoryRegistry::new()
//!     .register(RepositoryDef::of::<PersonRepo>().database_name("people"));
//! let databases = RepoDatabaseConfig::build(&repositories, "", "appdb");
//!
//! let driver = Arc::new(MemoryDriver::new());
//! let ops = MongoRepositoryOperations::new(
//!     entities,
//!     Arc::new(ConversionService::new()),
//!     databases,
//!     driver,
//! );
//!
//! let stored = Arc::new(StoredQuery::<Person, Person>::query(
//!     "findById",
//!     json!({ "_id": loam_data::query::placeholder(0) }),
//! ));
//! let ctx = QueryContext::of::<PersonRepo>("find_by_id");
//! let decorated = Arc::new(ops.core().decorate_stored(&ctx, stored)?);
//! let person = ops.find_one(&decorated.bind(vec![json!(7)]))?;
//! ```
//!
//! # Decoration
//!
//! Queries arrive from the data layer backend-neutral. [`MongoOperationsCore`]
//! decorates each one exactly once: the repository's database is resolved
//! through [`RepoDatabaseConfig`], the codec registry is looked up for that
//! database, and the operation kind plus payload collapse into a
//! [`MongoCommand`]. Everything downstream matches on the command flavor
//! instead of re-inspecting the payload.
//!
//! # Drivers
//!
//! The adapters talk to the store through [`MongoDriver`] (blocking) and
//! [`AsyncMongoDriver`] (non-blocking). Both extend [`CodecProvider`], so a
//! driver also owns codec lookup. [`MemoryDriver`] implements all three and
//! backs this crate's tests.
//!
//! # Logging
//!
//! Filters and pipelines are logged at debug level under the
//! [`QUERY_TARGET`] target, and serialized only when that target is enabled:
//!
//! ```text
//! RUST_LOG=loam::query=debug
//! ```

pub mod convert;
pub mod database;
pub mod driver;
pub mod memory;
pub mod operations;
pub mod options;
pub mod query;
pub mod reactive;
pub mod sync;

pub use convert::{CodecRegistry, ConversionService};
pub use database::{MongoDataConfig, RepoDatabaseConfig};
pub use driver::{
    AsyncMongoDriver, CodecProvider, DatabaseHandle, DeleteResult, InsertManyResult, MongoDriver,
    UpdateResult,
};
pub use memory::MemoryDriver;
pub use operations::{MongoOperationsCore, QUERY_TARGET};
pub use options::{
    AggregateOptions, DeleteOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    ReplaceOptions, UpdateOptions,
};
pub use query::{MongoCommand, MongoPreparedQuery, MongoStoredQuery};
pub use reactive::ReactiveMongoRepositoryOperations;
pub use sync::MongoRepositoryOperations;

/// Re-exports of the most commonly used types from both `loam-data` and this
/// crate.
pub mod prelude {
    pub use crate::{
        AsyncMongoDriver, ConversionService, MemoryDriver, MongoCommand, MongoDriver,
        MongoOperationsCore, MongoPreparedQuery, MongoRepositoryOperations, MongoStoredQuery,
        ReactiveMongoRepositoryOperations, RepoDatabaseConfig,
    };
    pub use loam_data::prelude::*;
}
