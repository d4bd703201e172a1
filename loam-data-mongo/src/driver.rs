use crate::convert::CodecRegistry;
use crate::options::{
    AggregateOptions, DeleteOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    ReplaceOptions, UpdateOptions,
};
use bson::Document;
use loam_data::DataError;
use std::future::Future;
use std::sync::Arc;

/// Reference to a resolved target database.
///
/// Resolved once per (entity, repository) pair and shared read-only across
/// concurrent invocations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseHandle {
    name: String,
}

impl DatabaseHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Outcome of a replace or update call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Outcome of a bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertManyResult {
    pub inserted_count: u64,
}

/// Supplies the codec registry for a resolved database.
///
/// Registries are shared, read-only and reused across invocations; a
/// provider must return an equivalent registry for the same handle every
/// time.
pub trait CodecProvider: Send + Sync {
    fn codec_registry(&self, database: &DatabaseHandle) -> Arc<CodecRegistry>;
}

/// Blocking driver surface: the backend-native calls the synchronous
/// repository operations execute, parameterized by the option builders'
/// output.
///
/// Retry, timeout and connection handling are the driver's concern; this
/// layer performs exactly one call per operation.
pub trait MongoDriver: CodecProvider {
    fn find(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DataError>;

    fn aggregate(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        pipeline: &[Document],
        options: &AggregateOptions,
    ) -> Result<Vec<Document>, DataError>;

    fn insert_one(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        document: Document,
        options: &InsertOneOptions,
    ) -> Result<(), DataError>;

    fn insert_many(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        documents: Vec<Document>,
        options: &InsertManyOptions,
    ) -> Result<InsertManyResult, DataError>;

    fn replace_one(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        replacement: Document,
        options: &ReplaceOptions,
    ) -> Result<UpdateResult, DataError>;

    fn update_many(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, DataError>;

    fn delete(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult, DataError>;
}

/// Non-blocking driver surface mirroring [`MongoDriver`].
///
/// Uses return-position `impl Future` (no `async-trait` box). Cancellation
/// and backpressure are delegated to the driver's own async primitives.
pub trait AsyncMongoDriver: CodecProvider {
    fn find(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        options: &FindOptions,
    ) -> impl Future<Output = Result<Vec<Document>, DataError>> + Send;

    fn aggregate(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        pipeline: &[Document],
        options: &AggregateOptions,
    ) -> impl Future<Output = Result<Vec<Document>, DataError>> + Send;

    fn insert_one(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        document: Document,
        options: &InsertOneOptions,
    ) -> impl Future<Output = Result<(), DataError>> + Send;

    fn insert_many(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        documents: Vec<Document>,
        options: &InsertManyOptions,
    ) -> impl Future<Output = Result<InsertManyResult, DataError>> + Send;

    fn replace_one(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        replacement: Document,
        options: &ReplaceOptions,
    ) -> impl Future<Output = Result<UpdateResult, DataError>> + Send;

    fn update_many(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> impl Future<Output = Result<UpdateResult, DataError>> + Send;

    fn delete(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        options: &DeleteOptions,
    ) -> impl Future<Output = Result<DeleteResult, DataError>> + Send;
}
