use crate::convert::{convert_result, CodecRegistry, ConversionService};
use crate::database::RepoDatabaseConfig;
use crate::driver::{CodecProvider, DatabaseHandle};
use crate::options::{build_find_options, AggregateOptions, FindOptions};
use crate::query::{MongoCommand, MongoPreparedQuery, MongoStoredQuery};
use bson::{doc, Bson, Document};
use loam_data::{DataError, Entity, EntityRegistry, PersistentEntity, PreparedQuery, QueryContext, StoredQuery};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Target for query diagnostics.
pub const QUERY_TARGET: &str = "loam::query";

/// Pure, execution-model-free core shared by the blocking and reactive
/// repository operations: query decoration, database resolution, filter
/// construction and result conversion. Performs no I/O; both adapters feed
/// it with driver output.
pub struct MongoOperationsCore {
    entities: EntityRegistry,
    conversion: Arc<ConversionService>,
    databases: RepoDatabaseConfig,
    codecs: Arc<dyn CodecProvider>,
}

impl MongoOperationsCore {
    pub fn new(
        entities: EntityRegistry,
        conversion: Arc<ConversionService>,
        databases: RepoDatabaseConfig,
        codecs: Arc<dyn CodecProvider>,
    ) -> Self {
        Self {
            entities,
            conversion,
            databases,
            codecs,
        }
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn conversion(&self) -> &ConversionService {
        &self.conversion
    }

    pub fn databases(&self) -> &RepoDatabaseConfig {
        &self.databases
    }

    /// Resolve the target database for an entity accessed through
    /// `repository`. Deterministic within an execution context.
    pub fn database_for(&self, ctx: &QueryContext) -> DatabaseHandle {
        self.databases.resolve(ctx.repository())
    }

    pub fn codec_registry(&self, database: &DatabaseHandle) -> Arc<CodecRegistry> {
        self.codecs.codec_registry(database)
    }

    /// Decorate a generic stored query into its backend-specific form:
    /// resolve entity metadata, target database and codec registry, and pick
    /// the update-flavored variant iff the query carries an update-document
    /// payload. No I/O happens at decoration time.
    pub fn decorate_stored<E: Entity, R: 'static>(
        &self,
        ctx: &QueryContext,
        stored: Arc<StoredQuery<E, R>>,
    ) -> Result<MongoStoredQuery<E, R>, DataError> {
        let entity = self.entities.get::<E>();
        let database = self.database_for(ctx);
        let codec = self.codecs.codec_registry(&database);
        let command = MongoCommand::from_stored(&stored)?;
        Ok(MongoStoredQuery::new(
            stored, entity, database, codec, command,
        ))
    }

    /// Decorate a generic prepared query, deferring parameter resolution to
    /// the point of execution.
    pub fn decorate_prepared<E: Entity, R: 'static>(
        &self,
        ctx: &QueryContext,
        prepared: PreparedQuery<E, R>,
    ) -> Result<MongoPreparedQuery<E, R>, DataError> {
        let (stored, arguments) = prepared.into_parts();
        let decorated = Arc::new(self.decorate_stored(ctx, stored)?);
        Ok(decorated.bind(arguments))
    }

    /// Build the filter for a version-checked update or delete of an entity
    /// instance: the identifier's persisted value, plus the version's
    /// persisted value iff the entity declares one.
    ///
    /// Values are read from `value`'s current state, so callers must pass
    /// the pre-update snapshot.
    pub fn filter_id_and_version<E: Entity>(
        &self,
        codec: &CodecRegistry,
        entity: &PersistentEntity,
        value: &E,
    ) -> Result<Document, DataError> {
        let snapshot = codec.encode(value)?;
        let mut filter = Document::new();
        let id_field = entity.id().persisted_name();
        filter.insert(id_field, snapshot.get(id_field).cloned().unwrap_or(Bson::Null));
        if let Some(version) = entity.version() {
            filter.insert(
                version.persisted_name(),
                snapshot.get(version.persisted_name()).cloned().unwrap_or(Bson::Null),
            );
        }
        Ok(filter)
    }

    /// Build the two-field document representing a join-table-style
    /// association row, keyed by each side's persisted entity name and
    /// holding each side's identifier value.
    pub fn association<P: Entity, C: Entity>(
        &self,
        codec: &CodecRegistry,
        parent: &P,
        child: &C,
    ) -> Result<Document, DataError> {
        let parent_meta = self.entities.get::<P>();
        let child_meta = self.entities.get::<C>();
        let mut document = Document::new();
        document.insert(
            parent_meta.persisted_name(),
            entity_id_value(codec, &parent_meta, parent)?,
        );
        document.insert(
            child_meta.persisted_name(),
            entity_id_value(codec, &child_meta, child)?,
        );
        Ok(document)
    }

    /// Assemble find options for one execution: declarative configuration
    /// plus the invocation's resolved filter.
    pub fn find_options<E, R>(
        &self,
        prepared: &MongoPreparedQuery<E, R>,
    ) -> Result<FindOptions, DataError> {
        let mut options = build_find_options(prepared.stored().options_config())?;
        options.filter = prepared.filter_document()?;
        Ok(options)
    }

    /// Pipeline counting the documents matched by `filter`.
    pub fn count_pipeline(&self, filter: Option<Document>) -> Vec<Document> {
        let mut pipeline = Vec::new();
        if let Some(filter) = filter {
            if !filter.is_empty() {
                pipeline.push(doc! { "$match": filter });
            }
        }
        pipeline.push(doc! { "$count": "totalCount" });
        pipeline
    }

    /// Unwrap a `$count` result document into the total.
    pub fn count_from(&self, result: Option<Document>) -> Result<u64, DataError> {
        match result {
            None => Ok(0),
            some => convert_result(&self.conversion, "_id", some, false),
        }
    }

    /// Convert one raw result document according to the declared result
    /// shape. Full-entity results hydrate through the codec registry; every
    /// other shape goes through the field-count disambiguation.
    pub fn convert_one<E, R>(
        &self,
        stored: &MongoStoredQuery<E, R>,
        document: Option<Document>,
    ) -> Result<Option<R>, DataError>
    where
        R: DeserializeOwned + 'static,
    {
        match document {
            None => Ok(None),
            Some(document) => {
                if stored.result_is_entity() {
                    stored.codec().decode::<R>(document).map(Some)
                } else {
                    convert_result(
                        &self.conversion,
                        stored.entity().id().persisted_name(),
                        Some(document),
                        stored.is_dto_projection(),
                    )
                    .map(Some)
                }
            }
        }
    }

    pub fn convert_many<E, R>(
        &self,
        stored: &MongoStoredQuery<E, R>,
        documents: Vec<Document>,
    ) -> Result<Vec<R>, DataError>
    where
        R: DeserializeOwned + 'static,
    {
        documents
            .into_iter()
            .map(|document| {
                self.convert_one(stored, Some(document))?.ok_or_else(|| {
                    DataError::illegal_state("present document converted to nothing")
                })
            })
            .collect()
    }

    /// Fail a version-checked write that matched nothing: the entity was
    /// modified concurrently since it was read. Entities without a version
    /// property are never checked.
    pub fn check_version_matched(
        &self,
        entity: &PersistentEntity,
        operation: &str,
        matched: u64,
    ) -> Result<(), DataError> {
        if entity.version().is_some() && matched == 0 {
            return Err(DataError::OptimisticLock(format!(
                "{operation} on '{}' matched no document for the id/version filter",
                entity.persisted_name()
            )));
        }
        Ok(())
    }
}

fn entity_id_value<E: Entity>(
    codec: &CodecRegistry,
    entity: &PersistentEntity,
    value: &E,
) -> Result<Bson, DataError> {
    let snapshot = codec.encode(value)?;
    Ok(snapshot
        .get(entity.id().persisted_name())
        .cloned()
        .unwrap_or(Bson::Null))
}

/// Describe a `find` for diagnostic output. Built only when debug logging
/// for the query target is enabled.
pub fn log_find(collection: &str, options: &FindOptions) {
    if !tracing::enabled!(target: QUERY_TARGET, tracing::Level::DEBUG) {
        return;
    }
    let mut description = format!(
        "Executing 'find' on '{collection}' with filter: {}",
        options
            .filter
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "{}".to_string())
    );
    if let Some(sort) = &options.sort {
        description.push_str(&format!(" sort: {sort}"));
    }
    if let Some(projection) = &options.projection {
        description.push_str(&format!(" projection: {projection}"));
    }
    if let Some(collation) = &options.collation {
        description.push_str(&format!(" collation: {collation:?}"));
    }
    tracing::debug!(target: QUERY_TARGET, "{description}");
}

/// Describe an `aggregate` for diagnostic output. Takes the already
/// resolved pipeline so stage serialization happens at most once per
/// execution.
pub fn log_aggregate(collection: &str, pipeline: &[Document], options: &AggregateOptions) {
    if !tracing::enabled!(target: QUERY_TARGET, tracing::Level::DEBUG) {
        return;
    }
    let stages: Vec<String> = pipeline.iter().map(|stage| stage.to_string()).collect();
    let mut description =
        format!("Executing 'aggregate' on '{collection}' with pipeline: [{}]", stages.join(", "));
    if let Some(collation) = &options.collation {
        description.push_str(&format!(" collation: {collation:?}"));
    }
    tracing::debug!(target: QUERY_TARGET, "{description}");
}
