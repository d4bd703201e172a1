use crate::convert::ConversionService;
use crate::database::RepoDatabaseConfig;
use crate::driver::{CodecProvider, DeleteResult, InsertManyResult, MongoDriver, UpdateResult};
use crate::operations::{log_aggregate, log_find, MongoOperationsCore};
use crate::options::{
    build_aggregate_options, build_delete_options, build_replace_options, build_update_options,
    AggregateOptions, DeleteOptions, InsertManyOptions, InsertOneOptions,
};
use crate::query::{MongoCommand, MongoPreparedQuery};
use bson::doc;
use loam_data::{
    DataError, Entity, EntityRegistry, Page, Pageable, QueryContext, QueryOptionsConfig,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Blocking repository operations: every call executes on the caller's
/// thread and returns the converted result directly.
///
/// All decoration, filter construction and result conversion is delegated to
/// the shared [`MongoOperationsCore`]; this adapter only sequences the
/// driver calls. For one prepared query the sequence is strictly resolve
/// database, resolve codec, execute, convert.
pub struct MongoRepositoryOperations<D> {
    core: MongoOperationsCore,
    driver: Arc<D>,
}

impl<D: MongoDriver + 'static> MongoRepositoryOperations<D> {
    pub fn new(
        entities: EntityRegistry,
        conversion: Arc<ConversionService>,
        databases: RepoDatabaseConfig,
        driver: Arc<D>,
    ) -> Self {
        let codecs: Arc<dyn CodecProvider> = driver.clone();
        Self {
            core: MongoOperationsCore::new(entities, conversion, databases, codecs),
            driver,
        }
    }

    /// The shared pure core, also usable to decorate queries up front.
    pub fn core(&self) -> &MongoOperationsCore {
        &self.core
    }

    /// Execute a find- or aggregate-flavored query and convert at most one
    /// result.
    pub fn find_one<E, R>(&self, prepared: &MongoPreparedQuery<E, R>) -> Result<Option<R>, DataError>
    where
        R: DeserializeOwned + 'static,
    {
        let stored = prepared.stored();
        match stored.command() {
            MongoCommand::Find { .. } => {
                let mut options = self.core.find_options(prepared)?;
                options.limit = Some(1);
                log_find(stored.collection(), &options);
                let documents =
                    self.driver
                        .find(stored.database(), stored.collection(), &options)?;
                self.core.convert_one(stored, documents.into_iter().next())
            }
            MongoCommand::Aggregate { .. } => {
                // Resolve the pipeline once; logging and execution share it.
                let pipeline = prepared.pipeline_documents()?;
                let options = build_aggregate_options(stored.options_config());
                log_aggregate(stored.collection(), &pipeline, &options);
                let documents = self.driver.aggregate(
                    stored.database(),
                    stored.collection(),
                    &pipeline,
                    &options,
                )?;
                self.core.convert_one(stored, documents.into_iter().next())
            }
            _ => Err(DataError::illegal_state(format!(
                "query '{}' is not executable as a find",
                stored.name()
            ))),
        }
    }

    /// Execute a find- or aggregate-flavored query and convert every result.
    pub fn find_all<E, R>(&self, prepared: &MongoPreparedQuery<E, R>) -> Result<Vec<R>, DataError>
    where
        R: DeserializeOwned + 'static,
    {
        let stored = prepared.stored();
        match stored.command() {
            MongoCommand::Find { .. } => {
                let options = self.core.find_options(prepared)?;
                log_find(stored.collection(), &options);
                let documents =
                    self.driver
                        .find(stored.database(), stored.collection(), &options)?;
                self.core.convert_many(stored, documents)
            }
            MongoCommand::Aggregate { .. } => {
                let pipeline = prepared.pipeline_documents()?;
                let options = build_aggregate_options(stored.options_config());
                log_aggregate(stored.collection(), &pipeline, &options);
                let documents = self.driver.aggregate(
                    stored.database(),
                    stored.collection(),
                    &pipeline,
                    &options,
                )?;
                self.core.convert_many(stored, documents)
            }
            _ => Err(DataError::illegal_state(format!(
                "query '{}' is not executable as a find",
                stored.name()
            ))),
        }
    }

    /// Execute a find-flavored query as one page of results plus the total.
    pub fn find_page<E, R>(
        &self,
        prepared: &MongoPreparedQuery<E, R>,
        pageable: &Pageable,
    ) -> Result<Page<R>, DataError>
    where
        R: DeserializeOwned + 'static,
    {
        let stored = prepared.stored();
        if !matches!(stored.command(), MongoCommand::Find { .. }) {
            return Err(DataError::illegal_state(format!(
                "query '{}' cannot be paged",
                stored.name()
            )));
        }
        let mut options = self.core.find_options(prepared)?;
        options.limit = Some(pageable.size as i64);
        options.skip = Some(pageable.offset());
        if options.sort.is_none() {
            if let Some((field, ascending)) = pageable.sort_spec() {
                options.sort = Some(doc! { field: if ascending { 1 } else { -1 } });
            }
        }
        log_find(stored.collection(), &options);
        let documents = self
            .driver
            .find(stored.database(), stored.collection(), &options)?;
        let content = self.core.convert_many(stored, documents)?;
        let total = self.count(prepared)?;
        Ok(Page::new(content, pageable, total))
    }

    /// Count the documents a find- or aggregate-flavored query matches.
    pub fn count<E, R>(&self, prepared: &MongoPreparedQuery<E, R>) -> Result<u64, DataError> {
        let stored = prepared.stored();
        let pipeline = match stored.command() {
            MongoCommand::Find { .. } => self.core.count_pipeline(prepared.filter_document()?),
            MongoCommand::Aggregate { .. } => {
                let mut pipeline = prepared.pipeline_documents()?;
                pipeline.push(doc! { "$count": "totalCount" });
                pipeline
            }
            _ => {
                return Err(DataError::illegal_state(format!(
                    "query '{}' is not countable",
                    stored.name()
                )))
            }
        };
        let options = AggregateOptions::default();
        log_aggregate(stored.collection(), &pipeline, &options);
        let documents =
            self.driver
                .aggregate(stored.database(), stored.collection(), &pipeline, &options)?;
        self.core.count_from(documents.into_iter().next())
    }

    pub fn exists<E, R>(&self, prepared: &MongoPreparedQuery<E, R>) -> Result<bool, DataError> {
        Ok(self.count(prepared)? != 0)
    }

    /// Execute an update-flavored query against every matching document.
    pub fn execute_update<E, R>(
        &self,
        prepared: &MongoPreparedQuery<E, R>,
    ) -> Result<UpdateResult, DataError> {
        let stored = prepared.stored();
        let update = prepared.update_document()?;
        let filter = prepared.filter_document()?.unwrap_or_default();
        let options = build_update_options(stored.options_config());
        self.driver
            .update_many(stored.database(), stored.collection(), filter, update, &options)
    }

    /// Execute a delete-flavored query. Deletes all matches unless the
    /// query's options requested single-delete semantics.
    pub fn execute_delete<E, R>(
        &self,
        prepared: &MongoPreparedQuery<E, R>,
    ) -> Result<DeleteResult, DataError> {
        let stored = prepared.stored();
        if !matches!(stored.command(), MongoCommand::Delete { .. }) {
            return Err(DataError::illegal_state(format!(
                "expected query '{}' to be delete-flavored",
                stored.name()
            )));
        }
        let filter = prepared.filter_document()?.unwrap_or_default();
        let options = build_delete_options(stored.options_config());
        self.driver
            .delete(stored.database(), stored.collection(), filter, &options)
    }

    /// Insert one entity.
    pub fn persist<E: Entity>(&self, ctx: &QueryContext, entity: &E) -> Result<(), DataError> {
        let meta = self.core.entities().get::<E>();
        let database = self.core.database_for(ctx);
        let codec = self.core.codec_registry(&database);
        let document = codec.encode(entity)?;
        self.driver.insert_one(
            &database,
            meta.persisted_name(),
            document,
            &InsertOneOptions::default(),
        )
    }

    /// Insert a batch of entities.
    pub fn persist_all<E: Entity>(
        &self,
        ctx: &QueryContext,
        entities: &[E],
    ) -> Result<InsertManyResult, DataError> {
        let meta = self.core.entities().get::<E>();
        let database = self.core.database_for(ctx);
        let codec = self.core.codec_registry(&database);
        let documents = entities
            .iter()
            .map(|entity| codec.encode(entity))
            .collect::<Result<Vec<_>, _>>()?;
        self.driver.insert_many(
            &database,
            meta.persisted_name(),
            documents,
            &InsertManyOptions::default(),
        )
    }

    /// Replace one entity, filtered by identifier and (when declared)
    /// version from the entity's current snapshot. A version-checked replace
    /// that matches nothing fails with an optimistic-lock error.
    pub fn replace<E: Entity>(
        &self,
        ctx: &QueryContext,
        entity: &E,
        config: &QueryOptionsConfig,
    ) -> Result<UpdateResult, DataError> {
        let meta = self.core.entities().get::<E>();
        let database = self.core.database_for(ctx);
        let codec = self.core.codec_registry(&database);
        let filter = self.core.filter_id_and_version(&codec, &meta, entity)?;
        let replacement = codec.encode(entity)?;
        let options = build_replace_options(config);
        let upsert = options.upsert;
        let result = self.driver.replace_one(
            &database,
            meta.persisted_name(),
            filter,
            replacement,
            &options,
        )?;
        if !upsert {
            self.core
                .check_version_matched(&meta, "replace", result.matched_count)?;
        }
        Ok(result)
    }

    /// Delete one entity by its identifier-and-version filter. Entity
    /// deletes are single unless the configuration requests multi.
    pub fn delete_entity<E: Entity>(
        &self,
        ctx: &QueryContext,
        entity: &E,
        config: &QueryOptionsConfig,
    ) -> Result<DeleteResult, DataError> {
        let meta = self.core.entities().get::<E>();
        let database = self.core.database_for(ctx);
        let codec = self.core.codec_registry(&database);
        let filter = self.core.filter_id_and_version(&codec, &meta, entity)?;
        let options = DeleteOptions {
            multi: config.multi.unwrap_or(false),
            collation: config.collation.clone(),
        };
        let result =
            self.driver
                .delete(&database, meta.persisted_name(), filter, &options)?;
        self.core
            .check_version_matched(&meta, "delete", result.deleted_count)?;
        Ok(result)
    }
}
