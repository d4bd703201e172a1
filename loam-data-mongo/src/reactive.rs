use crate::convert::ConversionService;
use crate::database::RepoDatabaseConfig;
use crate::driver::{AsyncMongoDriver, CodecProvider, DeleteResult, InsertManyResult, UpdateResult};
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

/// Non-blocking repository operations: the same pipeline as the blocking
/// adapter, composed over an async driver. Results complete with success,
/// empty or failure; cancellation and backpressure belong to the driver's
/// async primitives.
///
/// Decoration and conversion run through the same pure
/// [`MongoOperationsCore`] the blocking adapter uses, so both execution
/// models share one set of semantics.
pub struct ReactiveMongoRepositoryOperations<D> {
    core: MongoOperationsCore,
    driver: Arc<D>,
}

impl<D: AsyncMongoDriver + 'static> ReactiveMongoRepositoryOperations<D> {
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

    pub fn core(&self) -> &MongoOperationsCore {
        &self.core
    }

    pub async fn find_one<E, R>(
        &self,
        prepared: &MongoPreparedQuery<E, R>,
    ) -> Result<Option<R>, DataError>
    where
        R: DeserializeOwned + 'static,
    {
        let stored = prepared.stored();
        match stored.command() {
            MongoCommand::Find { .. } => {
                let mut options = self.core.find_options(prepared)?;
                options.limit = Some(1);
                log_find(stored.collection(), &options);
                let documents = self
                    .driver
                    .find(stored.database(), stored.collection(), &options)
                    .await?;
                self.core.convert_one(stored, documents.into_iter().next())
            }
            MongoCommand::Aggregate { .. } => {
                let pipeline = prepared.pipeline_documents()?;
                let options = build_aggregate_options(stored.options_config());
                log_aggregate(stored.collection(), &pipeline, &options);
                let documents = self
                    .driver
                    .aggregate(stored.database(), stored.collection(), &pipeline, &options)
                    .await?;
                self.core.convert_one(stored, documents.into_iter().next())
            }
            _ => Err(DataError::illegal_state(format!(
                "query '{}' is not executable as a find",
                stored.name()
            ))),
        }
    }

    pub async fn find_all<E, R>(
        &self,
        prepared: &MongoPreparedQuery<E, R>,
    ) -> Result<Vec<R>, DataError>
    where
        R: DeserializeOwned + 'static,
    {
        let stored = prepared.stored();
        match stored.command() {
            MongoCommand::Find { .. } => {
                let options = self.core.find_options(prepared)?;
                log_find(stored.collection(), &options);
                let documents = self
                    .driver
                    .find(stored.database(), stored.collection(), &options)
                    .await?;
                self.core.convert_many(stored, documents)
            }
            MongoCommand::Aggregate { .. } => {
                let pipeline = prepared.pipeline_documents()?;
                let options = build_aggregate_options(stored.options_config());
                log_aggregate(stored.collection(), &pipeline, &options);
                let documents = self
                    .driver
                    .aggregate(stored.database(), stored.collection(), &pipeline, &options)
                    .await?;
                self.core.convert_many(stored, documents)
            }
            _ => Err(DataError::illegal_state(format!(
                "query '{}' is not executable as a find",
                stored.name()
            ))),
        }
    }

    pub async fn find_page<E, R>(
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
            .find(stored.database(), stored.collection(), &options)
            .await?;
        let content = self.core.convert_many(stored, documents)?;
        let total = self.count(prepared).await?;
        Ok(Page::new(content, pageable, total))
    }

    pub async fn count<E, R>(&self, prepared: &MongoPreparedQuery<E, R>) -> Result<u64, DataError> {
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
        let documents = self
            .driver
            .aggregate(stored.database(), stored.collection(), &pipeline, &options)
            .await?;
        self.core.count_from(documents.into_iter().next())
    }

    pub async fn exists<E, R>(&self, prepared: &MongoPreparedQuery<E, R>) -> Result<bool, DataError> {
        Ok(self.count(prepared).await? != 0)
    }

    pub async fn execute_update<E, R>(
        &self,
        prepared: &MongoPreparedQuery<E, R>,
    ) -> Result<UpdateResult, DataError> {
        let stored = prepared.stored();
        let update = prepared.update_document()?;
        let filter = prepared.filter_document()?.unwrap_or_default();
        let options = build_update_options(stored.options_config());
        self.driver
            .update_many(stored.database(), stored.collection(), filter, update, &options)
            .await
    }

    pub async fn execute_delete<E, R>(
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
            .await
    }

    pub async fn persist<E: Entity>(
        &self,
        ctx: &QueryContext,
        entity: &E,
    ) -> Result<(), DataError> {
        let meta = self.core.entities().get::<E>();
        let database = self.core.database_for(ctx);
        let codec = self.core.codec_registry(&database);
        let document = codec.encode(entity)?;
        self.driver
            .insert_one(
                &database,
                meta.persisted_name(),
                document,
                &InsertOneOptions::default(),
            )
            .await
    }

    pub async fn persist_all<E: Entity>(
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
        self.driver
            .insert_many(
                &database,
                meta.persisted_name(),
                documents,
                &InsertManyOptions::default(),
            )
            .await
    }

    pub async fn replace<E: Entity>(
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
        let result = self
            .driver
            .replace_one(
                &database,
                meta.persisted_name(),
                filter,
                replacement,
                &options,
            )
            .await?;
        if !upsert {
            self.core
                .check_version_matched(&meta, "replace", result.matched_count)?;
        }
        Ok(result)
    }

    pub async fn delete_entity<E: Entity>(
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
        let result = self
            .driver
            .delete(&database, meta.persisted_name(), filter, &options)
            .await?;
        self.core
            .check_version_matched(&meta, "delete", result.deleted_count)?;
        Ok(result)
    }
}
