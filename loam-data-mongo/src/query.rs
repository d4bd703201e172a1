use crate::convert::CodecRegistry;
use crate::driver::DatabaseHandle;
use bson::Document;
use loam_data::query::bind_parameters;
use loam_data::{DataError, OperationKind, PersistentEntity, QueryOptionsConfig, StoredQuery};
use serde_json::Value;
use std::sync::Arc;

/// The resolved command a stored query executes, one variant per flavor.
///
/// The decorator is the sole producer of these variants; operations dispatch
/// on them instead of narrowing instance types at runtime.
#[derive(Debug, Clone)]
pub enum MongoCommand {
    Find { filter: Option<Value> },
    Aggregate { pipeline: Vec<Value> },
    Update { filter: Value, update: Value },
    Delete { filter: Value },
    Insert,
}

impl MongoCommand {
    pub(crate) fn from_stored<E, R>(stored: &StoredQuery<E, R>) -> Result<Self, DataError> {
        let payload = stored.payload();
        // An update-document payload always wins over the plain flavors.
        if let Some(update) = &payload.update {
            let filter = payload.filter.clone().ok_or_else(|| {
                DataError::illegal_state(format!(
                    "update query '{}' carries no filter",
                    stored.name()
                ))
            })?;
            return Ok(MongoCommand::Update {
                filter,
                update: update.clone(),
            });
        }
        if let Some(pipeline) = &payload.pipeline {
            return Ok(MongoCommand::Aggregate {
                pipeline: pipeline.clone(),
            });
        }
        match stored.kind() {
            OperationKind::Delete => Ok(MongoCommand::Delete {
                filter: payload
                    .filter
                    .clone()
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            }),
            OperationKind::Insert => Ok(MongoCommand::Insert),
            _ => Ok(MongoCommand::Find {
                filter: payload.filter.clone(),
            }),
        }
    }
}

/// A [`StoredQuery`] decorated for the document backend: bound to its
/// resolved entity metadata, target database, codec registry and command
/// flavor. Immutable and reused across invocations; produced only by the
/// stored-query decorator.
pub struct MongoStoredQuery<E, R> {
    source: Arc<StoredQuery<E, R>>,
    entity: Arc<PersistentEntity>,
    database: DatabaseHandle,
    codec: Arc<CodecRegistry>,
    command: MongoCommand,
}

impl<E, R> MongoStoredQuery<E, R> {
    pub(crate) fn new(
        source: Arc<StoredQuery<E, R>>,
        entity: Arc<PersistentEntity>,
        database: DatabaseHandle,
        codec: Arc<CodecRegistry>,
        command: MongoCommand,
    ) -> Self {
        Self {
            source,
            entity,
            database,
            codec,
            command,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn source(&self) -> &Arc<StoredQuery<E, R>> {
        &self.source
    }

    pub fn entity(&self) -> &Arc<PersistentEntity> {
        &self.entity
    }

    /// The collection this query targets.
    pub fn collection(&self) -> &str {
        self.entity.persisted_name()
    }

    pub fn database(&self) -> &DatabaseHandle {
        &self.database
    }

    pub fn codec(&self) -> &Arc<CodecRegistry> {
        &self.codec
    }

    pub fn command(&self) -> &MongoCommand {
        &self.command
    }

    pub fn options_config(&self) -> &QueryOptionsConfig {
        self.source.options_config()
    }

    pub fn is_dto_projection(&self) -> bool {
        self.source.is_dto_projection()
    }

    pub fn result_is_entity(&self) -> bool {
        self.source.result_is_entity()
    }

    /// Whether this query decorated into the update-flavored variant.
    pub fn is_update(&self) -> bool {
        matches!(self.command, MongoCommand::Update { .. })
    }

    /// Bind runtime arguments for one invocation.
    pub fn bind(self: &Arc<Self>, arguments: Vec<Value>) -> MongoPreparedQuery<E, R> {
        MongoPreparedQuery {
            stored: Arc::clone(self),
            arguments,
        }
    }
}

impl<E, R> std::fmt::Debug for MongoStoredQuery<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStoredQuery")
            .field("name", &self.source.name())
            .field("collection", &self.entity.persisted_name())
            .field("database", &self.database)
            .field("command", &self.command)
            .finish()
    }
}

/// A [`MongoStoredQuery`] bound to one invocation's argument values.
/// Parameter placeholders resolve lazily, at the point of execution.
pub struct MongoPreparedQuery<E, R> {
    stored: Arc<MongoStoredQuery<E, R>>,
    arguments: Vec<Value>,
}

impl<E, R> MongoPreparedQuery<E, R> {
    pub fn stored(&self) -> &Arc<MongoStoredQuery<E, R>> {
        &self.stored
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    fn resolve_document(&self, template: &Value) -> Result<Document, DataError> {
        let bound = bind_parameters(template, &self.arguments)?;
        bson::to_document(&bound)
            .map_err(|e| DataError::conversion(format!("invalid command document: {e}")))
    }

    /// The resolved filter of a find-, update- or delete-flavored query.
    pub fn filter_document(&self) -> Result<Option<Document>, DataError> {
        let template = match self.stored.command() {
            MongoCommand::Find { filter } => filter.as_ref(),
            MongoCommand::Update { filter, .. } | MongoCommand::Delete { filter } => Some(filter),
            MongoCommand::Aggregate { .. } | MongoCommand::Insert => {
                return Err(DataError::illegal_state(format!(
                    "query '{}' carries no filter",
                    self.stored.name()
                )))
            }
        };
        template.map(|t| self.resolve_document(t)).transpose()
    }

    /// The resolved pipeline of an aggregate-flavored query.
    pub fn pipeline_documents(&self) -> Result<Vec<Document>, DataError> {
        match self.stored.command() {
            MongoCommand::Aggregate { pipeline } => pipeline
                .iter()
                .map(|stage| self.resolve_document(stage))
                .collect(),
            _ => Err(DataError::illegal_state(format!(
                "expected query '{}' to be aggregate-flavored",
                self.stored.name()
            ))),
        }
    }

    /// The resolved update document of an update-flavored query.
    pub fn update_document(&self) -> Result<Document, DataError> {
        match self.stored.command() {
            MongoCommand::Update { update, .. } => self.resolve_document(update),
            _ => Err(DataError::illegal_state(format!(
                "expected query '{}' to be update-flavored",
                self.stored.name()
            ))),
        }
    }
}

impl<E, R> std::fmt::Debug for MongoPreparedQuery<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoPreparedQuery")
            .field("stored", &self.stored)
            .field("arguments", &self.arguments)
            .finish()
    }
}
