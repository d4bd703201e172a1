use crate::entity::Entity;
use crate::error::DataError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

/// The kind of persistence operation a stored query performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Count,
    Exists,
    Insert,
    Update,
    Delete,
    Aggregate,
}

/// Collation settings declared on a query at registration time.
///
/// Backend option builders translate these into the driver's native
/// collation object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collation {
    pub locale: Option<String>,
    pub strength: Option<i32>,
    pub case_level: Option<bool>,
    pub numeric_ordering: Option<bool>,
}

impl Collation {
    pub fn locale(locale: impl Into<String>) -> Self {
        Self {
            locale: Some(locale.into()),
            ..Self::default()
        }
    }
}

/// Declarative per-query operation options, populated when the query is
/// registered. Backend option builders dispatch on these fields; nothing in
/// the execution path reads annotations or any other reflective source.
#[derive(Debug, Clone, Default)]
pub struct QueryOptionsConfig {
    pub upsert: Option<bool>,
    pub multi: Option<bool>,
    pub ordered: Option<bool>,
    pub bypass_document_validation: Option<bool>,
    pub collation: Option<Collation>,
    pub sort: Option<Value>,
    pub projection: Option<Value>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

/// Operation-specific command payload of a stored query, expressed as
/// backend-neutral JSON templates. Parameter placeholders (see
/// [`placeholder`]) are resolved when the query is prepared.
#[derive(Debug, Clone, Default)]
pub struct QueryPayload {
    pub filter: Option<Value>,
    pub pipeline: Option<Vec<Value>>,
    pub update: Option<Value>,
}

/// Build a parameter placeholder for position `index`.
///
/// Placeholders may appear anywhere inside a payload template and are
/// substituted with the bound argument at that position.
pub fn placeholder(index: usize) -> Value {
    serde_json::json!({ "$qp": index })
}

/// Substitute every parameter placeholder in `template` with the bound
/// argument at its position.
///
/// A placeholder index past the end of `arguments` is an internal
/// misconfiguration (the deriving layer produced a query whose arity does
/// not match the invocation) and surfaces as [`DataError::IllegalState`].
pub fn bind_parameters(template: &Value, arguments: &[Value]) -> Result<Value, DataError> {
    match template {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::Number(index)) = map.get("$qp") {
                    let index = index
                        .as_u64()
                        .ok_or_else(|| DataError::illegal_state("non-integral parameter index"))?
                        as usize;
                    return arguments.get(index).cloned().ok_or_else(|| {
                        DataError::illegal_state(format!(
                            "query parameter {index} out of range ({} bound)",
                            arguments.len()
                        ))
                    });
                }
            }
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), bind_parameters(value, arguments)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| bind_parameters(item, arguments))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// Immutable, backend-agnostic description of a derived query: target entity
/// type `E`, declared result type `R`, operation kind, parameter names and
/// command payload. Created once per derived method and reused across
/// invocations.
pub struct StoredQuery<E, R> {
    name: String,
    kind: OperationKind,
    payload: QueryPayload,
    parameters: Vec<String>,
    options: QueryOptionsConfig,
    is_dto_projection: bool,
    result_is_entity: bool,
    _marker: PhantomData<fn() -> (E, R)>,
}

impl<E: Entity, R: 'static> StoredQuery<E, R> {
    fn with(name: impl Into<String>, kind: OperationKind, payload: QueryPayload) -> Self {
        Self {
            name: name.into(),
            kind,
            payload,
            parameters: Vec::new(),
            options: QueryOptionsConfig::default(),
            is_dto_projection: false,
            result_is_entity: TypeId::of::<R>() == TypeId::of::<E>(),
            _marker: PhantomData,
        }
    }

    /// A find-style query with a filter template.
    pub fn query(name: impl Into<String>, filter: Value) -> Self {
        Self::with(
            name,
            OperationKind::Query,
            QueryPayload {
                filter: Some(filter),
                ..QueryPayload::default()
            },
        )
    }

    /// An aggregation query with a pipeline template.
    pub fn aggregate(name: impl Into<String>, pipeline: Vec<Value>) -> Self {
        Self::with(
            name,
            OperationKind::Aggregate,
            QueryPayload {
                pipeline: Some(pipeline),
                ..QueryPayload::default()
            },
        )
    }

    /// An update query carrying both a filter and an update-document template.
    pub fn update(name: impl Into<String>, filter: Value, update: Value) -> Self {
        Self::with(
            name,
            OperationKind::Update,
            QueryPayload {
                filter: Some(filter),
                update: Some(update),
                ..QueryPayload::default()
            },
        )
    }

    /// A delete query with a filter template.
    pub fn delete(name: impl Into<String>, filter: Value) -> Self {
        Self::with(
            name,
            OperationKind::Delete,
            QueryPayload {
                filter: Some(filter),
                ..QueryPayload::default()
            },
        )
    }

    /// An insert operation; carries no payload, the entity itself is the
    /// document.
    pub fn insert(name: impl Into<String>) -> Self {
        Self::with(name, OperationKind::Insert, QueryPayload::default())
    }

    /// A count query over an optional filter template.
    pub fn count(name: impl Into<String>, filter: Option<Value>) -> Self {
        Self::with(
            name,
            OperationKind::Count,
            QueryPayload {
                filter,
                ..QueryPayload::default()
            },
        )
    }

    /// An existence check over an optional filter template. Backends execute
    /// this as a count and compare against zero.
    pub fn exists(name: impl Into<String>, filter: Option<Value>) -> Self {
        Self::with(
            name,
            OperationKind::Exists,
            QueryPayload {
                filter,
                ..QueryPayload::default()
            },
        )
    }

    /// Name the positional parameters, in binding order.
    pub fn parameters(mut self, names: &[&str]) -> Self {
        self.parameters = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Attach declarative operation options.
    pub fn options(mut self, options: QueryOptionsConfig) -> Self {
        self.options = options;
        self
    }

    /// Mark the result type as a DTO projection rather than the entity or a
    /// scalar.
    pub fn dto_projection(mut self) -> Self {
        self.is_dto_projection = true;
        self
    }

    /// Bind runtime argument values, producing a [`PreparedQuery`] for one
    /// invocation.
    pub fn bind(self: &Arc<Self>, arguments: Vec<Value>) -> PreparedQuery<E, R> {
        PreparedQuery {
            stored: Arc::clone(self),
            arguments,
        }
    }
}

impl<E, R> StoredQuery<E, R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn payload(&self) -> &QueryPayload {
        &self.payload
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameters
    }

    pub fn options_config(&self) -> &QueryOptionsConfig {
        &self.options
    }

    pub fn is_dto_projection(&self) -> bool {
        self.is_dto_projection
    }

    /// Whether the declared result type is the entity type itself, in which
    /// case results hydrate through the codec instead of the shape-based
    /// converter.
    pub fn result_is_entity(&self) -> bool {
        self.result_is_entity
    }
}

impl<E, R> std::fmt::Debug for StoredQuery<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredQuery")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// A [`StoredQuery`] bound to the argument values of a single invocation.
/// Ephemeral; created per call and discarded after execution. Placeholder
/// resolution is deferred to the point of execution.
pub struct PreparedQuery<E, R> {
    stored: Arc<StoredQuery<E, R>>,
    arguments: Vec<Value>,
}

impl<E, R> PreparedQuery<E, R> {
    pub fn new(stored: Arc<StoredQuery<E, R>>, arguments: Vec<Value>) -> Self {
        Self { stored, arguments }
    }

    pub fn stored(&self) -> &Arc<StoredQuery<E, R>> {
        &self.stored
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Decompose into the underlying stored query and the bound arguments.
    pub fn into_parts(self) -> (Arc<StoredQuery<E, R>>, Vec<Value>) {
        (self.stored, self.arguments)
    }
}

/// Context of the invoking repository method: which repository type the call
/// arrived through, and the method name for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryContext {
    repository: TypeId,
    method: &'static str,
}

impl QueryContext {
    pub fn of<Repo: 'static>(method: &'static str) -> Self {
        Self {
            repository: TypeId::of::<Repo>(),
            method,
        }
    }

    pub fn repository(&self) -> TypeId {
        self.repository
    }

    pub fn method(&self) -> &'static str {
        self.method
    }
}
