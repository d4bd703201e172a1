use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, TypeId};
use std::sync::Arc;

/// Trait describing a domain type's persisted shape: target collection,
/// identifier field, optional optimistic-locking version field, and the
/// property-to-field name mapping.
///
/// Intended to be implemented manually or via a derive macro.
///
/// # Example
///
/// ```ignore
/// impl Entity for User {
///     fn collection_name() -> &'static str { "users" }
///     fn id_field() -> &'static str { "_id" }
///     fn fields() -> &'static [(&'static str, &'static str)] {
///         &[("id", "_id"), ("name", "name"), ("email", "email")]
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Persisted name of the entity (the collection it is stored in).
    fn collection_name() -> &'static str;

    /// Persisted name of the identifier field.
    fn id_field() -> &'static str;

    /// Persisted name of the optimistic-locking version field, if the
    /// entity declares one. Entities without a version are never
    /// version-checked on update or delete.
    fn version_field() -> Option<&'static str> {
        None
    }

    /// `(property name, persisted field name)` pairs for every attribute.
    fn fields() -> &'static [(&'static str, &'static str)];
}

/// A single persisted attribute: the Rust-side property name and the name
/// it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentProperty {
    name: String,
    persisted_name: String,
}

impl PersistentProperty {
    pub fn new(name: impl Into<String>, persisted_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persisted_name: persisted_name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn persisted_name(&self) -> &str {
        &self.persisted_name
    }
}

/// Runtime metadata for an entity type.
///
/// Built once per type by [`EntityRegistry`] and shared process-wide;
/// immutable after construction.
#[derive(Debug, Clone)]
pub struct PersistentEntity {
    type_name: &'static str,
    persisted_name: String,
    id: PersistentProperty,
    version: Option<PersistentProperty>,
    properties: Vec<PersistentProperty>,
}

impl PersistentEntity {
    /// Build the metadata for an entity type from its static declaration.
    pub fn of<E: Entity>() -> Self {
        let properties: Vec<PersistentProperty> = E::fields()
            .iter()
            .map(|(name, persisted)| PersistentProperty::new(*name, *persisted))
            .collect();
        let id = properties
            .iter()
            .find(|p| p.persisted_name() == E::id_field())
            .cloned()
            .unwrap_or_else(|| PersistentProperty::new(E::id_field(), E::id_field()));
        let version = E::version_field().map(|field| {
            properties
                .iter()
                .find(|p| p.persisted_name() == field)
                .cloned()
                .unwrap_or_else(|| PersistentProperty::new(field, field))
        });
        Self {
            type_name: type_name::<E>(),
            persisted_name: E::collection_name().to_string(),
            id,
            version,
            properties,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Persisted name of the entity itself (its collection).
    pub fn persisted_name(&self) -> &str {
        &self.persisted_name
    }

    /// The identifier property.
    pub fn id(&self) -> &PersistentProperty {
        &self.id
    }

    /// The optimistic-locking version property, if declared.
    pub fn version(&self) -> Option<&PersistentProperty> {
        self.version.as_ref()
    }

    pub fn properties(&self) -> &[PersistentProperty] {
        &self.properties
    }

    /// Look up a property by its Rust-side name.
    pub fn property(&self, name: &str) -> Option<&PersistentProperty> {
        self.properties.iter().find(|p| p.name() == name)
    }
}

/// Process-wide cache of [`PersistentEntity`] metadata, keyed by type.
///
/// Lookups are O(1) amortized; metadata is built on first access and shared
/// read-only afterwards, so the registry is safe to use from any number of
/// concurrent invocations.
#[derive(Clone, Default)]
pub struct EntityRegistry {
    entries: Arc<DashMap<TypeId, Arc<PersistentEntity>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached metadata for `E`, building it on first access.
    pub fn get<E: Entity>(&self) -> Arc<PersistentEntity> {
        if let Some(existing) = self.entries.get(&TypeId::of::<E>()) {
            return existing.clone();
        }
        self.entries
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Arc::new(PersistentEntity::of::<E>()))
            .value()
            .clone()
    }
}
