use crate::driver::DatabaseHandle;
use loam_data::RepositoryRegistry;
use serde::Deserialize;
use std::any::TypeId;
use std::collections::HashMap;

/// Configuration section for the document backend.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoDataConfig {
    /// The server identifier this process runs against. Repository
    /// definitions with an empty target server apply to every server.
    #[serde(default)]
    pub server: Option<String>,
    /// Database used by repositories without an explicit binding.
    pub default_database: String,
}

/// Repository-to-database mapping, built exactly once at startup from the
/// repository registry and read-only afterwards; safe for unsynchronized
/// concurrent reads.
#[derive(Debug)]
pub struct RepoDatabaseConfig {
    by_repository: HashMap<TypeId, String>,
    default_database: String,
}

impl RepoDatabaseConfig {
    /// Keep a repository's database binding iff its target server is empty
    /// or case-insensitively equals `server`. At most one binding per
    /// repository; the first non-empty match wins.
    pub fn build(
        registry: &RepositoryRegistry,
        server: &str,
        default_database: impl Into<String>,
    ) -> Self {
        let mut by_repository: HashMap<TypeId, String> = HashMap::new();
        for def in registry.defs() {
            let target = def.target_server_value().unwrap_or("");
            if target.is_empty() || target.eq_ignore_ascii_case(server) {
                if let Some(database) = def.database_name_value() {
                    if !database.is_empty() {
                        by_repository
                            .entry(def.type_id())
                            .or_insert_with(|| database.to_string());
                    }
                }
            }
        }
        Self {
            by_repository,
            default_database: default_database.into(),
        }
    }

    pub fn from_config(registry: &RepositoryRegistry, config: &MongoDataConfig) -> Self {
        Self::build(
            registry,
            config.server.as_deref().unwrap_or(""),
            config.default_database.clone(),
        )
    }

    /// The configured database for a repository, if one was bound under the
    /// current server.
    pub fn database_name(&self, repository: TypeId) -> Option<&str> {
        self.by_repository.get(&repository).map(String::as_str)
    }

    /// Resolve the database handle for a repository, falling back to the
    /// default database. Deterministic: the same repository always resolves
    /// to the same handle.
    pub fn resolve(&self, repository: TypeId) -> DatabaseHandle {
        DatabaseHandle::new(
            self.database_name(repository)
                .unwrap_or(&self.default_database),
        )
    }
}
