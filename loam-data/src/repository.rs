use std::any::{type_name, TypeId};

/// Definition of a single repository: its marker type plus the optional
/// target-server and database-name configuration it was registered with.
///
/// This is the startup-time replacement for scanning an ambient bean
/// registry: the composing layer registers every repository explicitly and
/// the resulting [`RepositoryRegistry`] is passed by ownership into the
/// backend operations component.
#[derive(Debug, Clone)]
pub struct RepositoryDef {
    type_id: TypeId,
    type_name: &'static str,
    target_server: Option<String>,
    database_name: Option<String>,
}

impl RepositoryDef {
    pub fn of<Repo: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<Repo>(),
            type_name: type_name::<Repo>(),
            target_server: None,
            database_name: None,
        }
    }

    /// Restrict this repository to a named server. An empty or absent target
    /// server means "applies to the default server".
    pub fn target_server(mut self, server: impl Into<String>) -> Self {
        self.target_server = Some(server.into());
        self
    }

    /// Configure the database this repository's entities live in.
    pub fn database_name(mut self, database: impl Into<String>) -> Self {
        self.database_name = Some(database.into());
        self
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn target_server_value(&self) -> Option<&str> {
        self.target_server.as_deref()
    }

    pub fn database_name_value(&self) -> Option<&str> {
        self.database_name.as_deref()
    }
}

/// All repository definitions known to one backend, collected during the
/// startup registration pass. Immutable once handed to the operations
/// component; read-only at runtime.
#[derive(Debug, Default)]
pub struct RepositoryRegistry {
    defs: Vec<RepositoryDef>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, def: RepositoryDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn defs(&self) -> &[RepositoryDef] {
        &self.defs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UserRepo;
    struct OrderRepo;

    #[test]
    fn registry_collects_definitions() {
        let registry = RepositoryRegistry::new()
            .register(RepositoryDef::of::<UserRepo>().database_name("users-db"))
            .register(
                RepositoryDef::of::<OrderRepo>()
                    .target_server("eu-1")
                    .database_name("orders-db"),
            );
        assert_eq!(registry.defs().len(), 2);
        let order = &registry.defs()[1];
        assert_eq!(order.type_id(), TypeId::of::<OrderRepo>());
        assert_eq!(order.target_server_value(), Some("eu-1"));
        assert_eq!(order.database_name_value(), Some("orders-db"));
    }
}
