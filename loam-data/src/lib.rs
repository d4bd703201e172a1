pub mod entity;
pub mod error;
pub mod page;
pub mod query;
pub mod repository;

pub use entity::{Entity, EntityRegistry, PersistentEntity, PersistentProperty};
pub use error::DataError;
pub use page::{Page, Pageable};
pub use query::{
    Collation, OperationKind, PreparedQuery, QueryContext, QueryOptionsConfig, QueryPayload,
    StoredQuery,
};
pub use repository::{RepositoryDef, RepositoryRegistry};

pub mod prelude {
    //! Re-exports of the most commonly used data types.
    pub use crate::{
        Entity, EntityRegistry, OperationKind, Page, Pageable, PersistentEntity, PreparedQuery,
        QueryContext, QueryOptionsConfig, RepositoryRegistry, StoredQuery,
    };
}
