use bson::Document;
use loam_data::{Collation, DataError, QueryOptionsConfig};
use serde_json::Value;

/// Options for a `find` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub filter: Option<Document>,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub collation: Option<Collation>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

/// Options for an `aggregate` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub collation: Option<Collation>,
    pub allow_disk_use: Option<bool>,
}

/// Options for a `replace_one` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaceOptions {
    pub upsert: bool,
    pub collation: Option<Collation>,
}

/// Options for an `update_many` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    pub upsert: bool,
    pub collation: Option<Collation>,
}

/// Options for an `insert_one` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOneOptions {
    pub bypass_document_validation: Option<bool>,
}

/// Options for an `insert_many` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyOptions {
    pub ordered: Option<bool>,
    pub bypass_document_validation: Option<bool>,
}

/// Options for a `delete` call. `multi` selects delete-many semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOptions {
    pub multi: bool,
    pub collation: Option<Collation>,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            multi: true,
            collation: None,
        }
    }
}

fn document_from(value: &Value) -> Result<Document, DataError> {
    bson::to_document(value)
        .map_err(|e| DataError::conversion(format!("invalid document in query options: {e}")))
}

/// Build `find` options from the declarative query configuration.
///
/// All builders here are pure: equivalent configuration always yields
/// equivalent options, and absent configuration yields the operation's
/// zero-value options.
pub fn build_find_options(config: &QueryOptionsConfig) -> Result<FindOptions, DataError> {
    Ok(FindOptions {
        filter: None,
        sort: config.sort.as_ref().map(document_from).transpose()?,
        projection: config.projection.as_ref().map(document_from).transpose()?,
        collation: config.collation.clone(),
        limit: config.limit,
        skip: config.skip,
    })
}

pub fn build_aggregate_options(config: &QueryOptionsConfig) -> AggregateOptions {
    AggregateOptions {
        collation: config.collation.clone(),
        allow_disk_use: None,
    }
}

pub fn build_replace_options(config: &QueryOptionsConfig) -> ReplaceOptions {
    ReplaceOptions {
        upsert: config.upsert.unwrap_or(false),
        collation: config.collation.clone(),
    }
}

pub fn build_update_options(config: &QueryOptionsConfig) -> UpdateOptions {
    UpdateOptions {
        upsert: config.upsert.unwrap_or(false),
        collation: config.collation.clone(),
    }
}

pub fn build_insert_one_options(config: &QueryOptionsConfig) -> InsertOneOptions {
    InsertOneOptions {
        bypass_document_validation: config.bypass_document_validation,
    }
}

pub fn build_insert_many_options(config: &QueryOptionsConfig) -> InsertManyOptions {
    InsertManyOptions {
        ordered: config.ordered,
        bypass_document_validation: config.bypass_document_validation,
    }
}

/// Build `delete` options. Deletes default to multi semantics (delete all
/// matches) unless the configuration overrides it.
pub fn build_delete_options(config: &QueryOptionsConfig) -> DeleteOptions {
    DeleteOptions {
        multi: config.multi.unwrap_or(true),
        collation: config.collation.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_yields_zero_value_options() {
        let config = QueryOptionsConfig::default();
        assert_eq!(build_find_options(&config).unwrap(), FindOptions::default());
        assert_eq!(build_replace_options(&config), ReplaceOptions::default());
        assert_eq!(build_insert_one_options(&config), InsertOneOptions::default());
        assert_eq!(
            build_insert_many_options(&config),
            InsertManyOptions::default()
        );
        assert_eq!(build_aggregate_options(&config), AggregateOptions::default());
    }

    #[test]
    fn delete_defaults_to_multi() {
        assert!(build_delete_options(&QueryOptionsConfig::default()).multi);
        let single = QueryOptionsConfig {
            multi: Some(false),
            ..QueryOptionsConfig::default()
        };
        assert!(!build_delete_options(&single).multi);
    }

    #[test]
    fn find_options_carry_sort_projection_collation() {
        let config = QueryOptionsConfig {
            sort: Some(json!({ "name": 1 })),
            projection: Some(json!({ "name": 1, "_id": 0 })),
            collation: Some(Collation::locale("fr")),
            limit: Some(5),
            skip: Some(10),
            ..QueryOptionsConfig::default()
        };
        let options = build_find_options(&config).unwrap();
        assert_eq!(options.sort.unwrap().get_i64("name").ok(), Some(1));
        assert_eq!(options.projection.unwrap().get_i64("_id").ok(), Some(0));
        assert_eq!(options.collation.unwrap().locale.as_deref(), Some("fr"));
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.skip, Some(10));
    }

    #[test]
    fn builders_are_pure() {
        let config = QueryOptionsConfig {
            upsert: Some(true),
            ..QueryOptionsConfig::default()
        };
        assert_eq!(build_replace_options(&config), build_replace_options(&config));
        assert!(build_replace_options(&config).upsert);
        assert!(build_update_options(&config).upsert);
    }
}
