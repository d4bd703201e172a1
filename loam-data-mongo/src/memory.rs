use crate::convert::CodecRegistry;
use crate::driver::{
    AsyncMongoDriver, CodecProvider, DatabaseHandle, DeleteResult, InsertManyResult, MongoDriver,
    UpdateResult,
};
use crate::options::{
    AggregateOptions, DeleteOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    ReplaceOptions, UpdateOptions,
};
use bson::{Bson, Document};
use dashmap::DashMap;
use loam_data::DataError;
use std::cmp::Ordering;
use std::sync::Arc;

/// In-process document store implementing both driver surfaces.
///
/// Supports the operator subset this layer emits: equality and
/// `$eq`/`$ne`/`$gt`/`$gte`/`$lt`/`$lte`/`$in` filters, `$set`/`$inc`/`$unset`
/// updates, and `$match`/`$sort`/`$skip`/`$limit`/`$project`/`$count`
/// pipeline stages. Useful for tests and prototyping; not a database.
#[derive(Default)]
pub struct MemoryDriver {
    collections: DashMap<(String, String), Vec<Document>>,
    codecs: DashMap<String, Arc<CodecRegistry>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(database: &DatabaseHandle, collection: &str) -> (String, String) {
        (database.name().to_string(), collection.to_string())
    }

    /// Preload a collection, bypassing the repository pipeline.
    pub fn seed(&self, database: &DatabaseHandle, collection: &str, documents: Vec<Document>) {
        self.collections
            .entry(Self::key(database, collection))
            .or_default()
            .extend(documents);
    }

    /// Snapshot of a collection's current contents.
    pub fn contents(&self, database: &DatabaseHandle, collection: &str) -> Vec<Document> {
        self.collections
            .get(&Self::key(database, collection))
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    fn find_documents(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        options: &FindOptions,
    ) -> Vec<Document> {
        let mut matched: Vec<Document> = self
            .contents(database, collection)
            .into_iter()
            .filter(|candidate| match &options.filter {
                Some(filter) => matches_filter(filter, candidate),
                None => true,
            })
            .collect();
        if let Some(sort) = &options.sort {
            sort_documents(&mut matched, sort);
        }
        if let Some(skip) = options.skip {
            matched = matched.into_iter().skip(skip as usize).collect();
        }
        if let Some(limit) = options.limit {
            matched.truncate(limit.max(0) as usize);
        }
        if let Some(projection) = &options.projection {
            matched = matched
                .into_iter()
                .map(|document| project(document, projection))
                .collect();
        }
        matched
    }

    fn aggregate_documents(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        pipeline: &[Document],
    ) -> Result<Vec<Document>, DataError> {
        let mut current = self.contents(database, collection);
        for stage in pipeline {
            let (operator, operand) = stage.iter().next().ok_or_else(|| {
                DataError::illegal_state("empty aggregation pipeline stage")
            })?;
            match (operator.as_str(), operand) {
                ("$match", Bson::Document(filter)) => {
                    current.retain(|candidate| matches_filter(filter, candidate));
                }
                ("$sort", Bson::Document(sort)) => sort_documents(&mut current, sort),
                ("$skip", operand) => {
                    let skip = as_integer(operand).unwrap_or(0).max(0) as usize;
                    current = current.into_iter().skip(skip).collect();
                }
                ("$limit", operand) => {
                    let limit = as_integer(operand).unwrap_or(0).max(0) as usize;
                    current.truncate(limit);
                }
                ("$project", Bson::Document(projection)) => {
                    current = current
                        .into_iter()
                        .map(|document| project(document, projection))
                        .collect();
                }
                ("$count", Bson::String(field)) => {
                    let mut counted = Document::new();
                    counted.insert(field.clone(), Bson::Int64(current.len() as i64));
                    current = vec![counted];
                }
                (other, _) => {
                    return Err(DataError::illegal_state(format!(
                        "unsupported aggregation stage '{other}'"
                    )))
                }
            }
        }
        Ok(current)
    }

    fn replace_one_document(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        mut replacement: Document,
        options: &ReplaceOptions,
    ) -> UpdateResult {
        let mut entry = self
            .collections
            .entry(Self::key(database, collection))
            .or_default();
        if let Some(existing) = entry.iter_mut().find(|doc| matches_filter(&filter, doc)) {
            if !replacement.contains_key("_id") {
                if let Some(id) = existing.get("_id").cloned() {
                    replacement.insert("_id", id);
                }
            }
            let modified = *existing != replacement;
            *existing = replacement;
            UpdateResult {
                matched_count: 1,
                modified_count: modified as u64,
            }
        } else {
            if options.upsert {
                entry.push(replacement);
            }
            UpdateResult::default()
        }
    }

    fn update_many_documents(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, DataError> {
        let mut entry = self
            .collections
            .entry(Self::key(database, collection))
            .or_default();
        let mut result = UpdateResult::default();
        for document in entry.iter_mut().filter(|doc| matches_filter(&filter, doc)) {
            result.matched_count += 1;
            if apply_update(document, &update)? {
                result.modified_count += 1;
            }
        }
        if result.matched_count == 0 && options.upsert {
            let mut upserted = Document::new();
            for (key, value) in filter.iter() {
                if !matches!(value, Bson::Document(_)) {
                    upserted.insert(key.clone(), value.clone());
                }
            }
            apply_update(&mut upserted, &update)?;
            entry.push(upserted);
        }
        Ok(result)
    }

    fn delete_documents(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        options: &DeleteOptions,
    ) -> DeleteResult {
        let mut entry = self
            .collections
            .entry(Self::key(database, collection))
            .or_default();
        let before = entry.len();
        if options.multi {
            entry.retain(|doc| !matches_filter(&filter, doc));
        } else if let Some(position) = entry.iter().position(|doc| matches_filter(&filter, doc)) {
            entry.remove(position);
        }
        DeleteResult {
            deleted_count: (before - entry.len()) as u64,
        }
    }
}

impl CodecProvider for MemoryDriver {
    fn codec_registry(&self, database: &DatabaseHandle) -> Arc<CodecRegistry> {
        if let Some(existing) = self.codecs.get(database.name()) {
            return existing.clone();
        }
        self.codecs
            .entry(database.name().to_string())
            .or_insert_with(|| Arc::new(CodecRegistry::for_database(database.name())))
            .value()
            .clone()
    }
}

impl MongoDriver for MemoryDriver {
    fn find(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DataError> {
        Ok(self.find_documents(database, collection, options))
    }

    fn aggregate(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        pipeline: &[Document],
        _options: &AggregateOptions,
    ) -> Result<Vec<Document>, DataError> {
        self.aggregate_documents(database, collection, pipeline)
    }

    fn insert_one(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        document: Document,
        _options: &InsertOneOptions,
    ) -> Result<(), DataError> {
        self.collections
            .entry(Self::key(database, collection))
            .or_default()
            .push(document);
        Ok(())
    }

    fn insert_many(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        documents: Vec<Document>,
        _options: &InsertManyOptions,
    ) -> Result<InsertManyResult, DataError> {
        let inserted = documents.len() as u64;
        self.collections
            .entry(Self::key(database, collection))
            .or_default()
            .extend(documents);
        Ok(InsertManyResult {
            inserted_count: inserted,
        })
    }

    fn replace_one(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        replacement: Document,
        options: &ReplaceOptions,
    ) -> Result<UpdateResult, DataError> {
        Ok(self.replace_one_document(database, collection, filter, replacement, options))
    }

    fn update_many(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, DataError> {
        self.update_many_documents(database, collection, filter, update, options)
    }

    fn delete(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult, DataError> {
        Ok(self.delete_documents(database, collection, filter, options))
    }
}

impl AsyncMongoDriver for MemoryDriver {
    async fn find(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DataError> {
        Ok(self.find_documents(database, collection, options))
    }

    async fn aggregate(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        pipeline: &[Document],
        _options: &AggregateOptions,
    ) -> Result<Vec<Document>, DataError> {
        self.aggregate_documents(database, collection, pipeline)
    }

    async fn insert_one(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        document: Document,
        options: &InsertOneOptions,
    ) -> Result<(), DataError> {
        MongoDriver::insert_one(self, database, collection, document, options)
    }

    async fn insert_many(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        documents: Vec<Document>,
        options: &InsertManyOptions,
    ) -> Result<InsertManyResult, DataError> {
        MongoDriver::insert_many(self, database, collection, documents, options)
    }

    async fn replace_one(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        replacement: Document,
        options: &ReplaceOptions,
    ) -> Result<UpdateResult, DataError> {
        Ok(self.replace_one_document(database, collection, filter, replacement, options))
    }

    async fn update_many(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, DataError> {
        self.update_many_documents(database, collection, filter, update, options)
    }

    async fn delete(
        &self,
        database: &DatabaseHandle,
        collection: &str,
        filter: Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult, DataError> {
        Ok(self.delete_documents(database, collection, filter, options))
    }
}

fn matches_filter(filter: &Document, candidate: &Document) -> bool {
    filter.iter().all(|(key, condition)| match condition {
        Bson::Document(operators) if operators.keys().any(|k| k.starts_with('$')) => {
            operators.iter().all(|(operator, operand)| {
                let field = candidate.get(key);
                match operator.as_str() {
                    "$eq" => bson_eq(field, operand),
                    "$ne" => !bson_eq(field, operand),
                    "$gt" => matches!(compare(field, operand), Some(Ordering::Greater)),
                    "$gte" => matches!(
                        compare(field, operand),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    "$lt" => matches!(compare(field, operand), Some(Ordering::Less)),
                    "$lte" => matches!(
                        compare(field, operand),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    "$in" => operand
                        .as_array()
                        .is_some_and(|values| values.iter().any(|value| bson_eq(field, value))),
                    _ => false,
                }
            })
        }
        literal => bson_eq(candidate.get(key), literal),
    })
}

fn bson_eq(field: Option<&Bson>, operand: &Bson) -> bool {
    match field {
        Some(value) => {
            value == operand || matches!(compare(Some(value), operand), Some(Ordering::Equal))
        }
        None => matches!(operand, Bson::Null),
    }
}

fn compare(field: Option<&Bson>, operand: &Bson) -> Option<Ordering> {
    let field = field?;
    if let (Some(a), Some(b)) = (as_number(field), as_number(operand)) {
        return a.partial_cmp(&b);
    }
    match (field, operand) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match *value {
        Bson::Int32(v) => Some(f64::from(v)),
        Bson::Int64(v) => Some(v as f64),
        Bson::Double(v) => Some(v),
        _ => None,
    }
}

fn as_integer(value: &Bson) -> Option<i64> {
    match *value {
        Bson::Int32(v) => Some(i64::from(v)),
        Bson::Int64(v) => Some(v),
        Bson::Double(v) if v.fract() == 0.0 => Some(v as i64),
        _ => None,
    }
}

fn sort_documents(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|a, b| {
        for (field, direction) in sort.iter() {
            let ordering =
                compare(a.get(field), b.get(field).unwrap_or(&Bson::Null)).unwrap_or(Ordering::Equal);
            let ordering = if as_integer(direction).unwrap_or(1) < 0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn project(document: Document, projection: &Document) -> Document {
    let inclusion = projection
        .iter()
        .any(|(field, value)| field != "_id" && as_integer(value).unwrap_or(0) != 0);
    let mut out = Document::new();
    if inclusion {
        for (field, value) in document.iter() {
            let included = match projection.get(field) {
                Some(flag) => as_integer(flag).unwrap_or(0) != 0,
                // _id is included unless explicitly suppressed.
                None => field == "_id",
            };
            if included {
                out.insert(field.clone(), value.clone());
            }
        }
    } else {
        for (field, value) in document.iter() {
            let excluded = projection
                .get(field)
                .map(|flag| as_integer(flag).unwrap_or(1) == 0)
                .unwrap_or(false);
            if !excluded {
                out.insert(field.clone(), value.clone());
            }
        }
    }
    out
}

fn apply_update(document: &mut Document, update: &Document) -> Result<bool, DataError> {
    let mut modified = false;
    for (operator, operand) in update.iter() {
        let Bson::Document(fields) = operand else {
            return Err(DataError::illegal_state(format!(
                "malformed update operator '{operator}'"
            )));
        };
        match operator.as_str() {
            "$set" => {
                for (field, value) in fields.iter() {
                    if document.get(field) != Some(value) {
                        document.insert(field.clone(), value.clone());
                        modified = true;
                    }
                }
            }
            "$inc" => {
                for (field, delta) in fields.iter() {
                    let current = document.get(field).cloned().unwrap_or(Bson::Int64(0));
                    let incremented = match (as_integer(&current), as_integer(delta)) {
                        (Some(a), Some(b)) => Bson::Int64(a + b),
                        _ => Bson::Double(
                            as_number(&current).unwrap_or(0.0) + as_number(delta).unwrap_or(0.0),
                        ),
                    };
                    document.insert(field.clone(), incremented);
                    modified = true;
                }
            }
            "$unset" => {
                for (field, _) in fields.iter() {
                    if document.remove(field).is_some() {
                        modified = true;
                    }
                }
            }
            other => {
                return Err(DataError::illegal_state(format!(
                    "unsupported update operator '{other}'"
                )))
            }
        }
    }
    Ok(modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn db() -> DatabaseHandle {
        DatabaseHandle::new("testdb")
    }

    fn seeded() -> MemoryDriver {
        let driver = MemoryDriver::new();
        driver.seed(
            &db(),
            "people",
            vec![
                doc! { "_id": 1_i64, "name": "ada", "age": 36_i64 },
                doc! { "_id": 2_i64, "name": "grace", "age": 45_i64 },
                doc! { "_id": 3_i64, "name": "alan", "age": 41_i64 },
            ],
        );
        driver
    }

    #[test]
    fn equality_and_operator_filters() {
        let driver = seeded();
        let by_name = FindOptions {
            filter: Some(doc! { "name": "ada" }),
            ..FindOptions::default()
        };
        assert_eq!(driver.find_documents(&db(), "people", &by_name).len(), 1);

        let by_age = FindOptions {
            filter: Some(doc! { "age": { "$gte": 41_i64 } }),
            ..FindOptions::default()
        };
        assert_eq!(driver.find_documents(&db(), "people", &by_age).len(), 2);

        let by_in = FindOptions {
            filter: Some(doc! { "name": { "$in": ["ada", "alan"] } }),
            ..FindOptions::default()
        };
        assert_eq!(driver.find_documents(&db(), "people", &by_in).len(), 2);
    }

    #[test]
    fn numeric_equality_across_representations() {
        let driver = seeded();
        // Int32 literal matches an Int64 stored value.
        let options = FindOptions {
            filter: Some(doc! { "age": 36_i32 }),
            ..FindOptions::default()
        };
        assert_eq!(driver.find_documents(&db(), "people", &options).len(), 1);
    }

    #[test]
    fn sort_skip_limit_projection() {
        let driver = seeded();
        let options = FindOptions {
            sort: Some(doc! { "age": -1 }),
            skip: Some(1),
            limit: Some(1),
            projection: Some(doc! { "name": 1, "_id": 0 }),
            ..FindOptions::default()
        };
        let result = driver.find_documents(&db(), "people", &options);
        assert_eq!(result, vec![doc! { "name": "alan" }]);
    }

    #[test]
    fn aggregate_match_and_count() {
        let driver = seeded();
        let pipeline = vec![
            doc! { "$match": { "age": { "$gt": 36_i64 } } },
            doc! { "$count": "totalCount" },
        ];
        let result = driver
            .aggregate_documents(&db(), "people", &pipeline)
            .unwrap();
        assert_eq!(result, vec![doc! { "totalCount": 2_i64 }]);
    }

    #[test]
    fn update_many_applies_set_and_inc() {
        let driver = seeded();
        let result = driver
            .update_many_documents(
                &db(),
                "people",
                doc! { "age": { "$gt": 36_i64 } },
                doc! { "$set": { "flagged": true }, "$inc": { "age": 1_i64 } },
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(result.matched_count, 2);
        assert_eq!(result.modified_count, 2);
        let grace = driver
            .contents(&db(), "people")
            .into_iter()
            .find(|d| d.get_str("name") == Ok("grace"))
            .unwrap();
        assert_eq!(grace.get_i64("age").unwrap(), 46);
        assert_eq!(grace.get_bool("flagged").unwrap(), true);
    }

    #[test]
    fn delete_single_vs_multi() {
        let driver = seeded();
        let single = driver.delete_documents(
            &db(),
            "people",
            doc! { "age": { "$gt": 0_i64 } },
            &DeleteOptions {
                multi: false,
                collation: None,
            },
        );
        assert_eq!(single.deleted_count, 1);

        let multi = driver.delete_documents(
            &db(),
            "people",
            doc! { "age": { "$gt": 0_i64 } },
            &DeleteOptions::default(),
        );
        assert_eq!(multi.deleted_count, 2);
        assert!(driver.contents(&db(), "people").is_empty());
    }

    #[test]
    fn replace_preserves_missing_id() {
        let driver = seeded();
        let result = driver.replace_one_document(
            &db(),
            "people",
            doc! { "_id": 1_i64 },
            doc! { "name": "ada", "age": 37_i64 },
            &ReplaceOptions::default(),
        );
        assert_eq!(result.matched_count, 1);
        let ada = driver
            .contents(&db(), "people")
            .into_iter()
            .find(|d| d.get_str("name") == Ok("ada"))
            .unwrap();
        assert_eq!(ada.get_i64("_id").unwrap(), 1);
        assert_eq!(ada.get_i64("age").unwrap(), 37);
    }
}
