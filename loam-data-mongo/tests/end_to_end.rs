use loam_data::query::placeholder;
use loam_data::{DataError, RepositoryDef};
use loam_data_mongo::prelude::*;
use loam_data_mongo::DatabaseHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Person {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    age: i64,
    version: i64,
}

impl Entity for Person {
    fn collection_name() -> &'static str {
        "people"
    }
    fn id_field() -> &'static str {
        "_id"
    }
    fn version_field() -> Option<&'static str> {
        Some("version")
    }
    fn fields() -> &'static [(&'static str, &'static str)] {
        &[
            ("id", "_id"),
            ("name", "name"),
            ("age", "age"),
            ("version", "version"),
        ]
    }
}

struct PersonRepo;

fn person(id: i64, name: &str, age: i64) -> Person {
    Person {
        id,
        name: name.to_string(),
        age,
        version: 1,
    }
}

fn fixture() -> (Arc<MemoryDriver>, MongoRepositoryOperations<MemoryDriver>) {
    let driver = Arc::new(MemoryDriver::new());
    let registry = RepositoryRegistry::new()
        .register(RepositoryDef::of::<PersonRepo>().database_name("appdb"));
    let ops = MongoRepositoryOperations::new(
        EntityRegistry::new(),
        Arc::new(ConversionService::new()),
        RepoDatabaseConfig::build(&registry, "", "appdb"),
        driver.clone(),
    );
    (driver, ops)
}

fn ctx(method: &'static str) -> QueryContext {
    QueryContext::of::<PersonRepo>(method)
}

fn seed(ops: &MongoRepositoryOperations<MemoryDriver>, people: &[Person]) {
    ops.persist_all(&ctx("save_all"), people).unwrap();
}

fn find_by_id(
    ops: &MongoRepositoryOperations<MemoryDriver>,
) -> Arc<MongoStoredQuery<Person, Person>> {
    let stored = Arc::new(StoredQuery::<Person, Person>::query(
        "findById",
        json!({ "_id": placeholder(0) }),
    ));
    Arc::new(ops.core().decorate_stored(&ctx("find_by_id"), stored).unwrap())
}

// ── Find: full entity round trip ────────────────────────────────────────

#[test]
fn persist_then_find_by_id_hydrates_the_entity() {
    let (_, ops) = fixture();
    let ada = person(1, "ada", 36);
    ops.persist(&ctx("save"), &ada).unwrap();

    let found = ops.find_one(&find_by_id(&ops).bind(vec![json!(1)])).unwrap();
    assert_eq!(found, Some(ada));

    let missing = ops.find_one(&find_by_id(&ops).bind(vec![json!(99)])).unwrap();
    assert_eq!(missing, None);
}

#[test]
fn repository_database_binding_targets_the_configured_database() {
    let (driver, ops) = fixture();
    ops.persist(&ctx("save"), &person(1, "ada", 36)).unwrap();
    assert_eq!(driver.contents(&DatabaseHandle::new("appdb"), "people").len(), 1);
}

// ── Result conversion through the execution path ────────────────────────

#[test]
fn scalar_projection_narrows_stored_numeric() {
    let (_, ops) = fixture();
    seed(&ops, &[person(1, "ada", 36)]);

    // age is stored as a 64-bit integer; the declared result is i32.
    let stored = Arc::new(
        StoredQuery::<Person, i32>::query("ageById", json!({ "_id": placeholder(0) })).options(
            QueryOptionsConfig {
                projection: Some(json!({ "age": 1, "_id": 0 })),
                ..QueryOptionsConfig::default()
            },
        ),
    );
    let decorated = Arc::new(ops.core().decorate_stored(&ctx("age_by_id"), stored).unwrap());
    let age = ops.find_one(&decorated.bind(vec![json!(1)])).unwrap();
    assert_eq!(age, Some(36_i32));
}

#[test]
fn two_field_projection_prefers_the_non_identifier_field() {
    let (_, ops) = fixture();
    seed(&ops, &[person(1, "ada", 36)]);

    let stored = Arc::new(
        StoredQuery::<Person, String>::query("nameById", json!({ "_id": placeholder(0) }))
            .options(QueryOptionsConfig {
                projection: Some(json!({ "_id": 1, "name": 1 })),
                ..QueryOptionsConfig::default()
            }),
    );
    let decorated = Arc::new(ops.core().decorate_stored(&ctx("name_by_id"), stored).unwrap());
    let name = ops.find_one(&decorated.bind(vec![json!(1)])).unwrap();
    assert_eq!(name.as_deref(), Some("ada"));
}

// ── Update-flavored queries ─────────────────────────────────────────────

#[test]
fn update_payload_decorates_and_executes_as_update() {
    let (_, ops) = fixture();
    seed(&ops, &[person(1, "ada", 36), person(2, "grace", 45)]);

    let stored = Arc::new(StoredQuery::<Person, Person>::update(
        "renameById",
        json!({ "_id": placeholder(0) }),
        json!({ "$set": { "name": placeholder(1) } }),
    ));
    let decorated = Arc::new(ops.core().decorate_stored(&ctx("rename"), stored).unwrap());
    assert!(decorated.is_update());

    let result = ops
        .execute_update(&decorated.bind(vec![json!(2), json!("hopper")]))
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 1);

    let renamed = ops.find_one(&find_by_id(&ops).bind(vec![json!(2)])).unwrap();
    assert_eq!(renamed.unwrap().name, "hopper");
}

#[test]
fn executing_a_find_query_as_update_is_illegal_state() {
    let (_, ops) = fixture();
    let err = ops
        .execute_update(&find_by_id(&ops).bind(vec![json!(1)]))
        .unwrap_err();
    assert!(matches!(err, DataError::IllegalState(_)));
}

// ── Delete semantics ────────────────────────────────────────────────────

#[test]
fn delete_query_removes_every_match_by_default() {
    let (_, ops) = fixture();
    seed(
        &ops,
        &[person(1, "ada", 36), person(2, "grace", 45), person(3, "alan", 41)],
    );

    let stored = Arc::new(StoredQuery::<Person, Person>::delete(
        "deleteOlderThan",
        json!({ "age": { "$gt": placeholder(0) } }),
    ));
    let decorated = Arc::new(ops.core().decorate_stored(&ctx("delete_older"), stored).unwrap());
    let result = ops.execute_delete(&decorated.bind(vec![json!(40)])).unwrap();
    assert_eq!(result.deleted_count, 2);
}

#[test]
fn entity_delete_is_single_and_version_checked() {
    let (_, ops) = fixture();
    let ada = person(1, "ada", 36);
    seed(&ops, &[ada.clone(), person(2, "grace", 45)]);

    let result = ops
        .delete_entity(&ctx("delete"), &ada, &QueryOptionsConfig::default())
        .unwrap();
    assert_eq!(result.deleted_count, 1);

    // Deleting an already-deleted versioned entity is an optimistic-lock
    // failure, not a silent no-op.
    let err = ops
        .delete_entity(&ctx("delete"), &ada, &QueryOptionsConfig::default())
        .unwrap_err();
    assert!(matches!(err, DataError::OptimisticLock(_)));
}

// ── Replace and optimistic locking ──────────────────────────────────────

#[test]
fn replace_matches_id_and_version() {
    let (_, ops) = fixture();
    let mut ada = person(1, "ada", 36);
    seed(&ops, &[ada.clone()]);

    ada.age = 37;
    let result = ops
        .replace(&ctx("update"), &ada, &QueryOptionsConfig::default())
        .unwrap();
    assert_eq!(result.matched_count, 1);

    let reread = ops
        .find_one(&find_by_id(&ops).bind(vec![json!(1)]))
        .unwrap()
        .unwrap();
    assert_eq!(reread.age, 37);
}

#[test]
fn stale_version_replace_is_an_optimistic_lock_failure() {
    let (_, ops) = fixture();
    seed(&ops, &[person(1, "ada", 36)]);

    let mut stale = person(1, "ada", 40);
    stale.version = 9;
    let err = ops
        .replace(&ctx("update"), &stale, &QueryOptionsConfig::default())
        .unwrap_err();
    assert!(matches!(err, DataError::OptimisticLock(_)));
}

#[test]
fn upsert_replace_skips_the_version_check() {
    let (_, ops) = fixture();
    let config = QueryOptionsConfig {
        upsert: Some(true),
        ..QueryOptionsConfig::default()
    };
    let newcomer = person(7, "lin", 29);
    ops.replace(&ctx("update"), &newcomer, &config).unwrap();

    let found = ops.find_one(&find_by_id(&ops).bind(vec![json!(7)])).unwrap();
    assert_eq!(found, Some(newcomer));
}

// ── Count, exists and paging ────────────────────────────────────────────

#[test]
fn count_and_exists_over_a_filter() {
    let (_, ops) = fixture();
    seed(
        &ops,
        &[person(1, "ada", 36), person(2, "grace", 45), person(3, "alan", 41)],
    );

    let stored = Arc::new(StoredQuery::<Person, Person>::query(
        "findOlderThan",
        json!({ "age": { "$gt": placeholder(0) } }),
    ));
    let decorated = Arc::new(ops.core().decorate_stored(&ctx("older_than"), stored).unwrap());

    assert_eq!(ops.count(&decorated.bind(vec![json!(40)])).unwrap(), 2);

    let exists_query = Arc::new(StoredQuery::<Person, Person>::exists(
        "existsOlderThan",
        Some(json!({ "age": { "$gt": placeholder(0) } })),
    ));
    let exists_query = Arc::new(
        ops.core()
            .decorate_stored(&ctx("exists_older_than"), exists_query)
            .unwrap(),
    );
    assert!(ops.exists(&exists_query.bind(vec![json!(40)])).unwrap());
    assert!(!ops.exists(&exists_query.bind(vec![json!(100)])).unwrap());
}

#[test]
fn find_page_applies_sort_skip_limit_and_totals() {
    let (_, ops) = fixture();
    seed(
        &ops,
        &[
            person(1, "ada", 36),
            person(2, "grace", 45),
            person(3, "alan", 41),
            person(4, "lin", 29),
            person(5, "mei", 52),
        ],
    );

    let stored = Arc::new(StoredQuery::<Person, Person>::query("findAll", json!({})));
    let decorated = Arc::new(ops.core().decorate_stored(&ctx("list"), stored).unwrap());

    let pageable = Pageable {
        page: 1,
        size: 2,
        sort: Some("age".to_string()),
    };
    let page = ops.find_page(&decorated.bind(vec![]), &pageable).unwrap();
    assert_eq!(page.total_elements, 5);
    assert_eq!(page.total_pages, 3);
    let ages: Vec<i64> = page.content.iter().map(|p| p.age).collect();
    assert_eq!(ages, vec![41, 45]);
}

// ── Aggregation ─────────────────────────────────────────────────────────

#[test]
fn aggregate_pipeline_with_bound_parameters() {
    let (_, ops) = fixture();
    seed(
        &ops,
        &[person(1, "ada", 36), person(2, "grace", 45), person(3, "alan", 41)],
    );

    let stored = Arc::new(StoredQuery::<Person, u64>::aggregate(
        "countOlderThan",
        vec![
            json!({ "$match": { "age": { "$gt": placeholder(0) } } }),
            json!({ "$count": "total" }),
        ],
    ));
    let decorated = Arc::new(ops.core().decorate_stored(&ctx("count_older"), stored).unwrap());
    let total = ops.find_one(&decorated.bind(vec![json!(36)])).unwrap();
    assert_eq!(total, Some(2));
}

// ── Reactive adapter ────────────────────────────────────────────────────

fn reactive_fixture() -> ReactiveMongoRepositoryOperations<MemoryDriver> {
    let registry = RepositoryRegistry::new()
        .register(RepositoryDef::of::<PersonRepo>().database_name("appdb"));
    ReactiveMongoRepositoryOperations::new(
        EntityRegistry::new(),
        Arc::new(ConversionService::new()),
        RepoDatabaseConfig::build(&registry, "", "appdb"),
        Arc::new(MemoryDriver::new()),
    )
}

#[tokio::test]
async fn reactive_persist_find_update_delete() {
    let ops = reactive_fixture();
    let ada = person(1, "ada", 36);
    ops.persist(&ctx("save"), &ada).await.unwrap();

    let stored = Arc::new(StoredQuery::<Person, Person>::query(
        "findById",
        json!({ "_id": placeholder(0) }),
    ));
    let by_id = Arc::new(ops.core().decorate_stored(&ctx("find_by_id"), stored).unwrap());
    let found = ops.find_one(&by_id.bind(vec![json!(1)])).await.unwrap();
    assert_eq!(found, Some(ada.clone()));

    let update = Arc::new(StoredQuery::<Person, Person>::update(
        "renameById",
        json!({ "_id": placeholder(0) }),
        json!({ "$set": { "name": placeholder(1) } }),
    ));
    let rename = Arc::new(ops.core().decorate_stored(&ctx("rename"), update).unwrap());
    let result = ops
        .execute_update(&rename.bind(vec![json!(1), json!("lovelace")]))
        .await
        .unwrap();
    assert_eq!(result.modified_count, 1);

    // The entity snapshot is stale now, so a version-agnostic reread is
    // needed before deleting.
    let current = ops
        .find_one(&by_id.bind(vec![json!(1)]))
        .await
        .unwrap()
        .unwrap();
    let deleted = ops
        .delete_entity(&ctx("delete"), &current, &QueryOptionsConfig::default())
        .await
        .unwrap();
    assert_eq!(deleted.deleted_count, 1);
}

#[tokio::test]
async fn reactive_count_and_page() {
    let ops = reactive_fixture();
    ops.persist_all(
        &ctx("save_all"),
        &[person(1, "ada", 36), person(2, "grace", 45), person(3, "alan", 41)],
    )
    .await
    .unwrap();

    let stored = Arc::new(StoredQuery::<Person, Person>::query("findAll", json!({})));
    let all = Arc::new(ops.core().decorate_stored(&ctx("list"), stored).unwrap());

    assert_eq!(ops.count(&all.bind(vec![])).await.unwrap(), 3);

    let pageable = Pageable {
        page: 0,
        size: 2,
        sort: Some("age,desc".to_string()),
    };
    let page = ops.find_page(&all.bind(vec![]), &pageable).await.unwrap();
    assert_eq!(page.total_pages, 2);
    let ages: Vec<i64> = page.content.iter().map(|p| p.age).collect();
    assert_eq!(ages, vec![45, 41]);
}
