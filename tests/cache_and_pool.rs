//! Cache coherence, pool behavior, transactions, and the registry

mod common;

use common::{test_db, test_db_uncached, MockAdapter, User};
use polyorm::{DatabaseRegistry, ModelCrud, OrmError, Statement};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn repeated_reads_are_served_from_cache() {
    let adapter = MockAdapter::new();
    let db = test_db(adapter.clone());
    User::create(&db, User::sample("Ada", "ada@example.com"))
        .await
        .unwrap();

    let baseline = adapter.query_calls();
    for _ in 0..3 {
        let users = User::query().all(&db).await.unwrap();
        assert_eq!(users.len(), 1);
    }
    // first read misses, the rest hit
    assert_eq!(adapter.query_calls(), baseline + 1);

    let stats = db.cache_stats().unwrap();
    assert!(stats.hits >= 2);
}

#[tokio::test]
async fn writes_invalidate_cached_reads_of_the_table() {
    let adapter = MockAdapter::new();
    let db = test_db(adapter.clone());
    User::create(&db, User::sample("Ada", "ada@example.com"))
        .await
        .unwrap();

    assert_eq!(User::query().count(&db).await.unwrap(), 1);
    // this write must drop the cached count
    User::create(&db, User::sample("Bob", "bob@example.com"))
        .await
        .unwrap();
    assert_eq!(User::query().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn cache_disabled_reads_always_hit_the_adapter() {
    let adapter = MockAdapter::new();
    let db = test_db_uncached(adapter.clone());
    User::create(&db, User::sample("Ada", "ada@example.com"))
        .await
        .unwrap();

    let baseline = adapter.query_calls();
    for _ in 0..3 {
        User::query().all(&db).await.unwrap();
    }
    assert_eq!(adapter.query_calls(), baseline + 3);
    assert!(db.cache_stats().is_none());
}

#[tokio::test]
async fn concurrent_queries_never_exceed_the_pool_bound() {
    let adapter = MockAdapter::with_pool(2, Some(Duration::from_millis(20)));
    let db = Arc::new(test_db_uncached(adapter.clone()));
    User::create(&db, User::sample("Ada", "ada@example.com"))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let mut handles = Vec::new();
    for _ in 0..6 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            User::query().all(&db).await.map(|users| users.len())
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    // 6 queries over 2 permits: at most 2 in flight, so at least 3 waves
    assert!(adapter.high_water() <= 2);
    assert!(started.elapsed() >= Duration::from_millis(60));

    let status = db.pool_status();
    assert_eq!(status.total, 2);
    assert_eq!(status.active, 0);
}

#[tokio::test]
async fn query_stats_count_statements_and_slow_ones() {
    let adapter = MockAdapter::with_pool(4, Some(Duration::from_millis(5)));
    let db = polyorm::Database::from_adapter(
        adapter,
        polyorm::DatabaseOptions {
            cache_ttl: None,
            slow_query_threshold: Duration::from_millis(1),
        },
    );
    User::create(&db, User::sample("Ada", "ada@example.com"))
        .await
        .unwrap();
    User::query().all(&db).await.unwrap();

    let stats = db.query_stats();
    assert!(stats.count >= 2);
    assert!(stats.slow_count >= 1);
    assert!(stats.avg_duration_ms > 0.0);
}

#[tokio::test]
async fn transaction_commits_on_ok() {
    let adapter = MockAdapter::new();
    let db = test_db_uncached(adapter.clone());

    db.transaction(|tx| {
        Box::pin(async move {
            let stmt = Statement::Document(polyorm::DocumentCommand::InsertOne {
                collection: "events".to_string(),
                document: serde_json::json!({ "id": "e-1", "kind": "signup" }),
            });
            tx.execute(&stmt).await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(adapter.rows_in("events"), 1);
}

#[tokio::test]
async fn committed_transactions_drop_cached_reads() {
    let adapter = MockAdapter::new();
    let db = test_db(adapter.clone());
    User::create(&db, User::sample("Ada", "ada@example.com"))
        .await
        .unwrap();

    // primes the cache
    assert_eq!(User::query().count(&db).await.unwrap(), 1);

    db.transaction(|tx| {
        Box::pin(async move {
            let stmt = Statement::Document(polyorm::DocumentCommand::InsertOne {
                collection: "users".to_string(),
                document: serde_json::json!({
                    "id": "u-2",
                    "name": "Bob",
                    "email": "bob@example.com",
                    "age": 30,
                    "status": "active",
                }),
            });
            tx.execute(&stmt).await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    // the commit must not leave the stale count behind
    assert_eq!(User::query().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn transaction_rolls_back_on_err() {
    let adapter = MockAdapter::new();
    let db = test_db_uncached(adapter.clone());

    let result: Result<(), OrmError> = db
        .transaction(|tx| {
            Box::pin(async move {
                let stmt = Statement::Document(polyorm::DocumentCommand::InsertOne {
                    collection: "events".to_string(),
                    document: serde_json::json!({ "id": "e-1" }),
                });
                tx.execute(&stmt).await?;
                Err(OrmError::Query("abort".to_string()))
            })
        })
        .await;

    assert!(result.is_err());
    assert_eq!(adapter.rows_in("events"), 0);
}

#[tokio::test]
async fn registry_round_trips_named_handles() {
    let registry = DatabaseRegistry::new();
    let db = Arc::new(test_db(MockAdapter::new()));
    registry.insert("primary", db.clone()).unwrap();

    let fetched = registry.get("primary").unwrap();
    assert_eq!(fetched.kind(), polyorm::BackendKind::MongoDb);

    assert!(registry.get("replica").is_err());
    assert!(registry.remove("primary").is_some());
    assert!(registry.get("primary").is_err());
}

#[tokio::test]
async fn health_check_reports_latency() {
    let db = test_db(MockAdapter::new());
    let health = db.health_check().await;
    assert!(health.healthy);
    assert!(health.error.is_none());
}

#[tokio::test]
async fn raw_builder_round_trip_without_models() {
    let db = test_db_uncached(MockAdapter::new());
    let mut fields = serde_json::Map::new();
    fields.insert("id".to_string(), Value::String("m-1".to_string()));
    fields.insert("level".to_string(), Value::String("info".to_string()));

    let inserted = polyorm::QueryBuilder::<()>::table("messages")
        .insert(fields)
        .execute(&db)
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let rows = polyorm::QueryBuilder::<()>::table("messages")
        .where_eq("level", "info")
        .get(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String>("id").unwrap(), "m-1");
}
