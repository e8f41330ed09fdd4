//! Schema healing integration tests.
//!
//! Seeds tables with key shapes that disagree with the built-in definitions
//! and checks that opening heals by binding new tables under a higher
//! version, never by dropping the old ones.

use serde_json::{Value, json};
use statlane_core::{AppId, KeyShape, Metric, Record, TableDef};
use statlane_store::{SessionOptions, StatsDatabase, StoreError, StoreSession, StoreState};

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn app() -> AppId {
    AppId::new("440").unwrap()
}

/// Built-in tables, except Traffic is keyed by date alone.
fn legacy_tables() -> Vec<TableDef> {
    TableDef::builtin()
        .into_iter()
        .map(|def| {
            if def.metric == Metric::Traffic {
                TableDef::new(Metric::Traffic, KeyShape::field("date"))
            } else {
                def
            }
        })
        .collect()
}

async fn seed_legacy_traffic(db: &StatsDatabase) {
    let options = SessionOptions {
        tables: legacy_tables(),
        ..SessionOptions::default()
    };
    let legacy = StoreSession::open(db.clone(), app(), 1, options).await.unwrap();
    legacy
        .write_upsert(
            Metric::Traffic,
            &[
                record(json!({"date": "2024-01-01", "visits": 10})),
                record(json!({"date": "2024-01-02", "visits": 20})),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn wrong_traffic_key_shape_binds_new_table_at_higher_version() {
    let db = StatsDatabase::open_in_memory().unwrap();
    seed_legacy_traffic(&db).await;

    let session = StoreSession::open(db.clone(), app(), 1, SessionOptions::default())
        .await
        .unwrap();

    assert_eq!(session.state(), StoreState::Ready);
    assert_eq!(session.version(), 2);
    assert_eq!(
        session.physical_table(Metric::Traffic).as_deref(),
        Some("440_Traffic#v2")
    );
    // Healthy tables keep their original binding.
    assert_eq!(
        session.physical_table(Metric::Sales).as_deref(),
        Some("440_Sales")
    );

    // The mismatched table is still there with its rows.
    assert_eq!(db.count_rows("440_Traffic").unwrap(), Some(2));
    assert_eq!(db.count_rows("440_Traffic#v2").unwrap(), Some(0));
    assert!(session.read_all(Metric::Traffic).await.unwrap().is_empty());
}

#[tokio::test]
async fn healed_table_accepts_composite_keys() {
    let db = StatsDatabase::open_in_memory().unwrap();
    seed_legacy_traffic(&db).await;

    let session = StoreSession::open(db, app(), 1, SessionOptions::default())
        .await
        .unwrap();
    session
        .write_upsert_one(
            Metric::Traffic,
            &record(json!({
                "date": "2024-01-01",
                "page_category": "Store",
                "page_feature": "Home",
                "visits": 4
            })),
        )
        .await
        .unwrap();

    assert_eq!(session.read_all(Metric::Traffic).await.unwrap().len(), 1);
}

#[tokio::test]
async fn healing_is_stable_across_reopen() {
    let db = StatsDatabase::open_in_memory().unwrap();
    seed_legacy_traffic(&db).await;

    let first = StoreSession::open(db.clone(), app(), 1, SessionOptions::default())
        .await
        .unwrap();
    let physical = first.physical_table(Metric::Traffic);
    drop(first);

    let second = StoreSession::open(db.clone(), app(), 1, SessionOptions::default())
        .await
        .unwrap();
    assert_eq!(second.version(), 2);
    assert_eq!(second.physical_table(Metric::Traffic), physical);
}

#[tokio::test]
async fn exceeding_retry_cap_is_fatal() {
    let db = StatsDatabase::open_in_memory().unwrap();
    seed_legacy_traffic(&db).await;

    let options = SessionOptions {
        max_schema_retries: 0,
        ..SessionOptions::default()
    };
    let session = StoreSession::new(db, app(), 1, options);

    let err = session.wait_until_ready().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        StoreError::SchemaUnavailable {
            attempts: 1,
            last_version: 1
        }
    ));
    assert_eq!(session.state(), StoreState::Failed);

    // Every later operation surfaces the same condition.
    let again = session.read_all(Metric::Sales).await.unwrap_err();
    assert!(again.is_fatal());
}

#[tokio::test]
async fn newer_request_upgrades_without_touching_matching_tables() {
    let db = StatsDatabase::open_in_memory().unwrap();
    let session = StoreSession::open(db.clone(), app(), 1, SessionOptions::default())
        .await
        .unwrap();
    session
        .write_upsert_one(Metric::Wishlists, &record(json!({"date": "2024-01-01", "adds": 1})))
        .await
        .unwrap();
    drop(session);

    let upgraded = StoreSession::open(db.clone(), app(), 5, SessionOptions::default())
        .await
        .unwrap();
    assert_eq!(upgraded.version(), 5);
    assert_eq!(db.version().unwrap(), Some(5));
    assert_eq!(
        upgraded.physical_table(Metric::Wishlists).as_deref(),
        Some("440_Wishlists")
    );
    assert_eq!(upgraded.read_all(Metric::Wishlists).await.unwrap().len(), 1);
}
