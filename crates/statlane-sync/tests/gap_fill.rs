//! Gap-detected range reads.

mod common;

use serde_json::json;

use common::{d, date_param, harness, header_only, record, traffic_csv};
use statlane_core::{ActionKind, ActionOutput, Metric, is_sentinel};
use statlane_sync::{FetchError, FetchResponse, SyncError};

fn get(metric: Metric, start: &str, end: &str, return_lack_data: bool) -> ActionKind {
    ActionKind::Get {
        metric,
        date_start: d(start),
        date_end: d(end),
        return_lack_data,
    }
}

#[tokio::test]
async fn empty_cache_fetches_each_missing_day_once() {
    let h = harness("2024-01-10", "2023-06-01", |url| {
        if date_param(url, "start_date") == d("2024-01-02") {
            header_only("Date,Page Category,Page Feature,Visits")
        } else {
            traffic_csv(url)
        }
    });

    let out = h
        .engine
        .run(&h.app, &get(Metric::Traffic, "2024-01-01", "2024-01-03", false))
        .await
        .unwrap();

    assert_eq!(h.fetcher.count(), 3);
    let rows = out.rows().unwrap();
    assert_eq!(rows.len(), 3);
    let dates: Vec<_> = rows.iter().map(|r| r["date"].clone()).collect();
    assert_eq!(dates, vec![json!("2024-01-01"), json!("2024-01-02"), json!("2024-01-03")]);
    assert!(!is_sentinel(&rows[0]));
    assert!(is_sentinel(&rows[1]));
    assert_eq!(rows[1]["page_category"], json!(""));

    // Sentinels count as cached: a second read goes nowhere near the portal.
    h.fetcher.reset();
    let again = h
        .engine
        .run(&h.app, &get(Metric::Traffic, "2024-01-01", "2024-01-03", false))
        .await
        .unwrap();
    assert_eq!(h.fetcher.count(), 0);
    assert_eq!(again, out);
}

#[tokio::test]
async fn missing_upstream_day_aborts_with_not_ready() {
    let h = harness("2024-01-10", "2023-06-01", |url| {
        if date_param(url, "start_date") == d("2024-01-02") {
            FetchResponse::ok("No data")
        } else {
            traffic_csv(url)
        }
    });

    let out = h
        .engine
        .run(&h.app, &get(Metric::Traffic, "2024-01-01", "2024-01-03", false))
        .await
        .unwrap();

    assert_eq!(out, ActionOutput::NotReady);
    let fetched: Vec<_> = h
        .fetcher
        .urls()
        .iter()
        .map(|url| date_param(url, "start_date"))
        .collect();
    assert_eq!(fetched, vec![d("2024-01-01"), d("2024-01-02")]);
}

#[tokio::test]
async fn return_lack_data_returns_what_is_cached() {
    let h = harness("2024-01-10", "2023-06-01", |url| {
        if date_param(url, "start_date") == d("2024-01-02") {
            FetchResponse::ok("No data")
        } else {
            traffic_csv(url)
        }
    });

    let out = h
        .engine
        .run(&h.app, &get(Metric::Traffic, "2024-01-01", "2024-01-03", true))
        .await
        .unwrap();

    // Early abort still applies; only the first day made it in.
    assert_eq!(h.fetcher.count(), 2);
    let rows = out.rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["date"], json!("2024-01-01"));
}

#[tokio::test]
async fn fully_cached_range_is_filtered_inclusively() {
    let h = harness("2024-02-01", "2023-06-01", |_| panic!("nothing should be fetched"));
    let session = h.engine.session(&h.app);
    let rows: Vec<_> = ["2023-12-31", "2024-01-03", "2024-01-01", "2024-01-02", "2024-01-04"]
        .into_iter()
        .map(|day| record(json!({"date": day, "adds": 1})))
        .collect();
    session.write_upsert(Metric::Wishlists, &rows).await.unwrap();

    let out = h
        .engine
        .run(&h.app, &get(Metric::Wishlists, "2024-01-01", "2024-01-03", true))
        .await
        .unwrap();

    let dates: Vec<_> = out.rows().unwrap().iter().map(|r| r["date"].clone()).collect();
    assert_eq!(dates, vec![json!("2024-01-01"), json!("2024-01-02"), json!("2024-01-03")]);
}

#[tokio::test]
async fn today_without_data_is_skipped() {
    let h = harness("2024-01-03", "2023-06-01", |url| {
        if date_param(url, "start_date") == d("2024-01-03") {
            FetchResponse::ok("No data")
        } else {
            FetchResponse::ok(format!(
                "Date,Adds\n{},4\n",
                date_param(url, "start_date")
            ))
        }
    });

    let out = h
        .engine
        .run(&h.app, &get(Metric::Wishlists, "2024-01-02", "2024-01-03", false))
        .await
        .unwrap();

    let rows = out.rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["adds"], json!(4));
    // No sentinel for today, so it is asked for again next time.
    h.fetcher.reset();
    h.engine
        .run(&h.app, &get(Metric::Wishlists, "2024-01-02", "2024-01-03", false))
        .await
        .unwrap();
    assert_eq!(h.fetcher.count(), 1);
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let h = harness("2024-01-10", "2023-06-01", traffic_csv);
    let err = h
        .engine
        .run(&h.app, &get(Metric::Traffic, "2024-01-05", "2024-01-01", false))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidRange { .. }));
}

#[tokio::test]
async fn login_page_fails_the_read() {
    let h = harness("2024-01-10", "2023-06-01", |_| {
        FetchResponse::ok("<!DOCTYPE html><html>Sign in</html>").with_content_type("text/html")
    });
    let err = h
        .engine
        .run(&h.app, &get(Metric::Sales, "2024-01-01", "2024-01-01", false))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Fetch(FetchError::HtmlInsteadOfCsv { .. })));
    assert!(h.fetcher.urls()[0].contains("pkgID%3D100"));
}

#[tokio::test]
async fn error_text_is_not_cached_as_no_data() {
    let h = harness("2024-01-10", "2023-06-01", |_| FetchResponse::ok("Access denied"));

    let err = h
        .engine
        .run(&h.app, &get(Metric::Wishlists, "2024-01-02", "2024-01-02", false))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Parse { .. }));
    let session = h.engine.session(&h.app);
    assert!(session.read_all(Metric::Wishlists).await.unwrap().is_empty());
}

#[tokio::test]
async fn review_login_page_is_fetched_again_next_time() {
    let h = harness("2024-01-10", "2023-06-01", |_| {
        FetchResponse::ok("<!DOCTYPE html><html>Sign in</html>").with_content_type("text/html")
    });
    let read = get(Metric::Reviews, "2024-01-02", "2024-01-02", false);

    let err = h.engine.run(&h.app, &read).await.unwrap_err();
    assert!(matches!(err, SyncError::Parse { .. }));
    let session = h.engine.session(&h.app);
    assert!(session.read_all(Metric::Reviews).await.unwrap().is_empty());

    h.fetcher.reset();
    assert!(h.engine.run(&h.app, &read).await.is_err());
    assert_eq!(h.fetcher.count(), 1);
}
