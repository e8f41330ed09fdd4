//! Shared harness: an in-memory store, a scripted portal, and a fixed clock.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde_json::Value;

use statlane_core::{AppId, Record, parse_date};
use statlane_store::StatsDatabase;
use statlane_sync::{
    BoxFuture, Collaborators, CsvReportParser, Endpoints, FetchError, FetchResponse, Fetcher,
    FixedClock, StaticAppDirectory, SyncEngine,
};

pub const APP: &str = "440";

type Responder = Box<dyn Fn(&str) -> FetchResponse + Send + Sync>;

/// Answers every request through a closure and remembers the URLs.
pub struct ScriptedFetcher {
    respond: Responder,
    urls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn reset(&self) {
        self.urls.lock().unwrap().clear();
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        self.urls.lock().unwrap().push(url.to_string());
        let response = (self.respond)(url);
        Box::pin(async move { Ok(response) })
    }
}

pub struct Harness {
    pub db: StatsDatabase,
    pub engine: Arc<SyncEngine>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub clock: Arc<FixedClock>,
    pub app: AppId,
}

pub fn d(s: &str) -> NaiveDate {
    parse_date(s).unwrap()
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

/// Value of a `name=YYYY-MM-DD` parameter in a report URL.
pub fn date_param(url: &str, name: &str) -> NaiveDate {
    let needle = format!("{name}=");
    let start = url.find(&needle).unwrap() + needle.len();
    d(&url[start..start + 10])
}

pub fn harness(
    today: &str,
    page_created: &str,
    respond: impl Fn(&str) -> FetchResponse + Send + Sync + 'static,
) -> Harness {
    let db = StatsDatabase::open_in_memory().unwrap();
    let fetcher = Arc::new(ScriptedFetcher {
        respond: Box::new(respond),
        urls: Mutex::new(Vec::new()),
    });
    let clock = Arc::new(FixedClock::new(d(today)));
    let mut apps = StaticAppDirectory::default().with_app(APP, d(page_created));
    apps = apps.with_packages(APP, vec!["100".to_string()]);
    let collaborators = Collaborators {
        fetcher: fetcher.clone(),
        parser: Arc::new(CsvReportParser),
        apps: Arc::new(apps),
        clock: clock.clone(),
    };
    let engine = SyncEngine::new(db.clone(), collaborators, Endpoints::new("http://portal.test").unwrap());
    Harness {
        db,
        engine: Arc::new(engine),
        fetcher,
        clock,
        app: AppId::new(APP).unwrap(),
    }
}

/// One traffic row for the day the URL asks for.
pub fn traffic_csv(url: &str) -> FetchResponse {
    let day = date_param(url, "start_date");
    FetchResponse::ok(format!(
        "Date,Page Category,Page Feature,Visits\n{day},Store,Home,5\n"
    ))
    .with_content_type("text/csv")
}

pub fn header_only(columns: &str) -> FetchResponse {
    FetchResponse::ok(format!("{columns}\n")).with_content_type("text/csv")
}
