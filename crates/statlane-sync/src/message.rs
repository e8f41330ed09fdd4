//! JSON request/response contract spoken by front ends.
//!
//! ```text
//! {"request":"getData","type":"Sales","appId":"440","dateStart":"2024-01-01","dateEnd":"2024-01-31"}
//!   → [rows...] | null
//! {"request":"updateStats","appId":"440"}            → {"queued": 5}
//! {"request":"parseDOM","type":"Reviews","appId":"440","raw":"..."} → {"written": n}
//! {"request":"queueStatus"}                          → {"length": n, "text": "Updating stats (n)" | null}
//! {"request":"resetData","type":"Traffic","appId":"440"} → {"cleared": true}
//! ```
//!
//! Failures of any kind answer `{"error": "..."}`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use statlane_core::{ActionKind, ActionOutput, AppId, Metric};
use statlane_queue::{Action, ActionQueue, ActionSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    GetData {
        #[serde(rename = "type")]
        metric: Metric,
        app_id: AppId,
        date_start: NaiveDate,
        date_end: NaiveDate,
        #[serde(default)]
        return_lack_data: bool,
    },
    UpdateStats {
        app_id: AppId,
        /// Every metric when absent.
        #[serde(rename = "type", default)]
        metric: Option<Metric>,
    },
    #[serde(rename = "parseDOM")]
    ParseDom {
        #[serde(rename = "type")]
        metric: Metric,
        app_id: AppId,
        raw: String,
    },
    QueueStatus,
    ResetData {
        #[serde(rename = "type")]
        metric: Metric,
        app_id: AppId,
    },
}

/// Turns requests into queued actions and their results into JSON.
#[derive(Clone)]
pub struct MessageHandler {
    queue: ActionQueue,
    settings: ActionSettings,
}

impl MessageHandler {
    pub fn new(queue: ActionQueue, settings: ActionSettings) -> Self {
        Self { queue, settings }
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Parse and answer a raw JSON request.
    pub async fn handle_json(&self, raw: &str) -> Value {
        match serde_json::from_str::<Request>(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => error(format!("invalid request: {e}")),
        }
    }

    pub async fn handle(&self, request: Request) -> Value {
        debug!(?request, "handling request");
        match request {
            Request::GetData {
                metric,
                app_id,
                date_start,
                date_end,
                return_lack_data,
            } => {
                let kind = ActionKind::Get {
                    metric,
                    date_start,
                    date_end,
                    return_lack_data,
                };
                // Interactive reads jump ahead of queued backfills.
                match self.queue.insert_to_queue(self.action(app_id, kind)).await {
                    Ok(ActionOutput::Rows(rows)) => Value::Array(rows.into_iter().map(Value::Object).collect()),
                    Ok(_) => Value::Null,
                    Err(e) => error(e.to_string()),
                }
            }
            Request::UpdateStats { app_id, metric } => {
                let metrics = match metric {
                    Some(metric) => vec![metric],
                    None => Metric::ALL.to_vec(),
                };
                for metric in &metrics {
                    let kind = ActionKind::RequestAll { metric: *metric };
                    // Backfills run in the background; their failures land
                    // in the queue's failure history.
                    drop(self.queue.add_to_queue(self.action(app_id.clone(), kind)));
                }
                json!({ "queued": metrics.len() })
            }
            Request::ParseDom {
                metric,
                app_id,
                raw,
            } => {
                let kind = ActionKind::Ingest { metric, raw };
                match self.queue.add_to_queue(self.action(app_id, kind)).await {
                    Ok(ActionOutput::Synced(summary)) => json!({ "written": summary.written }),
                    Ok(_) => json!({ "written": 0 }),
                    Err(e) => error(e.to_string()),
                }
            }
            Request::QueueStatus => json!({
                "length": self.queue.queue_length(),
                "text": self.queue.status_text(),
            }),
            Request::ResetData { metric, app_id } => {
                let kind = ActionKind::Clear { metric };
                match self.queue.add_to_queue(self.action(app_id, kind)).await {
                    Ok(_) => json!({ "cleared": true }),
                    Err(e) => error(e.to_string()),
                }
            }
        }
    }

    fn action(&self, app_id: AppId, kind: ActionKind) -> Action {
        Action::new(app_id, kind).with_settings(self.settings)
    }
}

fn error(message: String) -> Value {
    json!({ "error": message })
}
