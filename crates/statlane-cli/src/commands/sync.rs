use std::io::Read;
use std::path::Path;

use anyhow::Context;
use tracing::warn;

use statlane_core::{ActionKind, ActionOutput, Metric, SyncSummary};

use crate::runtime::{Runtime, parse_app};

/// Queue a backfill per metric and wait for all of them.
pub async fn sync(config: &Path, app: &str, metric: Option<Metric>) -> anyhow::Result<()> {
    let rt = Runtime::load(config)?;
    let app_id = parse_app(app)?;
    let metrics = match metric {
        Some(metric) => vec![metric],
        None => Metric::ALL.to_vec(),
    };

    let tickets: Vec<_> = metrics
        .iter()
        .map(|metric| {
            let kind = ActionKind::RequestAll { metric: *metric };
            (*metric, rt.queue.add_to_queue(rt.action(app_id.clone(), kind)))
        })
        .collect();

    let mut failures = 0;
    for (metric, ticket) in tickets {
        match ticket.await {
            Ok(ActionOutput::Synced(summary)) => print_summary(metric, &summary),
            Ok(other) => println!("{metric:<20} {other:?}"),
            Err(e) => {
                failures += 1;
                warn!(%metric, error = %e, "backfill failed");
                println!("{metric:<20} failed: {e}");
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} backfills failed", metrics.len());
    }
    Ok(())
}

/// Merge a saved report from a file or stdin.
pub async fn ingest(config: &Path, app: &str, metric: Metric, file: &Path) -> anyhow::Result<()> {
    let rt = Runtime::load(config)?;
    let raw = if file == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        raw
    } else {
        std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?
    };

    let kind = ActionKind::Ingest { metric, raw };
    match rt.queue.add_to_queue(rt.action(parse_app(app)?, kind)).await? {
        ActionOutput::Synced(summary) => print_summary(metric, &summary),
        other => println!("{metric:<20} {other:?}"),
    }
    Ok(())
}

fn print_summary(metric: Metric, summary: &SyncSummary) {
    println!(
        "{:<20} fetched {:>5}  written {:>6}  sentinels {:>5}",
        metric.name(),
        summary.fetched,
        summary.written,
        summary.sentinels
    );
}
