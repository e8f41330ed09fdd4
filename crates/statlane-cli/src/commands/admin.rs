use std::path::Path;

use statlane_core::{ActionKind, ActionOutput, Metric, is_sentinel};

use crate::runtime::{Runtime, parse_app};

/// Row and sentinel counts for every configured application.
pub async fn status(config: &Path) -> anyhow::Result<()> {
    let rt = Runtime::load(config)?;
    let apps = rt.app_ids()?;
    if apps.is_empty() {
        println!("No applications configured in {}", config.display());
        return Ok(());
    }

    println!("{:<10} {:<20} {:>8} {:>10}", "APP", "METRIC", "ROWS", "SENTINELS");
    for app_id in apps {
        let session = rt.engine.session(&app_id);
        for metric in Metric::ALL {
            let rows = session.read_all(metric).await?;
            let sentinels = rows.iter().filter(|r| is_sentinel(r)).count();
            println!(
                "{:<10} {:<20} {:>8} {:>10}",
                app_id.as_str(),
                metric.name(),
                rows.len(),
                sentinels
            );
        }
    }
    if let Some(version) = rt.db.version()? {
        println!("\nschema version {version}");
    }
    Ok(())
}

/// Clear one metric table, or every table of the application.
pub async fn reset(config: &Path, app: &str, metric: Option<Metric>) -> anyhow::Result<()> {
    let rt = Runtime::load(config)?;
    let app_id = parse_app(app)?;
    match metric {
        Some(metric) => {
            let kind = ActionKind::Clear { metric };
            rt.queue.add_to_queue(rt.action(app_id.clone(), kind)).await?;
            println!("✓ Cleared {}", metric.table_name(&app_id));
        }
        None => {
            let action = rt.action(app_id.clone(), ActionKind::DropApp);
            if let ActionOutput::Dropped(dropped) = rt.queue.add_to_queue(action).await? {
                println!("✓ Dropped {dropped} table(s) of application {app_id}");
            }
        }
    }
    Ok(())
}

/// Physical tables and their row counts.
pub fn tables(config: &Path) -> anyhow::Result<()> {
    let rt = Runtime::load(config)?;
    let names = rt.db.table_names()?;
    println!("{:<40} {:>8}", "TABLE", "ROWS");
    for name in names {
        let rows = rt
            .db
            .count_rows(&name)?
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{name:<40} {rows:>8}");
    }
    Ok(())
}
