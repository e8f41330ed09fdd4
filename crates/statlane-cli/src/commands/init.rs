use std::path::Path;

use chrono::NaiveDate;

use statlane_core::StatlaneConfig;

use crate::runtime::parse_app;

pub fn run(path: &Path, app: &str, page_created: NaiveDate, force: bool) -> anyhow::Result<()> {
    let app_id = parse_app(app)?;
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = StatlaneConfig::scaffold(app_id.as_str(), page_created);
    std::fs::write(path, config.to_toml_string()?)?;
    println!("✓ Generated {}", path.display());
    Ok(())
}
