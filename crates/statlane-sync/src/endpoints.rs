//! Report URLs on the partner portal.

use anyhow::Context;
use chrono::NaiveDate;
use reqwest::Url;

use statlane_core::config::PortalConfig;
use statlane_core::{AppId, Metric, format_date};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid portal URL {base_url:?}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("portal URL {base_url:?} cannot carry report paths");
        }
        Ok(Self { base })
    }

    pub fn from_config(config: &PortalConfig) -> anyhow::Result<Self> {
        Self::new(&config.base_url)
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Report covering `[start, end]` for one metric. Sales reports are
    /// scoped to the application's packages. Path segments and query values
    /// are percent-encoded.
    pub fn report(
        &self,
        metric: Metric,
        app_id: &AppId,
        start: NaiveDate,
        end: NaiveDate,
        package_ids: &[String],
    ) -> String {
        let app = app_id.as_str();
        let (start, end) = (format_date(start), format_date(end));
        let dated = |start: String, end: String| vec![("start_date", start), ("end_date", end)];
        let attachment = || ("attachment", "true".to_string());

        let (segments, query): (Vec<&str>, Vec<(&str, String)>) = match metric {
            Metric::Traffic => {
                let mut query = vec![attachment(), ("preset_date_range", "custom".to_string())];
                query.extend(dated(start, end));
                (vec!["apps", "navtrafficstats", app], query)
            }
            Metric::Wishlists => {
                let mut query = vec![attachment()];
                query.extend(dated(start, end));
                (vec!["apps", "wishlistactions", app], query)
            }
            Metric::WishlistConversions => {
                let mut query = vec![attachment()];
                query.extend(dated(start, end));
                (vec!["apps", "wishlistconversions", app], query)
            }
            Metric::Sales => (
                vec!["report_csv.php"],
                vec![
                    ("file", format!("SalesData_{app}")),
                    (
                        "params",
                        format!(
                            "query=QueryPackageSalesForCSV^pkgID={}^dateStart={start}^dateEnd={end}^HasDivisions=0",
                            package_ids.join(",")
                        ),
                    ),
                ],
            ),
            Metric::Reviews => (vec!["apps", "reviewexport", app], dated(start, end)),
        };

        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut().extend_pairs(query);
        url.into()
    }
}
