//! reqwest-backed [`Fetcher`] for the partner portal.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use tracing::debug;

use statlane_core::config::PortalConfig;

use crate::collaborators::{BoxFuture, FetchResponse, Fetcher};
use crate::error::FetchError;

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with the configured user agent, timeout, and session
    /// cookie. Cookies set by the portal are kept for later requests.
    pub fn new(config: &PortalConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &config.cookie {
            let value = HeaderValue::from_str(cookie).context("portal cookie is not a valid header")?;
            headers.insert(COOKIE, value);
        }
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        Box::pin(async move {
            let transport = |e: reqwest::Error| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            };
            let resp = self.client.get(url).send().await.map_err(transport)?;
            let status = resp.status().as_u16();
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.text().await.map_err(transport)?;
            debug!(%url, status, bytes = body.len(), "portal responded");
            Ok(FetchResponse {
                status,
                content_type,
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(server: &MockServer) -> PortalConfig {
        PortalConfig {
            base_url: server.uri(),
            user_agent: "statlane-test".to_string(),
            request_timeout_secs: 5,
            cookie: Some("sessionid=abc".to_string()),
        }
    }

    #[tokio::test]
    async fn fetch_returns_status_type_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apps/navtrafficstats/440"))
            .and(header("cookie", "sessionid=abc"))
            .and(header("user-agent", "statlane-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/csv")
                    .set_body_string("Date,Visits\n2024-01-01,3\n"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config(&server)).unwrap();
        let url = format!("{}/apps/navtrafficstats/440", server.uri());
        let resp = fetcher.fetch(&url).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("text/csv"));
        assert!(resp.body.starts_with("Date,Visits"));
    }

    #[tokio::test]
    async fn login_page_is_rejected_for_csv_reports() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><body>Sign in</body></html>"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config(&server)).unwrap();
        let url = format!("{}/report_csv.php", server.uri());
        let err = fetcher
            .fetch(&url)
            .await
            .unwrap()
            .into_body(&url, true)
            .unwrap_err();
        assert!(matches!(err, FetchError::HtmlInsteadOfCsv { .. }));
    }

    #[tokio::test]
    async fn server_error_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config(&server)).unwrap();
        let url = format!("{}/apps/wishlistactions/440", server.uri());
        let resp = fetcher.fetch(&url).await.unwrap();
        assert_eq!(
            resp.into_body(&url, true),
            Err(FetchError::Status { url, status: 502 })
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let portal = PortalConfig {
            request_timeout_secs: 1,
            ..PortalConfig::default()
        };
        let fetcher = HttpFetcher::new(&portal).unwrap();
        let err = fetcher.fetch("http://127.0.0.1:9/none").await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
