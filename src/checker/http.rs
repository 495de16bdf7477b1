// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::checker::request::build_update_request;
use crate::checker::response::{UpdateResults, parse_update_response};
use crate::checker::traits::{CheckError, CheckItem, UpdateChecker};
use crate::config::Configurator;
use crate::downloader::HttpClient;

/// Sends update checks as JSON over HTTP POST.
pub struct HttpUpdateChecker {
    client: Client,
    config: Arc<dyn Configurator>,
}

impl HttpUpdateChecker {
    pub fn new(config: Arc<dyn Configurator>) -> anyhow::Result<Self> {
        Ok(Self {
            client: HttpClient::new()?.client().clone(),
            config,
        })
    }

    async fn post(&self, url: &Url, body: &str) -> Result<UpdateResults, CheckError> {
        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckError::Status(status.as_u16()));
        }

        let text = response.text().await?;
        parse_update_response(&text)
    }
}

#[async_trait]
impl UpdateChecker for HttpUpdateChecker {
    async fn check_for_updates(
        &self,
        items: Vec<CheckItem>,
        extra: &str,
    ) -> Result<UpdateResults, CheckError> {
        let request = build_update_request(self.config.as_ref(), &items, extra);
        let body =
            serde_json::to_string(&request).map_err(|e| CheckError::Parse(e.to_string()))?;

        let mut last_error = CheckError::NoUrls;
        for url in self.config.update_urls() {
            debug!(url = %url, apps = items.len(), "Sending update check");
            match self.post(&url, &body).await {
                Ok(results) => {
                    info!(url = %url, results = results.list.len(), "Update check answered");
                    return Ok(results);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Update check failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestConfigurator;
    use crate::version::Version;
    use mockito::Matcher;
    use std::collections::BTreeMap;

    const APP: &str = "jebgalgnebhfojomionfpkfelancnnkf";

    fn check_item() -> CheckItem {
        CheckItem {
            id: APP.to_string(),
            version: Version::parse("1.0").unwrap(),
            fingerprint: String::new(),
            installer_attributes: BTreeMap::new(),
            on_demand: false,
        }
    }

    fn checker_for(urls: Vec<String>) -> HttpUpdateChecker {
        let config = TestConfigurator {
            update_urls: urls.iter().map(|u| Url::parse(u).unwrap()).collect(),
            ..TestConfigurator::default()
        };
        HttpUpdateChecker::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn test_check_posts_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/service/update2/json")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJsonString(format!(
                r#"{{"request":{{"apps":[{{"appid":"{APP}","version":"1.0"}}]}}}}"#
            )))
            .with_status(200)
            .with_body(format!(
                r#"{{"response":{{"apps":[{{"appid":"{APP}","updatecheck":{{"status":"noupdate"}}}}]}}}}"#
            ))
            .create_async()
            .await;

        let checker = checker_for(vec![format!("{}/service/update2/json", server.url())]);
        let results = checker
            .check_for_updates(vec![check_item()], "")
            .await
            .unwrap();

        assert_eq!(results.list.len(), 1);
        assert_eq!(results.list[0].extension_id, APP);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_check_falls_back_to_second_url() {
        let mut server = mockito::Server::new_async().await;
        let _down = server
            .mock("POST", "/primary")
            .with_status(500)
            .create_async()
            .await;
        let _up = server
            .mock("POST", "/secondary")
            .with_status(200)
            .with_body(r#"{"response":{"apps":[]}}"#)
            .create_async()
            .await;

        let checker = checker_for(vec![
            format!("{}/primary", server.url()),
            format!("{}/secondary", server.url()),
        ]);

        let results = checker
            .check_for_updates(vec![check_item()], "")
            .await
            .unwrap();
        assert!(results.list.is_empty());
    }

    #[tokio::test]
    async fn test_check_reports_last_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/primary")
            .with_status(503)
            .create_async()
            .await;

        let checker = checker_for(vec![format!("{}/primary", server.url())]);
        let err = checker
            .check_for_updates(vec![check_item()], "")
            .await
            .unwrap_err();

        assert_eq!(err.code(), 503);
    }

    #[tokio::test]
    async fn test_check_without_urls() {
        let checker = checker_for(Vec::new());
        let err = checker
            .check_for_updates(vec![check_item()], "")
            .await
            .unwrap_err();

        assert!(matches!(err, CheckError::NoUrls));
    }
}
