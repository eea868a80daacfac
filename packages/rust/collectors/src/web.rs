//! Web search collector (Exa-compatible search API).

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use threatintel_shared::{
    Capability, CollectorError, CollectorKind, CollectorSpec, Finding, FindingEntity,
    LOOKBACK_DAYS, Result, ThreatIntelError,
};

use crate::http::{self, clip};
use crate::{Collector, Deadline};

/// Snippet length kept per result.
const SNIPPET_CHARS: usize = 600;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    num_results: u32,
    start_published_date: String,
    contents: SearchContents,
}

#[derive(Debug, Serialize)]
struct SearchContents {
    text: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    #[serde(default)]
    title: Option<String>,
    url: String,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Searches the web for recent threat reports and returns them as
/// uncategorized, URL-annotated entities.
pub struct WebSearchCollector {
    spec: CollectorSpec,
    client: Client,
}

impl WebSearchCollector {
    pub fn new(spec: CollectorSpec) -> Result<Self> {
        if !matches!(spec.kind, CollectorKind::WebSearch { .. }) {
            return Err(ThreatIntelError::config(format!(
                "collector {} is not a web search collector",
                spec.name
            )));
        }
        Ok(Self {
            spec,
            client: http::build_client()?,
        })
    }
}

#[async_trait]
impl Collector for WebSearchCollector {
    fn spec(&self) -> &CollectorSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(collector = %self.spec.name))]
    async fn invoke(
        &self,
        query: &str,
        deadline: Deadline,
    ) -> std::result::Result<Finding, CollectorError> {
        let CollectorKind::WebSearch {
            endpoint,
            api_key_env,
            max_results,
        } = &self.spec.kind
        else {
            return Err(CollectorError::malformed("collector kind changed after construction"));
        };

        let body = SearchRequest {
            query,
            num_results: *max_results,
            start_published_date: (Utc::now() - Duration::days(LOOKBACK_DAYS)).to_rfc3339(),
            contents: SearchContents { text: true },
        };

        let mut request = self.client.post(endpoint.clone()).json(&body);
        if let Some(key) = http::api_key(api_key_env.as_deref()) {
            request = request.header("x-api-key", key);
        }

        let response: SearchResponse = http::fetch_json(request, deadline).await?;
        debug!(results = response.results.len(), "web search returned");

        Ok(build_finding(&self.spec.name, response.results))
    }
}

fn build_finding(source: &str, results: Vec<SearchResult>) -> Finding {
    let mut finding = Finding::new(source, Capability::WebSearch);
    let mut text = String::from("## Web search results\n\n");

    if results.is_empty() {
        text.push_str("No results.\n");
    }

    for result in results {
        let title = result
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(result.url.as_str())
            .to_string();
        let snippet = result.text.as_deref().map(|t| clip(t, SNIPPET_CHARS)).unwrap_or_default();
        let published_at = result
            .published_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));

        let _ = write!(text, "- **{title}**");
        if let Some(ts) = published_at {
            let _ = write!(text, " ({})", ts.format("%Y-%m-%d"));
        }
        if !snippet.is_empty() {
            let _ = write!(text, ": {snippet}");
        }
        let _ = writeln!(text, " <{}>", result.url);

        finding.entities.push(FindingEntity {
            category: None,
            label: title,
            text: snippet,
            url: Some(result.url),
            published_at,
        });
    }

    finding.text = text;
    finding
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use url::Url;
    use wiremock::matchers::{header, method};

    fn spec(endpoint: &str) -> CollectorSpec {
        CollectorSpec {
            name: "WebSearchAgent".into(),
            query: "ransomware".into(),
            timeout_secs: None,
            kind: CollectorKind::WebSearch {
                endpoint: Url::parse(endpoint).unwrap(),
                api_key_env: Some("TI_TEST_WEB_KEY_UNSET_0417".into()),
                max_results: 5,
            },
        }
    }

    #[tokio::test]
    async fn search_results_become_entities_with_provenance() {
        let server = wiremock::MockServer::start().await;
        let body = serde_json::json!({
            "results": [
                {
                    "title": "LockBit ransomware hits hospitals",
                    "url": "https://news.example.com/lockbit",
                    "publishedDate": "2026-03-08T10:00:00.000Z",
                    "text": "The LockBit ransomware group targeted healthcare providers via phishing."
                },
                {
                    "url": "https://blog.example.com/apt29",
                    "text": "APT29 used T1566.001 spearphishing attachments."
                }
            ]
        });
        wiremock::Mock::given(method("POST"))
            .and(header("content-type", "application/json"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let collector = WebSearchCollector::new(spec(&server.uri())).unwrap();
        let finding = collector
            .invoke("ransomware", Deadline::after(StdDuration::from_secs(5)))
            .await
            .expect("finding");

        assert!(finding.success);
        assert_eq!(finding.source, "WebSearchAgent");
        assert_eq!(finding.entities.len(), 2);
        assert_eq!(finding.entities[0].label, "LockBit ransomware hits hospitals");
        assert!(finding.entities[0].published_at.is_some());
        // Missing title falls back to the URL.
        assert_eq!(finding.entities[1].label, "https://blog.example.com/apt29");
        assert!(finding.text.contains("<https://news.example.com/lockbit>"));
        assert!(finding.text.contains("(2026-03-08)"));
    }

    #[tokio::test]
    async fn expired_deadline_fails_fast() {
        let collector = WebSearchCollector::new(spec("http://127.0.0.1:9/search")).unwrap();
        let err = collector
            .invoke("ransomware", Deadline::after(StdDuration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err, CollectorError::Timeout);
    }

    #[test]
    fn rejects_wrong_kind() {
        let mut spec = spec("https://example.com");
        spec.kind = CollectorKind::Feed {
            feeds: vec![],
            max_items: 1,
        };
        assert!(WebSearchCollector::new(spec).is_err());
    }
}
