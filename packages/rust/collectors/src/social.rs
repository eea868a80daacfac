//! Social post collector: recent posts mentioning threats, annotated with
//! author handles and timestamps.

use std::collections::HashMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use threatintel_shared::{
    Capability, CollectorError, CollectorKind, CollectorSpec, Finding, FindingEntity, Result,
    ThreatIntelError,
};

use crate::http::{self, clip};
use crate::{Collector, Deadline};

/// Label length for a post headline.
const HEADLINE_CHARS: usize = 90;

/// Accepts both a flat `{"posts": [...]}` shape and the X v2 `{"data", "includes"}` shape.
#[derive(Debug, Deserialize)]
struct PostsResponse {
    #[serde(default, alias = "data")]
    posts: Vec<Post>,
    #[serde(default)]
    includes: Option<Includes>,
}

#[derive(Debug, Deserialize)]
struct Post {
    text: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "username")]
    author: Option<String>,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

/// Analyzes recent social posts for threat mentions.
pub struct SocialPostCollector {
    spec: CollectorSpec,
    client: Client,
}

impl SocialPostCollector {
    pub fn new(spec: CollectorSpec) -> Result<Self> {
        if !matches!(spec.kind, CollectorKind::SocialPosts { .. }) {
            return Err(ThreatIntelError::config(format!(
                "collector {} is not a social post collector",
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
impl Collector for SocialPostCollector {
    fn spec(&self) -> &CollectorSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(collector = %self.spec.name))]
    async fn invoke(
        &self,
        query: &str,
        deadline: Deadline,
    ) -> std::result::Result<Finding, CollectorError> {
        let CollectorKind::SocialPosts {
            endpoint,
            api_key_env,
            max_results,
        } = &self.spec.kind
        else {
            return Err(CollectorError::malformed("collector kind changed after construction"));
        };

        let mut request = self.client.get(endpoint.clone()).query(&[
            ("query", query.to_string()),
            ("max_results", max_results.to_string()),
            ("tweet.fields", "created_at,author_id".to_string()),
            ("expansions", "author_id".to_string()),
        ]);
        if let Some(token) = http::api_key(api_key_env.as_deref()) {
            request = request.bearer_auth(token);
        }

        let response: PostsResponse = http::fetch_json(request, deadline).await?;
        debug!(posts = response.posts.len(), "social search returned");

        Ok(build_finding(&self.spec.name, response))
    }
}

fn build_finding(source: &str, response: PostsResponse) -> Finding {
    let users: HashMap<String, String> = response
        .includes
        .unwrap_or_default()
        .users
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();

    let mut finding = Finding::new(source, Capability::SocialPosts);
    let mut text = String::from("## Social posts\n\n");

    if response.posts.is_empty() {
        text.push_str("No posts.\n");
    }

    for post in response.posts {
        let body = clip(&post.text, 1000);
        if body.is_empty() {
            continue;
        }

        let author = post
            .author
            .clone()
            .or_else(|| post.author_id.as_ref().and_then(|id| users.get(id).cloned()))
            .unwrap_or_else(|| "unknown".into());
        let published_at = post
            .created_at
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));
        let url = post.url.clone().or_else(|| {
            post.id
                .as_ref()
                .filter(|_| author != "unknown")
                .map(|id| format!("https://x.com/{author}/status/{id}"))
        });

        let _ = write!(text, "- @{author}");
        if let Some(ts) = published_at {
            let _ = write!(text, " ({})", ts.to_rfc3339());
        }
        let _ = write!(text, ": {body}");
        if let Some(url) = &url {
            let _ = write!(text, " <{url}>");
        }
        text.push('\n');

        finding.entities.push(FindingEntity {
            category: None,
            label: clip(&body, HEADLINE_CHARS),
            text: format!("@{author}: {body}"),
            url,
            published_at,
        });
    }

    finding.text = text;
    finding
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{method, query_param};

    fn spec(endpoint: &str) -> CollectorSpec {
        CollectorSpec {
            name: "XAnalysisAgent".into(),
            query: "ransomware".into(),
            timeout_secs: None,
            kind: CollectorKind::SocialPosts {
                endpoint: Url::parse(endpoint).unwrap(),
                api_key_env: None,
                max_results: 10,
            },
        }
    }

    #[tokio::test]
    async fn resolves_authors_from_includes() {
        let server = wiremock::MockServer::start().await;
        let body = serde_json::json!({
            "data": [
                {
                    "id": "1001",
                    "text": "Clop ransomware is exploiting CVE-2026-1234 in file transfer appliances",
                    "author_id": "u1",
                    "created_at": "2026-03-09T08:30:00Z"
                },
                { "id": "1002", "text": "   " }
            ],
            "includes": { "users": [{ "id": "u1", "username": "threatwatch" }] }
        });
        wiremock::Mock::given(method("GET"))
            .and(query_param("query", "ransomware"))
            .and(query_param("max_results", "10"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let collector = SocialPostCollector::new(spec(&server.uri())).unwrap();
        let finding = collector
            .invoke("ransomware", Deadline::after(Duration::from_secs(5)))
            .await
            .expect("finding");

        // The blank post is dropped.
        assert_eq!(finding.entities.len(), 1);
        let entity = &finding.entities[0];
        assert!(entity.text.starts_with("@threatwatch: Clop ransomware"));
        assert_eq!(entity.url.as_deref(), Some("https://x.com/threatwatch/status/1001"));
        assert!(finding.text.contains("- @threatwatch (2026-03-09T08:30:00+00:00)"));
    }

    #[tokio::test]
    async fn flat_posts_shape_is_accepted() {
        let server = wiremock::MockServer::start().await;
        let body = serde_json::json!({
            "posts": [{ "author": "sec_ops", "text": "Phishing wave against banks", "url": "https://social.example/p/9" }]
        });
        wiremock::Mock::given(method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let collector = SocialPostCollector::new(spec(&server.uri())).unwrap();
        let finding = collector
            .invoke("phishing", Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(finding.entities[0].label, "Phishing wave against banks");
        assert_eq!(finding.entities[0].url.as_deref(), Some("https://social.example/p/9"));
    }
}
