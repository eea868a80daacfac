//! Structured feed collector: RSS 2.0 / RDF / Atom advisories (NVD, US-CERT, ...).

use std::fmt::Write as _;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use threatintel_shared::{
    Capability, CollectorError, CollectorKind, CollectorSpec, FeedSource, Finding, FindingEntity,
    Result, SectionName, ThreatIntelError,
};

use crate::http::{self, clip};
use crate::{Collector, Deadline};

/// Summary length kept per feed item.
const SUMMARY_CHARS: usize = 400;

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(item|entry)\b[^>]*>(.*?)</(?:item|entry)>").expect("valid item regex")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid tag regex"));
static CDATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid cdata regex"));
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| element_regex("title"));
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| element_regex("link"));
static DATE_RES: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    ["pubDate", "updated", "published", "dc:date"].map(element_regex)
});
static SUMMARY_RES: LazyLock<[Regex; 3]> =
    LazyLock::new(|| ["description", "summary", "content"].map(element_regex));
static LINK_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link\b[^>]*href\s*=\s*["']([^"']+)["']"#).expect("valid href regex")
});

/// One parsed feed item.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: String,
}

/// Reads advisories from a fixed list of feeds.
pub struct FeedCollector {
    spec: CollectorSpec,
    client: Client,
}

impl FeedCollector {
    pub fn new(spec: CollectorSpec) -> Result<Self> {
        match &spec.kind {
            CollectorKind::Feed { feeds, .. } if !feeds.is_empty() => {}
            CollectorKind::Feed { .. } => {
                return Err(ThreatIntelError::config(format!(
                    "feed collector {} has no feeds",
                    spec.name
                )));
            }
            _ => {
                return Err(ThreatIntelError::config(format!(
                    "collector {} is not a feed collector",
                    spec.name
                )));
            }
        }
        Ok(Self {
            spec,
            client: http::build_client()?,
        })
    }
}

#[async_trait]
impl Collector for FeedCollector {
    fn spec(&self) -> &CollectorSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(collector = %self.spec.name))]
    async fn invoke(
        &self,
        query: &str,
        deadline: Deadline,
    ) -> std::result::Result<Finding, CollectorError> {
        let CollectorKind::Feed { feeds, max_items } = &self.spec.kind else {
            return Err(CollectorError::malformed("collector kind changed after construction"));
        };

        debug!(query, feeds = feeds.len(), "fetching feeds");

        // Fetch all feeds concurrently; results are consumed in config order.
        let handles: Vec<_> = feeds
            .iter()
            .cloned()
            .map(|feed| {
                let client = self.client.clone();
                tokio::spawn(async move {
                    let result = fetch_feed(&client, &feed, deadline).await;
                    (feed, result)
                })
            })
            .collect();

        let mut fetched = Vec::new();
        let mut failures = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((feed, Ok(items))) => fetched.push((feed, items)),
                Ok((feed, Err(e))) => {
                    warn!(feed = %feed.name, error = %e, "feed fetch failed");
                    failures.push((feed.name, e));
                }
                Err(e) => failures.push(("task".into(), CollectorError::network(e.to_string()))),
            }
        }

        if fetched.is_empty() {
            // Every feed failed: surface the first failure.
            return Err(failures
                .into_iter()
                .next()
                .map(|(_, e)| e)
                .unwrap_or_else(|| CollectorError::malformed("no feeds configured")));
        }

        Ok(build_finding(
            &self.spec.name,
            fetched,
            &failures,
            *max_items as usize,
        ))
    }
}

async fn fetch_feed(
    client: &Client,
    feed: &FeedSource,
    deadline: Deadline,
) -> std::result::Result<Vec<FeedItem>, CollectorError> {
    let body = http::fetch_text(client.get(feed.url.clone()), deadline).await?;
    let items = parse_feed(&body)?;
    debug!(feed = %feed.name, items = items.len(), "feed parsed");
    Ok(items)
}

fn build_finding(
    source: &str,
    fetched: Vec<(FeedSource, Vec<FeedItem>)>,
    failures: &[(String, CollectorError)],
    max_items: usize,
) -> Finding {
    let mut finding = Finding::new(source, Capability::Feed);
    let mut text = String::from("## RSS/Atom items\n\n");

    for (feed, mut items) in fetched {
        // Newest first; undated items keep their feed order at the end.
        items.sort_by(|a, b| match (a.published_at, b.published_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        items.truncate(max_items);

        let _ = writeln!(text, "### {}", feed.name);
        for item in items {
            let _ = write!(text, "- **{}**", item.title);
            if let Some(ts) = item.published_at {
                let _ = write!(text, " ({})", ts.format("%Y-%m-%d"));
            }
            if !item.summary.is_empty() {
                let _ = write!(text, ": {}", item.summary);
            }
            if let Some(link) = &item.link {
                let _ = write!(text, " <{link}>");
            }
            text.push('\n');

            finding.entities.push(FindingEntity {
                category: Some(SectionName::FeedUpdates),
                label: item.title,
                text: if item.summary.is_empty() {
                    format!("[{}]", feed.name)
                } else {
                    format!("[{}] {}", feed.name, item.summary)
                },
                url: item.link,
                published_at: item.published_at,
            });
        }
        text.push('\n');
    }

    for (name, err) in failures {
        let _ = writeln!(text, "- {name}: unavailable ({err})");
    }

    finding.text = text;
    finding
}

/// Parse RSS 2.0, RDF or Atom feed XML into items.
///
/// Returns [`CollectorError::Malformed`] when the body is not a feed at all.
pub fn parse_feed(body: &str) -> std::result::Result<Vec<FeedItem>, CollectorError> {
    let head: String = body.chars().take(2048).collect::<String>().to_ascii_lowercase();
    if !(head.contains("<rss") || head.contains("<feed") || head.contains("<rdf")) {
        return Err(CollectorError::malformed("response is not an RSS/Atom feed"));
    }

    let items = ITEM_RE
        .captures_iter(body)
        .filter_map(|cap| {
            let block = cap.get(2)?.as_str();
            let title = tag_text(block, &TITLE_RE).filter(|t| !t.is_empty())?;
            let link = tag_text(block, &LINK_RE)
                .filter(|l| !l.is_empty())
                .or_else(|| {
                    LINK_HREF_RE
                        .captures(block)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                });
            let published_at = DATE_RES
                .iter()
                .find_map(|re| tag_text(block, re))
                .and_then(|raw| parse_date(&raw));
            let summary = SUMMARY_RES
                .iter()
                .find_map(|re| tag_text(block, re))
                .map(|s| clip(&s, SUMMARY_CHARS))
                .unwrap_or_default();

            Some(FeedItem {
                title: clip(&title, 200),
                link,
                published_at,
                summary,
            })
        })
        .collect();

    Ok(items)
}

/// Matches `<tag ...>content</tag>`, capturing the content.
fn element_regex(tag: &str) -> Regex {
    let pattern = format!(r"(?is)<{0}\b[^>]*>(.*?)</{0}>", regex::escape(tag));
    Regex::new(&pattern).expect("valid element regex")
}

/// Text content of the first element `re` matches in `block`, with CDATA
/// unwrapped, nested markup stripped and basic entities decoded.
fn tag_text(block: &str, re: &Regex) -> Option<String> {
    let raw = re.captures(block)?.get(1)?.as_str();

    let unwrapped = CDATA_RE.replace_all(raw, "$1");
    let decoded = decode_entities(&unwrapped);
    // Descriptions are often escaped HTML; strip tags after decoding.
    let stripped = TAG_RE.replace_all(&decoded, " ");
    Some(stripped.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
