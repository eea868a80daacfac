//! Core domain types: collector specs, findings, outcomes, reports, and session turns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{CollectorError, Result, ThreatIntelError};

/// Placeholder text for a section with no usable data.
pub const NO_DATA: &str = "No data available";

/// Default report header line.
pub const DEFAULT_HEADER: &str = "Threat Intelligence Report";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Caller-chosen session identifier. Non-empty, trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a session identifier.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(ThreatIntelError::validation("session id must not be empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// CollectorSpec
// ---------------------------------------------------------------------------

/// Capability tag of a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WebSearch,
    SocialPosts,
    Feed,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::SocialPosts => "social_posts",
            Self::Feed => "feed",
        }
    }

    /// Report sections this capability normally contributes to.
    ///
    /// A failed collector leaves a placeholder note in each of these.
    pub fn sections(&self) -> &'static [SectionName] {
        match self {
            Self::WebSearch => &[
                SectionName::Summary,
                SectionName::ThreatActors,
                SectionName::TargetedIndustries,
                SectionName::AttackVectors,
                SectionName::Ttps,
            ],
            Self::SocialPosts => &[
                SectionName::Summary,
                SectionName::ThreatActors,
                SectionName::AttackVectors,
                SectionName::Ttps,
            ],
            Self::Feed => &[
                SectionName::Summary,
                SectionName::AttackVectors,
                SectionName::FeedUpdates,
            ],
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named RSS/Atom feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    /// Short display name used as provenance (e.g. "NVD").
    pub name: String,
    pub url: Url,
}

/// Variant-specific collector settings, tagged by `kind` in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectorKind {
    /// Web search API (Exa-compatible request/response shape).
    WebSearch {
        endpoint: Url,
        /// Name of the env var holding the API key (never the key itself).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
        #[serde(default = "default_max_results")]
        max_results: u32,
    },
    /// Social post search endpoint.
    SocialPosts {
        endpoint: Url,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
        #[serde(default = "default_max_results")]
        max_results: u32,
    },
    /// Structured RSS/Atom feeds.
    Feed {
        feeds: Vec<FeedSource>,
        #[serde(default = "default_max_items")]
        max_items: u32,
    },
}

fn default_max_results() -> u32 {
    10
}
fn default_max_items() -> u32 {
    10
}

impl CollectorKind {
    pub fn capability(&self) -> Capability {
        match self {
            Self::WebSearch { .. } => Capability::WebSearch,
            Self::SocialPosts { .. } => Capability::SocialPosts,
            Self::Feed { .. } => Capability::Feed,
        }
    }
}

/// Startup-time definition of one collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSpec {
    /// Unique name within a run, used as provenance.
    pub name: String,
    /// Query template; `{date}` and `{since}` are substituted per run.
    pub query: String,
    /// Per-collector timeout. The effective timeout never exceeds the run deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub kind: CollectorKind,
}

/// Look-back window substituted for `{since}`.
pub const LOOKBACK_DAYS: i64 = 7;

impl CollectorSpec {
    pub fn capability(&self) -> Capability {
        self.kind.capability()
    }

    /// Render the query template for a run started at `now`.
    pub fn render_query(&self, now: DateTime<Utc>) -> String {
        let since = now - Duration::days(LOOKBACK_DAYS);
        self.query
            .replace("{date}", &now.format("%Y-%m-%d").to_string())
            .replace("{since}", &since.format("%Y-%m-%d").to_string())
    }
}

// ---------------------------------------------------------------------------
// Findings and outcomes
// ---------------------------------------------------------------------------

/// One entity or snippet reported by a collector, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingEntity {
    /// Section this entity belongs to, when the collector knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<SectionName>,
    pub label: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// One collector's structured output for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the collector that produced this finding.
    pub source: String,
    pub capability: Capability,
    /// Raw markdown text annotated with provenance.
    pub text: String,
    /// Parsed entities, in discovery order.
    #[serde(default)]
    pub entities: Vec<FindingEntity>,
    pub collected_at: DateTime<Utc>,
    pub success: bool,
}

impl Finding {
    /// Start a successful finding for `source`.
    pub fn new(source: impl Into<String>, capability: Capability) -> Self {
        Self {
            source: source.into(),
            capability,
            text: String::new(),
            entities: Vec::new(),
            collected_at: Utc::now(),
            success: true,
        }
    }

    /// Check the finding is usable by synthesis.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(ThreatIntelError::parse("finding has no source name"));
        }
        if !self.success {
            return Err(ThreatIntelError::parse(format!(
                "finding from {} is flagged unsuccessful",
                self.source
            )));
        }
        if self.text.trim().is_empty() && self.entities.is_empty() {
            return Err(ThreatIntelError::parse(format!(
                "finding from {} carries neither text nor entities",
                self.source
            )));
        }
        Ok(())
    }
}

/// Resolved result of one collector within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success(Finding),
    Failure { reason: String, transient: bool },
    TimedOut,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Short human-readable reason for a non-success outcome.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Success(_) => None,
            Self::Failure { reason, .. } => Some(reason.clone()),
            Self::TimedOut => Some("timed out".into()),
        }
    }
}

impl From<CollectorError> for Outcome {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Timeout => Self::TimedOut,
            other => Self::Failure {
                transient: other.is_transient(),
                reason: other.to_string(),
            },
        }
    }
}

/// An outcome tagged with the collector it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorOutcome {
    pub collector: String,
    pub capability: Capability,
    pub outcome: Outcome,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    /// `Completed` iff at least one outcome is a success.
    pub fn from_outcomes(outcomes: &[CollectorOutcome]) -> Self {
        if outcomes.iter().any(|o| o.outcome.is_success()) {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// The six fixed report sections, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionName {
    Summary,
    ThreatActors,
    TargetedIndustries,
    AttackVectors,
    Ttps,
    FeedUpdates,
}

impl SectionName {
    /// All sections in their fixed report order.
    pub const ALL: [SectionName; 6] = [
        Self::Summary,
        Self::ThreatActors,
        Self::TargetedIndustries,
        Self::AttackVectors,
        Self::Ttps,
        Self::FeedUpdates,
    ];

    /// Display title used in rendered reports.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Summary => "Summary",
            Self::ThreatActors => "Threat Actors",
            Self::TargetedIndustries => "Targeted Industries",
            Self::AttackVectors => "Attack Vectors",
            Self::Ttps => "TTPs",
            Self::FeedUpdates => "Feed Updates",
        }
    }
}

impl std::fmt::Display for SectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// Whether a section carries merged entities or fell back to the placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Populated,
    Degraded,
}

/// A merged entity as it appears in a report section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub label: String,
    pub text: String,
    /// Collector names, first-seen order.
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// Not present in the session's previous report.
    #[serde(default)]
    pub is_new: bool,
}

/// One fixed report section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: SectionName,
    /// Rendered section body (markdown bullets or the placeholder).
    pub text: String,
    pub entries: Vec<ReportEntry>,
    /// Placeholder notes for collectors that contributed nothing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub status: SectionStatus,
}

impl Section {
    /// A placeholder section with no data.
    pub fn unavailable(name: SectionName, notes: Vec<String>) -> Self {
        let mut text = NO_DATA.to_string();
        if !notes.is_empty() {
            text.push('\n');
            for note in &notes {
                text.push_str(&format!("\n- _{note}_"));
            }
        }
        Self {
            name,
            text,
            entries: Vec::new(),
            notes,
            status: SectionStatus::Degraded,
        }
    }
}

/// Fixed-schema report: header, timestamp, and exactly six ordered sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub header: String,
    pub generated_at: DateTime<Utc>,
    sections: Vec<Section>,
}

impl Report {
    /// Assemble a report from sections given in [`SectionName::ALL`] order.
    pub fn new(header: impl Into<String>, generated_at: DateTime<Utc>, sections: [Section; 6]) -> Result<Self> {
        let report = Self {
            header: header.into(),
            generated_at,
            sections: sections.into(),
        };
        report.validate()?;
        Ok(report)
    }

    /// Check the six-section invariant (used after deserializing stored payloads).
    pub fn validate(&self) -> Result<()> {
        let names: Vec<SectionName> = self.sections.iter().map(|s| s.name).collect();
        if names != SectionName::ALL {
            return Err(ThreatIntelError::validation(format!(
                "report sections out of order or incomplete: {names:?}"
            )));
        }
        Ok(())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: SectionName) -> &Section {
        // Index is stable because `validate` pins the order.
        &self.sections[name as usize]
    }

    /// Sections that fell back to the placeholder.
    pub fn degraded_sections(&self) -> Vec<SectionName> {
        self.sections
            .iter()
            .filter(|s| s.status == SectionStatus::Degraded)
            .map(|s| s.name)
            .collect()
    }

    /// True when every section fell back to the placeholder.
    pub fn is_empty(&self) -> bool {
        self.sections
            .iter()
            .all(|s| s.status == SectionStatus::Degraded)
    }

    /// Entity labels of one section, in report order.
    pub fn labels(&self, name: SectionName) -> Vec<&str> {
        self.section(name)
            .entries
            .iter()
            .map(|e| e.label.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SessionTurn
// ---------------------------------------------------------------------------

/// One persisted report run in a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTurn {
    pub session_id: SessionId,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub report: Report,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn web_spec() -> CollectorSpec {
        CollectorSpec {
            name: "WebSearchAgent".into(),
            query: "threat reports since {since} (as of {date})".into(),
            timeout_secs: None,
            kind: CollectorKind::WebSearch {
                endpoint: Url::parse("https://api.exa.ai/search").unwrap(),
                api_key_env: Some("EXA_API_KEY".into()),
                max_results: 5,
            },
        }
    }

    #[test]
    fn render_query_substitutes_dates() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let query = web_spec().render_query(now);
        assert_eq!(query, "threat reports since 2026-03-03 (as of 2026-03-10)");
    }

    #[test]
    fn spec_serializes_with_kind_tag() {
        let json = serde_json::to_value(web_spec()).unwrap();
        assert_eq!(json["kind"], "web_search");
        assert_eq!(json["name"], "WebSearchAgent");
        let back: CollectorSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.capability(), Capability::WebSearch);
    }

    #[test]
    fn outcome_from_collector_error() {
        assert_eq!(Outcome::from(CollectorError::Timeout), Outcome::TimedOut);
        match Outcome::from(CollectorError::RateLimited { retry_after_secs: None }) {
            Outcome::Failure { transient, reason } => {
                assert!(transient);
                assert_eq!(reason, "rate limited");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn run_status_requires_one_success() {
        let failed = CollectorOutcome {
            collector: "a".into(),
            capability: Capability::Feed,
            outcome: Outcome::TimedOut,
        };
        assert_eq!(RunStatus::from_outcomes(&[failed.clone()]), RunStatus::Failed);

        let mut finding = Finding::new("b", Capability::Feed);
        finding.text = "- item".into();
        let ok = CollectorOutcome {
            collector: "b".into(),
            capability: Capability::Feed,
            outcome: Outcome::Success(finding),
        };
        assert_eq!(RunStatus::from_outcomes(&[failed, ok]), RunStatus::Completed);
    }

    #[test]
    fn report_rejects_misordered_sections() {
        let mut report = Report::new(
            DEFAULT_HEADER,
            Utc::now(),
            SectionName::ALL.map(|name| Section::unavailable(name, vec![])),
        )
        .unwrap();
        assert_eq!(report.sections().len(), 6);
        assert_eq!(report.degraded_sections().len(), 6);

        report.sections.swap(0, 1);
        assert!(report.validate().is_err());
    }

    #[test]
    fn finding_validation() {
        let finding = Finding::new("", Capability::WebSearch);
        assert!(finding.validate().is_err());

        let mut finding = Finding::new("web", Capability::WebSearch);
        assert!(finding.validate().is_err());
        finding.text = "# Results".into();
        assert!(finding.validate().is_ok());
    }

    #[test]
    fn session_id_rejects_blank() {
        assert!(SessionId::new("  ").is_err());
        assert_eq!(SessionId::new(" abc ").unwrap().as_str(), "abc");
    }
}
