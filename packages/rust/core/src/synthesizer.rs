//! Merges per-collector findings into the fixed six-section report.
//!
//! Deterministic for a given list of outcomes: entities are ordered by the
//! registration order of the finding that first mentioned them, then by
//! discovery order within that finding.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use threatintel_shared::{
    CollectorOutcome, Finding, NO_DATA, Outcome, Report, ReportEntry, Result, RunConfig, Section,
    SectionName, SectionStatus,
};

use crate::extract::{Candidate, Extractor, RuleExtractor, normalize_label};

/// Longest merged supporting text per entry.
const ENTRY_TEXT_CHARS: usize = 480;

/// An entity being merged across findings.
struct Merged {
    label: String,
    texts: Vec<String>,
    sources: Vec<String>,
    urls: Vec<String>,
}

impl Merged {
    fn new(candidate: Candidate) -> Self {
        let mut merged = Self {
            label: candidate.label.clone(),
            texts: Vec::new(),
            sources: Vec::new(),
            urls: Vec::new(),
        };
        merged.absorb(candidate);
        merged
    }

    fn absorb(&mut self, candidate: Candidate) {
        let text = candidate.text.trim();
        if !text.is_empty()
            && !text.eq_ignore_ascii_case(&self.label)
            && !self.texts.iter().any(|t| t.eq_ignore_ascii_case(text))
        {
            self.texts.push(text.to_string());
        }
        if !self.sources.contains(&candidate.source) {
            self.sources.push(candidate.source);
        }
        if let Some(url) = candidate.url {
            if !self.urls.contains(&url) {
                self.urls.push(url);
            }
        }
    }

    fn into_entry(self, is_new: bool) -> ReportEntry {
        let mut text = self.texts.join("; ");
        if text.chars().count() > ENTRY_TEXT_CHARS {
            text = text.chars().take(ENTRY_TEXT_CHARS).collect::<String>();
            text.push('…');
        }
        ReportEntry {
            label: self.label,
            text,
            sources: self.sources,
            urls: self.urls,
            is_new,
        }
    }
}

/// Normalized labels per section of a session's previous report.
type PreviousLabels = HashMap<SectionName, HashSet<String>>;

/// Builds a [`Report`] from the outcomes of one run.
#[derive(Clone)]
pub struct Synthesizer {
    extractor: Arc<dyn Extractor>,
    max_entities: usize,
    header: String,
}

impl Synthesizer {
    /// A synthesizer using the built-in [`RuleExtractor`].
    pub fn new(config: &RunConfig) -> Self {
        Self {
            extractor: Arc::new(RuleExtractor),
            max_entities: config
                .max_entities_per_section
                .max(threatintel_shared::MIN_ENTITIES_PER_SECTION),
            header: config.header.clone(),
        }
    }

    /// Replace the extraction strategy.
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Merge `outcomes` (registration order) into a report.
    ///
    /// `previous` is the session's last report; entities absent from it are
    /// flagged new. Never fails on bad collector data: affected sections degrade.
    #[instrument(skip_all, fields(outcomes = outcomes.len()))]
    pub fn synthesize(
        &self,
        outcomes: &[CollectorOutcome],
        previous: Option<&Report>,
        generated_at: DateTime<Utc>,
    ) -> Result<Report> {
        let mut notes: [Vec<String>; 6] = Default::default();
        let mut findings: Vec<&Finding> = Vec::new();

        for entry in outcomes {
            let reason = match &entry.outcome {
                Outcome::Success(finding) => match finding.validate() {
                    Ok(()) => {
                        findings.push(finding);
                        continue;
                    }
                    Err(e) => {
                        warn!(collector = %entry.collector, error = %e, "discarding malformed finding");
                        "malformed finding".to_string()
                    }
                },
                other => other.reason().unwrap_or_default(),
            };
            for section in entry.capability.sections() {
                notes[*section as usize].push(format!(
                    "{NO_DATA} from {} ({reason})",
                    entry.collector
                ));
            }
        }

        let previous_labels: Option<PreviousLabels> = previous.map(|report| {
            SectionName::ALL
                .iter()
                .map(|&name| {
                    let labels = report
                        .section(name)
                        .entries
                        .iter()
                        .map(|e| normalize_label(&e.label))
                        .collect();
                    (name, labels)
                })
                .collect()
        });

        let lead = format!(
            "Merged findings from {} of {} collectors.",
            findings.len(),
            outcomes.len()
        );

        let sections = SectionName::ALL.map(|name| {
            let section_notes = std::mem::take(&mut notes[name as usize]);
            let lead = (name == SectionName::Summary).then_some(lead.as_str());
            self.build_section(name, &findings, section_notes, previous_labels.as_ref(), lead)
        });

        let report = Report::new(&self.header, generated_at, sections)?;
        debug!(degraded = ?report.degraded_sections(), "report synthesized");
        Ok(report)
    }

    fn build_section(
        &self,
        name: SectionName,
        findings: &[&Finding],
        mut notes: Vec<String>,
        previous: Option<&PreviousLabels>,
        lead: Option<&str>,
    ) -> Section {
        let mut merged: Vec<Merged> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for finding in findings {
            let candidates = match self.extractor.extract(finding, name) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(collector = %finding.source, section = %name, error = %e, "extraction failed");
                    notes.push(format!("{NO_DATA} from {} (extraction failed)", finding.source));
                    continue;
                }
            };
            for candidate in candidates {
                let key = normalize_label(&candidate.label);
                if key.is_empty() {
                    continue;
                }
                match index.get(&key) {
                    Some(&i) => merged[i].absorb(candidate),
                    None => {
                        index.insert(key, merged.len());
                        merged.push(Merged::new(candidate));
                    }
                }
            }
        }

        if merged.is_empty() {
            return Section::unavailable(name, notes);
        }

        let overflow = merged.len().saturating_sub(self.max_entities);
        merged.truncate(self.max_entities);

        let seen = previous.map(|p| p.get(&name));
        let entries: Vec<ReportEntry> = merged
            .into_iter()
            .map(|m| {
                let is_new = match seen {
                    Some(labels) => {
                        let key = normalize_label(&m.label);
                        !labels.is_some_and(|l| l.contains(&key))
                    }
                    None => false,
                };
                m.into_entry(is_new)
            })
            .collect();

        let text = render_body(&entries, overflow, lead, &notes);
        Section {
            name,
            text,
            entries,
            notes,
            status: SectionStatus::Populated,
        }
    }
}

fn render_body(
    entries: &[ReportEntry],
    overflow: usize,
    lead: Option<&str>,
    notes: &[String],
) -> String {
    let mut lines = Vec::new();
    if let Some(lead) = lead {
        lines.push(lead.to_string());
        lines.push(String::new());
    }

    for entry in entries {
        let mut line = format!("- **{}**", entry.label);
        if entry.is_new {
            line.push_str(" (new)");
        }
        if !entry.text.is_empty() {
            line.push_str(": ");
            line.push_str(&entry.text);
        }
        line.push_str(&format!(" _[{}]_", entry.sources.join(", ")));
        if let Some(url) = entry.urls.first() {
            line.push_str(&format!(" <{url}>"));
        }
        lines.push(line);
    }
    if overflow > 0 {
        lines.push(format!("- …and {overflow} more"));
    }

    if !notes.is_empty() {
        lines.push(String::new());
        lines.extend(notes.iter().map(|n| format!("- _{n}_")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use threatintel_shared::{Capability, FindingEntity, ThreatIntelError};

    fn success(name: &str, capability: Capability, text: &str) -> CollectorOutcome {
        let mut finding = Finding::new(name, capability);
        finding.text = text.to_string();
        CollectorOutcome {
            collector: name.into(),
            capability,
            outcome: Outcome::Success(finding),
        }
    }

    fn failed(name: &str, capability: Capability, outcome: Outcome) -> CollectorOutcome {
        CollectorOutcome {
            collector: name.into(),
            capability,
            outcome,
        }
    }

    fn synthesizer(cap: usize) -> Synthesizer {
        Synthesizer::new(&RunConfig {
            max_entities_per_section: cap,
            ..RunConfig::default()
        })
    }

    #[test]
    fn normalizes_labels() {
        assert_eq!(normalize_label("**LockBit**"), "lockbit");
        assert_eq!(normalize_label("  Lock   Bit. "), "lock bit");
        assert_eq!(normalize_label("`T1566`:"), "t1566");
    }

    #[test]
    fn duplicates_merge_text_and_sources() {
        let outcomes = vec![
            success(
                "WebSearchAgent",
                Capability::WebSearch,
                "## Threat Actors\n- **LockBit**: new affiliate wave <https://a.example/1>",
            ),
            success(
                "XAnalysisAgent",
                Capability::SocialPosts,
                "## Threat Actors\n- *lockbit*: leak site relaunched\n- **Akira**: VPN abuse",
            ),
        ];
        let report = synthesizer(8).synthesize(&outcomes, None, Utc::now()).unwrap();
        let actors = report.section(SectionName::ThreatActors);

        assert_eq!(report.labels(SectionName::ThreatActors), ["LockBit", "Akira"]);
        let lockbit = &actors.entries[0];
        assert_eq!(lockbit.sources, ["WebSearchAgent", "XAnalysisAgent"]);
        assert_eq!(lockbit.text, "new affiliate wave; leak site relaunched");
        assert_eq!(lockbit.urls, ["https://a.example/1"]);
        assert!(!lockbit.is_new);
        assert_eq!(actors.status, SectionStatus::Populated);
    }

    #[test]
    fn cap_renders_overflow() {
        let bullets: String = (0..5).map(|i| format!("- **Group{i}**: active\n")).collect();
        let outcomes = vec![success(
            "WebSearchAgent",
            Capability::WebSearch,
            &format!("## Threat Actors\n{bullets}"),
        )];
        // Caps below the floor are clamped up.
        let report = synthesizer(0).synthesize(&outcomes, None, Utc::now()).unwrap();
        let actors = report.section(SectionName::ThreatActors);
        assert_eq!(actors.entries.len(), 2);
        assert!(actors.text.contains("…and 3 more"));
    }

    #[test]
    fn failed_collectors_leave_notes_in_their_sections() {
        let outcomes = vec![
            success(
                "WebSearchAgent",
                Capability::WebSearch,
                "## Summary\n- Ransomware activity up\n## Threat Actors\n- **Clop**: MOVEit",
            ),
            failed("FeedReaderAgent", Capability::Feed, Outcome::TimedOut),
        ];
        let report = synthesizer(8).synthesize(&outcomes, None, Utc::now()).unwrap();

        let feed = report.section(SectionName::FeedUpdates);
        assert_eq!(feed.status, SectionStatus::Degraded);
        assert!(feed.text.starts_with(NO_DATA));
        assert_eq!(feed.notes, ["No data available from FeedReaderAgent (timed out)"]);

        let summary = report.section(SectionName::Summary);
        assert!(summary.text.starts_with("Merged findings from 1 of 2 collectors."));
        assert!(summary.text.contains("No data available from FeedReaderAgent (timed out)"));

        // Sections the feed never feeds carry no note about it.
        assert!(report.section(SectionName::ThreatActors).notes.is_empty());
    }

    #[test]
    fn all_failures_give_six_placeholder_sections() {
        let outcomes = vec![
            failed(
                "WebSearchAgent",
                Capability::WebSearch,
                Outcome::Failure { reason: "rate limited".into(), transient: true },
            ),
            failed("XAnalysisAgent", Capability::SocialPosts, Outcome::TimedOut),
        ];
        let report = synthesizer(8).synthesize(&outcomes, None, Utc::now()).unwrap();
        assert_eq!(report.sections().len(), 6);
        assert_eq!(report.degraded_sections(), SectionName::ALL);
        assert!(report.is_empty());
        assert_eq!(
            report.section(SectionName::Summary).notes,
            [
                "No data available from WebSearchAgent (rate limited)",
                "No data available from XAnalysisAgent (timed out)",
            ]
        );
    }

    #[test]
    fn malformed_finding_degrades_instead_of_failing() {
        let mut finding = Finding::new("XAnalysisAgent", Capability::SocialPosts);
        finding.text = "   ".into();
        let outcomes = vec![CollectorOutcome {
            collector: "XAnalysisAgent".into(),
            capability: Capability::SocialPosts,
            outcome: Outcome::Success(finding),
        }];
        let report = synthesizer(8).synthesize(&outcomes, None, Utc::now()).unwrap();
        assert!(report.is_empty());
        assert!(report.section(SectionName::Ttps).notes[0].contains("malformed finding"));
    }

    struct Failing;

    impl Extractor for Failing {
        fn extract(&self, finding: &Finding, section: SectionName) -> Result<Vec<Candidate>> {
            if section == SectionName::Ttps {
                return Err(ThreatIntelError::parse("unreadable"));
            }
            RuleExtractor.extract(finding, section)
        }
    }

    #[test]
    fn extractor_errors_degrade_one_section() {
        let outcomes = vec![success(
            "WebSearchAgent",
            Capability::WebSearch,
            "## Threat Actors\n- **Clop**: MOVEit\n## TTPs\n- T1190 exploit public-facing app",
        )];
        let report = synthesizer(8)
            .with_extractor(Arc::new(Failing))
            .synthesize(&outcomes, None, Utc::now())
            .unwrap();
        assert_eq!(report.section(SectionName::Ttps).status, SectionStatus::Degraded);
        assert_eq!(
            report.section(SectionName::Ttps).notes,
            ["No data available from WebSearchAgent (extraction failed)"]
        );
        assert_eq!(report.labels(SectionName::ThreatActors), ["Clop"]);
    }

    #[test]
    fn entities_missing_from_previous_report_are_new() {
        let first = vec![success(
            "WebSearchAgent",
            Capability::WebSearch,
            "## Threat Actors\n- **Clop**: MOVEit",
        )];
        let previous = synthesizer(8).synthesize(&first, None, Utc::now()).unwrap();

        let second = vec![success(
            "WebSearchAgent",
            Capability::WebSearch,
            "## Threat Actors\n- **Clop**: still active\n- **Akira**: new campaign",
        )];
        let report = synthesizer(8)
            .synthesize(&second, Some(&previous), Utc::now())
            .unwrap();
        let actors = &report.section(SectionName::ThreatActors).entries;
        assert!(!actors[0].is_new);
        assert!(actors[1].is_new);
        assert!(report.section(SectionName::ThreatActors).text.contains("**Akira** (new)"));
    }

    #[test]
    fn structured_entities_flow_into_their_section() {
        let mut finding = Finding::new("FeedReaderAgent", Capability::Feed);
        finding.entities.push(FindingEntity {
            category: Some(SectionName::FeedUpdates),
            label: "CVE-2026-2222".into(),
            text: "[US-CERT] Patch now".into(),
            url: Some("https://cisa.example/a".into()),
            published_at: None,
        });
        let outcomes = vec![CollectorOutcome {
            collector: "FeedReaderAgent".into(),
            capability: Capability::Feed,
            outcome: Outcome::Success(finding),
        }];
        let report = synthesizer(8).synthesize(&outcomes, None, Utc::now()).unwrap();
        assert_eq!(report.labels(SectionName::FeedUpdates), ["CVE-2026-2222"]);
        // Summary falls back to the entity headline.
        assert_eq!(report.labels(SectionName::Summary), ["CVE-2026-2222"]);
    }

    #[test]
    fn resynthesis_keeps_entity_membership() {
        let outcomes = vec![
            success(
                "WebSearchAgent",
                Capability::WebSearch,
                "## Threat Actors\n- **LockBit**: affiliates\n## TTPs\n- **T1566**: phishing",
            ),
            success(
                "XAnalysisAgent",
                Capability::SocialPosts,
                "## Threat Actors\n- **Akira**: VPN abuse",
            ),
        ];
        let synth = synthesizer(8);
        let first = synth.synthesize(&outcomes, None, Utc::now()).unwrap();
        let second = synth.synthesize(&outcomes, None, Utc::now()).unwrap();
        for name in SectionName::ALL {
            assert_eq!(first.labels(name), second.labels(name), "{name:?}");
        }
    }

    #[test]
    fn distinct_entities_never_collapse_to_one() {
        let outcomes = vec![
            success(
                "WebSearchAgent",
                Capability::WebSearch,
                "## Targeted Industries\n- **Healthcare**: hospitals hit",
            ),
            success(
                "XAnalysisAgent",
                Capability::SocialPosts,
                "## Targeted Industries\n- **Finance**: bank phishing",
            ),
        ];
        let report = synthesizer(8).synthesize(&outcomes, None, Utc::now()).unwrap();
        let industries = report.labels(SectionName::TargetedIndustries);
        assert!(industries.len() >= 2, "{industries:?}");
    }
}
