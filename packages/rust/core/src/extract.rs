//! Category extraction: turning one finding into candidate entities for one
//! report section.
//!
//! The [`Extractor`] trait is the seam for external extraction logic.
//! [`RuleExtractor`] is the built-in, deterministic implementation.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use threatintel_shared::{Finding, FindingEntity, Result, SectionName};

/// Longest supporting snippet kept per candidate.
const SNIPPET_CHARS: usize = 240;

/// Longest label derived from free text.
const LABEL_CHARS: usize = 90;

/// Headings with more words than this are treated as prose, not section markers.
const MAX_HEADING_WORDS: usize = 5;

/// Fallback headlines taken per finding for the Summary section.
const SUMMARY_HEADLINES: usize = 3;

/// One candidate entity for a section, with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub label: String,
    pub text: String,
    /// Collector name.
    pub source: String,
    pub url: Option<String>,
}

/// Extracts the candidates of one section from one finding, in discovery order.
///
/// An error degrades only this finding's contribution to this section.
pub trait Extractor: Send + Sync {
    fn extract(&self, finding: &Finding, section: SectionName) -> Result<Vec<Candidate>>;
}

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// A canonical label and the regex alternatives that map to it.
struct Term {
    label: &'static str,
    pattern: Regex,
}

fn terms(table: &[(&'static str, &str)]) -> Vec<Term> {
    table
        .iter()
        .filter_map(|(label, alternatives)| {
            Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))
                .ok()
                .map(|pattern| Term { label, pattern })
        })
        .collect()
}

static KNOWN_ACTORS: LazyLock<Vec<Term>> = LazyLock::new(|| {
    terms(&[
        ("LockBit", "lockbit(?:\\s?3\\.0)?"),
        ("Clop", "cl0p|clop"),
        ("ALPHV/BlackCat", "alphv|blackcat"),
        ("Black Basta", "black\\s?basta"),
        ("Akira", "akira"),
        ("Rhysida", "rhysida"),
        ("Play", "play\\s+ransomware"),
        ("Scattered Spider", "scattered\\s+spider|octo\\s+tempest"),
        ("Lazarus Group", "lazarus"),
        ("Kimsuky", "kimsuky"),
        ("Sandworm", "sandworm"),
        ("Volt Typhoon", "volt\\s+typhoon"),
        ("Salt Typhoon", "salt\\s+typhoon"),
        ("Fancy Bear", "fancy\\s+bear"),
        ("Cozy Bear", "cozy\\s+bear|midnight\\s+blizzard|nobelium"),
        ("Turla", "turla"),
        ("Charming Kitten", "charming\\s+kitten"),
    ])
});

static INDUSTRIES: LazyLock<Vec<Term>> = LazyLock::new(|| {
    terms(&[
        ("Healthcare", "healthcare|health\\s+care|hospitals?|medical"),
        ("Pharmaceuticals", "pharmaceuticals?|pharma"),
        ("Financial Services", "financial|finance|banks?|banking|fintech|insurance|credit\\s+unions?"),
        ("Government", "government|federal\\s+agenc(?:y|ies)|public\\s+sector|municipal(?:ities)?"),
        ("Education", "education|universit(?:y|ies)|schools?"),
        ("Energy", "energy|oil\\s+and\\s+gas|utilit(?:y|ies)|power\\s+grid"),
        ("Manufacturing", "manufacturing|manufacturers?|industrial"),
        ("Retail", "retail(?:ers)?|e-commerce"),
        ("Telecommunications", "telecom(?:munications)?|telcos?"),
        ("Technology", "technology\\s+(?:sector|companies|firms)|software\\s+(?:vendors|companies)|managed\\s+service\\s+providers?|msps?"),
        ("Transportation & Logistics", "transportation|logistics|airlines?|shipping"),
        ("Critical Infrastructure", "critical\\s+infrastructure"),
        ("Defense", "defen[cs]e\\s+(?:sector|contractors?|industrial\\s+base)|military"),
        ("Legal", "law\\s+firms?|legal\\s+sector"),
        ("Hospitality", "hospitality|hotels?"),
        ("Media", "media\\s+(?:outlets|organizations)|news\\s+organizations"),
    ])
});

static ATTACK_VECTORS: LazyLock<Vec<Term>> = LazyLock::new(|| {
    terms(&[
        ("Phishing", "phishing|spear-?phishing|spearphishing"),
        ("Vulnerability Exploitation", "exploit(?:s|ed|ing|ation)?|zero-days?|0-days?|unpatched"),
        ("Supply Chain Compromise", "supply[\\s-]chain"),
        ("Credential Abuse", "credential\\s+(?:stuffing|theft)|stolen\\s+credentials|password\\s+spraying|brute[\\s-]force"),
        ("Remote Access Abuse", "rdp|remote\\s+desktop|vpn\\s+(?:appliances?|accounts?|credentials)"),
        ("Malvertising", "malvertising|seo\\s+poisoning"),
        ("Drive-by Download", "drive-by"),
        ("Social Engineering", "social\\s+engineering|vishing|smishing|help\\s?desk\\s+impersonation"),
        ("Malicious Attachments", "malicious\\s+(?:attachments?|documents?|macros?)"),
        ("Insider Threat", "insider\\s+threats?"),
    ])
});

static TECHNIQUES: LazyLock<Vec<Term>> = LazyLock::new(|| {
    terms(&[
        ("Lateral Movement", "lateral\\s+movement"),
        ("Privilege Escalation", "privilege\\s+escalation"),
        ("Persistence", "persistence"),
        ("Credential Dumping", "credential\\s+dumping|lsass|mimikatz"),
        ("Data Exfiltration", "exfiltrat(?:e|es|ed|ing|ion)"),
        ("Data Encrypted for Impact", "encrypt(?:s|ed|ing)?\\s+(?:files|data|systems)"),
        ("Double Extortion", "double\\s+extortion|leak\\s+sites?"),
        ("Command and Control", "command[\\s-]and[\\s-]control|c2"),
        ("Defense Evasion", "defen[cs]e\\s+evasion|edr\\s+killers?|disabl(?:e|es|ed|ing)\\s+(?:antivirus|security\\s+tools)"),
        ("Living off the Land", "living[\\s-]off[\\s-]the[\\s-]land|lolbins?"),
        ("PowerShell Execution", "powershell"),
        ("Web Shells", "web\\s?shells?"),
        ("Backdoors", "backdoors?"),
    ])
});

static ACTOR_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(APT\s?\d{1,3}|FIN\d{1,3}|UNC\d{2,5}|TA\d{3,4}|DEV-\d{4}|Storm-\d{4})\b")
        .expect("valid actor id regex")
});

static ACTOR_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][A-Za-z0-9]+(?:\s[A-Z][A-Za-z0-9]+){0,2})\s+(?:ransomware|group|gang|APT|threat\s+actors?|hackers)\b",
    )
    .expect("valid actor name regex")
});

static TECHNIQUE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bT\d{4}(?:\.\d{3})?\b").expect("valid technique regex"));

static CVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,7}\b").expect("valid cve regex"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<?(https?://[^\s>)]+)>?").expect("valid url regex"));

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]|\d+[.)])\s+").expect("valid bullet regex"));

static BOLD_LEAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*([^*]+)\*\*\s*[:\-–—]?\s*(.*)$").expect("valid bold regex"));

/// Words that make a captured actor name meaningless on their own.
const ACTOR_STOPWORDS: &[&str] = &[
    "the", "a", "an", "this", "that", "these", "new", "its", "their", "our", "ransomware",
    "group", "gang", "hacker", "hackers", "threat", "cyber", "security", "several", "many",
    "another", "other", "notorious", "known", "suspected", "state", "sponsored", "chinese",
    "russian", "iranian", "north", "korean", "linked", "affiliated", "criminal", "and",
];

// ---------------------------------------------------------------------------
// RuleExtractor
// ---------------------------------------------------------------------------

/// Deterministic extraction by markdown structure and vocabulary/pattern rules.
///
/// Per finding and section, in order:
/// 1. structured entities tagged with the section
/// 2. bullets under a markdown heading that names the section
/// 3. pattern and vocabulary matches over the remaining entities or text
///
/// Summary instead falls back to a few headlines when it has no block of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleExtractor;

impl Extractor for RuleExtractor {
    fn extract(&self, finding: &Finding, section: SectionName) -> Result<Vec<Candidate>> {
        finding.validate()?;

        let mut out = Vec::new();

        for entity in finding.entities.iter().filter(|e| e.category == Some(section)) {
            out.push(from_entity(finding, entity));
        }

        for line in section_blocks(&finding.text, section) {
            let (label, text) = split_label(&line);
            if label.is_empty() {
                continue;
            }
            out.push(Candidate {
                label,
                text: clean(&text),
                source: finding.source.clone(),
                url: first_url(&line),
            });
        }

        if section == SectionName::Summary {
            if out.is_empty() {
                out.extend(summary_fallback(finding));
            }
            return Ok(out);
        }

        // Pattern hits only add entities the finding has not already named.
        let mut known: HashSet<String> = out.iter().map(|c| normalize_label(&c.label)).collect();
        for (haystack, url) in scan_targets(finding, section) {
            for label in match_rules(&haystack, section) {
                if !known.insert(normalize_label(&label)) {
                    continue;
                }
                out.push(Candidate {
                    label,
                    text: clip(&clean(&haystack), SNIPPET_CHARS),
                    source: finding.source.clone(),
                    url: url.clone().or_else(|| first_url(&haystack)),
                });
            }
        }

        Ok(out)
    }
}

fn from_entity(finding: &Finding, entity: &FindingEntity) -> Candidate {
    Candidate {
        label: clean(&entity.label),
        text: clip(&clean(&entity.text), SNIPPET_CHARS),
        source: finding.source.clone(),
        url: entity.url.clone(),
    }
}

/// Text fragments to scan with pattern rules: entities not already tagged with
/// `section`, or the raw text lines when the finding has no entities.
fn scan_targets(finding: &Finding, section: SectionName) -> Vec<(String, Option<String>)> {
    if finding.entities.is_empty() {
        return finding
            .text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| (l.to_string(), None))
            .collect();
    }

    finding
        .entities
        .iter()
        .filter(|e| e.category != Some(section))
        .map(|e| {
            let haystack = if e.text.is_empty() {
                e.label.clone()
            } else {
                format!("{}. {}", e.label.trim_end_matches('.'), e.text)
            };
            (haystack, e.url.clone())
        })
        .collect()
}

fn summary_fallback(finding: &Finding) -> Vec<Candidate> {
    if !finding.entities.is_empty() {
        let uncategorized: Vec<&FindingEntity> =
            finding.entities.iter().filter(|e| e.category.is_none()).collect();
        let pool: Vec<&FindingEntity> = if uncategorized.is_empty() {
            finding.entities.iter().collect()
        } else {
            uncategorized
        };
        return pool
            .into_iter()
            .take(SUMMARY_HEADLINES)
            .map(|e| from_entity(finding, e))
            .collect();
    }

    // Structured text without a Summary block has no obvious headline.
    if finding.text.lines().any(|l| heading_text(l.trim()).is_some()) {
        return Vec::new();
    }

    finding
        .text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|line| {
            let (label, text) = split_label(line);
            Candidate {
                label,
                text: clean(&text),
                source: finding.source.clone(),
                url: first_url(line),
            }
        })
        .into_iter()
        .filter(|c| !c.label.is_empty())
        .collect()
}

/// Labels matched by the pattern rules of `section`, in order of first appearance.
fn match_rules(haystack: &str, section: SectionName) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = Vec::new();
    let mut push = |pos: usize, label: String| {
        if !hits.iter().any(|(_, l)| l.eq_ignore_ascii_case(&label)) {
            hits.push((pos, label));
        }
    };

    let vocabulary: &[Term] = match section {
        SectionName::ThreatActors => KNOWN_ACTORS.as_slice(),
        SectionName::TargetedIndustries => INDUSTRIES.as_slice(),
        SectionName::AttackVectors => ATTACK_VECTORS.as_slice(),
        SectionName::Ttps => TECHNIQUES.as_slice(),
        SectionName::Summary | SectionName::FeedUpdates => &[],
    };
    for term in vocabulary {
        if let Some(m) = term.pattern.find(haystack) {
            push(m.start(), term.label.to_string());
        }
    }

    match section {
        SectionName::ThreatActors => {
            for m in ACTOR_ID_RE.find_iter(haystack) {
                push(m.start(), m.as_str().replace(' ', ""));
            }
            for cap in ACTOR_NAME_RE.captures_iter(haystack) {
                if let Some(m) = cap.get(1) {
                    if let Some(name) = strip_stopwords(m.as_str()) {
                        // Known aliases are already covered by the vocabulary pass.
                        let known = KNOWN_ACTORS.iter().any(|t| t.pattern.is_match(&name));
                        if !known {
                            push(m.start(), name);
                        }
                    }
                }
            }
        }
        SectionName::Ttps => {
            for m in TECHNIQUE_ID_RE.find_iter(haystack) {
                push(m.start(), m.as_str().to_string());
            }
        }
        SectionName::FeedUpdates => {
            for m in CVE_RE.find_iter(haystack) {
                push(m.start(), m.as_str().to_ascii_uppercase());
            }
        }
        _ => {}
    }

    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, label)| label).collect()
}

fn strip_stopwords(name: &str) -> Option<String> {
    let words: Vec<&str> = name
        .split_whitespace()
        .skip_while(|w| ACTOR_STOPWORDS.contains(&w.to_ascii_lowercase().as_str()))
        .collect();
    let is_stop = |w: &&str| ACTOR_STOPWORDS.contains(&w.to_ascii_lowercase().as_str());
    if words.is_empty() || words.iter().all(is_stop) {
        return None;
    }
    // Industry words in front of "ransomware" describe victims, not actors.
    let joined = words.join(" ");
    if INDUSTRIES.iter().any(|t| t.pattern.is_match(&joined)) {
        return None;
    }
    Some(joined)
}

// ---------------------------------------------------------------------------
// Markdown structure
// ---------------------------------------------------------------------------

/// Map a heading to the section it names.
pub fn section_for_heading(heading: &str) -> Option<SectionName> {
    let heading = heading.trim().trim_end_matches(':').to_lowercase();
    if heading.is_empty() || heading.split_whitespace().count() > MAX_HEADING_WORDS {
        return None;
    }

    let has = |needles: &[&str]| needles.iter().any(|n| heading.contains(n));
    if has(&["summary", "overview", "executive"]) {
        Some(SectionName::Summary)
    } else if has(&["industr", "sector", "target", "victim"]) {
        Some(SectionName::TargetedIndustries)
    } else if has(&["actor", "group", "adversar"]) {
        Some(SectionName::ThreatActors)
    } else if has(&["vector", "initial access"]) {
        Some(SectionName::AttackVectors)
    } else if has(&["ttp", "technique", "tactic"]) {
        Some(SectionName::Ttps)
    } else if has(&["feed", "alert", "advisor", "vulnerab", "cve", "update"]) {
        Some(SectionName::FeedUpdates)
    } else {
        None
    }
}

/// Heading text if `line` is a markdown heading or a bold-only line.
fn heading_text(line: &str) -> Option<&str> {
    if line.starts_with('#') {
        return Some(line.trim_start_matches('#').trim());
    }
    let inner = line.strip_prefix("**")?.strip_suffix("**").or_else(|| {
        line.strip_prefix("**")
            .and_then(|l| l.strip_suffix(":**").or_else(|| l.strip_suffix("**:")))
    })?;
    if inner.contains("**") { None } else { Some(inner) }
}

/// Non-empty lines (bullet markers stripped) under headings that name `section`.
fn section_blocks(text: &str, section: SectionName) -> Vec<String> {
    let mut current: Option<SectionName> = None;
    let mut lines = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(heading) = heading_text(line) {
            current = section_for_heading(heading);
            continue;
        }
        if current == Some(section) {
            lines.push(BULLET_RE.replace(line, "").trim().to_string());
        }
    }
    lines
}

/// Split a bullet into (label, supporting text).
fn split_label(line: &str) -> (String, String) {
    let line = BULLET_RE.replace(line.trim(), "");
    let line = line.trim();

    if let Some(cap) = BOLD_LEAD_RE.captures(line) {
        let label = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let rest = cap.get(2).map(|m| m.as_str()).unwrap_or_default();
        return (clean_label(label), rest.to_string());
    }

    let head: String = line.chars().take(LABEL_CHARS).collect();
    for separator in [": ", " – ", " — ", " - "] {
        if let Some(idx) = head.find(separator) {
            let label = &line[..idx];
            // Avoid splitting URLs and timestamps.
            if !label.contains("http") {
                return (clean_label(label), line[idx + separator.len()..].to_string());
            }
        }
    }

    (clip(&clean_label(line), LABEL_CHARS), line.to_string())
}

fn first_url(text: &str) -> Option<String> {
    URL_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
}

/// Strip markdown emphasis, URLs, and redundant whitespace.
fn clean(text: &str) -> String {
    let without_urls = URL_RE.replace_all(text, "");
    let stripped = BULLET_RE.replace(without_urls.trim(), "");
    stripped
        .replace("**", "")
        .replace("__", "")
        .replace('`', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == ':' || c == '-' || c.is_whitespace())
        .to_string()
}

fn clean_label(label: &str) -> String {
    clean(label)
        .trim_matches(|c: char| {
            matches!(c, '.' | ',' | ';' | ':' | '"' | '\'' | '(' | ')' | '*' | '_')
        })
        .trim()
        .to_string()
}

/// Dedup key for an entity label: lowercase, emphasis and surrounding
/// punctuation stripped, whitespace collapsed.
pub fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`'))
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c.is_ascii_punctuation() && c != '&')
        .trim()
        .to_string()
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max).collect();
    if let Some(idx) = clipped.rfind(' ') {
        clipped.truncate(idx);
    }
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use threatintel_shared::Capability;

    fn finding(text: &str) -> Finding {
        let mut f = Finding::new("XAnalysisAgent", Capability::SocialPosts);
        f.text = text.to_string();
        f
    }

    fn labels(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn headings_map_to_sections() {
        assert_eq!(section_for_heading("Threat Actors"), Some(SectionName::ThreatActors));
        assert_eq!(
            section_for_heading("Targeted Industries:"),
            Some(SectionName::TargetedIndustries)
        );
        assert_eq!(section_for_heading("TTPs"), Some(SectionName::Ttps));
        assert_eq!(section_for_heading("Feed Updates"), Some(SectionName::FeedUpdates));
        assert_eq!(section_for_heading("NVD"), None);
        // Long headings are prose, even when they mention a section.
        assert_eq!(
            section_for_heading("Web search results for threat actors and targeted industries"),
            None
        );
    }

    #[test]
    fn bullets_under_section_heading_become_candidates() {
        let f = finding(
            "# Report\n\n## Threat Actors\n- **LockBit**: ransomware affiliate program <https://a.example/lb>\n\
             - Scattered Spider - help desk social engineering\n\n## TTPs\n- T1566.001 spearphishing",
        );
        let actors = RuleExtractor.extract(&f, SectionName::ThreatActors).unwrap();
        assert_eq!(labels(&actors)[..2], ["LockBit", "Scattered Spider"]);
        assert_eq!(actors[0].text, "ransomware affiliate program");
        assert_eq!(actors[0].url.as_deref(), Some("https://a.example/lb"));
        assert_eq!(actors[0].source, "XAnalysisAgent");
    }

    #[test]
    fn pattern_rules_find_actors_and_ids() {
        let f = finding(
            "- The Akira ransomware gang hit a school district\n\
             - APT 29 and UNC3944 reused T1078 valid accounts\n\
             - Healthcare ransomware incidents are rising",
        );
        let actors = RuleExtractor.extract(&f, SectionName::ThreatActors).unwrap();
        let actor_labels = labels(&actors);
        assert!(actor_labels.contains(&"Akira"));
        assert!(actor_labels.contains(&"APT29"));
        assert!(actor_labels.contains(&"UNC3944"));
        assert!(!actor_labels.iter().any(|l| l.contains("Healthcare")));

        let ttps = RuleExtractor.extract(&f, SectionName::Ttps).unwrap();
        assert!(labels(&ttps).contains(&"T1078"));

        let industries = RuleExtractor.extract(&f, SectionName::TargetedIndustries).unwrap();
        let industry_labels = labels(&industries);
        assert!(industry_labels.contains(&"Education"));
        assert!(industry_labels.contains(&"Healthcare"));
    }

    #[test]
    fn structured_entities_are_scanned_outside_their_category() {
        let mut f = Finding::new("FeedReaderAgent", Capability::Feed);
        f.entities.push(FindingEntity {
            category: Some(SectionName::FeedUpdates),
            label: "CVE-2026-1111 (acme gateway)".into(),
            text: "[NVD] Actively exploited remote code execution".into(),
            url: Some("https://nvd.nist.gov/vuln/detail/CVE-2026-1111".into()),
            published_at: None,
        });

        let updates = RuleExtractor.extract(&f, SectionName::FeedUpdates).unwrap();
        // Only the structured entity; its CVE id is not re-extracted as a duplicate.
        assert_eq!(labels(&updates), ["CVE-2026-1111 (acme gateway)"]);

        let vectors = RuleExtractor.extract(&f, SectionName::AttackVectors).unwrap();
        assert_eq!(labels(&vectors), ["Vulnerability Exploitation"]);
        assert_eq!(
            vectors[0].url.as_deref(),
            Some("https://nvd.nist.gov/vuln/detail/CVE-2026-1111")
        );
    }

    #[test]
    fn summary_falls_back_to_headlines() {
        let mut f = Finding::new("WebSearchAgent", Capability::WebSearch);
        f.text = "## Web search results".into();
        for i in 0..5 {
            f.entities.push(FindingEntity {
                category: None,
                label: format!("Headline {i}"),
                text: "snippet".into(),
                url: None,
                published_at: None,
            });
        }
        let summary = RuleExtractor.extract(&f, SectionName::Summary).unwrap();
        assert_eq!(labels(&summary), ["Headline 0", "Headline 1", "Headline 2"]);
    }

    #[test]
    fn malformed_finding_is_an_error() {
        let f = finding("   ");
        assert!(RuleExtractor.extract(&f, SectionName::Ttps).is_err());
    }

    #[test]
    fn bold_only_lines_act_as_headings() {
        let f = finding("**Attack Vectors:**\n1. Malvertising: fake installer ads\n**Other**\n- ignored");
        let vectors = RuleExtractor.extract(&f, SectionName::AttackVectors).unwrap();
        assert_eq!(vectors[0].label, "Malvertising");
        assert_eq!(vectors[0].text, "fake installer ads");
        assert!(!labels(&vectors).contains(&"ignored"));
    }
}
