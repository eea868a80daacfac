//! Plain markdown rendering of reports and history lines.

use chrono::SecondsFormat;
use threatintel_shared::{Report, SectionStatus, SessionTurn};

/// Header, ISO-8601 generation time, then the six sections as `##` blocks.
pub(crate) fn render_report(report: &Report) -> String {
    let mut out = format!(
        "# {}\n\n_Generated {}_\n",
        report.header,
        report.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    for section in report.sections() {
        out.push_str(&format!("\n## {}\n\n{}\n", section.name.title(), section.text));
    }
    out
}

/// One summary line per stored turn.
pub(crate) fn history_line(turn: &SessionTurn) -> String {
    let sections = turn.report.sections();
    let populated = sections
        .iter()
        .filter(|s| s.status == SectionStatus::Populated)
        .count();
    let degraded = turn.report.degraded_sections();

    let mut line = format!(
        "{}  {}  {populated}/{} sections populated",
        turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
        turn.run_id,
        sections.len()
    );
    if !degraded.is_empty() {
        let names: Vec<&str> = degraded.iter().map(|s| s.title()).collect();
        line.push_str(&format!(" (no data: {})", names.join(", ")));
    }
    line
}
