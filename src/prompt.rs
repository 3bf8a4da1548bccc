//! Prompt construction for period reports.
//!
//! Source entries are rendered as `## <date> - <title>` sections joined by a
//! horizontal rule, then wrapped in a kind-specific instruction. Monthly
//! reports are built from weekly reports, so the monthly prompt describes
//! its sources as weekly summaries.

use crate::models::LogEntry;
use crate::period::{Period, PeriodKind};

/// Separator placed between rendered entries.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// System prompt shared by every report kind.
pub const SYSTEM_PROMPT: &str = "You are an assistant that writes concise, well-structured \
period reports from work logs. Respond with the report body in Markdown only, without a \
preamble or closing remarks.";

/// Render one entry as a prompt section.
///
/// Each name in `fields` the entry has a value for is added below the
/// heading as a `**Name**: value` line, in the order given.
pub fn render_entry(entry: &LogEntry, body: &str, fields: &[String]) -> String {
    let title = entry.title.as_deref().unwrap_or("Untitled");
    let mut section = format!("## {} - {}", entry.date, title);
    for name in fields {
        if let Some(value) = entry.properties.get(name) {
            section.push_str(&format!("\n**{}**: {}", name, value));
        }
    }
    let body = body.trim();
    if !body.is_empty() {
        section.push_str("\n\n");
        section.push_str(body);
    }
    section
}

/// Join rendered sections in the given order.
pub fn combine(sections: &[String]) -> String {
    sections.join(SECTION_SEPARATOR)
}

/// Full user prompt for `period` over the combined source text.
pub fn build_prompt(period: &Period, combined: &str) -> String {
    let range = period.range();
    match period.kind() {
        PeriodKind::Week => format!(
            "Write the weekly report for {key} ({range}) from the daily work logs below.\n\n\
             Cover:\n\
             1. Key accomplishments of the week\n\
             2. Problems encountered and how they were handled\n\
             3. Learnings worth keeping\n\
             4. Focus for next week\n\n\
             # Daily work logs\n\n{combined}",
            key = period,
            range = range,
            combined = combined,
        ),
        PeriodKind::Month => format!(
            "Write the monthly report for {key} ({range}) from the weekly reports below. \
             Each section is a summary of one week.\n\n\
             Cover:\n\
             1. Main achievements of the month\n\
             2. Recurring themes and how work evolved across the weeks\n\
             3. Growth and lessons learned\n\
             4. Goals for next month\n\n\
             # Weekly reports\n\n{combined}",
            key = period,
            range = range,
            combined = combined,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(day: u32, title: Option<&str>) -> LogEntry {
        LogEntry {
            id: format!("e{}", day),
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            title: title.map(str::to_string),
            content_ref: format!("e{}", day),
            properties: Default::default(),
        }
    }

    #[test]
    fn test_render_and_combine() {
        let sections = vec![
            render_entry(&entry(13, Some("Kickoff")), "Planned the sprint.\n", &[]),
            render_entry(&entry(14, None), "  ", &[]),
        ];
        assert_eq!(
            combine(&sections),
            "## 2025-01-13 - Kickoff\n\nPlanned the sprint.\n\n---\n\n## 2025-01-14 - Untitled"
        );
    }

    #[test]
    fn test_render_selected_fields() {
        let mut e = entry(15, Some("Release"));
        e.properties.insert("Project".into(), "Billing".into());
        e.properties.insert("Tech Stack".into(), "Rust, Postgres".into());
        e.properties.insert("Mood".into(), "fine".into());

        let fields = vec!["Tech Stack".to_string(), "Project".to_string(), "Impact".to_string()];
        assert_eq!(
            render_entry(&e, "Shipped v2.", &fields),
            "## 2025-01-15 - Release\n**Tech Stack**: Rust, Postgres\n**Project**: Billing\n\nShipped v2."
        );
        assert_eq!(render_entry(&e, "", &[]), "## 2025-01-15 - Release");
    }

    #[test]
    fn test_prompts_differ_by_kind() {
        let week = Period::week(2025, 3).unwrap();
        let month = Period::month(2025, 1).unwrap();
        let weekly = build_prompt(&week, "BODY");
        let monthly = build_prompt(&month, "BODY");

        assert!(weekly.contains("2025-W03 (2025-01-13 ~ 2025-01-19)"));
        assert!(weekly.contains("daily work logs"));
        assert!(monthly.contains("2025-01 (2025-01-01 ~ 2025-01-31)"));
        assert!(monthly.contains("weekly reports"));
        assert!(weekly.ends_with("BODY") && monthly.ends_with("BODY"));
    }
}
