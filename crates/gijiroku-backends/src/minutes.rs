//! Parse the LLM's Markdown minutes into the structured details record.
//!
//! The model is prompted to emit a fixed set of headings; anything it omits
//! becomes an empty list (or `None` for the next-meeting note). The
//! formatted text is normalized to LF line endings with trailing whitespace
//! stripped and stored otherwise verbatim.

use gijiroku_protocol::SummaryDetails;

const HEADING_SUMMARY: &str = "# 要約";
const HEADING_AGENDA: &str = "## 議題・議論内容";
const HEADING_DECISIONS: &str = "## 決定事項";
const HEADING_TODO: &str = "## ToDo";
const HEADING_NEXT_ACTIONS: &str = "## 次のアクション";
const HEADING_NEXT_MEETING: &str = "## 次回会議";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Summary,
    Agenda,
    Decisions,
    Todo,
    NextActions,
    NextMeeting,
    Unknown,
}

/// Normalize the raw model output and split it into the structured details.
/// Returns the normalized `formatted_text` alongside the parsed record.
pub fn parse_minutes(raw: &str) -> (String, SummaryDetails) {
    let formatted = normalize(raw);
    let mut details = SummaryDetails::default();
    let mut next_meeting_lines: Vec<&str> = Vec::new();
    let mut saw_next_meeting = false;

    let mut section = Section::Preamble;
    for line in formatted.lines() {
        let trimmed = line.trim();
        section = match trimmed {
            HEADING_SUMMARY => Section::Summary,
            HEADING_AGENDA => Section::Agenda,
            HEADING_DECISIONS => Section::Decisions,
            HEADING_TODO => Section::Todo,
            HEADING_NEXT_ACTIONS => Section::NextActions,
            HEADING_NEXT_MEETING => {
                saw_next_meeting = true;
                Section::NextMeeting
            }
            _ if trimmed.starts_with("# ") || trimmed.starts_with("## ") => Section::Unknown,
            _ => {
                collect_line(&mut details, &mut next_meeting_lines, section, trimmed);
                section
            }
        };
    }

    if saw_next_meeting {
        let note = next_meeting_lines.join(" ").trim().to_string();
        details.next_meeting = Some(note);
    }

    (formatted, details)
}

fn collect_line<'a>(
    details: &mut SummaryDetails,
    next_meeting_lines: &mut Vec<&'a str>,
    section: Section,
    line: &'a str,
) {
    if line.is_empty() {
        return;
    }
    match section {
        Section::Agenda => push_item(&mut details.agenda, line),
        Section::Decisions => push_item(&mut details.decisions, line),
        Section::Todo => push_todo(&mut details.todo, line),
        Section::NextActions => push_item(&mut details.next_actions, line),
        Section::NextMeeting => next_meeting_lines.push(line),
        Section::Preamble | Section::Summary | Section::Unknown => {}
    }
}

fn push_item(items: &mut Vec<String>, line: &str) {
    if let Some(item) = line.strip_prefix("- ") {
        let item = item.trim();
        if !item.is_empty() {
            items.push(item.to_string());
        }
    }
}

fn push_todo(items: &mut Vec<String>, line: &str) {
    let Some(rest) = line.strip_prefix("- ") else {
        return;
    };
    let item = rest
        .strip_prefix("[ ] ")
        .or_else(|| rest.strip_prefix("[x] "))
        .or_else(|| rest.strip_prefix("[X] "))
        .unwrap_or(rest)
        .trim();
    if !item.is_empty() {
        items.push(item.to_string());
    }
}

/// LF line endings, no trailing whitespace on any line, no trailing blank
/// lines at the end.
fn normalize(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out: Vec<&str> = unified.lines().map(str::trim_end).collect();
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "# 要約\n四半期予算会議。来期の広告費が決まった。\n\n## 議題・議論内容\n- 広告費の配分\n- 採用計画\n\n## 決定事項\n- 広告費を20%増額する\n\n## ToDo\n- [ ] 田中: 予算表を更新する\n- [x] 佐藤: 会場を予約する\n\n## 次のアクション\n- 各部門に通知する\n\n## 次回会議\n4月10日 14:00\n";

    #[test]
    fn test_parses_all_sections() {
        let (formatted, details) = parse_minutes(FULL);
        assert!(formatted.starts_with("# 要約"));
        assert_eq!(details.agenda, vec!["広告費の配分", "採用計画"]);
        assert_eq!(details.decisions, vec!["広告費を20%増額する"]);
        assert_eq!(
            details.todo,
            vec!["田中: 予算表を更新する", "佐藤: 会場を予約する"]
        );
        assert_eq!(details.next_actions, vec!["各部門に通知する"]);
        assert_eq!(details.next_meeting.as_deref(), Some("4月10日 14:00"));
    }

    #[test]
    fn test_omitted_headings_become_empty() {
        let (_, details) = parse_minutes("# 要約\n短い打ち合わせ。\n\n## 決定事項\n- 継続する\n");
        assert!(details.agenda.is_empty());
        assert_eq!(details.decisions, vec!["継続する"]);
        assert!(details.todo.is_empty());
        assert!(details.next_actions.is_empty());
        assert_eq!(details.next_meeting, None);
    }

    #[test]
    fn test_empty_next_meeting_section_is_empty_string() {
        let (_, details) = parse_minutes("# 要約\nx\n\n## 次回会議\n");
        assert_eq!(details.next_meeting.as_deref(), Some(""));
    }

    #[test]
    fn test_normalizes_crlf_and_trailing_whitespace() {
        let (formatted, details) =
            parse_minutes("# 要約\r\n概要です。  \r\n\r\n## 決定事項\r\n- 了承   \r\n\r\n");
        assert!(!formatted.contains('\r'));
        assert!(!formatted.lines().any(|l| l.ends_with(' ')));
        assert!(!formatted.ends_with('\n'));
        assert_eq!(details.decisions, vec!["了承"]);
    }

    #[test]
    fn test_unknown_headings_are_ignored() {
        let (_, details) =
            parse_minutes("# 要約\nx\n\n## 雑談\n- 天気の話\n\n## 決定事項\n- 採択\n");
        assert_eq!(details.decisions, vec!["採択"]);
        assert!(details.agenda.is_empty());
    }

    #[test]
    fn test_non_list_lines_in_list_sections_are_skipped() {
        let (_, details) = parse_minutes("## 決定事項\n特になし\n- 実際の決定\n");
        assert_eq!(details.decisions, vec!["実際の決定"]);
    }
}
