//! Pure extraction of structured data from the watched files.
//!
//! Nothing in this module touches the filesystem. Callers hand in raw file
//! content (and, for diffing, the previously seen content) and get back task
//! records, log entries, and change classifications.
//!
//! # Tasks File
//!
//! ```text
//! # Bug                      <- category (optional, defaults to "Task")
//! Fix the login redirect     <- description lines
//!
//! File Reference:            <- optional marker
//! - src/auth.rs              <- references
//! ```
//!
//! # Log File
//!
//! Every non-empty line that is not a `#` heading is an entry. A subset of
//! those lines are *recognized*: they start with a `- `/`* ` bullet or carry
//! one of [`STATUS_GLYPHS`]. Only recognized lines participate in new-entry
//! diffing, while snapshots list every entry.

use chrono::Utc;

use crate::types::{LogEntry, LogLevel, TaskRecord, DEFAULT_CATEGORY};

/// Marker line that starts the reference list in the tasks file.
pub const FILE_REFERENCE_MARKER: &str = "File Reference:";

/// Status glyphs that make a log line recognized.
pub const STATUS_GLYPHS: &[&str] = &[
    "🔄", "✅", "📊", "🎯", "🟢", "🔵", "🟡", "🟣", "📝", "❌", "🚀", "🔍", "🎉", "🔥", "🎊", "✨",
];

/// Outcome of comparing the tasks file word count against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TasksChange {
    /// The baseline was zero; the current count becomes the new baseline.
    EstablishedBaseline,

    /// The word count moved away from the baseline.
    ///
    /// Only an increase triggers re-parsing of the task.
    Changed { increased: bool },

    /// The word count equals the baseline.
    Unchanged,
}

/// Parses the current task out of the tasks file.
///
/// Returns `None` when no description text remains after trimming.
#[must_use]
pub fn parse_task(content: &str) -> Option<TaskRecord> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();

    let category = lines
        .iter()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY);

    let marker = lines
        .iter()
        .position(|line| line.starts_with(FILE_REFERENCE_MARKER));
    let body_end = marker.unwrap_or(lines.len());

    let description = lines[..body_end]
        .iter()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let description = description.trim();
    if description.is_empty() {
        return None;
    }

    let mut references = Vec::new();
    if let Some(marker) = marker {
        for line in &lines[marker + 1..] {
            if let Some(reference) = strip_bullet(line) {
                if !reference.is_empty() {
                    references.push(reference.to_string());
                }
            } else if !line.is_empty() && !line.starts_with('#') {
                break;
            }
        }
    }

    Some(TaskRecord::new(description, category, references))
}

/// Returns every entry line of the log file, in file order.
///
/// Lines are trimmed; empty lines and `#` headings are dropped.
#[must_use]
pub fn parse_log_entries(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Extracts the message of a recognized log line.
///
/// Returns `None` for lines that neither start with a bullet nor contain a
/// status glyph, and for lines whose message would be empty or a heading.
#[must_use]
pub fn recognized_message(line: &str) -> Option<String> {
    let line = line.trim();
    let recognized = line.starts_with("- ")
        || line.starts_with("* ")
        || STATUS_GLYPHS.iter().any(|glyph| line.contains(glyph));
    if !recognized {
        return None;
    }

    let message = strip_markers(line);
    if message.is_empty() || message.starts_with('#') {
        None
    } else {
        Some(message.to_string())
    }
}

/// Recognized messages present in `current` but absent from `previous`.
///
/// Membership is by exact message text, so reordering or repeating an
/// existing message is never reported, while a message that disappeared and
/// came back is.
#[must_use]
pub fn diff_log_entries(previous: &str, current: &str) -> Vec<String> {
    let known: std::collections::HashSet<String> = parse_log_entries(previous)
        .iter()
        .filter_map(|line| recognized_message(line))
        .collect();

    parse_log_entries(current)
        .iter()
        .filter_map(|line| recognized_message(line))
        .filter(|message| !known.contains(message))
        .collect()
}

/// Builds the full entry list for a log file, newest first.
#[must_use]
pub fn build_log_entries(content: &str, session: Option<&str>) -> Vec<LogEntry> {
    let now = Utc::now();
    let millis = now.timestamp_millis();
    let mut entries: Vec<LogEntry> = parse_log_entries(content)
        .iter()
        .enumerate()
        .map(|(index, line)| LogEntry {
            id: format!("log-{millis}-{index}"),
            message: strip_markers(line).to_string(),
            timestamp: now,
            level: level_of(line),
            session: session.map(String::from),
        })
        .collect();
    entries.reverse();
    entries
}

/// Counts the words of the tasks file, ignoring heading lines.
#[must_use]
pub fn word_count(content: &str) -> usize {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(|line| line.split_whitespace().count())
        .sum()
}

/// Classifies a tasks file word count against the session baseline.
#[must_use]
pub fn classify_tasks_change(baseline: usize, current: usize) -> TasksChange {
    if baseline == 0 {
        TasksChange::EstablishedBaseline
    } else if current == baseline {
        TasksChange::Unchanged
    } else {
        TasksChange::Changed {
            increased: current > baseline,
        }
    }
}

/// Renders a submitted task in the tasks file format.
#[must_use]
pub fn render_task_file(category: &str, description: &str, references: &[String]) -> String {
    let mut content = format!("# {category}\n{description}\n");
    if !references.is_empty() {
        content.push('\n');
        content.push_str(FILE_REFERENCE_MARKER);
        content.push('\n');
        for reference in references {
            content.push_str("- ");
            content.push_str(reference);
            content.push('\n');
        }
    }
    content
}

/// The narrative log line written for each tasks file check.
#[must_use]
pub fn check_narrative(change: TasksChange, check: u64, words: usize) -> (String, LogLevel) {
    match change {
        TasksChange::EstablishedBaseline => (
            format!("🔵 Check #{check}: Word count: {words} words (baseline). New session started."),
            LogLevel::Info,
        ),
        TasksChange::Changed { .. } => (
            format!(
                "🟡 Check #{check}: Word count: {words} words (CHANGE DETECTED). Reading tasks file..."
            ),
            LogLevel::Change,
        ),
        TasksChange::Unchanged => (
            format!("🟣 Check #{check}: Word count: {words} words (no change). Task in progress."),
            LogLevel::Monitoring,
        ),
    }
}

fn strip_bullet(line: &str) -> Option<&str> {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .map(str::trim)
}

/// Strips leading bullet characters and spaces.
fn strip_markers(line: &str) -> &str {
    line.trim_start_matches(['-', '*', ' ']).trim()
}

fn level_of(line: &str) -> LogLevel {
    if line.contains("🟡") {
        LogLevel::Change
    } else if line.contains("🟣") {
        LogLevel::Monitoring
    } else {
        LogLevel::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // parse_task
    // ========================================================================

    #[test]
    fn parse_task_with_heading_and_description() {
        let task = parse_task("# Task\nwrite tests\n").unwrap();
        assert_eq!(task.category, "Task");
        assert_eq!(task.description, "write tests");
        assert!(task.file_references.is_empty());
    }

    #[test]
    fn parse_task_defaults_category() {
        let task = parse_task("just do it\n").unwrap();
        assert_eq!(task.category, DEFAULT_CATEGORY);
        assert_eq!(task.description, "just do it");
    }

    #[test]
    fn parse_task_joins_multiline_description() {
        let task = parse_task("# Bug\n  first line  \n\nsecond line\n").unwrap();
        assert_eq!(task.category, "Bug");
        assert_eq!(task.description, "first line second line");
    }

    #[test]
    fn parse_task_collects_references() {
        let content = "# Feature\nadd search\n\nFile Reference:\n- src/search.rs\n* docs/search.md\n\n- tests/search.rs\n";
        let task = parse_task(content).unwrap();
        assert_eq!(task.description, "add search");
        assert_eq!(
            task.file_references,
            vec!["src/search.rs", "docs/search.md", "tests/search.rs"]
        );
    }

    #[test]
    fn parse_task_references_stop_at_plain_line() {
        let content = "# Task\nx\nFile Reference:\n- a.rs\nnotes follow\n- b.rs\n";
        let task = parse_task(content).unwrap();
        assert_eq!(task.file_references, vec!["a.rs"]);
    }

    #[test]
    fn parse_task_references_skip_headings() {
        let content = "# Task\nx\nFile Reference:\n## more\n- a.rs\n";
        let task = parse_task(content).unwrap();
        assert_eq!(task.file_references, vec!["a.rs"]);
    }

    #[test]
    fn parse_task_empty_description_is_none() {
        assert!(parse_task("# TaskSync Tasks\n\n").is_none());
        assert!(parse_task("").is_none());
        assert!(parse_task("# Task\nFile Reference:\n- a.rs\n").is_none());
    }

    #[test]
    fn parse_task_is_idempotent() {
        let content = "# Task\nwrite tests\nFile Reference:\n- a.rs\n";
        let first = parse_task(content).unwrap();
        let second = parse_task(content).unwrap();
        assert!(first.same_content(&second));
    }

    #[test]
    fn parse_task_round_trips_rendered_submission() {
        let refs = vec!["src/lib.rs".to_string(), "README.md".to_string()];
        let content = render_task_file("Bug", "fix the crash", &refs);
        let task = parse_task(&content).unwrap();
        assert_eq!(task.category, "Bug");
        assert_eq!(task.description, "fix the crash");
        assert_eq!(task.file_references, refs);
    }

    // ========================================================================
    // log parsing
    // ========================================================================

    #[test]
    fn parse_log_entries_drops_headings_and_blanks() {
        let content = "# Log\n\n- ✅ one\nplain note\n   \n## Section\n* two\n";
        assert_eq!(
            parse_log_entries(content),
            vec!["- ✅ one", "plain note", "* two"]
        );
    }

    #[test]
    fn recognized_message_strips_bullets() {
        assert_eq!(recognized_message("- ✅ step one").as_deref(), Some("✅ step one"));
        assert_eq!(recognized_message("* done").as_deref(), Some("done"));
        assert_eq!(recognized_message("🎉 shipped").as_deref(), Some("🎉 shipped"));
    }

    #[test]
    fn recognized_message_rejects_plain_lines() {
        assert_eq!(recognized_message("plain note"), None);
        assert_eq!(recognized_message("-no space"), None);
        assert_eq!(recognized_message("- # heading"), None);
        assert_eq!(recognized_message("- "), None);
    }

    #[test]
    fn diff_reports_only_new_recognized_messages() {
        let previous = "- ✅ step one\n- ✅ step two\n";
        let current = "- ✅ step one\n- ✅ step two\n- 🎉 step three\n";
        assert_eq!(diff_log_entries(previous, current), vec!["🎉 step three"]);
    }

    #[test]
    fn diff_ignores_unrecognized_lines() {
        let previous = "- ✅ step one\n";
        let current = "- ✅ step one\njust a note\n";
        assert!(diff_log_entries(previous, current).is_empty());
    }

    #[test]
    fn diff_is_by_text_not_position() {
        let previous = "- a\n- b\n";
        let current = "- b\n- a\n- a\n";
        assert!(diff_log_entries(previous, current).is_empty());
    }

    #[test]
    fn diff_treats_reappearing_message_as_new() {
        let previous = "- b\n";
        let current = "- a\n- b\n";
        assert_eq!(diff_log_entries(previous, current), vec!["a"]);
    }

    #[test]
    fn diff_against_empty_previous_reports_everything() {
        assert_eq!(diff_log_entries("", "- X\n"), vec!["X"]);
    }

    #[test]
    fn build_log_entries_is_newest_first_and_includes_plain_lines() {
        let entries = build_log_entries("- ✅ step one\nnote\n- 🎉 step three\n", Some("#1"));
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["🎉 step three", "note", "✅ step one"]);
        assert!(entries.iter().all(|e| e.session.as_deref() == Some("#1")));
    }

    #[test]
    fn build_log_entries_assigns_levels_from_glyphs() {
        let content = "🔵 Check #1\n🟡 Check #2\n🟣 Check #3\n";
        let levels: Vec<_> = build_log_entries(content, None)
            .iter()
            .map(|e| e.level)
            .collect();
        assert_eq!(
            levels,
            vec![LogLevel::Monitoring, LogLevel::Change, LogLevel::Info]
        );
    }

    // ========================================================================
    // word count classification
    // ========================================================================

    #[test]
    fn word_count_ignores_headings() {
        assert_eq!(word_count("# Task\nwrite tests\n"), 2);
        assert_eq!(word_count("# Task\nwrite tests and docs\n"), 4);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn classify_establishes_baseline_from_zero() {
        assert_eq!(classify_tasks_change(0, 7), TasksChange::EstablishedBaseline);
    }

    #[test]
    fn classify_equal_is_unchanged() {
        assert_eq!(classify_tasks_change(4, 4), TasksChange::Unchanged);
    }

    #[test]
    fn classify_increase_and_decrease() {
        assert_eq!(
            classify_tasks_change(2, 4),
            TasksChange::Changed { increased: true }
        );
        assert_eq!(
            classify_tasks_change(4, 2),
            TasksChange::Changed { increased: false }
        );
    }

    // ========================================================================
    // rendering
    // ========================================================================

    #[test]
    fn render_without_references() {
        assert_eq!(render_task_file("Task", "write tests", &[]), "# Task\nwrite tests\n");
    }

    #[test]
    fn render_with_references() {
        let refs = vec!["a.rs".to_string(), "b.rs".to_string()];
        assert_eq!(
            render_task_file("Bug", "fix", &refs),
            "# Bug\nfix\n\nFile Reference:\n- a.rs\n- b.rs\n"
        );
    }

    #[test]
    fn narrative_lines_carry_counter_and_words() {
        let (line, level) = check_narrative(TasksChange::EstablishedBaseline, 1, 2);
        assert_eq!(line, "🔵 Check #1: Word count: 2 words (baseline). New session started.");
        assert_eq!(level, LogLevel::Info);

        let (line, level) = check_narrative(TasksChange::Changed { increased: true }, 2, 4);
        assert!(line.starts_with("🟡 Check #2: Word count: 4 words (CHANGE DETECTED)"));
        assert_eq!(level, LogLevel::Change);

        let (line, level) = check_narrative(TasksChange::Unchanged, 3, 4);
        assert!(line.starts_with("🟣 Check #3: Word count: 4 words (no change)"));
        assert_eq!(level, LogLevel::Monitoring);
    }

    #[test]
    fn narrative_lines_are_recognized() {
        let (line, _) = check_narrative(TasksChange::Unchanged, 9, 1);
        assert!(recognized_message(&line).is_some());
    }
}
