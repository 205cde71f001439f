//! Text shaping for model context, written files, commits and pull requests.

use crate::RepoPath;

/// Line limits applied when a file is shown to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationLimits {
    /// Files with more lines than this are truncated.
    pub max_lines: usize,
    /// Lines kept from the start.
    pub head_lines: usize,
    /// Lines kept from the end.
    pub tail_lines: usize,
}

impl Default for TruncationLimits {
    fn default() -> Self {
        Self {
            max_lines: 400,
            head_lines: 250,
            tail_lines: 100,
        }
    }
}

/// Shortens oversized content to its head and tail around an omission marker.
///
/// Content at or under `limits.max_lines` lines is returned unchanged.
pub fn truncate_for_context(content: &str, limits: TruncationLimits) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= limits.max_lines {
        return content.to_string();
    }
    let head = limits.head_lines.min(lines.len());
    let tail = limits.tail_lines.min(lines.len() - head);
    let omitted = lines.len() - head - tail;
    let mut out = lines[..head].join("\n");
    out.push_str(&format!("\n... [{omitted} lines omitted] ...\n"));
    out.push_str(&lines[lines.len() - tail..].join("\n"));
    out.push('\n');
    out
}

/// Appends a trailing newline when non-empty content lacks one.
pub fn ensure_trailing_newline(content: &str) -> String {
    if content.is_empty() || content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}

/// Commit message for a run.
pub fn commit_message(prompt: &str, explanation: &str) -> String {
    format!("Auto PR: {prompt}\n\n{explanation}")
}

const MAX_TITLE_CHARS: usize = 200;

/// Pull request title for a run, cut to a length the host accepts.
pub fn pull_request_title(prompt: &str) -> String {
    let first_line = prompt.lines().next().unwrap_or_default().trim();
    let title = format!("Auto PR: {first_line}");
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title;
    }
    let mut cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

/// Bulleted list of paths, one per line.
pub fn file_list<'a>(paths: impl IntoIterator<Item = &'a RepoPath>) -> String {
    paths.into_iter().map(|p| format!("- {p}\n")).collect()
}

/// Pull request body for a run.
pub fn pull_request_body<'a>(
    prompt: &str,
    explanation: &str,
    files: impl IntoIterator<Item = &'a RepoPath>,
) -> String {
    format!(
        "This is an automated pull request.\n\n\
         **Modification Request:**\n{prompt}\n\n\
         **Changes Made:**\n{explanation}\n\n\
         **Modified Files:**\n{}\n\
         ---\n*Generated by Auto PR Bot*",
        file_list(files)
    )
}

/// Comment left on a pull request closed in favour of a new one.
pub fn supersession_comment(prompt: &str) -> String {
    format!(
        "Closing this PR to create a new one with updated changes.\n\n\
         New modification request: {prompt}"
    )
}
