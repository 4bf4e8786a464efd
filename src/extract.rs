//! Instagram link detection and message-text annotations.
//!
//! Pure text scanning, no I/O. Link equality downstream is exact string
//! match on whatever these functions return.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Instagram post URL. The trailing slash is part of the match, so link
/// strings compare equal across create/edit events for the same post.
static POST_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://www\.instagram\.com/p/[\w-]+/")
        .expect("post url regex compilation failed")
});

/// Discord spoiler marker. A pair wraps hidden content: `||hidden||`.
const SPOILER_MARKER: &str = "||";

/// Every Instagram post link in `text`, left to right, duplicates preserved.
pub fn extract_links(text: &str) -> Vec<&str> {
    POST_URL_RE.find_iter(text).map(|m| m.as_str()).collect()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// The caller promised `link` was extracted from this exact text.
    #[error("link `{link}` does not occur in the message text")]
    LinkNotInText { link: String },
}

/// Whether the first occurrence of `link` in `text` is spoiler-wrapped.
///
/// The link counts as wrapped iff an odd number of `||` markers (counted
/// non-overlapping, left to right) precede its position. Well-formed input
/// like `||link||` has exactly one marker before the link.
pub fn is_spoiler(text: &str, link: &str) -> Result<bool, ClassifyError> {
    let pos = text.find(link).ok_or_else(|| ClassifyError::LinkNotInText {
        link: link.to_string(),
    })?;
    let markers = text[..pos].matches(SPOILER_MARKER).count();
    Ok(markers % 2 == 1)
}

/// Whether the author wrapped the link in `<...>` to suppress previews.
pub fn is_no_preview(text: &str, link: &str) -> bool {
    text.contains(&format!("<{link}>"))
}
