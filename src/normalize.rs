//! Canonical text for embedding a tab.
//!
//! [`normalize`] folds a tab's URL and title into one lower-cased string:
//!
//! ```text
//! "<clean title> <hostname> <path keyword> <path keyword> <path keyword>"
//! ```
//!
//! Hostname and path are taken from the URL exactly as written: no punycode,
//! no percent-encoding. Input without a `//authority` part contributes an
//! empty hostname and is treated as a bare path, so malformed input degrades
//! the signal without failing.

use regex::Regex;
use std::sync::LazyLock;

/// Characters other than word characters, whitespace and hyphens.
static NON_TITLE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Maximum number of path segments kept as keywords.
pub const MAX_PATH_KEYWORDS: usize = 3;
/// Path segments must be longer than this many characters to count.
pub const MIN_KEYWORD_CHARS: usize = 2;

/// Build the embedding text for a `(url, title)` pair.
///
/// # Example
///
/// ```rust
/// use tab_grouper::normalize::normalize;
///
/// let text = normalize("https://Example.com/docs/getting-started/x", "My Title!!");
/// assert_eq!(text, "my title example.com docs getting-started");
/// ```
pub fn normalize(url: &str, title: &str) -> String {
    let (_, path) = split_url(url);
    let host = hostname(url).unwrap_or_default();
    let keywords = path_keywords(path);
    format!("{} {} {}", clean_title(title), host, keywords.join(" ")).to_lowercase()
}

/// Replace disallowed characters with spaces and collapse whitespace.
pub fn clean_title(title: &str) -> String {
    let replaced = NON_TITLE_CHARS.replace_all(title, " ");
    WHITESPACE_RUN.replace_all(&replaced, " ").trim().to_string()
}

/// First [`MAX_PATH_KEYWORDS`] non-trivial segments of a URL path, in order.
pub fn path_keywords(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|part| part.chars().count() > MIN_KEYWORD_CHARS)
        .take(MAX_PATH_KEYWORDS)
        .collect()
}

/// Lower-cased hostname of `raw` as written, without userinfo or port.
///
/// `None` when the URL has no `//authority` part or the authority names no
/// host.
pub fn hostname(raw: &str) -> Option<String> {
    let (authority, _) = split_url(raw);
    let authority = authority?;
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = match host_port.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or_default(),
        None => host_port.split(':').next().unwrap_or_default(),
    };
    (!host.is_empty()).then(|| host.to_lowercase())
}

/// Authority and path of `raw`, sliced straight from the input.
///
/// Query and fragment are dropped and a leading scheme is skipped. Nothing is
/// decoded, re-encoded or validated, so hosts and paths keep their original
/// spelling even when the URL is not well-formed.
fn split_url(raw: &str) -> (Option<&str>, &str) {
    let rest = raw.split(['?', '#']).next().unwrap_or_default();
    let rest = match rest.split_once(':') {
        Some((scheme, after)) if is_scheme(scheme) => after,
        _ => rest,
    };
    match rest.strip_prefix("//") {
        Some(after) => match after.find('/') {
            Some(slash) => (Some(&after[..slash]), &after[slash..]),
            None => (Some(after), ""),
        },
        None => (None, rest),
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
