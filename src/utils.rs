use std::io;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Opening delimiter of a non-terminal placeholder
pub const PLACEHOLDER_OPEN: char = '<';
/// Closing delimiter of a non-terminal placeholder
pub const PLACEHOLDER_CLOSE: char = '>';

/// Custom error types for the phrase generator
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unterminated block opened at line {line}{}", key_suffix(.key.as_deref()))]
    UnterminatedBlock { line: usize, key: Option<String> },

    #[error("Duplicate non-terminal {key} at line {line}")]
    DuplicateNonTerminal { key: String, line: usize },

    #[error("Malformed placeholder at byte {position} in: {template}")]
    MalformedPlaceholder { template: String, position: usize },

    #[error("Unknown non-terminal: {0}")]
    UnknownNonTerminal(String),

    #[error("Empty production: {0}")]
    EmptyProduction(String),

    #[error("No start templates defined for {0}")]
    NoStartTemplates(String),

    #[error("Invalid grammar: {0}")]
    InvalidGrammar(String),

    #[error("Substitution limit of {limit} exceeded")]
    SubstitutionLimit { limit: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn key_suffix(key: Option<&str>) -> String {
    match key {
        Some(key) => format!(" for {}", key),
        None => String::new(),
    }
}

impl GrammarError {
    /// Whether this error comes from reading the grammar source rather than
    /// from expanding it.
    pub fn is_read_error(&self) -> bool {
        matches!(
            self,
            GrammarError::Io(_)
                | GrammarError::UnterminatedBlock { .. }
                | GrammarError::DuplicateNonTerminal { .. }
                | GrammarError::InvalidGrammar(_)
        )
    }
}

/// Result type for grammar operations
pub type Result<T> = std::result::Result<T, GrammarError>;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("placeholder pattern is valid"));

/// Locate the first placeholder at or after `from`.
///
/// Returns the inclusive byte range `(open, close)` of the span, `Ok(None)`
/// when no `<` remains, or `MalformedPlaceholder` when a `<` has no `>`
/// after it. The close delimiter is the nearest `>` following the open one.
pub fn find_placeholder(text: &str, from: usize) -> Result<Option<(usize, usize)>> {
    let Some(offset) = text[from..].find(PLACEHOLDER_OPEN) else {
        return Ok(None);
    };
    let open = from + offset;
    match text[open + 1..].find(PLACEHOLDER_CLOSE) {
        Some(len) => Ok(Some((open, open + 1 + len))),
        None => Err(GrammarError::MalformedPlaceholder {
            template: text.to_string(),
            position: open,
        }),
    }
}

/// All placeholder keys referenced by a template, in order of appearance.
pub fn placeholders(template: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER_RE.find_iter(template).map(|m| m.as_str())
}

/// Whether a template has a `<` that no `>` closes.
pub fn has_unterminated_placeholder(template: &str) -> bool {
    let tail = match PLACEHOLDER_RE.find_iter(template).last() {
        Some(m) => &template[m.end()..],
        None => template,
    };
    tail.contains(PLACEHOLDER_OPEN)
}
