use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::expander::Expander;
use crate::utils::{self, GrammarError, Result};

/// Line that opens a rule block
pub const BLOCK_OPEN: &str = "{";
/// Line that closes a rule block
pub const BLOCK_CLOSE: &str = "}";
/// Conventional start symbol
pub const DEFAULT_START_SYMBOL: &str = "<start>";

/// Configuration options for loading and expanding a grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarConfig {
    /// Key whose block contents form the start set
    pub start_symbol: String,
    /// Fail on a repeated non-terminal instead of letting the last block win
    pub reject_duplicates: bool,
    /// Upper bound on substitutions per phrase; `None` means unbounded
    pub max_substitutions: Option<usize>,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        GrammarConfig {
            start_symbol: DEFAULT_START_SYMBOL.to_string(),
            reject_duplicates: false,
            max_substitutions: None,
        }
    }
}

impl GrammarConfig {
    pub fn start_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.start_symbol = symbol.into();
        self
    }

    pub fn reject_duplicates(mut self, reject: bool) -> Self {
        self.reject_duplicates = reject;
        self
    }

    pub fn max_substitutions(mut self, limit: Option<usize>) -> Self {
        self.max_substitutions = limit;
        self
    }
}

/// A loaded grammar: the start set plus the rule table.
///
/// Immutable once built. Expansion only borrows it, so a single `Grammar`
/// can be shared across threads that each own their RNG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grammar {
    /// The distinguished start non-terminal, brackets included
    start_symbol: String,
    /// Top-level templates, one of which backs each generated phrase
    start: Vec<String>,
    /// Non-terminal (brackets included) to candidate templates
    rules: BTreeMap<String, Vec<String>>,
}

enum LoadState {
    ScanningForBlock,
    ReadingKey { open_line: usize },
    ReadingContent {
        open_line: usize,
        key: String,
        lines: Vec<String>,
    },
}

impl Grammar {
    /// Create an empty grammar with the given start symbol
    pub fn new(start_symbol: &str) -> Self {
        Grammar {
            start_symbol: start_symbol.to_string(),
            start: Vec::new(),
            rules: BTreeMap::new(),
        }
    }

    /// Load a block-format grammar file using the default configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_config(path, &GrammarConfig::default())
    }

    /// Load a block-format grammar file
    pub fn from_file_with_config<P: AsRef<Path>>(path: P, config: &GrammarConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(GrammarError::Io)?;
        debug!(path = %path.display(), "loading grammar");
        Self::from_reader(io::BufReader::new(file), config)
    }

    /// Parse block-format grammar text using the default configuration
    pub fn parse_str(source: &str) -> Result<Self> {
        Self::from_reader(source.as_bytes(), &GrammarConfig::default())
    }

    /// Parse a block-format grammar from any line source.
    ///
    /// A block is a `{` line, a key line, zero or more content lines and a
    /// `}` line. Delimiter lines must match exactly. Anything outside a
    /// block is ignored.
    pub fn from_reader<R: BufRead>(reader: R, config: &GrammarConfig) -> Result<Self> {
        let mut grammar = Grammar::new(&config.start_symbol);
        let mut state = LoadState::ScanningForBlock;

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(GrammarError::Io)?;
            let line_no = index + 1;

            state = match state {
                LoadState::ScanningForBlock if line == BLOCK_OPEN => {
                    LoadState::ReadingKey { open_line: line_no }
                }
                LoadState::ScanningForBlock => LoadState::ScanningForBlock,
                LoadState::ReadingKey { open_line } => LoadState::ReadingContent {
                    open_line,
                    key: line,
                    lines: Vec::new(),
                },
                LoadState::ReadingContent {
                    open_line,
                    key,
                    lines,
                } if line == BLOCK_CLOSE => {
                    grammar.insert_block(key, lines, open_line, config.reject_duplicates)?;
                    LoadState::ScanningForBlock
                }
                LoadState::ReadingContent {
                    open_line,
                    key,
                    mut lines,
                } => {
                    lines.push(line);
                    LoadState::ReadingContent {
                        open_line,
                        key,
                        lines,
                    }
                }
            };
        }

        match state {
            LoadState::ScanningForBlock => {}
            LoadState::ReadingKey { open_line } => {
                return Err(GrammarError::UnterminatedBlock {
                    line: open_line,
                    key: None,
                });
            }
            LoadState::ReadingContent { open_line, key, .. } => {
                return Err(GrammarError::UnterminatedBlock {
                    line: open_line,
                    key: Some(key),
                });
            }
        }

        debug!(
            start_templates = grammar.start.len(),
            rules = grammar.rules.len(),
            "grammar loaded"
        );
        Ok(grammar)
    }

    fn insert_block(
        &mut self,
        key: String,
        lines: Vec<String>,
        line: usize,
        reject_duplicates: bool,
    ) -> Result<()> {
        debug!(key = %key, productions = lines.len(), line, "read block");

        if key == self.start_symbol {
            self.start.extend(lines);
            return Ok(());
        }

        if self.rules.contains_key(&key) {
            if reject_duplicates {
                return Err(GrammarError::DuplicateNonTerminal { key, line });
            }
            warn!(key = %key, line, "duplicate non-terminal replaces earlier block");
        }
        self.rules.insert(key, lines);
        Ok(())
    }

    /// Parse a grammar from its JSON form.
    ///
    /// The start symbol may not also appear as a key in `rules`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let grammar: Grammar = serde_json::from_str(json)?;
        if grammar.rules.contains_key(&grammar.start_symbol) {
            return Err(GrammarError::InvalidGrammar(format!(
                "{} is the start symbol and cannot have a rule",
                grammar.start_symbol
            )));
        }
        Ok(grammar)
    }

    /// Load a grammar from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serialize the grammar as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Generate one phrase using the thread-local RNG
    pub fn generate(&self) -> Result<String> {
        self.generate_with(&mut rand::thread_rng())
    }

    /// Generate one phrase using the supplied RNG
    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String> {
        Expander::new(self).expand(rng)
    }

    /// Check if the grammar defines a specific non-terminal
    pub fn has_non_terminal(&self, key: &str) -> bool {
        self.rules.contains_key(key)
    }

    /// Candidate templates for a non-terminal
    pub fn productions(&self, key: &str) -> Option<&[String]> {
        self.rules.get(key).map(Vec::as_slice)
    }

    /// Get a reference to the rule table
    pub fn rules(&self) -> &BTreeMap<String, Vec<String>> {
        &self.rules
    }

    /// Get the start set
    pub fn start_templates(&self) -> &[String] {
        &self.start
    }

    /// Get the start symbol
    pub fn start_symbol(&self) -> &str {
        &self.start_symbol
    }

    /// Report structural problems that would make expansion fail or that
    /// leave rules unused. Issues are ordered by the rule that owns them.
    pub fn check(&self) -> Vec<GrammarIssue> {
        let mut issues = Vec::new();

        if self.start.is_empty() {
            issues.push(GrammarIssue::MissingStart(self.start_symbol.clone()));
        }

        let owners = std::iter::once((&self.start_symbol, &self.start)).chain(self.rules.iter());
        for (owner, templates) in owners {
            let mut undefined = BTreeSet::new();
            for template in templates {
                if utils::has_unterminated_placeholder(template) {
                    issues.push(GrammarIssue::UnterminatedPlaceholder {
                        owner: owner.clone(),
                        template: template.clone(),
                    });
                }
                for key in utils::placeholders(template) {
                    if key != self.start_symbol && !self.rules.contains_key(key) {
                        undefined.insert(key.to_string());
                    }
                }
            }
            issues.extend(undefined.into_iter().map(|name| GrammarIssue::UndefinedNonTerminal {
                name,
                referenced_by: owner.clone(),
            }));
        }

        for (key, templates) in &self.rules {
            if templates.is_empty() {
                issues.push(GrammarIssue::EmptyRule(key.clone()));
            }
        }

        let reachable = self.reachable();
        for key in self.rules.keys() {
            if !reachable.contains(key.as_str()) {
                issues.push(GrammarIssue::UnreachableRule(key.clone()));
            }
        }

        issues
    }

    fn reachable(&self) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = self
            .start
            .iter()
            .flat_map(|template| utils::placeholders(template))
            .collect();

        while let Some(key) = queue.pop_front() {
            if !seen.insert(key) {
                continue;
            }
            if let Some(templates) = self.rules.get(key) {
                queue.extend(templates.iter().flat_map(|t| utils::placeholders(t)));
            }
        }
        seen
    }
}

/// A problem found by [`Grammar::check`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarIssue {
    /// The start set is empty
    MissingStart(String),
    /// A template references a non-terminal with no rule
    UndefinedNonTerminal { name: String, referenced_by: String },
    /// A template opens a placeholder it never closes
    UnterminatedPlaceholder { owner: String, template: String },
    /// A rule block has no productions
    EmptyRule(String),
    /// A rule no start template can reach
    UnreachableRule(String),
}

impl GrammarIssue {
    /// Errors make expansion fail; everything else is a warning
    pub fn is_error(&self) -> bool {
        !matches!(self, GrammarIssue::UnreachableRule(_))
    }
}

impl fmt::Display for GrammarIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarIssue::MissingStart(symbol) => write!(f, "no templates defined for {}", symbol),
            GrammarIssue::UndefinedNonTerminal {
                name,
                referenced_by,
            } => write!(f, "{} references undefined non-terminal {}", referenced_by, name),
            GrammarIssue::UnterminatedPlaceholder { owner, template } => {
                write!(f, "{} has an unterminated placeholder in `{}`", owner, template)
            }
            GrammarIssue::EmptyRule(key) => write!(f, "{} has no productions", key),
            GrammarIssue::UnreachableRule(key) => write!(f, "{} is never referenced", key),
        }
    }
}

/// Builder for constructing Grammar instances
pub struct GrammarBuilder {
    grammar: Grammar,
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GrammarBuilder {
    /// Create a builder using the conventional `<start>` symbol
    pub fn new() -> Self {
        GrammarBuilder {
            grammar: Grammar::new(DEFAULT_START_SYMBOL),
        }
    }

    /// Take the start symbol from `config`. Duplicate handling and the
    /// substitution limit only apply to file loading and expansion.
    pub fn config(mut self, config: GrammarConfig) -> Self {
        self.grammar.start_symbol = config.start_symbol;
        self
    }

    /// Add a start template
    pub fn start(mut self, template: &str) -> Self {
        self.grammar.start.push(template.to_string());
        self
    }

    /// Append candidates to a non-terminal's rule
    pub fn rule(mut self, key: &str, candidates: &[&str]) -> Self {
        self.grammar
            .rules
            .entry(key.to_string())
            .or_default()
            .extend(candidates.iter().map(|c| c.to_string()));
        self
    }

    /// Build the grammar
    pub fn build(self) -> Grammar {
        self.grammar
    }
}
