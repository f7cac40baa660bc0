//! Phrase-Gen expands block-structured context-free grammars into random
//! phrases.
//!
//! A grammar file is a sequence of `{ ... }` blocks. The first line inside a
//! block names a non-terminal (angle brackets included) and every following
//! line up to the closing `}` is one candidate production. The `<start>`
//! block lists the templates a phrase may begin from.
//!
//! # Example
//!
//! ```rust
//! use phrase_gen::Grammar;
//!
//! let grammar = Grammar::parse_str(
//!     "{\n<start>\nThe <animal> runs.\n}\n{\n<animal>\ndog\ncat\n}\n",
//! )
//! .unwrap();
//!
//! let text = grammar.generate().unwrap();
//! assert!(text == "The dog runs." || text == "The cat runs.");
//! ```

pub mod expander;
pub mod grammar;
pub mod utils;

pub use expander::Expander;
pub use grammar::{Grammar, GrammarBuilder, GrammarConfig, GrammarIssue};
pub use utils::{GrammarError, Result};
