//! Phrase expansion.
//!
//! A phrase starts as a randomly chosen start template. The working buffer is
//! scanned left to right; each placeholder is replaced in place by a random
//! candidate and scanning resumes at the placeholder's first byte, so text
//! introduced by a substitution is itself scanned before anything to its
//! right.

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, trace};

use crate::grammar::{Grammar, GrammarConfig};
use crate::utils::{self, GrammarError, Result};

/// Expands phrases from a borrowed grammar
#[derive(Debug, Clone, Copy)]
pub struct Expander<'g> {
    grammar: &'g Grammar,
    max_substitutions: Option<usize>,
}

impl<'g> Expander<'g> {
    /// Create an expander with no substitution limit
    pub fn new(grammar: &'g Grammar) -> Self {
        Expander {
            grammar,
            max_substitutions: None,
        }
    }

    /// Create an expander honouring the expansion settings in `config`
    pub fn with_config(grammar: &'g Grammar, config: &GrammarConfig) -> Self {
        Self::new(grammar).max_substitutions(config.max_substitutions)
    }

    /// Fail an expansion once it has performed `limit` substitutions.
    ///
    /// Without a limit, a grammar whose rules only ever expand back into
    /// themselves never terminates.
    pub fn max_substitutions(mut self, limit: Option<usize>) -> Self {
        self.max_substitutions = limit;
        self
    }

    /// Generate one fully resolved phrase
    pub fn expand<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String> {
        let start = self.grammar.start_templates().choose(rng).ok_or_else(|| {
            GrammarError::NoStartTemplates(self.grammar.start_symbol().to_string())
        })?;
        let phrase = self.resolve(start.clone(), rng)?;
        debug!(phrase = %phrase, "generated phrase");
        Ok(phrase)
    }

    /// Generate `count` independent phrases lazily, in order
    pub fn phrases<'a, R: Rng + ?Sized>(
        &'a self,
        rng: &'a mut R,
        count: usize,
    ) -> impl Iterator<Item = Result<String>> + 'a {
        (0..count).map(move |_| self.expand(&mut *rng))
    }

    /// Rewrite `buffer` until no placeholder remains
    fn resolve<R: Rng + ?Sized>(&self, mut buffer: String, rng: &mut R) -> Result<String> {
        let mut cursor = 0;
        let mut substitutions = 0usize;

        while let Some((open, close)) = utils::find_placeholder(&buffer, cursor)? {
            if let Some(limit) = self.max_substitutions {
                if substitutions >= limit {
                    return Err(GrammarError::SubstitutionLimit { limit });
                }
            }

            let candidate = {
                let key = &buffer[open..=close];
                let candidates = self.candidates(key)?;
                candidates
                    .choose(rng)
                    .ok_or_else(|| GrammarError::EmptyProduction(key.to_string()))?
            };

            trace!(
                key = &buffer[open..=close],
                replacement = candidate.as_str(),
                at = open,
                "substitute"
            );
            buffer.replace_range(open..=close, candidate);
            substitutions += 1;
            cursor = open;
        }

        Ok(buffer)
    }

    fn candidates(&self, key: &str) -> Result<&'g [String]> {
        if key == self.grammar.start_symbol() {
            return Ok(self.grammar.start_templates());
        }
        self.grammar
            .productions(key)
            .ok_or_else(|| GrammarError::UnknownNonTerminal(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::rngs::mock::StepRng;

    fn first_choice() -> StepRng {
        StepRng::new(0, 0)
    }

    #[test]
    fn test_nested_substitution() {
        let grammar = GrammarBuilder::new()
            .start("<a>")
            .rule("<a>", &["<b>"])
            .rule("<b>", &["end"])
            .build();

        let phrase = Expander::new(&grammar).expand(&mut first_choice()).unwrap();
        assert_eq!(phrase, "end");
    }

    #[test]
    fn test_substitution_is_rescanned_before_later_text() {
        // <x> expands to text holding a placeholder; it must be resolved
        // in place rather than skipped
        let grammar = GrammarBuilder::new()
            .start("[<x>|<y>]")
            .rule("<x>", &["(<y>)"])
            .rule("<y>", &["y"])
            .build();

        let phrase = Expander::new(&grammar).expand(&mut first_choice()).unwrap();
        assert_eq!(phrase, "[(y)|y]");
    }

    #[test]
    fn test_literal_text_preserved() {
        let grammar = GrammarBuilder::new()
            .start("The <animal> runs.")
            .rule("<animal>", &["dog", "cat"])
            .build();

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let phrase = grammar.generate_with(&mut rng).unwrap();
            assert!(
                phrase == "The dog runs." || phrase == "The cat runs.",
                "unexpected phrase: {}",
                phrase
            );
        }
    }

    #[test]
    fn test_first_choice_is_deterministic() {
        let grammar = GrammarBuilder::new()
            .start("<greeting>, <name>!")
            .start("unused")
            .rule("<greeting>", &["Hello", "Hi"])
            .rule("<name>", &["<title> Smith", "Jo"])
            .rule("<title>", &["Dr.", "Ms."])
            .build();
        let expander = Expander::new(&grammar);

        let first = expander.expand(&mut first_choice()).unwrap();
        assert_eq!(first, "Hello, Dr. Smith!");
        assert_eq!(expander.expand(&mut first_choice()).unwrap(), first);
    }

    #[test]
    fn test_occurrences_resolve_independently() {
        let grammar = GrammarBuilder::new()
            .start("<n><n><n><n><n><n><n><n>")
            .rule("<n>", &["0", "1"])
            .build();

        let mut rng = StdRng::seed_from_u64(42);
        let phrases: Vec<String> = Expander::new(&grammar)
            .phrases(&mut rng, 16)
            .collect::<Result<_>>()
            .unwrap();

        assert!(phrases.iter().all(|p| p.len() == 8));
        assert!(
            phrases.iter().any(|p| p.contains('0') && p.contains('1')),
            "expected at least one phrase mixing candidates: {:?}",
            phrases
        );
    }

    #[test]
    fn test_phrases_yields_count_items() {
        let grammar = GrammarBuilder::new()
            .start("<greeting> there")
            .rule("<greeting>", &["hi", "bye"])
            .build();

        let phrases: Vec<String> = Expander::new(&grammar)
            .phrases(&mut first_choice(), 3)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(phrases, vec!["hi there", "hi there", "hi there"]);

        let none: Vec<_> = Expander::new(&grammar).phrases(&mut first_choice(), 0).collect();
        assert!(none.is_empty());
    }

    #[test]
    fn test_phrases_follow_generation_order() {
        let grammar = GrammarBuilder::new()
            .start("<n>-<n>")
            .rule("<n>", &["1", "2", "3", "4", "5"])
            .build();
        let expander = Expander::new(&grammar);

        let mut rng = StdRng::seed_from_u64(11);
        let one_by_one: Vec<String> = (0..12).map(|_| expander.expand(&mut rng).unwrap()).collect();

        let mut rng = StdRng::seed_from_u64(11);
        let batched: Vec<String> = expander
            .phrases(&mut rng, 12)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(batched.len(), 12);
        assert_eq!(batched, one_by_one);
    }

    #[test]
    fn test_unknown_non_terminal() {
        let grammar = GrammarBuilder::new().start("a <missing> b").build();
        let err = grammar.generate().unwrap_err();
        match err {
            GrammarError::UnknownNonTerminal(key) => assert_eq!(key, "<missing>"),
            other => panic!("Expected UnknownNonTerminal, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_placeholder_after_substitution() {
        let grammar = GrammarBuilder::new()
            .start("<a> tail")
            .rule("<a>", &["oops <"])
            .build();
        let err = grammar.generate().unwrap_err();
        match err {
            GrammarError::MalformedPlaceholder { template, position } => {
                assert_eq!(template, "oops < tail");
                assert_eq!(position, 5);
            }
            other => panic!("Expected MalformedPlaceholder, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_start_set() {
        let grammar = GrammarBuilder::new().rule("<a>", &["x"]).build();
        let err = grammar.generate().unwrap_err();
        assert!(matches!(err, GrammarError::NoStartTemplates(symbol) if symbol == "<start>"));
    }

    #[test]
    fn test_empty_rule() {
        let grammar = GrammarBuilder::new().start("<a>").rule("<a>", &[]).build();
        let err = grammar.generate().unwrap_err();
        assert!(matches!(err, GrammarError::EmptyProduction(key) if key == "<a>"));
    }

    #[test]
    fn test_start_symbol_reference() {
        let grammar = GrammarBuilder::new()
            .start("x")
            .rule("<wrap>", &["(<start>)"])
            .build();
        let expander = Expander::new(&grammar);
        let phrase = expander.resolve("<wrap>".to_string(), &mut first_choice()).unwrap();
        assert_eq!(phrase, "(x)");
    }

    #[test]
    fn test_substitution_limit() {
        let grammar = GrammarBuilder::new()
            .start("<loop>")
            .rule("<loop>", &["again <loop>"])
            .build();

        let err = Expander::new(&grammar)
            .max_substitutions(Some(10))
            .expand(&mut first_choice())
            .unwrap_err();
        assert!(matches!(err, GrammarError::SubstitutionLimit { limit: 10 }));
    }

    #[test]
    fn test_limit_not_hit_by_finite_grammar() {
        let grammar = GrammarBuilder::new()
            .start("<a> <a>")
            .rule("<a>", &["<b>"])
            .rule("<b>", &["z"])
            .build();
        let config = GrammarConfig::default().max_substitutions(Some(4));
        let phrase = Expander::with_config(&grammar, &config)
            .expand(&mut first_choice())
            .unwrap();
        assert_eq!(phrase, "z z");
    }

    #[test]
    fn test_shared_across_threads() {
        let grammar = GrammarBuilder::new()
            .start("<a> and <a>")
            .rule("<a>", &["<b>", "c"])
            .rule("<b>", &["b"])
            .build();

        std::thread::scope(|scope| {
            for seed in 0..4u64 {
                let grammar = &grammar;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for phrase in Expander::new(grammar).phrases(&mut rng, 25) {
                        let phrase = phrase.unwrap();
                        assert!(!phrase.contains('<'));
                    }
                });
            }
        });
    }
}
