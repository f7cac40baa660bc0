use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phrase_gen::{Expander, Grammar, GrammarConfig};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Random phrase generator driven by a grammar file
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Path to the grammar file
    grammar_file: Option<PathBuf>,

    /// Number of phrases to generate
    count: Option<usize>,

    /// Seed the random source for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Non-terminal whose block lists the start templates
    #[arg(long, default_value = "<start>", global = true)]
    start: String,

    /// Abort a phrase after this many substitutions
    #[arg(long, value_name = "N")]
    max_substitutions: Option<usize>,

    /// Reject grammars that define a non-terminal twice
    #[arg(long, global = true)]
    strict: bool,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report undefined, empty, and unreachable rules
    Check {
        /// Path to the grammar file
        grammar_file: PathBuf,
    },

    /// Print the loaded grammar as JSON
    Dump {
        /// Path to the grammar file
        grammar_file: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = GrammarConfig::default()
        .start_symbol(cli.start.as_str())
        .reject_duplicates(cli.strict)
        .max_substitutions(cli.max_substitutions);

    match cli.command {
        Some(Commands::Check { grammar_file }) => cmd_check(&grammar_file, &config),
        Some(Commands::Dump { grammar_file }) => cmd_dump(&grammar_file, &config),
        None => {
            let grammar_file = cli.grammar_file.context("grammar file path required")?;
            let count = cli.count.context("phrase count required")?;
            cmd_generate(&grammar_file, count, cli.seed, &config)
        }
    }
}

fn load(path: &Path, config: &GrammarConfig) -> Result<Grammar> {
    Grammar::from_file_with_config(path, config)
        .with_context(|| format!("failed to read grammar {}", path.display()))
}

fn cmd_generate(
    path: &Path,
    count: usize,
    seed: Option<u64>,
    config: &GrammarConfig,
) -> Result<ExitCode> {
    let grammar = load(path, config)?;
    info!(rules = grammar.rules().len(), count, "generating phrases");

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let expander = Expander::with_config(&grammar, config);
    let mut out = BufWriter::new(io::stdout().lock());
    for (i, phrase) in expander.phrases(&mut rng, count).enumerate() {
        let phrase = phrase.with_context(|| format!("failed to expand phrase {}", i + 1))?;
        writeln!(out, "{}", phrase)?;
    }
    out.flush()?;

    Ok(ExitCode::SUCCESS)
}

fn cmd_check(path: &Path, config: &GrammarConfig) -> Result<ExitCode> {
    let grammar = load(path, config)?;
    let issues = grammar.check();

    println!(
        "Loaded {} start templates and {} rules from {}",
        grammar.start_templates().len(),
        grammar.rules().len(),
        path.display()
    );

    if issues.is_empty() {
        println!("All checks passed!");
        return Ok(ExitCode::SUCCESS);
    }

    for issue in &issues {
        let level = if issue.is_error() { "ERROR" } else { "WARNING" };
        println!("{}: {}", level, issue);
    }

    let errors = issues.iter().filter(|i| i.is_error()).count();
    println!("\nSummary: {} errors, {} warnings", errors, issues.len() - errors);

    Ok(if errors > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn cmd_dump(path: &Path, config: &GrammarConfig) -> Result<ExitCode> {
    let grammar = load(path, config)?;
    println!("{}", grammar.to_json()?);
    Ok(ExitCode::SUCCESS)
}
