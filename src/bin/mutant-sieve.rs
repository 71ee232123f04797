use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use mutant_sieve::config::{ConcurrencyBudget, ExecutorConfig};
use mutant_sieve::group::{DependencyResolver, GroupBuilder, SourceImportResolver, StaticDependencies};
use mutant_sieve::mutant::{Mutant, MutantResult};
use mutant_sieve::report::{ReportFormat, RunSummary, render_report};

#[derive(Debug, Parser)]
#[command(name = "mutant-sieve")]
#[command(about = "Inspect mutant grouping and summarize mutation test results")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Partition mutants into groups that can be checked together.
    Groups {
        /// JSON array of mutants.
        #[arg(long)]
        mutants: PathBuf,
        /// JSON object mapping each file to its direct dependencies. Without it, source files
        /// are read from disk and their relative imports followed.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Summarize a JSON array of mutant results.
    Summary {
        /// JSON array of mutant results.
        #[arg(long)]
        results: PathBuf,
        /// Output format.
        #[arg(long, value_enum, default_value = "md")]
        format: OutputFormat,
    },
    /// Show how a worker budget splits between checkers and test runners.
    Budget {
        /// Executor configuration (JSON). Defaults apply to missing fields.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the total concurrency.
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Markdown
    Md,
    /// JSON
    Json,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Groups { mutants, manifest } => {
            let mutants: Vec<Mutant> = read_json(&mutants)?;
            let resolver: Box<dyn DependencyResolver> = match manifest {
                Some(path) => Box::new(read_json::<StaticDependencies>(&path)?),
                None => Box::new(SourceImportResolver::new()),
            };
            let groups: Vec<Vec<String>> = GroupBuilder::new(resolver.as_ref())
                .build(&mutants)
                .into_iter()
                .map(|group| group.into_iter().map(|m| m.id).collect())
                .collect();
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
        Command::Summary { results, format } => {
            let results: Vec<MutantResult> = read_json(&results)?;
            let format = match format {
                OutputFormat::Md => ReportFormat::Markdown,
                OutputFormat::Json => ReportFormat::Json,
            };
            print!("{}", render_report(&results, format)?);
            let summary = RunSummary::from_results(&results);
            log::info!(
                "summary: killed={}, survived={}, mutation_score={:.2}%",
                summary.killed,
                summary.survived,
                summary.mutation_score
            );
        }
        Command::Budget {
            config,
            concurrency,
        } => {
            let mut config: ExecutorConfig = match config {
                Some(path) => read_json(&path)?,
                None => ExecutorConfig::default(),
            };
            if let Some(concurrency) = concurrency {
                config = config.with_concurrency(concurrency);
            }
            let budget = ConcurrencyBudget::from_config(&config);
            println!("total: {}", config.total_concurrency());
            println!("checkers: {}", budget.checkers);
            println!("test runners: {}", budget.test_runners);
        }
    }

    Ok(())
}
