//! CLI entrypoint for the synthetic benchmark ledger generator.

use std::path::PathBuf;

use clap::Parser;
use ptaconf_bench::{Complexity, DEFAULT_SEED, GeneratorConfig, Preset, generate};
use ptaconf_reference::Date;

/// Generate benchmark ledger files.
#[derive(Debug, Parser)]
#[command(name = "generate-benchmark")]
#[command(about = "Generate synthetic ledger files for performance testing")]
struct Cli {
    /// Number of transactions.
    #[arg(short = 'n', long, default_value_t = 10_000)]
    transactions: usize,
    /// Number of accounts.
    #[arg(short = 'a', long, default_value_t = 100)]
    accounts: usize,
    /// Number of commodities.
    #[arg(short = 'c', long, default_value_t = 5)]
    commodities: usize,
    /// First transaction date (YYYY-MM-DD).
    #[arg(long, default_value = "2020-01-01")]
    start_date: String,
    /// Transaction complexity.
    #[arg(long, value_enum, default_value_t = Complexity::Medium)]
    complexity: Complexity,
    /// Output file (default: stdout).
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Random seed for reproducibility.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
    /// Preset scale; overrides the three counts.
    #[arg(long, value_enum)]
    preset: Option<Preset>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let start_date = Date::parse(&cli.start_date)
        .ok_or_else(|| format!("invalid --start-date '{}'", cli.start_date))?;
    let mut config = GeneratorConfig {
        transactions: cli.transactions,
        accounts: cli.accounts,
        commodities: cli.commodities,
        start_date,
        complexity: cli.complexity,
        seed: cli.seed,
    };
    if let Some(preset) = cli.preset {
        config = config.with_preset(preset);
    }

    let content = generate(&config);
    match cli.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &content)?;
            eprintln!(
                "Generated {} ({} bytes, {} transactions)",
                path.display(),
                content.len(),
                config.transactions
            );
        }
        None => print!("{content}"),
    }
    Ok(())
}
