mod classifier;
mod cli;
mod error;
mod evaluator;
mod fmt;
mod models;
mod schema;
mod settings;
mod store;
mod wizard;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, RulesCommands};
use error::RulebookError;
use settings::{load_settings, resolve_rules_path};

/// Log to stderr so `--json` output stays clean. RUST_LOG wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "rulebook=warn",
        1 => "rulebook=debug",
        _ => "rulebook=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Fatal errors go to stderr. A ruleset that fails to load lists every error path, except
/// under `validate`, which has already printed them as a table.
fn report_error(e: &RulebookError, shown: bool) {
    eprintln!("Error: {e}");
    if let RulebookError::InvalidRules(report) = e {
        if !shown {
            for issue in &report.errors {
                eprintln!("  {}: {}", issue.path, issue.message);
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let rules_path = resolve_rules_path(cli.rules.as_deref());
    let report_shown = matches!(cli.command, Commands::Validate { .. });

    let result = match cli.command {
        Commands::Init { name } => cli::init::run(&rules_path, &name),
        Commands::Validate { sample } => cli::validate::run(&rules_path, sample.as_deref()),
        Commands::Classify { file, json } => cli::classify::run(&rules_path, &file, json),
        Commands::DryRun { file, rule, expect } => {
            cli::dry_run::run(&rules_path, &file, rule.as_deref(), &expect)
        }
        Commands::Rules { command } => match command {
            RulesCommands::List => cli::rules::list(&rules_path),
            RulesCommands::Add { no_hints, sample } => {
                let hints = !no_hints && load_settings().hints;
                cli::wizard::run(&rules_path, hints, sample.as_deref())
            }
            RulesCommands::Merge { file } => cli::rules::merge(&rules_path, &file),
        },
        Commands::Demo { dir } => cli::demo::run(dir),
    };

    if let Err(e) = result {
        report_error(&e, report_shown);
        std::process::exit(1);
    }
}
