pub mod classify;
pub mod demo;
pub mod dry_run;
pub mod init;
pub mod rules;
pub mod validate;
pub mod wizard;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "rulebook",
    version,
    about = "Rule-driven transaction classification and dual-entry allocation."
)]
pub struct Cli {
    /// Ruleset file to operate on (default: the path saved by `init`)
    #[arg(long, global = true)]
    pub rules: Option<PathBuf>,

    /// Log more detail to stderr (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty ruleset and remember its location.
    Init {
        /// Ruleset name stored in `_name`
        #[arg(long, default_value = "rules")]
        name: String,
    },
    /// Validate the whole ruleset document.
    Validate {
        /// Sample transactions (JSON array) used to flag overly broad conditions
        #[arg(long)]
        sample: Option<PathBuf>,
    },
    /// Classify a JSON array of transactions with the ruleset.
    Classify {
        /// Transactions file (JSON array of canonical transactions)
        file: PathBuf,
        /// Print results as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show which sample transactions each rule would match.
    DryRun {
        /// Sample transactions file (JSON array)
        file: PathBuf,
        /// Only this rule (rule_id or index, e.g. `coffee` or `#2`)
        #[arg(long)]
        rule: Option<String>,
        /// Indices the rule is expected to match, e.g. `0,2,5`
        #[arg(long, value_delimiter = ',')]
        expect: Vec<usize>,
    },
    /// Manage rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Write a sample ruleset and transaction file to explore rulebook.
    Demo {
        /// Directory to write into (default: ./rulebook-demo)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// List rules in classification order.
    List,
    /// Author a new rule step by step.
    Add {
        /// Hide existing categories and columns
        #[arg(long = "no-hints")]
        no_hints: bool,
        /// Sample transactions for breadth warnings and a dry run
        #[arg(long)]
        sample: Option<PathBuf>,
    },
    /// Append the rules of another ruleset file.
    Merge {
        /// Ruleset file to merge in
        file: PathBuf,
    },
}
