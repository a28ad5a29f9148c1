use std::path::PathBuf;

use thiserror::Error;

use crate::schema::ValidationReport;
use crate::wizard::WizardError;

#[derive(Error, Debug)]
pub enum RulebookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not replace rules file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Rules file not found: {}", .0.display())]
    RulesNotFound(PathBuf),

    #[error(
        "Rules file nests groups deeper than the JSON parser allows ({} levels): {}",
        crate::store::MAX_JSON_DEPTH,
        .0.display()
    )]
    TooDeep(PathBuf),

    #[error("Ruleset failed validation with {} error(s)", .0.errors.len())]
    InvalidRules(ValidationReport),

    #[error("Expected a JSON object for {0}")]
    NotAnObject(&'static str),

    #[error("Transaction {index} is malformed: {reason}")]
    InvalidTransaction { index: usize, reason: String },

    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("Wizard error: {0}")]
    Wizard(#[from] WizardError),
}

pub type Result<T> = std::result::Result<T, RulebookError>;
