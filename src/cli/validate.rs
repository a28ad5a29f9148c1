use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Color, Table};

use crate::error::{Result, RulebookError};
use crate::models::RulesDocument;
use crate::schema::{breadth_warnings, validate_document, ValidationIssue, ValidationReport};
use crate::store::{load_transactions, read_document};

pub fn run(rules_path: &Path, sample: Option<&Path>) -> Result<()> {
    let raw = read_document(rules_path)?;
    let mut report = validate_document(&raw)?;

    if report.valid {
        if let Some(sample_path) = sample {
            let txns = load_transactions(sample_path)?;
            let (doc, _) = RulesDocument::from_value(raw)?;
            let mut extra = Vec::new();
            for (i, rule) in doc.rules.iter().enumerate() {
                extra.extend(breadth_warnings(rule, &txns, &format!("_rules[{i}]")));
            }
            report = report.with_warnings(extra);
        }
    }

    print_report(&report);
    if !report.valid {
        return Err(RulebookError::InvalidRules(report));
    }
    println!("{}", format!("{} is valid.", rules_path.display()).green());
    Ok(())
}

fn issue_table(issues: &[ValidationIssue], color: Color) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Path", "Message"]);
    for issue in issues {
        table.add_row(vec![
            Cell::new(&issue.path).fg(color),
            Cell::new(&issue.message),
        ]);
    }
    table
}

/// Errors first, then warnings. Prints nothing for a clean report.
pub fn print_report(report: &ValidationReport) {
    if !report.errors.is_empty() {
        println!("{}", format!("{} error(s)", report.errors.len()).red().bold());
        println!("{}", issue_table(&report.errors, Color::Red));
    }
    if !report.warnings.is_empty() {
        println!("{}", format!("{} warning(s)", report.warnings.len()).yellow());
        println!("{}", issue_table(&report.warnings, Color::Yellow));
    }
}
