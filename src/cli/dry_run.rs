use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::{Result, RulebookError};
use crate::fmt::{indices, money};
use crate::models::Rule;
use crate::store::{load_document, load_transactions};
use crate::wizard::{dry_run, DryRunReport};

pub fn run(rules_path: &Path, file: &Path, rule: Option<&str>, expect: &[usize]) -> Result<()> {
    let doc = load_document(rules_path)?;
    let txns = load_transactions(file)?;

    let targets: Vec<usize> = match rule {
        Some(key) => {
            let (idx, _) = doc
                .find(key)
                .ok_or_else(|| RulebookError::UnknownRule(key.to_string()))?;
            vec![idx]
        }
        None => (0..doc.rules.len()).collect(),
    };

    for idx in targets {
        let rule = &doc.rules[idx];
        let report = dry_run(rule, &doc.rules[..idx], &txns, expect);
        print_report(idx, rule, &report);
    }
    Ok(())
}

pub fn print_report(idx: usize, rule: &Rule, report: &DryRunReport) {
    println!(
        "{} {} {}",
        format!("Rule #{idx}").bold(),
        rule.label(idx),
        format!("({})", rule.category_name).dimmed()
    );
    let booked: f64 = report.allocations.iter().map(|a| a.amount).sum();

    let mut table = Table::new();
    table.set_header(vec!["", "Transactions"]);
    table.add_row(vec![Cell::new("Matches"), Cell::new(indices(&report.matches))]);
    table.add_row(vec![Cell::new("Shadowed"), Cell::new(indices(&report.shadowed))]);
    table.add_row(vec![
        Cell::new("False positives"),
        Cell::new(indices(&report.false_positives)),
    ]);
    table.add_row(vec![
        Cell::new("False negatives"),
        Cell::new(indices(&report.false_negatives)),
    ]);
    table.add_row(vec![Cell::new("Booked"), Cell::new(money(booked))]);
    println!("{table}");

    if !report.shadowed.is_empty() {
        println!(
            "{}",
            "An earlier rule claims some of these matches first.".yellow()
        );
    }
    println!();
}
