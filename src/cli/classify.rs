use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use serde_json::json;

use crate::classifier::{classify_all, summarize, ClassificationResult, ClassifySummary};
use crate::error::Result;
use crate::fmt::money;
use crate::store::{load_document, load_transactions};

pub fn run(rules_path: &Path, file: &Path, as_json: bool) -> Result<()> {
    let doc = load_document(rules_path)?;
    let txns = load_transactions(file)?;
    let results = classify_all(&txns, &doc.rules);
    let summary = summarize(&results);

    if as_json {
        let out = json!({ "results": results, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", results_table(&results));
    print_summary(&summary);
    Ok(())
}

fn results_table(results: &[ClassificationResult<'_>]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "#", "Date", "Description", "Debit", "Credit", "Rule", "Category", "Amount", "DR", "CR",
    ]);
    for (i, result) in results.iter().enumerate() {
        let txn = result.transaction;
        let date = txn
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let mut row = vec![
            Cell::new(i),
            Cell::new(date),
            Cell::new(&txn.description),
            Cell::new(money(txn.debit)),
            Cell::new(money(txn.credit)),
        ];
        match (result.matched_rule, result.rule_index) {
            (Some(rule), Some(idx)) => {
                row.push(Cell::new(rule.label(idx)));
                row.push(Cell::new(&rule.category_name));
                match &result.allocation {
                    Some(alloc) => {
                        row.push(Cell::new(money(alloc.amount)));
                        row.push(Cell::new(alloc.dr_column.map(|c| c.to_string()).unwrap_or_default()));
                        row.push(Cell::new(alloc.cr_column.map(|c| c.to_string()).unwrap_or_default()));
                    }
                    None => {
                        row.push(Cell::new("ignored").fg(Color::DarkGrey));
                        row.push(Cell::new(""));
                        row.push(Cell::new(""));
                    }
                }
            }
            _ => {
                row.push(Cell::new("-"));
                row.push(Cell::new("needs review").fg(Color::Yellow));
                row.push(Cell::new(""));
                row.push(Cell::new(""));
                row.push(Cell::new(""));
            }
        }
        table.add_row(row);
    }
    table
}

fn print_summary(summary: &ClassifySummary) {
    println!(
        "{} transactions: {} classified, {} ignored, {}",
        summary.total,
        summary.classified.to_string().green(),
        summary.ignored,
        if summary.needs_review > 0 {
            format!("{} need review", summary.needs_review).yellow().to_string()
        } else {
            "0 need review".to_string()
        }
    );
}
