use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::percent;
use crate::store::{append_rules, ensure_valid, load_document, save_document};

pub fn list(rules_path: &Path) -> Result<()> {
    let doc = load_document(rules_path)?;
    if doc.rules.is_empty() {
        println!("No rules in {}.", doc.name);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "#", "ID", "Category", "Type", "Conditions", "DR", "CR", "Share", "Priority",
    ]);
    for (i, rule) in doc.rules.iter().enumerate() {
        let de = rule.dual_entry.as_ref().filter(|_| !rule.transaction_type.is_ignore());
        let column = |c: Option<&crate::models::Column>| c.map(|c| c.to_string()).unwrap_or_default();
        table.add_row(vec![
            Cell::new(i),
            Cell::new(rule.rule_id.as_deref().unwrap_or("")),
            Cell::new(&rule.category_name),
            Cell::new(rule.transaction_type.key()),
            Cell::new(rule.describe()),
            Cell::new(column(de.and_then(|d| d.dr_column.as_ref()))),
            Cell::new(column(de.and_then(|d| d.cr_column.as_ref()))),
            Cell::new(de.map(|d| percent(d.apply_percentage)).unwrap_or_default()),
            Cell::new(rule.priority.map(|p| p.to_string()).unwrap_or_default()),
        ]);
    }
    println!("{} ({} rules, first match wins)\n{table}", doc.name, doc.rules.len());
    Ok(())
}

/// Append every rule of `file` after the existing ones, the same way the wizard saves.
pub fn merge(rules_path: &Path, file: &Path) -> Result<()> {
    let mut doc = load_document(rules_path)?;
    let incoming = load_document(file)?;
    let count = incoming.rules.len();

    append_rules(&mut doc, incoming.rules);
    ensure_valid(&doc)?;
    save_document(rules_path, &doc)?;

    println!(
        "{}",
        format!(
            "Merged {count} rule(s) from {} into {}",
            file.display(),
            rules_path.display()
        )
        .green()
    );
    Ok(())
}
