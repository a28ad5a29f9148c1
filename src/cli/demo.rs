use std::path::PathBuf;

use colored::Colorize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::models::{RulesDocument, Transaction};
use crate::store::save_document;

fn column(name: &str, letter: &str) -> Value {
    json!({"name": name, "letter": letter})
}

fn contains(text: &str) -> Value {
    json!({"field": "Description", "operator": "CONTAINS", "value": text})
}

/// A small ruleset covering every transaction type and operator family.
fn demo_document() -> Value {
    let owner = column("Shareholder Contribution (CR)", "F");
    json!({
        "_name": "demo",
        "_version": "1",
        "_description": "Sample rules for a small business chequing account",
        "_scope": ["chequing"],
        "_rules": [
            {
                "category_name": "Vehicle Expenses - Fuel",
                "transaction_type": "EXPENSE",
                "logic": "MUST_MATCH_ALL",
                "rules": [
                    {
                        "group_logic": "MUST_MATCH_ANY",
                        "rules": [contains("ESSO"), contains("7-ELEVEN"), contains("PETRO-CANADA")]
                    },
                    {"field": "Debit", "operator": "BETWEEN", "value": [20.0, 120.0]}
                ],
                "dual_entry": {
                    "DR_COLUMN": column("Vehicle Expenses", "L"),
                    "CR_COLUMN": owner,
                    "APPLY_PERCENTAGE": 1.0
                },
                "rule_id": "fuel",
                "priority": 20
            },
            {
                "category_name": "Business Coffee",
                "transaction_type": "EXPENSE",
                "logic": "MUST_MATCH_ALL",
                "rules": [
                    contains("TIM HORTONS"),
                    {"field": "Debit", "operator": "LESS_THAN_OR_EQUAL_TO", "value": 6.0}
                ],
                "dual_entry": {
                    "DR_COLUMN": column("Food Expenses from Business Meetings", "T"),
                    "CR_COLUMN": owner,
                    "APPLY_PERCENTAGE": 1.0
                },
                "rule_id": "coffee",
                "priority": 10
            },
            {
                "category_name": "Telephone",
                "transaction_type": "EXPENSE",
                "logic": "MUST_MATCH_ANY",
                "rules": [
                    {"field": "Description", "operator": "STARTS_WITH", "value": "FIDO"}
                ],
                "dual_entry": {
                    "DR_COLUMN": column("Telephone", "M"),
                    "CR_COLUMN": owner,
                    "APPLY_PERCENTAGE": 0.66
                },
                "rule_id": "phone"
            },
            {
                "category_name": "Office Expenses - Cloud",
                "transaction_type": "EXPENSE",
                "logic": "MUST_MATCH_ANY",
                "rules": [
                    {"field": "Description", "operator": "REGEX", "value": r"AMAZON WEB SERVICES|AWS\s+\d+"}
                ],
                "dual_entry": {
                    "DR_COLUMN": column("Office Expenses", "I"),
                    "CR_COLUMN": owner,
                    "APPLY_PERCENTAGE": 1.0
                },
                "rule_id": "aws"
            },
            {
                "category_name": "Bank Rebate",
                "transaction_type": "INCOME",
                "logic": "MUST_MATCH_ANY",
                "rules": [
                    {"field": "Description", "operator": "EQUALS", "value": "ACCT BAL REBATE"}
                ],
                "dual_entry": {
                    "DR_COLUMN": null,
                    "CR_COLUMN": column("Other Income", "G"),
                    "APPLY_PERCENTAGE": 1.0
                },
                "rule_id": "rebate"
            },
            {
                "category_name": "Internal Transfer",
                "transaction_type": "IGNORE_TRANSACTION",
                "logic": "MUST_MATCH_ANY",
                "rules": [
                    {"field": "Description", "operator": "STARTS_WITH", "value": "TRIANGLE MC PAYMENT"}
                ],
                "rule_id": "transfer",
                "scope": "global"
            }
        ]
    })
}

fn demo_transactions() -> Value {
    let rows: &[(&str, &str, f64, f64, f64)] = &[
        ("2025-01-03", "ESSO STATION #221", 45.10, 0.0, 2954.90),
        ("2025-01-04", "TIM HORTONS #3012", 4.25, 0.0, 2950.65),
        ("2025-01-05", "FIDO MOBILE", 80.00, 0.0, 2870.65),
        ("2025-01-08", "AWS 88231 EMEA", 12.40, 0.0, 2858.25),
        ("2025-01-12", "TRIANGLE MC PAYMENT", 500.00, 0.0, 2358.25),
        ("2025-01-15", "ACCT BAL REBATE", 0.0, 5.00, 2363.25),
        ("2025-01-18", "ESSO STATION #221", 310.00, 0.0, 2053.25),
        ("2025-01-20", "TIM HORTONS #3012", 18.75, 0.0, 2034.50),
        ("2025-01-22", "GREENLEAF STUDIO SUPPLY", 23.00, 0.0, 2011.50),
    ];
    Value::Array(
        rows.iter()
            .map(|(date, description, debit, credit, balance)| {
                json!({
                    "Date": date,
                    "Description": description,
                    "Debit": debit,
                    "Credit": credit,
                    "Balance": balance,
                    "source": "chequing"
                })
            })
            .collect(),
    )
}

pub fn run(dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| PathBuf::from("rulebook-demo"));
    std::fs::create_dir_all(&dir)?;

    let (doc, _) = RulesDocument::from_value(demo_document())?;
    let rules_path = dir.join("rules.json");
    save_document(&rules_path, &doc)?;

    let txns: Vec<Transaction> = serde_json::from_value(demo_transactions())?;
    let txns_path = dir.join("transactions.json");
    std::fs::write(&txns_path, format!("{}\n", serde_json::to_string_pretty(&txns)?))?;

    println!("{}", "Demo files written.".green());
    println!("  Rules:        {} ({} rules)", rules_path.display(), doc.rules.len());
    println!("  Transactions: {} ({} rows)", txns_path.display(), txns.len());
    println!();
    println!("Try:");
    println!("  rulebook --rules {} rules list", rules_path.display());
    println!(
        "  rulebook --rules {} classify {}",
        rules_path.display(),
        txns_path.display()
    );
    println!(
        "  rulebook --rules {} dry-run {} --rule fuel --expect 0,6",
        rules_path.display(),
        txns_path.display()
    );
    Ok(())
}
