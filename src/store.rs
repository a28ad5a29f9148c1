use std::io::Write;
use std::path::Path;

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{Result, RulebookError};
use crate::models::{Rule, RulesDocument, Transaction};

/// Nesting serde_json accepts before it refuses to parse. Every group costs two levels (the
/// group object and its `rules` array), so a rule can hold roughly 60 nested groups.
pub const MAX_JSON_DEPTH: usize = 128;

/// Read the raw JSON of a ruleset file without validating it.
pub fn read_document(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(RulebookError::RulesNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        if e.to_string().starts_with("recursion limit exceeded") {
            RulebookError::TooDeep(path.to_path_buf())
        } else {
            e.into()
        }
    })
}

/// Load and validate a ruleset once. Any validation error is fatal; warnings are logged.
pub fn load_document(path: &Path) -> Result<RulesDocument> {
    let raw = read_document(path)?;
    let (doc, report) = RulesDocument::from_value(raw)?;
    for issue in &report.warnings {
        warn!(path = %issue.path, "{}", issue.message);
    }
    info!(
        file = %path.display(),
        rules = doc.rules.len(),
        "loaded ruleset '{}'",
        doc.name
    );
    Ok(doc)
}

/// Replace the ruleset file atomically: write a sibling temp file, sync, then rename over.
pub fn save_document(path: &Path, doc: &RulesDocument) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(doc)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;

    info!(file = %path.display(), rules = doc.rules.len(), "saved ruleset");
    Ok(())
}

/// Append new rules after the existing ones. Among the new rules, declared priorities come
/// first (highest first), undeclared follow; ties keep the order given.
pub fn append_rules(doc: &mut RulesDocument, mut new_rules: Vec<Rule>) {
    // stable sort keeps insertion order for ties
    new_rules.sort_by_key(|r| match r.priority {
        Some(p) => (0, std::cmp::Reverse(p)),
        None => (1, std::cmp::Reverse(0)),
    });
    doc.rules.extend(new_rules);
}

/// Re-validate the document as it would be written, so conflicts introduced by an append
/// never reach disk.
pub fn ensure_valid(doc: &RulesDocument) -> Result<()> {
    let value = serde_json::to_value(doc)?;
    RulesDocument::from_value(value).map(|_| ())
}

/// Load a JSON array of canonical transactions.
pub fn load_transactions(path: &Path) -> Result<Vec<Transaction>> {
    let content = std::fs::read_to_string(path)?;
    let txns: Vec<Transaction> = serde_json::from_str(&content)?;
    for (index, txn) in txns.iter().enumerate() {
        if let Some(reason) = txn.shape_problem() {
            return Err(RulebookError::InvalidTransaction { index, reason });
        }
    }
    info!(file = %path.display(), count = txns.len(), "loaded transactions");
    Ok(txns)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::fixtures::*;
    use crate::models::Logic;

    fn write_json(dir: &Path, name: &str, value: &Value) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    fn ranked(category: &str, priority: Option<i64>) -> Rule {
        let mut rule = expense(category, Logic::Any, vec![contains(category)], 1.0);
        rule.priority = priority;
        rule
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_document(&dir.path().join("rules.json")).unwrap_err();
        assert!(matches!(err, RulebookError::RulesNotFound(_)));
    }

    #[test]
    fn test_load_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "rules.json", &sample_document());
        let doc = load_document(&path).unwrap();
        assert_eq!(doc.name, "sample");
        assert_eq!(doc.rules.len(), 2);
        assert_eq!(doc.rules[0].rule_id.as_deref(), Some("coffee"));
    }

    #[test]
    fn test_load_rejects_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = sample_document();
        raw["_rules"][1]["rule_id"] = json!("coffee");
        let path = write_json(dir.path(), "rules.json", &raw);
        match load_document(&path) {
            Err(RulebookError::InvalidRules(report)) => {
                assert!(report.errors.iter().any(|e| e.message.contains("duplicate rule_id")));
            }
            other => panic!("expected InvalidRules, got {other:?}"),
        }
    }

    #[test]
    fn test_load_corrupt_json_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_document(&path), Err(RulebookError::Json(_))));
    }

    fn nested_rule(depth: usize) -> Value {
        let mut node = json!({"field": "Description", "operator": "CONTAINS", "value": "ESSO"});
        for _ in 0..depth {
            node = json!({"group_logic": "MUST_MATCH_ALL", "rules": [node]});
        }
        let mut raw = sample_document();
        raw["_rules"][0]["rules"] = json!([node]);
        raw
    }

    #[test]
    fn test_load_deeply_nested_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "rules.json", &nested_rule(40));
        let doc = load_document(&path).unwrap();
        assert!(crate::evaluator::matches(&doc.rules[0], &txn("ESSO", 1.0, 0.0)));
    }

    #[test]
    fn test_load_past_parser_depth_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, serde_json::to_string(&nested_rule(70)).unwrap()).unwrap();
        match load_document(&path) {
            Err(err @ RulebookError::TooDeep(_)) => {
                assert!(err.to_string().contains("128 levels"), "{err}");
            }
            other => panic!("expected TooDeep, got {other:?}"),
        }
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "rules.json", &sample_document());
        let doc = load_document(&path).unwrap();

        let out = dir.path().join("nested").join("copy.json");
        save_document(&out, &doc).unwrap();
        let reloaded = load_document(&out).unwrap();
        assert_eq!(reloaded, doc);

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.find("\"_name\"").unwrap() < text.find("\"_rules\"").unwrap());
    }

    #[test]
    fn test_save_keeps_unrecognized_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = sample_document();
        raw["_owner"] = json!("bookkeeper@example.com");
        raw["_rules"][0]["notes"] = json!("hand edited, keep me");
        raw["_rules"][0]["rules"][0]["comment"] = json!("store #4412 only");
        raw["_rules"][0]["dual_entry"]["DR_COLUMN"]["note"] = json!("meals");
        let path = write_json(dir.path(), "rules.json", &raw);

        let mut doc = load_document(&path).unwrap();
        append_rules(&mut doc, vec![ranked("Fuel", Some(3))]);
        ensure_valid(&doc).unwrap();
        save_document(&path, &doc).unwrap();

        let saved = read_document(&path).unwrap();
        assert_eq!(saved["_owner"], "bookkeeper@example.com");
        assert_eq!(saved["_rules"][0]["notes"], "hand edited, keep me");
        assert_eq!(saved["_rules"][0]["rules"][0]["comment"], "store #4412 only");
        assert_eq!(saved["_rules"][0]["dual_entry"]["DR_COLUMN"]["note"], "meals");
        assert_eq!(saved["_rules"].as_array().unwrap().len(), 3);
        assert!(saved["_rules"][2].get("notes").is_none());
    }

    #[test]
    fn test_save_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        save_document(&path, &RulesDocument::new("first")).unwrap();
        save_document(&path, &RulesDocument::new("second")).unwrap();
        assert_eq!(load_document(&path).unwrap().name, "second");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_append_orders_new_rules_by_priority() {
        let mut doc = RulesDocument::new("t");
        doc.rules.push(ranked("existing", Some(1)));
        append_rules(
            &mut doc,
            vec![
                ranked("none-a", None),
                ranked("low", Some(5)),
                ranked("none-b", None),
                ranked("high", Some(50)),
            ],
        );
        let order: Vec<&str> = doc.rules.iter().map(|r| r.category_name.as_str()).collect();
        assert_eq!(order, vec!["existing", "high", "low", "none-a", "none-b"]);
    }

    #[test]
    fn test_append_never_moves_existing_rules() {
        let mut doc = RulesDocument::new("t");
        doc.rules.push(ranked("old-low", Some(1)));
        doc.rules.push(ranked("old-none", None));
        append_rules(&mut doc, vec![ranked("new-high", Some(99))]);
        assert_eq!(doc.rules[0].category_name, "old-low");
        assert_eq!(doc.rules[1].category_name, "old-none");
        assert_eq!(doc.rules[2].category_name, "new-high");
    }

    #[test]
    fn test_ensure_valid_catches_appended_conflicts() {
        let (mut doc, _) = RulesDocument::from_value(sample_document()).unwrap();
        let mut clash = ranked("Clash", None);
        clash.rule_id = Some("coffee".to_string());
        append_rules(&mut doc, vec![clash]);
        assert!(matches!(ensure_valid(&doc), Err(RulebookError::InvalidRules(_))));
    }

    #[test]
    fn test_load_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(
            dir.path(),
            "txns.json",
            &json!([
                {"Date": "2025-01-02", "Description": "ESSO STATION", "Debit": 45.0, "Credit": 0.0, "source": "chequing"},
                {"Date": null, "Description": "REBATE", "Debit": 0.0, "Credit": 5.0, "Balance": 100.0, "source": "chequing"}
            ]),
        );
        let txns = load_transactions(&path).unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[1].balance, Some(100.0));
        assert!(txns[1].date.is_none());
    }

    #[test]
    fn test_load_transactions_rejects_bad_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(
            dir.path(),
            "txns.json",
            &json!([
                {"Date": "2025-01-02", "Description": "", "Debit": 1.0, "Credit": 0.0, "source": "x"}
            ]),
        );
        match load_transactions(&path) {
            Err(RulebookError::InvalidTransaction { index, reason }) => {
                assert_eq!(index, 0);
                assert!(reason.contains("Description"));
            }
            other => panic!("expected InvalidTransaction, got {other:?}"),
        }
    }
}
