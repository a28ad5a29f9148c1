use serde::Serialize;
use tracing::debug;

use crate::evaluator::evaluate;
use crate::models::{Column, Rule, Transaction};

/// Where a matched amount is booked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation<'a> {
    pub amount: f64,
    pub dr_column: Option<&'a Column>,
    pub cr_column: Option<&'a Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult<'a> {
    pub transaction: &'a Transaction,
    pub matched_rule: Option<&'a Rule>,
    /// Position of `matched_rule` in the ruleset.
    pub rule_index: Option<usize>,
    pub allocation: Option<Allocation<'a>>,
    /// No rule matched; needs manual review.
    pub ambiguous: bool,
}

impl ClassificationResult<'_> {
    pub fn is_ignored(&self) -> bool {
        self.matched_rule
            .is_some_and(|r| r.transaction_type.is_ignore())
    }
}

/// First-match-wins over the ruleset in its persisted order. `priority` is never consulted.
/// Rules must already have passed whole-document validation.
pub fn classify<'a>(txn: &'a Transaction, rules: &'a [Rule]) -> ClassificationResult<'a> {
    for (idx, rule) in rules.iter().enumerate() {
        let outcome = evaluate(rule, txn);
        if !outcome.matched {
            continue;
        }
        debug!(rule = %rule.label(idx), description = %txn.description, "rule matched");
        let allocation = match (&rule.dual_entry, rule.transaction_type.is_ignore()) {
            (Some(dual_entry), false) => Some(Allocation {
                amount: outcome.amount,
                dr_column: dual_entry.dr_column.as_ref(),
                cr_column: dual_entry.cr_column.as_ref(),
            }),
            _ => None,
        };
        return ClassificationResult {
            transaction: txn,
            matched_rule: Some(rule),
            rule_index: Some(idx),
            allocation,
            ambiguous: false,
        };
    }

    debug!(description = %txn.description, "no rule matched");
    ClassificationResult {
        transaction: txn,
        matched_rule: None,
        rule_index: None,
        allocation: None,
        ambiguous: true,
    }
}

/// One result per transaction, in input order.
pub fn classify_all<'a>(txns: &'a [Transaction], rules: &'a [Rule]) -> Vec<ClassificationResult<'a>> {
    txns.iter().map(|t| classify(t, rules)).collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct ClassifySummary {
    pub total: usize,
    pub classified: usize,
    pub ignored: usize,
    pub needs_review: usize,
}

pub fn summarize(results: &[ClassificationResult<'_>]) -> ClassifySummary {
    let mut summary = ClassifySummary {
        total: results.len(),
        ..Default::default()
    };
    for result in results {
        if result.ambiguous {
            summary.needs_review += 1;
        } else if result.is_ignored() {
            summary.ignored += 1;
        } else {
            summary.classified += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{Field, Logic, Operator, RulesDocument};

    fn sample_rules() -> Vec<Rule> {
        RulesDocument::from_value(sample_document()).unwrap().0.rules
    }

    #[test]
    fn test_scenario_fuel_range() {
        let rules = vec![fuel_rule()];
        let inside = txn("ESSO STATION", 45.0, 0.0);
        let result = classify(&inside, &rules);
        assert!(!result.ambiguous);
        assert_eq!(result.allocation.as_ref().unwrap().amount, 45.0);
        assert_eq!(result.allocation.unwrap().dr_column.unwrap().letter, "L");

        let outside = txn("ESSO STATION", 500.0, 0.0);
        let result = classify(&outside, &rules);
        assert!(result.ambiguous);
        assert!(result.matched_rule.is_none());
        assert!(result.allocation.is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let broad = expense("Broad", Logic::Any, vec![contains("PAYMENT")], 1.0);
        let narrow = expense("Narrow", Logic::Any, vec![contains("PAYMENT RECEIVED")], 1.0);
        let t = txn("PAYMENT RECEIVED", 10.0, 0.0);

        let rules = vec![broad.clone(), narrow.clone()];
        let result = classify(&t, &rules);
        assert_eq!(result.matched_rule.unwrap().category_name, "Broad");
        assert_eq!(result.rule_index, Some(0));

        let reordered = vec![narrow, broad];
        assert_eq!(classify(&t, &reordered).matched_rule.unwrap().category_name, "Narrow");
    }

    #[test]
    fn test_priority_is_not_consulted() {
        let mut low = expense("Low", Logic::Any, vec![contains("ADOBE")], 1.0);
        let mut high = expense("High", Logic::Any, vec![contains("ADOBE")], 1.0);
        low.priority = Some(1);
        high.priority = Some(100);
        let t = txn("ADOBE CREATIVE CLOUD", 54.99, 0.0);

        let rules = vec![low.clone(), high.clone()];
        assert_eq!(classify(&t, &rules).matched_rule.unwrap().category_name, "Low");

        low.priority = Some(100);
        high.priority = Some(1);
        let swapped = vec![low, high];
        assert_eq!(classify(&t, &swapped).matched_rule.unwrap().category_name, "Low");
    }

    #[test]
    fn test_ignore_rule_has_no_allocation() {
        let rules = sample_rules();
        let t = txn("TRIANGLE MC PAYMENT", 500.0, 0.0);
        let result = classify(&t, &rules);
        assert!(!result.ambiguous);
        assert!(result.is_ignored());
        assert!(result.allocation.is_none());
    }

    #[test]
    fn test_unmatched_is_ambiguous_not_an_error() {
        let rules = sample_rules();
        let t = txn("UNKNOWN MERCHANT", 123.45, 0.0);
        let result = classify(&t, &rules);
        assert!(result.ambiguous);
        assert!(result.allocation.is_none());
    }

    #[test]
    fn test_empty_ruleset_flags_everything() {
        let t = txn("ANYTHING", 1.0, 0.0);
        assert!(classify(&t, &[]).ambiguous);
    }

    #[test]
    fn test_classify_all_preserves_order_and_summarizes() {
        let rules = sample_rules();
        let txns = vec![
            txn("TIM HORTONS #123", 4.5, 0.0),
            txn("UNKNOWN", 9.0, 0.0),
            txn("TRIANGLE MC PAYMENT", 500.0, 0.0),
            txn("TIM HORTONS #9", 12.0, 0.0),
        ];
        let results = classify_all(&txns, &rules);
        assert_eq!(results.len(), 4);
        for (result, t) in results.iter().zip(&txns) {
            assert!(std::ptr::eq(result.transaction, t));
        }
        assert_eq!(
            summarize(&results),
            ClassifySummary {
                total: 4,
                classified: 1,
                ignored: 1,
                needs_review: 2,
            }
        );
    }

    #[test]
    fn test_classify_does_not_mutate_inputs() {
        let rules = vec![fuel_rule()];
        let before = rules.clone();
        let t = txn("7-ELEVEN", 20.0, 0.0);
        let snapshot = t.clone();
        let _ = classify(&t, &rules);
        assert_eq!(rules, before);
        assert_eq!(t, snapshot);
    }

    #[test]
    fn test_income_rule_books_credit() {
        let mut rule = expense(
            "Rebate",
            Logic::Any,
            vec![cond(Field::Description, Operator::Equals, json!("ACCT BAL REBATE"))],
            1.0,
        );
        rule.transaction_type = crate::models::TransactionType::Income;
        let rules = vec![rule];
        let t = txn("ACCT BAL REBATE", 0.0, 5.0);
        assert_eq!(classify(&t, &rules).allocation.unwrap().amount, 5.0);
    }
}
