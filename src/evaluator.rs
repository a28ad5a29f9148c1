use serde::Serialize;

use crate::models::{Condition, Field, Logic, Node, Operand, Operator, Rule, Transaction};

/// Outcome of one rule against one transaction. `amount` is 0 when unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub matched: bool,
    pub amount: f64,
}

/// Evaluate `rule` against `txn`. Pure: the same inputs always give the same outcome.
pub fn evaluate(rule: &Rule, txn: &Transaction) -> MatchOutcome {
    if !matches(rule, txn) {
        return MatchOutcome {
            matched: false,
            amount: 0.0,
        };
    }
    MatchOutcome {
        matched: true,
        amount: allocation_amount(rule, txn),
    }
}

/// Whether the rule's condition tree holds for `txn`, ignoring allocation.
pub fn matches(rule: &Rule, txn: &Transaction) -> bool {
    evaluate_nodes(rule.logic, &rule.children, txn)
}

/// `relevant_amount * apply_percentage`; 0 for IGNORE_TRANSACTION.
pub fn allocation_amount(rule: &Rule, txn: &Transaction) -> f64 {
    match (rule.transaction_type.amount_source(), &rule.dual_entry) {
        (Some(source), Some(dual_entry)) => source.pick(txn) * dual_entry.apply_percentage,
        _ => 0.0,
    }
}

fn evaluate_nodes(logic: Logic, nodes: &[Node], txn: &Transaction) -> bool {
    // an empty tree never matches; validation rejects it before we get here
    if nodes.is_empty() {
        return false;
    }
    match logic {
        Logic::Any => nodes.iter().any(|n| evaluate_node(n, txn)),
        Logic::All => nodes.iter().all(|n| evaluate_node(n, txn)),
    }
}

fn evaluate_node(node: &Node, txn: &Transaction) -> bool {
    match node {
        Node::Condition(cond) => test_condition(cond, txn),
        Node::Group(group) => evaluate_nodes(group.group_logic, &group.children, txn),
    }
}

/// Apply one leaf condition. An absent Date or Balance never matches.
pub fn test_condition(cond: &Condition, txn: &Transaction) -> bool {
    match cond.field {
        Field::Description => test_text(cond, &txn.description),
        Field::Debit => test_amount(cond, txn.debit),
        Field::Credit => test_amount(cond, txn.credit),
        Field::Balance => txn.balance.is_some_and(|b| test_amount(cond, b)),
        Field::Date => txn.date.is_some_and(|d| match (&cond.operator, &cond.operand) {
            (Operator::Equals, Operand::Date(expected)) => d == *expected,
            (Operator::StartsWith, Operand::Text(prefix)) => {
                d.format("%Y-%m-%d").to_string().starts_with(prefix.as_str())
            }
            _ => unvalidated(cond),
        }),
    }
}

fn test_text(cond: &Condition, text: &str) -> bool {
    match (&cond.operator, &cond.operand) {
        (Operator::Contains, Operand::Text(needle)) => {
            text.to_lowercase().contains(&needle.to_lowercase())
        }
        (Operator::StartsWith, Operand::Text(prefix)) => {
            text.to_lowercase().starts_with(&prefix.to_lowercase())
        }
        (Operator::Equals, Operand::Text(expected)) => {
            text.to_lowercase() == expected.to_lowercase()
        }
        (Operator::Regex, Operand::Pattern(pattern)) => pattern.is_match(text),
        _ => unvalidated(cond),
    }
}

fn test_amount(cond: &Condition, value: f64) -> bool {
    match (&cond.operator, &cond.operand) {
        (Operator::Equals, Operand::Amount(expected)) => value == *expected,
        (Operator::Between, Operand::Range(min, max)) => *min <= value && value <= *max,
        (Operator::LessThanOrEqualTo, Operand::Amount(limit)) => value <= *limit,
        _ => unvalidated(cond),
    }
}

// Conditions are only built through the schema's operand parser, so this is a loader defect.
fn unvalidated(cond: &Condition) -> bool {
    panic!("condition '{cond}' reached evaluation without passing validation")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{Group, TransactionType};

    fn single(node: Node) -> Rule {
        expense("Test", Logic::Any, vec![node], 1.0)
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let rule = single(contains("tim hortons"));
        assert!(matches(&rule, &txn("Payment to TIM HORTONS", 4.0, 0.0)));
        assert!(!matches(&rule, &txn("Payment to STARBUCKS", 4.0, 0.0)));
    }

    #[test]
    fn test_starts_with_operator() {
        let rule = single(cond(Field::Description, Operator::StartsWith, json!("FIDO")));
        assert!(matches(&rule, &txn("fido Mobile Bill", 75.0, 0.0)));
        assert!(!matches(&rule, &txn("Bell Canada FIDO", 75.0, 0.0)));
    }

    #[test]
    fn test_equals_text_and_amount() {
        let text = single(cond(Field::Description, Operator::Equals, json!("monthly account fee")));
        assert!(matches(&text, &txn("MONTHLY ACCOUNT FEE", 15.0, 0.0)));
        assert!(!matches(&text, &txn("MONTHLY ACCOUNT FEE REBATE", 15.0, 0.0)));

        let amount = single(cond(Field::Debit, Operator::Equals, json!(15.0)));
        assert!(matches(&amount, &txn("FEE", 15.0, 0.0)));
        assert!(!matches(&amount, &txn("FEE", 15.01, 0.0)));
    }

    #[test]
    fn test_between_is_inclusive() {
        let rule = single(cond(Field::Debit, Operator::Between, json!([20.0, 120.0])));
        assert!(matches(&rule, &txn("X", 20.0, 0.0)));
        assert!(matches(&rule, &txn("X", 120.0, 0.0)));
        assert!(!matches(&rule, &txn("X", 19.99, 0.0)));
        assert!(!matches(&rule, &txn("X", 120.01, 0.0)));
    }

    #[test]
    fn test_less_than_or_equal_to() {
        let rule = single(cond(Field::Debit, Operator::LessThanOrEqualTo, json!(6.0)));
        assert!(matches(&rule, &txn("X", 5.99, 0.0)));
        assert!(matches(&rule, &txn("X", 6.0, 0.0)));
        assert!(!matches(&rule, &txn("X", 7.0, 0.0)));
    }

    #[test]
    fn test_regex_searches_without_anchoring() {
        let rule = single(cond(Field::Description, Operator::Regex, json!(r"AWS\s+\d+")));
        assert!(matches(&rule, &txn("Payment AWS 12345 ref", 10.0, 0.0)));
        assert!(!matches(&rule, &txn("AWS services", 10.0, 0.0)));
    }

    #[test]
    fn test_debit_and_credit_are_independent() {
        let rule = expense(
            "Both",
            Logic::All,
            vec![
                cond(Field::Debit, Operator::LessThanOrEqualTo, json!(0.0)),
                cond(Field::Credit, Operator::Between, json!([1.0, 10.0])),
            ],
            1.0,
        );
        assert!(matches(&rule, &txn("REBATE", 0.0, 5.0)));
        assert!(!matches(&rule, &txn("REBATE", 5.0, 5.0)));
    }

    #[test]
    fn test_absent_balance_and_date_never_match() {
        let rule = single(cond(Field::Balance, Operator::LessThanOrEqualTo, json!(0.0)));
        let mut t = txn("X", 1.0, 0.0);
        assert!(!matches(&rule, &t));
        t.balance = Some(-3.0);
        assert!(matches(&rule, &t));

        let by_date = single(cond(Field::Date, Operator::StartsWith, json!("2025-01")));
        assert!(matches(&by_date, &t));
        t.date = None;
        assert!(!matches(&by_date, &t));
    }

    #[test]
    fn test_date_equals() {
        let rule = single(cond(Field::Date, Operator::Equals, json!("2025-01-15")));
        assert!(matches(&rule, &txn("X", 1.0, 0.0)));
    }

    #[test]
    fn test_all_with_exclusive_conditions_never_matches() {
        let exclusive = vec![
            cond(Field::Debit, Operator::LessThanOrEqualTo, json!(10.0)),
            cond(Field::Debit, Operator::Between, json!([50.0, 100.0])),
        ];
        let all = expense("All", Logic::All, exclusive.clone(), 1.0);
        let any = expense("Any", Logic::Any, exclusive, 1.0);
        for debit in [0.0, 5.0, 10.0, 50.0, 75.0, 100.0, 500.0] {
            let t = txn("X", debit, 0.0);
            assert!(!matches(&all, &t), "ALL matched debit {debit}");
            assert_eq!(matches(&any, &t), debit <= 10.0 || (50.0..=100.0).contains(&debit));
        }
    }

    #[test]
    fn test_nested_groups() {
        let rule = expense(
            "Nested",
            Logic::Any,
            vec![group(
                Logic::All,
                vec![
                    contains("ESSO"),
                    group(
                        Logic::Any,
                        vec![
                            cond(Field::Debit, Operator::Equals, json!(1.0)),
                            cond(Field::Debit, Operator::Equals, json!(2.0)),
                        ],
                    ),
                ],
            )],
            1.0,
        );
        assert!(matches(&rule, &txn("ESSO", 2.0, 0.0)));
        assert!(!matches(&rule, &txn("ESSO", 3.0, 0.0)));
        assert!(!matches(&rule, &txn("SHELL", 1.0, 0.0)));
    }

    #[test]
    fn test_empty_group_never_matches() {
        let rule = expense(
            "Empty",
            Logic::Any,
            vec![Node::Group(Group {
                group_logic: Logic::All,
                children: vec![],
                extra: Default::default(),
            })],
            1.0,
        );
        assert!(!matches(&rule, &txn("ANYTHING", 1.0, 0.0)));
    }

    #[test]
    fn test_dual_entry_math() {
        let rule = expense("Partial", Logic::Any, vec![contains("PHONE")], 0.66);
        let outcome = evaluate(&rule, &txn("PHONE BILL", 100.0, 0.0));
        assert!(outcome.matched);
        assert!((outcome.amount - 66.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_percentage_rebates() {
        let mut rule = expense("Rebate", Logic::Any, vec![contains("REBATE")], -1.0);
        rule.transaction_type = TransactionType::Income;
        let outcome = evaluate(&rule, &txn("ACCT BAL REBATE", 0.0, 5.0));
        assert_eq!(outcome.amount, -5.0);
    }

    #[test]
    fn test_amount_source_follows_transaction_type() {
        let mut rule = expense("Side", Logic::Any, vec![contains("X")], 1.0);
        let t = txn("X", 10.0, 3.0);
        for (kind, expected) in [
            (TransactionType::Expense, 10.0),
            (TransactionType::ManualDr, 10.0),
            (TransactionType::Income, 3.0),
            (TransactionType::ManualCr, 3.0),
            (TransactionType::IncomeToOffsetExpense, 3.0),
            (TransactionType::IgnoreTransaction, 0.0),
        ] {
            rule.transaction_type = kind;
            assert_eq!(evaluate(&rule, &t).amount, expected, "{kind:?}");
        }
    }

    #[test]
    fn test_unmatched_outcome_has_zero_amount() {
        let outcome = evaluate(&fuel_rule(), &txn("ESSO STATION", 500.0, 0.0));
        assert_eq!(
            outcome,
            MatchOutcome {
                matched: false,
                amount: 0.0
            }
        );
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let rule = fuel_rule();
        let t = txn("ESSO STATION", 45.0, 0.0);
        let first = evaluate(&rule, &t);
        for _ in 0..100 {
            assert_eq!(evaluate(&rule, &t), first);
        }
        assert!(first.matched);
        assert_eq!(first.amount, 45.0);
    }
}
