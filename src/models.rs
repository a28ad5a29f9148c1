use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{RulebookError, Result};
use crate::schema::{self, ValidationReport};

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Canonical record produced by ingestion. Rules are evaluated against this shape only;
/// `raw_fields` rides along for diagnostics and is never read by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "Date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Debit")]
    pub debit: f64,
    #[serde(rename = "Credit")]
    pub credit: f64,
    #[serde(rename = "Balance", default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw_fields: Map<String, Value>,
}

impl Transaction {
    /// Reason this record breaks the canonical shape, if it does.
    pub fn shape_problem(&self) -> Option<String> {
        if self.description.trim().is_empty() {
            return Some("Description is empty".to_string());
        }
        for (name, value) in [("Debit", self.debit), ("Credit", self.credit)] {
            if !value.is_finite() || value < 0.0 {
                return Some(format!("{name} must be a non-negative amount, got {value}"));
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Description,
    Debit,
    Credit,
    Date,
    Balance,
}

/// Value domain of a transaction field; decides which operators apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Text,
    Amount,
    Date,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Description,
        Field::Debit,
        Field::Credit,
        Field::Date,
        Field::Balance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Description => "Description",
            Self::Debit => "Debit",
            Self::Credit => "Credit",
            Self::Date => "Date",
            Self::Balance => "Balance",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == raw)
    }

    pub fn domain(self) -> Domain {
        match self {
            Self::Description => Domain::Text,
            Self::Debit | Self::Credit | Self::Balance => Domain::Amount,
            Self::Date => Domain::Date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Contains,
    StartsWith,
    Equals,
    Between,
    LessThanOrEqualTo,
    Regex,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Operator::Contains,
        Operator::StartsWith,
        Operator::Equals,
        Operator::Between,
        Operator::LessThanOrEqualTo,
        Operator::Regex,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::StartsWith => "STARTS_WITH",
            Self::Equals => "EQUALS",
            Self::Between => "BETWEEN",
            Self::LessThanOrEqualTo => "LESS_THAN_OR_EQUAL_TO",
            Self::Regex => "REGEX",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Logic {
    #[serde(rename = "MUST_MATCH_ANY")]
    Any,
    #[serde(rename = "MUST_MATCH_ALL")]
    All,
}

impl Logic {
    pub fn key(self) -> &'static str {
        match self {
            Self::Any => "MUST_MATCH_ANY",
            Self::All => "MUST_MATCH_ALL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [Self::Any, Self::All].into_iter().find(|l| l.key() == raw)
    }
}

/// Which side of the transaction a matched rule books from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSource {
    Debit,
    Credit,
}

impl AmountSource {
    pub fn pick(self, txn: &Transaction) -> f64 {
        match self {
            Self::Debit => txn.debit,
            Self::Credit => txn.credit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Expense,
    Income,
    ManualCr,
    ManualDr,
    IncomeToOffsetExpense,
    IgnoreTransaction,
}

impl TransactionType {
    pub const ALL: [TransactionType; 6] = [
        TransactionType::Expense,
        TransactionType::Income,
        TransactionType::ManualCr,
        TransactionType::ManualDr,
        TransactionType::IncomeToOffsetExpense,
        TransactionType::IgnoreTransaction,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Expense => "EXPENSE",
            Self::Income => "INCOME",
            Self::ManualCr => "MANUAL_CR",
            Self::ManualDr => "MANUAL_DR",
            Self::IncomeToOffsetExpense => "INCOME_TO_OFFSET_EXPENSE",
            Self::IgnoreTransaction => "IGNORE_TRANSACTION",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == raw)
    }

    pub fn is_ignore(self) -> bool {
        self == Self::IgnoreTransaction
    }

    /// `None` for IGNORE_TRANSACTION, which never books an amount.
    pub fn amount_source(self) -> Option<AmountSource> {
        match self {
            Self::Expense | Self::ManualDr => Some(AmountSource::Debit),
            Self::Income | Self::ManualCr | Self::IncomeToOffsetExpense => {
                Some(AmountSource::Credit)
            }
            Self::IgnoreTransaction => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Bank,
    Global,
}

impl Scope {
    pub fn key(self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Global => "global",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [Self::Bank, Self::Global].into_iter().find(|s| s.key() == raw)
    }
}

// ---------------------------------------------------------------------------
// Condition tree
// ---------------------------------------------------------------------------

/// Compiled REGEX operand. Compared by source text.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(raw: &str) -> std::result::Result<Self, regex::Error> {
        Regex::new(raw).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Keys a ruleset carries that the validator does not interpret (hand-written notes and the
/// like). They are written back untouched on save and never take part in equality or evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extra(pub Map<String, Value>);

impl Extra {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Extra {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

/// A condition's value, already shaped for its field and operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Text(String),
    Amount(f64),
    Range(f64, f64),
    Date(NaiveDate),
    Pattern(Pattern),
}

impl Operand {
    fn to_value(&self) -> Value {
        match self {
            Self::Text(s) => json!(s),
            Self::Amount(n) => json!(n),
            Self::Range(min, max) => json!([min, max]),
            Self::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
            Self::Pattern(p) => json!(p.as_str()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "\"{s}\""),
            Self::Amount(n) => write!(f, "{n}"),
            Self::Range(min, max) => write!(f, "[{min}, {max}]"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Pattern(p) => write!(f, "/{}/", p.as_str()),
        }
    }
}

/// Leaf test. Only constructible through [`schema::parse_operand`], so the operand always
/// fits the field's domain and the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCondition", into = "RawCondition")]
pub struct Condition {
    pub field: Field,
    pub operator: Operator,
    pub operand: Operand,
    pub extra: Extra,
}

#[derive(Serialize, Deserialize)]
struct RawCondition {
    field: Field,
    operator: Operator,
    value: Value,
    #[serde(flatten)]
    extra: Extra,
}

impl Condition {
    pub fn new(field: Field, operator: Operator, value: &Value) -> std::result::Result<Self, String> {
        let operand = schema::parse_operand(field, operator, value)?;
        Ok(Self {
            field,
            operator,
            operand,
            extra: Extra::default(),
        })
    }
}

impl TryFrom<RawCondition> for Condition {
    type Error = String;

    fn try_from(raw: RawCondition) -> std::result::Result<Self, Self::Error> {
        let mut cond = Condition::new(raw.field, raw.operator, &raw.value)?;
        cond.extra = raw.extra;
        Ok(cond)
    }
}

impl From<Condition> for RawCondition {
    fn from(cond: Condition) -> Self {
        RawCondition {
            field: cond.field,
            operator: cond.operator,
            value: cond.operand.to_value(),
            extra: cond.extra,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field.name(), self.operator.key(), self.operand)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub group_logic: Logic,
    #[serde(rename = "rules")]
    pub children: Vec<Node>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Group(Group),
    Condition(Condition),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Condition(c) => write!(f, "{c}"),
            Self::Group(g) => write_tree(f, g.group_logic, &g.children),
        }
    }
}

fn write_tree(f: &mut fmt::Formatter<'_>, logic: Logic, children: &[Node]) -> fmt::Result {
    let tag = match logic {
        Logic::Any => "ANY",
        Logic::All => "ALL",
    };
    write!(f, "{tag}(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{child}")?;
    }
    write!(f, ")")
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub letter: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.letter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualEntry {
    #[serde(rename = "DR_COLUMN")]
    pub dr_column: Option<Column>,
    #[serde(rename = "CR_COLUMN")]
    pub cr_column: Option<Column>,
    #[serde(rename = "APPLY_PERCENTAGE")]
    pub apply_percentage: f64,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub category_name: String,
    pub transaction_type: TransactionType,
    pub logic: Logic,
    #[serde(rename = "rules")]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dual_entry: Option<DualEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Rule {
    /// Build a rule from a JSON object, reporting every structural problem by path.
    pub fn from_value(value: Value) -> Result<Self> {
        let report = schema::validate_rule(&value)?;
        if !report.valid {
            return Err(RulebookError::InvalidRules(report));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Human label: the rule_id when declared, else the position in the ruleset.
    pub fn label(&self, index: usize) -> String {
        match &self.rule_id {
            Some(id) => id.clone(),
            None => format!("#{index}"),
        }
    }

    /// One-line rendering of the condition tree.
    pub fn describe(&self) -> String {
        struct Tree<'a>(&'a Rule);
        impl fmt::Display for Tree<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_tree(f, self.0.logic, &self.0.children)
            }
        }
        Tree(self).to_string()
    }

    fn structural_eq(&self, other: &Self) -> bool {
        self.category_name == other.category_name
            && self.transaction_type == other.transaction_type
            && self.logic == other.logic
            && self.children == other.children
            && self.dual_entry == other.dual_entry
            && self.priority == other.priority
            && self.scope == other.scope
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        match (&self.rule_id, &other.rule_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.structural_eq(other),
            _ => false,
        }
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.rule_id {
            Some(id) => id.hash(state),
            None => {
                self.category_name.hash(state);
                self.transaction_type.hash(state);
                self.logic.hash(state);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Ruleset document
// ---------------------------------------------------------------------------

/// The persisted, ordered ruleset. Order of `rules` is authoritative for classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(rename = "_name")]
    pub name: String,
    #[serde(rename = "_version")]
    pub version: String,
    #[serde(rename = "_description", default)]
    pub description: String,
    #[serde(rename = "_scope", default)]
    pub scope: Vec<String>,
    #[serde(rename = "_rules")]
    pub rules: Vec<Rule>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl RulesDocument {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1".to_string(),
            description: String::new(),
            scope: Vec::new(),
            rules: Vec::new(),
            extra: Extra::default(),
        }
    }

    /// Validate the whole document once, then build it. Warnings are returned alongside.
    pub fn from_value(value: Value) -> Result<(Self, ValidationReport)> {
        let report = schema::validate_document(&value)?;
        if !report.valid {
            return Err(RulebookError::InvalidRules(report));
        }
        Ok((serde_json::from_value(value)?, report))
    }

    pub fn find(&self, key: &str) -> Option<(usize, &Rule)> {
        if let Some(found) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.rule_id.as_deref() == Some(key))
        {
            return Some(found);
        }
        let idx: usize = key.trim_start_matches('#').parse().ok()?;
        self.rules.get(idx).map(|r| (idx, r))
    }

    /// Distinct category names in file order.
    pub fn category_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !names.contains(&rule.category_name.as_str()) {
                names.push(&rule.category_name);
            }
        }
        names
    }

    /// Distinct allocation columns referenced by any rule, in file order.
    pub fn columns(&self) -> Vec<&Column> {
        let mut cols: Vec<&Column> = Vec::new();
        for de in self.rules.iter().filter_map(|r| r.dual_entry.as_ref()) {
            for col in [de.dr_column.as_ref(), de.cr_column.as_ref()].into_iter().flatten() {
                if !cols.contains(&col) {
                    cols.push(col);
                }
            }
        }
        cols
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn txn(description: &str, debit: f64, credit: f64) -> Transaction {
        Transaction {
            date: NaiveDate::from_ymd_opt(2025, 1, 15),
            description: description.to_string(),
            debit,
            credit,
            balance: None,
            source: "test_source".to_string(),
            raw_fields: Map::new(),
        }
    }

    pub fn cond(field: Field, operator: Operator, value: Value) -> Node {
        Node::Condition(Condition::new(field, operator, &value).unwrap())
    }

    pub fn contains(text: &str) -> Node {
        cond(Field::Description, Operator::Contains, json!(text))
    }

    pub fn group(logic: Logic, children: Vec<Node>) -> Node {
        Node::Group(Group {
            group_logic: logic,
            children,
            extra: Extra::default(),
        })
    }

    pub fn expense(category: &str, logic: Logic, children: Vec<Node>, pct: f64) -> Rule {
        Rule {
            category_name: category.to_string(),
            transaction_type: TransactionType::Expense,
            logic,
            children,
            dual_entry: Some(DualEntry {
                dr_column: Some(Column {
                    name: "Vehicle Expenses".to_string(),
                    letter: "L".to_string(),
                    extra: Extra::default(),
                }),
                cr_column: Some(Column {
                    name: "Shareholder Contribution (CR)".to_string(),
                    letter: "F".to_string(),
                    extra: Extra::default(),
                }),
                apply_percentage: pct,
                extra: Extra::default(),
            }),
            rule_id: None,
            priority: None,
            scope: None,
            extra: Extra::default(),
        }
    }

    /// The fuel rule: ANY(ESSO, 7-ELEVEN) AND Debit BETWEEN [20, 120].
    pub fn fuel_rule() -> Rule {
        expense(
            "Vehicle Expenses - Fuel",
            Logic::All,
            vec![
                group(Logic::Any, vec![contains("ESSO"), contains("7-ELEVEN")]),
                cond(Field::Debit, Operator::Between, json!([20.0, 120.0])),
            ],
            1.0,
        )
    }

    pub fn sample_document() -> Value {
        json!({
            "_name": "sample",
            "_version": "0.0.1",
            "_description": "Sample rules",
            "_scope": ["chequing_account"],
            "_rules": [
                {
                    "category_name": "Business Coffee",
                    "transaction_type": "EXPENSE",
                    "logic": "MUST_MATCH_ALL",
                    "rules": [
                        {"field": "Description", "operator": "CONTAINS", "value": "TIM HORTONS"},
                        {"field": "Debit", "operator": "LESS_THAN_OR_EQUAL_TO", "value": 6.0}
                    ],
                    "dual_entry": {
                        "DR_COLUMN": {"name": "Food Expenses from Business Meetings", "letter": "T"},
                        "CR_COLUMN": {"name": "Shareholder Contribution (CR)", "letter": "F"},
                        "APPLY_PERCENTAGE": 1.0
                    },
                    "rule_id": "coffee",
                    "priority": 10
                },
                {
                    "category_name": "Internal Transfer",
                    "transaction_type": "IGNORE_TRANSACTION",
                    "logic": "MUST_MATCH_ANY",
                    "rules": [
                        {"field": "Description", "operator": "STARTS_WITH", "value": "TRIANGLE MC PAYMENT"}
                    ],
                    "rule_id": "transfer"
                }
            ]
        })
    }
}
