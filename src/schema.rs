use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RulebookError, Result};
use crate::evaluator::test_condition;
use crate::models::{
    Condition, Domain, Field, Logic, Node, Operand, Operator, Pattern, Rule, Scope, Transaction,
    TransactionType,
};

// ---------------------------------------------------------------------------
// Operator table
// ---------------------------------------------------------------------------

/// Which operators each field accepts. Adding an operator means a row edit here plus one
/// evaluator arm.
pub const OPERATOR_TABLE: &[(Field, &[Operator])] = &[
    (
        Field::Description,
        &[
            Operator::Contains,
            Operator::StartsWith,
            Operator::Equals,
            Operator::Regex,
        ],
    ),
    (
        Field::Debit,
        &[Operator::Equals, Operator::Between, Operator::LessThanOrEqualTo],
    ),
    (
        Field::Credit,
        &[Operator::Equals, Operator::Between, Operator::LessThanOrEqualTo],
    ),
    (
        Field::Balance,
        &[Operator::Equals, Operator::Between, Operator::LessThanOrEqualTo],
    ),
    (Field::Date, &[Operator::Equals, Operator::StartsWith]),
];

/// Deepest group nesting a rule may use and still fit the JSON parser's depth limit once it
/// sits inside a ruleset document.
pub const MAX_GROUP_DEPTH: usize = 60;

pub fn allowed_operators(field: Field) -> &'static [Operator] {
    OPERATOR_TABLE
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, ops)| *ops)
        .unwrap_or(&[])
}

/// Shape a raw condition value for its field and operator. No coercion: `"50"` is not a number.
pub fn parse_operand(
    field: Field,
    operator: Operator,
    value: &Value,
) -> std::result::Result<Operand, String> {
    let allowed = allowed_operators(field);
    if !allowed.contains(&operator) {
        return Err(format!(
            "operator {} is not supported for field {} (allowed: {})",
            operator.key(),
            field.name(),
            allowed.iter().map(|o| o.key()).collect::<Vec<_>>().join(", ")
        ));
    }
    match (field.domain(), operator) {
        (Domain::Text, Operator::Regex) => {
            let raw = non_empty_text(value, operator)?;
            Pattern::new(raw)
                .map(Operand::Pattern)
                .map_err(|e| format!("invalid REGEX pattern {raw:?}: {e}"))
        }
        (Domain::Text, _) => non_empty_text(value, operator).map(|s| Operand::Text(s.to_string())),
        (Domain::Amount, Operator::Between) => range(value),
        (Domain::Amount, _) => amount(value, operator).map(Operand::Amount),
        (Domain::Date, Operator::Equals) => {
            let raw = non_empty_text(value, operator)?;
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Operand::Date)
                .map_err(|_| format!("EQUALS on Date expects YYYY-MM-DD, got {raw:?}"))
        }
        (Domain::Date, _) => non_empty_text(value, operator).map(|s| Operand::Text(s.to_string())),
    }
}

fn non_empty_text(value: &Value, operator: Operator) -> std::result::Result<&str, String> {
    match value {
        Value::String(s) if s.is_empty() => Err(format!("{} value must not be empty", operator.key())),
        Value::String(s) => Ok(s),
        other => Err(format!(
            "{} expects a string value, got {}",
            operator.key(),
            type_name(other)
        )),
    }
}

fn amount(value: &Value, operator: Operator) -> std::result::Result<f64, String> {
    match value.as_f64() {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(format!(
            "{} expects a number, got {}",
            operator.key(),
            type_name(value)
        )),
    }
}

fn range(value: &Value) -> std::result::Result<Operand, String> {
    let bounds = match value.as_array() {
        Some(items) if items.len() == 2 => items,
        _ => return Err("BETWEEN expects a [min, max] pair".to_string()),
    };
    let min = amount(&bounds[0], Operator::Between)?;
    let max = amount(&bounds[1], Operator::Between)?;
    if min > max {
        return Err(format!("BETWEEN range is inverted: min {min} > max {max}"));
    }
    Ok(Operand::Range(min, max))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn with_warnings(mut self, extra: Vec<ValidationIssue>) -> Self {
        self.warnings.extend(extra);
        self
    }

    /// Fold another report in; the result is valid only if both were.
    pub fn merge(mut self, other: ValidationReport) -> Self {
        for issue in other.errors {
            if !self.errors.contains(&issue) {
                self.errors.push(issue);
            }
        }
        for issue in other.warnings {
            if !self.warnings.contains(&issue) {
                self.warnings.push(issue);
            }
        }
        self.valid = self.errors.is_empty();
        self
    }
}

#[derive(Default)]
struct Collector {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Collector {
    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            path: display_path(path),
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            path: display_path(path),
            message: message.into(),
        });
    }

    fn finish(self) -> ValidationReport {
        ValidationReport {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.to_string()
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn index(path: &str, i: usize) -> String {
    format!("{path}[{i}]")
}

// ---------------------------------------------------------------------------
// Rule checks
// ---------------------------------------------------------------------------

const DOCUMENT_KEYS: &[&str] = &["_name", "_version", "_description", "_scope", "_rules"];
const RULE_KEYS: &[&str] = &[
    "category_name",
    "transaction_type",
    "logic",
    "rules",
    "dual_entry",
    "rule_id",
    "priority",
    "scope",
];
const GROUP_KEYS: &[&str] = &["group_logic", "rules"];
const CONDITION_KEYS: &[&str] = &["field", "operator", "value"];
const DUAL_ENTRY_KEYS: &[&str] = &["DR_COLUMN", "CR_COLUMN", "APPLY_PERCENTAGE"];
const COLUMN_KEYS: &[&str] = &["name", "letter"];

fn unknown_keys(obj: &Map<String, Value>, known: &[&str], path: &str, c: &mut Collector) {
    for key in obj.keys().filter(|k| !known.contains(&k.as_str())) {
        c.warning(&join(path, key), format!("unrecognized key '{key}' is kept but not interpreted"));
    }
}

fn required_text<'a>(obj: &'a Map<String, Value>, key: &str, path: &str, c: &mut Collector) -> Option<&'a str> {
    match obj.get(key) {
        None => {
            c.error(&join(path, key), format!("{key} is required"));
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            c.error(&join(path, key), format!("{key} must not be empty"));
            None
        }
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            c.error(
                &join(path, key),
                format!("{key} must be a string, got {}", type_name(other)),
            );
            None
        }
    }
}

fn required_choice<T>(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    parse: fn(&str) -> Option<T>,
    choices: &[&str],
    c: &mut Collector,
) -> Option<T> {
    let raw = required_text(obj, key, path, c)?;
    let parsed = parse(raw);
    if parsed.is_none() {
        c.error(
            &join(path, key),
            format!("unknown {key} '{raw}' (expected one of: {})", choices.join(", ")),
        );
    }
    parsed
}

fn check_rule(value: &Value, path: &str, c: &mut Collector) {
    let Some(obj) = value.as_object() else {
        c.error(path, format!("rule must be an object, got {}", type_name(value)));
        return;
    };
    unknown_keys(obj, RULE_KEYS, path, c);

    required_text(obj, "category_name", path, c);
    let type_keys: Vec<&str> = TransactionType::ALL.iter().map(|t| t.key()).collect();
    let txn_type = required_choice(obj, "transaction_type", path, TransactionType::parse, &type_keys, c);
    required_choice(obj, "logic", path, Logic::parse, &[Logic::Any.key(), Logic::All.key()], c);
    check_children(obj.get("rules"), &join(path, "rules"), 0, c);

    let dual_entry = obj.get("dual_entry").filter(|v| !v.is_null());
    let de_path = join(path, "dual_entry");
    match (txn_type, dual_entry) {
        (Some(t), None) if !t.is_ignore() => {
            c.error(&de_path, format!("dual_entry is required for {} rules", t.key()));
        }
        (Some(t), Some(de)) if t.is_ignore() => {
            c.warning(&de_path, "dual_entry is ignored for IGNORE_TRANSACTION rules");
            check_dual_entry(de, &de_path, false, c);
        }
        (_, Some(de)) => check_dual_entry(de, &de_path, true, c),
        _ => {}
    }

    match obj.get("rule_id") {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        Some(_) => c.error(&join(path, "rule_id"), "rule_id must be a non-empty string"),
    }
    match obj.get("priority") {
        None | Some(Value::Null) => {}
        Some(v) if v.is_i64() => {}
        Some(other) => c.error(
            &join(path, "priority"),
            format!("priority must be an integer, got {other}"),
        ),
    }
    match obj.get("scope") {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if Scope::parse(s).is_some() => {}
        Some(other) => c.error(
            &join(path, "scope"),
            format!("scope must be \"bank\" or \"global\", got {other}"),
        ),
    }
}

fn check_children(value: Option<&Value>, path: &str, depth: usize, c: &mut Collector) {
    match value {
        None => c.error(path, "condition list is required"),
        Some(Value::Array(items)) if items.is_empty() => {
            c.error(path, "condition list must not be empty")
        }
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                check_node(item, &index(path, i), depth, c);
            }
        }
        Some(other) => c.error(
            path,
            format!("condition list must be an array, got {}", type_name(other)),
        ),
    }
}

fn check_node(value: &Value, path: &str, depth: usize, c: &mut Collector) {
    let Some(obj) = value.as_object() else {
        c.error(
            path,
            format!("expected a condition or group object, got {}", type_name(value)),
        );
        return;
    };

    if obj.contains_key("group_logic") {
        if depth >= MAX_GROUP_DEPTH {
            c.error(
                path,
                format!("groups nest deeper than {MAX_GROUP_DEPTH} levels; the saved file could not be read back"),
            );
            return;
        }
        unknown_keys(obj, GROUP_KEYS, path, c);
        required_choice(obj, "group_logic", path, Logic::parse, &[Logic::Any.key(), Logic::All.key()], c);
        check_children(obj.get("rules"), &join(path, "rules"), depth + 1, c);
        return;
    }

    unknown_keys(obj, CONDITION_KEYS, path, c);
    let field_keys: Vec<&str> = Field::ALL.iter().map(|f| f.name()).collect();
    let op_keys: Vec<&str> = Operator::ALL.iter().map(|o| o.key()).collect();
    let field = required_choice(obj, "field", path, Field::parse, &field_keys, c);
    let operator = required_choice(obj, "operator", path, Operator::parse, &op_keys, c);
    let value = obj.get("value");
    if value.is_none() {
        c.error(&join(path, "value"), "value is required");
    }
    let (Some(field), Some(operator), Some(value)) = (field, operator, value) else {
        return;
    };

    if !allowed_operators(field).contains(&operator) {
        if let Err(message) = parse_operand(field, operator, value) {
            c.error(&join(path, "operator"), message);
        }
        return;
    }
    match parse_operand(field, operator, value) {
        Err(message) => c.error(&join(path, "value"), message),
        Ok(Operand::Amount(n)) if n < 0.0 && field != Field::Balance => c.warning(
            &join(path, "value"),
            format!("{} is never negative; this condition can only match a negative {n}", field.name()),
        ),
        Ok(Operand::Range(_, max)) if max < 0.0 && field != Field::Balance => c.warning(
            &join(path, "value"),
            format!("{} is never negative; this range can never match", field.name()),
        ),
        Ok(_) => {}
    }
}

fn check_dual_entry(value: &Value, path: &str, active: bool, c: &mut Collector) {
    let Some(obj) = value.as_object() else {
        c.error(path, format!("dual_entry must be an object, got {}", type_name(value)));
        return;
    };
    unknown_keys(obj, DUAL_ENTRY_KEYS, path, c);

    let mut columns = 0;
    for key in ["DR_COLUMN", "CR_COLUMN"] {
        let col_path = join(path, key);
        match obj.get(key) {
            None => c.error(&col_path, format!("{key} is required (use null for no column)")),
            Some(Value::Null) => {}
            Some(col) => {
                columns += 1;
                check_column(col, &col_path, c);
            }
        }
    }

    let pct_path = join(path, "APPLY_PERCENTAGE");
    match obj.get("APPLY_PERCENTAGE") {
        None => c.error(&pct_path, "APPLY_PERCENTAGE is required"),
        Some(v) => match v.as_f64() {
            Some(n) if !n.is_finite() => c.error(&pct_path, "APPLY_PERCENTAGE must be finite"),
            Some(n) if n == 0.0 && active => {
                c.warning(&pct_path, "APPLY_PERCENTAGE is 0; matches will book nothing")
            }
            Some(_) => {}
            None => c.error(
                &pct_path,
                format!("APPLY_PERCENTAGE must be a number, got {}", type_name(v)),
            ),
        },
    }

    if columns == 0 && active && obj.contains_key("DR_COLUMN") && obj.contains_key("CR_COLUMN") {
        c.warning(path, "neither DR_COLUMN nor CR_COLUMN is set; matched amounts will not be booked");
    }
}

fn check_column(value: &Value, path: &str, c: &mut Collector) {
    let Some(obj) = value.as_object() else {
        c.error(
            path,
            format!("column must be {{name, letter}} or null, got {}", type_name(value)),
        );
        return;
    };
    unknown_keys(obj, COLUMN_KEYS, path, c);
    required_text(obj, "name", path, c);
    if let Some(letter) = required_text(obj, "letter", path, c) {
        let well_formed = (1..=3).contains(&letter.len()) && letter.chars().all(|ch| ch.is_ascii_uppercase());
        if !well_formed {
            c.error(
                &join(path, "letter"),
                format!("column letter must be 1-3 uppercase letters, got '{letter}'"),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Check a single rule object. Only a non-object argument is an error; every problem with the
/// rule itself lands in the report.
pub fn validate_rule(rule: &Value) -> Result<ValidationReport> {
    if !rule.is_object() {
        return Err(RulebookError::NotAnObject("rule"));
    }
    let mut c = Collector::default();
    check_rule(rule, "", &mut c);
    Ok(c.finish())
}

/// Check a whole ruleset document, including duplicate rule_id / priority conflicts.
pub fn validate_document(document: &Value) -> Result<ValidationReport> {
    let obj = document
        .as_object()
        .ok_or(RulebookError::NotAnObject("ruleset document"))?;
    let mut c = Collector::default();
    unknown_keys(obj, DOCUMENT_KEYS, "", &mut c);

    required_text(obj, "_name", "", &mut c);
    match obj.get("_version") {
        None => c.error("_version", "_version is required"),
        Some(Value::String(_)) => {}
        Some(other) => c.error("_version", format!("_version must be a string, got {}", type_name(other))),
    }
    match obj.get("_description") {
        None | Some(Value::String(_)) => {}
        Some(other) => c.error(
            "_description",
            format!("_description must be a string, got {}", type_name(other)),
        ),
    }
    match obj.get("_scope") {
        None => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    c.error(&index("_scope", i), "_scope entries must be strings");
                }
            }
        }
        Some(other) => c.error("_scope", format!("_scope must be an array, got {}", type_name(other))),
    }

    let rules = match obj.get("_rules") {
        None => {
            c.error("_rules", "_rules is required");
            return Ok(c.finish());
        }
        Some(Value::Array(rules)) => rules,
        Some(other) => {
            c.error("_rules", format!("_rules must be an array, got {}", type_name(other)));
            return Ok(c.finish());
        }
    };
    if rules.is_empty() {
        c.warning("_rules", "ruleset contains no rules; every transaction will need review");
    }

    let mut ids: HashMap<&str, usize> = HashMap::new();
    let mut priorities: HashMap<i64, usize> = HashMap::new();
    for (i, rule) in rules.iter().enumerate() {
        let path = index("_rules", i);
        check_rule(rule, &path, &mut c);

        if let Some(id) = rule.get("rule_id").and_then(Value::as_str) {
            if let Some(first) = ids.get(id) {
                c.error(
                    &join(&path, "rule_id"),
                    format!("duplicate rule_id '{id}' (first declared at _rules[{first}])"),
                );
            } else {
                ids.insert(id, i);
            }
        }
        if let Some(priority) = rule.get("priority").and_then(Value::as_i64) {
            if let Some(first) = priorities.get(&priority) {
                c.error(
                    &join(&path, "priority"),
                    format!("duplicate priority {priority} (first declared at _rules[{first}])"),
                );
            } else {
                priorities.insert(priority, i);
            }
        }
    }
    Ok(c.finish())
}

/// Warn about conditions that match more than half of a sample set.
pub fn breadth_warnings(rule: &Rule, sample: &[Transaction], prefix: &str) -> Vec<ValidationIssue> {
    let mut conditions = Vec::new();
    walk_with_paths(&rule.children, &join(prefix, "rules"), &mut conditions);

    let mut warnings = Vec::new();
    if sample.is_empty() {
        return warnings;
    }
    for (path, cond) in conditions {
        let hits = sample.iter().filter(|t| test_condition(cond, t)).count();
        if hits * 2 > sample.len() {
            warnings.push(ValidationIssue {
                path,
                message: format!(
                    "condition '{cond}' matches {hits} of {} sample transactions",
                    sample.len()
                ),
            });
        }
    }
    warnings
}

fn walk_with_paths<'a>(nodes: &'a [Node], path: &str, out: &mut Vec<(String, &'a Condition)>) {
    for (i, node) in nodes.iter().enumerate() {
        let here = index(path, i);
        match node {
            Node::Condition(cond) => out.push((here, cond)),
            Node::Group(group) => walk_with_paths(&group.children, &join(&here, "rules"), out),
        }
    }
}
