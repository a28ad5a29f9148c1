use std::fmt;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::classifier::classify;
use crate::error::Result;
use crate::evaluator::evaluate;
use crate::models::{
    Column, Field, Logic, Operator, Rule, RulesDocument, Scope, Transaction, TransactionType,
};
use crate::schema::{self, ValidationIssue, ValidationReport};
use crate::store;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    Intent,
    ConditionsAndGroups,
    DualEntry,
    Validate,
    DryRun,
    Save,
    Saved,
    Abandoned,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::ConditionsAndGroups => "conditions",
            Self::DualEntry => "dual entry",
            Self::Validate => "validate",
            Self::DryRun => "dry run",
            Self::Save => "save",
            Self::Saved => "saved",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Saved | Self::Abandoned)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum WizardError {
    #[error("cannot {action} during the {actual} step")]
    WrongStep { action: &'static str, actual: Step },

    #[error("a group is still open; close it before finishing")]
    UnclosedGroup,

    #[error("no group is open")]
    NoOpenGroup,

    #[error("the rule has not been validated yet")]
    NotValidated,

    #[error("the rule has {0} validation error(s); amend it before continuing")]
    ValidationFailed(usize),

    #[error("cannot return to the {0} step")]
    NotAmendable(Step),
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// What the operator wants the rule to do. A missing `rule_id` defaults to a slug of the
/// category name.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub category_name: String,
    pub transaction_type: TransactionType,
    pub rule_id: Option<String>,
    pub priority: Option<i64>,
    pub scope: Option<Scope>,
    pub logic: Logic,
}

/// Read-only context from the target document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hints {
    pub categories: Vec<String>,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    pub step: Step,
    pub message: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleAllocation {
    pub index: usize,
    pub amount: f64,
}

/// Sample indices the candidate rule touches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DryRunReport {
    pub matches: Vec<usize>,
    pub false_positives: Vec<usize>,
    pub false_negatives: Vec<usize>,
    /// Matched, but an earlier rule claims the transaction first.
    pub shadowed: Vec<usize>,
    pub allocations: Vec<SampleAllocation>,
}

/// Run `rule` over a sample as if it were appended after `existing`. False positives and
/// negatives are only reported when `expected` is non-empty.
pub fn dry_run(
    rule: &Rule,
    existing: &[Rule],
    sample: &[Transaction],
    expected: &[usize],
) -> DryRunReport {
    let mut report = DryRunReport::default();
    for (idx, txn) in sample.iter().enumerate() {
        let outcome = evaluate(rule, txn);
        if outcome.matched {
            report.matches.push(idx);
            if classify(txn, existing).matched_rule.is_some() {
                report.shadowed.push(idx);
            } else if !rule.transaction_type.is_ignore() {
                report.allocations.push(SampleAllocation {
                    index: idx,
                    amount: outcome.amount,
                });
            }
        }
        if !expected.is_empty() {
            let wanted = expected.contains(&idx);
            if outcome.matched && !wanted {
                report.false_positives.push(idx);
            }
            if wanted && !outcome.matched {
                report.false_negatives.push(idx);
            }
        }
    }
    report
}

/// `Office Expenses - Retail/Hardware` -> `office-expenses-retail-hardware`
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Step-ordered rule builder. Holds no I/O; validation and evaluation are delegated to
/// `schema`, `evaluator` and `classifier`, persistence to the caller-supplied closure.
pub struct Wizard<'d> {
    document: &'d RulesDocument,
    step: Step,
    intent: Option<Intent>,
    rule_id: Option<String>,
    root: Vec<Value>,
    open_groups: Vec<(Logic, Vec<Value>)>,
    dual_entry: Option<Value>,
    report: Option<ValidationReport>,
    candidate: Option<Rule>,
    last_dry_run: Option<DryRunReport>,
}

impl<'d> Wizard<'d> {
    pub fn new(document: &'d RulesDocument) -> Self {
        Self {
            document,
            step: Step::Intent,
            intent: None,
            rule_id: None,
            root: Vec::new(),
            open_groups: Vec::new(),
            dual_entry: None,
            report: None,
            candidate: None,
            last_dry_run: None,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn rule_id(&self) -> Option<&str> {
        self.rule_id.as_deref()
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.intent.as_ref()
    }

    pub fn candidate(&self) -> Option<&Rule> {
        self.candidate.as_ref()
    }

    pub fn last_dry_run(&self) -> Option<&DryRunReport> {
        self.last_dry_run.as_ref()
    }

    /// Depth of the group currently being filled; 0 is the rule's top level.
    pub fn depth(&self) -> usize {
        self.open_groups.len()
    }

    pub fn hints(&self) -> Hints {
        Hints {
            categories: self
                .document
                .category_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            columns: self.document.columns().into_iter().cloned().collect(),
        }
    }

    fn require_step(&self, step: Step, action: &'static str) -> std::result::Result<(), WizardError> {
        if self.step == step {
            Ok(())
        } else {
            Err(WizardError::WrongStep {
                action,
                actual: self.step,
            })
        }
    }

    fn advance(&mut self, next: Step) {
        debug!(from = %self.step, to = %next, "wizard transition");
        self.step = next;
    }

    fn is_ignore(&self) -> bool {
        self.intent
            .as_ref()
            .is_some_and(|i| i.transaction_type.is_ignore())
    }

    // -- Intent ------------------------------------------------------------

    pub fn set_intent(&mut self, intent: Intent) -> std::result::Result<(), WizardError> {
        self.require_step(Step::Intent, "set the intent")?;
        self.rule_id = Some(match &intent.rule_id {
            Some(id) => id.clone(),
            None => slugify(&intent.category_name),
        });
        self.intent = Some(intent);
        self.advance(Step::ConditionsAndGroups);
        Ok(())
    }

    // -- Conditions and groups ---------------------------------------------

    fn current_level(&mut self) -> &mut Vec<Value> {
        match self.open_groups.last_mut() {
            Some((_, children)) => children,
            None => &mut self.root,
        }
    }

    pub fn add_condition(
        &mut self,
        field: Field,
        operator: Operator,
        value: Value,
    ) -> std::result::Result<(), WizardError> {
        self.require_step(Step::ConditionsAndGroups, "add a condition")?;
        let node = json!({
            "field": field.name(),
            "operator": operator.key(),
            "value": value,
        });
        self.current_level().push(node);
        debug!(depth = self.depth(), "condition added");
        Ok(())
    }

    pub fn open_group(&mut self, logic: Logic) -> std::result::Result<(), WizardError> {
        self.require_step(Step::ConditionsAndGroups, "open a group")?;
        self.open_groups.push((logic, Vec::new()));
        debug!(depth = self.depth(), "group opened");
        Ok(())
    }

    pub fn close_group(&mut self) -> std::result::Result<(), WizardError> {
        self.require_step(Step::ConditionsAndGroups, "close a group")?;
        let (logic, children) = self.open_groups.pop().ok_or(WizardError::NoOpenGroup)?;
        let node = json!({
            "group_logic": logic.key(),
            "rules": children,
        });
        self.current_level().push(node);
        debug!(depth = self.depth(), "group closed");
        Ok(())
    }

    /// IGNORE_TRANSACTION rules, and amended rules that kept their dual entry, go straight
    /// to validation.
    pub fn finish_conditions(&mut self) -> std::result::Result<(), WizardError> {
        self.require_step(Step::ConditionsAndGroups, "finish the conditions")?;
        if !self.open_groups.is_empty() {
            return Err(WizardError::UnclosedGroup);
        }
        if self.is_ignore() || self.dual_entry.is_some() {
            self.advance(Step::Validate);
        } else {
            self.advance(Step::DualEntry);
        }
        Ok(())
    }

    // -- Dual entry --------------------------------------------------------

    /// `apply_percentage` defaults to 1.0.
    pub fn set_dual_entry(
        &mut self,
        dr_column: Option<Column>,
        cr_column: Option<Column>,
        apply_percentage: Option<f64>,
    ) -> std::result::Result<(), WizardError> {
        self.require_step(Step::DualEntry, "set the dual entry")?;
        self.dual_entry = Some(json!({
            "DR_COLUMN": dr_column,
            "CR_COLUMN": cr_column,
            "APPLY_PERCENTAGE": apply_percentage.unwrap_or(1.0),
        }));
        self.advance(Step::Validate);
        Ok(())
    }

    // -- Validate ----------------------------------------------------------

    /// The rule as it would be persisted.
    pub fn assemble(&self) -> Value {
        let mut rule = Map::new();
        if let Some(intent) = &self.intent {
            rule.insert("category_name".into(), json!(intent.category_name));
            rule.insert("transaction_type".into(), json!(intent.transaction_type.key()));
            rule.insert("logic".into(), json!(intent.logic.key()));
        }
        rule.insert("rules".into(), Value::Array(self.root.clone()));
        if let (Some(de), false) = (&self.dual_entry, self.is_ignore()) {
            rule.insert("dual_entry".into(), de.clone());
        }
        if let Some(id) = &self.rule_id {
            rule.insert("rule_id".into(), json!(id));
        }
        if let Some(intent) = &self.intent {
            if let Some(priority) = intent.priority {
                rule.insert("priority".into(), json!(priority));
            }
            if let Some(scope) = intent.scope {
                rule.insert("scope".into(), json!(scope.key()));
            }
        }
        Value::Object(rule)
    }

    /// Check the assembled rule on its own and against the target document. A clean report
    /// advances to the dry run; errors keep the wizard here until the rule is amended.
    pub fn validate(&mut self, sample: Option<&[Transaction]>) -> Result<&ValidationReport> {
        self.require_step(Step::Validate, "validate")?;
        let candidate = self.assemble();
        let mut report = schema::validate_rule(&candidate)?.merge(self.conflicts(&candidate)?);

        let mut rule = None;
        if report.valid {
            let built = Rule::from_value(candidate)?;
            if let Some(sample) = sample {
                report = report.with_warnings(schema::breadth_warnings(&built, sample, ""));
            }
            rule = Some(built);
        }

        debug!(
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "wizard validation"
        );
        self.candidate = rule;
        if report.valid {
            self.advance(Step::DryRun);
        }
        Ok(&*self.report.insert(report))
    }

    /// Duplicate rule_id / priority errors from validating the document with the candidate
    /// appended, re-pathed onto the candidate.
    fn conflicts(&self, candidate: &Value) -> Result<ValidationReport> {
        let mut doc = serde_json::to_value(self.document)?;
        let position = self.document.rules.len();
        if let Some(rules) = doc.get_mut("_rules").and_then(Value::as_array_mut) {
            rules.push(candidate.clone());
        }
        let prefix = format!("_rules[{position}].");
        let full = schema::validate_document(&doc)?;
        let errors: Vec<ValidationIssue> = full
            .errors
            .into_iter()
            .filter(|e| e.message.starts_with("duplicate"))
            .filter_map(|e| {
                e.path.strip_prefix(&prefix).map(|p| ValidationIssue {
                    path: p.to_string(),
                    message: e.message.clone(),
                })
            })
            .collect();
        Ok(ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        })
    }

    /// Step back to fix the rule. Returning to conditions clears the tree; returning to dual
    /// entry clears it. Any earlier validation result is discarded.
    pub fn amend(&mut self, target: Step) -> std::result::Result<(), WizardError> {
        if !matches!(self.step, Step::Validate | Step::DryRun | Step::Save) {
            return Err(WizardError::WrongStep {
                action: "amend the rule",
                actual: self.step,
            });
        }
        match target {
            Step::Intent => {}
            Step::ConditionsAndGroups => {
                self.root.clear();
                self.open_groups.clear();
            }
            Step::DualEntry if !self.is_ignore() => self.dual_entry = None,
            other => return Err(WizardError::NotAmendable(other)),
        }
        self.report = None;
        self.candidate = None;
        self.last_dry_run = None;
        self.advance(target);
        Ok(())
    }

    // -- Dry run -----------------------------------------------------------

    /// Optional; may be repeated with different samples.
    pub fn dry_run(
        &mut self,
        sample: &[Transaction],
        expected: &[usize],
    ) -> std::result::Result<&DryRunReport, WizardError> {
        self.require_step(Step::DryRun, "dry run")?;
        let Some(rule) = &self.candidate else {
            return Err(WizardError::NotValidated);
        };
        let report = dry_run(rule, &self.document.rules, sample, expected);
        debug!(matches = report.matches.len(), shadowed = report.shadowed.len(), "wizard dry run");
        Ok(&*self.last_dry_run.insert(report))
    }

    /// Move from the dry run (done or skipped) to saving.
    pub fn proceed(&mut self) -> std::result::Result<(), WizardError> {
        match self.step {
            Step::DryRun => {
                self.advance(Step::Save);
                Ok(())
            }
            Step::Validate => match &self.report {
                Some(report) => Err(WizardError::ValidationFailed(report.errors.len())),
                None => Err(WizardError::NotValidated),
            },
            actual => Err(WizardError::WrongStep {
                action: "proceed",
                actual,
            }),
        }
    }

    // -- Save --------------------------------------------------------------

    /// Append the rule to a copy of the document and hand it to `persist`. Nothing is
    /// considered saved unless `persist` succeeds; on failure the wizard stays at Save.
    pub fn save<F>(&mut self, persist: F) -> Result<RulesDocument>
    where
        F: FnOnce(&RulesDocument) -> Result<()>,
    {
        self.require_step(Step::Save, "save")?;
        let rule = self.candidate.clone().ok_or(WizardError::NotValidated)?;
        let mut updated = self.document.clone();
        store::append_rules(&mut updated, vec![rule]);
        store::ensure_valid(&updated)?;
        persist(&updated)?;
        self.advance(Step::Saved);
        Ok(updated)
    }

    pub fn abandon(&mut self) -> std::result::Result<(), WizardError> {
        if self.step.is_terminal() {
            return Err(WizardError::WrongStep {
                action: "abandon",
                actual: self.step,
            });
        }
        self.advance(Step::Abandoned);
        Ok(())
    }

    // -- Prompts -----------------------------------------------------------

    pub fn prompt(&self) -> Prompt {
        let (message, options): (String, Vec<String>) = match self.step {
            Step::Intent => (
                "Describe the rule: category, transaction type, optional rule id, priority, scope and top-level logic".into(),
                TransactionType::ALL.iter().map(|t| t.key().to_string()).collect(),
            ),
            Step::ConditionsAndGroups => {
                let mut options = vec!["condition".to_string(), "group".to_string()];
                if self.open_groups.is_empty() {
                    options.push("finish".to_string());
                } else {
                    options.push("close".to_string());
                }
                options.push("abandon".to_string());
                (
                    format!(
                        "Add a condition or group ({} so far at depth {})",
                        self.current_len(),
                        self.depth()
                    ),
                    options,
                )
            }
            Step::DualEntry => (
                "Choose the DR and CR columns and the share of the amount to book (default 1.0)".into(),
                self.document.columns().iter().map(|c| c.to_string()).collect(),
            ),
            Step::Validate => match &self.report {
                Some(report) if !report.valid => (
                    format!("{} error(s) must be fixed; amend the rule", report.errors.len()),
                    vec!["intent".into(), "conditions".into(), "dual entry".into(), "abandon".into()],
                ),
                _ => ("Validate the rule against the ruleset".into(), vec!["validate".into()]),
            },
            Step::DryRun => (
                "Optionally test the rule against sample transactions".into(),
                vec!["dry run".into(), "save".into(), "amend".into(), "abandon".into()],
            ),
            Step::Save => (
                format!(
                    "Append rule '{}' to {}",
                    self.rule_id.as_deref().unwrap_or("?"),
                    self.document.name
                ),
                vec!["save".into(), "abandon".into()],
            ),
            Step::Saved => ("Rule saved".into(), Vec::new()),
            Step::Abandoned => ("Rule abandoned; nothing was written".into(), Vec::new()),
        };
        Prompt {
            step: self.step,
            message,
            options,
        }
    }

    fn current_len(&self) -> usize {
        match self.open_groups.last() {
            Some((_, children)) => children.len(),
            None => self.root.len(),
        }
    }
}
