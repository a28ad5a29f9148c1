use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};
use dialoguer::{Confirm, Input, Select};
use serde_json::{json, Value};

use crate::error::{Result, RulebookError};
use crate::models::{Column, Domain, Field, Logic, Operator, Scope, Transaction, TransactionType};
use crate::schema::allowed_operators;
use crate::store::{load_document, load_transactions, save_document};
use crate::wizard::{slugify, Hints, Intent, Step, Wizard, WizardError};

use super::dry_run::print_report as print_dry_run;
use super::validate::print_report;

// ---------------------------------------------------------------------------
// Prompting
// ---------------------------------------------------------------------------

pub trait Prompter {
    fn text(&mut self, prompt: &str, default: Option<&str>) -> Result<String>;
    /// Index into `options`.
    fn choose(&mut self, prompt: &str, options: &[String], default: usize) -> Result<usize>;
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool>;
}

/// Interactive prompts on a terminal.
pub struct TerminalPrompter;

fn prompt_error(e: dialoguer::Error) -> RulebookError {
    RulebookError::Prompt(e.to_string())
}

impl Prompter for TerminalPrompter {
    fn text(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::new().with_prompt(prompt).allow_empty(true);
        if let Some(d) = default {
            input = input.default(d.to_string());
        }
        input.interact_text().map_err(prompt_error)
    }

    fn choose(&mut self, prompt: &str, options: &[String], default: usize) -> Result<usize> {
        Select::new()
            .with_prompt(prompt)
            .items(options)
            .default(default)
            .interact()
            .map_err(prompt_error)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(prompt_error)
    }
}

/// One answer per line, for piped input. Choices accept a 1-based number or the option text.
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_line(&mut self) -> Result<String> {
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(RulebookError::Prompt(
                "input ended before the rule was finished".to_string(),
            ));
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn text(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        match default {
            Some(d) => write!(self.output, "{prompt} [{d}]: ")?,
            None => write!(self.output, "{prompt}: ")?,
        }
        let line = self.read_line()?;
        match default {
            Some(d) if line.is_empty() => Ok(d.to_string()),
            _ => Ok(line),
        }
    }

    fn choose(&mut self, prompt: &str, options: &[String], default: usize) -> Result<usize> {
        for (i, option) in options.iter().enumerate() {
            writeln!(self.output, "  {}) {option}", i + 1)?;
        }
        loop {
            write!(self.output, "{prompt} [{}]: ", default + 1)?;
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(default);
            }
            if let Ok(n) = line.parse::<usize>() {
                if (1..=options.len()).contains(&n) {
                    return Ok(n - 1);
                }
            }
            if let Some(i) = options.iter().position(|o| o.eq_ignore_ascii_case(&line)) {
                return Ok(i);
            }
            writeln!(self.output, "Choose 1-{} or type an option.", options.len())?;
        }
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        loop {
            write!(self.output, "{prompt} [{hint}]: ")?;
            match self.read_line()?.to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Answer y or n.")?,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub fn run(rules_path: &Path, show_hints: bool, sample: Option<&Path>) -> Result<()> {
    let sample = match sample {
        Some(path) => Some(load_transactions(path)?),
        None => None,
    };
    if io::stdin().is_terminal() {
        author(rules_path, show_hints, sample.as_deref(), &mut TerminalPrompter)?;
    } else {
        let stdin = io::stdin();
        let mut prompter = LinePrompter::new(stdin.lock(), io::stdout());
        author(rules_path, show_hints, sample.as_deref(), &mut prompter)?;
    }
    Ok(())
}

/// Walk the wizard to a terminal step. The ruleset file is only written at Save.
pub fn author(
    rules_path: &Path,
    show_hints: bool,
    sample: Option<&[Transaction]>,
    prompter: &mut dyn Prompter,
) -> Result<Step> {
    let doc = load_document(rules_path)?;
    let mut wizard = Wizard::new(&doc);
    if show_hints {
        print_hints(&wizard.hints());
    }

    loop {
        match wizard.step() {
            Step::Intent => ask_intent(&mut wizard, prompter)?,
            Step::ConditionsAndGroups => ask_conditions(&mut wizard, prompter)?,
            Step::DualEntry => ask_dual_entry(&mut wizard, prompter)?,
            Step::Validate => {
                let valid = {
                    let report = wizard.validate(sample)?;
                    print_report(report);
                    report.valid
                };
                if valid {
                    println!("{}", "Rule is valid.".green());
                } else {
                    ask_amend(&mut wizard, prompter)?;
                }
            }
            Step::DryRun => {
                let prompt = wizard.prompt();
                let choice = prompter.choose(&prompt.message, &prompt.options, 0)?;
                match prompt.options[choice].as_str() {
                    "dry run" => match sample {
                        Some(sample) => {
                            let raw = prompter.text("Expected matches (e.g. 0,2; blank for none)", None)?;
                            let expected = parse_indices(&raw);
                            wizard.dry_run(sample, &expected)?;
                            if let (Some(rule), Some(report)) = (wizard.candidate(), wizard.last_dry_run()) {
                                print_dry_run(doc.rules.len(), rule, report);
                            }
                        }
                        None => println!("{}", "No sample loaded; pass --sample FILE.".yellow()),
                    },
                    "save" => wizard.proceed()?,
                    "amend" => ask_amend(&mut wizard, prompter)?,
                    _ => wizard.abandon()?,
                }
            }
            Step::Save => {
                let prompt = wizard.prompt();
                if prompter.confirm(&prompt.message, true)? {
                    wizard.save(|updated| save_document(rules_path, updated))?;
                    println!(
                        "{}",
                        format!(
                            "Saved rule '{}' to {}",
                            wizard.rule_id().unwrap_or_default(),
                            rules_path.display()
                        )
                        .green()
                    );
                } else {
                    wizard.abandon()?;
                }
            }
            Step::Saved => break,
            Step::Abandoned => {
                println!("{}", wizard.prompt().message.yellow());
                break;
            }
        }
    }
    Ok(wizard.step())
}

fn print_hints(hints: &Hints) {
    if !hints.categories.is_empty() {
        println!("Existing categories: {}", hints.categories.join(", "));
    }
    if !hints.columns.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Column", "Letter"]);
        for column in &hints.columns {
            table.add_row(vec![Cell::new(&column.name), Cell::new(&column.letter)]);
        }
        println!("Columns in use\n{table}");
    }
}

/// Typed at the first question of a step to drop the rule without writing anything.
const ABANDON: &str = "abandon";

fn wants_abandon(answer: &str) -> bool {
    answer.eq_ignore_ascii_case(ABANDON)
}

fn keys<T: Copy>(items: &[T], key: fn(T) -> &'static str) -> Vec<String> {
    items.iter().map(|&i| key(i).to_string()).collect()
}

fn ask_intent(wizard: &mut Wizard<'_>, p: &mut dyn Prompter) -> Result<()> {
    let previous = wizard.intent().map(|i| i.category_name.clone());
    let category_name = p.text(&format!("Category name ('{ABANDON}' to cancel)"), previous.as_deref())?;
    if wants_abandon(&category_name) {
        wizard.abandon()?;
        return Ok(());
    }

    let types = keys(&TransactionType::ALL, TransactionType::key);
    let transaction_type = TransactionType::ALL[p.choose("Transaction type", &types, 0)?];

    let rule_id = p.text("Rule id", Some(&slugify(&category_name)))?;
    let priority = loop {
        let raw = p.text("Priority (blank for none)", None)?;
        if raw.is_empty() {
            break None;
        }
        match raw.parse::<i64>() {
            Ok(n) => break Some(n),
            Err(_) => println!("{}", "Priority must be a whole number.".red()),
        }
    };

    let scopes = vec!["none".to_string(), Scope::Bank.key().to_string(), Scope::Global.key().to_string()];
    let scope = match p.choose("Scope", &scopes, 0)? {
        1 => Some(Scope::Bank),
        2 => Some(Scope::Global),
        _ => None,
    };
    let logic = ask_logic("Top-level logic", p)?;

    wizard.set_intent(Intent {
        category_name,
        transaction_type,
        rule_id: Some(rule_id).filter(|id| !id.is_empty()),
        priority,
        scope,
        logic,
    })?;
    println!("Rule id: {}", wizard.rule_id().unwrap_or_default());
    Ok(())
}

fn ask_logic(prompt: &str, p: &mut dyn Prompter) -> Result<Logic> {
    let options = vec![Logic::All.key().to_string(), Logic::Any.key().to_string()];
    Ok(match p.choose(prompt, &options, 0)? {
        0 => Logic::All,
        _ => Logic::Any,
    })
}

fn ask_conditions(wizard: &mut Wizard<'_>, p: &mut dyn Prompter) -> Result<()> {
    let prompt = wizard.prompt();
    let choice = p.choose(&prompt.message, &prompt.options, 0)?;
    match prompt.options[choice].as_str() {
        "condition" => {
            let fields = keys(&Field::ALL, Field::name);
            let field = Field::ALL[p.choose("Field", &fields, 0)?];
            let operators = allowed_operators(field);
            let op_names = keys(operators, Operator::key);
            let operator = operators[p.choose("Operator", &op_names, 0)?];
            let raw = p.text(&format!("Value ({})", value_hint(field, operator)), None)?;
            wizard.add_condition(field, operator, parse_value(field, operator, &raw))?;
        }
        "group" => {
            let logic = ask_logic("Group logic", p)?;
            wizard.open_group(logic)?;
        }
        "close" => wizard.close_group()?,
        "finish" => wizard.finish_conditions()?,
        _ => wizard.abandon()?,
    }
    Ok(())
}

fn value_hint(field: Field, operator: Operator) -> &'static str {
    match (field.domain(), operator) {
        (Domain::Amount, Operator::Between) => "min,max",
        (Domain::Amount, _) => "amount",
        (Domain::Date, Operator::Equals) => "YYYY-MM-DD",
        (Domain::Date, _) => "date prefix, e.g. 2025-01",
        (Domain::Text, Operator::Regex) => "pattern",
        (Domain::Text, _) => "text",
    }
}

/// A finite number, or None. `inf` and `NaN` parse as f64 but have no JSON form.
fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Shape typed input for the operator. Anything that does not parse is passed through as
/// text so the validator reports it.
fn parse_value(field: Field, operator: Operator, raw: &str) -> Value {
    match (field.domain(), operator) {
        (Domain::Amount, Operator::Between) => {
            let bounds: Vec<f64> = raw.split(',').filter_map(parse_amount).collect();
            match bounds.as_slice() {
                [min, max] if raw.split(',').count() == 2 => json!([min, max]),
                _ => json!(raw),
            }
        }
        (Domain::Amount, _) => match parse_amount(raw) {
            Some(n) => json!(n),
            None => json!(raw),
        },
        _ => json!(raw),
    }
}

fn parse_indices(raw: &str) -> Vec<usize> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

fn ask_letter(side: &str, name: String, known: &[Column], p: &mut dyn Prompter) -> Result<Column> {
    let existing = known.iter().find(|c| c.name == name).map(|c| c.letter.as_str());
    let letter = p.text(&format!("{side} column letter"), existing)?;
    Ok(Column {
        name,
        letter,
        extra: Default::default(),
    })
}

fn ask_column(side: &str, known: &[Column], p: &mut dyn Prompter) -> Result<Option<Column>> {
    let name = p.text(&format!("{side} column name (blank for none)"), None)?;
    if name.is_empty() {
        return Ok(None);
    }
    ask_letter(side, name, known, p).map(Some)
}

fn ask_dual_entry(wizard: &mut Wizard<'_>, p: &mut dyn Prompter) -> Result<()> {
    let known = wizard.hints().columns;
    let name = p.text(&format!("DR column name (blank for none, '{ABANDON}' to cancel)"), None)?;
    if wants_abandon(&name) {
        wizard.abandon()?;
        return Ok(());
    }
    let dr = if name.is_empty() {
        None
    } else {
        Some(ask_letter("DR", name, &known, p)?)
    };
    let cr = ask_column("CR", &known, p)?;
    let share = loop {
        let raw = p.text("Share of the amount to book (blank for 1.0)", None)?;
        if raw.is_empty() {
            break None;
        }
        match parse_amount(&raw) {
            Some(n) => break Some(n),
            None => println!("{}", "Share must be a finite number, e.g. 0.5".red()),
        }
    };
    wizard.set_dual_entry(dr, cr, share)?;
    Ok(())
}

fn ask_amend(wizard: &mut Wizard<'_>, p: &mut dyn Prompter) -> Result<()> {
    let options: Vec<String> = ["intent", "conditions", "dual entry", "abandon"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let target = match p.choose("Amend which part?", &options, 1)? {
        0 => Step::Intent,
        1 => Step::ConditionsAndGroups,
        2 => Step::DualEntry,
        _ => {
            wizard.abandon()?;
            return Ok(());
        }
    };
    match wizard.amend(target) {
        Err(e @ WizardError::NotAmendable(_)) => println!("{}", e.to_string().red()),
        other => other?,
    }
    Ok(())
}
