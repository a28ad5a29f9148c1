use std::path::Path;

use colored::Colorize;

use crate::error::Result;
use crate::models::RulesDocument;
use crate::settings::{load_settings, save_settings};
use crate::store::save_document;

pub fn run(rules_path: &Path, name: &str) -> Result<()> {
    let absolute = if rules_path.is_absolute() {
        rules_path.to_path_buf()
    } else {
        std::env::current_dir()?.join(rules_path)
    };

    if absolute.exists() {
        println!("Using existing ruleset at {}", absolute.display());
    } else {
        save_document(&absolute, &RulesDocument::new(name))?;
        println!(
            "{}",
            format!("Created ruleset '{name}' at {}", absolute.display()).green()
        );
    }

    let mut settings = load_settings();
    settings.rules_path = absolute.to_string_lossy().to_string();
    save_settings(&settings)?;
    Ok(())
}
