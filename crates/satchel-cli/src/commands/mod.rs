pub mod check_content;
pub mod completions;
pub mod copy_content;
pub mod delete_content;
pub mod deps;
pub mod install;
pub mod libraries;
pub mod validate;
pub mod verify_store;

use indicatif::{ProgressBar, ProgressStyle};
use satchel_schema::{Diagnostics, LibraryIdentity, Severity};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INVALID: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Colour a library classification as printed by `install`.
pub fn colorize_outcome(outcome: &str) -> String {
    use console::Style;
    match outcome {
        "new" => Style::new().green().apply_to(outcome).to_string(),
        o if o.starts_with("patch") => Style::new().cyan().apply_to(o).to_string(),
        o if o.starts_with("up to date") => Style::new().dim().apply_to(o).to_string(),
        other => other.to_owned(),
    }
}

pub fn colorize_severity(severity: Severity) -> String {
    use console::Style;
    match severity {
        Severity::Error => Style::new().red().bold().apply_to("error").to_string(),
        Severity::Warning => Style::new().yellow().apply_to("warning").to_string(),
    }
}

/// One line per finding, on stderr.
pub fn print_diagnostics(diagnostics: &Diagnostics) {
    for d in diagnostics.iter() {
        if d.context.is_empty() {
            eprintln!("{}: {}", colorize_severity(d.severity), d.message);
        } else {
            eprintln!(
                "{}: {}: {}",
                colorize_severity(d.severity),
                d.context,
                d.message
            );
        }
    }
}

pub fn parse_library(input: &str) -> Result<LibraryIdentity, String> {
    LibraryIdentity::parse(input).map_err(|e| format!("invalid library '{input}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_outcome_keeps_text() {
        assert!(colorize_outcome("new").contains("new"));
        assert!(colorize_outcome("patch of H5P.Text-1.1").contains("H5P.Text-1.1"));
        assert!(colorize_outcome("up to date (x)").contains("up to date"));
        assert_eq!(colorize_outcome("other"), "other");
    }

    #[test]
    fn colorize_severity_names_level() {
        assert!(colorize_severity(Severity::Error).contains("error"));
        assert!(colorize_severity(Severity::Warning).contains("warning"));
    }

    #[test]
    fn parse_library_accepts_both_forms() {
        assert_eq!(
            parse_library("H5P.Text 1.1").unwrap(),
            parse_library("H5P.Text-1.1").unwrap()
        );
        let err = parse_library("H5P.Text").unwrap_err();
        assert!(err.contains("invalid library 'H5P.Text'"));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_INVALID);
        assert_ne!(EXIT_INVALID, EXIT_STORE_ERROR);
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        assert!(pb.is_finished());
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
        assert!(pb.is_finished());
    }
}
