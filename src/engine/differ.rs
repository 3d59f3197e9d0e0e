//! Change set and apply report display

use crate::ui;
use colored::{ColoredString, Colorize};
use declarative::{
    ApplyReport, ApplyResult, AttributeDiff, ChangeAction, ChangeEntry, ChangeSet, Planned,
};

const VALUE_WIDTH: usize = 48;
const UNKNOWN: &str = "(known after apply)";

fn symbol(action: ChangeAction) -> ColoredString {
    match action {
        ChangeAction::Create => "+".green(),
        ChangeAction::Update => "~".yellow(),
        ChangeAction::Replace => "±".magenta(),
        ChangeAction::Destroy => "-".red(),
    }
}

fn action_note(entry: &ChangeEntry) -> String {
    match entry.action {
        ChangeAction::Replace if entry.create_before_destroy => {
            "(replace, create before destroy)".to_string()
        }
        ChangeAction::Replace => "(replace)".to_string(),
        ChangeAction::Destroy if entry.replacing => "(destroy before replacement)".to_string(),
        ChangeAction::Destroy if entry.deposed.is_some() => format!(
            "(destroy deposed instance {})",
            entry.deposed.as_deref().unwrap_or_default()
        ),
        action => format!("({action})"),
    }
}

fn planned(value: &Planned) -> String {
    match value {
        Planned::Known(v) => ui::short_value(v, VALUE_WIDTH),
        Planned::Unknown => UNKNOWN.to_string(),
    }
}

/// One line describing an attribute change, without colours
pub fn describe_attribute(diff: &AttributeDiff) -> String {
    let line = match (&diff.before, &diff.after) {
        (None, Some(after)) => format!("+ {} = {}", diff.name, planned(after)),
        (Some(before), None) => format!("- {} = {}", diff.name, ui::short_value(before, VALUE_WIDTH)),
        (Some(before), Some(after)) => format!(
            "~ {}: {} → {}",
            diff.name,
            ui::short_value(before, VALUE_WIDTH),
            planned(after)
        ),
        (None, None) => format!("  {}", diff.name),
    };
    if diff.forces_replacement {
        format!("{line}  # forces replacement")
    } else {
        line
    }
}

/// Display a change set in a user-friendly format
pub fn display_change_set(changes: &ChangeSet) {
    if changes.is_empty() {
        println!();
        println!("  {} No changes. Infrastructure matches the declarations.", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    println!("│");

    for entry in changes.iter() {
        println!(
            "│ {} {:<40} {}",
            symbol(entry.action),
            entry.id.to_string().bold(),
            action_note(entry).dimmed()
        );
        // destroys list every attribute; keep them short
        if entry.action == ChangeAction::Destroy {
            continue;
        }
        for diff in &entry.diff {
            let line = describe_attribute(diff);
            if diff.forces_replacement {
                println!("│     {}", line.magenta());
            } else {
                println!("│     {}", line.dimmed());
            }
        }
    }

    let summary = changes.summary();
    println!("│");
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to create, {} to update, {} to replace, {} to destroy",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().magenta(),
        summary.destroy.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

/// Print the final apply summary
pub fn display_report(report: &ApplyReport, verbose: bool) {
    let summary = &report.summary;
    println!();
    if report.is_success() {
        println!("  {} Apply complete!", "✓".green().bold());
    } else if report.cancelled {
        println!("  {} Apply interrupted", "⚠".yellow().bold());
    } else {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} resources updated", summary.modified);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.removed > 0 {
        println!("    • {} resources destroyed", summary.removed);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
        for (id, error) in report.failures() {
            println!("      {} {}: {}", "✗".red(), id, error);
        }
    }
    if verbose {
        for (id, result) in &report.outcomes {
            if let ApplyResult::Skipped { reason } = result {
                ui::dim(&format!("⊘ {id}: {reason}"));
            }
        }
    }
}
