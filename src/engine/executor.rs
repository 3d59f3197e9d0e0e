//! Terminal progress and confirmation for apply runs

use anyhow::Result;
use colored::Colorize;
use declarative::{ApplyResult, ChangeAction, ConfirmCallback, ProgressCallback, ResourceId};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over change set entries
pub struct TerminalProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn println(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }
}

/// Symbol for a finished entry
pub fn result_symbol(result: &ApplyResult) -> &'static str {
    match result {
        ApplyResult::Created
        | ApplyResult::Modified
        | ApplyResult::Replaced
        | ApplyResult::Removed => "✓",
        ApplyResult::Failed { .. } => "✗",
        ApplyResult::Skipped { .. } => "⊘",
    }
}

fn past_tense(result: &ApplyResult) -> &'static str {
    match result {
        ApplyResult::Created => "created",
        ApplyResult::Modified => "updated",
        ApplyResult::Replaced => "replaced",
        ApplyResult::Removed => "destroyed",
        ApplyResult::Failed { .. } => "failed",
        ApplyResult::Skipped { .. } => "skipped",
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_batch_start(&mut self, count: usize) {
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new(count as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        self.bar = Some(bar);
    }

    fn on_resource_start(&mut self, id: &ResourceId, action: ChangeAction) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{action} {id}"));
        }
    }

    fn on_resource_complete(&mut self, id: &ResourceId, result: &ApplyResult) {
        if self.quiet {
            return;
        }
        let symbol = result_symbol(result);
        let symbol = match result {
            ApplyResult::Failed { .. } => symbol.red(),
            ApplyResult::Skipped { .. } => symbol.dimmed(),
            _ => symbol.green(),
        };
        let detail = match result {
            ApplyResult::Failed { error } => format!(": {error}"),
            ApplyResult::Skipped { reason } => format!(" ({reason})"),
            _ => String::new(),
        };
        self.println(format!("  {} {} {}{}", symbol, id, past_tense(result), detail.dimmed()));
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_batch_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Interactive yes/no prompt
pub struct DialoguerConfirm;

impl ConfirmCallback for DialoguerConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        use dialoguer::Confirm;

        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;

        Ok(confirmed)
    }
}
