//! Shared rendering for plans, pass reports, and live progress.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use colored::Colorize;
use indicatif::ProgressBar;
use serde_json::Value;

use converge::{
    Action, ApplyReport, AttrDiff, ChangeOp, OpOutcome, Phase, Plan, ProgressCallback,
    ProviderError, ResourceRef,
};

use crate::progress;

// ============================================================================
// Plan Rendering
// ============================================================================

/// Print a plan the way `terral plan` and the apply preview show it.
pub fn print_plan(plan: &Plan, verbose: bool) {
    println!();
    for op in plan.changes() {
        let line = format!("{} {}", op.action.symbol(), op.resource);
        let line = match op.action {
            Action::Create => line.green(),
            Action::Update => line.yellow(),
            Action::Destroy => line.red(),
            Action::NoOp => line.normal(),
        };
        println!("  {line}");
        for diff in &op.diff {
            println!("      {}", format_diff(op.action, diff).dimmed());
        }
    }

    if verbose {
        for op in plan.ops.iter().filter(|op| !op.action.is_change()) {
            println!("  {}", format!("  {} (no changes)", op.resource).dimmed());
        }
    }

    println!();
    println!(
        "  Plan: {} to create, {} to update, {} to destroy.",
        plan.count(Action::Create),
        plan.count(Action::Update),
        plan.count(Action::Destroy),
    );
}

fn format_diff(action: Action, diff: &AttrDiff) -> String {
    match (&diff.old, &diff.new) {
        (Some(old), Some(new)) if old != new => {
            format!("{} = {} -> {}", diff.key, render_value(old), render_value(new))
        }
        (Some(old), _) if action == Action::Destroy => {
            format!("{} = {}", diff.key, render_value(old))
        }
        (_, Some(new)) => format!("{} = {}", diff.key, render_value(new)),
        _ => format!("{} = (known after apply)", diff.key),
    }
}

/// Render a JSON value for display: strings raw, everything else compact.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Report Rendering
// ============================================================================

/// Print the summary of an executed pass.
pub fn print_report(report: &ApplyReport) {
    println!();
    if report.is_success() {
        println!("  {} Pass complete", "✓".green().bold());
    } else {
        println!("  {} Pass finished with problems", "⚠".yellow().bold());
    }

    let created = report.count(Action::Create);
    let updated = report.count(Action::Update);
    let destroyed = report.count(Action::Destroy);
    if created > 0 {
        println!("    • {created} created");
    }
    if updated > 0 {
        println!("    • {updated} updated");
    }
    if destroyed > 0 {
        println!("    • {destroyed} destroyed");
    }
    if !report.unchanged.is_empty() {
        println!("    • {} unchanged", report.unchanged.len());
    }

    for (resource, error) in &report.failed {
        println!("    {} {} failed: {}", "✗".red(), resource, error);
    }
    for (resource, dependency) in &report.blocked {
        println!(
            "    {} {} skipped: {} failed",
            "⊘".yellow(),
            resource,
            dependency
        );
    }
    if !report.cancelled.is_empty() {
        println!("    • {} cancelled", report.cancelled.len());
    }
}

// ============================================================================
// Progress Callbacks
// ============================================================================

/// Spinner tracking the planning phases.
pub struct PhaseProgress {
    spinner: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl PhaseProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            spinner: Mutex::new(None),
            quiet,
        }
    }

    /// Clear the spinner; safe to call more than once.
    pub fn finish(&self) {
        let mut guard = self
            .spinner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    fn set_phase(&self, msg: &str) {
        if self.quiet {
            return;
        }
        let mut guard = self
            .spinner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(pb) => pb.set_message(msg.to_string()),
            None => *guard = Some(progress::spinner(msg)),
        }
    }
}

impl ProgressCallback for PhaseProgress {
    fn on_phase(&self, phase: Phase) {
        match phase {
            Phase::Loading => self.set_phase("Loading state..."),
            Phase::Refreshing => self.set_phase("Refreshing observed state..."),
            Phase::Diffing => self.set_phase("Computing plan..."),
            Phase::Applying => self.finish(),
        }
    }

    fn on_op_start(&self, _op: &ChangeOp) {}

    fn on_op_complete(&self, _op: &ChangeOp, _outcome: &OpOutcome) {}

    fn on_retry(
        &self,
        resource: &ResourceRef,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        _delay: Duration,
    ) {
        if self.quiet {
            return;
        }
        let line = format!(
            "  {} retrying {} ({}/{}): {}",
            "⚠".yellow(),
            resource,
            attempt,
            max_attempts,
            error
        );
        let guard = self
            .spinner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(pb) => pb.println(line),
            None => println!("{line}"),
        }
    }
}

/// Progress bar tracking executed operations.
pub struct OpProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl OpProgress {
    pub fn new(total: u64, msg: &str, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            progress::bar(total, msg)
        };
        Self { bar, quiet }
    }

    pub fn finish(&self) {
        progress::finish_clear(&self.bar);
    }
}

impl ProgressCallback for OpProgress {
    fn on_phase(&self, _phase: Phase) {}

    fn on_op_start(&self, op: &ChangeOp) {
        self.bar
            .set_message(format!("{} {}", op.action.symbol(), op.resource));
    }

    fn on_op_complete(&self, op: &ChangeOp, outcome: &OpOutcome) {
        if !self.quiet {
            let line = match outcome {
                OpOutcome::Applied => {
                    format!("{} {} {}", "✓".green(), op.resource, past_tense(op.action))
                }
                OpOutcome::Unchanged => format!("{} {} unchanged", "•".dimmed(), op.resource),
                OpOutcome::Failed(error) => {
                    format!("{} {} failed: {}", "✗".red(), op.resource, error)
                }
                OpOutcome::Blocked(dependency) => format!(
                    "{} {} skipped: {} failed",
                    "⊘".yellow(),
                    op.resource,
                    dependency
                ),
            };
            self.bar.println(format!("  {line}"));
        }
        self.bar.inc(1);
    }

    fn on_retry(
        &self,
        resource: &ResourceRef,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        _delay: Duration,
    ) {
        if !self.quiet {
            self.bar.println(format!(
                "  {} retrying {} ({}/{}): {}",
                "⚠".yellow(),
                resource,
                attempt,
                max_attempts,
                error
            ));
        }
    }
}

fn past_tense(action: Action) -> &'static str {
    match action {
        Action::Create => "created",
        Action::Update => "updated",
        Action::Destroy => "destroyed",
        Action::NoOp => "unchanged",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_value_strings_are_raw() {
        assert_eq!(render_value(&json!("local-1")), "local-1");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(["a", "b"])), r#"["a","b"]"#);
    }

    #[test]
    fn test_format_diff_shapes() {
        let create = AttrDiff {
            key: "region".to_string(),
            old: None,
            new: Some(json!("local-1")),
        };
        assert_eq!(format_diff(Action::Create, &create), "region = local-1");

        let update = AttrDiff {
            key: "region".to_string(),
            old: Some(json!("local-1")),
            new: Some(json!("local-2")),
        };
        assert_eq!(
            format_diff(Action::Update, &update),
            "region = local-1 -> local-2"
        );

        let pending = AttrDiff {
            key: "role".to_string(),
            old: None,
            new: None,
        };
        assert_eq!(
            format_diff(Action::Create, &pending),
            "role = (known after apply)"
        );

        let destroy = AttrDiff {
            key: "region".to_string(),
            old: Some(json!("local-1")),
            new: None,
        };
        assert_eq!(format_diff(Action::Destroy, &destroy), "region = local-1");
    }
}
