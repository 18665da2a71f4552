use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::cli::ApplyArgs;
use crate::commands::render::{self, OpProgress, PhaseProgress};
use crate::commands::{self, output};
use crate::{Context, config, ui};

pub fn run(ctx: &Context, config_path: &Path, args: &ApplyArgs) -> Result<()> {
    let site = config::load(config_path)?;
    let resources = site.to_resources(&config::base_dir(config_path))?;
    let targets = commands::parse_targets(&args.targets)?;

    let engine = commands::build_engine(&site, config_path, args.jobs, !args.no_refresh)?;

    ui::header("Apply");
    let phases = PhaseProgress::new(ctx.quiet);
    let planned = engine.plan(&resources, &targets, &phases);
    phases.finish();
    let plan = planned?;

    if plan.is_converged() {
        ui::success("No changes. Site matches the configuration.");
        return Ok(());
    }

    render::print_plan(&plan, ctx.verbose > 0);

    if !args.auto_approve && !commands::confirm("Apply these changes?", true)? {
        ui::warn("Apply aborted");
        return Ok(());
    }

    println!();
    println!(
        "  {} Applying {} operations...",
        "→".cyan(),
        plan.change_count()
    );

    let ops = OpProgress::new(plan.change_count() as u64, "Applying", ctx.quiet);
    let outcome = engine.apply(&resources, &plan, &ops);
    ops.finish();
    let report = outcome?;

    render::print_report(&report);

    if report.is_success() && !site.outputs.is_empty() {
        let entries = engine.recorded()?;
        ui::section("Outputs");
        for (name, expression) in &site.outputs {
            match output::resolve(&entries, expression) {
                Ok(value) => ui::kv(name, &render::render_value(&value)),
                Err(_) => ui::kv(name, "(not yet available)"),
            }
        }
    }

    commands::ensure_success(&report)
}
