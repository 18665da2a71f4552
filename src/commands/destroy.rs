use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::cli::DestroyArgs;
use crate::commands::render::{self, OpProgress};
use crate::{Context, commands, config, ui};

pub fn run(ctx: &Context, config_path: &Path, args: &DestroyArgs) -> Result<()> {
    let site = config::load(config_path)?;
    let targets = commands::parse_targets(&args.targets)?;

    let engine = commands::build_engine(&site, config_path, args.jobs, true)?;

    ui::header("Destroy");
    let plan = engine.destroy_plan(&targets)?;

    if plan.is_converged() {
        ui::success("Nothing to destroy. State is empty.");
        return Ok(());
    }

    render::print_plan(&plan, ctx.verbose > 0);

    if !args.auto_approve && !commands::confirm("Destroy these resources?", false)? {
        ui::warn("Destroy aborted");
        return Ok(());
    }

    println!();
    println!(
        "  {} Destroying {} resources...",
        "→".cyan(),
        plan.change_count()
    );

    let ops = OpProgress::new(plan.change_count() as u64, "Destroying", ctx.quiet);
    let outcome = engine.destroy(&plan, &ops);
    ops.finish();
    let report = outcome?;

    render::print_report(&report);
    commands::ensure_success(&report)
}
