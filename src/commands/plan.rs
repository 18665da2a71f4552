use std::path::Path;

use anyhow::Result;

use crate::cli::PlanArgs;
use crate::commands::render::{self, PhaseProgress};
use crate::{Context, commands, config, ui};

pub fn run(ctx: &Context, config_path: &Path, args: &PlanArgs) -> Result<()> {
    let site = config::load(config_path)?;
    let resources = site.to_resources(&config::base_dir(config_path))?;
    let targets = commands::parse_targets(&args.targets)?;

    let engine = commands::build_engine(&site, config_path, None, !args.no_refresh)?;

    ui::header("Plan");
    let phases = PhaseProgress::new(ctx.quiet);
    let planned = engine.plan(&resources, &targets, &phases);
    phases.finish();
    let plan = planned?;

    if plan.is_converged() {
        ui::success("No changes. Site matches the configuration.");
        return Ok(());
    }

    render::print_plan(&plan, ctx.verbose > 0);
    Ok(())
}
