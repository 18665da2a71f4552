use std::path::Path;

use anyhow::{Result, bail};

use converge::{DependencyGraph, expr, resource};

use crate::Context;
use crate::{config, providers, ui};

pub fn run(ctx: &Context, config_path: &Path) -> Result<()> {
    let site = config::load(config_path)?;
    let resources = site.to_resources(&config::base_dir(config_path))?;

    resource::validate(&resources)?;
    let graph = DependencyGraph::build(&resources)?;

    let root = config::site_root(&site.settings)?;
    providers::registry(&root).ensure_registered(&resources)?;

    // Outputs must be single references to declared resources.
    for (name, expression) in &site.outputs {
        let attr_ref = expr::parse(expression)?;
        if !resources
            .iter()
            .any(|resource| resource.address == attr_ref.resource)
        {
            bail!("output `{name}` references undeclared resource {}", attr_ref.resource);
        }
    }

    let waves = graph.waves();
    ui::success(&format!(
        "Configuration valid: {} resources in {} waves, {} outputs",
        resources.len(),
        waves.len(),
        site.outputs.len()
    ));

    if ctx.verbose > 0 {
        for (index, wave) in waves.iter().enumerate() {
            let members = wave
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            ui::dim(&format!("wave {}: {members}", index + 1));
        }
    }

    Ok(())
}
