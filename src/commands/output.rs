use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use colored::Colorize;
use serde_json::Value;

use converge::{ResourceRef, StateEntry, StateStore, expr, store};

use crate::cli::OutputArgs;
use crate::commands::render;
use crate::state::FileStore;
use crate::{Context, config, ui};

/// Resolve one output expression against recorded state.
pub(crate) fn resolve(
    entries: &BTreeMap<ResourceRef, StateEntry>,
    expression: &str,
) -> Result<Value> {
    let attr_ref = expr::parse(expression)?;
    store::lookup(entries, &attr_ref)
        .with_context(|| format!("`{expression}` is not recorded in state"))
}

pub fn run(_ctx: &Context, config_path: &Path, args: &OutputArgs) -> Result<()> {
    let site = config::load(config_path)?;
    let file_store = FileStore::new(config::state_path(config_path, &site.settings));
    let entries = file_store.load()?;

    // Single output: print the raw value, suitable for shell substitution.
    if let Some(name) = &args.name {
        let expression = site
            .outputs
            .get(name)
            .with_context(|| format!("no output named `{name}` in the configuration"))?;
        let value = resolve(&entries, expression)?;
        println!("{}", render::render_value(&value));
        return Ok(());
    }

    if site.outputs.is_empty() {
        ui::info("No outputs defined.");
        return Ok(());
    }

    for (name, expression) in &site.outputs {
        match resolve(&entries, expression) {
            Ok(value) => println!("{name} = {}", render::render_value(&value)),
            Err(_) => println!("{name} = {}", "(not yet available)".dimmed()),
        }
    }
    Ok(())
}
