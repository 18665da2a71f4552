pub mod apply;
pub mod destroy;
pub mod output;
pub mod plan;
pub mod render;
pub mod validate;

use std::path::Path;

use anyhow::{Context as _, Result};

use converge::{ApplyReport, Engine, EngineOptions, ResourceRef, RetryPolicy};

use crate::config;
use crate::providers;
use crate::schema::SiteConfig;
use crate::state::FileStore;

/// Engine wired to the configured site root and state file.
///
/// Job count precedence: command line flag, then `settings.jobs`, then 4.
pub(crate) fn build_engine(
    site: &SiteConfig,
    config_path: &Path,
    jobs: Option<usize>,
    refresh: bool,
) -> Result<Engine<FileStore>> {
    let root = config::site_root(&site.settings)?;
    let registry = providers::registry(&root);
    let store = FileStore::new(config::state_path(config_path, &site.settings));

    let options = EngineOptions {
        jobs: jobs.or(site.settings.jobs).unwrap_or(4),
        retry: RetryPolicy::default(),
        refresh,
    };
    Ok(Engine::new(registry, store).with_options(options))
}

/// Parse `-t kind.name` arguments into resource addresses.
pub(crate) fn parse_targets(targets: &[String]) -> Result<Vec<ResourceRef>> {
    targets
        .iter()
        .map(|target| {
            target
                .parse::<ResourceRef>()
                .with_context(|| format!("invalid target '{target}'"))
        })
        .collect()
}

/// Ask before touching anything.
pub(crate) fn confirm(prompt: &str, default: bool) -> Result<bool> {
    let proceed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?;
    Ok(proceed)
}

/// Turn a partially failed pass into a nonzero exit.
pub(crate) fn ensure_success(report: &ApplyReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    anyhow::bail!(
        "pass incomplete: {} failed, {} blocked, {} cancelled",
        report.failed.len(),
        report.blocked.len(),
        report.cancelled.len()
    )
}
