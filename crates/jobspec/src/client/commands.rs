use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use jobspec_core::{JobSpec, Transformer, TransformerConfig};

use crate::client::globalsettings::GlobalSettings;
use crate::client::output::common::{StepRunInfo, summarize_workload};
use crate::common::cli::{PlanOpts, RunOpts, ValidateOpts};
use crate::transformer::transformer_registry;

fn load_jobspec(path: &Path) -> anyhow::Result<Arc<JobSpec>> {
    let jobspec = JobSpec::from_file(path)
        .with_context(|| format!("Cannot load jobspec from {}", path.display()))?;
    Ok(Arc::new(jobspec))
}

fn create_transformer(
    name: &str,
    config: &TransformerConfig,
) -> anyhow::Result<Box<dyn Transformer>> {
    Ok(transformer_registry().create(name, config)?)
}

/// Creates the directory where scripts and staged files are written.
fn prepare_stage(stage: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match stage {
        Some(path) => {
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Cannot create stage directory {}", path.display()))?;
            Ok(path)
        }
        None => Ok(tempfile::Builder::new()
            .prefix("jobspec-")
            .tempdir()
            .context("Cannot create temporary stage directory")?
            .keep()),
    }
}

pub fn command_run(gsettings: &GlobalSettings, opts: RunOpts) -> anyhow::Result<()> {
    let jobspec = load_jobspec(&opts.file)?;
    let config = TransformerConfig {
        dry_run: opts.dry_run,
        wait: opts.wait,
    };
    let transformer = create_transformer(&opts.transformer.transformer, &config)?;
    let workload = transformer.parse(jobspec)?;
    let stage = prepare_stage(opts.stage)?;
    log::debug!(
        "Running {} step(s) with {} in {}",
        workload.len(),
        transformer.name(),
        stage.display()
    );

    let results = workload
        .run_steps(&stage)?
        .into_iter()
        .map(|(step, result)| StepRunInfo::new(step, result))
        .collect();
    gsettings
        .printer()
        .print_run_results(transformer.name(), &stage, results);
    Ok(())
}

pub fn command_plan(gsettings: &GlobalSettings, opts: PlanOpts) -> anyhow::Result<()> {
    let jobspec = load_jobspec(&opts.file)?;
    let transformer = create_transformer(
        &opts.transformer.transformer,
        &TransformerConfig {
            dry_run: true,
            wait: false,
        },
    )?;
    let workload = transformer.parse(jobspec)?;
    gsettings
        .printer()
        .print_workload(transformer.name(), summarize_workload(&workload));
    Ok(())
}

pub fn command_validate(gsettings: &GlobalSettings, opts: ValidateOpts) -> anyhow::Result<()> {
    let jobspec = load_jobspec(&opts.file)?;
    gsettings.printer().print_jobspec_valid(&opts.file, &jobspec);
    Ok(())
}

pub fn command_transformers(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    gsettings
        .printer()
        .print_transformers(transformer_registry().list());
    Ok(())
}

pub fn command_version(gsettings: &GlobalSettings) {
    gsettings.printer().print_version(crate::JOBSPEC_VERSION);
}
