use std::path::Path;

use jobspec_core::JobSpec;

use crate::client::output::common::{StepRunInfo, StepSummary};

#[derive(clap::ValueEnum, Clone)]
pub enum Outputs {
    CLI,
    JSON,
    Quiet,
}

pub trait Output {
    // Transformers
    fn print_transformers(&self, transformers: Vec<(&str, &str)>);

    // Jobspecs
    fn print_jobspec_valid(&self, path: &Path, jobspec: &JobSpec);
    fn print_workload(&self, transformer: &str, steps: Vec<StepSummary>);
    fn print_run_results(&self, transformer: &str, stage: &Path, results: Vec<StepRunInfo>);

    fn print_version(&self, version: &str);

    fn print_error(&self, error: anyhow::Error);
}
