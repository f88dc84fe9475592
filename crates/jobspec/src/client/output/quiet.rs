use std::path::Path;

use jobspec_core::JobSpec;

use crate::client::output::common::{StepRunInfo, StepSummary};
use crate::client::output::outputs::Output;

#[derive(Default)]
pub struct Quiet;

fn print_step_names(steps: &[StepSummary]) {
    for step in steps {
        println!("{} {}", step.kind, step.name);
        print_step_names(&step.steps);
    }
}

impl Output for Quiet {
    fn print_transformers(&self, transformers: Vec<(&str, &str)>) {
        for (name, _) in transformers {
            println!("{name}");
        }
    }

    fn print_jobspec_valid(&self, _path: &Path, _jobspec: &JobSpec) {}

    fn print_workload(&self, _transformer: &str, steps: Vec<StepSummary>) {
        print_step_names(&steps);
    }

    fn print_run_results(&self, _transformer: &str, _stage: &Path, results: Vec<StepRunInfo>) {
        for result in results {
            println!("{}", result.output);
        }
    }

    fn print_version(&self, version: &str) {
        println!("{version}");
    }

    fn print_error(&self, error: anyhow::Error) {
        eprintln!("{error:?}");
    }
}
