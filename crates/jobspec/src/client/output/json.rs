use std::path::Path;

use jobspec_core::JobSpec;
use serde_json::json;

use crate::client::output::common::{StepRunInfo, StepSummary};
use crate::client::output::outputs::Output;

#[derive(Default)]
pub struct JsonOutput;

impl JsonOutput {
    fn print(&self, data: serde_json::Value) {
        match serde_json::to_string_pretty(&data) {
            Ok(text) => println!("{text}"),
            Err(e) => log::error!("Cannot serialize output: {e}"),
        }
    }
}

impl Output for JsonOutput {
    fn print_transformers(&self, transformers: Vec<(&str, &str)>) {
        let items: Vec<_> = transformers
            .into_iter()
            .map(|(name, description)| json!({"name": name, "description": description}))
            .collect();
        self.print(json!(items));
    }

    fn print_jobspec_valid(&self, path: &Path, jobspec: &JobSpec) {
        self.print(json!({
            "path": path,
            "valid": true,
            "jobspec": jobspec,
        }));
    }

    fn print_workload(&self, transformer: &str, steps: Vec<StepSummary>) {
        self.print(json!({
            "transformer": transformer,
            "steps": steps,
        }));
    }

    fn print_run_results(&self, transformer: &str, stage: &Path, results: Vec<StepRunInfo>) {
        self.print(json!({
            "transformer": transformer,
            "stage": stage,
            "results": results,
        }));
    }

    fn print_version(&self, version: &str) {
        self.print(json!({ "version": version }));
    }

    fn print_error(&self, error: anyhow::Error) {
        self.print(json!({ "error": format!("{error:?}") }));
    }
}
