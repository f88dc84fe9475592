use std::path::Path;
use std::sync::Arc;

use crate::error::JobspecError;
use crate::spec::JobSpec;
use crate::step::{Step, StepBase, StepInput, StepResult, StepTable};
use crate::workload::Workload;

/// Step that reports its own kind and name instead of executing anything.
#[derive(Debug)]
pub struct RecordingStep {
    kind: &'static str,
    base: StepBase,
    steps: Vec<Box<dyn Step>>,
}

impl RecordingStep {
    pub fn new(kind: &'static str, jobspec: Arc<JobSpec>, input: StepInput) -> crate::Result<Self> {
        Ok(RecordingStep {
            kind,
            base: StepBase::new(kind, &[], jobspec, input.options)?,
            steps: input.steps,
        })
    }
}

impl Step for RecordingStep {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn base(&self) -> &StepBase {
        &self.base
    }

    fn validate(&self) -> crate::Result<()> {
        if self.kind == "submit" && self.base.task().is_none() {
            return Err(JobspecError::SpecError(format!(
                "Submit step {} has no task",
                self.name()
            )));
        }
        Ok(())
    }

    fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    fn run(&self, _stage: &Path) -> crate::Result<StepResult> {
        if self.name() == "fail" {
            return Err(JobspecError::ExecutionError {
                step: self.name().to_string(),
                message: "exit code 1".to_string(),
                retriable: false,
            });
        }
        Ok(StepResult::new(format!("{} {}", self.kind, self.name())))
    }
}

pub fn recording_table() -> StepTable {
    table_with_steps("test", &["submit", "batch", "stage"])
}

pub fn table_with_steps(transformer: &str, kinds: &[&'static str]) -> StepTable {
    let mut table = StepTable::new(transformer);
    for kind in kinds {
        let kind: &'static str = kind;
        table
            .register_step(kind, move |js, input| {
                Ok(Box::new(RecordingStep::new(kind, js, input)?) as Box<dyn Step>)
            })
            .unwrap();
    }
    table
}

pub fn minimal_jobspec() -> Arc<JobSpec> {
    Arc::new(JobSpec::parse("version: 1\ntasks: []").unwrap())
}

pub fn step_names(workload: &Workload) -> Vec<&str> {
    workload.steps().iter().map(|s| s.name()).collect()
}
