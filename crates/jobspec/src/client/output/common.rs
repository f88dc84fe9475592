use std::time::Duration;

use jobspec_core::{
    Attributes, FlatResources, Requires, ResolvedResources, Step, StepResult, Workload,
};
use serde::Serialize;

use crate::transformer::{command_words, join_command};

/// Printable description of a step and its nested steps.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub kind: String,
    pub name: String,
    pub resources: ResolvedResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flat: Option<FlatResources>,
    pub attributes: Attributes,
    pub requires: Requires,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepSummary>,
}

impl StepSummary {
    pub fn from_step(step: &dyn Step) -> Self {
        let base = step.base();
        let resources = base.resources().cloned().unwrap_or_default();
        let flat = if resources.is_empty() {
            None
        } else {
            resources.flatten(step.name()).ok()
        };
        let task = base.task();
        StepSummary {
            kind: step.kind().to_string(),
            name: step.name().to_string(),
            flat,
            resources,
            attributes: base.attributes().cloned().unwrap_or_default(),
            requires: base.requires().cloned().unwrap_or_default(),
            command: task
                .and_then(|t| command_words(step.name(), t).ok())
                .map(|words| join_command(&words)),
            depends_on: task.map(|t| t.depends_on.clone()).unwrap_or_default(),
            steps: step
                .steps()
                .iter()
                .map(|s| StepSummary::from_step(s.as_ref()))
                .collect(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.attributes.duration()
    }
}

pub fn summarize_workload(workload: &Workload) -> Vec<StepSummary> {
    workload
        .steps()
        .iter()
        .map(|s| StepSummary::from_step(s.as_ref()))
        .collect()
}

/// Result of one executed top level step.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StepRunInfo {
    pub kind: String,
    pub name: String,
    pub output: String,
    pub debug: Vec<String>,
}

impl StepRunInfo {
    pub fn new(step: &dyn Step, result: StepResult) -> Self {
        StepRunInfo {
            kind: step.kind().to_string(),
            name: step.name().to_string(),
            output: result.output,
            debug: result.debug,
        }
    }
}
