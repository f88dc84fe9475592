use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use jobspec_core::attributes::value_to_string;
use jobspec_core::error::JobspecError;
use jobspec_core::step::{Step, StepBase, StepField, StepInput, StepResult, StepTable};
use jobspec_core::workload::{BATCH_STEP, SUBMIT_STEP};
use jobspec_core::{FlatResources, JobSpec, Set, Transformer, TransformerConfig};

use crate::transformer::session::CommandSession;
use crate::transformer::stage::{STAGE_STEP, create_stage_step};
use crate::transformer::{
    command_words, flat_resources, join_command, run_nested_pre_steps, run_pre_steps,
    validate_task_step,
};

pub const SLURM_TRANSFORMER: &str = "slurm";
pub const SLURM_DESCRIPTION: &str = "Slurm workload manager transformer";

pub struct SlurmTransformer {
    steps: StepTable,
    session: Arc<CommandSession>,
}

impl SlurmTransformer {
    pub fn new(config: &TransformerConfig) -> jobspec_core::Result<Self> {
        let session = Arc::new(CommandSession::new(*config));
        let mut steps = StepTable::new(SLURM_TRANSFORMER);

        let s = session.clone();
        steps.register_step(SUBMIT_STEP, move |jobspec, input| {
            Ok(Box::new(SlurmSubmit::new(s.clone(), jobspec, input)?) as Box<dyn Step>)
        })?;
        let s = session.clone();
        steps.register_step(BATCH_STEP, move |jobspec, input| {
            Ok(Box::new(SlurmBatch::new(s.clone(), jobspec, input)?) as Box<dyn Step>)
        })?;
        steps.register_step(STAGE_STEP, create_stage_step(session.clone()))?;

        Ok(Self { steps, session })
    }

    pub fn session(&self) -> &CommandSession {
        &self.session
    }
}

impl Transformer for SlurmTransformer {
    fn name(&self) -> &str {
        SLURM_TRANSFORMER
    }

    fn description(&self) -> &str {
        SLURM_DESCRIPTION
    }

    fn steps(&self) -> &StepTable {
        &self.steps
    }
}

pub fn create(config: &TransformerConfig) -> jobspec_core::Result<Box<dyn Transformer>> {
    Ok(Box::new(SlurmTransformer::new(config)?))
}

/// Format a duration as a Slurm time string, e.g. 01:05:02
pub fn format_slurm_duration(duration: &Duration) -> String {
    let mut seconds = duration.as_secs();
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

fn parse_slurm_job_id(output: &str) -> Option<String> {
    output
        .lines()
        .map(|l| l.trim())
        .find(|l| l.to_lowercase().starts_with("submitted batch job"))
        .and_then(|l| l.split(' ').nth(3))
        .map(|l| l.to_string())
}

/// `sbatch`/`srun` resource options.
fn resource_options(flat: &FlatResources) -> Vec<String> {
    let mut options = Vec::new();
    if let Some(nodes) = flat.nodes {
        options.push(format!("--nodes={nodes}"));
    }
    if let Some(slots) = flat.slots {
        options.push(format!("--ntasks={slots}"));
    }
    if let Some(cores) = flat.cores {
        options.push(format!("--cpus-per-task={cores}"));
    }
    if let Some(gpus) = flat.gpus {
        if flat.slots.is_some() {
            options.push(format!("--gpus-per-task={gpus}"));
        } else {
            options.push(format!("--gpus-per-node={gpus}"));
        }
    }
    options
}

/// `srun` options of a task started inside an allocation.
fn srun_task_options(base: &StepBase) -> Vec<String> {
    let mut options = Vec::new();
    let Some(attributes) = base.attributes() else {
        return options;
    };
    if let Some(duration) = attributes.duration() {
        options.push(format!("--time={}", format_slurm_duration(&duration)));
    }
    if let Some(cwd) = attributes.cwd() {
        options.push(format!("--chdir={cwd}"));
    }
    let environment = attributes.environment();
    if !environment.is_empty() {
        let variables: Vec<String> = environment
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        options.push(format!("--export=ALL,{}", variables.join(",")));
    }
    options
}

/// Header of a batch script: `#SBATCH` directives and the environment.
fn script_header(base: &StepBase, flat: Option<&FlatResources>) -> String {
    let mut directives = vec![format!("--job-name={}", base.name())];
    if let Some(flat) = flat {
        directives.extend(resource_options(flat));
    }
    let attributes = base.attributes();
    if let Some(duration) = attributes.and_then(|a| a.duration()) {
        directives.push(format!("--time={}", format_slurm_duration(&duration)));
    }
    if let Some(cwd) = attributes.and_then(|a| a.cwd()) {
        directives.push(format!("--chdir={cwd}"));
    }
    if let Some(task) = base.task() {
        if task.replicas > 1 {
            directives.push(format!("--array=0-{}", task.replicas - 1));
        }
    }
    // Slurm constraints are bare node feature names, so only the values are used
    if let Some(requires) = base.requires() {
        let constraints: Vec<String> = requires.iter().map(|(_, v)| value_to_string(v)).collect();
        if !constraints.is_empty() {
            directives.push(format!("--constraint={}", constraints.join("&")));
        }
    }

    let mut script = "#!/bin/bash\n".to_string();
    for directive in directives {
        writeln!(script, "#SBATCH {directive}").ok();
    }
    if let Some(attributes) = attributes {
        for (name, value) in attributes.environment() {
            writeln!(script, "export {name}={}", join_command(&[value])).ok();
        }
    }
    script
}

/// Submits a batch script with `sbatch` and returns the assigned job id.
fn sbatch(
    session: &CommandSession,
    step: &str,
    dependencies: &[String],
    script: &Path,
    stage: &Path,
) -> jobspec_core::Result<(String, Vec<String>)> {
    let mut args = vec!["sbatch".to_string()];
    if !dependencies.is_empty() {
        args.push(format!("--dependency=afterok:{}", dependencies.join(":")));
    }
    if session.wait() {
        args.push("--wait".to_string());
    }
    args.push(script.display().to_string());
    let job_id = session.submit(step, &args, stage, parse_slurm_job_id)?;
    Ok((job_id, args))
}

/// Submits a single task as a Slurm batch job.
#[derive(Debug)]
pub struct SlurmSubmit {
    base: StepBase,
    session: Arc<CommandSession>,
    steps: Vec<Box<dyn Step>>,
}

impl SlurmSubmit {
    pub fn new(
        session: Arc<CommandSession>,
        jobspec: Arc<JobSpec>,
        input: StepInput,
    ) -> jobspec_core::Result<Self> {
        Ok(Self {
            base: StepBase::new(SUBMIT_STEP, &[StepField::Task], jobspec, input.options)?,
            session,
            steps: input.steps,
        })
    }

    fn script(&self) -> jobspec_core::Result<String> {
        let flat = flat_resources(&self.base)?;
        let mut script = script_header(&self.base, Some(&flat));
        if let Some(task) = self.base.task() {
            let command = join_command(&command_words(self.name(), task)?);
            writeln!(script, "\nsrun {command}").ok();
        }
        Ok(script)
    }
}

impl Step for SlurmSubmit {
    fn kind(&self) -> &'static str {
        SUBMIT_STEP
    }

    fn base(&self) -> &StepBase {
        &self.base
    }

    fn validate(&self) -> jobspec_core::Result<()> {
        validate_task_step(&self.base)
    }

    fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    fn run(&self, stage: &Path) -> jobspec_core::Result<StepResult> {
        let name = self.name();
        let debug = run_pre_steps(&self.steps, stage)?;

        let path = stage.join(format!("{name}.sbatch"));
        self.session.write_file(&path, &self.script()?, true)?;

        let mut dependencies = Vec::new();
        if let Some(task) = self.base.task() {
            for dependency in &task.depends_on {
                dependencies.push(self.session.job_id(name, dependency)?);
            }
        }
        let (job_id, args) = sbatch(&self.session, name, &dependencies, &path, stage)?;

        let mut result = StepResult::new(job_id).with_debug(join_command(&args));
        result.debug.extend(debug);
        Ok(result)
    }
}

/// Runs a group as one Slurm allocation, its tasks are started with `srun`.
#[derive(Debug)]
pub struct SlurmBatch {
    base: StepBase,
    session: Arc<CommandSession>,
    steps: Vec<Box<dyn Step>>,
}

impl SlurmBatch {
    pub fn new(
        session: Arc<CommandSession>,
        jobspec: Arc<JobSpec>,
        input: StepInput,
    ) -> jobspec_core::Result<Self> {
        Ok(Self {
            base: StepBase::new(BATCH_STEP, &[StepField::Group], jobspec, input.options)?,
            session,
            steps: input.steps,
        })
    }

    fn script(&self) -> jobspec_core::Result<String> {
        let flat = match self.base.resources() {
            Some(resources) if !resources.is_empty() => Some(resources.flatten(self.name())?),
            _ => None,
        };
        let mut script = script_header(&self.base, flat.as_ref());
        script.push('\n');
        let mut started = Set::new();
        write_srun_lines(&mut script, self.name(), &self.steps, &mut started)?;
        script.push_str("wait\n");
        Ok(script)
    }
}

/// Starts tasks of a group in the background, a task with dependencies first
/// waits for everything started before it.
fn write_srun_lines(
    script: &mut String,
    group: &str,
    steps: &[Box<dyn Step>],
    started: &mut Set<String>,
) -> jobspec_core::Result<()> {
    for step in steps {
        match step.kind() {
            SUBMIT_STEP => {
                let Some(task) = step.base().task() else {
                    continue;
                };
                if let Some(missing) = task.depends_on.iter().find(|d| !started.contains(*d)) {
                    return Err(JobspecError::SpecError(format!(
                        "Task {} of group {group} depends on {missing} that is not started earlier in the same group",
                        step.name()
                    )));
                }
                if !task.depends_on.is_empty() {
                    script.push_str("wait\n");
                }
                let mut args = vec!["srun".to_string(), format!("--job-name={}", step.name())];
                args.extend(resource_options(&flat_resources(step.base())?));
                args.extend(srun_task_options(step.base()));
                args.extend(command_words(step.name(), task)?);
                let line = join_command(&args);
                // Every replica is a separate job step
                for _ in 0..task.replicas.max(1) {
                    writeln!(script, "{line} &").ok();
                }
                started.insert(step.name().to_string());
            }
            BATCH_STEP => {
                writeln!(script, "# Group {}", step.name()).ok();
                write_srun_lines(script, group, step.steps(), started)?;
                started.insert(step.name().to_string());
            }
            kind => log::warn!("Step {} of kind {kind} cannot run inside a batch", step.name()),
        }
    }
    Ok(())
}

impl Step for SlurmBatch {
    fn kind(&self) -> &'static str {
        BATCH_STEP
    }

    fn base(&self) -> &StepBase {
        &self.base
    }

    fn validate(&self) -> jobspec_core::Result<()> {
        self.script().map(|_| ())
    }

    fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    fn run(&self, stage: &Path) -> jobspec_core::Result<StepResult> {
        let name = self.name();
        let debug = run_nested_pre_steps(&self.steps, stage)?;

        let path: PathBuf = stage.join(format!("{name}.sbatch"));
        self.session.write_file(&path, &self.script()?, true)?;
        let (job_id, args) = sbatch(&self.session, name, &[], &path, stage)?;

        let mut result = StepResult::new(job_id).with_debug(join_command(&args));
        result.debug.extend(debug);
        Ok(result)
    }
}
