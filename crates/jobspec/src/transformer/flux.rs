use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jobspec_core::attributes::value_to_string;
use jobspec_core::error::JobspecError;
use jobspec_core::step::{Step, StepBase, StepField, StepInput, StepResult, StepTable};
use jobspec_core::workload::{BATCH_STEP, SUBMIT_STEP};
use jobspec_core::{FlatResources, JobSpec, Map, Transformer, TransformerConfig};

use crate::transformer::session::CommandSession;
use crate::transformer::stage::{STAGE_STEP, create_stage_step};
use crate::transformer::{
    SYSTEM_ATTRIBUTES, command_words, flat_resources, join_command, run_nested_pre_steps,
    run_pre_steps, validate_task_step,
};

pub const FLUX_TRANSFORMER: &str = "flux";
pub const FLUX_DESCRIPTION: &str = "Flux Framework transformer";

pub struct FluxTransformer {
    steps: StepTable,
    session: Arc<CommandSession>,
}

impl FluxTransformer {
    pub fn new(config: &TransformerConfig) -> jobspec_core::Result<Self> {
        let session = Arc::new(CommandSession::new(*config));
        let mut steps = StepTable::new(FLUX_TRANSFORMER);

        let s = session.clone();
        steps.register_step(SUBMIT_STEP, move |jobspec, input| {
            Ok(Box::new(FluxSubmit::new(s.clone(), jobspec, input)?) as Box<dyn Step>)
        })?;
        let s = session.clone();
        steps.register_step(BATCH_STEP, move |jobspec, input| {
            Ok(Box::new(FluxBatch::new(s.clone(), jobspec, input)?) as Box<dyn Step>)
        })?;
        steps.register_step(STAGE_STEP, create_stage_step(session.clone()))?;

        Ok(Self { steps, session })
    }

    pub fn session(&self) -> &CommandSession {
        &self.session
    }
}

impl Transformer for FluxTransformer {
    fn name(&self) -> &str {
        FLUX_TRANSFORMER
    }

    fn description(&self) -> &str {
        FLUX_DESCRIPTION
    }

    fn steps(&self) -> &StepTable {
        &self.steps
    }
}

pub fn create(config: &TransformerConfig) -> jobspec_core::Result<Box<dyn Transformer>> {
    Ok(Box::new(FluxTransformer::new(config)?))
}

fn resource_args(flat: &FlatResources) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(nodes) = flat.nodes {
        args.push(format!("-N{nodes}"));
    }
    if let Some(slots) = flat.slots {
        args.push(format!("-n{slots}"));
    }
    if let Some(cores) = flat.cores {
        args.push(format!("-c{cores}"));
    }
    if let Some(gpus) = flat.gpus {
        args.push(format!("-g{gpus}"));
    }
    args
}

/// Options shared by `flux submit` and `flux batch`.
fn job_args(base: &StepBase) -> Vec<String> {
    let mut args = vec![format!("--job-name={}", base.name())];
    if let Some(attributes) = base.attributes() {
        if let Some(cwd) = attributes.cwd() {
            args.push(format!("--cwd={cwd}"));
        }
        if let Some(duration) = attributes.duration() {
            args.push(format!("-t{}s", duration.as_secs()));
        }
        for (name, value) in attributes.environment() {
            args.push(format!("--env={name}={value}"));
        }
        for (name, value) in attributes.as_map() {
            if !SYSTEM_ATTRIBUTES.contains(&name.as_str()) {
                args.push(format!("--setattr=user.{name}={}", value_to_string(value)));
            }
        }
    }
    if let Some(requires) = base.requires() {
        for (name, value) in requires.iter() {
            args.push(format!(
                "--setattr=user.requires.{name}={}",
                value_to_string(value)
            ));
        }
    }
    args
}

/// `flux submit` options of a task, without dependencies and the command.
fn submit_options(base: &StepBase) -> jobspec_core::Result<Vec<String>> {
    let mut args = vec!["flux".to_string(), "submit".to_string()];
    args.extend(resource_args(&flat_resources(base)?));
    args.extend(job_args(base));
    if let Some(task) = base.task() {
        if task.replicas > 1 {
            args.push(format!("--cc=0-{}", task.replicas - 1));
        }
    }
    Ok(args)
}

/// `flux batch` options of a group. Groups without resources get a single node.
fn batch_options(base: &StepBase) -> jobspec_core::Result<Vec<String>> {
    let mut args = vec!["flux".to_string(), "batch".to_string()];
    match base.resources() {
        Some(resources) if !resources.is_empty() => {
            args.extend(resource_args(&resources.flatten(base.name())?))
        }
        _ => args.push("-N1".to_string()),
    }
    args.extend(job_args(base));
    Ok(args)
}

fn parse_flux_job_id(output: &str) -> Option<String> {
    output
        .lines()
        .map(|l| l.trim())
        .rfind(|l| !l.is_empty())
        .map(|l| l.to_string())
}

fn attach(
    session: &CommandSession,
    step: &str,
    job_id: &str,
    stage: &Path,
) -> jobspec_core::Result<()> {
    if session.wait() {
        let args = vec![
            "flux".to_string(),
            "job".to_string(),
            "attach".to_string(),
            job_id.to_string(),
        ];
        session.run_command(step, &args, stage)?;
    }
    Ok(())
}

/// Submits a single task with `flux submit`.
#[derive(Debug)]
pub struct FluxSubmit {
    base: StepBase,
    session: Arc<CommandSession>,
    steps: Vec<Box<dyn Step>>,
}

impl FluxSubmit {
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
}

impl Step for FluxSubmit {
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

        let mut args = submit_options(&self.base)?;
        if let Some(task) = self.base.task() {
            for dependency in &task.depends_on {
                let job_id = self.session.job_id(name, dependency)?;
                args.push(format!("--dependency=afterok:{job_id}"));
            }
            args.extend(command_words(name, task)?);
        }

        let job_id = self.session.submit(name, &args, stage, parse_flux_job_id)?;
        attach(&self.session, name, &job_id, stage)?;

        let mut result = StepResult::new(job_id).with_debug(join_command(&args));
        result.debug.extend(debug);
        Ok(result)
    }
}

/// Runs a group inside its own Flux instance with `flux batch`.
#[derive(Debug)]
pub struct FluxBatch {
    base: StepBase,
    session: Arc<CommandSession>,
    steps: Vec<Box<dyn Step>>,
}

impl FluxBatch {
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
}

/// Writes the batch script of a group (and of groups nested in it) into `stage`.
fn write_batch_script(
    session: &CommandSession,
    base: &StepBase,
    steps: &[Box<dyn Step>],
    stage: &Path,
) -> jobspec_core::Result<PathBuf> {
    let mut script = format!("#!/bin/bash\n# Batch script of group {}\n", base.name());
    let mut job_vars: Map<&str, String> = Map::new();

    for (index, step) in steps.iter().enumerate() {
        let var = format!("job_{index}");
        let (options, command) = match step.kind() {
            SUBMIT_STEP => {
                let Some(task) = step.base().task() else {
                    continue;
                };
                let mut options = join_command(&submit_options(step.base())?);
                for dependency in &task.depends_on {
                    let dep_var = job_vars.get(dependency.as_str()).ok_or_else(|| {
                        JobspecError::SpecError(format!(
                            "Task {} of group {} depends on {dependency} that is not submitted earlier in the same group",
                            step.name(),
                            base.name()
                        ))
                    })?;
                    write!(options, " --dependency=afterok:${{{dep_var}}}").ok();
                }
                (options, join_command(&command_words(step.name(), task)?))
            }
            BATCH_STEP => {
                let path = write_batch_script(session, step.base(), step.steps(), stage)?;
                (
                    join_command(&batch_options(step.base())?),
                    join_command(&[path.display().to_string()]),
                )
            }
            kind => {
                log::warn!("Step {} of kind {kind} cannot run inside a batch", step.name());
                continue;
            }
        };
        writeln!(script, "{var}=$({options} {command})").ok();
        job_vars.insert(step.name(), var);
    }
    script.push_str("flux queue drain\n");

    let path = stage.join(format!("{}.sh", base.name()));
    session.write_file(&path, &script, true)?;
    Ok(path)
}

impl Step for FluxBatch {
    fn kind(&self) -> &'static str {
        BATCH_STEP
    }

    fn base(&self) -> &StepBase {
        &self.base
    }

    fn validate(&self) -> jobspec_core::Result<()> {
        match self.base.resources() {
            Some(resources) if !resources.is_empty() => {
                resources.flatten(self.name())?;
            }
            _ => {}
        }
        if self.steps.is_empty() {
            log::warn!("Group {} has no tasks", self.name());
        }
        Ok(())
    }

    fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    fn run(&self, stage: &Path) -> jobspec_core::Result<StepResult> {
        let name = self.name();
        let debug = run_nested_pre_steps(&self.steps, stage)?;
        let path = write_batch_script(&self.session, &self.base, &self.steps, stage)?;

        let mut args = batch_options(&self.base)?;
        args.push(path.display().to_string());
        let job_id = self.session.submit(name, &args, stage, parse_flux_job_id)?;
        attach(&self.session, name, &job_id, stage)?;

        let mut result = StepResult::new(job_id)
            .with_debug(join_command(&args))
            .with_debug(format!("Batch script: {}", path.display()));
        result.debug.extend(debug);
        Ok(result)
    }
}
