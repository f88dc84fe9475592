use std::borrow::Cow;
use std::path::Path;
use std::sync::OnceLock;

use jobspec_core::error::JobspecError;
use jobspec_core::spec::{CommandDef, TaskDef};
use jobspec_core::step::{Step, StepBase};
use jobspec_core::transformer::TransformerFactory;
use jobspec_core::workload::run_step;
use jobspec_core::{FlatResources, TransformerRegistry};

pub mod flux;
pub mod session;
pub mod slurm;
pub mod stage;

/// Transformers compiled into the binary as (name, description, factory).
const BUILTIN_TRANSFORMERS: &[(&str, &str, TransformerFactory)] = &[
    (flux::FLUX_TRANSFORMER, flux::FLUX_DESCRIPTION, flux::create),
    (slurm::SLURM_TRANSFORMER, slurm::SLURM_DESCRIPTION, slurm::create),
];

static REGISTRY: OnceLock<TransformerRegistry> = OnceLock::new();

/// Process-wide registry of transformers, populated on first access.
pub fn transformer_registry() -> &'static TransformerRegistry {
    REGISTRY.get_or_init(|| {
        let mut registry = TransformerRegistry::new();
        for (name, description, factory) in BUILTIN_TRANSFORMERS {
            if let Err(e) = registry.register_transformer(name, description, *factory) {
                log::error!("Cannot register transformer {name}: {e}");
            }
        }
        registry
    })
}

/// Attributes that are translated into dedicated scheduler options.
pub const SYSTEM_ATTRIBUTES: &[&str] = &["cwd", "duration", "environment"];

/// Quotes a word for a shell, scheduler options like `--nodes=2` are left as they are.
pub fn quote_word(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_-+=.,/:@%".contains(&b));
    if plain {
        Cow::Borrowed(word)
    } else {
        shlex::try_quote(word).unwrap_or(Cow::Borrowed(word))
    }
}

/// Joins words into a shell command line.
pub fn join_command(words: &[String]) -> String {
    words
        .iter()
        .map(|w| quote_word(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Words of the task command.
pub fn command_words(step: &str, task: &TaskDef) -> jobspec_core::Result<Vec<String>> {
    match &task.command {
        None => Err(JobspecError::SpecError(format!("Task {step} has no command"))),
        Some(CommandDef::Args(args)) => Ok(args.clone()),
        Some(CommandDef::Line(line)) => shlex::split(line).ok_or_else(|| {
            JobspecError::SpecError(format!("Cannot parse command of task {step}: {line}"))
        }),
    }
}

/// Flattened resources of a step, failing when they are missing or cannot be counted.
pub fn flat_resources(base: &StepBase) -> jobspec_core::Result<FlatResources> {
    match base.resources() {
        Some(resources) if !resources.is_empty() => resources.flatten(base.name()),
        _ => Err(JobspecError::SpecError(format!(
            "Step {} has no resources",
            base.name()
        ))),
    }
}

/// Checks what every task submission needs: a command and countable resources.
pub fn validate_task_step(base: &StepBase) -> jobspec_core::Result<()> {
    let task = base
        .task()
        .ok_or_else(|| JobspecError::SpecError(format!("Step {} has no task", base.name())))?;
    command_words(base.name(), task)?;
    flat_resources(base)?;
    Ok(())
}

/// Runs steps attached to a task before the task itself.
pub fn run_pre_steps(steps: &[Box<dyn Step>], stage: &Path) -> jobspec_core::Result<Vec<String>> {
    let mut lines = Vec::new();
    for step in steps {
        let result = run_step(step.as_ref(), stage)?;
        lines.push(format!("{}: {}", step.name(), result.output));
        lines.extend(result.debug);
    }
    Ok(lines)
}

/// Pre-steps of every task nested (at any depth) in `steps`.
pub fn run_nested_pre_steps(
    steps: &[Box<dyn Step>],
    stage: &Path,
) -> jobspec_core::Result<Vec<String>> {
    let mut lines = Vec::new();
    for step in steps {
        if step.base().task().is_some() {
            lines.extend(run_pre_steps(step.steps(), stage)?);
        } else {
            lines.extend(run_nested_pre_steps(step.steps(), stage)?);
        }
    }
    Ok(lines)
}
