use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::Map;
use crate::attributes::{AttributeMap, Attributes, Requires};
use crate::error::JobspecError;
use crate::resources::ResolvedResources;
use crate::spec::{GroupDef, JobSpec, TaskDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepField {
    Name,
    Resources,
    Attributes,
    Requires,
    Task,
    Group,
}

impl Display for StepField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepField::Name => "name",
            StepField::Resources => "resources",
            StepField::Attributes => "attributes",
            StepField::Requires => "requires",
            StepField::Task => "task",
            StepField::Group => "group",
        };
        f.write_str(name)
    }
}

/// Resolved options a step is built from.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    pub name: String,
    pub resources: Option<ResolvedResources>,
    pub attributes: Option<Attributes>,
    pub requires: Option<Requires>,
    /// Task the step was created from
    pub task: Option<TaskDef>,
    /// Group the step was created from
    pub group: Option<GroupDef>,
    /// Backend specific options
    pub extra: AttributeMap,
}

impl StepOptions {
    fn has(&self, field: StepField) -> bool {
        match field {
            StepField::Name => !self.name.is_empty(),
            StepField::Resources => self.resources.is_some(),
            StepField::Attributes => self.attributes.is_some(),
            StepField::Requires => self.requires.is_some(),
            StepField::Task => self.task.is_some(),
            StepField::Group => self.group.is_some(),
        }
    }
}

/// Outcome of a successfully executed step.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StepResult {
    pub output: String,
    pub debug: Vec<String>,
}

impl StepResult {
    pub fn new(output: String) -> Self {
        StepResult {
            output,
            debug: Vec::new(),
        }
    }

    pub fn with_debug(mut self, line: String) -> Self {
        self.debug.push(line);
        self
    }
}

/// State shared by all step variants.
#[derive(Debug)]
pub struct StepBase {
    jobspec: Arc<JobSpec>,
    options: StepOptions,
    scripts: BTreeMap<String, String>,
}

impl StepBase {
    /// Checks `required` fields (resources are always required) and derives the script table.
    pub fn new(
        kind: &str,
        required: &[StepField],
        jobspec: Arc<JobSpec>,
        options: StepOptions,
    ) -> crate::Result<Self> {
        for field in std::iter::once(&StepField::Resources).chain(required) {
            if !options.has(*field) {
                return Err(JobspecError::MissingFieldError {
                    step: format!("{kind} {}", options.name),
                    field: field.to_string(),
                });
            }
        }
        let scripts = collect_scripts(&options)?;
        Ok(StepBase {
            jobspec,
            options,
            scripts,
        })
    }

    pub fn jobspec(&self) -> &JobSpec {
        &self.jobspec
    }

    pub fn options(&self) -> &StepOptions {
        &self.options
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn resources(&self) -> Option<&ResolvedResources> {
        self.options.resources.as_ref()
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        self.options.attributes.as_ref()
    }

    pub fn requires(&self) -> Option<&Requires> {
        self.options.requires.as_ref()
    }

    pub fn task(&self) -> Option<&TaskDef> {
        self.options.task.as_ref()
    }

    /// Task scripts keyed by name.
    pub fn scripts(&self) -> &BTreeMap<String, String> {
        &self.scripts
    }
}

fn collect_scripts(options: &StepOptions) -> crate::Result<BTreeMap<String, String>> {
    let mut scripts = BTreeMap::new();
    let Some(task) = &options.task else {
        return Ok(scripts);
    };
    for (i, script) in task.scripts.iter().enumerate() {
        let Some(name) = &script.name else {
            return Err(JobspecError::SpecError(format!(
                "Script {i} of {} is missing a name",
                options.name
            )));
        };
        let Some(content) = &script.content else {
            return Err(JobspecError::SpecError(format!(
                "Script {name} of {} is missing content",
                options.name
            )));
        };
        scripts.insert(name.clone(), content.clone());
    }
    Ok(scripts)
}

/// A unit of work produced by decomposition.
pub trait Step: Debug + Send + Sync {
    /// Variant identifier, e.g. `submit` or `batch`
    fn kind(&self) -> &'static str;

    fn base(&self) -> &StepBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    /// Variant specific checks, called once after construction.
    fn validate(&self) -> crate::Result<()> {
        Ok(())
    }

    /// Nested steps (tasks of a group, pre-steps of a task).
    fn steps(&self) -> &[Box<dyn Step>] {
        &[]
    }

    /// Executes the step. `stage` is the directory where files are staged and
    /// relative paths are resolved.
    fn run(&self, stage: &Path) -> crate::Result<StepResult>;
}

/// Everything a step factory receives.
pub struct StepInput {
    pub options: StepOptions,
    pub steps: Vec<Box<dyn Step>>,
}

impl StepInput {
    pub fn new(options: StepOptions) -> Self {
        StepInput {
            options,
            steps: Vec::new(),
        }
    }
}

pub type StepFactory =
    Box<dyn Fn(Arc<JobSpec>, StepInput) -> crate::Result<Box<dyn Step>> + Send + Sync>;

/// Step variants provided by one transformer.
pub struct StepTable {
    transformer: String,
    factories: Map<String, StepFactory>,
}

impl StepTable {
    pub fn new(transformer: &str) -> Self {
        StepTable {
            transformer: transformer.to_string(),
            factories: Default::default(),
        }
    }

    pub fn register_step<F>(&mut self, kind: &str, factory: F) -> crate::Result<()>
    where
        F: Fn(Arc<JobSpec>, StepInput) -> crate::Result<Box<dyn Step>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(kind) {
            return Err(JobspecError::DuplicatePluginError(format!(
                "{}/{}",
                self.transformer, kind
            )));
        }
        self.factories.insert(kind.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn has_step(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Builds and validates a step of the given kind.
    pub fn build(
        &self,
        kind: &str,
        jobspec: Arc<JobSpec>,
        input: StepInput,
    ) -> crate::Result<Box<dyn Step>> {
        let factory =
            self.factories
                .get(kind)
                .ok_or_else(|| JobspecError::StepNotFoundError {
                    transformer: self.transformer.clone(),
                    step: kind.to_string(),
                })?;
        let step = factory(jobspec, input)?;
        step.validate()?;
        Ok(step)
    }
}

impl Debug for StepTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTable")
            .field("transformer", &self.transformer)
            .field("steps", &self.kinds())
            .finish()
    }
}
