use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeMap, Attributes, Requires};
use crate::error::JobspecError;
use crate::resources::{ResourceSpec, validate_request};

/// The only supported version of the jobspec document.
pub const JOBSPEC_VERSION: u32 = 1;

fn default_one() -> u32 {
    1
}

fn is_one(value: &u32) -> bool {
    *value == 1
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandDef {
    Line(String),
    Args(Vec<String>),
}

impl CommandDef {
    pub fn is_empty(&self) -> bool {
        match self {
            CommandDef::Line(line) => line.trim().is_empty(),
            CommandDef::Args(args) => args.is_empty(),
        }
    }
}

/// A script attached to a task. Both fields are checked when the owning step is built.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScriptDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A transformer specific step attached to a task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CustomStepDef {
    pub name: String,
    #[serde(flatten)]
    pub options: AttributeMap,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,

    #[serde(default, skip_serializing_if = "AttributeMap::is_empty")]
    pub attributes: AttributeMap,

    #[serde(default, skip_serializing_if = "AttributeMap::is_empty")]
    pub requires: AttributeMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default = "default_one", skip_serializing_if = "is_one")]
    pub replicas: u32,

    #[serde(default = "default_one", skip_serializing_if = "is_one")]
    pub level: u32,

    /// Name of a group this task stands in for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScriptDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<CustomStepDef>,
}

impl TaskDef {
    pub fn resolved_name(&self, prefix: &str, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{prefix}task-{index}"))
    }

    fn validate(&self, name: &str) -> crate::Result<()> {
        if self.group.is_some() {
            return Ok(());
        }
        if self.replicas < 1 {
            return Err(JobspecError::DeserializationError(format!(
                "Task {name} has to have at least one replica"
            )));
        }
        if self.level < 1 {
            return Err(JobspecError::DeserializationError(format!(
                "Task {name} has to have a level of at least 1"
            )));
        }
        if self.command.as_ref().is_some_and(CommandDef::is_empty) {
            return Err(JobspecError::DeserializationError(format!(
                "Task {name} has an empty command"
            )));
        }
        validate_scope(name, self.resources.as_ref(), &self.attributes)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GroupDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    #[serde(default, skip_serializing_if = "AttributeMap::is_empty")]
    pub attributes: AttributeMap,

    #[serde(default, skip_serializing_if = "AttributeMap::is_empty")]
    pub requires: AttributeMap,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskDef>,
}

impl GroupDef {
    pub fn resolved_name(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("batch-{index}"))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub version: u32,

    #[serde(default, skip_serializing_if = "AttributeMap::is_empty")]
    pub requires: AttributeMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    #[serde(default, skip_serializing_if = "AttributeMap::is_empty")]
    pub attributes: AttributeMap,

    pub tasks: Vec<TaskDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupDef>,
}

fn validate_scope(
    name: &str,
    resources: Option<&ResourceSpec>,
    attributes: &AttributeMap,
) -> crate::Result<()> {
    if let Some(resources) = resources {
        for vertex in resources.vertices() {
            validate_request(vertex).map_err(|e| match e {
                JobspecError::StructuralError(msg) => {
                    JobspecError::StructuralError(format!("{name}: {msg}"))
                }
                e => e,
            })?;
        }
    }
    if let Some(duration) = attributes.get("duration") {
        if !duration.as_f64().is_some_and(|d| d >= 0.0) {
            return Err(JobspecError::DeserializationError(format!(
                "{name}: duration has to be a non-negative number"
            )));
        }
    }
    Ok(())
}

fn validate_tasks(tasks: &[TaskDef], prefix: &str) -> crate::Result<()> {
    for (i, task) in tasks.iter().enumerate() {
        task.validate(&task.resolved_name(prefix, i))?;
    }
    Ok(())
}

impl JobSpec {
    /// Parses a YAML (or JSON) document and checks its structure.
    pub fn parse(text: &str) -> crate::Result<JobSpec> {
        let jobspec: JobSpec = serde_yaml::from_str(text)?;
        jobspec.validate()?;
        Ok(jobspec)
    }

    pub fn from_file(path: &Path) -> crate::Result<JobSpec> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            JobspecError::IoError(std::io::Error::new(
                e.kind(),
                format!("Cannot read {}: {}", path.display(), e),
            ))
        })?;
        Self::parse(&text)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.version != JOBSPEC_VERSION {
            return Err(JobspecError::VersionError(format!(
                "Unsupported jobspec version {}, expected {}",
                self.version, JOBSPEC_VERSION
            )));
        }
        validate_scope("jobspec", self.resources.as_ref(), &self.attributes)?;
        validate_tasks(&self.tasks, "")?;
        let mut names = crate::Set::new();
        for (i, group) in self.groups.iter().enumerate() {
            let name = group.resolved_name(i);
            if !names.insert(name.clone()) {
                return Err(JobspecError::DeserializationError(format!(
                    "Group {name} is defined multiple times"
                )));
            }
            validate_scope(&name, group.resources.as_ref(), &group.attributes)?;
            validate_tasks(&group.tasks, &format!("{name}-"))?;
        }
        Ok(())
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::new(self.attributes.clone())
    }

    pub fn requires(&self) -> Requires {
        Requires::new(self.requires.clone())
    }
}
