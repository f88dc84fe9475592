use thiserror::Error;

use crate::resources::ResourceKind;

#[derive(Debug, Error)]
pub enum JobspecError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Version error: {0}")]
    VersionError(String),
    #[error("Invalid resources: {0}")]
    StructuralError(String),
    #[error("Task {task} is looking for group {group} that is not defined")]
    UnresolvedGroupError { task: String, group: String },
    #[error(
        "Resources of {name} do not fit into the parent scope: requested {requested} {kind}(s), available {available}"
    )]
    ResourceSubsetError {
        name: String,
        kind: ResourceKind,
        requested: u64,
        available: u64,
    },
    #[error("{name} references unknown resources {resource}")]
    UnknownResourceError { name: String, resource: String },
    #[error("{name} targets slot {label} that is not present in its resources")]
    UnknownSlotError { name: String, label: String },
    #[error("Cannot derive a node or core count from resources of {0}")]
    UnderivableResourcesError(String),
    #[error("Step {step} is missing field {field}")]
    MissingFieldError { step: String, field: String },
    #[error("Invalid jobspec: {0}")]
    SpecError(String),
    #[error("Transformer {0} is already registered")]
    DuplicatePluginError(String),
    #[error("Transformer {0} is not registered")]
    PluginNotFoundError(String),
    #[error("Step {step} is not provided by transformer {transformer}")]
    StepNotFoundError { transformer: String, step: String },
    #[error("Step {step} failed: {message}")]
    ExecutionError {
        step: String,
        message: String,
        retriable: bool,
    },
}

impl JobspecError {
    /// Returns true if repeating the failed operation may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            JobspecError::ExecutionError { retriable, .. } => *retriable,
            JobspecError::IoError(_) => true,
            _ => false,
        }
    }
}

impl From<serde_yaml::Error> for JobspecError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::DeserializationError(e.to_string())
    }
}

impl From<serde_json::error::Error> for JobspecError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
