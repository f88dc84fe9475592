pub mod attributes;
pub mod error;
pub mod resources;
pub mod spec;
pub mod step;
pub mod transformer;
pub mod workload;

#[cfg(test)]
pub(crate) mod tests;

pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;

pub type Error = error::JobspecError;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::attributes::{AttributeMap, Attributes, Requires};
pub use crate::resources::{
    FlatResources, ResolvedResources, ResourceCount, ResourceKind, ResourceSpec, ResourceVertex,
};
pub use crate::spec::{CommandDef, GroupDef, JobSpec, TaskDef};
pub use crate::step::{Step, StepBase, StepField, StepInput, StepOptions, StepResult, StepTable};
pub use crate::transformer::{Transformer, TransformerConfig, TransformerRegistry};
pub use crate::workload::{Workload, decompose};
