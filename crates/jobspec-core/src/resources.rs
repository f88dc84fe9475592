use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::JobspecError;

pub type ResourceCount = u64;

/// Named resources visible from a scope, keyed by name.
pub type NamedResources = BTreeMap<String, ResourceVertex>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Node,
    Slot,
    Core,
    Gpu,
}

impl ResourceKind {
    pub fn is_leaf(&self) -> bool {
        matches!(self, ResourceKind::Core | ResourceKind::Gpu)
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Node => "node",
            ResourceKind::Slot => "slot",
            ResourceKind::Core => "core",
            ResourceKind::Gpu => "gpu",
        };
        f.write_str(name)
    }
}

/// One vertex of a resource request tree.
///
/// Counts of children are relative to the parent: `node(2) > slot(1) > core(4)`
/// means two nodes, each with one slot of four cores.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResourceVertex {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub count: ResourceCount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive: bool,
    #[serde(default, rename = "with", skip_serializing_if = "Vec::is_empty")]
    pub with: Vec<ResourceVertex>,
}

impl ResourceVertex {
    fn new(kind: ResourceKind, count: ResourceCount) -> Self {
        ResourceVertex {
            kind,
            count,
            unit: None,
            label: None,
            exclusive: false,
            with: Vec::new(),
        }
    }

    pub fn node(count: ResourceCount, child: ResourceVertex) -> Self {
        let mut vertex = Self::new(ResourceKind::Node, count);
        vertex.with.push(child);
        vertex
    }

    pub fn slot(count: ResourceCount, label: &str, children: Vec<ResourceVertex>) -> Self {
        let mut vertex = Self::new(ResourceKind::Slot, count);
        vertex.label = Some(label.to_string());
        vertex.with = children;
        vertex
    }

    pub fn core(count: ResourceCount) -> Self {
        Self::new(ResourceKind::Core, count)
    }

    pub fn gpu(count: ResourceCount) -> Self {
        Self::new(ResourceKind::Gpu, count)
    }

    /// Finds a slot with the given label in this tree.
    pub fn find_slot(&self, label: &str) -> Option<&ResourceVertex> {
        if self.kind == ResourceKind::Slot && self.label.as_deref() == Some(label) {
            return Some(self);
        }
        self.with.iter().find_map(|child| child.find_slot(label))
    }
}

impl Display for ResourceVertex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(label) = &self.label {
            write!(f, "({label})")?;
        }
        write!(f, "[{}]", self.count)?;
        match self.with.as_slice() {
            [] => Ok(()),
            [child] => write!(f, " > {child}"),
            children => {
                f.write_str(" > (")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Resources as written in a jobspec document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ResourceSpec {
    /// Reference to a named resource of an enclosing scope
    Name(String),
    Vertex(ResourceVertex),
    /// Named resources offered to nested scopes
    Named(NamedResources),
}

impl ResourceSpec {
    pub fn vertices(&self) -> Box<dyn Iterator<Item = &ResourceVertex> + '_> {
        match self {
            ResourceSpec::Name(_) => Box::new(std::iter::empty()),
            ResourceSpec::Vertex(vertex) => Box::new(std::iter::once(vertex)),
            ResourceSpec::Named(named) => Box::new(named.values()),
        }
    }
}

fn structural<T>(vertex: &ResourceVertex, message: &str) -> crate::Result<T> {
    Err(JobspecError::StructuralError(format!(
        "{} vertex {}",
        vertex.kind, message
    )))
}

/// Checks the kind, arity and label rules of a resource tree.
pub fn validate_tree(vertex: &ResourceVertex) -> crate::Result<()> {
    if vertex.count == 0 {
        return structural(vertex, "has to have a count of at least 1");
    }
    if vertex.kind != ResourceKind::Slot {
        if vertex.label.is_some() {
            return structural(vertex, "cannot have a label");
        }
        if vertex.exclusive {
            return structural(vertex, "cannot be exclusive");
        }
    }
    match vertex.kind {
        ResourceKind::Node => {
            if vertex.with.len() != 1 {
                return structural(
                    vertex,
                    &format!(
                        "has to have exactly one child vertex, found {}",
                        vertex.with.len()
                    ),
                );
            }
            if vertex.with[0].kind == ResourceKind::Node {
                return structural(vertex, "cannot contain another node");
            }
        }
        ResourceKind::Slot => {
            if vertex.label.as_deref().is_none_or(str::is_empty) {
                return structural(vertex, "has to have a label");
            }
            if !(1..=2).contains(&vertex.with.len()) {
                return structural(
                    vertex,
                    &format!(
                        "has to have one or two child vertices, found {}",
                        vertex.with.len()
                    ),
                );
            }
            if vertex.with.iter().any(|child| !child.kind.is_leaf()) {
                return structural(vertex, "can only contain core or gpu vertices");
            }
            if vertex.with.len() == 2 && vertex.with[0].kind == vertex.with[1].kind {
                return structural(vertex, "cannot contain two vertices of the same type");
            }
        }
        ResourceKind::Core | ResourceKind::Gpu => {
            if !vertex.with.is_empty() {
                return structural(vertex, "cannot have child vertices");
            }
        }
    }
    vertex.with.iter().try_for_each(validate_tree)
}

/// Checks the tree of a request written directly in a document, which has to
/// start at a node or a slot.
pub fn validate_request(vertex: &ResourceVertex) -> crate::Result<()> {
    if vertex.kind.is_leaf() {
        return structural(vertex, "cannot be the root of a resource request");
    }
    validate_tree(vertex)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsetMismatch {
    pub kind: ResourceKind,
    pub requested: ResourceCount,
    pub available: ResourceCount,
}

/// Finds the first vertex of `kind` in the tree, together with the product of
/// counts of the levels skipped on the way.
fn find_kind(
    vertex: &ResourceVertex,
    kind: ResourceKind,
    scale: ResourceCount,
) -> Option<(&ResourceVertex, ResourceCount)> {
    if vertex.kind == kind {
        return Some((vertex, scale));
    }
    let scale = scale.saturating_mul(vertex.count);
    vertex
        .with
        .iter()
        .find_map(|child| find_kind(child, kind, scale))
}

fn check_aligned(
    parent: &ResourceVertex,
    scale: ResourceCount,
    child: &ResourceVertex,
) -> Result<(), SubsetMismatch> {
    let available = parent.count.saturating_mul(scale);
    if child.count > available {
        return Err(SubsetMismatch {
            kind: child.kind,
            requested: child.count,
            available,
        });
    }
    for grandchild in &child.with {
        match parent
            .with
            .iter()
            .find_map(|c| find_kind(c, grandchild.kind, 1))
        {
            Some((vertex, scale)) => check_aligned(vertex, scale, grandchild)?,
            None => {
                return Err(SubsetMismatch {
                    kind: grandchild.kind,
                    requested: grandchild.count,
                    available: 0,
                });
            }
        }
    }
    Ok(())
}

/// Checks that `child` can be satisfied within `parent`, returning the first
/// vertex that does not fit.
pub fn check_subset(parent: &ResourceVertex, child: &ResourceVertex) -> Result<(), SubsetMismatch> {
    match find_kind(parent, child.kind, 1) {
        Some((vertex, scale)) => check_aligned(vertex, scale, child),
        None => Err(SubsetMismatch {
            kind: child.kind,
            requested: child.count,
            available: 0,
        }),
    }
}

pub fn is_subset(parent: &ResourceVertex, child: &ResourceVertex) -> bool {
    check_subset(parent, child).is_ok()
}

/// Resources visible at one level of the task/group tree.
#[derive(Debug, Clone, Default)]
pub struct ResourceScope {
    envelope: Option<ResourceVertex>,
    named: NamedResources,
}

impl ResourceScope {
    /// Creates the outermost scope from the jobspec resources.
    pub fn global(spec: Option<&ResourceSpec>) -> crate::Result<Self> {
        match spec {
            None => Ok(Self::default()),
            Some(ResourceSpec::Name(name)) => Err(JobspecError::UnknownResourceError {
                name: "jobspec".to_string(),
                resource: name.clone(),
            }),
            Some(ResourceSpec::Vertex(vertex)) => Ok(ResourceScope {
                envelope: Some(vertex.clone()),
                named: Default::default(),
            }),
            Some(ResourceSpec::Named(named)) => Ok(ResourceScope {
                envelope: None,
                named: named.clone(),
            }),
        }
    }

    pub fn envelope(&self) -> Option<&ResourceVertex> {
        self.envelope.as_ref()
    }

    pub fn named(&self) -> &NamedResources {
        &self.named
    }

    fn fit(&self, owner: &str, vertex: &ResourceVertex) -> crate::Result<()> {
        if let Some(envelope) = &self.envelope {
            check_subset(envelope, vertex).map_err(|mismatch| {
                JobspecError::ResourceSubsetError {
                    name: owner.to_string(),
                    kind: mismatch.kind,
                    requested: mismatch.requested,
                    available: mismatch.available,
                }
            })?;
        }
        Ok(())
    }

    fn lookup(&self, owner: &str, name: &str) -> crate::Result<&ResourceVertex> {
        self.named
            .get(name)
            .ok_or_else(|| JobspecError::UnknownResourceError {
                name: owner.to_string(),
                resource: name.to_string(),
            })
    }

    /// Resolves resources of a nested scope (a group) against this scope.
    pub fn nest(&self, owner: &str, spec: Option<&ResourceSpec>) -> crate::Result<ResourceScope> {
        match spec {
            None => Ok(self.clone()),
            Some(ResourceSpec::Name(name)) => {
                let vertex = self.lookup(owner, name)?;
                self.fit(owner, vertex)?;
                Ok(ResourceScope {
                    envelope: Some(vertex.clone()),
                    named: self.named.clone(),
                })
            }
            Some(ResourceSpec::Vertex(vertex)) => {
                self.fit(owner, vertex)?;
                Ok(ResourceScope {
                    envelope: Some(vertex.clone()),
                    named: self.named.clone(),
                })
            }
            Some(ResourceSpec::Named(named)) => {
                let mut scope = self.clone();
                scope
                    .named
                    .extend(named.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(scope)
            }
        }
    }

    /// Resolves resources of a task against this scope.
    pub fn resolve_task(
        &self,
        owner: &str,
        spec: Option<&ResourceSpec>,
        slot: Option<&str>,
    ) -> crate::Result<ResolvedResources> {
        if let Some(ResourceSpec::Named(_)) = spec {
            return Err(JobspecError::StructuralError(format!(
                "Task {owner} cannot define named resources"
            )));
        }
        let scope = self.nest(owner, spec)?;
        if let Some(label) = slot {
            let found = scope
                .envelope
                .as_ref()
                .and_then(|vertex| vertex.find_slot(label));
            if found.is_none() {
                return Err(JobspecError::UnknownSlotError {
                    name: owner.to_string(),
                    label: label.to_string(),
                });
            }
        }
        Ok(ResolvedResources {
            vertex: scope.envelope,
            slot: slot.map(|s| s.to_string()),
        })
    }

    pub fn resolved(&self) -> ResolvedResources {
        ResolvedResources {
            vertex: self.envelope.clone(),
            slot: None,
        }
    }
}

/// Scalar counts of a resource tree, in the shape scheduler command lines use.
///
/// `slots` is the total number of slots, `cores` and `gpus` are per slot
/// (or per node when the tree has no slot).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlatResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<ResourceCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots: Option<ResourceCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<ResourceCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<ResourceCount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlattenError {
    UnknownSlot,
    Underivable,
}

fn set_leaf(flat: &mut FlatResources, vertex: &ResourceVertex) {
    match vertex.kind {
        ResourceKind::Core => flat.cores = Some(vertex.count),
        ResourceKind::Gpu => flat.gpus = Some(vertex.count),
        ResourceKind::Node | ResourceKind::Slot => {}
    }
}

fn flatten_from(vertex: &ResourceVertex, nodes: Option<ResourceCount>) -> FlatResources {
    let mut flat = FlatResources {
        nodes,
        ..Default::default()
    };
    match vertex.kind {
        ResourceKind::Node => {
            let mut flat = vertex
                .with
                .first()
                .map(|child| flatten_from(child, Some(vertex.count)))
                .unwrap_or_default();
            flat.nodes = Some(vertex.count);
            return flat;
        }
        ResourceKind::Slot => {
            flat.slots = Some(vertex.count.saturating_mul(nodes.unwrap_or(1)));
            for child in &vertex.with {
                set_leaf(&mut flat, child);
            }
        }
        ResourceKind::Core | ResourceKind::Gpu => set_leaf(&mut flat, vertex),
    }
    flat
}

/// Collapses a resource tree into scalar counts.
///
/// With a `label`, counting starts at the slot with that label.
pub fn flatten_slot(
    vertex: &ResourceVertex,
    label: Option<&str>,
) -> Result<FlatResources, FlattenError> {
    let flat = match label {
        None => flatten_from(vertex, None),
        Some(label) => {
            let slot = vertex.find_slot(label).ok_or(FlattenError::UnknownSlot)?;
            let nodes = (vertex.kind == ResourceKind::Node).then_some(vertex.count);
            flatten_from(slot, nodes)
        }
    };
    if flat.nodes.is_none() && flat.cores.is_none() {
        return Err(FlattenError::Underivable);
    }
    Ok(flat)
}

/// Resources bound to a step.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedResources {
    pub vertex: Option<ResourceVertex>,
    pub slot: Option<String>,
}

impl ResolvedResources {
    pub fn is_empty(&self) -> bool {
        self.vertex.is_none()
    }

    pub fn flatten(&self, owner: &str) -> crate::Result<FlatResources> {
        let vertex = self
            .vertex
            .as_ref()
            .ok_or_else(|| JobspecError::UnderivableResourcesError(owner.to_string()))?;
        flatten_slot(vertex, self.slot.as_deref()).map_err(|e| match e {
            FlattenError::UnknownSlot => JobspecError::UnknownSlotError {
                name: owner.to_string(),
                label: self.slot.clone().unwrap_or_default(),
            },
            FlattenError::Underivable => JobspecError::UnderivableResourcesError(owner.to_string()),
        })
    }
}

impl Display for ResolvedResources {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.vertex {
            None => f.write_str("-"),
            Some(vertex) => {
                write!(f, "{vertex}")?;
                if let Some(slot) = &self.slot {
                    write!(f, " @{slot}")?;
                }
                Ok(())
            }
        }
    }
}
