use std::path::Path;
use std::sync::Arc;

use crate::Set;
use crate::attributes::{Attributes, Requires};
use crate::error::JobspecError;
use crate::resources::ResourceScope;
use crate::spec::{GroupDef, JobSpec, TaskDef};
use crate::step::{Step, StepInput, StepOptions, StepResult, StepTable};

/// Kind of the step created for a regular task
pub const SUBMIT_STEP: &str = "submit";
/// Kind of the step created for a group
pub const BATCH_STEP: &str = "batch";

/// Groups of a jobspec that were not yet referenced, in declaration order.
#[derive(Debug, Default)]
pub struct GroupLookup {
    groups: Vec<(String, GroupDef)>,
}

impl GroupLookup {
    pub fn new(groups: &[GroupDef]) -> Self {
        GroupLookup {
            groups: groups
                .iter()
                .enumerate()
                .map(|(i, group)| (group.resolved_name(i), group.clone()))
                .collect(),
        }
    }

    /// Removes the group from the lookup, a group can be used only once.
    pub fn take(&mut self, name: &str) -> Option<GroupDef> {
        let index = self.groups.iter().position(|(n, _)| n == name)?;
        Some(self.groups.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn names(&self) -> Vec<String> {
        self.groups.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Names of groups referenced by tasks of the groups in the lookup.
    fn nested_references(&self) -> Set<String> {
        fn collect(tasks: &[TaskDef], out: &mut Set<String>) {
            for task in tasks {
                if let Some(group) = &task.group {
                    out.insert(group.clone());
                }
            }
        }
        let mut references = Set::new();
        for (_, group) in &self.groups {
            collect(&group.tasks, &mut references);
        }
        references
    }
}

/// Resources, attributes and requirements inherited by nested tasks.
#[derive(Clone)]
struct Scope {
    resources: ResourceScope,
    attributes: Attributes,
    requires: Requires,
}

struct Decomposer<'a> {
    jobspec: Arc<JobSpec>,
    table: &'a StepTable,
    groups: GroupLookup,
}

impl Decomposer<'_> {
    fn parse_tasks(
        &mut self,
        tasks: &[TaskDef],
        scope: &Scope,
        prefix: &str,
    ) -> crate::Result<Vec<Box<dyn Step>>> {
        let mut steps = Vec::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            let name = task.resolved_name(prefix, i);
            let step = match &task.group {
                Some(group_name) => {
                    let group = self.groups.take(group_name).ok_or_else(|| {
                        JobspecError::UnresolvedGroupError {
                            task: name.clone(),
                            group: group_name.clone(),
                        }
                    })?;
                    self.parse_group(&group, group_name, scope)?
                }
                None => self.parse_task(task, name, scope)?,
            };
            steps.push(step);
        }
        Ok(steps)
    }

    fn parse_task(
        &self,
        task: &TaskDef,
        name: String,
        scope: &Scope,
    ) -> crate::Result<Box<dyn Step>> {
        let resources =
            scope
                .resources
                .resolve_task(&name, task.resources.as_ref(), task.slot.as_deref())?;
        let attributes = scope.attributes.inherit(&task.attributes);
        let requires = scope.requires.inherit(&task.requires);

        let options = StepOptions {
            name,
            resources: Some(resources),
            attributes: Some(attributes),
            requires: Some(requires),
            task: Some(task.clone()),
            group: None,
            extra: Default::default(),
        };

        // Custom steps of a task run before the task is submitted
        let mut pre_steps = Vec::with_capacity(task.steps.len());
        for custom in &task.steps {
            let mut step_options = options.clone();
            step_options.name = format!("{}-{}", options.name, custom.name);
            step_options.extra = custom.options.clone();
            pre_steps.push(self.table.build(
                &custom.name,
                self.jobspec.clone(),
                StepInput::new(step_options),
            )?);
        }

        log::debug!("Task {} decomposed into a submit step", options.name);
        self.table.build(
            SUBMIT_STEP,
            self.jobspec.clone(),
            StepInput {
                options,
                steps: pre_steps,
            },
        )
    }

    fn parse_group(
        &mut self,
        group: &GroupDef,
        name: &str,
        parent: &Scope,
    ) -> crate::Result<Box<dyn Step>> {
        let scope = Scope {
            resources: parent.resources.nest(name, group.resources.as_ref())?,
            attributes: parent.attributes.inherit(&group.attributes),
            requires: parent.requires.inherit(&group.requires),
        };
        let steps = self.parse_tasks(&group.tasks, &scope, &format!("{name}-"))?;

        log::debug!(
            "Group {name} decomposed into a batch step with {} nested step(s)",
            steps.len()
        );
        let options = StepOptions {
            name: name.to_string(),
            resources: Some(scope.resources.resolved()),
            attributes: Some(scope.attributes),
            requires: Some(scope.requires),
            task: None,
            group: Some(group.clone()),
            extra: Default::default(),
        };
        self.table.build(
            BATCH_STEP,
            self.jobspec.clone(),
            StepInput { options, steps },
        )
    }
}

/// Ordered steps produced from one jobspec.
#[derive(Debug)]
pub struct Workload {
    steps: Vec<Box<dyn Step>>,
    groups: GroupLookup,
}

impl Workload {
    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Groups that were not turned into steps, always empty after decomposition.
    pub fn unconsumed_groups(&self) -> &GroupLookup {
        &self.groups
    }

    /// Runs the steps one by one in workload order, stopping at the first failure.
    pub fn run(&self, stage: &Path) -> crate::Result<Vec<StepResult>> {
        Ok(self
            .run_steps(stage)?
            .into_iter()
            .map(|(_, result)| result)
            .collect())
    }

    /// Same as [`Workload::run`], every result is paired with its step.
    pub fn run_steps(&self, stage: &Path) -> crate::Result<Vec<(&dyn Step, StepResult)>> {
        let mut results = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            results.push((step.as_ref(), run_step(step.as_ref(), stage)?));
        }
        Ok(results)
    }
}

pub fn run_step(step: &dyn Step, stage: &Path) -> crate::Result<StepResult> {
    log::info!("Running {} step {}", step.kind(), step.name());
    let result = step.run(stage).inspect_err(|e| {
        log::error!("Step {} failed: {e}", step.name());
    })?;
    if !result.output.is_empty() {
        log::info!("{} {}: {}", step.kind(), step.name(), result.output.trim());
    }
    for line in &result.debug {
        log::debug!("{}: {line}", step.name());
    }
    Ok(result)
}

/// Turns a jobspec into an ordered list of steps built from `table`.
///
/// Top level tasks keep their declaration order, groups that no task referenced
/// follow in their declaration order.
pub fn decompose(jobspec: Arc<JobSpec>, table: &StepTable) -> crate::Result<Workload> {
    let scope = Scope {
        resources: ResourceScope::global(jobspec.resources.as_ref())?,
        attributes: jobspec.attributes(),
        requires: jobspec.requires(),
    };
    let mut decomposer = Decomposer {
        jobspec: jobspec.clone(),
        table,
        groups: GroupLookup::new(&jobspec.groups),
    };

    let mut steps = if jobspec.tasks.is_empty() {
        Vec::new()
    } else {
        decomposer.parse_tasks(&jobspec.tasks, &scope, "")?
    };

    // Groups referenced from other groups are expanded where they are referenced
    let nested = decomposer.groups.nested_references();
    let (roots, rest): (Vec<_>, Vec<_>) = decomposer
        .groups
        .names()
        .into_iter()
        .partition(|name| !nested.contains(name));
    for name in roots.into_iter().chain(rest) {
        if let Some(group) = decomposer.groups.take(&name) {
            steps.push(decomposer.parse_group(&group, &name, &scope)?);
        }
    }

    log::debug!("Jobspec decomposed into {} step(s)", steps.len());
    Ok(Workload {
        steps,
        groups: decomposer.groups,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resources::{FlatResources, ResourceKind};
    use crate::tests::utils::{recording_table, step_names};

    fn decompose_str(text: &str) -> crate::Result<Workload> {
        let js = JobSpec::parse(text).unwrap();
        decompose(Arc::new(js), &recording_table())
    }

    const SCENARIO_A: &str = r#"
version: 1
tasks:
  - name: a
    command: hostname
    resources:
      type: node
      count: 2
      with:
        - type: slot
          count: 1
          label: s
          with:
            - type: core
              count: 4
"#;

    #[test]
    fn test_single_task() {
        let workload = decompose_str(SCENARIO_A).unwrap();
        assert_eq!(workload.len(), 1);
        let step = &workload.steps()[0];
        assert_eq!(step.kind(), "submit");
        assert_eq!(step.name(), "a");
        let flat = step.base().resources().unwrap().flatten("a").unwrap();
        assert_eq!(flat.nodes, Some(2));
        assert_eq!(flat.cores, Some(4));
        assert!(workload.unconsumed_groups().is_empty());
    }

    #[test]
    fn test_task_exceeds_global_resources() {
        let r = decompose_str(
            r#"
version: 1
resources:
  type: node
  count: 2
  with:
    - type: slot
      count: 1
      label: s
      with:
        - type: core
          count: 4
tasks:
  - name: a
    command: hostname
    resources:
      type: node
      count: 3
      with:
        - type: slot
          count: 1
          label: s
          with:
            - type: core
              count: 4
"#,
        );
        match r {
            Err(JobspecError::ResourceSubsetError {
                name,
                kind,
                requested,
                available,
            }) => {
                assert_eq!(name, "a");
                assert_eq!(kind, ResourceKind::Node);
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_group_reference() {
        let workload = decompose_str(
            r#"
version: 1
tasks:
  - name: first
    command: hostname
  - group: g1
groups:
  - name: g1
    resources:
      type: node
      count: 1
      with:
        - type: core
          count: 2
    tasks:
      - command: ["echo", "one"]
      - command: ["echo", "two"]
"#,
        )
        .unwrap();
        assert_eq!(step_names(&workload), vec!["first", "g1"]);
        let batch = &workload.steps()[1];
        assert_eq!(batch.kind(), "batch");
        let nested: Vec<_> = batch.steps().iter().map(|s| (s.kind(), s.name())).collect();
        assert_eq!(
            nested,
            vec![("submit", "g1-task-0"), ("submit", "g1-task-1")]
        );
        let flat = batch.steps()[0]
            .base()
            .resources()
            .unwrap()
            .flatten("g1-task-0")
            .unwrap();
        assert_eq!(
            flat,
            FlatResources {
                nodes: Some(1),
                cores: Some(2),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_unreferenced_groups_appended_in_order() {
        let workload = decompose_str(
            r#"
version: 1
tasks:
  - name: a
    command: hostname
  - group: g1
  - name: b
    command: hostname
groups:
  - name: g2
  - name: g1
  - tasks:
      - command: hostname
"#,
        )
        .unwrap();
        assert_eq!(step_names(&workload), vec!["a", "g1", "b", "g2", "batch-2"]);
        assert_eq!(workload.steps()[3].kind(), "batch");
        assert_eq!(workload.steps()[4].steps()[0].name(), "batch-2-task-0");
    }

    #[test]
    fn test_group_used_twice() {
        let r = decompose_str(
            r#"
version: 1
tasks:
  - name: x
    group: g
  - name: y
    group: g
groups:
  - name: g
"#,
        );
        assert!(matches!(
            r,
            Err(JobspecError::UnresolvedGroupError { task, group }) if task == "y" && group == "g"
        ));
    }

    #[test]
    fn test_missing_group() {
        let r = decompose_str(
            r#"
version: 1
tasks:
  - group: nope
"#,
        );
        assert!(matches!(
            r,
            Err(JobspecError::UnresolvedGroupError { task, .. }) if task == "task-0"
        ));
    }

    #[test]
    fn test_nested_group_reference() {
        let workload = decompose_str(
            r#"
version: 1
tasks:
  - group: outer
groups:
  - name: inner
    tasks:
      - command: hostname
  - name: outer
    tasks:
      - group: inner
      - command: hostname
"#,
        )
        .unwrap();
        assert_eq!(step_names(&workload), vec!["outer"]);
        let outer = &workload.steps()[0];
        let nested: Vec<_> = outer.steps().iter().map(|s| s.name()).collect();
        assert_eq!(nested, vec!["inner", "outer-task-1"]);
        assert_eq!(outer.steps()[0].steps()[0].name(), "inner-task-0");
    }

    #[test]
    fn test_unreferenced_group_expands_nested_reference() {
        let workload = decompose_str(
            r#"
version: 1
tasks: []
groups:
  - name: inner
    tasks:
      - command: hostname
  - name: outer
    tasks:
      - group: inner
"#,
        )
        .unwrap();
        assert_eq!(step_names(&workload), vec!["outer"]);
        assert_eq!(workload.steps()[0].steps()[0].name(), "inner");
    }

    #[test]
    fn test_attribute_inheritance() {
        let workload = decompose_str(
            r#"
version: 1
attributes:
  cwd: /global
  duration: 100
requires:
  os: linux
tasks:
  - name: a
    command: hostname
    attributes:
      duration: 10
  - group: g
groups:
  - name: g
    attributes:
      cwd: /group
    requires:
      arch: x86_64
    tasks:
      - name: b
        command: hostname
        requires:
          os: any
"#,
        )
        .unwrap();
        let a = workload.steps()[0].base();
        assert_eq!(a.attributes().unwrap().cwd(), Some("/global"));
        assert_eq!(a.attributes().unwrap().duration().unwrap().as_secs(), 10);

        let b = workload.steps()[1].steps()[0].base();
        assert_eq!(b.attributes().unwrap().cwd(), Some("/group"));
        assert_eq!(b.attributes().unwrap().duration().unwrap().as_secs(), 100);
        let requires = b.requires().unwrap().as_map();
        assert_eq!(requires.get("os").unwrap(), "any");
        assert_eq!(requires.get("arch").unwrap(), "x86_64");
    }

    #[test]
    fn test_group_resources_bound_tasks() {
        let r = decompose_str(
            r#"
version: 1
tasks: []
groups:
  - name: g
    resources:
      type: node
      count: 1
      with:
        - type: slot
          count: 1
          label: s
          with:
            - type: core
              count: 2
    tasks:
      - name: big
        command: hostname
        resources:
          type: slot
          count: 1
          label: s
          with:
            - type: core
              count: 8
"#,
        );
        assert!(matches!(
            r,
            Err(JobspecError::ResourceSubsetError { name, requested: 8, available: 2, .. }) if name == "big"
        ));
    }

    #[test]
    fn test_named_resources() {
        let workload = decompose_str(
            r#"
version: 1
resources:
  small:
    type: slot
    count: 1
    label: s
    with:
      - type: core
        count: 1
tasks:
  - name: a
    command: hostname
    resources: small
"#,
        )
        .unwrap();
        let resources = workload.steps()[0].base().resources().unwrap();
        assert_eq!(resources.vertex.as_ref().unwrap().kind, ResourceKind::Slot);
    }

    #[test]
    fn test_custom_steps_become_pre_steps() {
        let workload = decompose_str(
            r#"
version: 1
tasks:
  - name: a
    command: ["bash", "run.sh"]
    scripts:
      - name: run.sh
        content: hostname
    steps:
      - name: stage
"#,
        )
        .unwrap();
        let submit = &workload.steps()[0];
        assert_eq!(submit.steps().len(), 1);
        assert_eq!(submit.steps()[0].kind(), "stage");
        assert_eq!(submit.steps()[0].name(), "a-stage");
    }

    #[test]
    fn test_unknown_custom_step() {
        let r = decompose_str(
            r#"
version: 1
tasks:
  - name: a
    command: hostname
    steps:
      - name: teleport
"#,
        );
        assert!(matches!(r, Err(JobspecError::StepNotFoundError { step, .. }) if step == "teleport"));
    }

    #[test]
    fn test_script_without_content_fails_before_run() {
        let r = decompose_str(
            r#"
version: 1
tasks:
  - name: a
    command: ["bash", "setup.sh"]
    scripts:
      - name: setup.sh
"#,
        );
        assert!(matches!(r, Err(JobspecError::SpecError(_))));
    }

    #[test]
    fn test_decompose_idempotent() {
        let js = Arc::new(JobSpec::parse(SCENARIO_A).unwrap());
        let table = recording_table();
        let first = decompose(js.clone(), &table).unwrap();
        let second = decompose(js, &table).unwrap();
        assert_eq!(step_names(&first), step_names(&second));
        for (a, b) in first.steps().iter().zip(second.steps()) {
            assert_eq!(a.base().resources(), b.base().resources());
            assert_eq!(a.base().attributes(), b.base().attributes());
        }
    }

    #[test]
    fn test_run_in_order() {
        let workload = decompose_str(
            r#"
version: 1
tasks:
  - name: a
    command: hostname
  - name: b
    command: hostname
groups:
  - name: g
"#,
        )
        .unwrap();
        let results = workload.run(Path::new("/tmp")).unwrap();
        let outputs: Vec<_> = results.iter().map(|r| r.output.as_str()).collect();
        assert_eq!(outputs, vec!["submit a", "submit b", "batch g"]);
    }

    #[test]
    fn test_run_steps_pairs_results() {
        let workload = decompose_str(
            r#"
version: 1
tasks:
  - name: a
    command: hostname
groups:
  - name: g
"#,
        )
        .unwrap();
        let results = workload.run_steps(Path::new("/tmp")).unwrap();
        let pairs: Vec<_> = results
            .iter()
            .map(|(step, result)| (step.name(), result.output.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "submit a"), ("g", "batch g")]);
    }

    #[test]
    fn test_run_stops_at_failure() {
        let workload = decompose_str(
            r#"
version: 1
tasks:
  - name: a
    command: hostname
  - name: fail
    command: hostname
  - name: c
    command: hostname
"#,
        )
        .unwrap();
        let r = workload.run(Path::new("/tmp"));
        assert!(matches!(
            r,
            Err(JobspecError::ExecutionError { step, retriable: false, .. }) if step == "fail"
        ));
    }
}
