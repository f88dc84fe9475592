use std::path::{Component, Path};
use std::sync::Arc;

use jobspec_core::JobSpec;
use jobspec_core::error::JobspecError;
use jobspec_core::step::{Step, StepBase, StepField, StepInput, StepResult};

use crate::transformer::session::CommandSession;

pub const STAGE_STEP: &str = "stage";

/// Writes the scripts of a task into the stage directory.
///
/// An optional `directory` option places them into a subdirectory of the stage.
#[derive(Debug)]
pub struct StageStep {
    base: StepBase,
    session: Arc<CommandSession>,
}

impl StageStep {
    pub fn new(
        session: Arc<CommandSession>,
        jobspec: Arc<JobSpec>,
        input: StepInput,
    ) -> jobspec_core::Result<Self> {
        Ok(Self {
            base: StepBase::new(STAGE_STEP, &[StepField::Task], jobspec, input.options)?,
            session,
        })
    }

    fn directory(&self) -> Option<&str> {
        self.base
            .options()
            .extra
            .get("directory")
            .and_then(|v| v.as_str())
    }
}

impl Step for StageStep {
    fn kind(&self) -> &'static str {
        STAGE_STEP
    }

    fn base(&self) -> &StepBase {
        &self.base
    }

    fn validate(&self) -> jobspec_core::Result<()> {
        for name in self.base.scripts().keys() {
            if !is_plain_relative(name) {
                return Err(JobspecError::SpecError(format!(
                    "Script {name} of {} has to be a relative path inside the stage",
                    self.name()
                )));
            }
        }
        if let Some(directory) = self.directory() {
            if !is_plain_relative(directory) {
                return Err(JobspecError::SpecError(format!(
                    "Stage directory of {} has to be relative to the stage: {directory}",
                    self.name()
                )));
            }
        }
        Ok(())
    }

    fn run(&self, stage: &Path) -> jobspec_core::Result<StepResult> {
        let target = match self.directory() {
            Some(directory) => stage.join(directory),
            None => stage.to_path_buf(),
        };
        let mut result = StepResult::new(format!(
            "Staged {} file(s) into {}",
            self.base.scripts().len(),
            target.display()
        ));
        for (name, content) in self.base.scripts() {
            let path = target.join(name);
            self.session.write_file(&path, content, true)?;
            result = result.with_debug(format!("Written {}", path.display()));
        }
        Ok(result)
    }
}

/// True for a non-empty relative path made only of normal components.
fn is_plain_relative(path: &str) -> bool {
    let path = Path::new(path);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

pub fn create_stage_step(
    session: Arc<CommandSession>,
) -> impl Fn(Arc<JobSpec>, StepInput) -> jobspec_core::Result<Box<dyn Step>> + Send + Sync + 'static
{
    move |jobspec, input| {
        Ok(Box::new(StageStep::new(session.clone(), jobspec, input)?) as Box<dyn Step>)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jobspec_core::error::JobspecError;
    use jobspec_core::step::{StepInput, StepOptions, StepTable};
    use jobspec_core::{JobSpec, TaskDef, TransformerConfig};

    use super::{STAGE_STEP, create_stage_step};
    use crate::transformer::session::CommandSession;

    fn stage_options(extra: serde_json::Value) -> StepOptions {
        options_with_scripts(
            serde_json::json!([
                {"name": "run.sh", "content": "#!/bin/bash\nhostname\n"},
                {"name": "setup.sh", "content": "echo setup\n"}
            ]),
            extra,
        )
    }

    fn options_with_scripts(scripts: serde_json::Value, extra: serde_json::Value) -> StepOptions {
        let task: TaskDef = serde_json::from_value(serde_json::json!({
            "command": ["bash", "run.sh"],
            "scripts": scripts
        }))
        .unwrap();
        StepOptions {
            name: "a-stage".to_string(),
            resources: Some(Default::default()),
            task: Some(task),
            extra: extra.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    fn table() -> StepTable {
        let mut table = StepTable::new("test");
        let session = Arc::new(CommandSession::new(TransformerConfig::default()));
        table
            .register_step(STAGE_STEP, create_stage_step(session))
            .unwrap();
        table
    }

    fn jobspec() -> Arc<JobSpec> {
        Arc::new(JobSpec::parse("version: 1\ntasks: []").unwrap())
    }

    #[test]
    fn stage_writes_scripts() {
        let dir = tempfile::TempDir::with_prefix("jobspec").unwrap();
        let step = table()
            .build(
                STAGE_STEP,
                jobspec(),
                StepInput::new(stage_options(serde_json::json!({"directory": "bin"}))),
            )
            .unwrap();
        let result = step.run(dir.path()).unwrap();
        assert_eq!(result.debug.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("bin").join("setup.sh")).unwrap(),
            "echo setup\n"
        );
    }

    #[test]
    fn stage_refuses_escaping_directory() {
        let r = table().build(
            STAGE_STEP,
            jobspec(),
            StepInput::new(stage_options(serde_json::json!({"directory": "../x"}))),
        );
        assert!(matches!(r, Err(JobspecError::SpecError(_))));
    }

    #[test]
    fn stage_refuses_escaping_script_names() {
        for name in ["../escaped.sh", "/tmp/escaped.sh", "bin/../../escaped.sh", "./run.sh"] {
            let dir = tempfile::TempDir::with_prefix("jobspec").unwrap();
            let stage = dir.path().join("stage");
            let r = table().build(
                STAGE_STEP,
                jobspec(),
                StepInput::new(options_with_scripts(
                    serde_json::json!([{"name": name, "content": "echo escaped"}]),
                    serde_json::json!({}),
                )),
            );
            assert!(
                matches!(&r, Err(JobspecError::SpecError(msg)) if msg.contains(name)),
                "script {name} was accepted"
            );
            assert!(!dir.path().join("escaped.sh").exists());
            assert!(!stage.exists());
        }
    }

    #[test]
    fn stage_accepts_nested_script_names() {
        let dir = tempfile::TempDir::with_prefix("jobspec").unwrap();
        let step = table()
            .build(
                STAGE_STEP,
                jobspec(),
                StepInput::new(options_with_scripts(
                    serde_json::json!([{"name": "bin/run.sh", "content": "hostname"}]),
                    serde_json::json!({}),
                )),
            )
            .unwrap();
        step.run(dir.path()).unwrap();
        assert!(dir.path().join("bin").join("run.sh").is_file());
    }
}
