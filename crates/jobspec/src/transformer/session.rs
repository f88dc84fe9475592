use std::path::Path;
use std::process::{Command, Output};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bstr::ByteSlice;
use jobspec_core::error::JobspecError;
use jobspec_core::{Map, TransformerConfig};

use crate::transformer::join_command;

/// Backend state shared by all steps created by one transformer instance.
///
/// Executes scheduler commands (or records them in dry-run mode) and remembers
/// the job id assigned to every submitted step, so that later steps can depend
/// on earlier ones.
#[derive(Debug)]
pub struct CommandSession {
    config: TransformerConfig,
    jobs: Mutex<Map<String, String>>,
    recorded: Mutex<Vec<String>>,
    dry_run_counter: AtomicU64,
}

impl CommandSession {
    pub fn new(config: TransformerConfig) -> Self {
        Self {
            config,
            jobs: Default::default(),
            recorded: Default::default(),
            dry_run_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub fn wait(&self) -> bool {
        self.config.wait
    }

    /// Commands passed to the session so far, executed or not.
    pub fn recorded_commands(&self) -> Vec<String> {
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, arguments: &[String]) -> String {
        let line = join_command(arguments);
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.clone());
        line
    }

    /// Runs a command in `workdir` and returns its trimmed stdout.
    ///
    /// In dry-run mode the command is only recorded and an empty output is returned.
    pub fn run_command(
        &self,
        step: &str,
        arguments: &[String],
        workdir: &Path,
    ) -> jobspec_core::Result<String> {
        let Some((program, args)) = arguments.split_first() else {
            return Err(execution_error(step, "Empty command".to_string(), false));
        };
        let line = self.record(arguments);
        if self.is_dry_run() {
            log::info!("[dry-run] {line}");
            return Ok(String::new());
        }

        let program = which::which(program).map_err(|e| {
            execution_error(step, format!("Cannot find program {program}: {e}"), false)
        })?;
        log::debug!("Running command `{line}` in {}", workdir.display());
        let output = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .output()
            .map_err(|e| execution_error(step, format!("{line} start failed: {e}"), true))?;
        let output = check_command_output(output)
            .map_err(|message| execution_error(step, format!("{line} failed\n{message}"), false))?;
        Ok(output.stdout.to_str_lossy().trim().to_string())
    }

    /// Runs a submission command and records the job id parsed from its output
    /// under the step name.
    pub fn submit<F>(
        &self,
        step: &str,
        arguments: &[String],
        workdir: &Path,
        parse_job_id: F,
    ) -> jobspec_core::Result<String>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let job_id = if self.is_dry_run() {
            self.run_command(step, arguments, workdir)?;
            let id = self.dry_run_counter.fetch_add(1, Ordering::SeqCst) + 1;
            format!("dry-run-{id}")
        } else {
            let output = self.run_command(step, arguments, workdir)?;
            log::debug!("Submission output of {step}: {output}");
            parse_job_id(&output).ok_or_else(|| {
                execution_error(
                    step,
                    format!("Cannot parse a job id from output `{output}`"),
                    false,
                )
            })?
        };
        self.register_job(step, &job_id);
        Ok(job_id)
    }

    pub fn register_job(&self, step: &str, job_id: &str) {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(step.to_string(), job_id.to_string());
    }

    /// Job id of an already submitted step that `step` depends on.
    pub fn job_id(&self, step: &str, dependency: &str) -> jobspec_core::Result<String> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(dependency)
            .cloned()
            .ok_or_else(|| {
                execution_error(
                    step,
                    format!("Dependency {dependency} was not submitted before this step"),
                    false,
                )
            })
    }

    /// Writes a file into the stage directory, optionally marking it as executable.
    pub fn write_file(
        &self,
        path: &Path,
        content: &str,
        executable: bool,
    ) -> jobspec_core::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        if executable {
            set_executable(path)?;
        }
        log::debug!("Written {}", path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn execution_error(step: &str, message: String, retriable: bool) -> JobspecError {
    JobspecError::ExecutionError {
        step: step.to_string(),
        message,
        retriable,
    }
}

pub fn check_command_output(output: Output) -> Result<Output, String> {
    let status = output.status;
    if !status.success() {
        return Err(format!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        ));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use jobspec_core::TransformerConfig;
    use jobspec_core::error::JobspecError;

    use super::CommandSession;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn dry_session() -> CommandSession {
        CommandSession::new(TransformerConfig {
            dry_run: true,
            wait: false,
        })
    }

    #[test]
    fn dry_run_records_commands() {
        let session = dry_session();
        let id = session
            .submit(
                "a",
                &args(&["flux", "submit", "echo", "hello world"]),
                Path::new("/tmp"),
                |_| None,
            )
            .unwrap();
        assert_eq!(id, "dry-run-1");
        assert_eq!(
            session.recorded_commands(),
            vec!["flux submit echo 'hello world'"]
        );
        assert_eq!(session.job_id("b", "a").unwrap(), "dry-run-1");
    }

    #[test]
    fn unknown_dependency() {
        let session = dry_session();
        let r = session.job_id("b", "a");
        assert!(matches!(
            r,
            Err(JobspecError::ExecutionError { step, retriable: false, .. }) if step == "b"
        ));
    }

    #[test]
    fn empty_command() {
        let r = dry_session().run_command("a", &[], Path::new("/tmp"));
        assert!(matches!(r, Err(JobspecError::ExecutionError { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn run_command_output() {
        let session = CommandSession::new(TransformerConfig::default());
        let output = session
            .run_command("a", &args(&["echo", " 1234 "]), Path::new("/"))
            .unwrap();
        assert_eq!(output, "1234");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_failure_is_not_retriable() {
        let session = CommandSession::new(TransformerConfig::default());
        let r = session.run_command("a", &args(&["false"]), Path::new("/"));
        let err = r.unwrap_err();
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("Exit code: 1"));
    }

    #[test]
    fn write_executable_file() {
        let dir = tempfile::TempDir::with_prefix("jobspec").unwrap();
        let path = dir.path().join("nested").join("run.sh");
        dry_session().write_file(&path, "hostname", true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hostname");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }
}
