use std::path::PathBuf;

use clap::Parser;
use clap_complete::Shell;

use crate::client::output::outputs::Outputs;

#[derive(clap::ValueEnum, Clone)]
pub enum ColorPolicy {
    /// Use colors if the stdout is detected to be a terminal.
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Sets console color policy
    #[arg(
        long,
        default_value_t = ColorPolicy::Auto,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub colors: ColorPolicy,

    /// Sets output formatting
    #[arg(
        long,
        env = "JOBSPEC_OUTPUT_MODE",
        default_value_t = Outputs::CLI,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub output_mode: Outputs,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "JOBSPEC_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::JOBSPEC_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Translate a jobspec and execute its steps
    Run(RunOpts),
    /// Translate a jobspec and print the steps without executing them
    Plan(PlanOpts),
    /// Check that a jobspec is well formed
    Validate(ValidateOpts),
    /// List available transformers
    Transformers,
    /// Print the version
    Version,
    /// Generate shell completion script
    GenerateCompletion(GenerateCompletionOpts),
}

#[derive(Parser)]
pub struct TransformerArg {
    /// Transformer that translates the jobspec
    #[arg(short = 't', long, default_value = crate::DEFAULT_TRANSFORMER)]
    pub transformer: String,
}

#[derive(Parser)]
pub struct RunOpts {
    /// Path to the jobspec (YAML or JSON)
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,

    #[clap(flatten)]
    pub transformer: TransformerArg,

    /// Directory where scripts are staged and relative paths are resolved.
    /// A fresh temporary directory is created when not set.
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub stage: Option<PathBuf>,

    /// Print the backend commands instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Wait until submitted jobs finish
    #[arg(long)]
    pub wait: bool,
}

#[derive(Parser)]
pub struct PlanOpts {
    /// Path to the jobspec (YAML or JSON)
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,

    #[clap(flatten)]
    pub transformer: TransformerArg,
}

#[derive(Parser)]
pub struct ValidateOpts {
    /// Path to the jobspec (YAML or JSON)
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Parser)]
pub struct GenerateCompletionOpts {
    /// Shell flavour for which the completion script should be generated
    #[arg(value_enum)]
    pub shell: Shell,
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{RootOptions, SubCommand};
    use crate::client::output::outputs::Outputs;

    #[test]
    fn verify_cli() {
        RootOptions::command().debug_assert();
    }

    #[test]
    fn parse_run_defaults() {
        let opts = RootOptions::try_parse_from(["jobspec", "run", "job.yaml"]).unwrap();
        let SubCommand::Run(run) = opts.subcmd else {
            panic!("expected run");
        };
        assert_eq!(run.transformer.transformer, "flux");
        assert!(run.stage.is_none());
        assert!(!run.dry_run);
        assert!(!run.wait);
    }

    #[test]
    fn parse_global_options_after_subcommand() {
        let opts = RootOptions::try_parse_from([
            "jobspec",
            "plan",
            "job.yaml",
            "-t",
            "slurm",
            "--output-mode",
            "json",
            "--debug",
        ])
        .unwrap();
        assert!(opts.common.debug);
        assert!(matches!(opts.common.output_mode, Outputs::JSON));
        let SubCommand::Plan(plan) = opts.subcmd else {
            panic!("expected plan");
        };
        assert_eq!(plan.transformer.transformer, "slurm");
    }
}
