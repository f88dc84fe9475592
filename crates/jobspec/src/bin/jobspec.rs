use std::io;
use std::io::IsTerminal;

use clap::{CommandFactory, FromArgMatches};
use clap_complete::generate;
use cli_table::ColorChoice;
use jobspec::client::commands::{
    command_plan, command_run, command_transformers, command_validate, command_version,
};
use jobspec::client::globalsettings::GlobalSettings;
use jobspec::client::output::cli::CliOutput;
use jobspec::client::output::json::JsonOutput;
use jobspec::client::output::outputs::{Output, Outputs};
use jobspec::client::output::quiet::Quiet;
use jobspec::common::cli::{
    ColorPolicy, CommonOpts, GenerateCompletionOpts, RootOptions, SubCommand,
};
use jobspec::common::setup::setup_logging;

fn make_global_settings(opts: CommonOpts) -> GlobalSettings {
    let color_policy = match opts.colors {
        ColorPolicy::Always => ColorChoice::AlwaysAnsi,
        ColorPolicy::Auto => {
            if io::stdout().is_terminal() {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            }
        }
        ColorPolicy::Never => ColorChoice::Never,
    };

    let printer: Box<dyn Output> = match opts.output_mode {
        Outputs::CLI => {
            match color_policy {
                ColorChoice::Always | ColorChoice::AlwaysAnsi => {
                    colored::control::set_override(true)
                }
                ColorChoice::Never => colored::control::set_override(false),
                _ => {}
            }

            Box::new(CliOutput::new(color_policy))
        }
        Outputs::JSON => Box::<JsonOutput>::default(),
        Outputs::Quiet => Box::<Quiet>::default(),
    };

    GlobalSettings::new(printer)
}

fn generate_completion(opts: GenerateCompletionOpts) -> anyhow::Result<()> {
    let generator = opts.shell;

    let mut app = RootOptions::command();
    eprintln!("Generating completion file for {generator}...");
    generate(generator, &mut app, "jobspec".to_string(), &mut io::stdout());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let gsettings = make_global_settings(top_opts.common);

    let result = match top_opts.subcmd {
        SubCommand::Run(opts) => command_run(&gsettings, opts),
        SubCommand::Plan(opts) => command_plan(&gsettings, opts),
        SubCommand::Validate(opts) => command_validate(&gsettings, opts),
        SubCommand::Transformers => command_transformers(&gsettings),
        SubCommand::Version => {
            command_version(&gsettings);
            Ok(())
        }
        SubCommand::GenerateCompletion(opts) => generate_completion(opts),
    };

    if let Err(e) = result {
        gsettings.printer().print_error(e);
        std::process::exit(1);
    }

    Ok(())
}
