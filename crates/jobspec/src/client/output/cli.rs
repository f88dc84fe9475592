use std::path::Path;

use cli_table::format::{Justify, Separator};
use cli_table::{Cell, CellStruct, ColorChoice, Style, Table, TableStruct, print_stdout};
use colored::Colorize;
use humantime::format_duration;
use jobspec_core::JobSpec;

use crate::client::output::common::{StepRunInfo, StepSummary};
use crate::client::output::outputs::Output;

const TERMINAL_WIDTH: usize = 80;

pub struct CliOutput {
    color_policy: ColorChoice,
}

impl CliOutput {
    pub fn new(color_policy: ColorChoice) -> CliOutput {
        CliOutput { color_policy }
    }

    fn print_vertical_table(&self, rows: Vec<Vec<CellStruct>>) {
        let table = rows.table().separator(
            Separator::builder()
                .column(Some(Default::default()))
                .build(),
        );
        self.print_table(table);
    }

    fn print_horizontal_table(&self, rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) {
        let table = rows
            .table()
            .separator(
                Separator::builder()
                    .title(Some(Default::default()))
                    .column(Some(Default::default()))
                    .build(),
            )
            .title(header);
        self.print_table(table);
    }

    fn print_table(&self, table: TableStruct) {
        let table = table.color_choice(self.color_policy);
        if let Err(e) = print_stdout(table) {
            log::error!("Cannot print table to stdout: {e:?}");
        }
    }
}

/// Rows of a step tree, nested steps are indented below their parent.
fn workload_rows(steps: &[StepSummary], depth: usize, rows: &mut Vec<Vec<CellStruct>>) {
    for step in steps {
        let name = format!("{}{}", "  ".repeat(depth), step.name);
        rows.push(vec![
            name.cell(),
            step.kind.as_str().cell(),
            step.resources.to_string().cell(),
            step.duration()
                .map(|d| format_duration(d).to_string())
                .unwrap_or_default()
                .cell(),
            step.depends_on.join(", ").cell(),
            step.command
                .as_deref()
                .map(|c| textwrap::fill(c, TERMINAL_WIDTH / 2))
                .unwrap_or_default()
                .cell(),
        ]);
        workload_rows(&step.steps, depth + 1, rows);
    }
}

impl Output for CliOutput {
    fn print_transformers(&self, transformers: Vec<(&str, &str)>) {
        let rows: Vec<_> = transformers
            .into_iter()
            .map(|(name, description)| vec![name.cell(), description.cell()])
            .collect();
        let header = vec!["Name".cell().bold(true), "Description".cell().bold(true)];
        self.print_horizontal_table(rows, header);
    }

    fn print_jobspec_valid(&self, path: &Path, jobspec: &JobSpec) {
        println!(
            "Jobspec {} is {}",
            path.display(),
            "valid".color(colored::Color::Green)
        );
        let rows = vec![
            vec!["Version".cell().bold(true), jobspec.version.cell()],
            vec![
                "Tasks".cell().bold(true),
                jobspec.tasks.len().cell().justify(Justify::Right),
            ],
            vec![
                "Groups".cell().bold(true),
                jobspec.groups.len().cell().justify(Justify::Right),
            ],
        ];
        self.print_vertical_table(rows);
    }

    fn print_workload(&self, transformer: &str, steps: Vec<StepSummary>) {
        println!(
            "Transformer {} produced {} step(s)",
            transformer.bold(),
            steps.len()
        );
        let mut rows = Vec::new();
        workload_rows(&steps, 0, &mut rows);
        let header = vec![
            "Step".cell().bold(true),
            "Kind".cell().bold(true),
            "Resources".cell().bold(true),
            "Duration".cell().bold(true),
            "Depends on".cell().bold(true),
            "Command".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header);
    }

    fn print_run_results(&self, transformer: &str, stage: &Path, results: Vec<StepRunInfo>) {
        println!(
            "Workload executed {} by {} in {}",
            "successfully".color(colored::Color::Green),
            transformer.bold(),
            stage.display()
        );
        let rows: Vec<_> = results
            .into_iter()
            .map(|r| vec![r.name.cell(), r.kind.cell(), r.output.cell()])
            .collect();
        let header = vec![
            "Step".cell().bold(true),
            "Kind".cell().bold(true),
            "Output".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header);
    }

    fn print_version(&self, version: &str) {
        println!("jobspec {version}");
    }

    fn print_error(&self, error: anyhow::Error) {
        eprintln!("{:?}", error);
    }
}
