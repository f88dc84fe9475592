use std::io::Write;

use env_logger::DEFAULT_FILTER_ENV;
use env_logger::fmt::style::{AnsiColor, Style};
use log::LevelFilter;

/// Configures the logger. `RUST_LOG` takes precedence over `debug`.
///
/// Debug output carries the log target, so decomposition (`jobspec_core`) and
/// backend commands (`jobspec::transformer`) can be told apart.
pub fn setup_logging(debug: bool) {
    let mut builder = env_logger::Builder::default();
    builder.filter_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let env_debug = std::env::var(DEFAULT_FILTER_ENV).is_ok_and(|v| v.contains("debug"));
    let dim = Style::new().fg_color(Some(AnsiColor::BrightBlack.into()));

    if debug || env_debug {
        builder.format(move |buf, record| {
            let level = buf.default_level_style(record.level()).bold();
            writeln!(
                buf,
                "{dim}{}{dim:#} {level}{:<5}{level:#} {dim}{}{dim:#} {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        });
    } else {
        // <time> <level> <message>
        builder.format(move |buf, record| {
            let level = buf.default_level_style(record.level()).bold();
            writeln!(
                buf,
                "{dim}{}{dim:#} {level}{}{level:#} {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        });
    }

    builder.parse_default_env();
    builder.init();
}
