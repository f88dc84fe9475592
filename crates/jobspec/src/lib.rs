pub mod client;
pub mod common;
pub mod transformer;

pub const JOBSPEC_VERSION: &str = {
    match option_env!("JOBSPEC_BUILD_VERSION") {
        Some(version) => version,
        None => const_format::concatcp!(env!("CARGO_PKG_VERSION"), "-dev"),
    }
};

/// Transformer used when none is given on the command line
pub const DEFAULT_TRANSFORMER: &str = "flux";

// Reexports
pub use jobspec_core;
