pub mod cli;
pub mod common;
pub mod json;
pub mod outputs;
pub mod quiet;
