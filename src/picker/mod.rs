//! Pickers gather the cases to execute.
pub mod toml;
