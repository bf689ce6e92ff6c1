//! Command-line interface

mod args;
pub mod commands;

pub use args::{parse_engines, split_args, Cli, SplitArgs};
