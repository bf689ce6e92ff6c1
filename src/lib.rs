//! scrun - run self-contained node scripts with inline dependencies
//!
//! A script declares its npm dependencies and node version in a leading
//! `<package>` block. scrun installs them once into a content-addressed
//! cache, picks a node version, and launches the script with module
//! resolution pointed at the cache.

pub mod cache;
pub mod cli;
pub mod config;
pub mod deps;
pub mod engine;
pub mod error;
pub mod exec;
pub mod intercept;
pub mod manifest;
pub mod npm;
pub mod package_exec;
pub mod runner;
pub mod ui;

pub use error::{ScrunError, ScrunResult};
