//! # Bootline CLI
//!
//! Argument parsing and error types for the `bootline` binary. The binary
//! itself lives in `main.rs`; this crate exists so the CLI surface can be
//! exercised in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod error;

pub use cli::{Cli, Output};
pub use error::CliError;
