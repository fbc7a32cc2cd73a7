// src/lib.rs

//! Confik: temporary config staging
//!
//! Copies the files kept in a project's `.config` directory into the project
//! root for as long as a command runs, then removes every trace of them
//! again: files, directories, git exclude entries and VS Code excludes.
//!
//! # Architecture
//!
//! - Lock first: one staging run per `.config` directory at a time
//! - Manifest of record: written before the command starts, so a crash can
//!   be reversed later with `--clean` or by the next run
//! - Never overwrite: files already present in the project root are skipped
//!   and never touched during cleanup
//! - Aggregated cleanup: every reversal is attempted; the manifest is only
//!   deleted once nothing is left behind

pub mod cleanup;
pub mod config;
mod error;
pub mod fsutil;
pub mod gitignore;
pub mod jsonc;
pub mod lock;
pub mod manifest;
pub mod patterns;
pub mod runner;
pub mod signals;
pub mod stage;
pub mod vscode;

pub use error::{Error, Result};
