//! Command interpreter core: tokenizing a line, building pipelines, launching
//! them as process groups and keeping track of the resulting jobs.

pub mod builtin;
pub mod config;
pub mod control;
pub mod eval;
pub mod global;
pub mod history;
pub mod job;
pub mod launch;
pub mod parser;
pub mod search;
pub mod signals;
pub mod types;

pub use eval::{dispatch, Outcome, ShellError};
pub use global::State;
