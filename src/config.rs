use clap::Parser;

use crate::{history, job};

/// A small interactive shell with pipelines, redirection and job control.
#[derive(Debug, Clone, Parser)]
#[command(name = "jobsh", version)]
pub struct Config {
	/// Run one command line, then exit with its status
	#[arg(short = 'c', long = "command", value_name = "LINE")]
	pub command: Option<String>,

	/// Prompt shown before each line in interactive mode
	#[arg(long, default_value = "jobsh> ")]
	pub prompt: String,

	/// Maximum number of running or stopped jobs
	#[arg(long, default_value_t = job::DEFAULT_CAPACITY, value_parser = parse_positive)]
	pub max_jobs: usize,

	/// Number of lines kept by `history`
	#[arg(long, default_value_t = history::DEFAULT_CAPACITY)]
	pub history_size: usize,

	/// Skip the welcome banner
	#[arg(long)]
	pub no_banner: bool,

	/// Never take the terminal, even when stdin is one
	#[arg(long)]
	pub no_job_control: bool,
}

fn parse_positive(s: &str) -> Result<usize, String> {
	match s.parse::<usize>() {
		Ok(0) => Err("must be at least 1".to_string()),
		Ok(n) => Ok(n),
		Err(e) => Err(e.to_string()),
	}
}
