use std::io;

use nix::unistd::Pid;
use thiserror::Error;
use tracing::debug;

use crate::builtin;
use crate::control;
use crate::global;
use crate::job::{Job, JobError, JobId, JobState};
use crate::launch::{self, LaunchError};
use crate::parser::{self, ParseError};
use crate::types::{Pipeline, Token};

#[derive(Debug, Error)]
pub enum ShellError {
	#[error(transparent)]
	Parse(#[from] ParseError),
	#[error(transparent)]
	Launch(#[from] LaunchError),
	#[error(transparent)]
	Job(#[from] JobError),
	#[error("{0}: builtins only run as a single foreground command")]
	BuiltinContext(String),
	#[error("usage: {0}")]
	Usage(&'static str),
	#[error("{0}: unknown signal")]
	UnknownSignal(String),
	#[error("{0}: {1}")]
	Io(String, #[source] io::Error),
}

impl ShellError {
	/// Status reported for a line that failed before anything ran.
	pub fn exit_code(&self) -> i32 {
		match *self {
			ShellError::Parse(_) | ShellError::Usage(_) => 2,
			ShellError::Launch(LaunchError::CommandNotFound(_)) => 127,
			_ => 1,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	/// Blank line.
	Empty,
	/// Exit status of a builtin or a finished foreground job.
	Status(i32),
	Background { id: JobId, pgid: Pid },
	/// A foreground job was stopped and now sits in the job table.
	Stopped(JobId),
	Exit(i32),
}

/// The line as shown by `jobs`: words joined by single spaces, without the
/// trailing `&`.
fn command_text(tokens: &[Token<'_>]) -> String {
	let tokens = match tokens.split_last() {
		Some((Token::Background, rest)) => rest,
		_ => tokens,
	};
	tokens.iter().map(|t| t.symbol()).collect::<Vec<&str>>().join(" ")
}

fn eval_pipeline(state: &mut global::State, pipeline: &Pipeline, command: &str) -> Result<Outcome, ShellError> {
	state.job_table.check_room()?;
	let launched = launch::launch(pipeline, &state.search_cache, state.terminal.as_ref())?;

	if pipeline.is_background {
		let pgid = launched.pgid;
		let id = state.job_table.register(launched, command)?;
		println!("[{}] {}", id, pgid);
		return Ok(Outcome::Background { id: id, pgid: pgid });
	}

	let mut job = Job::new(launched, command);
	match control::wait_foreground(&mut job, state.terminal.as_ref())? {
		JobState::Stopped => {
			let id = state.job_table.insert(job)?;
			println!();
			println!("[{}]  Stopped\t{}", id, command);
			Ok(Outcome::Stopped(id))
		},
		_ => {
			debug!(pgid = job.pgid.as_raw(), code = job.exit_code(), "foreground job done");
			Ok(Outcome::Status(job.exit_code()))
		},
	}
}

pub fn eval(state: &mut global::State, pipeline: &Pipeline, command: &str) -> Result<Outcome, ShellError> {
	if let [ref stage] = pipeline.stages[..] {
		if let Some(func) = builtin::match_builtin(stage.program()) {
			if pipeline.is_background || stage.is_redirected() {
				return Err(ShellError::BuiltinContext(stage.program().to_owned()));
			}
			return func(state, &stage.args);
		}
	}
	let builtin_stage = pipeline.stages.iter().find(|stage| builtin::match_builtin(stage.program()).is_some());
	if let Some(stage) = builtin_stage {
		return Err(ShellError::BuiltinContext(stage.program().to_owned()));
	}
	eval_pipeline(state, pipeline, command)
}

/// Runs one input line: a builtin in-process, anything else as a job.
pub fn dispatch(state: &mut global::State, line: &str) -> Result<Outcome, ShellError> {
	let tokens = parser::tokenize(line);
	if tokens.is_empty() {
		return Ok(Outcome::Empty);
	}
	let command = command_text(&tokens);
	state.history.push(line.trim());
	let pipeline = parser::build(&tokens)?;
	eval(state, &pipeline, &command)
}
