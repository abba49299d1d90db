use std::env;
use std::path::PathBuf;

use nix::sys::signal::Signal;

use crate::control;
use crate::eval::{Outcome, ShellError};
use crate::global;
use crate::job::{JobError, JobState};

pub type Builtin = fn(&mut global::State, &[String]) -> Result<Outcome, ShellError>;

const HELP: &str = "\
Builtin commands:
  cd [directory]            change the working directory (default $HOME)
  export NAME VALUE         set an environment variable (also NAME=VALUE)
  unset NAME                remove an environment variable
  history                   list the lines entered this session
  jobs                      list running and stopped jobs
  fg <job>                  continue a job in the foreground
  bg <job>                  continue a stopped job in the background
  kill [-SIGNAL] <pid|%job> send a signal (default TERM)
  rehash                    rescan PATH for programs
  help                      show this text
  exit [status]             leave the shell

Operators (separate them with spaces):
  cmd < file                read standard input from file
  cmd > file, cmd >> file   write standard output to file, truncating or appending
  cmd1 | cmd2 | ...         connect commands with pipes
  cmd &                     run in the background
";

fn ok() -> Result<Outcome, ShellError> {
	Ok(Outcome::Status(0))
}

pub fn builtin_cd(_: &mut global::State, args: &[String]) -> Result<Outcome, ShellError> {
	let target = match args.get(1) {
		Some(dir) => PathBuf::from(dir),
		None => env::var_os("HOME").map(PathBuf::from).ok_or(ShellError::Usage("cd <directory>"))?,
	};
	env::set_current_dir(&target).map_err(|e| ShellError::Io(format!("cd: {}", target.display()), e))?;
	ok()
}

pub fn builtin_export(state: &mut global::State, args: &[String]) -> Result<Outcome, ShellError> {
	const USAGE: &str = "export NAME VALUE | export NAME=VALUE";
	let (key, value) = match args {
		[_, key, value] => (key.as_str(), value.as_str()),
		[_, assignment] => assignment.split_once('=').ok_or(ShellError::Usage(USAGE))?,
		_ => return Err(ShellError::Usage(USAGE)),
	};
	if key.is_empty() || key.contains('=') {
		return Err(ShellError::Usage(USAGE));
	}
	env::set_var(key, value);
	if key == "PATH" {
		state.search_cache.rehash();
	}
	ok()
}

pub fn builtin_unset(state: &mut global::State, args: &[String]) -> Result<Outcome, ShellError> {
	let key = match args {
		[_, key] if !key.is_empty() && !key.contains('=') => key,
		_ => return Err(ShellError::Usage("unset NAME")),
	};
	env::remove_var(key);
	if key == "PATH" {
		state.search_cache.rehash();
	}
	ok()
}

pub fn builtin_history(state: &mut global::State, _: &[String]) -> Result<Outcome, ShellError> {
	for (n, line) in state.history.iter() {
		println!("{} {}", n, line);
	}
	ok()
}

pub fn builtin_help(_: &mut global::State, _: &[String]) -> Result<Outcome, ShellError> {
	print!("{}", HELP);
	ok()
}

pub fn builtin_exit(_: &mut global::State, args: &[String]) -> Result<Outcome, ShellError> {
	match args.get(1) {
		None => Ok(Outcome::Exit(0)),
		Some(code) => code.parse().map(Outcome::Exit).map_err(|_| ShellError::Usage("exit [status]")),
	}
}

pub fn builtin_jobs(state: &mut global::State, _: &[String]) -> Result<Outcome, ShellError> {
	let reaped = state.job_table.reap();
	for (id, job) in state.job_table.iter() {
		if job.state() != JobState::Done || reaped.contains(&id) {
			println!("[{}]  {}\t{}", id, job.state(), job.command);
		}
	}
	ok()
}

fn job_id_arg(args: &[String], usage: &'static str) -> Result<i64, ShellError> {
	match args {
		[_, id] => id.strip_prefix('%').unwrap_or(id).parse().map_err(|_| ShellError::Usage(usage)),
		_ => Err(ShellError::Usage(usage)),
	}
}

pub fn builtin_fg(state: &mut global::State, args: &[String]) -> Result<Outcome, ShellError> {
	let raw = job_id_arg(args, "fg <job>")?;
	let global::State { ref mut job_table, ref terminal, .. } = *state;
	if let Some(job) = job_table.resolve(raw).ok().and_then(|id| job_table.get(id)) {
		if job.state() != JobState::Done {
			println!("{}", job.command);
		}
	}
	let (id, job_state) = control::fg(job_table, terminal.as_ref(), raw)?;
	let job = job_table.get(id).ok_or(JobError::InvalidId(raw))?;
	match job_state {
		JobState::Stopped => {
			println!();
			println!("[{}]  Stopped\t{}", id, job.command);
			Ok(Outcome::Stopped(id))
		},
		_ => Ok(Outcome::Status(job.exit_code())),
	}
}

pub fn builtin_bg(state: &mut global::State, args: &[String]) -> Result<Outcome, ShellError> {
	let raw = job_id_arg(args, "bg <job>")?;
	let id = control::bg(&mut state.job_table, raw)?;
	if let Some(job) = state.job_table.get(id) {
		println!("[{}] {} &", id, job.command);
	}
	ok()
}

fn parse_signal(name: &str) -> Result<Signal, ShellError> {
	if let Ok(n) = name.parse::<i32>() {
		return Signal::try_from(n).map_err(|_| ShellError::UnknownSignal(name.to_owned()));
	}
	let upper = name.to_uppercase();
	let full = if upper.starts_with("SIG") { upper } else { format!("SIG{}", upper) };
	full.parse().map_err(|_| ShellError::UnknownSignal(name.to_owned()))
}

pub fn builtin_kill(state: &mut global::State, args: &[String]) -> Result<Outcome, ShellError> {
	const USAGE: &str = "kill [-SIGNAL] <pid | %job>";
	let (sig, target) = match args {
		[_, target] => (Signal::SIGTERM, target),
		[_, sig, target] if sig.len() > 1 && sig.starts_with('-') => (parse_signal(&sig[1..])?, target),
		_ => return Err(ShellError::Usage(USAGE)),
	};
	match target.strip_prefix('%') {
		Some(job) => {
			let raw = job.parse().map_err(|_| ShellError::Usage(USAGE))?;
			control::kill_job(&state.job_table, raw, sig)?;
		},
		None => {
			let raw = target.parse().map_err(|_| ShellError::Usage(USAGE))?;
			control::kill_pid(raw, sig)?;
		},
	}
	ok()
}

pub fn builtin_rehash(state: &mut global::State, _: &[String]) -> Result<Outcome, ShellError> {
	state.search_cache.rehash();
	ok()
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"cd" => Some(builtin_cd),
		"export" => Some(builtin_export),
		"unset" => Some(builtin_unset),
		"history" => Some(builtin_history),
		"help" => Some(builtin_help),
		"exit" => Some(builtin_exit),
		"jobs" => Some(builtin_jobs),
		"fg" => Some(builtin_fg),
		"bg" => Some(builtin_bg),
		"kill" => Some(builtin_kill),
		"rehash" => Some(builtin_rehash),
		_ => None,
	}
}
