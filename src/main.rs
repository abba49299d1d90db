use std::io::{self, BufRead, IsTerminal, Write};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobsh::config::Config;
use jobsh::control::Terminal;
use jobsh::signals::InterruptWatcher;
use jobsh::{dispatch, Outcome, State};

const BANNER: &str = "\
==============================================
              Welcome to jobsh
==============================================
   'help' lists the builtin commands
==============================================
";

fn init_tracing() {
	let filter = EnvFilter::try_from_env("JOBSH_LOG")
		.unwrap_or_else(|_| EnvFilter::new("warn"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.with_ansi(io::stderr().is_terminal())
		.with_target(false)
		.init();
}

fn run_line(state: &mut State, line: &str) -> i32 {
	match dispatch(state, line) {
		Ok(Outcome::Status(code)) | Ok(Outcome::Exit(code)) => code,
		Ok(_) => 0,
		Err(e) => {
			eprintln!("jobsh: {}", e);
			e.exit_code()
		},
	}
}

fn repl(state: &mut State, config: &Config, prompt: Option<&str>, at_prompt: &AtomicBool) -> anyhow::Result<i32> {
	let interactive = prompt.is_some();
	let mut stdout = io::stdout();
	if interactive && !config.no_banner {
		stdout.write_all(BANNER.as_bytes())?;
	}

	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	let mut line = String::new();
	let mut status = 0;
	loop {
		state.notify_jobs(&mut stdout)?;
		if let Some(prompt) = prompt {
			stdout.write_all(prompt.as_bytes())?;
			stdout.flush()?;
		}

		line.clear();
		at_prompt.store(true, Ordering::SeqCst);
		let read = stdin_locked.read_line(&mut line);
		at_prompt.store(false, Ordering::SeqCst);
		match read {
			Ok(0) => {
				if interactive {
					writeln!(stdout)?;
				}
				break;
			},
			Ok(_) => {},
			Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(ref e) if e.kind() == io::ErrorKind::InvalidData => {
				eprintln!("jobsh: input is not valid UTF-8");
				continue;
			},
			Err(e) => return Err(e).context("reading standard input"),
		}

		match dispatch(state, &line) {
			Ok(Outcome::Exit(code)) => {
				status = code;
				break;
			},
			Ok(_) => {},
			Err(e) => eprintln!("jobsh: {}", e),
		}
	}

	Ok(status)
}

fn main() -> anyhow::Result<()> {
	init_tracing();
	let config = Config::parse();

	let terminal = if config.no_job_control { None } else { Terminal::acquire() };
	let mut state = State::new(config.max_jobs, config.history_size).with_terminal(terminal);

	// a -c line is never read at a prompt
	let prompt = match config.command {
		None if io::stdin().is_terminal() => Some(config.prompt.clone()),
		_ => None,
	};
	let at_prompt = Arc::new(AtomicBool::new(false));
	let watcher = InterruptWatcher::start(prompt.clone(), Arc::clone(&at_prompt))
		.context("installing the SIGINT handler")?;

	let status = match config.command {
		Some(ref line) => run_line(&mut state, line),
		None => repl(&mut state, &config, prompt.as_deref(), &at_prompt)?,
	};
	watcher.stop();

	if let Some(ref terminal) = state.terminal {
		terminal.release();
	}
	process::exit(status)
}
