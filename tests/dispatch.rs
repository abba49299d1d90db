use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::{self, Command};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use jobsh::job::{JobError, JobState};
use jobsh::parser::ParseError;
use jobsh::{dispatch, Outcome, ShellError, State};

fn reference_shell(line: &str) -> Vec<u8> {
	Command::new("sh").arg("-c").arg(line).output().expect("run sh").stdout
}

fn wait_done(state: &mut State, raw: usize) {
	let deadline = Instant::now() + Duration::from_secs(5);
	loop {
		state.job_table.reap();
		let id = state.job_table.resolve(raw as i64).unwrap();
		if state.job_table.get(id).unwrap().state() == JobState::Done {
			return;
		}
		assert!(Instant::now() < deadline, "job {} never finished", raw);
		thread::sleep(Duration::from_millis(10));
	}
}

#[test]
fn foreground_status_is_observable() {
	let mut state = State::default();
	assert_eq!(dispatch(&mut state, "true").unwrap(), Outcome::Status(0));
	assert_eq!(dispatch(&mut state, "false").unwrap(), Outcome::Status(1));
	assert_eq!(dispatch(&mut state, "true | false").unwrap(), Outcome::Status(1));
	assert!(state.job_table.is_empty());
}

#[test]
fn pipelines_match_the_reference_shell() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out");
	let cases = [
		"echo one two three | tr a-z A-Z",
		"printf x | cat | cat | cat | wc -c",
		"seq 1 200 | grep 7 | sort -r | head -n 5",
	];
	for case in cases.iter() {
		let line = format!("{} > {}", case, out.display());
		assert_eq!(dispatch(&mut State::default(), &line).unwrap(), Outcome::Status(0));
		assert_eq!(fs::read(&out).unwrap(), reference_shell(case), "{}", case);
	}
}

#[test]
fn output_redirection_truncates() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("greeting");
	fs::write(&out, "a much longer line that must disappear\n").unwrap();
	let mut state = State::default();
	dispatch(&mut state, &format!("echo hello world > {}", out.display())).unwrap();
	assert_eq!(fs::read_to_string(&out).unwrap(), "hello world\n");

	dispatch(&mut state, &format!("echo again >> {}", out.display())).unwrap();
	assert_eq!(fs::read_to_string(&out).unwrap(), "hello world\nagain\n");
}

#[test]
fn input_redirection_is_byte_exact() {
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("in");
	let out = dir.path().join("out");
	let bytes: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
	fs::write(&input, &bytes).unwrap();
	let mut state = State::default();
	let line = format!("cat < {} > {}", input.display(), out.display());
	assert_eq!(dispatch(&mut state, &line).unwrap(), Outcome::Status(0));
	assert_eq!(fs::read(&out).unwrap(), bytes);
}

#[test]
fn redirects_combine_with_pipes() {
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("words");
	let out = dir.path().join("counted");
	fs::write(&input, "pear\napple\npear\nfig\napple\npear\n").unwrap();
	let mut state = State::default();
	let line = format!("sort < {} | uniq -c | sort -rn | head -n 1 > {}", input.display(), out.display());
	assert_eq!(dispatch(&mut state, &line).unwrap(), Outcome::Status(0));
	assert_eq!(fs::read_to_string(&out).unwrap().trim(), "3 pear");
}

#[test]
fn background_job_returns_immediately() {
	let mut state = State::default();
	let started = Instant::now();
	let (id, pgid) = match dispatch(&mut state, "sleep 0.3 &").unwrap() {
		Outcome::Background { id, pgid } => (id, pgid),
		other => panic!("unexpected {:?}", other),
	};
	assert!(started.elapsed() < Duration::from_millis(250));
	let job = state.job_table.get(id).unwrap();
	assert_eq!(id.get(), 1);
	assert_eq!(job.state(), JobState::Running);
	assert_eq!(job.pgid, pgid);
	assert_eq!(job.command, "sleep 0.3");

	assert_eq!(dispatch(&mut state, "fg 1").unwrap(), Outcome::Status(0));
	assert_eq!(state.job_table.get(id).unwrap().state(), JobState::Done);
	assert_eq!(state.history.iter().map(|(_, l)| l).collect::<Vec<_>>(), vec!["sleep 0.3 &", "fg 1"]);
}

#[test]
fn finished_background_jobs_are_reaped() {
	let mut state = State::default();
	dispatch(&mut state, "true &").unwrap();
	dispatch(&mut state, "sleep 10 &").unwrap();
	wait_done(&mut state, 1);
	assert_eq!(dispatch(&mut state, "kill %2").unwrap(), Outcome::Status(0));
	wait_done(&mut state, 2);
	let id = state.job_table.resolve(2).unwrap();
	assert_eq!(state.job_table.get(id).unwrap().exit_code(), 143);
	assert_eq!(state.job_table.live_count(), 0);
}

#[test]
fn dangling_redirect_leaves_the_table_unchanged() {
	let mut state = State::default();
	dispatch(&mut state, "sleep 0.1 &").unwrap();
	match dispatch(&mut state, "cmd >") {
		Err(ShellError::Parse(ParseError::DanglingRedirection(">"))) => {},
		other => panic!("unexpected {:?}", other),
	}
	assert_eq!(state.job_table.len(), 1);
	wait_done(&mut state, 1);
}

#[test]
fn invalid_job_ids() {
	let mut state = State::default();
	dispatch(&mut state, "sleep 0.1 &").unwrap();
	for line in ["fg 0", "fg -1", "fg 2", "bg 0", "bg 9", "kill %4"].iter() {
		match dispatch(&mut state, line) {
			Err(ShellError::Job(JobError::InvalidId(_))) => {},
			other => panic!("{}: unexpected {:?}", line, other),
		}
	}
	let id = state.job_table.resolve(1).unwrap();
	assert_eq!(state.job_table.get(id).unwrap().state(), JobState::Running);
	wait_done(&mut state, 1);
}

#[test]
fn table_capacity_is_enforced() {
	let mut state = State::new(1, 10);
	dispatch(&mut state, "sleep 10 &").unwrap();
	match dispatch(&mut state, "true") {
		Err(ShellError::Job(JobError::TableFull(1))) => {},
		other => panic!("unexpected {:?}", other),
	}
	dispatch(&mut state, "kill -KILL %1").unwrap();
	wait_done(&mut state, 1);
	assert_eq!(dispatch(&mut state, "true").unwrap(), Outcome::Status(0));
}

#[test]
fn exec_failure_only_ends_the_child() {
	let dir = tempfile::tempdir().unwrap();
	let script = dir.path().join("not-executable");
	fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
	fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

	let mut state = State::default();
	assert_eq!(dispatch(&mut state, &script.display().to_string()).unwrap(), Outcome::Status(126));
	let line = format!("echo x | {}", dir.path().display());
	assert_eq!(dispatch(&mut state, &line).unwrap(), Outcome::Status(126));
	assert_eq!(dispatch(&mut state, "true").unwrap(), Outcome::Status(0));
	assert!(state.job_table.is_empty());
}

/// Process group of the child of this process whose argv is `args`.
fn child_group(args: &[&str]) -> Option<Pid> {
	let cmdline = args.iter().map(|a| format!("{}\0", a)).collect::<String>();
	for entry in fs::read_dir("/proc").ok()?.flatten() {
		let dir = entry.path();
		match fs::read(dir.join("cmdline")) {
			Ok(ref bytes) if bytes == cmdline.as_bytes() => {},
			_ => continue,
		}
		let stat = match fs::read_to_string(dir.join("stat")) {
			Ok(stat) => stat,
			Err(_) => continue,
		};
		// pid (comm) state ppid pgrp ...
		let fields: Vec<&str> = stat[stat.rfind(')')? + 2..].split(' ').collect();
		if fields[1].parse::<u32>().ok()? == process::id() {
			return Some(Pid::from_raw(fields[2].parse().ok()?));
		}
	}
	None
}

#[test]
fn stopped_foreground_job_is_kept_and_reported() {
	let stopper = thread::spawn(|| {
		let deadline = Instant::now() + Duration::from_secs(5);
		loop {
			if let Some(pgid) = child_group(&["sleep", "4.5071"]) {
				thread::sleep(Duration::from_millis(100));
				signal::killpg(pgid, Signal::SIGSTOP).unwrap();
				return;
			}
			assert!(Instant::now() < deadline, "foreground job never appeared");
			thread::sleep(Duration::from_millis(10));
		}
	});

	let mut state = State::default();
	let id = match dispatch(&mut state, "sleep 4.5071 | cat").unwrap() {
		Outcome::Stopped(id) => id,
		other => panic!("unexpected {:?}", other),
	};
	stopper.join().unwrap();
	assert_eq!(id.get(), 1);
	assert_eq!(state.job_table.get(id).unwrap().state(), JobState::Stopped);

	dispatch(&mut state, "kill -KILL %1").unwrap();
	let deadline = Instant::now() + Duration::from_secs(5);
	let mut notice = vec![];
	while notice.is_empty() {
		assert!(Instant::now() < deadline, "no notice for the killed job");
		thread::sleep(Duration::from_millis(10));
		state.notify_jobs(&mut notice).unwrap();
	}
	assert_eq!(String::from_utf8(notice).unwrap(), "[1]  Done\tsleep 4.5071 | cat\n");
}
